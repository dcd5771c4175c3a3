//! Shared protocol types for Question Quarry.
//!
//! Everything that crosses a crate boundary lives here: entity types,
//! event kinds, the error taxonomy, canonical defaults, idempotency
//! hashing, and the HTTP DTOs shared by the API server and CLI client.

pub mod config;
pub mod defaults;
pub mod error;
pub mod events;
pub mod http_types;
pub mod idempotency;
pub mod types;

pub use error::QuarryError;
pub use events::{Event, EventKind};
pub use idempotency::{stable_extract_key, text_hash};
pub use types::{
    Difficulty, ExtractionMethod, GateVerdict, JobId, JobProgress, JobSpec, JobState, Priority,
    ProcessedQuestion, RawQuestion, SourceConfig, SourceId, Target, TargetId,
};
