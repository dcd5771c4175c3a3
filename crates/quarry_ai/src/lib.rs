//! AI enrichment: capability contracts, per-record processing, and the
//! fused quality gate.
//!
//! Vendor calls stay behind the capability traits; everything here works
//! against the contracts. Batches fail open: a transient AI error
//! downgrades only the affected record to human review.

pub mod capabilities;
pub mod classify;
pub mod local;
pub mod processor;

pub use capabilities::{
    AiCapabilities, AnswerRater, CategoryClassifier, GeneratedQuestion, QuestionGenerator,
    TextEmbedder,
};
pub use classify::LocalClassifier;
pub use local::LocalAi;
pub use processor::{AiProcessor, ProcessorConfig};
