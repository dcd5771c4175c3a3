//! The scraping engine: persistent job queue, worker pool, state machine,
//! quotas, retries, cooperative pause/cancel, and the enrichment pipeline
//! wiring toward the AI processor, duplicate detector and storage.

pub mod control;
pub mod engine;
pub mod gate;
pub mod queue;
pub mod quota;
pub mod state;
pub mod worker;

use quarry_protocol::types::{JobProgress, TargetProgress};

pub use control::{CancellationToken, JobControl};
pub use engine::{Engine, EngineError};
pub use queue::{JobQueue, JobRecord};
pub use state::{apply, JobAction, InvalidTransition};
pub use worker::{DriverFactory, RealDriverFactory, WorkItem};

/// Mutable run state shared between the job runner, its target workers and
/// the AI consumer. Guarded by the per-job lock.
#[derive(Debug, Default)]
pub struct JobShared {
    pub progress: JobProgress,
    pub targets: Vec<TargetProgress>,
    /// Records enqueued for enrichment but not yet stored.
    pub pending: i64,
}
