//! Pipeline event schema.
//!
//! Events are totally ordered by `sequence` within the process. Payloads are
//! kept as JSON values so the bus stays schema-stable while individual
//! producers evolve their payload structs.

use crate::types::{GateVerdict, JobId, JobState, SourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    JobStateChanged,
    TargetStarted,
    TargetFinished,
    QuestionExtracted,
    QuestionGated,
    DuplicateFound,
    DriverError,
    RateLimited,
    AlertRaised,
    SchemaDrift,
    BackpressureEngaged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::JobStateChanged => "job_state_changed",
            EventKind::TargetStarted => "target_started",
            EventKind::TargetFinished => "target_finished",
            EventKind::QuestionExtracted => "question_extracted",
            EventKind::QuestionGated => "question_gated",
            EventKind::DuplicateFound => "duplicate_found",
            EventKind::DriverError => "driver_error",
            EventKind::RateLimited => "rate_limited",
            EventKind::AlertRaised => "alert_raised",
            EventKind::SchemaDrift => "schema_drift",
            EventKind::BackpressureEngaged => "backpressure_engaged",
        }
    }
}

/// One bus event. `sequence` is assigned by the bus, monotonically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(default)]
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub source_id: Option<SourceId>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

// ============================================================================
// Payload structs for the common event kinds
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStateChanged {
    pub from: JobState,
    pub to: JobState,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetFinished {
    pub target_id: String,
    pub pages_fetched: u64,
    pub extracted: u64,
    pub failed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionGated {
    pub question_id: uuid::Uuid,
    pub verdict: GateVerdict,
    pub fused_score: f64,
    #[serde(default)]
    pub cause: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateFound {
    pub question_id: uuid::Uuid,
    pub cluster_id: String,
    pub similarity: f32,
    pub cross_source: bool,
    /// Cluster representative after this record joined.
    pub representative: uuid::Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimited {
    pub target_id: String,
    pub url: String,
    /// Zero when the event marks a blocked page rather than a cooldown.
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDriftPayload {
    pub target_id: String,
    pub hit_rate: f64,
    /// True when the page still produced records below the floor.
    #[serde(default)]
    pub partial: bool,
}
