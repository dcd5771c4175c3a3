//! HTTP API types shared by the server and CLI client.
//!
//! All types use serde for JSON serialization. Every response envelope
//! carries a `request_id`; errors use the problem-details shape.

use crate::types::{
    Alert, GateVerdict, JobId, JobProgress, JobState, Priority, SourceId, TargetProgress,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Problem details
// ============================================================================

/// Error body returned by every 4xx/5xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    pub error: String,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub request_id: String,
}

// ============================================================================
// Job management
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub job_name: String,
    /// Looked up case-insensitively against the source catalog.
    pub source_names: Vec<String>,
    pub max_questions_per_source: u64,
    #[serde(default)]
    pub target_categories: Vec<String>,
    #[serde(default)]
    pub priority_level: Priority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub job_id: JobId,
    pub state: JobState,
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub job_name: String,
    pub state: JobState,
    pub priority: Priority,
    pub sources: Vec<SourceId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetail {
    pub job_id: JobId,
    pub job_name: String,
    pub state: JobState,
    pub priority: Priority,
    pub sources: Vec<SourceId>,
    pub max_questions_per_source: u64,
    pub target_categories: Vec<String>,
    pub progress: JobProgress,
    pub targets: Vec<TargetProgress>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobSummary>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
    pub request_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobListQuery {
    #[serde(default)]
    pub state: Option<JobState>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

/// Acknowledgement for start/stop/pause/delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionResponse {
    pub job_id: JobId,
    pub state: JobState,
    pub request_id: String,
}

// ============================================================================
// Sources
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source_id: SourceId,
    pub display_name: String,
    pub method: String,
    pub enabled: bool,
    pub reliability: f64,
    pub target_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCatalogResponse {
    pub sources: Vec<SourceSummary>,
    pub request_id: String,
}

// ============================================================================
// Queue / system status
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub queued: u64,
    pub active: u64,
    pub paused: u64,
    pub request_id: String,
}

/// Shallow liveness subset served at `/scraping/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub uptime_secs: u64,
    pub storage_ok: bool,
    pub ai_ready: bool,
    pub request_id: String,
}

/// Full snapshot served at `/scraping/system-status`; `/health` is a
/// projection of the same model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub health: HealthReport,
    pub active_jobs: u64,
    pub queue_depth: u64,
    pub events_total: u64,
    pub alerts_firing: u64,
    pub sources_enabled: u64,
    pub request_id: String,
}

// ============================================================================
// Analytics
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceAnalytics {
    pub source_id: SourceId,
    pub jobs_total: u64,
    pub questions_approved: u64,
    pub questions_rejected: u64,
    pub duplicates: u64,
    pub reliability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateBreakdown {
    pub verdict: GateVerdict,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityAnalytics {
    pub average_fused_score: f64,
    pub gate_breakdown: Vec<GateBreakdown>,
    pub by_category: HashMap<String, u64>,
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceAnalytics {
    pub pages_per_minute: f64,
    pub avg_page_latency_ms: f64,
    pub avg_ai_batch_latency_ms: f64,
    pub backpressure_engaged_total: u64,
    pub embedding_cache_hit_rate: f64,
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossSourceDuplicates {
    pub cluster_count: u64,
    pub last_24h_delta: i64,
    /// Top clusters by member count, capped at 20.
    pub top_clusters: Vec<ClusterSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub cluster_id: String,
    pub size: usize,
    pub cross_source: bool,
    pub representative: uuid::Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDimension {
    Quality,
    Performance,
    Volume,
    Errors,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrendQuery {
    pub dimension: TrendDimension,
    /// Window in seconds, bounded by the metric retention.
    #[serde(default)]
    pub window: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendReport {
    pub dimension: TrendDimension,
    pub points: Vec<TrendPoint>,
    pub request_id: String,
}

// ============================================================================
// Monitoring stream
// ============================================================================

/// Client subscription frame sent on connect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamSubscribe {
    /// Event kind names; empty means all.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Replay the durable tail from this sequence before streaming live.
    #[serde(default)]
    pub from_sequence: Option<u64>,
}

/// Server push frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum StreamMessage {
    Events { events: Vec<crate::events::Event> },
    MetricSnapshots { metrics: Vec<crate::types::MetricPoint> },
    AlertTransitions { alerts: Vec<Alert> },
    /// Consumer lagged past the ring; the gap is queryable by sequence.
    MissedEvents { from: u64, to: u64 },
}
