//! Canonical default values shared across the pipeline.

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_DB_URL: &str = "sqlite:quarry.db";
pub const CANCELLED_BY_USER_MESSAGE: &str = "Cancelled by user";

/// Detection-risk threshold above which a source is paused.
pub const DEFAULT_RISK_THRESHOLD: f64 = 0.75;
/// Cooldown applied when a source is paused for risk (seconds).
pub const DEFAULT_RISK_COOLDOWN_SECS: u64 = 300;
/// Half-life of the detection-risk EMA (seconds).
pub const DEFAULT_RISK_HALF_LIFE_SECS: u64 = 120;

/// Consecutive proxy failures before a proxy is marked unhealthy.
pub const PROXY_FAILURE_THRESHOLD: u32 = 3;
/// Base proxy cooldown, doubled per consecutive unhealthy episode (seconds).
pub const PROXY_COOLDOWN_BASE_SECS: u64 = 30;

/// Quality gate defaults; overridable per source.
pub const DEFAULT_AUTO_APPROVE_THRESHOLD: f64 = 75.0;
pub const DEFAULT_HUMAN_REVIEW_THRESHOLD: f64 = 50.0;

/// Per-page retry attempts for transport / selector-miss errors.
pub const DEFAULT_PAGE_ATTEMPTS: u32 = 3;
/// Selector hit rate below which a page signals schema drift.
pub const SCHEMA_DRIFT_HIT_RATE: f64 = 0.5;
/// Ratio of failed targets above which the whole job fails.
pub const DEFAULT_FAIL_RATIO: f64 = 0.5;

/// Grace window for cooperative cancellation (seconds).
pub const DEFAULT_GRACE_WINDOW_SECS: u64 = 30;

/// Global worker cap.
pub const DEFAULT_GLOBAL_CONCURRENCY: usize = 4;

/// AI enrichment batch size.
pub const DEFAULT_AI_BATCH_SIZE: usize = 25;
/// Bounded queue capacity between the engine and the AI processor.
pub const DEFAULT_AI_QUEUE_CAPACITY: usize = 256;
/// Rule / AI score fusion weights.
pub const FUSE_RULE_WEIGHT: f64 = 0.6;
pub const FUSE_AI_WEIGHT: f64 = 0.4;
/// Disagreement margin between AI and local classifier that flags review.
pub const CATEGORY_DISAGREEMENT_MARGIN: f64 = 0.25;

/// Duplicate detection.
pub const DEDUP_TOP_K: usize = 5;
pub const SAME_SOURCE_DUP_THRESHOLD: f32 = 0.92;
pub const CROSS_SOURCE_DUP_THRESHOLD: f32 = 0.85;

/// Monitoring.
pub const EVENT_RING_CAPACITY: usize = 10_000;
pub const METRIC_BUCKET_SECS: u64 = 10;
pub const METRIC_RETENTION_SECS: u64 = 3_600;
pub const ALERT_EVAL_INTERVAL_SECS: u64 = 10;
/// Live stream coalesces metric updates to at most one per second per metric.
pub const STREAM_COALESCE_MS: u64 = 1_000;
/// Webhook notification retry attempts.
pub const WEBHOOK_RETRY_ATTEMPTS: u32 = 3;
