//! Entity types shared across the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Canonical identifiers
// ============================================================================

/// Job identifier, backed by the queue table's integer row id. The
/// default (zero) is the placeholder a spec carries before insertion
/// assigns the real id.
///
/// Only the conversions the pipeline needs exist: row ids arrive as
/// `i64` from storage and as decimal strings from API paths, and go
/// back out as `i64` binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct JobId(u64);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobIdError {
    #[error("job ids are non-negative, got {0}")]
    Negative(i64),
    #[error("job id {0} exceeds the queue id range")]
    OutOfRange(u64),
    #[error("not a job id: `{0}`")]
    Unparseable(String),
}

impl JobId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// The storage-side representation. SQLite row ids are `i64`, so any
    /// id the queue ever handed out converts back losslessly.
    pub fn to_i64(self) -> Result<i64, JobIdError> {
        i64::try_from(self.0).map_err(|_| JobIdError::OutOfRange(self.0))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<i64> for JobId {
    type Error = JobIdError;

    fn try_from(row_id: i64) -> Result<Self, Self::Error> {
        u64::try_from(row_id)
            .map(Self)
            .map_err(|_| JobIdError::Negative(row_id))
    }
}

impl FromStr for JobId {
    type Err = JobIdError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        raw.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| JobIdError::Unparseable(raw.to_string()))
    }
}

/// Source identifier. Lookups are case-insensitive: the canonical form is
/// lowercase, the display name on [`SourceConfig`] keeps the original casing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Target identifier, unique within its source.
pub type TargetId = String;

// ============================================================================
// Source configuration
// ============================================================================

/// How a source's pages are retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Synchronous fetch, no JavaScript. Fast path for server-rendered pages.
    StaticDom,
    /// Full browser engine for lazy-loading / infinite-scroll sources.
    DynamicJs,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::StaticDom => "static_dom",
            ExtractionMethod::DynamicJs => "dynamic_js",
        }
    }
}

/// Pagination descriptor for a target's page plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Pagination {
    #[default]
    None,
    /// Follow the link matched by `selector` until it stops matching.
    NextLink { selector: String },
    /// Substitute page numbers into the entry URL query parameter.
    Numbered { param: String, max_pages: u32 },
    /// Scroll to the bottom until no new content loads.
    InfiniteScroll { max_steps: u32, pause_ms: u64 },
}

/// CSS selector set translating a page into question fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorSet {
    /// Container matched once per question on the page.
    pub question: String,
    pub text: String,
    pub options: String,
    pub correct_answer: String,
    #[serde(default)]
    pub explanation: Option<String>,
    /// Extra named selectors (code snippets, difficulty badges, ...).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A page plan within a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub target_id: TargetId,
    pub category: String,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    pub entry_url: String,
    #[serde(default)]
    pub pagination: Pagination,
    pub selectors: SelectorSet,
    /// Pages yielding fewer matches than this count toward schema drift.
    #[serde(default)]
    pub min_expected: u32,
    /// Hard cap overriding the even quota split for this target.
    #[serde(default)]
    pub max_questions: Option<u64>,
}

/// Rate limiter selection and parameters, per source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum RateLimitParams {
    /// Classical fixed window: `permits` grants per `window_ms`.
    TokenWindow { permits: u32, window_ms: u64 },
    /// Escalating delay schedule on repeated denials.
    Backoff {
        schedule: BackoffSchedule,
        base_ms: u64,
        max_ms: u64,
    },
    /// Interval widens under errors / detection risk, narrows when clean.
    Adaptive { min_interval_ms: u64, max_interval_ms: u64 },
}

impl Default for RateLimitParams {
    fn default() -> Self {
        RateLimitParams::TokenWindow {
            permits: 6,
            window_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffSchedule {
    #[default]
    Exponential,
    Linear,
    Fibonacci,
}

/// Proxy selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProxyStrategy {
    #[default]
    RoundRobin,
    Random,
    LeastRecentlyUsed,
    HealthWeighted,
}

/// Anti-detection parameters, per source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StealthParams {
    /// Pause the source when detection risk exceeds this.
    pub risk_threshold: f64,
    /// Cooldown applied when the source is paused for risk.
    pub cooldown_secs: u64,
    /// Half-life of the detection-risk EMA.
    pub risk_half_life_secs: u64,
    /// Behavioral pacing bounds between actions.
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    #[serde(default)]
    pub proxies: Vec<String>,
    #[serde(default)]
    pub proxy_strategy: ProxyStrategy,
}

impl Default for StealthParams {
    fn default() -> Self {
        Self {
            risk_threshold: crate::defaults::DEFAULT_RISK_THRESHOLD,
            cooldown_secs: crate::defaults::DEFAULT_RISK_COOLDOWN_SECS,
            risk_half_life_secs: crate::defaults::DEFAULT_RISK_HALF_LIFE_SECS,
            min_delay_ms: 800,
            max_delay_ms: 4_500,
            proxies: Vec::new(),
            proxy_strategy: ProxyStrategy::default(),
        }
    }
}

/// Quality gate thresholds, centralized on the source config.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateThresholds {
    pub auto_approve: f64,
    pub human_review: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            auto_approve: crate::defaults::DEFAULT_AUTO_APPROVE_THRESHOLD,
            human_review: crate::defaults::DEFAULT_HUMAN_REVIEW_THRESHOLD,
        }
    }
}

/// Component weights for the rule-based quality score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    pub completeness: f64,
    pub clarity: f64,
    pub accuracy: f64,
    pub uniqueness: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            completeness: 0.35,
            clarity: 0.25,
            accuracy: 0.25,
            uniqueness: 0.15,
        }
    }
}

/// Per-operation timeout budgets (seconds), configurable per source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeoutBudget {
    pub navigation_secs: u64,
    pub element_wait_secs: u64,
    pub script_exec_secs: u64,
    pub ai_call_secs: u64,
    pub ai_batch_secs: u64,
    pub embed_secs: u64,
}

impl Default for TimeoutBudget {
    fn default() -> Self {
        Self {
            navigation_secs: 30,
            element_wait_secs: 15,
            script_exec_secs: 30,
            ai_call_secs: 45,
            ai_batch_secs: 180,
            embed_secs: 15,
        }
    }
}

/// A configured scraping source. Immutable once a job references it;
/// admin updates bump `version` on a fresh copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source_id: SourceId,
    pub display_name: String,
    pub method: ExtractionMethod,
    pub base_url: String,
    pub targets: Vec<Target>,
    #[serde(default)]
    pub rate_limit: RateLimitParams,
    #[serde(default)]
    pub stealth: StealthParams,
    #[serde(default)]
    pub thresholds: GateThresholds,
    #[serde(default)]
    pub quality_weights: QualityWeights,
    #[serde(default)]
    pub timeouts: TimeoutBudget,
    /// Question text length bounds used by the validators.
    pub min_question_len: usize,
    pub max_question_len: usize,
    /// Per-source worker cap.
    pub max_concurrency: usize,
    pub enabled: bool,
    /// Maintained by the system from job outcomes, 0..=1.
    pub reliability: f64,
    pub version: u32,
}

// ============================================================================
// Jobs
// ============================================================================

/// Job priority class. Scheduling is FIFO within a class.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    /// Numeric rank for ORDER BY in the queue (higher runs first).
    pub fn rank(&self) -> i64 {
        match self {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
            Priority::Urgent => 3,
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Per-page retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::defaults::DEFAULT_PAGE_ATTEMPTS,
            backoff_base_ms: 2_000,
            backoff_max_ms: 30_000,
        }
    }
}

/// Immutable description of a scraping job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub job_id: JobId,
    pub job_name: String,
    pub sources: Vec<SourceId>,
    pub max_questions_per_source: u64,
    #[serde(default)]
    pub target_categories: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub retry: RetryPolicy,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Lifecycle state of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Queued,
    Running,
    Paused,
    Completing,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Paused => "paused",
            JobState::Completing => "completing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    /// Terminal states are never left again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "paused" => Ok(JobState::Paused),
            "completing" => Ok(JobState::Completing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "cancelled" => Ok(JobState::Cancelled),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// Running counters for a job. All counters are monotonic; the only
/// mutation path is the `record_*` methods, which preserve
/// `approved <= validated <= attempted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JobProgress {
    pub attempted: u64,
    pub extracted: u64,
    pub validated: u64,
    pub approved: u64,
    pub rejected: u64,
    pub duplicates: u64,
}

impl JobProgress {
    pub fn record_attempted(&mut self, n: u64) {
        self.attempted += n;
    }

    pub fn record_extracted(&mut self, n: u64) {
        self.extracted += n;
        self.attempted = self.attempted.max(self.extracted);
    }

    pub fn record_validated(&mut self, n: u64) {
        self.validated += n;
        self.extracted = self.extracted.max(self.validated);
        self.attempted = self.attempted.max(self.extracted);
    }

    pub fn record_approved(&mut self, n: u64) {
        self.approved += n;
        self.validated = self.validated.max(self.approved);
        self.extracted = self.extracted.max(self.validated);
        self.attempted = self.attempted.max(self.extracted);
    }

    pub fn record_rejected(&mut self, n: u64) {
        self.rejected += n;
    }

    pub fn record_duplicates(&mut self, n: u64) {
        self.duplicates += n;
    }

    /// Total records that consumed quota.
    pub fn quota_consumed(&self) -> u64 {
        self.approved + self.rejected + self.duplicates
    }
}

/// Per-target sub-progress, persisted so resume restores the frontier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetProgress {
    pub target_id: TargetId,
    pub source_id: SourceId,
    pub pages_fetched: u64,
    pub extracted: u64,
    /// Next-page cursor: URL for link pagination, page number for numbered,
    /// scroll step for infinite scroll.
    #[serde(default)]
    pub next_cursor: Option<String>,
    pub done: bool,
    pub failed: bool,
}

/// One activation of a [`JobSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub job_id: JobId,
    pub state: JobState,
    pub progress: JobProgress,
    pub targets: Vec<TargetProgress>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

// ============================================================================
// Questions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty: {other}")),
        }
    }
}

/// Where and how a record was pulled out of a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMeta {
    pub url: String,
    pub dom_path: String,
    pub extracted_at: DateTime<Utc>,
    /// Extractor confidence that the selector mapping was right, 0..=1.
    pub confidence: f64,
    #[serde(default)]
    pub raw_html_snippet: Option<String>,
}

/// Pre-enrichment question record. Transient: lives until processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawQuestion {
    pub id: uuid::Uuid,
    pub source_id: SourceId,
    pub target_id: TargetId,
    pub question_text: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub correct_answer: Option<String>,
    #[serde(default)]
    pub explanation: Option<String>,
    pub meta: ExtractionMeta,
}

/// Rule-engine quality components, each 0..=100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QualityReport {
    pub completeness: f64,
    pub clarity: f64,
    pub accuracy: f64,
    pub uniqueness: f64,
    pub overall: f64,
    /// Human-readable reasons for deductions, kept for rejected records.
    #[serde(default)]
    pub reasons: Vec<String>,
}

/// Final routing decision for a processed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateVerdict {
    AutoApprove,
    HumanReview,
    AutoReject,
}

impl GateVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateVerdict::AutoApprove => "auto_approve",
            GateVerdict::HumanReview => "human_review",
            GateVerdict::AutoReject => "auto_reject",
        }
    }
}

/// Post-enrichment, durable question record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedQuestion {
    pub id: uuid::Uuid,
    pub source_id: SourceId,
    pub target_id: TargetId,
    pub question_text: String,
    pub options: Vec<String>,
    /// Index into `options` after answer resolution.
    pub correct_index: usize,
    #[serde(default)]
    pub explanation: Option<String>,
    pub category: String,
    pub difficulty: Difficulty,
    pub quality: QualityReport,
    /// Fused rule + AI score, 0..=100.
    pub fused_score: f64,
    pub verdict: GateVerdict,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub reviewer_notes: Vec<String>,
    pub extracted_at: DateTime<Utc>,
    /// Dedupe key at extraction time.
    pub extract_key: String,
}

/// A group of semantically equivalent questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCluster {
    pub cluster_id: String,
    pub members: Vec<uuid::Uuid>,
    pub representative: uuid::Uuid,
    pub max_similarity: f32,
    pub cross_source: bool,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Monitoring
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    #[default]
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Firing,
    Acknowledged,
    Resolved,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Firing => "firing",
            AlertState::Acknowledged => "acknowledged",
            AlertState::Resolved => "resolved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: uuid::Uuid,
    pub rule_id: String,
    pub severity: AlertSeverity,
    pub state: AlertState,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub message: String,
}

/// One time-bucketed metric observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}
