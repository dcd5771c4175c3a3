//! Target execution: one worker drives one target's page plan.
//!
//! Loop shape: safepoint -> risk gate -> rate grant -> behavioral delay ->
//! extract page (with retries) -> validate -> enqueue for enrichment ->
//! advance pagination. Pause and cancel are honored only at the safepoint
//! so an in-flight page always completes on its own timeout budgets.

use crate::control::JobControl;
use crate::quota::QuotaTracker;
use crate::JobShared;
use async_trait::async_trait;
use quarry_driver::{Driver, DriverError, DynamicDriver, StaticDriver};
use quarry_extract::{extractor_for, ExtractionResult, PageCursor};
use quarry_monitor::metrics::names;
use quarry_monitor::{EventBus, MetricsRegistry};
use quarry_protocol::defaults::SCHEMA_DRIFT_HIT_RATE;
use quarry_protocol::events::{self, EventKind};
use quarry_protocol::idempotency::stable_extract_key;
use quarry_protocol::types::{
    ExtractionMethod, JobId, QualityReport, RawQuestion, RetryPolicy, SourceConfig, Target,
};
use quarry_stealth::{RequestOutcome, Session, SessionBroker};
use rand::Rng;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Consecutive bot-walled pages before the target is abandoned.
const MAX_BLOCK_STREAK: u32 = 3;

/// Slice length for interruptible sleeps so cancel stays responsive.
const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// One validated record on its way to the AI processor.
pub struct WorkItem {
    pub job_id: JobId,
    pub source: Arc<SourceConfig>,
    pub raw: RawQuestion,
    pub quality: QualityReport,
    pub shared: Arc<Mutex<JobShared>>,
}

/// Builds a driver for a session; swapped out by tests.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn create(
        &self,
        session: &Session,
        source: &SourceConfig,
    ) -> Result<Box<dyn Driver>, DriverError>;
}

/// Production factory: static fetcher or headless browser per source.
pub struct RealDriverFactory;

#[async_trait]
impl DriverFactory for RealDriverFactory {
    async fn create(
        &self,
        session: &Session,
        source: &SourceConfig,
    ) -> Result<Box<dyn Driver>, DriverError> {
        match source.method {
            ExtractionMethod::StaticDom => {
                Ok(Box::new(StaticDriver::start(session, source.timeouts)?))
            }
            ExtractionMethod::DynamicJs => Ok(Box::new(
                DynamicDriver::start(session, source.timeouts).await?,
            )),
        }
    }
}

/// Everything a target worker needs, shared across the job.
pub struct TargetRunContext {
    pub job_id: JobId,
    pub source: Arc<SourceConfig>,
    pub broker: Arc<SessionBroker>,
    pub driver_factory: Arc<dyn DriverFactory>,
    pub bus: Arc<EventBus>,
    pub metrics: Arc<MetricsRegistry>,
    pub db: quarry_db::QuarryDb,
    pub ai_tx: mpsc::Sender<WorkItem>,
    pub control: JobControl,
    pub retry: RetryPolicy,
    pub shared: Arc<Mutex<JobShared>>,
    /// Extract keys already claimed in this run (cross-page dedupe).
    pub seen_keys: Arc<Mutex<HashSet<String>>>,
}

#[derive(Debug, Default)]
pub struct TargetOutcome {
    pub pages_fetched: u64,
    pub extracted: u64,
    pub failed: bool,
    pub drift: bool,
    pub cancelled: bool,
    /// Where to resume if the plan was interrupted.
    pub next_cursor: Option<PageCursor>,
}

/// Sleep that stays responsive to pause and cancel. Returns false when
/// the worker should stop and release its slot.
async fn interruptible_sleep(control: &JobControl, total: Duration) -> bool {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if control.is_cancelled() || control.is_paused() {
            return false;
        }
        let slice = remaining.min(SLEEP_SLICE);
        tokio::time::sleep(slice).await;
        remaining = remaining.saturating_sub(slice);
    }
    !control.is_cancelled() && !control.is_paused()
}

fn retry_backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy.backoff_base_ms.saturating_mul(1 << attempt.min(8));
    let jitter = rand::thread_rng().gen_range(0..=policy.backoff_base_ms / 4 + 1);
    Duration::from_millis((base + jitter).min(policy.backoff_max_ms))
}

pub async fn run_target(
    ctx: &TargetRunContext,
    target: &Target,
    resume_cursor: Option<PageCursor>,
    quota: Arc<Mutex<QuotaTracker>>,
) -> TargetOutcome {
    let source_id = ctx.source.source_id.clone();
    let mut outcome = TargetOutcome::default();
    let mut cursor = resume_cursor.unwrap_or_else(|| PageCursor::first(target));

    ctx.bus.publish(
        EventKind::TargetStarted,
        Some(ctx.job_id),
        Some(source_id.clone()),
        serde_json::json!({ "target_id": target.target_id, "cursor": cursor.encode() }),
    );

    let session = ctx.broker.acquire_session(&source_id);
    let mut driver = match ctx.driver_factory.create(&session, &ctx.source).await {
        Ok(driver) => driver,
        Err(e) => {
            warn!(job = %ctx.job_id, target = %target.target_id, "driver start failed: {e}");
            ctx.bus.publish(
                EventKind::DriverError,
                Some(ctx.job_id),
                Some(source_id.clone()),
                serde_json::json!({ "target_id": target.target_id, "error": e.to_string() }),
            );
            ctx.metrics.inc_counter(names::ERRORS_TOTAL, 1);
            outcome.failed = true;
            return outcome;
        }
    };
    let extractor = extractor_for(ctx.source.method);
    let mut block_streak = 0u32;

    'pages: loop {
        // Safepoint: pause and cancel both stop the worker here so its
        // pool slot frees up; the persisted cursor is the resume point.
        if ctx.control.is_cancelled() || ctx.control.is_paused() {
            outcome.cancelled = ctx.control.is_cancelled();
            outcome.next_cursor = Some(cursor.clone());
            break 'pages;
        }

        // Detection-risk gate: a hot source sits out its cooldown.
        let (paused_for_risk, cooldown) = ctx.broker.should_pause_source(&source_id);
        if paused_for_risk {
            info!(source = %source_id, ?cooldown, "source cooling down");
            ctx.bus.publish(
                EventKind::RateLimited,
                Some(ctx.job_id),
                Some(source_id.clone()),
                serde_json::to_value(events::RateLimited {
                    target_id: target.target_id.clone(),
                    url: cursor.url.clone(),
                    cooldown_secs: cooldown.as_secs(),
                })
                .unwrap_or_default(),
            );
            if !interruptible_sleep(&ctx.control, cooldown).await {
                outcome.cancelled = ctx.control.is_cancelled();
                outcome.next_cursor = Some(cursor.clone());
                break 'pages;
            }
            continue 'pages;
        }

        // Rate grant.
        loop {
            match ctx.broker.try_acquire_grant(&source_id) {
                quarry_stealth::Acquire::Grant => break,
                quarry_stealth::Acquire::WaitHint(wait) => {
                    if !interruptible_sleep(&ctx.control, wait).await {
                        outcome.cancelled = ctx.control.is_cancelled();
                        outcome.next_cursor = Some(cursor.clone());
                        break 'pages;
                    }
                }
            }
        }

        // Behavioral pacing.
        if !interruptible_sleep(&ctx.control, ctx.broker.delay_between_actions(&session)).await {
            outcome.cancelled = ctx.control.is_cancelled();
            outcome.next_cursor = Some(cursor.clone());
            break 'pages;
        }

        // Page attempt with retries for transport-class errors and
        // selector misses that produced nothing.
        let mut attempt = 0u32;
        let page = loop {
            attempt += 1;
            match extractor
                .extract_page(driver.as_mut(), &source_id, target, &cursor)
                .await
            {
                Ok(result) => {
                    let soft_miss = result.ok
                        && result.records.is_empty()
                        && result.selector_hit_rate < SCHEMA_DRIFT_HIT_RATE
                        && !result.load.detected_block;
                    if soft_miss && attempt < ctx.retry.max_attempts {
                        debug!(
                            target = %target.target_id,
                            attempt,
                            hit_rate = result.selector_hit_rate,
                            "selector miss, retrying page"
                        );
                        tokio::time::sleep(retry_backoff(&ctx.retry, attempt - 1)).await;
                        continue;
                    }
                    break Ok(result);
                }
                Err(e) if e.is_retriable() && attempt < ctx.retry.max_attempts => {
                    warn!(target = %target.target_id, attempt, "page error, retrying: {e}");
                    tokio::time::sleep(retry_backoff(&ctx.retry, attempt - 1)).await;
                }
                Err(e) => break Err(e),
            }
        };

        let page = match page {
            Ok(page) => page,
            Err(e) => {
                ctx.bus.publish(
                    EventKind::DriverError,
                    Some(ctx.job_id),
                    Some(source_id.clone()),
                    serde_json::json!({ "target_id": target.target_id, "error": e.to_string() }),
                );
                ctx.metrics.inc_counter(names::ERRORS_TOTAL, 1);
                outcome.failed = true;
                break 'pages;
            }
        };

        outcome.pages_fetched += 1;
        ctx.metrics.inc_counter(names::PAGES_FETCHED_TOTAL, 1);
        ctx.metrics.observe(
            names::PAGE_EXTRACT_LATENCY_MS,
            page.elapsed.as_millis() as f64,
        );
        ctx.broker.notify_request_outcome(
            &session,
            &page.load.final_url,
            RequestOutcome {
                status: page.load.status,
                latency: page.load.elapsed,
                detected_block: page.load.detected_block,
            },
        );

        if page.load.detected_block {
            block_streak += 1;
            ctx.metrics.inc_counter(names::ERRORS_TOTAL, 1);
            ctx.bus.publish(
                EventKind::RateLimited,
                Some(ctx.job_id),
                Some(source_id.clone()),
                serde_json::to_value(events::RateLimited {
                    target_id: target.target_id.clone(),
                    url: page.load.final_url.clone(),
                    cooldown_secs: 0,
                })
                .unwrap_or_default(),
            );
            if block_streak >= MAX_BLOCK_STREAK {
                warn!(target = %target.target_id, "giving up after repeated bot walls");
                outcome.failed = true;
                break 'pages;
            }
            // Same cursor again after the risk gate has had its say.
            continue 'pages;
        }
        block_streak = 0;

        // Schema drift: a page that stayed under the hit-rate floor even
        // after retries fails the target; the job continues.
        if page.selector_hit_rate < SCHEMA_DRIFT_HIT_RATE && page.records.is_empty() {
            ctx.bus.publish(
                EventKind::SchemaDrift,
                Some(ctx.job_id),
                Some(source_id.clone()),
                serde_json::to_value(events::SchemaDriftPayload {
                    target_id: target.target_id.clone(),
                    hit_rate: page.selector_hit_rate,
                    partial: false,
                })
                .unwrap_or_default(),
            );
            outcome.drift = true;
            outcome.failed = true;
            break 'pages;
        }
        if page.selector_hit_rate < SCHEMA_DRIFT_HIT_RATE {
            // Partial drift: still producing, but flag it.
            ctx.bus.publish(
                EventKind::SchemaDrift,
                Some(ctx.job_id),
                Some(source_id.clone()),
                serde_json::to_value(events::SchemaDriftPayload {
                    target_id: target.target_id.clone(),
                    hit_rate: page.selector_hit_rate,
                    partial: true,
                })
                .unwrap_or_default(),
            );
            outcome.drift = true;
        }

        let quota_spent = process_records(ctx, target, page, &quota, &mut outcome).await;
        if quota_spent {
            info!(target = %target.target_id, "quota reached");
            break 'pages;
        }

        // Pagination.
        match extractor.advance(driver.as_mut(), target, &cursor).await {
            Ok(Some(next)) => cursor = next,
            Ok(None) => break 'pages,
            Err(e) => {
                warn!(target = %target.target_id, "pagination failed: {e}");
                ctx.bus.publish(
                    EventKind::DriverError,
                    Some(ctx.job_id),
                    Some(source_id.clone()),
                    serde_json::json!({ "target_id": target.target_id, "error": e.to_string() }),
                );
                break 'pages;
            }
        }
    }

    if let Err(e) = driver.close().await {
        debug!("driver close: {e}");
    }
    quota
        .lock()
        .expect("quota lock")
        .mark_exhausted(&target.target_id);

    ctx.bus.publish(
        EventKind::TargetFinished,
        Some(ctx.job_id),
        Some(source_id),
        serde_json::to_value(events::TargetFinished {
            target_id: target.target_id.clone(),
            pages_fetched: outcome.pages_fetched,
            extracted: outcome.extracted,
            failed: outcome.failed,
        })
        .unwrap_or_default(),
    );
    outcome
}

/// Validate, dedupe, take quota and enqueue every record of a page.
/// Returns true when the source quota is spent.
async fn process_records(
    ctx: &TargetRunContext,
    target: &Target,
    page: ExtractionResult,
    quota: &Arc<Mutex<QuotaTracker>>,
    outcome: &mut TargetOutcome,
) -> bool {
    let source_id = &ctx.source.source_id;

    for raw in page.records {
        {
            let mut shared = ctx.shared.lock().expect("job shared lock");
            shared.progress.record_attempted(1);
        }

        let key = stable_extract_key(source_id.as_str(), &target.target_id, &raw.question_text);
        {
            let mut seen = ctx.seen_keys.lock().expect("seen keys lock");
            if !seen.insert(key.clone()) {
                continue;
            }
        }
        match ctx.db.extract_key_seen(source_id, &target.target_id, &key).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                warn!("extract key lookup failed: {e}");
            }
        }

        let quota_granted = {
            let mut quota = quota.lock().expect("quota lock");
            quota.try_consume(&target.target_id)
        };
        if !quota_granted {
            return true;
        }

        outcome.extracted += 1;
        ctx.metrics.inc_counter(names::QUESTIONS_EXTRACTED_TOTAL, 1);
        ctx.bus.publish(
            EventKind::QuestionExtracted,
            Some(ctx.job_id),
            Some(source_id.clone()),
            serde_json::json!({ "target_id": target.target_id, "question_id": raw.id }),
        );

        let quality = quarry_quality::evaluate(&raw, &ctx.source);
        {
            let mut shared = ctx.shared.lock().expect("job shared lock");
            shared.progress.record_extracted(1);
            shared.progress.record_validated(1);
            shared.pending += 1;
        }

        let item = WorkItem {
            job_id: ctx.job_id,
            source: ctx.source.clone(),
            raw,
            quality,
            shared: ctx.shared.clone(),
        };

        // Bounded queue toward the AI processor: full means the target
        // pauses here rather than dropping the record.
        match ctx.ai_tx.try_send(item) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(item)) => {
                ctx.metrics.inc_counter(names::BACKPRESSURE_ENGAGED_TOTAL, 1);
                ctx.bus.publish(
                    EventKind::BackpressureEngaged,
                    Some(ctx.job_id),
                    Some(source_id.clone()),
                    serde_json::json!({ "target_id": target.target_id }),
                );
                if ctx.ai_tx.send(item).await.is_err() {
                    warn!("ai queue closed, dropping target");
                    ctx.shared.lock().expect("job shared lock").pending -= 1;
                    return true;
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("ai queue closed, dropping target");
                ctx.shared.lock().expect("job shared lock").pending -= 1;
                return true;
            }
        }
    }
    false
}
