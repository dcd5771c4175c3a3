//! Engine wiring: job lifecycle, worker fan-out, and the enrichment
//! pipeline consumer.

use crate::control::JobControl;
use crate::gate::PriorityGate;
use crate::queue::{JobQueue, JobRecord};
use crate::quota::QuotaTracker;
use crate::state::{apply, JobAction};
use crate::worker::{run_target, DriverFactory, TargetRunContext, WorkItem};
use crate::JobShared;
use chrono::Utc;
use quarry_ai::{AiCapabilities, AiProcessor, ProcessorConfig};
use quarry_dedup::DuplicateDetector;
use quarry_db::QuarryDb;
use quarry_extract::PageCursor;
use quarry_monitor::metrics::names;
use quarry_monitor::{BusMessage, EventBus, MetricsRegistry};
use quarry_protocol::config::EngineSettings;
use quarry_protocol::events::{self, EventKind};
use quarry_protocol::http_types::CreateJobRequest;
use quarry_protocol::types::{
    GateVerdict, JobId, JobSpec, JobState, ProcessedQuestion, RetryPolicy, SourceConfig, SourceId,
    Target, TargetProgress,
};
use quarry_stealth::SessionBroker;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How long the completing state waits for the enrichment queue to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(60);
/// Storage write retries before the job is failed.
const STORAGE_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("invalid transition from {from:?}")]
    InvalidTransition { from: JobState },

    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

pub struct Engine {
    settings: EngineSettings,
    db: QuarryDb,
    queue: JobQueue,
    broker: Arc<SessionBroker>,
    driver_factory: Arc<dyn DriverFactory>,
    bus: Arc<EventBus>,
    metrics: Arc<MetricsRegistry>,
    sources: RwLock<HashMap<SourceId, Arc<SourceConfig>>>,
    source_permits: RwLock<HashMap<SourceId, Arc<Semaphore>>>,
    global_gate: Arc<PriorityGate>,
    controls: Mutex<HashMap<JobId, JobControl>>,
    shared: Mutex<HashMap<JobId, Arc<Mutex<JobShared>>>>,
    runners: Mutex<HashMap<JobId, JoinHandle<()>>>,
    ai_tx: mpsc::Sender<WorkItem>,
    processor: tokio::sync::Mutex<AiProcessor>,
    dedup: Mutex<DuplicateDetector>,
    started_at: std::time::Instant,
}

impl Engine {
    /// Construct the engine and spawn its background consumers (AI
    /// pipeline, durable event tail, gauge refresh).
    pub async fn start(
        settings: EngineSettings,
        source_configs: Vec<SourceConfig>,
        db: QuarryDb,
        capabilities: AiCapabilities,
        driver_factory: Arc<dyn DriverFactory>,
        bus: Arc<EventBus>,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Arc<Self>, EngineError> {
        let broker = Arc::new(SessionBroker::new());
        let mut sources = HashMap::new();
        let mut permits = HashMap::new();
        for config in source_configs {
            broker.register_source(&config);
            db.upsert_source(&config)
                .await
                .map_err(|e| EngineError::Storage(e.to_string()))?;
            permits.insert(
                config.source_id.clone(),
                Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            );
            sources.insert(config.source_id.clone(), Arc::new(config));
        }

        let (ai_tx, ai_rx) = mpsc::channel(settings.ai_queue_capacity.max(1));
        let processor_config = ProcessorConfig {
            batch_size: settings.ai_batch_size.max(1),
            ..ProcessorConfig::default()
        };

        let engine = Arc::new(Self {
            global_gate: PriorityGate::new(settings.global_concurrency),
            settings,
            queue: JobQueue::new(db.clone()),
            db,
            broker,
            driver_factory,
            bus,
            metrics,
            sources: RwLock::new(sources),
            source_permits: RwLock::new(permits),
            controls: Mutex::new(HashMap::new()),
            shared: Mutex::new(HashMap::new()),
            runners: Mutex::new(HashMap::new()),
            ai_tx,
            processor: tokio::sync::Mutex::new(AiProcessor::new(capabilities, processor_config)),
            dedup: Mutex::new(DuplicateDetector::new()),
            started_at: std::time::Instant::now(),
        });

        // A previous process may have died mid-run; park those jobs so
        // their persisted frontier can be resumed explicitly.
        engine
            .queue
            .park_orphans()
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        tokio::spawn(ai_loop(engine.clone(), ai_rx));
        tokio::spawn(event_tail_loop(engine.clone()));
        tokio::spawn(gauge_loop(engine.clone()));
        Ok(engine)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn db(&self) -> &QuarryDb {
        &self.db
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Fraction of embedding lookups served from the cache.
    pub async fn embedding_cache_hit_rate(&self) -> f64 {
        self.processor.lock().await.cache_hit_rate()
    }

    // ------------------------------------------------------------------
    // Source catalog
    // ------------------------------------------------------------------

    /// Case-insensitive source lookup over the current snapshot.
    pub fn source(&self, name: &str) -> Option<Arc<SourceConfig>> {
        let wanted = SourceId::new(name);
        self.sources
            .read()
            .expect("source registry lock")
            .get(&wanted)
            .cloned()
    }

    pub fn sources_snapshot(&self) -> Vec<Arc<SourceConfig>> {
        let mut sources: Vec<Arc<SourceConfig>> = self
            .sources
            .read()
            .expect("source registry lock")
            .values()
            .cloned()
            .collect();
        sources.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        sources
    }

    pub fn reliability_map(&self) -> HashMap<SourceId, f64> {
        self.sources
            .read()
            .expect("source registry lock")
            .iter()
            .map(|(id, s)| (id.clone(), s.reliability))
            .collect()
    }

    fn source_permit(&self, source_id: &SourceId) -> Arc<Semaphore> {
        self.source_permits
            .read()
            .expect("source permit lock")
            .get(source_id)
            .cloned()
            .unwrap_or_else(|| Arc::new(Semaphore::new(1)))
    }

    // ------------------------------------------------------------------
    // Job lifecycle
    // ------------------------------------------------------------------

    pub async fn create_job(&self, request: &CreateJobRequest) -> Result<JobId, EngineError> {
        if request.job_name.trim().is_empty() {
            return Err(EngineError::Validation("job_name must not be empty".into()));
        }
        if request.max_questions_per_source == 0 {
            return Err(EngineError::Validation(
                "max_questions_per_source must be positive".into(),
            ));
        }
        if request.source_names.is_empty() {
            return Err(EngineError::Validation(
                "at least one source is required".into(),
            ));
        }

        let mut sources = Vec::with_capacity(request.source_names.len());
        for name in &request.source_names {
            let source = self
                .source(name)
                .ok_or_else(|| EngineError::UnknownSource(name.clone()))?;
            if !source.enabled {
                return Err(EngineError::Validation(format!(
                    "source {} is disabled",
                    source.source_id
                )));
            }
            sources.push(source.source_id.clone());
        }

        let spec = JobSpec {
            job_id: JobId::default(),
            job_name: request.job_name.clone(),
            sources,
            max_questions_per_source: request.max_questions_per_source,
            target_categories: request.target_categories.clone(),
            priority: request.priority_level,
            retry: RetryPolicy::default(),
            created_at: Utc::now(),
            created_by: None,
        };
        let job_id = self
            .queue
            .insert(spec)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(job_id)
    }

    pub async fn start_job(self: &Arc<Self>, job_id: JobId) -> Result<JobState, EngineError> {
        let record = self.load(job_id).await?;
        let from = record.run.state;
        apply(from, JobAction::Start)
            .map_err(|_| EngineError::InvalidTransition { from })?;

        if !self
            .queue
            .transition(job_id, from, JobState::Running)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?
        {
            return Err(EngineError::InvalidTransition { from });
        }
        self.publish_state_change(job_id, from, JobState::Running, None);

        let control = self.control(job_id);
        control.resume();

        // Check-and-spawn under one lock: a runner that is parking itself
        // for pause removes its entry under the same lock, so exactly one
        // live runner exists per job.
        {
            let mut runners = self.runners.lock().expect("runners lock");
            let need_runner = runners.get(&job_id).map_or(true, JoinHandle::is_finished);
            if need_runner {
                let engine = self.clone();
                let handle = tokio::spawn(async move {
                    run_job(engine, job_id).await;
                });
                runners.insert(job_id, handle);
            }
        }
        Ok(JobState::Running)
    }

    pub async fn pause_job(&self, job_id: JobId) -> Result<JobState, EngineError> {
        let record = self.load(job_id).await?;
        let from = record.run.state;
        apply(from, JobAction::Pause)
            .map_err(|_| EngineError::InvalidTransition { from })?;

        if !self
            .queue
            .transition(job_id, from, JobState::Paused)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?
        {
            return Err(EngineError::InvalidTransition { from });
        }
        self.control(job_id).pause();
        self.publish_state_change(job_id, from, JobState::Paused, None);
        Ok(JobState::Paused)
    }

    pub async fn cancel_job(self: &Arc<Self>, job_id: JobId) -> Result<JobState, EngineError> {
        let record = self.load(job_id).await?;
        let from = record.run.state;
        apply(from, JobAction::Cancel)
            .map_err(|_| EngineError::InvalidTransition { from })?;

        if !self
            .queue
            .transition(job_id, from, JobState::Cancelled)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?
        {
            return Err(EngineError::InvalidTransition { from });
        }
        let control = self.control(job_id);
        control.cancel();
        control.resume();
        self.publish_state_change(
            job_id,
            from,
            JobState::Cancelled,
            Some(quarry_protocol::defaults::CANCELLED_BY_USER_MESSAGE.to_string()),
        );

        // In-flight pages may finish inside the grace window; after that
        // the runner is aborted outright.
        let grace = Duration::from_secs(self.settings.grace_window_secs);
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let handle = engine.runners.lock().expect("runners lock").remove(&job_id);
            if let Some(handle) = handle {
                if !handle.is_finished() {
                    warn!(%job_id, "grace window elapsed, aborting runner");
                    handle.abort();
                }
            }
            engine.persist_progress(job_id).await;
        });
        Ok(JobState::Cancelled)
    }

    pub async fn delete_job(&self, job_id: JobId) -> Result<(), EngineError> {
        let record = self.load(job_id).await?;
        let state = record.run.state;
        if !state.is_terminal() && state != JobState::Paused {
            return Err(EngineError::InvalidTransition { from: state });
        }
        let deleted = self
            .queue
            .soft_delete(job_id)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        if !deleted {
            return Err(EngineError::InvalidTransition { from: state });
        }
        Ok(())
    }

    pub async fn job_detail(&self, job_id: JobId) -> Result<JobRecord, EngineError> {
        let mut record = self.load(job_id).await?;
        // Live counters beat the last persisted snapshot.
        let shared = {
            let map = self.shared.lock().expect("shared map lock");
            map.get(&job_id).cloned()
        };
        if let Some(shared) = shared {
            let shared = shared.lock().expect("job shared lock");
            record.run.progress = shared.progress;
            record.run.targets = shared.targets.clone();
        }
        Ok(record)
    }

    async fn load(&self, job_id: JobId) -> Result<JobRecord, EngineError> {
        self.queue
            .load(job_id)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?
            .filter(|r| !r.deleted)
            .ok_or(EngineError::NotFound(job_id))
    }

    // ------------------------------------------------------------------
    // Shared state plumbing
    // ------------------------------------------------------------------

    fn control(&self, job_id: JobId) -> JobControl {
        self.controls
            .lock()
            .expect("controls lock")
            .entry(job_id)
            .or_default()
            .clone()
    }

    fn shared_state(&self, job_id: JobId) -> Arc<Mutex<JobShared>> {
        self.shared
            .lock()
            .expect("shared map lock")
            .entry(job_id)
            .or_default()
            .clone()
    }

    fn publish_state_change(
        &self,
        job_id: JobId,
        from: JobState,
        to: JobState,
        reason: Option<String>,
    ) {
        self.bus.publish(
            EventKind::JobStateChanged,
            Some(job_id),
            None,
            serde_json::to_value(events::JobStateChanged { from, to, reason })
                .unwrap_or_default(),
        );
        self.metrics.inc_counter(names::EVENTS_TOTAL, 1);
    }

    async fn persist_progress(&self, job_id: JobId) {
        let shared = {
            let map = self.shared.lock().expect("shared map lock");
            map.get(&job_id).cloned()
        };
        let Some(shared) = shared else { return };
        let (progress, targets) = {
            let shared = shared.lock().expect("job shared lock");
            (shared.progress, shared.targets.clone())
        };
        if let Err(e) = self.queue.save_progress(job_id, &progress, &targets).await {
            warn!(%job_id, "progress persist failed: {e}");
        }
    }

    async fn fail_job(&self, job_id: JobId, reason: &str) {
        let _ = self.queue.record_error(job_id, reason).await;
        for from in [JobState::Running, JobState::Completing] {
            match self.queue.transition(job_id, from, JobState::Failed).await {
                Ok(true) => {
                    self.publish_state_change(job_id, from, JobState::Failed, Some(reason.into()));
                    return;
                }
                Ok(false) => {}
                Err(e) => {
                    error!(%job_id, "failed-state transition error: {e}");
                    return;
                }
            }
        }
    }

    /// Fold a finished job into the source reliability EMA.
    async fn update_reliability(&self, spec: &JobSpec, failed_targets: usize, total: usize) {
        if total == 0 {
            return;
        }
        let success = 1.0 - failed_targets as f64 / total as f64;
        let updated: Vec<Arc<SourceConfig>> = {
            let mut registry = self.sources.write().expect("source registry lock");
            spec.sources
                .iter()
                .filter_map(|source_id| {
                    let current = registry.get(source_id)?;
                    let mut next = (**current).clone();
                    next.reliability = (0.7 * next.reliability + 0.3 * success).clamp(0.0, 1.0);
                    let next = Arc::new(next);
                    registry.insert(source_id.clone(), next.clone());
                    Some(next)
                })
                .collect()
        };
        for source in updated {
            if let Err(e) = self
                .db
                .set_source_reliability(&source.source_id, source.reliability)
                .await
            {
                warn!(source = %source.source_id, "reliability persist failed: {e}");
            }
        }
    }
}

// ----------------------------------------------------------------------
// Job runner
// ----------------------------------------------------------------------

async fn run_job(engine: Arc<Engine>, job_id: JobId) {
    let record = match engine.queue.load(job_id).await {
        Ok(Some(record)) => record,
        _ => return,
    };
    let spec = record.spec;
    let control = engine.control(job_id);
    let shared = engine.shared_state(job_id);
    {
        // Seed from the persisted snapshot only when this process has no
        // live counters yet (fresh start or post-restart resume); live
        // state is a superset of what was last persisted.
        let mut sh = shared.lock().expect("job shared lock");
        if sh.targets.is_empty() && sh.progress == quarry_protocol::types::JobProgress::default() {
            sh.progress = record.run.progress;
            sh.targets = record.run.targets.clone();
        }
    }

    let mut failed: usize;
    let mut total: usize;
    loop {
        let mut handles = Vec::new();
        for source_id in &spec.sources {
            let Some(source) = engine.source(source_id.as_str()) else {
                warn!(%job_id, source = %source_id, "source vanished from catalog");
                continue;
            };
            let targets: Vec<Target> = source
                .targets
                .iter()
                .filter(|t| {
                    spec.target_categories.is_empty()
                        || spec
                            .target_categories
                            .iter()
                            .any(|c| c.eq_ignore_ascii_case(&t.category))
                })
                .cloned()
                .collect();
            if targets.is_empty() {
                continue;
            }
            handles.push(tokio::spawn(run_source(
                engine.clone(),
                job_id,
                spec.max_questions_per_source,
                spec.priority,
                spec.retry,
                source,
                targets,
                control.clone(),
                shared.clone(),
            )));
        }

        failed = 0;
        total = 0;
        for handle in handles {
            if let Ok((f, t)) = handle.await {
                failed += f;
                total += t;
            }
        }

        engine.persist_progress(job_id).await;
        if control.is_cancelled() {
            info!(%job_id, "job wound down after cancel");
            return;
        }
        if control.is_paused() {
            // Workers released their slots at the safepoint. Deregister
            // under the runners lock, re-checking pause there: a racing
            // resume either sees this runner still registered (and leaves
            // it to continue) or spawns a fresh one after it is gone.
            let mut runners = engine.runners.lock().expect("runners lock");
            if control.is_paused() {
                runners.remove(&job_id);
                info!(%job_id, "job parked after pause");
                return;
            }
        }

        // A resume that raced this join leaves interrupted targets behind;
        // go around and finish their plans from the saved cursors.
        let unfinished = {
            let sh = shared.lock().expect("job shared lock");
            sh.targets.iter().any(|t| !t.done && !t.failed)
        };
        if !unfinished {
            break;
        }
    }

    if total > 0 && failed as f64 / total as f64 > engine.settings.fail_ratio {
        engine
            .fail_job(job_id, &format!("{failed}/{total} targets failed"))
            .await;
        return;
    }

    // Drain the enrichment pipeline, then finish.
    if !matches!(
        engine
            .queue
            .transition(job_id, JobState::Running, JobState::Completing)
            .await,
        Ok(true)
    ) {
        return;
    }
    engine.publish_state_change(job_id, JobState::Running, JobState::Completing, None);

    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    loop {
        let pending = shared.lock().expect("job shared lock").pending;
        if pending <= 0 || control.is_cancelled() {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(%job_id, pending, "drain timeout, completing anyway");
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    engine.persist_progress(job_id).await;
    if matches!(
        engine
            .queue
            .transition(job_id, JobState::Completing, JobState::Completed)
            .await,
        Ok(true)
    ) {
        engine.publish_state_change(job_id, JobState::Completing, JobState::Completed, None);
        engine.update_reliability(&spec, failed, total).await;
        info!(%job_id, "job completed");
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_source(
    engine: Arc<Engine>,
    job_id: JobId,
    max_per_source: u64,
    priority: quarry_protocol::types::Priority,
    retry: RetryPolicy,
    source: Arc<SourceConfig>,
    targets: Vec<Target>,
    control: JobControl,
    shared: Arc<Mutex<JobShared>>,
) -> (usize, usize) {
    let target_refs: Vec<&Target> = targets.iter().collect();
    let quota = Arc::new(Mutex::new(QuotaTracker::new(
        max_per_source,
        &target_refs,
        engine.settings.spill_enabled,
    )));
    {
        // Resume path: earlier runs already consumed part of the budget.
        let sh = shared.lock().expect("job shared lock");
        let mut quota = quota.lock().expect("quota lock");
        for tp in sh.targets.iter().filter(|tp| tp.source_id == source.source_id) {
            quota.preload(&tp.target_id, tp.extracted);
        }
    }
    let seen_keys = Arc::new(Mutex::new(HashSet::new()));
    let source_sem = engine.source_permit(&source.source_id);

    let mut join_set = tokio::task::JoinSet::new();
    let total = targets.len();
    let mut failed = 0usize;

    for target in targets {
        // Resume support: finished targets are not re-scraped.
        let resume_cursor = {
            let sh = shared.lock().expect("job shared lock");
            match sh
                .targets
                .iter()
                .find(|tp| tp.target_id == target.target_id && tp.source_id == source.source_id)
            {
                Some(tp) if tp.done || tp.failed => {
                    if tp.failed {
                        failed += 1;
                    }
                    continue;
                }
                Some(tp) => tp.next_cursor.as_deref().and_then(PageCursor::decode),
                None => None,
            }
        };

        let ctx = TargetRunContext {
            job_id,
            source: source.clone(),
            broker: engine.broker.clone(),
            driver_factory: engine.driver_factory.clone(),
            bus: engine.bus.clone(),
            metrics: engine.metrics.clone(),
            db: engine.db.clone(),
            ai_tx: engine.ai_tx.clone(),
            control: control.clone(),
            retry,
            shared: shared.clone(),
            seen_keys: seen_keys.clone(),
        };
        let quota = quota.clone();
        let gate = engine.global_gate.clone();
        let source_sem = source_sem.clone();
        join_set.spawn(async move {
            let _global = gate.acquire(priority.rank()).await;
            let _source = source_sem.acquire_owned().await.expect("semaphore open");
            let outcome = run_target(&ctx, &target, resume_cursor, quota).await;
            (target, outcome)
        });
    }

    while let Some(result) = join_set.join_next().await {
        let Ok((target, outcome)) = result else {
            failed += 1;
            continue;
        };
        {
            let mut sh = shared.lock().expect("job shared lock");
            let entry = sh
                .targets
                .iter_mut()
                .find(|tp| tp.target_id == target.target_id && tp.source_id == source.source_id);
            match entry {
                Some(tp) => {
                    tp.pages_fetched += outcome.pages_fetched;
                    tp.extracted += outcome.extracted;
                    tp.next_cursor = outcome.next_cursor.as_ref().map(PageCursor::encode);
                    tp.done = !outcome.cancelled && outcome.next_cursor.is_none();
                    tp.failed = outcome.failed;
                }
                None => sh.targets.push(TargetProgress {
                    target_id: target.target_id.clone(),
                    source_id: source.source_id.clone(),
                    pages_fetched: outcome.pages_fetched,
                    extracted: outcome.extracted,
                    next_cursor: outcome.next_cursor.as_ref().map(PageCursor::encode),
                    done: !outcome.cancelled && outcome.next_cursor.is_none(),
                    failed: outcome.failed,
                }),
            }
        }
        if outcome.failed {
            failed += 1;
        }
        engine.persist_progress(job_id).await;
    }
    (failed, total)
}

// ----------------------------------------------------------------------
// Enrichment consumer
// ----------------------------------------------------------------------

async fn ai_loop(engine: Arc<Engine>, mut rx: mpsc::Receiver<WorkItem>) {
    let batch_size = engine.settings.ai_batch_size.max(1);
    let mut batch: Vec<WorkItem> = Vec::with_capacity(batch_size);
    loop {
        let flush = match tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
            Ok(Some(item)) => {
                batch.push(item);
                batch.len() >= batch_size
            }
            Ok(None) => {
                flush_batch(&engine, std::mem::take(&mut batch)).await;
                return;
            }
            Err(_) => !batch.is_empty(),
        };
        if flush {
            flush_batch(&engine, std::mem::take(&mut batch)).await;
        }
    }
}

async fn flush_batch(engine: &Arc<Engine>, batch: Vec<WorkItem>) {
    if batch.is_empty() {
        return;
    }

    // Records group per source: thresholds and weights differ.
    let mut groups: HashMap<SourceId, Vec<WorkItem>> = HashMap::new();
    for item in batch {
        groups
            .entry(item.source.source_id.clone())
            .or_default()
            .push(item);
    }

    for (_, items) in groups {
        let source = items[0].source.clone();
        let inputs = items
            .iter()
            .map(|i| (i.raw.clone(), i.quality.clone()))
            .collect();

        let started = std::time::Instant::now();
        let processed = {
            let mut processor = engine.processor.lock().await;
            processor.process_batch(inputs, &source).await
        };
        engine.metrics.observe(
            names::AI_BATCH_LATENCY_MS,
            started.elapsed().as_millis() as f64,
        );

        for (item, record) in items.into_iter().zip(processed) {
            finalize_record(engine, item, record).await;
        }
    }
}

async fn finalize_record(engine: &Arc<Engine>, item: WorkItem, mut record: ProcessedQuestion) {
    let reliabilities = engine.reliability_map();
    let dedup_outcome = if record.embedding.is_empty() {
        None
    } else {
        let mut detector = engine.dedup.lock().expect("dedup lock");
        let outcome = detector.observe(
            record.id,
            &record.source_id,
            &record.embedding,
            record.extracted_at,
            &reliabilities,
        );
        record.cluster_id = Some(outcome.cluster_id.clone());
        Some(outcome)
    };

    // Storage writes retry with backoff; persistent failure is fatal for
    // the job and raises a critical alert.
    let mut attempt = 0u32;
    let stored = loop {
        attempt += 1;
        match engine.db.upsert_question(&record).await {
            Ok(inserted) => break Some(inserted),
            Err(e) if attempt < STORAGE_ATTEMPTS => {
                warn!(question = %record.id, attempt, "storage write retry: {e}");
                tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
            }
            Err(e) => {
                error!(question = %record.id, "storage write failed: {e}");
                engine.metrics.inc_counter(names::ERRORS_TOTAL, 1);
                engine.bus.publish(
                    EventKind::AlertRaised,
                    Some(item.job_id),
                    Some(record.source_id.clone()),
                    serde_json::json!({
                        "severity": "critical",
                        "message": format!("storage write failed: {e}"),
                    }),
                );
                engine.fail_job(item.job_id, "persistent storage failure").await;
                break None;
            }
        }
    };

    {
        let mut shared = item.shared.lock().expect("job shared lock");
        shared.pending -= 1;
        if stored.is_none() {
            return;
        }

        if let Some(outcome) = dedup_outcome.as_ref().filter(|o| o.is_duplicate) {
            shared.progress.record_duplicates(1);
            engine.metrics.inc_counter(names::DUPLICATES_TOTAL, 1);
            engine.bus.publish(
                EventKind::DuplicateFound,
                Some(item.job_id),
                Some(record.source_id.clone()),
                serde_json::to_value(events::DuplicateFound {
                    question_id: record.id,
                    cluster_id: outcome.cluster_id.clone(),
                    similarity: outcome.similarity,
                    cross_source: outcome.cross_source,
                    representative: outcome.representative,
                })
                .unwrap_or_default(),
            );
        } else {
            match record.verdict {
                GateVerdict::AutoApprove => {
                    shared.progress.record_approved(1);
                    engine
                        .metrics
                        .inc_counter(names::QUESTIONS_APPROVED_TOTAL, 1);
                }
                GateVerdict::AutoReject => {
                    shared.progress.record_rejected(1);
                    engine
                        .metrics
                        .inc_counter(names::QUESTIONS_REJECTED_TOTAL, 1);
                }
                GateVerdict::HumanReview => {}
            }
        }
    }

    if let Some(outcome) = dedup_outcome.as_ref().filter(|o| o.is_duplicate) {
        if let Err(e) = engine
            .db
            .mark_question_duplicate(record.id, &outcome.cluster_id)
            .await
        {
            warn!(question = %record.id, "duplicate mark failed: {e}");
        }
        let snapshot = {
            let detector = engine.dedup.lock().expect("dedup lock");
            detector.clusters().snapshot(&outcome.cluster_id, &reliabilities)
        };
        if let Some(cluster) = snapshot {
            if let Err(e) = engine.db.upsert_cluster(&cluster).await {
                warn!(cluster = %cluster.cluster_id, "cluster persist failed: {e}");
            }
        }
    }

    engine.metrics.observe(names::FUSED_SCORE, record.fused_score);
    engine.bus.publish(
        EventKind::QuestionGated,
        Some(item.job_id),
        Some(record.source_id.clone()),
        serde_json::to_value(events::QuestionGated {
            question_id: record.id,
            verdict: record.verdict,
            fused_score: record.fused_score,
            cause: record
                .reviewer_notes
                .iter()
                .find(|n| n.as_str() == "ai_unavailable")
                .cloned(),
        })
        .unwrap_or_default(),
    );
    engine.metrics.inc_counter(names::EVENTS_TOTAL, 1);
}

// ----------------------------------------------------------------------
// Background loops
// ----------------------------------------------------------------------

/// Every bus event is appended to the durable tail so replay by sequence
/// survives the in-memory ring.
async fn event_tail_loop(engine: Arc<Engine>) {
    let mut subscription = engine.bus.subscribe();
    while let Some(message) = subscription.recv().await {
        match message {
            BusMessage::Event(event) => {
                if let Err(e) = engine.db.append_event(&event).await {
                    warn!("event tail write failed: {e}");
                }
            }
            BusMessage::Missed { from, to } => {
                warn!(from, to, "event tail lagged; ring events lost to durable tail");
            }
        }
    }
}

async fn gauge_loop(engine: Arc<Engine>) {
    loop {
        if let Ok((queued, active, paused)) = engine.queue.status_counts().await {
            engine.metrics.set_gauge(names::QUEUE_DEPTH, queued as f64);
            engine.metrics.set_gauge(names::ACTIVE_JOBS, active as f64);
            engine.metrics.set_gauge("paused_jobs", paused as f64);
        }
        let index_len = {
            let detector = engine.dedup.lock().expect("dedup lock");
            detector.index_len()
        };
        engine.metrics.set_gauge("dedup_index_size", index_len as f64);
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}
