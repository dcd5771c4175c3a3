//! End-to-end engine tests against fixture pages: no network, scripted
//! drivers, deterministic local AI capabilities.

use quarry_ai::LocalAi;
use quarry_db::QuarryDb;
use quarry_engine::{Engine, EngineError};
use quarry_monitor::{BusMessage, EventBus, MetricsRegistry};
use quarry_protocol::config::{seed_sources, EngineSettings};
use quarry_protocol::events::EventKind;
use quarry_protocol::http_types::CreateJobRequest;
use quarry_protocol::types::{JobId, JobState, Priority, SourceConfig};
use quarry_test_utils::fixtures::{
    article_page, challenge_page, drifted_page, quiz_page, quiz_page_from_bank,
    sample_question_bank, ArticleFixture, QuizFixture,
};
use quarry_test_utils::{FixturePage, FixtureSite, ScriptedDriverFactory};
use std::sync::Arc;
use std::time::Duration;

const QUIZ_P1: &str = "https://www.quizpages.example/logical-reasoning/1";
const QUIZ_P2: &str = "https://www.quizpages.example/logical-reasoning/2";
const QUIZ_QUANT: &str = "https://www.quizpages.example/quantitative/1";
const ARTICLES: &str = "https://prepstream.example/interview-questions";

/// Fast-test variants of the seed sources: no behavioral delays worth
/// waiting for and a tiny risk cooldown.
fn test_sources() -> Vec<SourceConfig> {
    let mut sources = seed_sources();
    for source in &mut sources {
        source.stealth.min_delay_ms = 1;
        source.stealth.max_delay_ms = 3;
        source.stealth.cooldown_secs = 2;
        source.rate_limit = quarry_protocol::types::RateLimitParams::TokenWindow {
            permits: 1_000,
            window_ms: 60_000,
        };
    }
    sources
}

struct Harness {
    engine: Arc<Engine>,
    factory: Arc<ScriptedDriverFactory>,
    bus: Arc<EventBus>,
}

async fn harness(site: Arc<FixtureSite>) -> Harness {
    let bus = Arc::new(EventBus::new(4_096));
    let metrics = Arc::new(MetricsRegistry::default());
    let factory = ScriptedDriverFactory::new(site);
    let db = QuarryDb::connect_memory().await.unwrap();
    let settings = EngineSettings {
        ai_batch_size: 4,
        grace_window_secs: 2,
        ..EngineSettings::default()
    };
    let engine = Engine::start(
        settings,
        test_sources(),
        db,
        LocalAi::capabilities(),
        factory.clone(),
        bus.clone(),
        metrics,
    )
    .await
    .unwrap();
    Harness {
        engine,
        factory,
        bus,
    }
}


async fn create_job(harness: &Harness, sources: Vec<&str>, max: u64, categories: Vec<&str>) -> JobId {
    harness
        .engine
        .create_job(&CreateJobRequest {
            job_name: "it".to_string(),
            source_names: sources.into_iter().map(String::from).collect(),
            max_questions_per_source: max,
            target_categories: categories.into_iter().map(String::from).collect(),
            priority_level: Priority::Medium,
        })
        .await
        .unwrap()
}

async fn wait_terminal(harness: &Harness, job_id: JobId) -> JobState {
    for _ in 0..4_000 {
        let record = harness.engine.job_detail(job_id).await.unwrap();
        if record.run.state.is_terminal() {
            return record.run.state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never reached a terminal state");
}

async fn collect_event_kinds(harness: &Harness) -> Vec<EventKind> {
    harness
        .bus
        .history_since(0)
        .into_iter()
        .map(|e| e.kind)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn static_source_happy_path_completes_within_quota() {
    let site = FixtureSite::new();
    let bank = sample_question_bank();
    let page1 = quiz_page_from_bank(&bank[..6], Some("/logical-reasoning/2"));
    let page2 = quiz_page_from_bank(&bank[6..12], None);
    site.put(QUIZ_P1, FixturePage::ok(page1));
    site.put(QUIZ_P2, FixturePage::ok(page2));

    let harness = harness(site).await;
    let job_id = create_job(&harness, vec!["QuizPages"], 10, vec!["logical"]).await;
    harness.engine.start_job(job_id).await.unwrap();

    assert_eq!(wait_terminal(&harness, job_id).await, JobState::Completed);

    let record = harness.engine.job_detail(job_id).await.unwrap();
    let progress = record.run.progress;
    assert!(progress.quota_consumed() <= 10, "quota: {progress:?}");
    assert!(progress.extracted >= 1);
    assert!(progress.approved <= progress.validated);
    assert!(progress.validated <= progress.attempted);

    let kinds = collect_event_kinds(&harness).await;
    assert!(!kinds.contains(&EventKind::SchemaDrift), "unexpected drift");
    assert!(kinds.contains(&EventKind::QuestionExtracted));
    assert!(kinds.contains(&EventKind::JobStateChanged));
}

#[tokio::test(start_paused = true)]
async fn quota_holds_across_both_targets_of_a_source() {
    let site = FixtureSite::new();
    let bank = sample_question_bank();
    site.put(
        QUIZ_P1,
        FixturePage::ok(quiz_page_from_bank(&bank[..6], None)),
    );
    site.put(
        QUIZ_QUANT,
        FixturePage::ok(quiz_page_from_bank(&bank[6..12], None)),
    );

    let harness = harness(site).await;
    let job_id = create_job(&harness, vec!["quizpages"], 4, vec![]).await;
    harness.engine.start_job(job_id).await.unwrap();
    assert_eq!(wait_terminal(&harness, job_id).await, JobState::Completed);

    let record = harness.engine.job_detail(job_id).await.unwrap();
    let progress = record.run.progress;
    assert!(
        progress.quota_consumed() <= 4,
        "quota exceeded: {progress:?}"
    );
    assert!(progress.extracted <= 4);
}

#[tokio::test(start_paused = true)]
async fn source_lookup_is_case_insensitive() {
    let site = FixtureSite::new();
    let harness = harness(site).await;

    for casing in ["quizpages", "QUIZPAGES", "QuIzPaGeS"] {
        let result = harness
            .engine
            .create_job(&CreateJobRequest {
                job_name: format!("case-{casing}"),
                source_names: vec![casing.to_string()],
                max_questions_per_source: 5,
                target_categories: vec![],
                priority_level: Priority::Low,
            })
            .await;
        assert!(result.is_ok(), "casing {casing} rejected");
    }

    let unknown = harness
        .engine
        .create_job(&CreateJobRequest {
            job_name: "nope".to_string(),
            source_names: vec!["no-such-source".to_string()],
            max_questions_per_source: 5,
            target_categories: vec![],
            priority_level: Priority::Low,
        })
        .await;
    assert!(matches!(unknown, Err(EngineError::UnknownSource(_))));
}

#[tokio::test(start_paused = true)]
async fn infinite_scroll_bounds_scroll_invocations() {
    let site = FixtureSite::new();
    let cards_a = article_page(&[ArticleFixture {
        title: "What is the output of an integer division by zero check in this snippet?",
        options: &["compile error", "runtime panic", "zero", "undefined"],
        answer: "B",
        explanation: Some("Dividing by zero panics at runtime."),
        code: Some("let x = 10 / divisor;"),
    }]);
    let cards_b = article_page(&[
        ArticleFixture {
            title: "What is the output of an integer division by zero check in this snippet?",
            options: &["compile error", "runtime panic", "zero", "undefined"],
            answer: "B",
            explanation: Some("Dividing by zero panics at runtime."),
            code: Some("let x = 10 / divisor;"),
        },
        ArticleFixture {
            title: "Which data structure gives amortized constant time push and pop at one end?",
            options: &["linked list", "vector", "binary heap", "b-tree"],
            answer: "B",
            explanation: Some("A growable array amortizes reallocation."),
            code: None,
        },
    ]);
    site.put(ARTICLES, FixturePage::ok(cards_a.clone()));
    site.set_scroll_frames(vec![cards_a, cards_b.clone(), cards_b]);

    let harness = harness(site).await;
    let job_id = create_job(&harness, vec!["PrepStream"], 10, vec![]).await;
    harness.engine.start_job(job_id).await.unwrap();
    assert_eq!(wait_terminal(&harness, job_id).await, JobState::Completed);

    let scrolls = harness
        .factory
        .counters
        .scroll_calls
        .load(std::sync::atomic::Ordering::SeqCst);
    assert!(scrolls <= 5, "scroll invocations: {scrolls}");

    let record = harness.engine.job_detail(job_id).await.unwrap();
    assert!(record.run.progress.extracted >= 1);
    let kinds = collect_event_kinds(&harness).await;
    assert!(!kinds.contains(&EventKind::DriverError));
}

#[tokio::test(start_paused = true)]
async fn transient_bot_wall_pauses_then_recovers() {
    let site = FixtureSite::new();
    let bank = sample_question_bank();
    let clean = quiz_page_from_bank(&bank[..4], None);
    site.put_sequence(
        QUIZ_P1,
        vec![
            FixturePage::with_status(429, challenge_page()),
            FixturePage::ok(clean),
        ],
    );

    let harness = harness(site).await;
    let job_id = create_job(&harness, vec!["quizpages"], 10, vec!["logical"]).await;
    harness.engine.start_job(job_id).await.unwrap();
    assert_eq!(wait_terminal(&harness, job_id).await, JobState::Completed);

    let kinds = collect_event_kinds(&harness).await;
    assert!(kinds.contains(&EventKind::RateLimited), "no rate_limited event");

    let record = harness.engine.job_detail(job_id).await.unwrap();
    assert!(record.run.progress.extracted >= 1, "recovered extraction");
}

#[tokio::test(start_paused = true)]
async fn schema_drift_fails_the_target() {
    let site = FixtureSite::new();
    site.put(QUIZ_P1, FixturePage::ok(drifted_page()));

    let harness = harness(site).await;
    let job_id = create_job(&harness, vec!["quizpages"], 10, vec!["logical"]).await;
    harness.engine.start_job(job_id).await.unwrap();

    let terminal = wait_terminal(&harness, job_id).await;
    assert_eq!(terminal, JobState::Failed);

    let kinds = collect_event_kinds(&harness).await;
    assert!(kinds.contains(&EventKind::SchemaDrift));
}

#[tokio::test(start_paused = true)]
async fn pause_rejects_bad_states_and_resume_finishes_the_job() {
    let site = FixtureSite::new();
    let bank = sample_question_bank();
    site.put(
        QUIZ_P1,
        FixturePage::ok(quiz_page_from_bank(&bank[..5], None)),
    );

    let harness = harness(site).await;
    let job_id = create_job(&harness, vec!["quizpages"], 10, vec!["logical"]).await;

    // Pause from queued is invalid.
    assert!(matches!(
        harness.engine.pause_job(job_id).await,
        Err(EngineError::InvalidTransition { .. })
    ));

    harness.engine.start_job(job_id).await.unwrap();
    // Pause may race completion; both outcomes are legal, but an accepted
    // pause must leave the job resumable.
    match harness.engine.pause_job(job_id).await {
        Ok(state) => {
            assert_eq!(state, JobState::Paused);
            harness.engine.start_job(job_id).await.unwrap();
        }
        Err(EngineError::InvalidTransition { .. }) => {}
        Err(other) => panic!("unexpected pause error: {other}"),
    }

    assert_eq!(wait_terminal(&harness, job_id).await, JobState::Completed);
    let record = harness.engine.job_detail(job_id).await.unwrap();
    assert!(record.run.progress.extracted >= 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_reaches_terminal_within_grace_and_is_sticky() {
    let site = FixtureSite::new();
    let bank = sample_question_bank();
    site.put(
        QUIZ_P1,
        FixturePage::ok(quiz_page_from_bank(&bank[..5], None)),
    );

    let harness = harness(site).await;
    let job_id = create_job(&harness, vec!["quizpages"], 10, vec!["logical"]).await;
    harness.engine.start_job(job_id).await.unwrap();

    match harness.engine.cancel_job(job_id).await {
        Ok(state) => assert_eq!(state, JobState::Cancelled),
        // The tiny fixture may already have completed.
        Err(EngineError::InvalidTransition { .. }) => return,
        Err(other) => panic!("unexpected cancel error: {other}"),
    }

    let record = harness.engine.job_detail(job_id).await.unwrap();
    assert_eq!(record.run.state, JobState::Cancelled);

    // Terminal states never come back.
    assert!(matches!(
        harness.engine.start_job(job_id).await,
        Err(EngineError::InvalidTransition { .. })
    ));
    assert!(matches!(
        harness.engine.cancel_job(job_id).await,
        Err(EngineError::InvalidTransition { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn cross_source_duplicate_lands_in_one_cluster() {
    let site = FixtureSite::new();
    // The same question, served by both sources.
    let shared_text =
        "A train covers 60 km in 45 minutes. What is its average speed in km per hour?";
    site.put(
        QUIZ_P1,
        FixturePage::ok(quiz_page(
            &[QuizFixture {
                text: shared_text,
                options: &["70", "75", "80", "90"],
                answer: "C",
                explanation: Some("Speed equals 60 divided by 0.75 hours."),
            }],
            None,
        )),
    );
    site.put(
        ARTICLES,
        FixturePage::ok(article_page(&[ArticleFixture {
            title: shared_text,
            options: &["70", "75", "80", "90"],
            answer: "C",
            explanation: Some("Speed equals 60 divided by 0.75 hours."),
            code: None,
        }])),
    );

    let harness = harness(site).await;
    let job_id = create_job(&harness, vec!["quizpages", "prepstream"], 10, vec![]).await;
    harness.engine.start_job(job_id).await.unwrap();
    assert_eq!(wait_terminal(&harness, job_id).await, JobState::Completed);

    let record = harness.engine.job_detail(job_id).await.unwrap();
    assert!(
        record.run.progress.duplicates >= 1,
        "progress: {:?}",
        record.run.progress
    );
    let cross = harness.engine.db().cross_source_cluster_count().await.unwrap();
    assert!(cross >= 1, "no cross-source cluster persisted");

    let kinds = collect_event_kinds(&harness).await;
    assert!(kinds.contains(&EventKind::DuplicateFound));
}

#[tokio::test(start_paused = true)]
async fn replaying_the_same_spec_adds_nothing() {
    let site = FixtureSite::new();
    let bank = sample_question_bank();
    site.put(
        QUIZ_P1,
        FixturePage::ok(quiz_page_from_bank(&bank[..5], None)),
    );

    let harness = harness(site).await;
    let first = create_job(&harness, vec!["quizpages"], 10, vec!["logical"]).await;
    harness.engine.start_job(first).await.unwrap();
    assert_eq!(wait_terminal(&harness, first).await, JobState::Completed);

    let counts_before = harness.engine.db().count_by_verdict().await.unwrap();

    let second = create_job(&harness, vec!["quizpages"], 10, vec!["logical"]).await;
    harness.engine.start_job(second).await.unwrap();
    assert_eq!(wait_terminal(&harness, second).await, JobState::Completed);

    let counts_after = harness.engine.db().count_by_verdict().await.unwrap();
    assert_eq!(counts_before, counts_after, "replay must be idempotent");

    let record = harness.engine.job_detail(second).await.unwrap();
    assert_eq!(record.run.progress.extracted, 0, "no re-extraction");
}

#[tokio::test(start_paused = true)]
async fn event_sequences_are_strictly_increasing_per_job() {
    let site = FixtureSite::new();
    let bank = sample_question_bank();
    site.put(
        QUIZ_P1,
        FixturePage::ok(quiz_page_from_bank(&bank[..5], None)),
    );

    let harness = harness(site).await;
    let mut subscription = harness.bus.subscribe();
    let job_id = create_job(&harness, vec!["quizpages"], 10, vec!["logical"]).await;
    harness.engine.start_job(job_id).await.unwrap();
    assert_eq!(wait_terminal(&harness, job_id).await, JobState::Completed);

    let mut last = 0u64;
    while let Ok(Some(message)) =
        tokio::time::timeout(Duration::from_millis(300), subscription.recv()).await
    {
        if let BusMessage::Event(event) = message {
            assert!(event.sequence > last, "sequence regressed");
            last = event.sequence;
        }
    }
    assert!(last > 0, "no events observed");
}
