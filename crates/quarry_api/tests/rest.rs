//! Router-level tests: request/response shapes, status codes, problem
//! details, case-insensitive lookups.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use quarry_ai::LocalAi;
use quarry_api::{router, ApiState};
use quarry_db::QuarryDb;
use quarry_engine::Engine;
use quarry_monitor::{AlertEngine, EventBus, MetricsRegistry};
use quarry_protocol::config::{seed_sources, EngineSettings};
use quarry_test_utils::fixtures::{quiz_page_from_bank, sample_question_bank};
use quarry_test_utils::{FixturePage, FixtureSite, ScriptedDriverFactory};
use std::sync::Arc;
use tower::util::ServiceExt;

async fn test_app() -> Router {
    let site = FixtureSite::new();
    let bank = sample_question_bank();
    site.put(
        "https://www.quizpages.example/logical-reasoning/1",
        FixturePage::ok(quiz_page_from_bank(&bank[..4], None)),
    );

    let bus = Arc::new(EventBus::new(1_024));
    let metrics = Arc::new(MetricsRegistry::default());
    let mut sources = seed_sources();
    for source in &mut sources {
        source.stealth.min_delay_ms = 1;
        source.stealth.max_delay_ms = 2;
    }
    let engine = Engine::start(
        EngineSettings::default(),
        sources,
        QuarryDb::connect_memory().await.unwrap(),
        LocalAi::capabilities(),
        ScriptedDriverFactory::new(site),
        bus.clone(),
        metrics.clone(),
    )
    .await
    .unwrap();
    let alerts = Arc::new(AlertEngine::new(Vec::new(), metrics, bus));
    router(ApiState { engine, alerts })
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn put(uri: &str) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn create_job_accepts_any_source_casing() {
    let app = test_app().await;
    for casing in ["quizpages", "QuizPages", "QUIZPAGES"] {
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/scraping/jobs",
                serde_json::json!({
                    "job_name": format!("case-{casing}"),
                    "source_names": [casing],
                    "max_questions_per_source": 5,
                    "target_categories": ["logical"],
                    "priority_level": "medium",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED, "casing {casing}");
        let body = body_json(response).await;
        assert!(body["request_id"].as_str().is_some());
        assert_eq!(body["state"], "queued");
    }
}

#[tokio::test]
async fn unknown_source_yields_problem_details() {
    let app = test_app().await;
    let response = app
        .oneshot(post_json(
            "/api/scraping/jobs",
            serde_json::json!({
                "job_name": "bad",
                "source_names": ["who-dis"],
                "max_questions_per_source": 5,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["code"], "unknown_source");
    assert!(body["message"].as_str().unwrap().contains("who-dis"));
    assert!(body["request_id"].as_str().is_some());
}

#[tokio::test]
async fn invalid_transition_is_a_409() {
    let app = test_app().await;
    let created = app
        .clone()
        .oneshot(post_json(
            "/api/scraping/jobs",
            serde_json::json!({
                "job_name": "t",
                "source_names": ["quizpages"],
                "max_questions_per_source": 5,
            }),
        ))
        .await
        .unwrap();
    let job_id = body_json(created).await["job_id"].as_u64().unwrap();

    // Pause from queued is not a legal edge.
    let response = app
        .oneshot(put(&format!("/api/scraping/jobs/{job_id}/pause")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["code"], "invalid_transition");
}

#[tokio::test]
async fn job_detail_includes_progress_counters() {
    let app = test_app().await;
    let created = app
        .clone()
        .oneshot(post_json(
            "/api/scraping/jobs",
            serde_json::json!({
                "job_name": "detail",
                "source_names": ["quizpages"],
                "max_questions_per_source": 5,
            }),
        ))
        .await
        .unwrap();
    let job_id = body_json(created).await["job_id"].as_u64().unwrap();

    let response = app
        .oneshot(get(&format!("/api/scraping/jobs/{job_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["state"], "queued");
    assert_eq!(body["progress"]["attempted"], 0);
    assert_eq!(body["max_questions_per_source"], 5);
}

#[tokio::test]
async fn missing_job_is_a_404() {
    let app = test_app().await;
    let response = app.oneshot(get("/api/scraping/jobs/9999")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn source_catalog_and_detail() {
    let app = test_app().await;
    let response = app.clone().oneshot(get("/api/scraping/sources")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["sources"].as_array().unwrap().len(), 2);

    let detail = app
        .clone()
        .oneshot(get("/api/scraping/sources/QUIZPAGES"))
        .await
        .unwrap();
    assert_eq!(detail.status(), StatusCode::OK);
    let body = body_json(detail).await;
    assert_eq!(body["source_id"], "quizpages");

    let missing = app
        .oneshot(get("/api/scraping/sources/nope"))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_endpoints_have_stable_shapes() {
    let app = test_app().await;

    let queue = body_json(
        app.clone()
            .oneshot(get("/api/scraping/queue-status"))
            .await
            .unwrap(),
    )
    .await;
    assert!(queue["queued"].is_u64());
    assert!(queue["active"].is_u64());
    assert!(queue["paused"].is_u64());

    let health = body_json(
        app.clone()
            .oneshot(get("/api/scraping/health"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["storage_ok"], true);

    let status = body_json(
        app.clone()
            .oneshot(get("/api/scraping/system-status"))
            .await
            .unwrap(),
    )
    .await;
    assert!(status["health"]["storage_ok"].as_bool().unwrap());
    assert!(status["sources_enabled"].as_u64().unwrap() >= 2);

    let system_health = body_json(
        app.oneshot(get("/api/scraping/analytics/system-health"))
            .await
            .unwrap(),
    )
    .await;
    // Both health surfaces project the same model.
    assert_eq!(system_health["health"]["storage_ok"], true);
}

#[tokio::test]
async fn analytics_shapes_are_fixed() {
    let app = test_app().await;

    let quality = body_json(
        app.clone()
            .oneshot(get("/api/scraping/analytics/quality"))
            .await
            .unwrap(),
    )
    .await;
    assert!(quality["average_fused_score"].is_number());
    assert!(quality["gate_breakdown"].is_array());

    let performance = body_json(
        app.clone()
            .oneshot(get("/api/scraping/analytics/performance"))
            .await
            .unwrap(),
    )
    .await;
    assert!(performance["pages_per_minute"].is_number());

    let trends = body_json(
        app.clone()
            .oneshot(get("/api/scraping/analytics/trends?dimension=errors&window=600"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(trends["dimension"], "errors");
    assert!(trends["points"].is_array());

    let reports = body_json(
        app.clone()
            .oneshot(get("/api/scraping/analytics/reports"))
            .await
            .unwrap(),
    )
    .await;
    assert!(reports["cross_source_duplicates"]["cluster_count"].is_u64());

    let real_time = body_json(
        app.oneshot(get("/api/scraping/analytics/monitoring/real-time"))
            .await
            .unwrap(),
    )
    .await;
    assert!(real_time["metrics"].is_array());
    assert!(real_time["alerts_firing"].is_array());
}
