//! REST and WebSocket surface.
//!
//! Thin by design: parameter validation, mapping onto the engine API,
//! serialization. Every response carries a `request_id`; errors use the
//! problem-details shape.

pub mod analytics;
pub mod handlers;
pub mod problem;
pub mod ws;

use axum::routing::{delete, get, post, put};
use axum::Router;
use quarry_engine::Engine;
use quarry_monitor::AlertEngine;
use std::sync::Arc;

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Engine>,
    pub alerts: Arc<AlertEngine>,
}

/// Build the full router under `/api`.
pub fn router(state: ApiState) -> Router {
    let api = Router::new()
        .route("/scraping/jobs", post(handlers::create_job))
        .route("/scraping/jobs", get(handlers::list_jobs))
        .route("/scraping/jobs/:job_id", get(handlers::job_detail))
        .route("/scraping/jobs/:job_id", delete(handlers::delete_job))
        .route("/scraping/jobs/:job_id/start", put(handlers::start_job))
        .route("/scraping/jobs/:job_id/stop", put(handlers::stop_job))
        .route("/scraping/jobs/:job_id/pause", put(handlers::pause_job))
        .route("/scraping/sources", get(handlers::list_sources))
        .route("/scraping/sources/:source_id", get(handlers::source_detail))
        .route("/scraping/queue-status", get(handlers::queue_status))
        .route("/scraping/system-status", get(handlers::system_status))
        .route("/scraping/health", get(handlers::health))
        .route("/scraping/analytics/sources", get(analytics::sources))
        .route("/scraping/analytics/jobs", get(analytics::jobs))
        .route("/scraping/analytics/performance", get(analytics::performance))
        .route("/scraping/analytics/quality", get(analytics::quality))
        .route(
            "/scraping/analytics/system-health",
            get(analytics::system_health),
        )
        .route("/scraping/analytics/trends", get(analytics::trends))
        .route("/scraping/analytics/reports", get(analytics::reports))
        .route(
            "/scraping/analytics/monitoring/real-time",
            get(analytics::real_time),
        )
        .route("/monitoring/stream", get(ws::stream))
        .with_state(state);

    Router::new().nest("/api", api)
}
