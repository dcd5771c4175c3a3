//! Analytics handlers: fixed JSON shapes over storage and the metric
//! registry.

use crate::handlers::build_system_status;
use crate::problem::{request_id, ApiError};
use crate::ApiState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use quarry_monitor::metrics::names;
use quarry_protocol::defaults::METRIC_RETENTION_SECS;
use quarry_protocol::http_types::{
    ClusterSummary, CrossSourceDuplicates, GateBreakdown, PerformanceAnalytics, QualityAnalytics,
    SourceAnalytics, TrendDimension, TrendPoint, TrendQuery, TrendReport,
};
use quarry_protocol::types::GateVerdict;
use std::time::Duration;

fn storage_error(e: impl std::fmt::Display, rid: &str) -> ApiError {
    ApiError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "storage",
        e.to_string(),
        rid,
    )
}

pub async fn sources(State(state): State<ApiState>) -> Result<Json<serde_json::Value>, ApiError> {
    let rid = request_id();
    let (jobs, _) = state
        .engine
        .queue()
        .list(None, 0, 500)
        .await
        .map_err(|e| storage_error(e, &rid))?;

    let mut rows = Vec::new();
    for source in state.engine.sources_snapshot() {
        let counts = state
            .engine
            .db()
            .count_by_verdict_for_source(&source.source_id)
            .await
            .map_err(|e| storage_error(e, &rid))?;
        let get = |verdict: &str| {
            counts
                .iter()
                .find(|(v, _)| v == verdict)
                .map_or(0, |(_, n)| *n)
        };
        let duplicates = state
            .engine
            .db()
            .count_duplicates_for_source(&source.source_id)
            .await
            .map_err(|e| storage_error(e, &rid))?;
        rows.push(SourceAnalytics {
            source_id: source.source_id.clone(),
            jobs_total: jobs
                .iter()
                .filter(|j| j.spec.sources.contains(&source.source_id))
                .count() as u64,
            questions_approved: get("auto_approve"),
            questions_rejected: get("auto_reject"),
            duplicates,
            reliability: source.reliability,
        });
    }
    Ok(Json(serde_json::json!({
        "sources": rows,
        "request_id": rid,
    })))
}

pub async fn jobs(State(state): State<ApiState>) -> Result<Json<serde_json::Value>, ApiError> {
    let rid = request_id();
    let (queued, active, paused) = state
        .engine
        .queue()
        .status_counts()
        .await
        .map_err(|e| storage_error(e, &rid))?;
    let (_, total) = state
        .engine
        .queue()
        .list(None, 0, 1)
        .await
        .map_err(|e| storage_error(e, &rid))?;
    Ok(Json(serde_json::json!({
        "jobs_total": total,
        "queued": queued,
        "active": active,
        "paused": paused,
        "request_id": rid,
    })))
}

pub async fn performance(
    State(state): State<ApiState>,
) -> Result<Json<PerformanceAnalytics>, ApiError> {
    let rid = request_id();
    let metrics = state.engine.metrics();
    let window = Duration::from_secs(300);
    Ok(Json(PerformanceAnalytics {
        pages_per_minute: metrics.rate(names::PAGES_FETCHED_TOTAL, window) * 60.0,
        avg_page_latency_ms: metrics.avg(names::PAGE_EXTRACT_LATENCY_MS, window),
        avg_ai_batch_latency_ms: metrics.avg(names::AI_BATCH_LATENCY_MS, window),
        backpressure_engaged_total: metrics.counter(names::BACKPRESSURE_ENGAGED_TOTAL),
        embedding_cache_hit_rate: state.engine.embedding_cache_hit_rate().await,
        request_id: rid,
    }))
}

pub async fn quality(State(state): State<ApiState>) -> Result<Json<QualityAnalytics>, ApiError> {
    let rid = request_id();
    let db = state.engine.db();
    let average = db
        .average_fused_score()
        .await
        .map_err(|e| storage_error(e, &rid))?;
    let verdicts = db
        .count_by_verdict()
        .await
        .map_err(|e| storage_error(e, &rid))?;
    let by_category = db
        .count_by_category()
        .await
        .map_err(|e| storage_error(e, &rid))?;

    let breakdown = verdicts
        .into_iter()
        .filter_map(|(verdict, count)| {
            let verdict = match verdict.as_str() {
                "auto_approve" => GateVerdict::AutoApprove,
                "human_review" => GateVerdict::HumanReview,
                "auto_reject" => GateVerdict::AutoReject,
                _ => return None,
            };
            Some(GateBreakdown { verdict, count })
        })
        .collect();

    Ok(Json(QualityAnalytics {
        average_fused_score: average,
        gate_breakdown: breakdown,
        by_category: by_category.into_iter().collect(),
        request_id: rid,
    }))
}

pub async fn system_health(
    State(state): State<ApiState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rid = request_id();
    let status = build_system_status(&state, &rid).await?;
    // Projection of the same internal model the status endpoint serves.
    Ok(Json(serde_json::json!({
        "health": status.health,
        "subsystems": {
            "engine": { "active_jobs": status.active_jobs, "queue_depth": status.queue_depth },
            "monitoring": {
                "events_total": status.events_total,
                "alerts_firing": status.alerts_firing,
            },
            "sources": { "enabled": status.sources_enabled },
        },
        "request_id": rid,
    })))
}

pub async fn trends(
    State(state): State<ApiState>,
    Query(query): Query<TrendQuery>,
) -> Result<Json<TrendReport>, ApiError> {
    let rid = request_id();
    let window = Duration::from_secs(
        query
            .window
            .unwrap_or(METRIC_RETENTION_SECS)
            .min(METRIC_RETENTION_SECS),
    );
    let metric = match query.dimension {
        TrendDimension::Quality => names::FUSED_SCORE,
        TrendDimension::Performance => names::PAGE_EXTRACT_LATENCY_MS,
        TrendDimension::Volume => names::QUESTIONS_EXTRACTED_TOTAL,
        TrendDimension::Errors => names::ERRORS_TOTAL,
    };
    let points = state
        .engine
        .metrics()
        .series_points(metric, window)
        .into_iter()
        .map(|p| TrendPoint {
            timestamp: p.timestamp,
            value: p.value,
        })
        .collect();
    Ok(Json(TrendReport {
        dimension: query.dimension,
        points,
        request_id: rid,
    }))
}

pub async fn reports(State(state): State<ApiState>) -> Result<Json<serde_json::Value>, ApiError> {
    let rid = request_id();
    let db = state.engine.db();
    let cluster_count = db
        .cross_source_cluster_count()
        .await
        .map_err(|e| storage_error(e, &rid))?;
    let last_24h = db
        .cross_source_clusters_updated_since(Utc::now() - chrono::Duration::hours(24))
        .await
        .map_err(|e| storage_error(e, &rid))?;
    let top = db
        .top_clusters(20)
        .await
        .map_err(|e| storage_error(e, &rid))?;

    let duplicates = CrossSourceDuplicates {
        cluster_count,
        last_24h_delta: last_24h as i64,
        top_clusters: top
            .iter()
            .map(|c| ClusterSummary {
                cluster_id: c.cluster_id.clone(),
                size: c.members.len(),
                cross_source: c.cross_source,
                representative: c.representative,
            })
            .collect(),
    };
    let average = db
        .average_fused_score()
        .await
        .map_err(|e| storage_error(e, &rid))?;

    Ok(Json(serde_json::json!({
        "cross_source_duplicates": duplicates,
        "average_fused_score": average,
        "request_id": rid,
    })))
}

pub async fn real_time(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let rid = request_id();
    let snapshot = state.engine.metrics().snapshot();
    let firing = state.alerts.firing();
    Json(serde_json::json!({
        "metrics": snapshot,
        "alerts_firing": firing,
        "last_sequence": state.engine.bus().last_sequence(),
        "request_id": rid,
    }))
}
