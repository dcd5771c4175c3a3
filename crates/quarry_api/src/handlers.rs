//! Job and source management handlers.

use crate::problem::{request_id, ApiError};
use crate::ApiState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use quarry_engine::JobRecord;
use quarry_protocol::http_types::{
    CreateJobRequest, CreateJobResponse, HealthReport, JobDetail, JobListQuery, JobListResponse,
    JobSummary, QueueStatus, SourceCatalogResponse, SourceSummary, SystemStatus,
    TransitionResponse,
};
use quarry_protocol::types::{JobId, JobState};
use std::str::FromStr;

fn parse_job_id(raw: &str, rid: &str) -> Result<JobId, ApiError> {
    JobId::from_str(raw)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, "validation", e.to_string(), rid))
}

fn summary(record: &JobRecord) -> JobSummary {
    JobSummary {
        job_id: record.spec.job_id,
        job_name: record.spec.job_name.clone(),
        state: record.run.state,
        priority: record.spec.priority,
        sources: record.spec.sources.clone(),
        created_at: record.spec.created_at,
    }
}

pub async fn create_job(
    State(state): State<ApiState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreateJobResponse>), ApiError> {
    let rid = request_id();
    let job_id = state
        .engine
        .create_job(&request)
        .await
        .map_err(|e| ApiError::from_engine(e, &rid))?;
    Ok((
        StatusCode::CREATED,
        Json(CreateJobResponse {
            job_id,
            state: JobState::Queued,
            request_id: rid,
        }),
    ))
}

pub async fn list_jobs(
    State(state): State<ApiState>,
    Query(query): Query<JobListQuery>,
) -> Result<Json<JobListResponse>, ApiError> {
    let rid = request_id();
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(50).min(500);
    let (records, total) = state
        .engine
        .queue()
        .list(query.state, offset, limit)
        .await
        .map_err(|e| {
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage",
                e.to_string(),
                &rid,
            )
        })?;

    let jobs = records
        .iter()
        .filter(|r| {
            query.source.as_deref().map_or(true, |source| {
                let wanted = quarry_protocol::types::SourceId::new(source);
                r.spec.sources.contains(&wanted)
            })
        })
        .map(summary)
        .collect();
    Ok(Json(JobListResponse {
        jobs,
        total,
        offset,
        limit,
        request_id: rid,
    }))
}

pub async fn job_detail(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobDetail>, ApiError> {
    let rid = request_id();
    let job_id = parse_job_id(&job_id, &rid)?;
    let record = state
        .engine
        .job_detail(job_id)
        .await
        .map_err(|e| ApiError::from_engine(e, &rid))?;
    Ok(Json(JobDetail {
        job_id: record.spec.job_id,
        job_name: record.spec.job_name,
        state: record.run.state,
        priority: record.spec.priority,
        sources: record.spec.sources,
        max_questions_per_source: record.spec.max_questions_per_source,
        target_categories: record.spec.target_categories,
        progress: record.run.progress,
        targets: record.run.targets,
        created_at: record.spec.created_at,
        started_at: record.run.started_at,
        finished_at: record.run.finished_at,
        last_error: record.run.last_error,
        request_id: rid,
    }))
}

pub async fn start_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let rid = request_id();
    let job_id = parse_job_id(&job_id, &rid)?;
    let new_state = state
        .engine
        .start_job(job_id)
        .await
        .map_err(|e| ApiError::from_engine(e, &rid))?;
    Ok(Json(TransitionResponse {
        job_id,
        state: new_state,
        request_id: rid,
    }))
}

pub async fn stop_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let rid = request_id();
    let job_id = parse_job_id(&job_id, &rid)?;
    let new_state = state
        .engine
        .cancel_job(job_id)
        .await
        .map_err(|e| ApiError::from_engine(e, &rid))?;
    Ok(Json(TransitionResponse {
        job_id,
        state: new_state,
        request_id: rid,
    }))
}

pub async fn pause_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let rid = request_id();
    let job_id = parse_job_id(&job_id, &rid)?;
    let new_state = state
        .engine
        .pause_job(job_id)
        .await
        .map_err(|e| ApiError::from_engine(e, &rid))?;
    Ok(Json(TransitionResponse {
        job_id,
        state: new_state,
        request_id: rid,
    }))
}

pub async fn delete_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let rid = request_id();
    let job_id = parse_job_id(&job_id, &rid)?;
    state
        .engine
        .delete_job(job_id)
        .await
        .map_err(|e| ApiError::from_engine(e, &rid))?;
    let record = state
        .engine
        .queue()
        .load(job_id)
        .await
        .ok()
        .flatten();
    Ok(Json(TransitionResponse {
        job_id,
        state: record.map_or(JobState::Cancelled, |r| r.run.state),
        request_id: rid,
    }))
}

pub async fn list_sources(
    State(state): State<ApiState>,
) -> Result<Json<SourceCatalogResponse>, ApiError> {
    let rid = request_id();
    let sources = state
        .engine
        .sources_snapshot()
        .iter()
        .map(|s| SourceSummary {
            source_id: s.source_id.clone(),
            display_name: s.display_name.clone(),
            method: s.method.as_str().to_string(),
            enabled: s.enabled,
            reliability: s.reliability,
            target_count: s.targets.len(),
        })
        .collect();
    Ok(Json(SourceCatalogResponse {
        sources,
        request_id: rid,
    }))
}

pub async fn source_detail(
    State(state): State<ApiState>,
    Path(source_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rid = request_id();
    let source = state.engine.source(&source_id).ok_or_else(|| {
        ApiError::new(
            StatusCode::NOT_FOUND,
            "unknown_source",
            format!("unknown source: {source_id}"),
            &rid,
        )
    })?;
    let mut value = serde_json::to_value(source.as_ref()).unwrap_or_default();
    if let Some(object) = value.as_object_mut() {
        object.insert("request_id".to_string(), serde_json::json!(rid));
    }
    Ok(Json(value))
}

pub async fn queue_status(State(state): State<ApiState>) -> Result<Json<QueueStatus>, ApiError> {
    let rid = request_id();
    let (queued, active, paused) = state.engine.queue().status_counts().await.map_err(|e| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage",
            e.to_string(),
            &rid,
        )
    })?;
    Ok(Json(QueueStatus {
        queued,
        active,
        paused,
        request_id: rid,
    }))
}

pub(crate) async fn build_health(state: &ApiState, rid: &str) -> HealthReport {
    let storage_ok = state.engine.queue().status_counts().await.is_ok();
    HealthReport {
        status: if storage_ok { "ok" } else { "degraded" }.to_string(),
        uptime_secs: state.engine.uptime().as_secs(),
        storage_ok,
        ai_ready: true,
        request_id: rid.to_string(),
    }
}

pub(crate) async fn build_system_status(
    state: &ApiState,
    rid: &str,
) -> Result<SystemStatus, ApiError> {
    let (queued, active, _paused) = state.engine.queue().status_counts().await.map_err(|e| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage",
            e.to_string(),
            rid,
        )
    })?;
    Ok(SystemStatus {
        health: build_health(state, rid).await,
        active_jobs: active,
        queue_depth: queued,
        events_total: state.engine.bus().published_total(),
        alerts_firing: state.alerts.firing().len() as u64,
        sources_enabled: state
            .engine
            .sources_snapshot()
            .iter()
            .filter(|s| s.enabled)
            .count() as u64,
        request_id: rid.to_string(),
    })
}

pub async fn health(State(state): State<ApiState>) -> Json<HealthReport> {
    let rid = request_id();
    Json(build_health(&state, &rid).await)
}

pub async fn system_status(
    State(state): State<ApiState>,
) -> Result<Json<SystemStatus>, ApiError> {
    let rid = request_id();
    Ok(Json(build_system_status(&state, &rid).await?))
}
