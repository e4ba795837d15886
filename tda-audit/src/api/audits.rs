//! Audit API handlers
//!
//! POST /audits, POST /audits/:id/segments/{a,b,c}, GET /audits/:id,
//! GET /audits/:id/candidates
//!
//! Segment handlers run the segment inline and answer once it reaches its
//! gate, completes, or hits its ceiling.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{CompetitorCandidate, KeywordCandidate};
use crate::services::audit_orchestrator::SegmentOutcome;
use crate::services::audit_pipeline::{AuditReport, OpenGate, StartAuditRequest, StartedAudit};
use crate::AppState;

/// POST /audits/:id/segments/b request
#[derive(Debug, Deserialize)]
pub struct ResumeKeywordsRequest {
    pub keywords: Vec<KeywordCandidate>,
}

/// POST /audits/:id/segments/c request
#[derive(Debug, Deserialize)]
pub struct ResumeCompetitorsRequest {
    pub competitors: Vec<CompetitorCandidate>,
}

/// GET /audits/:id query
#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub logs: Option<u32>,
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Keep server-side failures visible on /health
async fn track<T>(state: &AppState, result: ApiResult<T>) -> ApiResult<T> {
    if let Err(e) = &result {
        if !e.is_client_error() {
            *state.last_error.write().await = Some(e.to_string());
        }
    }
    result
}

/// POST /audits
///
/// 201 with the audit id, 409 `DUPLICATE_AUDIT` when an active audit exists
/// for the destination and `force` is false.
pub async fn start_audit(
    State(state): State<AppState>,
    body: Result<Json<StartAuditRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<StartedAudit>)> {
    let request = parse_body(body)?;
    let started = track(&state, state.pipeline.start_audit(request).await).await?;

    tracing::info!(
        audit_id = %started.audit_id,
        destination_id = %started.destination_id,
        reset = started.reset,
        "Audit started"
    );
    Ok((StatusCode::CREATED, Json(started)))
}

/// POST /audits/:id/segments/a
pub async fn run_segment_a(
    State(state): State<AppState>,
    Path(audit_id): Path<Uuid>,
) -> ApiResult<Json<SegmentOutcome>> {
    let outcome = track(&state, state.pipeline.run_segment_a(audit_id).await).await?;
    Ok(Json(outcome))
}

/// POST /audits/:id/segments/b
///
/// 409 if bloc 4 is not awaiting validation, 400 when nothing is kept.
pub async fn resume_segment_b(
    State(state): State<AppState>,
    Path(audit_id): Path<Uuid>,
    body: Result<Json<ResumeKeywordsRequest>, JsonRejection>,
) -> ApiResult<Json<SegmentOutcome>> {
    let request = parse_body(body)?;
    let outcome = track(
        &state,
        state.pipeline.resume_segment_b(audit_id, request.keywords).await,
    )
    .await?;
    Ok(Json(outcome))
}

/// POST /audits/:id/segments/c
pub async fn resume_segment_c(
    State(state): State<AppState>,
    Path(audit_id): Path<Uuid>,
    body: Result<Json<ResumeCompetitorsRequest>, JsonRejection>,
) -> ApiResult<Json<SegmentOutcome>> {
    let request = parse_body(body)?;
    let outcome = track(
        &state,
        state
            .pipeline
            .resume_segment_c(audit_id, request.competitors)
            .await,
    )
    .await?;
    Ok(Json(outcome))
}

/// GET /audits/:id?logs=N
pub async fn get_audit(
    State(state): State<AppState>,
    Path(audit_id): Path<Uuid>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<AuditReport>> {
    let report = state.pipeline.status(audit_id, query.logs).await?;
    Ok(Json(report))
}

/// GET /audits/:id/candidates
pub async fn get_candidates(
    State(state): State<AppState>,
    Path(audit_id): Path<Uuid>,
) -> ApiResult<Json<OpenGate>> {
    let gate = state.pipeline.candidates(audit_id).await?;
    Ok(Json(gate))
}

/// Build audit routes
pub fn audit_routes() -> Router<AppState> {
    Router::new()
        .route("/audits", post(start_audit))
        .route("/audits/:id", get(get_audit))
        .route("/audits/:id/candidates", get(get_candidates))
        .route("/audits/:id/segments/a", post(run_segment_a))
        .route("/audits/:id/segments/b", post(resume_segment_b))
        .route("/audits/:id/segments/c", post(resume_segment_c))
}
