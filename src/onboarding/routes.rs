//! REST endpoints for onboarding progress.
//!
//! The acting user is identified by the `x-actor-id` header. Session and
//! authentication mechanics live in front of this router.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::{GateFailure, OnboardingError};

use super::engine::{ClientVideoCache, NdaSubmission, OnboardingEngine};
use super::quiz::Answers;
use super::step::OnboardingStep;

/// Header carrying the authenticated actor id.
pub const ACTOR_HEADER: &str = "x-actor-id";

/// Shared state for onboarding routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub engine: Arc<OnboardingEngine>,
}

type ApiResult = Result<Response, Response>;

fn status_for(error: &OnboardingError) -> StatusCode {
    match error {
        OnboardingError::GateNotSatisfied {
            step: OnboardingStep::Nda,
            reason: GateFailure::NotScrolled,
        } => StatusCode::BAD_REQUEST,
        OnboardingError::GateNotSatisfied { .. } | OnboardingError::InvalidTransition { .. } => {
            StatusCode::FORBIDDEN
        }
        OnboardingError::AlreadySatisfied { .. }
        | OnboardingError::AttemptsExhausted { .. }
        | OnboardingError::Conflict { .. } => StatusCode::CONFLICT,
        OnboardingError::RecordNotFound { .. } | OnboardingError::UnknownDocument(_) => {
            StatusCode::NOT_FOUND
        }
        OnboardingError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        OnboardingError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        OnboardingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: OnboardingError) -> Response {
    let status = status_for(&error);
    if status.is_server_error() {
        tracing::error!(error = %error, "Onboarding request failed");
    }
    let mut body = serde_json::json!({
        "error": error.to_string(),
        "code": error.code(),
    });
    if let OnboardingError::GateNotSatisfied { reason, .. } = &error {
        if let Some(remaining) = reason.seconds_remaining() {
            body["seconds_remaining"] = remaining.into();
        }
    }
    (status, Json(body)).into_response()
}

fn ok<T: serde::Serialize>(value: T) -> Response {
    (StatusCode::OK, Json(value)).into_response()
}

fn actor(headers: &HeaderMap) -> Result<String, Response> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "error": format!("Missing {ACTOR_HEADER} header"),
                    "code": "unauthenticated",
                })),
            )
                .into_response()
        })
}

/// Employee-side operations act only on the caller's own record.
fn require_self(headers: &HeaderMap, employee_id: &str, operation: &str) -> Result<(), Response> {
    let actor = actor(headers)?;
    if actor == employee_id {
        Ok(())
    } else {
        Err(error_response(OnboardingError::Unauthorized {
            actor,
            operation: operation.to_string(),
        }))
    }
}

// ── Lifecycle and read model ────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[derive(Deserialize)]
struct InitializeRequest {
    employee_name: String,
}

async fn initialize(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<InitializeRequest>,
) -> ApiResult {
    let actor = actor(&headers)?;
    state
        .engine
        .initialize(&id, &body.employee_name, &actor)
        .await
        .map(ok)
        .map_err(error_response)
}

async fn get_overview(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult {
    let actor = actor(&headers)?;
    state
        .engine
        .authorize(&id, &actor, "view onboarding progress")
        .await
        .map_err(error_response)?;
    state.engine.overview(&id).await.map(ok).map_err(error_response)
}

async fn list_progress(State(state): State<OnboardingRouteState>, headers: HeaderMap) -> ApiResult {
    let actor = actor(&headers)?;
    state.engine.list_progress(&actor).await.map(ok).map_err(error_response)
}

async fn quiz_questions(State(state): State<OnboardingRouteState>) -> impl IntoResponse {
    Json(state.engine.quiz_questions().await)
}

// ── Navigation ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StepRequest {
    step: OnboardingStep,
}

async fn go_to_step(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<StepRequest>,
) -> ApiResult {
    require_self(&headers, &id, "navigate onboarding")?;
    state
        .engine
        .go_to_step(&id, body.step)
        .await
        .map(ok)
        .map_err(error_response)
}

async fn advance(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult {
    require_self(&headers, &id, "navigate onboarding")?;
    state.engine.advance(&id).await.map(ok).map_err(error_response)
}

// ── NDA and documents ───────────────────────────────────────────────

async fn sign_nda(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<NdaSubmission>,
) -> ApiResult {
    require_self(&headers, &id, "sign the NDA")?;
    state.engine.sign_nda(&id, body).await.map(ok).map_err(error_response)
}

async fn open_document(
    State(state): State<OnboardingRouteState>,
    Path((id, doc_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult {
    require_self(&headers, &id, "read documents")?;
    state
        .engine
        .open_document(&id, &doc_id)
        .await
        .map(ok)
        .map_err(error_response)
}

async fn document_scrolled(
    State(state): State<OnboardingRouteState>,
    Path((id, doc_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult {
    require_self(&headers, &id, "read documents")?;
    state
        .engine
        .mark_document_scrolled(&id, &doc_id)
        .await
        .map(ok)
        .map_err(error_response)
}

#[derive(Deserialize)]
struct ReadingTimeRequest {
    delta_seconds: i64,
}

async fn reading_time(
    State(state): State<OnboardingRouteState>,
    Path((id, doc_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<ReadingTimeRequest>,
) -> ApiResult {
    require_self(&headers, &id, "read documents")?;
    state
        .engine
        .record_reading_time(&id, &doc_id, body.delta_seconds)
        .await
        .map(ok)
        .map_err(error_response)
}

async fn confirm_document(
    State(state): State<OnboardingRouteState>,
    Path((id, doc_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult {
    require_self(&headers, &id, "confirm documents")?;
    state
        .engine
        .confirm_document(&id, &doc_id)
        .await
        .map(ok)
        .map_err(error_response)
}

// ── Video ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct VideoProgressRequest {
    position: f64,
    duration: f64,
}

async fn video_progress(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<VideoProgressRequest>,
) -> ApiResult {
    require_self(&headers, &id, "watch the training video")?;
    state
        .engine
        .report_video_progress(&id, body.position, body.duration)
        .await
        .map(ok)
        .map_err(error_response)
}

#[derive(Deserialize)]
struct SeekRequest {
    target: f64,
}

async fn video_seek(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SeekRequest>,
) -> ApiResult {
    require_self(&headers, &id, "watch the training video")?;
    state
        .engine
        .request_seek(&id, body.target)
        .await
        .map(ok)
        .map_err(error_response)
}

async fn video_ended(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult {
    require_self(&headers, &id, "watch the training video")?;
    state
        .engine
        .mark_video_ended(&id)
        .await
        .map(ok)
        .map_err(error_response)
}

#[derive(Deserialize)]
struct ResumeRequest {
    #[serde(default)]
    cache: Option<ClientVideoCache>,
}

async fn video_resume(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ResumeRequest>,
) -> ApiResult {
    require_self(&headers, &id, "watch the training video")?;
    state
        .engine
        .resume_position(&id, body.cache)
        .await
        .map(ok)
        .map_err(error_response)
}

// ── Quiz and notification ───────────────────────────────────────────

#[derive(Deserialize)]
struct QuizRequest {
    answers: Answers,
}

async fn submit_quiz(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<QuizRequest>,
) -> ApiResult {
    require_self(&headers, &id, "take the quiz")?;
    state
        .engine
        .submit_quiz(&id, body.answers)
        .await
        .map(ok)
        .map_err(error_response)
}

async fn acknowledge_notification(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult {
    require_self(&headers, &id, "acknowledge the notification")?;
    state
        .engine
        .acknowledge_notification(&id)
        .await
        .map(ok)
        .map_err(error_response)
}

// ── Handoff, completion, reset ──────────────────────────────────────

#[derive(Deserialize)]
struct MarkHandoffRequest {
    signature: String,
}

async fn mark_handoff(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<MarkHandoffRequest>,
) -> ApiResult {
    let actor = actor(&headers)?;
    state
        .engine
        .manager_mark_handoff(&id, &actor, &body.signature)
        .await
        .map(ok)
        .map_err(error_response)
}

async fn confirm_handoff(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult {
    let actor = actor(&headers)?;
    state
        .engine
        .employee_confirm_handoff(&id, &actor)
        .await
        .map(ok)
        .map_err(error_response)
}

async fn complete(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult {
    let actor = actor(&headers)?;
    state
        .engine
        .authorize(&id, &actor, "complete onboarding")
        .await
        .map_err(error_response)?;
    state
        .engine
        .complete_onboarding(&id, &actor)
        .await
        .map(ok)
        .map_err(error_response)
}

async fn reset(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult {
    let actor = actor(&headers)?;
    state.engine.reset(&id, &actor).await.map(ok).map_err(error_response)
}

/// Build the onboarding REST routes.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/onboarding", get(list_progress))
        .route("/onboarding/content/quiz", get(quiz_questions))
        .route("/onboarding/{id}", get(get_overview).post(initialize))
        .route("/onboarding/{id}/step", post(go_to_step))
        .route("/onboarding/{id}/advance", post(advance))
        .route("/onboarding/{id}/nda", post(sign_nda))
        .route("/onboarding/{id}/documents/{doc_id}/open", post(open_document))
        .route("/onboarding/{id}/documents/{doc_id}/scrolled", post(document_scrolled))
        .route("/onboarding/{id}/documents/{doc_id}/time", post(reading_time))
        .route("/onboarding/{id}/documents/{doc_id}/confirm", post(confirm_document))
        .route("/onboarding/{id}/video/progress", post(video_progress))
        .route("/onboarding/{id}/video/seek", post(video_seek))
        .route("/onboarding/{id}/video/ended", post(video_ended))
        .route("/onboarding/{id}/video/resume", post(video_resume))
        .route("/onboarding/{id}/quiz", post(submit_quiz))
        .route("/onboarding/{id}/notification", post(acknowledge_notification))
        .route("/onboarding/{id}/handoff/mark", post(mark_handoff))
        .route("/onboarding/{id}/handoff/confirm", post(confirm_handoff))
        .route("/onboarding/{id}/complete", post(complete))
        .route("/onboarding/{id}/reset", post(reset))
        .with_state(state)
}
