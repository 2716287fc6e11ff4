//! HTTP request handlers.

use super::AppState;
use crate::poller::PollError;
use crate::store::ValidationError;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::{Stream, StreamExt};

// ============================================================================
// Errors
// ============================================================================

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps handler failures to a status code and a JSON `{ "error": ... }` body.
pub enum ApiError {
    Validation(ValidationError),
    Poll(PollError),
    NotFound(String),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

impl From<PollError> for ApiError {
    fn from(err: PollError) -> Self {
        Self::Poll(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Validation(err @ ValidationError::DuplicateName(_)) => (StatusCode::CONFLICT, err.to_string()),
            Self::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            Self::Poll(err @ PollError::UnknownTarget(_)) => (StatusCode::NOT_FOUND, err.to_string()),
            Self::Poll(err @ PollError::Probe(_)) => (StatusCode::BAD_GATEWAY, err.to_string()),
            Self::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not found", what)),
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

pub async fn handle_health() -> &'static str {
    "ok"
}

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.poller.snapshots())
}

#[derive(Debug, Deserialize)]
pub struct CreateTargetRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub endpoint: String,
}

pub async fn handle_create_target(
    State(state): State<AppState>,
    Json(req): Json<CreateTargetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let target = state.poller.add_target(&req.name, &req.endpoint)?;
    let snapshot = state
        .poller
        .snapshot(&target.name)
        .ok_or_else(|| ApiError::NotFound(format!("target {:?}", target.name)))?;

    Ok((StatusCode::CREATED, Json(snapshot)))
}

pub async fn handle_get_target(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .poller
        .snapshot(&name)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("target {:?}", name)))
}

pub async fn handle_delete_target(State(state): State<AppState>, Path(name): Path<String>) -> StatusCode {
    state.poller.remove_target(&name);
    StatusCode::NO_CONTENT
}

pub async fn handle_poll_target(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let sample = state.poller.poll_one(&name).await?;
    Ok(Json(sample))
}

pub async fn handle_poll_all(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.poller.poll_all().await)
}

// ============================================================================
// API: Scheduler
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SchedulerResponse {
    pub state: crate::scheduler::SchedulerState,
    pub interval_ms: u64,
}

fn scheduler_response(state: &AppState) -> Json<SchedulerResponse> {
    Json(SchedulerResponse {
        state: state.scheduler.state(),
        interval_ms: u64::try_from(state.scheduler.interval().as_millis()).unwrap_or(u64::MAX),
    })
}

pub async fn handle_get_scheduler(State(state): State<AppState>) -> impl IntoResponse {
    scheduler_response(&state)
}

pub async fn handle_pause(State(state): State<AppState>) -> impl IntoResponse {
    state.scheduler.pause().await;
    scheduler_response(&state)
}

pub async fn handle_resume(State(state): State<AppState>) -> impl IntoResponse {
    state.scheduler.resume().await;
    scheduler_response(&state)
}

pub async fn handle_toggle(State(state): State<AppState>) -> impl IntoResponse {
    state.scheduler.toggle().await;
    scheduler_response(&state)
}

// ============================================================================
// API: Fleet
// ============================================================================

pub async fn handle_get_fleet(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state
        .fleet
        .as_ref()
        .map(|fleet| Json(fleet.snapshot()))
        .ok_or_else(|| ApiError::NotFound("bulk status endpoint".to_string()))
}

// ============================================================================
// API: Events
// ============================================================================

/// `GET /api/events`: SSE stream of poll notifications.
pub async fn handle_events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = BroadcastStream::new(state.poller.subscribe()).filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(Event::default().data(json))),
            Err(e) => {
                tracing::warn!("Failed to serialize poll event: {}", e);
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(n)) => {
            tracing::warn!("Event subscriber lagged, {} events dropped", n);
            None
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
