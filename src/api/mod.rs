// Consumer HTTP and WebSocket surface over one sync session

pub mod websocket;

pub use websocket::ws_handler;

use crate::channel::ChannelError;
use crate::error::SyncError;
use crate::poll::{AppLifecycle, LifecycleAction};
use crate::prediction::ScheduleInput;
use crate::reading::normalize_reading;
use crate::session::SyncSession;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct ApiState {
    pub session: Arc<SyncSession>,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Sync(SyncError),
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        ApiError::Sync(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Sync(SyncError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Sync(SyncError::Superseded { .. }) => StatusCode::CONFLICT,
            ApiError::Sync(SyncError::Transport(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Sync(SyncError::Channel(ChannelError::NotConnected { .. })) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Sync(SyncError::Channel(ChannelError::AlreadySubscribed { .. })) => {
                StatusCode::CONFLICT
            }
            ApiError::Sync(SyncError::Channel(ChannelError::Transport { .. })) => {
                StatusCode::BAD_GATEWAY
            }
        };
        let error = match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::Sync(e) => e.to_string(),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

#[derive(Deserialize)]
struct SubjectRequest {
    #[serde(rename = "subjectId")]
    subject_id: Option<String>,
}

#[derive(Deserialize, Default)]
struct StartPollRequest {
    #[serde(rename = "intervalMs")]
    interval_ms: Option<u64>,
}

#[derive(Deserialize)]
struct LifecycleRequest {
    state: AppLifecycle,
}

#[derive(Serialize)]
struct LifecycleResponse {
    action: LifecycleAction,
}

#[derive(Deserialize, Default)]
struct PredictRequest {
    /// Raw sensor payload; the current reading is used when absent
    reading: Option<Value>,
}

/// Create API router with session endpoints
pub fn create_router(session: Arc<SyncSession>) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/history", get(get_history))
        .route("/api/alerts", get(get_alerts).delete(clear_alerts))
        .route("/api/error", delete(clear_error))
        .route("/api/subject", put(set_subject))
        .route("/api/poll/start", post(start_poll))
        .route("/api/poll/stop", post(stop_poll))
        .route("/api/lifecycle", post(lifecycle))
        .route("/api/predict", post(predict))
        .route("/api/schedule", post(schedule))
        .route("/api/ws", get(ws_handler))
        .with_state(Arc::new(ApiState { session }))
}

/// GET /api/state
async fn get_state(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.session.snapshot())
}

/// GET /api/history - oldest first
async fn get_history(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.session.history_snapshot())
}

async fn get_alerts(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.session.active_alerts())
}

async fn clear_alerts(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let cleared = state.session.clear_alerts();
    Json(json!({ "cleared": cleared }))
}

async fn clear_error(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let cleared = state.session.clear_error();
    Json(json!({ "cleared": cleared }))
}

/// PUT /api/subject - rebind the session; `subjectId: null` unbinds
async fn set_subject(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SubjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!(subject_id = ?request.subject_id, "Binding subject");
    state.session.set_subject(request.subject_id).await?;
    Ok(Json(state.session.snapshot()))
}

/// POST /api/poll/start - optional `{"intervalMs": N}`
async fn start_poll(
    State(state): State<Arc<ApiState>>,
    request: Option<Json<StartPollRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    if state.session.subject_id().is_none() {
        return Err(ApiError::BadRequest("no subject bound".to_string()));
    }
    let started = match request.interval_ms {
        Some(0) => return Err(ApiError::BadRequest("intervalMs must be positive".to_string())),
        Some(ms) => state.session.start_polling_every(Duration::from_millis(ms)),
        None => state.session.start_polling(),
    };
    Ok(Json(json!({ "started": started })))
}

async fn stop_poll(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let stopped = state.session.stop_polling();
    Json(json!({ "stopped": stopped }))
}

/// POST /api/lifecycle - `{"state": "active" | "inactive" | "background"}`
async fn lifecycle(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<LifecycleRequest>,
) -> impl IntoResponse {
    let action = state.session.on_lifecycle_change(request.state);
    Json(LifecycleResponse { action })
}

/// POST /api/predict - on-demand prediction
async fn predict(
    State(state): State<Arc<ApiState>>,
    request: Option<Json<PredictRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let reading = match (request.reading, state.session.subject_id()) {
        (Some(raw), Some(subject_id)) => Some(
            normalize_reading(&subject_id, &raw, Utc::now())
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        ),
        _ => None,
    };
    let prediction = state.session.request_prediction(reading).await?;
    Ok(Json(prediction))
}

/// POST /api/schedule - body is a ScheduleInput (defaults when empty)
async fn schedule(
    State(state): State<Arc<ApiState>>,
    request: Option<Json<ScheduleInput>>,
) -> Result<impl IntoResponse, ApiError> {
    let input = request.map(|Json(r)| r).unwrap_or_default();
    let schedule = state.session.create_schedule(&input).await?;
    Ok(Json(schedule))
}
