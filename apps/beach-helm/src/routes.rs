use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tracing::debug;

use crate::control::{ControlStatus, RequestOutcome};
use crate::error::ControlError;
use crate::metrics;
use crate::profile::Capability;
use crate::protocol::SessionInfo;
use crate::session::Session;
use crate::state::AppState;
use crate::websocket::websocket_handler;

/// Header naming the connected session a control request acts as.
pub const SESSION_HEADER: &str = "x-session-id";
/// Header carrying the `session_secret` the session received in `system/init`.
pub const SESSION_SECRET_HEADER: &str = "x-session-secret";

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
    uptime_secs: u64,
    sessions: usize,
    has_host: bool,
}

#[derive(Debug, Serialize)]
struct MessageBody {
    message: &'static str,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/api/room/sessions", get(list_sessions))
        .route("/api/room/control", get(control_status))
        .route("/api/room/control/request", post(control_request))
        .route("/api/room/control/release", post(control_release))
        .route("/api/room/control/take", post(control_take))
        .route("/api/room/control/give/:session_id", post(control_give))
        .route("/api/room/control/reset", post(control_reset))
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Resolve the acting session and check it against `capability`. The id
/// alone is not a credential: other sessions learn it from room events.
fn acting_session(
    state: &AppState,
    headers: &HeaderMap,
    op: &'static str,
    capability: Capability,
) -> Result<Session, ControlError> {
    let unauthorized = || ControlError::Unauthorized("session credentials are invalid".into());
    let session = header(headers, SESSION_HEADER)
        .and_then(|id| state.registry().get(id))
        .ok_or_else(unauthorized)?;
    let presented = header(headers, SESSION_SECRET_HEADER).unwrap_or_default();
    if !session.verify_secret(presented) {
        let err = unauthorized();
        metrics::record_denied(op, &err);
        debug!(session_id = %session.id(), op, "control route presented a bad session secret");
        return Err(err);
    }

    if !capability.permits(&session.profile(), session.is_host()) {
        let err = ControlError::forbidden(capability.denial_reason());
        metrics::record_denied(op, &err);
        debug!(
            session_id = %session.id(),
            op,
            required = capability.label(),
            "control route rejected by permission check"
        );
        return Err(err);
    }
    Ok(session)
}

/// GET /health - Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        uptime_secs: state.uptime_secs(),
        sessions: state.registry().len(),
        has_host: state.control().status().has_host,
    })
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.render_metrics() {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /api/room/sessions - Connected sessions
async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionInfo>>, ControlError> {
    acting_session(&state, &headers, "sessions", Capability::Admin)?;
    Ok(Json(state.registry().list()))
}

/// GET /api/room/control - Who holds control
async fn control_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ControlStatus>, ControlError> {
    acting_session(&state, &headers, "status", Capability::Any)?;
    Ok(Json(state.control().status()))
}

/// POST /api/room/control/request - Ask for control
async fn control_request(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ControlError> {
    let session = acting_session(&state, &headers, "request", Capability::CanHost)?;
    match state.control().request(&session)? {
        RequestOutcome::Granted => Ok(StatusCode::NO_CONTENT.into_response()),
        RequestOutcome::Pending => Ok((
            StatusCode::ACCEPTED,
            Json(MessageBody {
                message: "control request sent",
            }),
        )
            .into_response()),
    }
}

/// POST /api/room/control/release - Give up control
async fn control_release(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ControlError> {
    let session = acting_session(&state, &headers, "release", Capability::CanHost)?;
    state.control().release(&session)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/room/control/take - Seize control (admin)
async fn control_take(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ControlError> {
    let session = acting_session(&state, &headers, "take", Capability::Admin)?;
    state.control().take(&session)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/room/control/give/{session_id} - Hand control to another session
async fn control_give(
    State(state): State<AppState>,
    Path(target_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ControlError> {
    let session = acting_session(&state, &headers, "give", Capability::HostOrAdmin)?;
    state.control().give(&session, &target_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/room/control/reset - Clear control (admin)
async fn control_reset(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ControlError> {
    let session = acting_session(&state, &headers, "reset", Capability::Admin)?;
    state.control().reset(&session)?;
    Ok(StatusCode::NO_CONTENT)
}
