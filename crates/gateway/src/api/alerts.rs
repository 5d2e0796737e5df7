//! Alert submission and cancellation endpoints (thin translation only).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use tarsy_domain::alert::Alert;

use crate::runtime::{cancel_agent as cancel_agent_rt, session};
use crate::state::AppState;

use super::error_response;

/// POST /api/v1/alerts: accept an alert and dispatch its chain.
pub async fn submit_alert(State(state): State<AppState>, Json(alert): Json<Alert>) -> Response {
    match session::submit_alert(&state, alert).await {
        Ok(session_id) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "session_id": session_id,
                "status": "pending",
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/v1/sessions/:session_id/cancel: user cancellation of a
/// running session.
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    if session::cancel_session(&state, &session_id) {
        (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "session_id": session_id,
                "cancelling": true,
            })),
        )
            .into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": "not_running",
                "message": format!("no running chain for session {session_id}"),
            })),
        )
            .into_response()
    }
}

/// POST /api/v1/sessions/:session_id/agents/:execution_id/cancel:
/// cancel one paused agent of a parallel stage.
pub async fn cancel_agent(
    State(state): State<AppState>,
    Path((session_id, execution_id)): Path<(String, String)>,
) -> Response {
    match cancel_agent_rt::cancel_agent(&state, &session_id, &execution_id).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(e),
    }
}
