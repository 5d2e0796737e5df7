//! HTTP surface: thin request translation over the runtime and the
//! read-only history queries, plus the dashboard WebSocket endpoint.

pub mod alerts;
pub mod history;
pub mod ws;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use tarsy_domain::Error;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/alerts", post(alerts::submit_alert))
        .route(
            "/api/v1/sessions/:session_id/cancel",
            post(alerts::cancel_session),
        )
        .route(
            "/api/v1/sessions/:session_id/agents/:execution_id/cancel",
            post(alerts::cancel_agent),
        )
        .route("/api/v1/history/sessions", get(history::list_sessions))
        .route(
            "/api/v1/history/sessions/:session_id",
            get(history::session_detail),
        )
        .route(
            "/api/v1/history/filter-options",
            get(history::filter_options),
        )
        .route("/api/v1/history/health", get(history::health))
        .route("/api/v1/ws/dashboard/:user_id", get(ws::dashboard_ws))
        .with_state(state)
}

/// Map engine errors onto HTTP responses with a structured body.
pub(crate) fn error_response(error: Error) -> Response {
    let status = match &error {
        Error::McpServerSelection { .. } | Error::McpToolSelection { .. } => {
            StatusCode::BAD_REQUEST
        }
        Error::Config(_) => StatusCode::BAD_REQUEST,
        Error::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = match &error {
        Error::McpServerSelection {
            requested,
            available,
        } => serde_json::json!({
            "error": error.kind(),
            "message": error.to_string(),
            "requested": requested,
            "available": available,
        }),
        Error::McpToolSelection {
            server,
            requested,
            available,
        } => serde_json::json!({
            "error": error.kind(),
            "message": error.to_string(),
            "server": server,
            "requested": requested,
            "available": available,
        }),
        _ => serde_json::json!({
            "error": error.kind(),
            "message": error.to_string(),
        }),
    };
    (status, Json(body)).into_response()
}
