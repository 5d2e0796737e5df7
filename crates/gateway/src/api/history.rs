//! Read-only history endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use tarsy_domain::now_us;
use tarsy_history::{HistoryStore, SessionFilters};

use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct SessionsQuery {
    /// Comma-separated status filter. Unknown values pass through and
    /// simply match nothing; no enum validation here.
    pub status: Option<String>,
    pub agent_type: Option<String>,
    pub alert_type: Option<String>,
    pub search: Option<String>,
    /// ISO 8601 timestamps; invalid values are a 422.
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

fn parse_iso_us(raw: &str) -> Result<i64, String> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp_micros())
        .map_err(|e| format!("invalid ISO 8601 date '{raw}': {e}"))
}

/// GET /api/v1/history/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionsQuery>,
) -> Response {
    let mut filters = SessionFilters {
        agent_type: query.agent_type,
        alert_type: query.alert_type,
        search: query.search,
        ..Default::default()
    };
    if let Some(status) = &query.status {
        filters.status = Some(
            status
                .split(',')
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty())
                .collect(),
        );
    }
    for (raw, slot) in [
        (&query.start_date, &mut filters.start_date_us),
        (&query.end_date, &mut filters.end_date_us),
    ] {
        if let Some(raw) = raw {
            match parse_iso_us(raw) {
                Ok(us) => *slot = Some(us),
                Err(message) => {
                    return (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        Json(serde_json::json!({ "error": "invalid_date", "message": message })),
                    )
                        .into_response()
                }
            }
        }
    }

    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(20).min(100);
    let (sessions, pagination) = state.history.get_sessions_list(&filters, page, page_size).await;

    Json(serde_json::json!({
        "sessions": sessions,
        "pagination": pagination,
    }))
    .into_response()
}

/// GET /api/v1/history/sessions/:session_id
pub async fn session_detail(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.history.get_session_detail(&session_id).await {
        Some(detail) => {
            let summary = HistoryStore::calculate_session_stats(&detail);
            Json(serde_json::json!({
                "session": detail.session,
                "stages": detail.stages,
                "chronological_timeline": detail.chronological_timeline,
                "summary": summary,
            }))
            .into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": "not_found",
                "message": format!("session {session_id} not found"),
            })),
        )
            .into_response(),
    }
}

/// GET /api/v1/history/filter-options: distinct values for dashboard
/// filter dropdowns.
pub async fn filter_options(State(state): State<AppState>) -> Response {
    let (agent_types, alert_types) = state.history.get_filter_options().await;
    Json(serde_json::json!({
        "agent_types": agent_types,
        "alert_types": alert_types,
        "status_options": [
            "pending", "in_progress", "paused", "completed",
            "failed", "timed_out", "cancelled",
        ],
    }))
    .into_response()
}

/// GET /api/v1/history/health
pub async fn health(State(state): State<AppState>) -> Response {
    let status = state.history.health();
    Json(serde_json::json!({
        "service": "history",
        "status": status,
        "timestamp": now_us(),
        "details": {
            "history_enabled": state.history.enabled(),
            "unavailable_providers": state.providers.unavailable(),
            "broadcast_stats": state.broadcaster.stats(),
        },
    }))
    .into_response()
}
