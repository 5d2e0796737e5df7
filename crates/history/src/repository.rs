//! Row-level access to the history tables.
//!
//! A repository borrows one connection for one logical operation; the facade
//! owns the connection and the retry policy.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;

use tarsy_domain::interaction::{LLMInteraction, MCPInteraction};
use tarsy_domain::session::{AlertSession, StageExecution};
use tarsy_domain::status::{SessionStatus, StageStatus};
use tarsy_domain::{now_us, Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query-side types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Filters accepted by the session list endpoint. Unknown status strings
/// pass through unchanged (they simply match nothing).
#[derive(Debug, Clone, Default)]
pub struct SessionFilters {
    pub status: Option<Vec<String>>,
    pub agent_type: Option<String>,
    pub alert_type: Option<String>,
    pub search: Option<String>,
    pub start_date_us: Option<i64>,
    pub end_date_us: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageInfo {
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
    pub total_items: u64,
}

/// One session row plus its interaction counts, as listed by the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummaryRow {
    #[serde(flatten)]
    pub session: AlertSession,
    pub llm_interaction_count: i64,
    pub mcp_communication_count: i64,
}

/// One merged timeline entry; LLM and tool events ordered purely by
/// microsecond timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp_us: i64,
    pub step_description: String,
    pub duration_ms: Option<i64>,
    pub success: bool,
    pub details: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    pub session: AlertSession,
    pub stages: Vec<StageExecution>,
    pub chronological_timeline: Vec<TimelineEvent>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Repository
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HistoryRepository<'a> {
    conn: &'a Connection,
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

impl<'a> HistoryRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    // ── Sessions ─────────────────────────────────────────────────────

    pub fn create_alert_session(&self, session: &AlertSession) -> Result<String> {
        self.conn
            .execute(
                "INSERT INTO alert_sessions (
                    session_id, alert_id, alert_type, agent_type, alert_data, status,
                    started_at_us, completed_at_us, error_message, final_analysis,
                    chain_id, chain_definition, current_stage_index, current_stage_id
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    session.session_id,
                    session.alert_id,
                    session.alert_type,
                    session.agent_type,
                    session.alert_data.to_string(),
                    session.status.as_str(),
                    session.started_at_us,
                    session.completed_at_us,
                    session.error_message,
                    session.final_analysis,
                    session.chain_id,
                    session.chain_definition.as_ref().map(|v| v.to_string()),
                    session.current_stage_index,
                    session.current_stage_id,
                ],
            )
            .map_err(db_err)?;
        Ok(session.session_id.clone())
    }

    pub fn get_alert_session(&self, session_id: &str) -> Result<Option<AlertSession>> {
        self.conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM alert_sessions WHERE session_id = ?1"),
                params![session_id],
                session_from_row,
            )
            .optional()
            .map_err(db_err)
    }

    /// Update status plus the optional outcome fields. Stamps
    /// `completed_at_us` when the new status is terminal. Returns `false`
    /// when the session does not exist.
    pub fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        error_message: Option<&str>,
        final_analysis: Option<&str>,
    ) -> Result<bool> {
        let completed_at = status.is_terminal().then(now_us);
        let updated = self
            .conn
            .execute(
                "UPDATE alert_sessions SET
                    status = ?2,
                    error_message = COALESCE(?3, error_message),
                    final_analysis = COALESCE(?4, final_analysis),
                    completed_at_us = COALESCE(?5, completed_at_us)
                 WHERE session_id = ?1",
                params![
                    session_id,
                    status.as_str(),
                    error_message,
                    final_analysis,
                    completed_at
                ],
            )
            .map_err(db_err)?;
        Ok(updated > 0)
    }

    pub fn update_session_current_stage(
        &self,
        session_id: &str,
        current_stage_index: i64,
        current_stage_id: &str,
    ) -> Result<bool> {
        let updated = self
            .conn
            .execute(
                "UPDATE alert_sessions SET current_stage_index = ?2, current_stage_id = ?3
                 WHERE session_id = ?1",
                params![session_id, current_stage_index, current_stage_id],
            )
            .map_err(db_err)?;
        Ok(updated > 0)
    }

    /// Filtered, paginated session listing with per-session interaction
    /// counts. `page` is 1-based.
    pub fn get_alert_sessions(
        &self,
        filters: &SessionFilters,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<SessionSummaryRow>, PageInfo)> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(statuses) = &filters.status {
            if !statuses.is_empty() {
                let placeholders = vec!["?"; statuses.len()].join(", ");
                clauses.push(format!("status IN ({placeholders})"));
                values.extend(statuses.iter().map(|s| SqlValue::Text(s.clone())));
            }
        }
        if let Some(agent_type) = &filters.agent_type {
            clauses.push("agent_type = ?".into());
            values.push(SqlValue::Text(agent_type.clone()));
        }
        if let Some(alert_type) = &filters.alert_type {
            clauses.push("alert_type = ?".into());
            values.push(SqlValue::Text(alert_type.clone()));
        }
        if let Some(search) = &filters.search {
            clauses.push(
                "(alert_id LIKE ? OR alert_data LIKE ? OR final_analysis LIKE ? OR error_message LIKE ?)"
                    .into(),
            );
            let like = SqlValue::Text(format!("%{search}%"));
            values.extend([like.clone(), like.clone(), like.clone(), like]);
        }
        if let Some(start) = filters.start_date_us {
            clauses.push("started_at_us >= ?".into());
            values.push(SqlValue::Integer(start));
        }
        if let Some(end) = filters.end_date_us {
            clauses.push("started_at_us <= ?".into());
            values.push(SqlValue::Integer(end));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let total_items: u64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM alert_sessions {where_clause}"),
                params_from_iter(values.iter()),
                |row| row.get::<_, i64>(0),
            )
            .map_err(db_err)? as u64;

        let page = page.max(1);
        let page_size = page_size.max(1);
        let offset = (page - 1) as i64 * page_size as i64;
        let sql = format!(
            "SELECT {SESSION_COLUMNS},
                (SELECT COUNT(*) FROM llm_interactions li WHERE li.session_id = s.session_id),
                (SELECT COUNT(*) FROM mcp_interactions mi WHERE mi.session_id = s.session_id)
             FROM alert_sessions s {where_clause}
             ORDER BY started_at_us DESC
             LIMIT {page_size} OFFSET {offset}"
        );

        let mut stmt = self.conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                let session = session_from_row(row)?;
                Ok(SessionSummaryRow {
                    session,
                    llm_interaction_count: row.get(14)?,
                    mcp_communication_count: row.get(15)?,
                })
            })
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;

        let total_pages = (total_items.div_ceil(page_size as u64)) as u32;
        Ok((
            rows,
            PageInfo {
                page,
                page_size,
                total_pages,
                total_items,
            },
        ))
    }

    /// Sessions still in a non-terminal status.
    pub fn get_active_sessions(&self) -> Result<Vec<AlertSession>> {
        let statuses: Vec<String> = SessionStatus::active_values()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let filters = SessionFilters {
            status: Some(statuses),
            ..Default::default()
        };
        let (rows, _) = self.get_alert_sessions(&filters, 1, 1000)?;
        Ok(rows.into_iter().map(|r| r.session).collect())
    }

    /// Distinct values available for dashboard filters.
    pub fn get_filter_options(&self) -> Result<(Vec<String>, Vec<String>)> {
        let mut agent_types = Vec::new();
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT agent_type FROM alert_sessions ORDER BY agent_type")
            .map_err(db_err)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0)).map_err(db_err)?;
        for row in rows {
            agent_types.push(row.map_err(db_err)?);
        }

        let mut alert_types = Vec::new();
        let mut stmt = self
            .conn
            .prepare(
                "SELECT DISTINCT alert_type FROM alert_sessions
                 WHERE alert_type IS NOT NULL ORDER BY alert_type",
            )
            .map_err(db_err)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0)).map_err(db_err)?;
        for row in rows {
            alert_types.push(row.map_err(db_err)?);
        }

        Ok((agent_types, alert_types))
    }

    // ── Stage executions ─────────────────────────────────────────────

    pub fn create_stage_execution(&self, stage: &StageExecution) -> Result<String> {
        self.conn
            .execute(
                "INSERT INTO stage_executions (
                    execution_id, session_id, parent_stage_execution_id, stage_name,
                    stage_index, stage_id, agent, status, started_at_us, completed_at_us,
                    paused_at_us, duration_ms, error_message, stage_output
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    stage.execution_id,
                    stage.session_id,
                    stage.parent_stage_execution_id,
                    stage.stage_name,
                    stage.stage_index,
                    stage.stage_id,
                    stage.agent,
                    stage.status.as_str(),
                    stage.started_at_us,
                    stage.completed_at_us,
                    stage.paused_at_us,
                    stage.duration_ms,
                    stage.error_message,
                    stage.stage_output.as_ref().map(|v| v.to_string()),
                ],
            )
            .map_err(db_err)?;
        Ok(stage.execution_id.clone())
    }

    pub fn update_stage_execution(&self, stage: &StageExecution) -> Result<bool> {
        let updated = self
            .conn
            .execute(
                "UPDATE stage_executions SET
                    status = ?2, started_at_us = ?3, completed_at_us = ?4,
                    paused_at_us = ?5, duration_ms = ?6, error_message = ?7,
                    stage_output = ?8, agent = ?9
                 WHERE execution_id = ?1",
                params![
                    stage.execution_id,
                    stage.status.as_str(),
                    stage.started_at_us,
                    stage.completed_at_us,
                    stage.paused_at_us,
                    stage.duration_ms,
                    stage.error_message,
                    stage.stage_output.as_ref().map(|v| v.to_string()),
                    stage.agent,
                ],
            )
            .map_err(db_err)?;
        Ok(updated > 0)
    }

    pub fn get_stage_execution(&self, execution_id: &str) -> Result<Option<StageExecution>> {
        self.conn
            .query_row(
                &format!("SELECT {STAGE_COLUMNS} FROM stage_executions WHERE execution_id = ?1"),
                params![execution_id],
                stage_from_row,
            )
            .optional()
            .map_err(db_err)
    }

    pub fn get_session_stages(&self, session_id: &str) -> Result<Vec<StageExecution>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {STAGE_COLUMNS} FROM stage_executions
                 WHERE session_id = ?1
                 ORDER BY stage_index ASC, started_at_us ASC"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![session_id], stage_from_row)
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    pub fn get_parallel_stage_children(
        &self,
        parent_execution_id: &str,
    ) -> Result<Vec<StageExecution>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {STAGE_COLUMNS} FROM stage_executions
                 WHERE parent_stage_execution_id = ?1
                 ORDER BY started_at_us ASC"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![parent_execution_id], stage_from_row)
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    // ── Interactions ─────────────────────────────────────────────────

    pub fn create_llm_interaction(&self, interaction: &LLMInteraction) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO llm_interactions (
                    interaction_id, session_id, stage_execution_id, request_id, provider,
                    model_name, conversation, timestamp_us, start_time_us, end_time_us,
                    duration_ms, success, error_message, token_usage, step_description,
                    interaction_type
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    interaction.interaction_id,
                    interaction.session_id,
                    interaction.stage_execution_id,
                    interaction.request_id,
                    interaction.provider,
                    interaction.model_name,
                    serde_json::to_string(&interaction.conversation)?,
                    interaction.timestamp_us,
                    interaction.start_time_us,
                    interaction.end_time_us,
                    interaction.duration_ms,
                    interaction.success,
                    interaction.error_message,
                    interaction
                        .token_usage
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    interaction.step_description,
                    serde_json::to_value(interaction.interaction_type)?
                        .as_str()
                        .unwrap_or("normal")
                        .to_string(),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn create_mcp_interaction(&self, interaction: &MCPInteraction) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO mcp_interactions (
                    interaction_id, session_id, stage_execution_id, request_id, server_name,
                    communication_type, tool_name, tool_arguments, tool_result,
                    available_tools, timestamp_us, start_time_us, end_time_us, duration_ms,
                    success, error_message, step_description
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    interaction.interaction_id,
                    interaction.session_id,
                    interaction.stage_execution_id,
                    interaction.request_id,
                    interaction.server_name,
                    interaction.communication_type.as_str(),
                    interaction.tool_name,
                    interaction
                        .tool_arguments
                        .as_ref()
                        .map(|v| v.to_string()),
                    interaction.tool_result.as_ref().map(|v| v.to_string()),
                    interaction
                        .available_tools
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    interaction.timestamp_us,
                    interaction.start_time_us,
                    interaction.end_time_us,
                    interaction.duration_ms,
                    interaction.success,
                    interaction.error_message,
                    interaction.step_description,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    // ── Timeline ─────────────────────────────────────────────────────

    /// Merge LLM and MCP events for a session, ordered by microsecond
    /// timestamp, the only chronological key across mixed event kinds.
    pub fn get_session_timeline(&self, session_id: &str) -> Result<Vec<TimelineEvent>> {
        let mut events: Vec<TimelineEvent> = Vec::new();

        let mut stmt = self
            .conn
            .prepare(
                "SELECT timestamp_us, step_description, duration_ms, success, provider,
                        model_name, request_id, interaction_type, token_usage, conversation
                 FROM llm_interactions WHERE session_id = ?1",
            )
            .map_err(db_err)?;
        let llm_rows = stmt
            .query_map(params![session_id], |row| {
                let token_usage: Option<String> = row.get(8)?;
                let conversation: String = row.get(9)?;
                Ok(TimelineEvent {
                    event_type: "llm".into(),
                    timestamp_us: row.get(0)?,
                    step_description: row.get(1)?,
                    duration_ms: row.get(2)?,
                    success: row.get(3)?,
                    details: serde_json::json!({
                        "provider": row.get::<_, String>(4)?,
                        "model_name": row.get::<_, String>(5)?,
                        "request_id": row.get::<_, String>(6)?,
                        "interaction_type": row.get::<_, String>(7)?,
                        "token_usage": token_usage
                            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok()),
                        "conversation": serde_json::from_str::<Value>(&conversation)
                            .unwrap_or(Value::Null),
                    }),
                })
            })
            .map_err(db_err)?;
        for row in llm_rows {
            events.push(row.map_err(db_err)?);
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT timestamp_us, step_description, duration_ms, success, server_name,
                        tool_name, communication_type, request_id, tool_arguments, tool_result
                 FROM mcp_interactions WHERE session_id = ?1",
            )
            .map_err(db_err)?;
        let mcp_rows = stmt
            .query_map(params![session_id], |row| {
                let arguments: Option<String> = row.get(8)?;
                let result: Option<String> = row.get(9)?;
                Ok(TimelineEvent {
                    event_type: "mcp".into(),
                    timestamp_us: row.get(0)?,
                    step_description: row.get(1)?,
                    duration_ms: row.get(2)?,
                    success: row.get(3)?,
                    details: serde_json::json!({
                        "server_name": row.get::<_, String>(4)?,
                        "tool_name": row.get::<_, Option<String>>(5)?,
                        "communication_type": row.get::<_, String>(6)?,
                        "request_id": row.get::<_, String>(7)?,
                        "tool_arguments": arguments
                            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok()),
                        "tool_result": result
                            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok()),
                    }),
                })
            })
            .map_err(db_err)?;
        for row in mcp_rows {
            events.push(row.map_err(db_err)?);
        }

        events.sort_by_key(|e| e.timestamp_us);
        Ok(events)
    }

    pub fn get_session_with_stages(&self, session_id: &str) -> Result<Option<SessionDetail>> {
        let Some(session) = self.get_alert_session(session_id)? else {
            return Ok(None);
        };
        let stages = self.get_session_stages(session_id)?;
        let chronological_timeline = self.get_session_timeline(session_id)?;
        Ok(Some(SessionDetail {
            session,
            stages,
            chronological_timeline,
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const SESSION_COLUMNS: &str = "session_id, alert_id, alert_type, agent_type, alert_data, status, \
     started_at_us, completed_at_us, error_message, final_analysis, chain_id, chain_definition, \
     current_stage_index, current_stage_id";

const STAGE_COLUMNS: &str = "execution_id, session_id, parent_stage_execution_id, stage_name, \
     stage_index, stage_id, agent, status, started_at_us, completed_at_us, paused_at_us, \
     duration_ms, error_message, stage_output";

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<AlertSession> {
    let alert_data: String = row.get(4)?;
    let status: String = row.get(5)?;
    let chain_definition: Option<String> = row.get(11)?;
    Ok(AlertSession {
        session_id: row.get(0)?,
        alert_id: row.get(1)?,
        alert_type: row.get(2)?,
        agent_type: row.get(3)?,
        alert_data: serde_json::from_str(&alert_data).unwrap_or(Value::Null),
        status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Failed),
        started_at_us: row.get(6)?,
        completed_at_us: row.get(7)?,
        error_message: row.get(8)?,
        final_analysis: row.get(9)?,
        chain_id: row.get(10)?,
        chain_definition: chain_definition.and_then(|raw| serde_json::from_str(&raw).ok()),
        current_stage_index: row.get(12)?,
        current_stage_id: row.get(13)?,
    })
}

fn stage_from_row(row: &Row<'_>) -> rusqlite::Result<StageExecution> {
    let status: String = row.get(7)?;
    let stage_output: Option<String> = row.get(13)?;
    Ok(StageExecution {
        execution_id: row.get(0)?,
        session_id: row.get(1)?,
        parent_stage_execution_id: row.get(2)?,
        stage_name: row.get(3)?,
        stage_index: row.get(4)?,
        stage_id: row.get(5)?,
        agent: row.get(6)?,
        status: parse_stage_status(&status),
        started_at_us: row.get(8)?,
        completed_at_us: row.get(9)?,
        paused_at_us: row.get(10)?,
        duration_ms: row.get(11)?,
        error_message: row.get(12)?,
        stage_output: stage_output.and_then(|raw| serde_json::from_str(&raw).ok()),
    })
}

fn parse_stage_status(s: &str) -> StageStatus {
    match s {
        "pending" => StageStatus::Pending,
        "active" => StageStatus::Active,
        "paused" => StageStatus::Paused,
        "completed" => StageStatus::Completed,
        "timed_out" => StageStatus::TimedOut,
        "cancelled" => StageStatus::Cancelled,
        "partial" => StageStatus::Partial,
        _ => StageStatus::Failed,
    }
}
