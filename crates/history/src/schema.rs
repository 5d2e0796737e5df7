//! History schema.
//!
//! Four tables, all carrying microsecond integer timestamps. Opaque payloads
//! (alert data, chain snapshots, conversations, tool arguments/results) are
//! stored as JSON text; the audit trail is the source of truth and the
//! schema stays migration-free while those payloads evolve.

use rusqlite::Connection;

use tarsy_domain::{Error, Result};

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS alert_sessions (
            session_id TEXT PRIMARY KEY,
            alert_id TEXT NOT NULL,
            alert_type TEXT,
            agent_type TEXT NOT NULL,
            alert_data TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at_us INTEGER NOT NULL,
            completed_at_us INTEGER,
            error_message TEXT,
            final_analysis TEXT,
            chain_id TEXT,
            chain_definition TEXT,
            current_stage_index INTEGER,
            current_stage_id TEXT
        );

        CREATE TABLE IF NOT EXISTS stage_executions (
            execution_id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            parent_stage_execution_id TEXT,
            stage_name TEXT NOT NULL,
            stage_index INTEGER NOT NULL,
            stage_id TEXT NOT NULL,
            agent TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at_us INTEGER,
            completed_at_us INTEGER,
            paused_at_us INTEGER,
            duration_ms INTEGER,
            error_message TEXT,
            stage_output TEXT,
            FOREIGN KEY (session_id) REFERENCES alert_sessions(session_id)
        );

        CREATE TABLE IF NOT EXISTS llm_interactions (
            interaction_id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            stage_execution_id TEXT,
            request_id TEXT NOT NULL,
            provider TEXT NOT NULL,
            model_name TEXT NOT NULL,
            conversation TEXT NOT NULL,
            timestamp_us INTEGER NOT NULL,
            start_time_us INTEGER NOT NULL,
            end_time_us INTEGER,
            duration_ms INTEGER,
            success INTEGER NOT NULL,
            error_message TEXT,
            token_usage TEXT,
            step_description TEXT NOT NULL,
            interaction_type TEXT NOT NULL,
            FOREIGN KEY (session_id) REFERENCES alert_sessions(session_id),
            FOREIGN KEY (stage_execution_id) REFERENCES stage_executions(execution_id)
        );

        CREATE TABLE IF NOT EXISTS mcp_interactions (
            interaction_id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            stage_execution_id TEXT,
            request_id TEXT NOT NULL,
            server_name TEXT NOT NULL,
            communication_type TEXT NOT NULL,
            tool_name TEXT,
            tool_arguments TEXT,
            tool_result TEXT,
            available_tools TEXT,
            timestamp_us INTEGER NOT NULL,
            start_time_us INTEGER NOT NULL,
            end_time_us INTEGER,
            duration_ms INTEGER,
            success INTEGER NOT NULL,
            error_message TEXT,
            step_description TEXT NOT NULL,
            FOREIGN KEY (session_id) REFERENCES alert_sessions(session_id),
            FOREIGN KEY (stage_execution_id) REFERENCES stage_executions(execution_id)
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_status ON alert_sessions(status);
        CREATE INDEX IF NOT EXISTS idx_sessions_started ON alert_sessions(started_at_us DESC);
        CREATE INDEX IF NOT EXISTS idx_stages_session ON stage_executions(session_id);
        CREATE INDEX IF NOT EXISTS idx_stages_parent ON stage_executions(parent_stage_execution_id);
        CREATE INDEX IF NOT EXISTS idx_llm_session ON llm_interactions(session_id, timestamp_us);
        CREATE INDEX IF NOT EXISTS idx_llm_stage ON llm_interactions(stage_execution_id);
        CREATE INDEX IF NOT EXISTS idx_mcp_session ON mcp_interactions(session_id, timestamp_us);
        CREATE INDEX IF NOT EXISTS idx_mcp_stage ON mcp_interactions(stage_execution_id);
        "#,
    )
    .map_err(|e| Error::Database(e.to_string()))?;

    conn.execute(&format!("PRAGMA user_version = {SCHEMA_VERSION}"), [])
        .map_err(|e| Error::Database(e.to_string()))?;

    Ok(())
}
