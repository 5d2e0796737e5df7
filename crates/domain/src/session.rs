//! Session and stage-execution records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::status::{SessionStatus, StageStatus};
use crate::timestamp::now_us;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AlertSession
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One alert being processed end-to-end. Created when an alert is accepted;
/// never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSession {
    pub session_id: String,
    pub alert_id: String,
    #[serde(default)]
    pub alert_type: Option<String>,
    pub agent_type: String,
    pub alert_data: Value,
    pub status: SessionStatus,
    pub started_at_us: i64,
    #[serde(default)]
    pub completed_at_us: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub final_analysis: Option<String>,
    #[serde(default)]
    pub chain_id: Option<String>,
    /// Snapshot of the chain definition at dispatch time.
    #[serde(default)]
    pub chain_definition: Option<Value>,
    #[serde(default)]
    pub current_stage_index: Option<i64>,
    #[serde(default)]
    pub current_stage_id: Option<String>,
}

impl AlertSession {
    pub fn new(
        alert_id: impl Into<String>,
        alert_data: Value,
        agent_type: impl Into<String>,
        alert_type: Option<String>,
        chain_id: Option<String>,
        chain_definition: Option<Value>,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            alert_id: alert_id.into(),
            alert_type,
            agent_type: agent_type.into(),
            alert_data,
            status: SessionStatus::Pending,
            started_at_us: now_us(),
            completed_at_us: None,
            error_message: None,
            final_analysis: None,
            chain_id,
            chain_definition,
            current_stage_index: None,
            current_stage_id: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StageExecution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One attempt to run one stage for one session.
///
/// Parallel stages create one parent row plus one child row per fanned-out
/// agent; children link back via `parent_stage_execution_id`. Rows are
/// identity-stable: `started_at_us == None` is the predicate the stage hooks
/// use to distinguish "create a new row" from "update the existing one".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageExecution {
    pub execution_id: String,
    pub session_id: String,
    #[serde(default)]
    pub parent_stage_execution_id: Option<String>,
    pub stage_name: String,
    pub stage_index: i64,
    pub stage_id: String,
    pub agent: String,
    pub status: StageStatus,
    #[serde(default)]
    pub started_at_us: Option<i64>,
    #[serde(default)]
    pub completed_at_us: Option<i64>,
    #[serde(default)]
    pub paused_at_us: Option<i64>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Opaque stage result. Parent rows of parallel stages store aggregation
    /// metadata here.
    #[serde(default)]
    pub stage_output: Option<Value>,
}

impl StageExecution {
    pub fn new(
        session_id: impl Into<String>,
        stage_name: impl Into<String>,
        stage_index: i64,
        stage_id: impl Into<String>,
        agent: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            parent_stage_execution_id: None,
            stage_name: stage_name.into(),
            stage_index,
            stage_id: stage_id.into(),
            agent: agent.into(),
            status: StageStatus::Pending,
            started_at_us: None,
            completed_at_us: None,
            paused_at_us: None,
            duration_ms: None,
            error_message: None,
            stage_output: None,
        }
    }

    /// Mark the stage active and stamp its start time.
    pub fn start(&mut self) {
        self.status = StageStatus::Active;
        self.started_at_us = Some(now_us());
    }

    /// Finalize with a terminal status; stamps `completed_at_us` and
    /// recomputes `duration_ms` when the start time is known.
    pub fn finish(&mut self, status: StageStatus, error_message: Option<String>) {
        self.status = status;
        self.error_message = error_message;
        let end = now_us();
        self.completed_at_us = Some(end);
        if let Some(start) = self.started_at_us {
            self.duration_ms = Some((end - start) / 1000);
        }
    }

    /// Mark the stage paused at the current instant.
    pub fn pause(&mut self) {
        self.status = StageStatus::Paused;
        self.paused_at_us = Some(now_us());
    }
}
