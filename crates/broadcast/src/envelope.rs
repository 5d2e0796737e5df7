//! Envelope taxonomy.
//!
//! Every message on a channel is one of these variants, discriminated by the
//! `type` field. Serialization is the wire format pushed to dashboard
//! WebSocket clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use tarsy_domain::interaction::TokenUsage;

pub const DASHBOARD_UPDATES: &str = "dashboard_updates";
pub const SYSTEM_HEALTH: &str = "system_health";

/// Channel carrying one session's interaction and status envelopes.
pub fn session_channel(session_id: &str) -> String {
    format!("session_{session_id}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "llm_interaction")]
    LlmInteraction {
        session_id: String,
        request_id: String,
        provider: String,
        model_name: String,
        step_description: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        system_prompt: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_prompt: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        response_text: Option<String>,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        duration_ms: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        token_usage: Option<TokenUsage>,
        timestamp_us: i64,
    },

    #[serde(rename = "mcp_interaction")]
    McpInteraction {
        session_id: String,
        request_id: String,
        server_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        communication_type: String,
        step_description: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_arguments: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_result: Option<Value>,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        duration_ms: Option<i64>,
        timestamp_us: i64,
    },

    #[serde(rename = "mcp_tool_list")]
    McpToolList {
        session_id: String,
        request_id: String,
        server_name: String,
        step_description: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        available_tools: Option<HashMap<String, Vec<String>>>,
        tool_count: usize,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        duration_ms: Option<i64>,
        timestamp_us: i64,
    },

    #[serde(rename = "session_status_change")]
    SessionStatusChange {
        session_id: String,
        status: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        details: Value,
        timestamp_us: i64,
    },

    #[serde(rename = "stage.started")]
    StageStarted {
        session_id: String,
        stage_execution_id: String,
        stage_name: String,
        agent: String,
        timestamp_us: i64,
    },

    #[serde(rename = "stage.completed")]
    StageCompleted {
        session_id: String,
        stage_execution_id: String,
        stage_name: String,
        agent: String,
        status: String,
        timestamp_us: i64,
    },

    #[serde(rename = "agent.cancelled")]
    AgentCancelled {
        session_id: String,
        stage_execution_id: String,
        agent: String,
        timestamp_us: i64,
    },

    #[serde(rename = "session.resumed")]
    SessionResumed {
        session_id: String,
        timestamp_us: i64,
    },

    #[serde(rename = "session.cancelled")]
    SessionCancelled {
        session_id: String,
        timestamp_us: i64,
    },

    #[serde(rename = "session.failed")]
    SessionFailed {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        timestamp_us: i64,
    },

    #[serde(rename = "system_health")]
    SystemHealth {
        status: String,
        services: HashMap<String, String>,
        timestamp_us: i64,
    },

    #[serde(rename = "dashboard_update")]
    DashboardUpdate { data: Value, timestamp_us: i64 },

    #[serde(rename = "intermediate_response")]
    IntermediateResponse {
        session_id: String,
        request_id: String,
        chunk_type: String,
        content: String,
        timestamp_us: i64,
    },

    #[serde(rename = "final_answer")]
    FinalAnswer {
        session_id: String,
        request_id: String,
        content: String,
        timestamp_us: i64,
    },

    #[serde(rename = "message_batch")]
    MessageBatch { count: usize, messages: Vec<Value> },
}

impl Envelope {
    /// Serialize for the wire. Envelope construction is infallible by
    /// design, so serialization is too.
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize envelope");
            String::from("{\"type\":\"error\"}")
        })
    }
}
