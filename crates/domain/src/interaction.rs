//! Captured interaction records.
//!
//! One [`LLMInteraction`] per LLM call and one [`MCPInteraction`] per
//! tool-server operation. Records are built as templates when the call
//! starts, completed by the capture scope when it finishes, and immutable
//! after they reach the hooks.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::status::InteractionType;
use crate::timestamp::now_us;

/// Short per-call request id (first 8 hex chars of a v4 UUID).
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LLMMessage {
    pub role: MessageRole,
    pub content: String,
}

impl LLMMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM interaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One recorded LLM call: the conversation sent, the assistant reply (the
/// final assistant message of `conversation`), timing, and outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMInteraction {
    pub interaction_id: String,
    pub session_id: String,
    #[serde(default)]
    pub stage_execution_id: Option<String>,
    pub request_id: String,
    pub provider: String,
    pub model_name: String,
    #[serde(default)]
    pub conversation: Vec<LLMMessage>,
    /// Event ordering key; stamped at completion.
    pub timestamp_us: i64,
    pub start_time_us: i64,
    #[serde(default)]
    pub end_time_us: Option<i64>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub token_usage: Option<TokenUsage>,
    #[serde(default)]
    pub step_description: String,
    #[serde(default)]
    pub interaction_type: InteractionType,
}

impl LLMInteraction {
    /// Build the template stamped at call start. The capture scope fills in
    /// the result fields on completion.
    pub fn template(
        session_id: impl Into<String>,
        stage_execution_id: Option<String>,
        provider: impl Into<String>,
        model_name: impl Into<String>,
        conversation: Vec<LLMMessage>,
    ) -> Self {
        let start = now_us();
        Self {
            interaction_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            stage_execution_id,
            request_id: new_request_id(),
            provider: provider.into(),
            model_name: model_name.into(),
            conversation,
            timestamp_us: start,
            start_time_us: start,
            end_time_us: None,
            duration_ms: None,
            success: false,
            error_message: None,
            token_usage: None,
            step_description: String::new(),
            interaction_type: InteractionType::Normal,
        }
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.conversation
            .iter()
            .find(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
    }

    /// The most recent user message (the prompt the reply answers).
    pub fn user_prompt(&self) -> Option<&str> {
        self.conversation
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
    }

    /// The assistant reply, when the call produced one.
    pub fn response_text(&self) -> Option<&str> {
        self.conversation
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
            .map(|m| m.content.as_str())
    }

    /// Default step description used when the caller left it empty.
    pub fn default_step_description(&self) -> String {
        format!("LLM analysis using {}", self.model_name)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP interaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationType {
    ToolCall,
    ToolList,
}

impl CommunicationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolCall => "tool_call",
            Self::ToolList => "tool_list",
        }
    }
}

/// One recorded tool-server operation (a tool call or a tool listing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPInteraction {
    pub interaction_id: String,
    pub session_id: String,
    #[serde(default)]
    pub stage_execution_id: Option<String>,
    pub request_id: String,
    pub server_name: String,
    pub communication_type: CommunicationType,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_arguments: Option<Value>,
    #[serde(default)]
    pub tool_result: Option<Value>,
    /// `server_name -> advertised tool names`, present on tool listings.
    #[serde(default)]
    pub available_tools: Option<HashMap<String, Vec<String>>>,
    pub timestamp_us: i64,
    pub start_time_us: i64,
    #[serde(default)]
    pub end_time_us: Option<i64>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub step_description: String,
}

impl MCPInteraction {
    pub fn tool_call_template(
        session_id: impl Into<String>,
        stage_execution_id: Option<String>,
        server_name: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        let start = now_us();
        Self {
            interaction_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            stage_execution_id,
            request_id: new_request_id(),
            server_name: server_name.into(),
            communication_type: CommunicationType::ToolCall,
            tool_name: Some(tool_name.into()),
            tool_arguments: Some(arguments),
            tool_result: None,
            available_tools: None,
            timestamp_us: start,
            start_time_us: start,
            end_time_us: None,
            duration_ms: None,
            success: false,
            error_message: None,
            step_description: String::new(),
        }
    }

    /// Template for a tool listing. `server_name = None` lists all servers.
    pub fn tool_list_template(
        session_id: impl Into<String>,
        stage_execution_id: Option<String>,
        server_name: Option<String>,
    ) -> Self {
        let start = now_us();
        Self {
            interaction_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            stage_execution_id,
            request_id: new_request_id(),
            server_name: server_name.unwrap_or_else(|| "all_servers".into()),
            communication_type: CommunicationType::ToolList,
            tool_name: None,
            tool_arguments: None,
            tool_result: None,
            available_tools: None,
            timestamp_us: start,
            start_time_us: start,
            end_time_us: None,
            duration_ms: None,
            success: false,
            error_message: None,
            step_description: String::new(),
        }
    }

    pub fn default_step_description(&self) -> String {
        match self.communication_type {
            CommunicationType::ToolCall => format!(
                "Tool call: {}.{}",
                self.server_name,
                self.tool_name.as_deref().unwrap_or("unknown")
            ),
            CommunicationType::ToolList => {
                format!("Tool discovery on {}", self.server_name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_is_short() {
        let id = new_request_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn llm_template_stamps_start() {
        let t = LLMInteraction::template("s1", None, "openai", "gpt-4o", vec![]);
        assert!(t.start_time_us > 0);
        assert_eq!(t.timestamp_us, t.start_time_us);
        assert!(!t.success);
        assert_eq!(t.interaction_type, InteractionType::Normal);
    }

    #[test]
    fn conversation_accessors() {
        let i = LLMInteraction::template(
            "s1",
            None,
            "openai",
            "gpt-4o",
            vec![
                LLMMessage::system("sys"),
                LLMMessage::user("first"),
                LLMMessage::assistant("reply"),
                LLMMessage::user("second"),
            ],
        );
        assert_eq!(i.system_prompt(), Some("sys"));
        assert_eq!(i.user_prompt(), Some("second"));
        assert_eq!(i.response_text(), Some("reply"));
    }

    #[test]
    fn tool_list_template_defaults_server_name() {
        let t = MCPInteraction::tool_list_template("s1", None, None);
        assert_eq!(t.server_name, "all_servers");
        assert_eq!(t.communication_type, CommunicationType::ToolList);
    }

    #[test]
    fn step_descriptions() {
        let call = MCPInteraction::tool_call_template(
            "s1",
            None,
            "kubernetes-server",
            "list_pods",
            serde_json::json!({}),
        );
        assert_eq!(
            call.default_step_description(),
            "Tool call: kubernetes-server.list_pods"
        );
        let list = MCPInteraction::tool_list_template("s1", None, Some("k8s".into()));
        assert_eq!(list.default_step_description(), "Tool discovery on k8s");
    }
}
