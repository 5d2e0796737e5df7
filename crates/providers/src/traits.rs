use serde_json::Value;

use tarsy_domain::interaction::{LLMMessage, TokenUsage};
use tarsy_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation to send, in order.
    pub conversation: Vec<LLMMessage>,
    /// Tool catalogue offered to the model, rendered as
    /// `server.tool -> JSON schema`. Empty for pure-text turns.
    pub tools: Vec<(String, Value)>,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
}

/// A tool call emitted by the model as a first-class output
/// (native-thinking strategy). `tool_name` is the dotted
/// `server.tool` form from the catalogue.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// A provider-agnostic chat completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Assistant text content.
    pub content: String,
    /// Thinking segments, when the provider surfaces them.
    pub thinking: Option<String>,
    /// Structured tool calls. Empty means the model considers the turn
    /// final.
    pub tool_calls: Vec<ToolInvocation>,
    pub token_usage: Option<TokenUsage>,
    /// The model that actually produced the response.
    pub model: String,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            thinking: None,
            tool_calls: Vec::new(),
            token_usage: None,
            model: model.into(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Capability every LLM adapter implements.
///
/// Adapters translate between these types and each provider's HTTP API;
/// they live outside this workspace and are injected through the registry's
/// constructor table.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Registry name of this provider instance (e.g. `openai-default`).
    fn provider_id(&self) -> &str;

    /// Model served by this instance.
    fn model_name(&self) -> &str;

    /// Tool results above this token count get summarized before being fed
    /// back to the model.
    fn max_tool_result_tokens(&self) -> u32;

    /// Send a chat completion request and wait for the full response.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;
}
