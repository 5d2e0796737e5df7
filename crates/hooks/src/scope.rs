//! Scoped capture around individual interactions.
//!
//! A scope is created from a template interaction just before the wrapped
//! call starts (the template stamps `start_time_us`). The caller performs
//! the call and then completes the scope exactly once: `complete_success`
//! with the result, or `complete_failure` with the error it is about to
//! propagate. Completion stamps end time and duration, and fires the
//! matching hook registry. Capture can never break the wrapped call: hook
//! failures are contained by `safe_execute`, and the caller's own error
//! handling is untouched.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use tarsy_domain::interaction::{
    CommunicationType, LLMInteraction, LLMMessage, MCPInteraction, TokenUsage,
};
use tarsy_domain::session::StageExecution;
use tarsy_domain::status::InteractionType;
use tarsy_domain::now_us;

use crate::manager::HookManager;
use crate::truncate::truncate_conversation_for_capture;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM capture scope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result fields patched onto the template on success.
#[derive(Debug, Default)]
pub struct LlmResultPatch {
    /// Full conversation including the assistant reply.
    pub conversation: Option<Vec<LLMMessage>>,
    pub token_usage: Option<TokenUsage>,
    pub interaction_type: Option<InteractionType>,
}

#[must_use = "a capture scope must be completed so the interaction is recorded"]
pub struct LlmCaptureScope {
    interaction: LLMInteraction,
    manager: Arc<HookManager>,
    max_message_size: usize,
}

impl LlmCaptureScope {
    pub fn new(
        template: LLMInteraction,
        manager: Arc<HookManager>,
        max_message_size: usize,
    ) -> Self {
        Self {
            interaction: template,
            manager,
            max_message_size,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.interaction.request_id
    }

    /// Complete with a result patch. Returns the finalized record.
    pub async fn complete_success(mut self, patch: LlmResultPatch) -> LLMInteraction {
        if let Some(conversation) = patch.conversation {
            self.interaction.conversation = conversation;
        }
        if let Some(usage) = patch.token_usage {
            self.interaction.token_usage = Some(usage);
        }
        if let Some(kind) = patch.interaction_type {
            self.interaction.interaction_type = kind;
        }
        self.finish(true, None).await
    }

    /// Complete with a fully built interaction, keeping this scope's timing.
    pub async fn complete_success_with(mut self, interaction: LLMInteraction) -> LLMInteraction {
        let start = self.interaction.start_time_us;
        self.interaction = interaction;
        self.interaction.start_time_us = start;
        self.finish(true, None).await
    }

    /// Record the failure the caller is about to propagate.
    pub async fn complete_failure(self, error: impl Into<String>) -> LLMInteraction {
        self.finish(false, Some(error.into())).await
    }

    async fn finish(mut self, success: bool, error_message: Option<String>) -> LLMInteraction {
        let end = now_us();
        self.interaction.end_time_us = Some(end);
        self.interaction.timestamp_us = end;
        self.interaction.duration_ms = Some((end - self.interaction.start_time_us) / 1000);
        self.interaction.success = success;
        self.interaction.error_message = error_message;

        let captured = truncate_conversation_for_capture(&self.interaction, self.max_message_size);
        self.manager.trigger_llm_hooks(&captured).await;
        captured
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP capture scope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result fields patched onto the template on success.
#[derive(Debug, Default)]
pub struct McpResultPatch {
    pub tool_result: Option<Value>,
    pub available_tools: Option<HashMap<String, Vec<String>>>,
}

#[must_use = "a capture scope must be completed so the interaction is recorded"]
pub struct McpCaptureScope {
    interaction: MCPInteraction,
    manager: Arc<HookManager>,
}

impl McpCaptureScope {
    pub fn new(template: MCPInteraction, manager: Arc<HookManager>) -> Self {
        Self {
            interaction: template,
            manager,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.interaction.request_id
    }

    pub async fn complete_success(mut self, patch: McpResultPatch) -> MCPInteraction {
        if let Some(result) = patch.tool_result {
            self.interaction.tool_result = Some(result);
        }
        if let Some(tools) = patch.available_tools {
            self.interaction.available_tools = Some(tools);
        }
        self.finish(true, None).await
    }

    pub async fn complete_failure(self, error: impl Into<String>) -> MCPInteraction {
        self.finish(false, Some(error.into())).await
    }

    async fn finish(mut self, success: bool, error_message: Option<String>) -> MCPInteraction {
        let end = now_us();
        self.interaction.end_time_us = Some(end);
        self.interaction.timestamp_us = end;
        self.interaction.duration_ms = Some((end - self.interaction.start_time_us) / 1000);
        self.interaction.success = success;
        self.interaction.error_message = error_message;

        // Tool listings and tool calls feed separate registries.
        match self.interaction.communication_type {
            CommunicationType::ToolList => {
                self.manager.trigger_mcp_list_hooks(&self.interaction).await
            }
            CommunicationType::ToolCall => self.manager.trigger_mcp_hooks(&self.interaction).await,
        };
        self.interaction
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage capture scope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stage rows are built and mutated by the scheduler; the scope only fans
/// the finished row out to the stage registries. Stage hooks decide
/// create-vs-update on the `started_at_us.is_none()` predicate.
pub struct StageCaptureScope {
    manager: Arc<HookManager>,
}

impl StageCaptureScope {
    pub fn new(manager: Arc<HookManager>) -> Self {
        Self { manager }
    }

    pub async fn publish(&self, stage_execution: &StageExecution) -> HashMap<String, bool> {
        self.manager.trigger_stage_hooks(stage_execution).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::Hook;
    use parking_lot::Mutex;
    use tarsy_domain::Result;

    #[derive(Default)]
    struct CaptureSink {
        llm: Mutex<Vec<LLMInteraction>>,
    }

    struct LlmSink(Arc<CaptureSink>);

    #[async_trait::async_trait]
    impl Hook<LLMInteraction> for LlmSink {
        fn name(&self) -> &str {
            "llm-sink"
        }

        async fn execute(&self, interaction: &LLMInteraction) -> Result<()> {
            self.0.llm.lock().push(interaction.clone());
            Ok(())
        }
    }

    struct McpSink {
        calls: Arc<Mutex<Vec<MCPInteraction>>>,
    }

    #[async_trait::async_trait]
    impl Hook<MCPInteraction> for McpSink {
        fn name(&self) -> &str {
            "mcp-sink"
        }

        async fn execute(&self, interaction: &MCPInteraction) -> Result<()> {
            self.calls.lock().push(interaction.clone());
            Ok(())
        }
    }

    fn manager_with_llm_sink() -> (Arc<HookManager>, Arc<CaptureSink>) {
        let manager = Arc::new(HookManager::new());
        let sink = Arc::new(CaptureSink::default());
        manager.register_llm_hook(Arc::new(LlmSink(sink.clone())));
        (manager, sink)
    }

    #[tokio::test]
    async fn success_stamps_timing_and_fires_hooks() {
        let (manager, sink) = manager_with_llm_sink();
        let template = LLMInteraction::template("s1", None, "openai", "gpt-4o", vec![]);
        let scope = LlmCaptureScope::new(template, manager, 1_048_576);

        let recorded = scope
            .complete_success(LlmResultPatch {
                conversation: Some(vec![
                    LLMMessage::user("question"),
                    LLMMessage::assistant("answer"),
                ]),
                token_usage: Some(TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                    total_tokens: 15,
                }),
                interaction_type: None,
            })
            .await;

        assert!(recorded.success);
        let end = recorded.end_time_us.unwrap();
        assert!(end >= recorded.start_time_us);
        assert_eq!(
            recorded.duration_ms,
            Some((end - recorded.start_time_us) / 1000)
        );
        assert_eq!(recorded.timestamp_us, end);
        assert_eq!(recorded.response_text(), Some("answer"));

        let captured = sink.llm.lock();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].request_id, recorded.request_id);
    }

    #[tokio::test]
    async fn failure_records_error_and_fires_hooks() {
        let (manager, sink) = manager_with_llm_sink();
        let template = LLMInteraction::template("s1", None, "openai", "gpt-4o", vec![]);
        let scope = LlmCaptureScope::new(template, manager, 1_048_576);

        let recorded = scope.complete_failure("rate limited").await;
        assert!(!recorded.success);
        assert_eq!(recorded.error_message.as_deref(), Some("rate limited"));
        assert!(recorded.end_time_us.is_some());
        assert_eq!(sink.llm.lock().len(), 1);
    }

    #[tokio::test]
    async fn hooks_receive_truncated_copy() {
        let (manager, sink) = manager_with_llm_sink();
        let template = LLMInteraction::template("s1", None, "openai", "gpt-4o", vec![]);
        let scope = LlmCaptureScope::new(template, manager, 100);

        let recorded = scope
            .complete_success(LlmResultPatch {
                conversation: Some(vec![LLMMessage::user("u".repeat(500))]),
                ..Default::default()
            })
            .await;

        // Both the returned record and the hook payload carry the capped copy.
        assert!(recorded.conversation[0].content.contains("HOOK TRUNCATED"));
        let captured = sink.llm.lock();
        assert!(captured[0].conversation[0].content.contains("HOOK TRUNCATED"));
    }

    #[tokio::test]
    async fn mcp_scope_routes_by_communication_type() {
        let manager = Arc::new(HookManager::new());
        let tool_calls = Arc::new(Mutex::new(Vec::new()));
        let tool_lists = Arc::new(Mutex::new(Vec::new()));
        manager.register_mcp_hook(Arc::new(McpSink {
            calls: tool_calls.clone(),
        }));
        manager.register_mcp_list_hook(Arc::new(McpSink {
            calls: tool_lists.clone(),
        }));

        let call = MCPInteraction::tool_call_template(
            "s1",
            None,
            "kubernetes-server",
            "list_pods",
            serde_json::json!({"namespace": "default"}),
        );
        McpCaptureScope::new(call, manager.clone())
            .complete_success(McpResultPatch {
                tool_result: Some(serde_json::json!(["p1 Running"])),
                ..Default::default()
            })
            .await;

        let list = MCPInteraction::tool_list_template("s1", None, None);
        McpCaptureScope::new(list, manager)
            .complete_success(McpResultPatch {
                available_tools: Some(HashMap::from([(
                    "kubernetes-server".to_string(),
                    vec!["list_pods".to_string()],
                )])),
                ..Default::default()
            })
            .await;

        assert_eq!(tool_calls.lock().len(), 1);
        assert_eq!(tool_lists.lock().len(), 1);
        assert!(tool_calls.lock()[0].success);
        assert_eq!(
            tool_calls.lock()[0].tool_result,
            Some(serde_json::json!(["p1 Running"]))
        );
    }

    #[tokio::test]
    async fn stage_scope_always_publishes() {
        struct StageSink(Arc<Mutex<Vec<StageExecution>>>);

        #[async_trait::async_trait]
        impl Hook<StageExecution> for StageSink {
            fn name(&self) -> &str {
                "stage-sink"
            }

            async fn execute(&self, stage: &StageExecution) -> Result<()> {
                self.0.lock().push(stage.clone());
                Ok(())
            }
        }

        let manager = Arc::new(HookManager::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        manager.register_stage_hook(Arc::new(StageSink(seen.clone())));

        let stage = StageExecution::new("s1", "analysis", 0, "analysis", "KubernetesAgent");
        let results = StageCaptureScope::new(manager).publish(&stage).await;
        assert_eq!(results["stage-sink"], true);
        assert_eq!(seen.lock().len(), 1);
    }
}
