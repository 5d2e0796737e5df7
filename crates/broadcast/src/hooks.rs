//! Dashboard-side capture hooks.
//!
//! Mirror images of the history hooks: each builds an interaction envelope
//! from the typed record and broadcasts it on the session channel.

use std::sync::Arc;

use tarsy_domain::interaction::{LLMInteraction, MCPInteraction};
use tarsy_domain::session::StageExecution;
use tarsy_domain::status::StageStatus;
use tarsy_domain::Result;
use tarsy_hooks::Hook;

use crate::broadcaster::Broadcaster;
use crate::envelope::{session_channel, Envelope};
use crate::stream::{chunk_response, StreamingPublisher};

pub struct LlmDashboardHook {
    broadcaster: Arc<Broadcaster>,
}

impl LlmDashboardHook {
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self { broadcaster }
    }
}

#[async_trait::async_trait]
impl Hook<LLMInteraction> for LlmDashboardHook {
    fn name(&self) -> &str {
        "llm_dashboard"
    }

    async fn execute(&self, interaction: &LLMInteraction) -> Result<()> {
        let envelope = Envelope::LlmInteraction {
            session_id: interaction.session_id.clone(),
            request_id: interaction.request_id.clone(),
            provider: interaction.provider.clone(),
            model_name: interaction.model_name.clone(),
            step_description: if interaction.step_description.is_empty() {
                interaction.default_step_description()
            } else {
                interaction.step_description.clone()
            },
            system_prompt: interaction.system_prompt().map(str::to_owned),
            user_prompt: interaction.user_prompt().map(str::to_owned),
            response_text: interaction.response_text().map(str::to_owned),
            success: interaction.success,
            error_message: interaction.error_message.clone(),
            duration_ms: interaction.duration_ms,
            token_usage: interaction.token_usage,
            timestamp_us: interaction.timestamp_us,
        };
        self.broadcaster
            .broadcast(&session_channel(&interaction.session_id), &envelope)
            .await;
        Ok(())
    }
}

/// Optional streaming mirror of the LLM hook: decomposes successful
/// responses into chunk envelopes. Registered only when streaming is
/// enabled in settings.
pub struct LlmStreamingHook {
    publisher: StreamingPublisher,
}

impl LlmStreamingHook {
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            publisher: StreamingPublisher::new(broadcaster),
        }
    }
}

#[async_trait::async_trait]
impl Hook<LLMInteraction> for LlmStreamingHook {
    fn name(&self) -> &str {
        "llm_streaming"
    }

    async fn execute(&self, interaction: &LLMInteraction) -> Result<()> {
        if !interaction.success {
            return Ok(());
        }
        let Some(response) = interaction.response_text() else {
            return Ok(());
        };
        let chunks = chunk_response(None, response);
        self.publisher
            .publish(
                &interaction.session_id,
                &interaction.request_id,
                &chunks,
                response,
            )
            .await;
        Ok(())
    }
}

pub struct McpDashboardHook {
    broadcaster: Arc<Broadcaster>,
}

impl McpDashboardHook {
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self { broadcaster }
    }
}

#[async_trait::async_trait]
impl Hook<MCPInteraction> for McpDashboardHook {
    fn name(&self) -> &str {
        "mcp_dashboard"
    }

    async fn execute(&self, interaction: &MCPInteraction) -> Result<()> {
        let envelope = Envelope::McpInteraction {
            session_id: interaction.session_id.clone(),
            request_id: interaction.request_id.clone(),
            server_name: interaction.server_name.clone(),
            tool_name: interaction.tool_name.clone(),
            communication_type: interaction.communication_type.as_str().to_owned(),
            step_description: if interaction.step_description.is_empty() {
                interaction.default_step_description()
            } else {
                interaction.step_description.clone()
            },
            tool_arguments: interaction.tool_arguments.clone(),
            tool_result: interaction.tool_result.clone(),
            success: interaction.success,
            error_message: interaction.error_message.clone(),
            duration_ms: interaction.duration_ms,
            timestamp_us: interaction.timestamp_us,
        };
        self.broadcaster
            .broadcast(&session_channel(&interaction.session_id), &envelope)
            .await;
        Ok(())
    }
}

pub struct McpListDashboardHook {
    broadcaster: Arc<Broadcaster>,
}

impl McpListDashboardHook {
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self { broadcaster }
    }
}

#[async_trait::async_trait]
impl Hook<MCPInteraction> for McpListDashboardHook {
    fn name(&self) -> &str {
        "mcp_list_dashboard"
    }

    async fn execute(&self, interaction: &MCPInteraction) -> Result<()> {
        let tool_count = interaction
            .available_tools
            .as_ref()
            .map(|tools| tools.values().map(Vec::len).sum())
            .unwrap_or(0);
        let envelope = Envelope::McpToolList {
            session_id: interaction.session_id.clone(),
            request_id: interaction.request_id.clone(),
            server_name: interaction.server_name.clone(),
            step_description: if interaction.step_description.is_empty() {
                interaction.default_step_description()
            } else {
                interaction.step_description.clone()
            },
            available_tools: interaction.available_tools.clone(),
            tool_count,
            success: interaction.success,
            error_message: interaction.error_message.clone(),
            duration_ms: interaction.duration_ms,
            timestamp_us: interaction.timestamp_us,
        };
        self.broadcaster
            .broadcast(&session_channel(&interaction.session_id), &envelope)
            .await;
        Ok(())
    }
}

pub struct StageDashboardHook {
    broadcaster: Arc<Broadcaster>,
}

impl StageDashboardHook {
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self { broadcaster }
    }
}

#[async_trait::async_trait]
impl Hook<StageExecution> for StageDashboardHook {
    fn name(&self) -> &str {
        "stage_dashboard"
    }

    async fn execute(&self, stage: &StageExecution) -> Result<()> {
        let envelope = if stage.status == StageStatus::Active || stage.started_at_us.is_none() {
            Envelope::StageStarted {
                session_id: stage.session_id.clone(),
                stage_execution_id: stage.execution_id.clone(),
                stage_name: stage.stage_name.clone(),
                agent: stage.agent.clone(),
                timestamp_us: stage.started_at_us.unwrap_or_else(tarsy_domain::now_us),
            }
        } else {
            Envelope::StageCompleted {
                session_id: stage.session_id.clone(),
                stage_execution_id: stage.execution_id.clone(),
                stage_name: stage.stage_name.clone(),
                agent: stage.agent.clone(),
                status: stage.status.as_str().to_owned(),
                timestamp_us: stage.completed_at_us.unwrap_or_else(tarsy_domain::now_us),
            }
        };
        self.broadcaster
            .broadcast(&session_channel(&stage.session_id), &envelope)
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionManager;
    use crate::subscription::SubscriptionAction;
    use serde_json::Value;
    use tarsy_domain::interaction::LLMMessage;
    use tokio::sync::mpsc;

    fn broadcaster_with_session_subscriber(
        session_id: &str,
    ) -> (Arc<Broadcaster>, mpsc::Receiver<String>) {
        let connections = Arc::new(ConnectionManager::new());
        let (tx, rx) = mpsc::channel(64);
        connections.connect("viewer", tx);
        connections.handle_subscription(
            "viewer",
            SubscriptionAction::Subscribe,
            &session_channel(session_id),
        );
        (Arc::new(Broadcaster::new(connections)), rx)
    }

    #[tokio::test]
    async fn llm_hook_broadcasts_interaction_envelope() {
        let (broadcaster, mut rx) = broadcaster_with_session_subscriber("s1");
        let hook = LlmDashboardHook::new(broadcaster);

        let mut interaction = LLMInteraction::template(
            "s1",
            None,
            "openai",
            "gpt-4o",
            vec![LLMMessage::user("q"), LLMMessage::assistant("a")],
        );
        interaction.success = true;
        hook.execute(&interaction).await.unwrap();

        let value: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(value["type"], "llm_interaction");
        assert_eq!(value["response_text"], "a");
        assert_eq!(value["step_description"], "LLM analysis using gpt-4o");
    }

    #[tokio::test]
    async fn list_hook_counts_tools() {
        let (broadcaster, mut rx) = broadcaster_with_session_subscriber("s1");
        let hook = McpListDashboardHook::new(broadcaster);

        let mut interaction = MCPInteraction::tool_list_template("s1", None, None);
        interaction.available_tools = Some(
            [
                ("k8s".to_string(), vec!["a".to_string(), "b".to_string()]),
                ("aws".to_string(), vec!["c".to_string()]),
            ]
            .into(),
        );
        hook.execute(&interaction).await.unwrap();

        let value: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(value["type"], "mcp_tool_list");
        assert_eq!(value["tool_count"], 3);
    }

    #[tokio::test]
    async fn stage_hook_distinguishes_started_from_completed() {
        let (broadcaster, mut rx) = broadcaster_with_session_subscriber("s1");
        let hook = StageDashboardHook::new(broadcaster);

        let mut stage = StageExecution::new("s1", "analysis", 0, "analysis", "K8sAgent");
        stage.start();
        hook.execute(&stage).await.unwrap();
        let value: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(value["type"], "stage.started");

        stage.finish(StageStatus::Completed, None);
        hook.execute(&stage).await.unwrap();
        let value: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(value["type"], "stage.completed");
        assert_eq!(value["status"], "completed");
    }
}
