//! The iteration engine shared by both strategies.
//!
//! Owns the provider handle for the whole loop: every call inside one run,
//! including the forced conclusion, goes to the same provider. Each LLM call
//! is framed by a capture scope and bounded by the per-iteration timeout;
//! a timeout surfaces as a cancellation classified through the tracker.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use tarsy_domain::chain::ChainContext;
use tarsy_domain::interaction::{LLMInteraction, LLMMessage};
use tarsy_domain::status::{CancelCause, InteractionType, IterationStrategy};
use tarsy_hooks::{HookManager, LlmCaptureScope, LlmResultPatch};
use tarsy_mcp::ToolDispatcher;
use tarsy_providers::{ChatRequest, ChatResponse, LlmProvider};

use crate::cancel::{CancelToken, CancellationTracker};
use crate::outcome::AgentOutcome;
use crate::parser::parse_react_response;
use crate::prompt::{forced_conclusion_prompt, FALLBACK_CONCLUSION};
use crate::spec::AgentSpec;

/// Why an individual LLM call did not produce a response.
pub(crate) enum LlmCallError {
    Timeout,
    Provider(String),
}

pub struct IterationEngine {
    pub spec: AgentSpec,
    pub provider: Arc<dyn LlmProvider>,
    pub session_id: String,
    pub stage_execution_id: Option<String>,
    pub hooks: Arc<HookManager>,
    pub llm_timeout: Duration,
    pub max_message_size: usize,
}

impl IterationEngine {
    /// Drive the agent's loop to an outcome.
    pub async fn run(
        &self,
        context: &ChainContext,
        dispatcher: &ToolDispatcher,
        cancel: &CancelToken,
        tracker: &CancellationTracker,
    ) -> AgentOutcome {
        let span = tracing::info_span!(
            "agent.run",
            agent = %self.spec.name,
            session_id = %self.session_id,
            strategy = ?self.spec.strategy,
        );
        let _guard = span.enter();

        match self.spec.strategy {
            IterationStrategy::React => self.run_react(context, dispatcher, cancel, tracker).await,
            IterationStrategy::NativeThinking => {
                self.run_native(context, dispatcher, cancel, tracker).await
            }
        }
    }

    /// One captured LLM call. On success the assistant reply is appended to
    /// the conversation and both are returned.
    pub(crate) async fn llm_call(
        &self,
        conversation: &[LLMMessage],
        tools: Vec<(String, Value)>,
        interaction_type: InteractionType,
    ) -> Result<(ChatResponse, Vec<LLMMessage>), LlmCallError> {
        let mut template = LLMInteraction::template(
            &self.session_id,
            self.stage_execution_id.clone(),
            self.provider.provider_id(),
            self.provider.model_name(),
            conversation.to_vec(),
        );
        template.interaction_type = interaction_type;
        let scope = LlmCaptureScope::new(template, self.hooks.clone(), self.max_message_size);

        let request = ChatRequest {
            conversation: conversation.to_vec(),
            tools,
            temperature: Some(0.2),
            max_tokens: None,
        };

        match tokio::time::timeout(self.llm_timeout, self.provider.chat(request)).await {
            Ok(Ok(response)) => {
                let mut updated = conversation.to_vec();
                updated.push(LLMMessage::assistant(&response.content));
                scope
                    .complete_success(LlmResultPatch {
                        conversation: Some(updated.clone()),
                        token_usage: response.token_usage,
                        interaction_type: Some(interaction_type),
                    })
                    .await;
                Ok((response, updated))
            }
            Ok(Err(e)) => {
                let message = e.to_string();
                scope.complete_failure(message.clone()).await;
                Err(LlmCallError::Provider(message))
            }
            Err(_) => {
                scope
                    .complete_failure(format!(
                        "LLM call timed out after {}s",
                        self.llm_timeout.as_secs()
                    ))
                    .await;
                Err(LlmCallError::Timeout)
            }
        }
    }

    /// Classify a torn-down loop through the tracker.
    pub(crate) fn cancelled_outcome(&self, tracker: &CancellationTracker) -> AgentOutcome {
        AgentOutcome::Cancelled {
            cause: tracker.classify(&self.session_id),
        }
    }

    /// A timeout is a cancellation; the tracker decides whether a user
    /// cancel raced it.
    pub(crate) fn timeout_outcome(&self, tracker: &CancellationTracker) -> AgentOutcome {
        if tracker.is_user_cancel(&self.session_id) {
            AgentOutcome::Cancelled {
                cause: CancelCause::UserCancel,
            }
        } else {
            AgentOutcome::Cancelled {
                cause: CancelCause::Timeout,
            }
        }
    }

    /// Budget exhausted without a final answer: force a conclusion when the
    /// flag or a chat context demands one, otherwise pause the stage.
    pub(crate) async fn conclude_or_pause(
        &self,
        mut conversation: Vec<LLMMessage>,
        context: &ChainContext,
    ) -> AgentOutcome {
        if !self.spec.force_conclusion && !context.is_chat_stage() {
            return AgentOutcome::Paused {
                iteration: self.spec.max_iterations,
            };
        }

        conversation.push(LLMMessage::user(forced_conclusion_prompt(
            self.spec.strategy,
        )));
        match self
            .llm_call(&conversation, vec![], InteractionType::ForcedConclusion)
            .await
        {
            Ok((response, updated)) => {
                let analysis = match self.spec.strategy {
                    IterationStrategy::React => parse_react_response(&response.content)
                        .final_answer
                        .unwrap_or(response.content),
                    IterationStrategy::NativeThinking => response.content,
                };
                let analysis = if analysis.trim().is_empty() {
                    FALLBACK_CONCLUSION.to_string()
                } else {
                    analysis
                };
                AgentOutcome::Completed {
                    analysis,
                    conversation: updated,
                }
            }
            Err(_) => {
                tracing::warn!(
                    agent = %self.spec.name,
                    "forced conclusion call failed, returning fallback summary"
                );
                AgentOutcome::Completed {
                    analysis: FALLBACK_CONCLUSION.to_string(),
                    conversation,
                }
            }
        }
    }
}
