//! ReAct loop: one assistant message per iteration, parsed into
//! thought / action / final answer; tool results return as observations.

use tarsy_domain::chain::ChainContext;
use tarsy_domain::interaction::LLMMessage;
use tarsy_domain::status::InteractionType;
use tarsy_mcp::{ToolCallRequest, ToolDispatcher};

use crate::cancel::{CancelToken, CancellationTracker};
use crate::engine::{IterationEngine, LlmCallError};
use crate::outcome::AgentOutcome;
use crate::parser::{parse_react_response, split_action};
use crate::prompt::{build_initial_prompt, build_system_prompt};

impl IterationEngine {
    pub(crate) async fn run_react(
        &self,
        context: &ChainContext,
        dispatcher: &ToolDispatcher,
        cancel: &CancelToken,
        tracker: &CancellationTracker,
    ) -> AgentOutcome {
        let catalogue = dispatcher.list_available_tools(None).await;
        let mut conversation = vec![
            LLMMessage::system(build_system_prompt(
                &self.spec.name,
                self.spec.custom_instructions.as_deref(),
            )),
            LLMMessage::user(build_initial_prompt(
                context,
                &catalogue,
                self.spec.strategy,
            )),
        ];

        for iteration in 1..=self.spec.max_iterations {
            if cancel.is_cancelled() {
                return self.cancelled_outcome(tracker);
            }
            tracing::debug!(iteration, agent = %self.spec.name, "react iteration");

            let (response, updated) = match self
                .llm_call(&conversation, vec![], InteractionType::Normal)
                .await
            {
                Ok(ok) => ok,
                Err(LlmCallError::Timeout) => return self.timeout_outcome(tracker),
                Err(LlmCallError::Provider(error)) => return AgentOutcome::Failed { error },
            };
            conversation = updated;

            let parsed = parse_react_response(&response.content);
            if let Some(final_answer) = parsed.final_answer {
                return AgentOutcome::Completed {
                    analysis: final_answer,
                    conversation,
                };
            }

            match parsed.action {
                Some(action) => match split_action(&action) {
                    Some((server, tool)) => {
                        let result = dispatcher
                            .execute_tool_call(&ToolCallRequest {
                                server: server.to_owned(),
                                tool: tool.to_owned(),
                                arguments: parsed
                                    .action_input
                                    .unwrap_or_else(|| serde_json::json!({})),
                            })
                            .await;
                        let observation = match (&result.result, &result.error) {
                            (Some(value), _) => value.to_string(),
                            // Errors are learning signals for the model.
                            (None, Some(error)) => format!("tool error: {error}"),
                            (None, None) => "tool returned no result".into(),
                        };
                        conversation
                            .push(LLMMessage::user(format!("Observation: {observation}")));
                    }
                    None => {
                        conversation.push(LLMMessage::user(format!(
                            "Observation: invalid action '{action}' - actions use the form \
                             <server>.<tool>"
                        )));
                    }
                },
                None => {
                    conversation.push(LLMMessage::user(
                        "Observation: your response did not contain an Action or a Final \
                         Answer. Follow the required format.",
                    ));
                }
            }
        }

        self.conclude_or_pause(conversation, context).await
    }
}
