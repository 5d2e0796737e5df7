//! Native-thinking loop: the model emits thinking and structured tool calls
//! as first-class outputs; a response with no tool calls is the conclusion.

use serde_json::Value;

use tarsy_domain::chain::ChainContext;
use tarsy_domain::interaction::LLMMessage;
use tarsy_domain::status::InteractionType;
use tarsy_mcp::{ToolCallRequest, ToolDispatcher};

use crate::cancel::{CancelToken, CancellationTracker};
use crate::engine::{IterationEngine, LlmCallError};
use crate::outcome::AgentOutcome;
use crate::parser::split_action;
use crate::prompt::{build_initial_prompt, build_system_prompt};

impl IterationEngine {
    pub(crate) async fn run_native(
        &self,
        context: &ChainContext,
        dispatcher: &ToolDispatcher,
        cancel: &CancelToken,
        tracker: &CancellationTracker,
    ) -> AgentOutcome {
        let catalogue = dispatcher.list_available_tools(None).await;
        let tools: Vec<(String, Value)> = catalogue
            .iter()
            .flat_map(|(server, tools)| {
                tools.iter().map(move |tool| {
                    (format!("{server}.{}", tool.name), tool.input_schema.clone())
                })
            })
            .collect();

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
            tracing::debug!(iteration, agent = %self.spec.name, "native iteration");

            let (response, updated) = match self
                .llm_call(&conversation, tools.clone(), InteractionType::Normal)
                .await
            {
                Ok(ok) => ok,
                Err(LlmCallError::Timeout) => return self.timeout_outcome(tracker),
                Err(LlmCallError::Provider(error)) => return AgentOutcome::Failed { error },
            };
            conversation = updated;

            // No tool calls means the model considers the turn final.
            if response.tool_calls.is_empty() {
                return AgentOutcome::Completed {
                    analysis: response.content,
                    conversation,
                };
            }

            for call in &response.tool_calls {
                let feedback = match split_action(&call.tool_name) {
                    Some((server, tool)) => {
                        let result = dispatcher
                            .execute_tool_call(&ToolCallRequest {
                                server: server.to_owned(),
                                tool: tool.to_owned(),
                                arguments: call.arguments.clone(),
                            })
                            .await;
                        match (&result.result, &result.error) {
                            (Some(value), _) => value.to_string(),
                            (None, Some(error)) => format!("tool error: {error}"),
                            (None, None) => "tool returned no result".into(),
                        }
                    }
                    None => format!(
                        "tool error: invalid tool name '{}' - tools use the form \
                         <server>.<tool>",
                        call.tool_name
                    ),
                };
                conversation.push(LLMMessage::user(format!(
                    "Tool result for {} ({}): {feedback}",
                    call.call_id, call.tool_name
                )));
            }
        }

        self.conclude_or_pause(conversation, context).await
    }
}
