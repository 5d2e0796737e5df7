//! Prompt composition.
//!
//! The initial conversation is built from the alert payload, the runbook,
//! previous stage outputs, the tool catalogue, and (for chat stages) the
//! pending user message. Forced-conclusion prompts come in one variant per
//! strategy.

use std::collections::HashMap;

use tarsy_domain::chain::ChainContext;
use tarsy_domain::status::IterationStrategy;
use tarsy_mcp::ToolDefinition;

/// Fallback returned when a forced-conclusion call itself fails; must be
/// non-empty so the chain can make progress.
pub const FALLBACK_CONCLUSION: &str =
    "Analysis incomplete: unable to conclude within the iteration budget.";

pub fn build_system_prompt(agent_name: &str, custom_instructions: Option<&str>) -> String {
    let mut prompt = format!(
        "You are {agent_name}, a site-reliability agent investigating an incoming alert. \
         Work step by step, use the available tools to gather evidence, and finish with a \
         concise root-cause analysis and recommended actions."
    );
    if let Some(instructions) = custom_instructions {
        prompt.push_str("\n\n");
        prompt.push_str(instructions);
    }
    prompt
}

pub fn build_initial_prompt(
    context: &ChainContext,
    tools: &HashMap<String, Vec<ToolDefinition>>,
    strategy: IterationStrategy,
) -> String {
    let alert = &context.processing_alert;
    let mut prompt = format!(
        "## Alert\n\nType: {}\nSeverity: {}\nData:\n{}\n",
        alert.alert_type,
        alert.severity,
        serde_json::to_string_pretty(&alert.data).unwrap_or_else(|_| "{}".into()),
    );

    if let Some(runbook) = &alert.runbook {
        prompt.push_str(&format!("\n## Runbook\n\n{runbook}\n"));
    }

    let previous: Vec<String> = context
        .stage_outputs()
        .map(|(key, output)| format!("### {key}\n\n{}", output.result_summary()))
        .collect();
    if !previous.is_empty() {
        prompt.push_str("\n## Previous stage results\n\n");
        prompt.push_str(&previous.join("\n\n"));
        prompt.push('\n');
    }

    if let Some(chat) = &context.chat_context {
        prompt.push_str(&format!("\n## User message\n\n{chat}\n"));
    }

    prompt.push_str("\n## Available tools\n\n");
    prompt.push_str(&format_tool_catalogue(tools));

    if strategy == IterationStrategy::React {
        prompt.push_str("\n\n");
        prompt.push_str(REACT_INSTRUCTIONS);
    }
    prompt
}

pub fn format_tool_catalogue(tools: &HashMap<String, Vec<ToolDefinition>>) -> String {
    let mut servers: Vec<&String> = tools.keys().collect();
    servers.sort();
    let mut lines = Vec::new();
    for server in servers {
        for tool in &tools[server] {
            let description = tool.description.as_deref().unwrap_or("");
            lines.push(format!("- {server}.{}: {description}", tool.name));
        }
    }
    if lines.is_empty() {
        "(no tools available)".into()
    } else {
        lines.join("\n")
    }
}

const REACT_INSTRUCTIONS: &str = "\
Answer using the following format, one section per line:

Thought: your reasoning about the next step
Action: <server>.<tool>
Action Input: JSON arguments for the tool

After each action you will receive an Observation with the tool result.
When you have enough evidence, respond with:

Thought: your closing reasoning
Final Answer: your complete analysis";

/// One extra prompt issued when the budget is exhausted and policy requires
/// an answer anyway.
pub fn forced_conclusion_prompt(strategy: IterationStrategy) -> &'static str {
    match strategy {
        IterationStrategy::React => {
            "You have reached the maximum number of investigation steps. Do not request \
             any more tools. Based on everything gathered so far, respond now with your \
             'Final Answer:' containing the complete analysis."
        }
        IterationStrategy::NativeThinking => {
            "You have reached the maximum number of investigation steps. Do not call any \
             more tools. Summarize everything gathered so far into your final analysis \
             and respond with it now."
        }
    }
}
