//! Chain runtime: session lifecycle, the chain scheduler, the parallel
//! stage executor, and the per-agent cancellation path.
//!
//! One tokio task owns a session end-to-end; inside it the scheduler walks
//! the chain stage by stage, funnelling every LLM and tool call through the
//! capture fabric.

pub mod cancel_agent;
pub mod cancel_map;
pub mod errors;
pub mod parallel;
pub mod scheduler;
pub mod session;


use std::collections::HashMap;
use std::sync::Arc;

use tarsy_agent::AgentSpec;
use tarsy_domain::chain::ChainContext;
use tarsy_domain::{Error, Result};
use tarsy_mcp::{resolve_selection, McpServer, ToolDispatcher};

use crate::state::AppState;

/// Build the tool dispatcher for one agent execution: resolve the session's
/// MCP selection against the agent's server list and bind the connected
/// server handles.
pub(crate) fn build_dispatcher(
    state: &AppState,
    context: &ChainContext,
    spec: &AgentSpec,
    stage_execution_id: Option<String>,
) -> Result<ToolDispatcher> {
    let allowed = resolve_selection(&spec.mcp_servers, context.mcp.as_ref())?;
    let mut servers: HashMap<String, Arc<dyn McpServer>> = HashMap::new();
    for name in allowed.keys() {
        match state.mcp_servers.get(name) {
            Some(server) => {
                servers.insert(name.clone(), server.clone());
            }
            None => {
                return Err(Error::Config(format!(
                    "agent '{}' requires MCP server '{name}' which is not connected",
                    spec.name
                )));
            }
        }
    }
    Ok(ToolDispatcher::new(
        context.session_id.clone(),
        stage_execution_id,
        servers,
        allowed,
        state.hooks.clone(),
    ))
}
