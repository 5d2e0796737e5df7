//! Allow-list resolution.
//!
//! An agent carries a static server list; a session may narrow it through
//! its `mcp` selection. Resolution happens before any stage runs so bad
//! selections reject the session with the requested and available sets.

use std::collections::HashMap;

use tarsy_domain::alert::MCPSelectionConfig;
use tarsy_domain::{Error, Result};

/// Effective allow-list: `server -> allowed tools` (`None` = every tool the
/// server advertises).
pub type EffectiveSelection = HashMap<String, Option<Vec<String>>>;

/// Resolve the session selection against the agent's server list.
///
/// - No selection: the agent's servers, all tools allowed.
/// - With a selection: exactly the named servers, which must all be servers
///   the agent is willing to use.
pub fn resolve_selection(
    agent_servers: &[String],
    selection: Option<&MCPSelectionConfig>,
) -> Result<EffectiveSelection> {
    match selection {
        None => Ok(agent_servers
            .iter()
            .map(|name| (name.clone(), None))
            .collect()),
        Some(config) => {
            let requested = config.server_names();
            let unknown: Vec<&String> = requested
                .iter()
                .filter(|name| !agent_servers.contains(name))
                .collect();
            if !unknown.is_empty() {
                return Err(Error::McpServerSelection {
                    requested,
                    available: agent_servers.to_vec(),
                });
            }
            Ok(config
                .servers
                .iter()
                .map(|s| (s.name.clone(), s.tools.clone()))
                .collect())
        }
    }
}

/// Validate a tool narrowing against a server's advertised tools.
pub fn validate_tool_selection(
    server: &str,
    requested: &[String],
    advertised: &[String],
) -> Result<()> {
    let unknown: Vec<&String> = requested
        .iter()
        .filter(|tool| !advertised.contains(tool))
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(Error::McpToolSelection {
            server: server.to_owned(),
            requested: requested.to_vec(),
            available: advertised.to_vec(),
        })
    }
}
