use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::chain::ChainDefinition;
use crate::error::{Error, Result};
use crate::status::IterationStrategy;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent / chain registry (YAML)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The YAML registry document: three top-level maps.
///
/// ```yaml
/// agents:
///   KubernetesAgent:
///     mcp_servers: [kubernetes-server]
/// mcp_servers:
///   kubernetes-server:
///     transport: stdio
///     command: kubectl-mcp
/// agent_chains:
///   kubernetes:
///     alert_types: [kubernetes]
///     stages:
///       - name: analysis
///         agent: KubernetesAgent
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentRegistry {
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
    #[serde(default)]
    pub mcp_servers: HashMap<String, McpServerSpec>,
    #[serde(default)]
    pub agent_chains: HashMap<String, ChainDefinitionSpec>,
}

/// One configured agent: its tool servers and loop parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    #[serde(default)]
    pub mcp_servers: Vec<String>,
    #[serde(default)]
    pub iteration_strategy: IterationStrategy,
    #[serde(default)]
    pub llm_provider: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub force_conclusion_at_max_iterations: bool,
    #[serde(default)]
    pub custom_instructions: Option<String>,
}

/// One configured tool server. The wire transport is handled by the MCP
/// layer; the registry only needs identity and launch parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpServerSpec {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub transport: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Chain definition as written in YAML; `chain_id` is the map key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainDefinitionSpec {
    #[serde(default)]
    pub alert_types: Vec<String>,
    pub stages: Vec<crate::chain::StageConfig>,
    #[serde(default)]
    pub description: Option<String>,
}

impl AgentRegistry {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| Error::Config(format!("agent registry: {e}")))
    }

    /// Validate the registry against the built-in agent class names and
    /// server ids. Called once at startup; any issue is startup-fatal.
    pub fn validate(&self, builtin_agents: &[&str], builtin_servers: &[&str]) -> Result<()> {
        for name in self.agents.keys() {
            if builtin_agents.contains(&name.as_str()) {
                return Err(Error::Config(format!(
                    "agent '{name}' collides with a built-in agent class"
                )));
            }
        }

        for id in self.mcp_servers.keys() {
            if builtin_servers.contains(&id.as_str()) {
                return Err(Error::Config(format!(
                    "MCP server '{id}' collides with a built-in server id"
                )));
            }
        }

        for (name, agent) in &self.agents {
            for server in &agent.mcp_servers {
                if !self.mcp_servers.contains_key(server)
                    && !builtin_servers.contains(&server.as_str())
                {
                    return Err(Error::Config(format!(
                        "agent '{name}' references unknown MCP server '{server}'"
                    )));
                }
            }
        }

        for (chain_id, chain) in &self.agent_chains {
            if chain.stages.is_empty() {
                return Err(Error::Config(format!("chain '{chain_id}' has no stages")));
            }
            for stage in &chain.stages {
                stage.shape().map_err(|e| {
                    Error::Config(format!("chain '{chain_id}': {e}"))
                })?;
            }
        }

        Ok(())
    }

    /// Resolve the chain handling a given alert type.
    pub fn chain_for_alert_type(&self, alert_type: &str) -> Option<ChainDefinition> {
        self.agent_chains
            .iter()
            .find(|(chain_id, spec)| {
                spec.alert_types.iter().any(|t| t == alert_type) || *chain_id == alert_type
            })
            .map(|(chain_id, spec)| ChainDefinition {
                chain_id: chain_id.clone(),
                alert_types: spec.alert_types.clone(),
                stages: spec.stages.clone(),
                description: spec.description.clone(),
            })
    }

    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
agents:
  KubernetesAgent:
    mcp_servers: [kubernetes-server]
    max_iterations: 6
  AwsAgent:
    mcp_servers: [aws-server]
    iteration_strategy: native-thinking

mcp_servers:
  kubernetes-server:
    transport: stdio
    command: kubectl-mcp
  aws-server:
    transport: stdio
    command: aws-mcp

agent_chains:
  kubernetes:
    alert_types: [kubernetes, pod_crash]
    stages:
      - name: analysis
        agent: KubernetesAgent
        max_iterations: 3
  multi-cloud:
    alert_types: [cloud_incident]
    stages:
      - name: investigate
        agents: [KubernetesAgent, AwsAgent]
        success_policy: any
      - name: summarize
        agent: KubernetesAgent
"#;

    #[test]
    fn parses_and_validates_sample() {
        let registry = AgentRegistry::from_yaml(SAMPLE).unwrap();
        registry.validate(&[], &[]).unwrap();
        assert_eq!(registry.agents.len(), 2);
        assert_eq!(registry.agent_chains.len(), 2);
    }

    #[test]
    fn chain_lookup_by_alert_type() {
        let registry = AgentRegistry::from_yaml(SAMPLE).unwrap();
        let chain = registry.chain_for_alert_type("pod_crash").unwrap();
        assert_eq!(chain.chain_id, "kubernetes");
        assert_eq!(chain.stages.len(), 1);
        assert!(registry.chain_for_alert_type("unmatched").is_none());
    }

    #[test]
    fn rejects_builtin_agent_collision() {
        let registry = AgentRegistry::from_yaml(SAMPLE).unwrap();
        let err = registry.validate(&["KubernetesAgent"], &[]).unwrap_err();
        assert!(err.to_string().contains("collides with a built-in agent"));
    }

    #[test]
    fn rejects_builtin_server_collision() {
        let registry = AgentRegistry::from_yaml(SAMPLE).unwrap();
        let err = registry.validate(&[], &["aws-server"]).unwrap_err();
        assert!(err.to_string().contains("collides with a built-in server"));
    }

    #[test]
    fn rejects_dangling_mcp_reference() {
        let raw = r#"
agents:
  LonelyAgent:
    mcp_servers: [ghost-server]
agent_chains:
  c:
    stages:
      - name: s
        agent: LonelyAgent
"#;
        let registry = AgentRegistry::from_yaml(raw).unwrap();
        let err = registry.validate(&[], &[]).unwrap_err();
        assert!(err.to_string().contains("ghost-server"));
    }

    #[test]
    fn builtin_server_reference_is_allowed() {
        let raw = r#"
agents:
  K8sAgent:
    mcp_servers: [builtin-k8s]
agent_chains:
  c:
    stages:
      - name: s
        agent: K8sAgent
"#;
        let registry = AgentRegistry::from_yaml(raw).unwrap();
        registry.validate(&[], &["builtin-k8s"]).unwrap();
    }

    #[test]
    fn rejects_bad_stage_shape() {
        let raw = r#"
agent_chains:
  broken:
    stages:
      - name: s
        agent: A
        agents: [B, C]
"#;
        let registry = AgentRegistry::from_yaml(raw).unwrap();
        let err = registry.validate(&[], &[]).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn rejects_empty_chain() {
        let raw = r#"
agent_chains:
  empty:
    stages: []
"#;
        let registry = AgentRegistry::from_yaml(raw).unwrap();
        assert!(registry.validate(&[], &[]).is_err());
    }

    #[test]
    fn rejects_bad_enum_value() {
        let raw = r#"
agents:
  A:
    iteration_strategy: chain-of-thought
"#;
        assert!(AgentRegistry::from_yaml(raw).is_err());
    }
}
