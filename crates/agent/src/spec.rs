//! The bound agent: loop parameters resolved across configuration layers.

use tarsy_domain::chain::{ExecutionConfig, StageConfig, SynthesisConfig};
use tarsy_domain::config::AgentConfig;
use tarsy_domain::status::IterationStrategy;

/// Everything the engine needs to run one agent, after resolving the
/// agent's registry entry, the stage overrides, and any per-child execution
/// config (parallel fan-outs). Later layers win field by field.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub name: String,
    /// Provider override. `None` means "use the global default" and is
    /// propagated as-is; it is never resolved to a concrete name here.
    pub llm_provider: Option<String>,
    pub strategy: IterationStrategy,
    pub max_iterations: u32,
    pub force_conclusion: bool,
    pub mcp_servers: Vec<String>,
    pub custom_instructions: Option<String>,
}

impl AgentSpec {
    pub fn resolve(
        name: &str,
        agent: &AgentConfig,
        stage: &StageConfig,
        overrides: Option<&ExecutionConfig>,
        default_max_iterations: u32,
    ) -> Self {
        let mut spec = Self {
            name: name.to_owned(),
            llm_provider: agent.llm_provider.clone(),
            strategy: agent.iteration_strategy,
            max_iterations: agent.max_iterations.unwrap_or(default_max_iterations),
            force_conclusion: agent.force_conclusion_at_max_iterations,
            mcp_servers: agent.mcp_servers.clone(),
            custom_instructions: agent.custom_instructions.clone(),
        };

        if let Some(strategy) = stage.iteration_strategy {
            spec.strategy = strategy;
        }
        if stage.llm_provider.is_some() {
            spec.llm_provider = stage.llm_provider.clone();
        }
        if let Some(max) = stage.max_iterations {
            spec.max_iterations = max;
        }
        if let Some(force) = stage.force_conclusion_at_max_iterations {
            spec.force_conclusion = force;
        }
        if let Some(servers) = &stage.mcp_servers {
            spec.mcp_servers = servers.clone();
        }

        if let Some(overrides) = overrides {
            if let Some(strategy) = overrides.iteration_strategy {
                spec.strategy = strategy;
            }
            if overrides.llm_provider.is_some() {
                spec.llm_provider = overrides.llm_provider.clone();
            }
            if let Some(max) = overrides.max_iterations {
                spec.max_iterations = max;
            }
            if let Some(force) = overrides.force_conclusion {
                spec.force_conclusion = force;
            }
            if let Some(servers) = &overrides.mcp_servers {
                spec.mcp_servers = servers.clone();
            }
        }

        spec
    }

    /// Spec for a synthesis agent run on collected parallel results.
    pub fn for_synthesis(
        synthesis: &SynthesisConfig,
        agent: &AgentConfig,
        default_max_iterations: u32,
    ) -> Self {
        Self {
            name: synthesis
                .agent
                .clone()
                .unwrap_or_else(|| "SynthesisAgent".into()),
            llm_provider: synthesis.llm_provider.clone().or_else(|| agent.llm_provider.clone()),
            strategy: synthesis
                .iteration_strategy
                .unwrap_or(agent.iteration_strategy),
            max_iterations: synthesis
                .max_iterations
                .or(agent.max_iterations)
                .unwrap_or(default_max_iterations),
            // Synthesis must produce an answer; pausing it would strand the
            // whole parallel stage.
            force_conclusion: true,
            mcp_servers: Vec::new(),
            custom_instructions: agent.custom_instructions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarsy_domain::status::SuccessPolicy;

    fn agent() -> AgentConfig {
        AgentConfig {
            mcp_servers: vec!["kubernetes-server".into()],
            iteration_strategy: IterationStrategy::React,
            llm_provider: None,
            max_iterations: Some(6),
            force_conclusion_at_max_iterations: false,
            custom_instructions: None,
        }
    }

    fn stage() -> StageConfig {
        StageConfig {
            name: "analysis".into(),
            id: None,
            agent: Some("KubernetesAgent".into()),
            agents: vec![],
            replicas: None,
            iteration_strategy: None,
            llm_provider: None,
            max_iterations: None,
            force_conclusion_at_max_iterations: None,
            mcp_servers: None,
            success_policy: SuccessPolicy::default(),
            synthesis: None,
        }
    }

    #[test]
    fn agent_defaults_flow_through() {
        let spec = AgentSpec::resolve("KubernetesAgent", &agent(), &stage(), None, 10);
        assert_eq!(spec.max_iterations, 6);
        assert_eq!(spec.strategy, IterationStrategy::React);
        assert!(spec.llm_provider.is_none());
        assert!(!spec.force_conclusion);
    }

    #[test]
    fn global_default_applies_when_agent_has_no_budget() {
        let mut config = agent();
        config.max_iterations = None;
        let spec = AgentSpec::resolve("A", &config, &stage(), None, 10);
        assert_eq!(spec.max_iterations, 10);
    }

    #[test]
    fn stage_overrides_agent() {
        let mut s = stage();
        s.max_iterations = Some(3);
        s.force_conclusion_at_max_iterations = Some(true);
        s.llm_provider = Some("anthropic-default".into());
        let spec = AgentSpec::resolve("A", &agent(), &s, None, 10);
        assert_eq!(spec.max_iterations, 3);
        assert!(spec.force_conclusion);
        assert_eq!(spec.llm_provider.as_deref(), Some("anthropic-default"));
    }

    #[test]
    fn execution_config_overrides_stage() {
        let mut s = stage();
        s.max_iterations = Some(3);
        let overrides = ExecutionConfig {
            llm_provider: Some("xai-default".into()),
            iteration_strategy: Some(IterationStrategy::NativeThinking),
            max_iterations: Some(2),
            force_conclusion: Some(true),
            mcp_servers: Some(vec!["aws-server".into()]),
        };
        let spec = AgentSpec::resolve("A", &agent(), &s, Some(&overrides), 10);
        assert_eq!(spec.max_iterations, 2);
        assert_eq!(spec.strategy, IterationStrategy::NativeThinking);
        assert_eq!(spec.llm_provider.as_deref(), Some("xai-default"));
        assert_eq!(spec.mcp_servers, vec!["aws-server".to_string()]);
    }

    #[test]
    fn synthesis_spec_always_forces_conclusion() {
        let synthesis = SynthesisConfig::default();
        let spec = AgentSpec::for_synthesis(&synthesis, &agent(), 10);
        assert_eq!(spec.name, "SynthesisAgent");
        assert!(spec.force_conclusion);
        assert!(spec.mcp_servers.is_empty());
    }
}
