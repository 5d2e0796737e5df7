//! Chain definitions, the cumulative chain context, and stage results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::alert::{MCPSelectionConfig, ProcessingAlert};
use crate::error::{Error, Result};
use crate::interaction::{LLMMessage, TokenUsage};
use crate::status::{IterationStrategy, ParallelType, StageStatus, SuccessPolicy};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chain definition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ordered stages selected for one alert type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainDefinition {
    pub chain_id: String,
    #[serde(default)]
    pub alert_types: Vec<String>,
    pub stages: Vec<StageConfig>,
    #[serde(default)]
    pub description: Option<String>,
}

/// One stage of a chain.
///
/// Exactly one execution shape must be identified: a single `agent`, a
/// multi-agent `agents` list, or `agent` together with `replicas > 1`.
/// [`StageConfig::shape`] resolves the shape and rejects ambiguous configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    /// Chain-definition-local id; defaults to the stage name.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub replicas: Option<u32>,
    #[serde(default)]
    pub iteration_strategy: Option<IterationStrategy>,
    #[serde(default)]
    pub llm_provider: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub force_conclusion_at_max_iterations: Option<bool>,
    #[serde(default)]
    pub mcp_servers: Option<Vec<String>>,
    #[serde(default)]
    pub success_policy: SuccessPolicy,
    #[serde(default)]
    pub synthesis: Option<SynthesisConfig>,
}

/// Execution shape of a stage, resolved from its config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageShape {
    Single { agent: String },
    MultiAgent { agents: Vec<String> },
    Replica { agent: String, replicas: u32 },
}

impl StageConfig {
    pub fn stage_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    pub fn shape(&self) -> Result<StageShape> {
        match (&self.agent, self.agents.is_empty(), self.replicas) {
            (Some(agent), true, None) => Ok(StageShape::Single {
                agent: agent.clone(),
            }),
            (Some(agent), true, Some(n)) if n > 1 => Ok(StageShape::Replica {
                agent: agent.clone(),
                replicas: n,
            }),
            (None, false, None) => Ok(StageShape::MultiAgent {
                agents: self.agents.clone(),
            }),
            _ => Err(Error::Config(format!(
                "stage '{}' must declare exactly one of: agent, agents, or agent with replicas > 1",
                self.name
            ))),
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(
            self.shape(),
            Ok(StageShape::MultiAgent { .. }) | Ok(StageShape::Replica { .. })
        )
    }
}

/// Optional synthesis agent run on the collected outputs of a parallel stage.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SynthesisConfig {
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub iteration_strategy: Option<IterationStrategy>,
    #[serde(default)]
    pub llm_provider: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chain context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory cumulative state threaded across the stages of one chain run.
///
/// `stage_outputs` preserves insertion order and is append-only during a run.
#[derive(Debug, Clone)]
pub struct ChainContext {
    pub session_id: String,
    pub current_stage_name: String,
    pub processing_alert: ProcessingAlert,
    stage_outputs: Vec<(String, StageOutput)>,
    pub chat_context: Option<String>,
    pub mcp: Option<MCPSelectionConfig>,
}

/// The value stored per stage key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageOutput {
    Single(AgentExecutionResult),
    Parallel(ParallelStageResult),
}

impl StageOutput {
    pub fn status(&self) -> StageStatus {
        match self {
            StageOutput::Single(r) => r.status,
            StageOutput::Parallel(r) => r.status,
        }
    }

    /// Human-readable summary of the stage result, used when composing the
    /// next stage's prompt.
    pub fn result_summary(&self) -> String {
        match self {
            StageOutput::Single(r) => r.result_summary.clone(),
            StageOutput::Parallel(r) => r
                .results
                .iter()
                .map(|child| format!("{}: {}", child.agent_name, child.result_summary))
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

impl ChainContext {
    pub fn new(session_id: impl Into<String>, processing_alert: ProcessingAlert) -> Self {
        Self {
            session_id: session_id.into(),
            current_stage_name: String::new(),
            processing_alert,
            stage_outputs: Vec::new(),
            chat_context: None,
            mcp: None,
        }
    }

    /// Append a stage output. Entries are append-only; re-using a key is a
    /// caller bug and panics in debug builds.
    pub fn push_stage_output(&mut self, key: impl Into<String>, output: StageOutput) {
        let key = key.into();
        debug_assert!(
            !self.stage_outputs.iter().any(|(k, _)| *k == key),
            "duplicate stage output key: {key}"
        );
        self.stage_outputs.push((key, output));
    }

    pub fn stage_output(&self, key: &str) -> Option<&StageOutput> {
        self.stage_outputs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Outputs in insertion order.
    pub fn stage_outputs(&self) -> impl Iterator<Item = (&str, &StageOutput)> {
        self.stage_outputs.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_chat_stage(&self) -> bool {
        self.chat_context.is_some()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of one agent's execution within a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecutionResult {
    pub status: StageStatus,
    pub agent_name: String,
    pub stage_name: String,
    pub timestamp_us: i64,
    pub result_summary: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub complete_conversation_history: Option<Vec<LLMMessage>>,
}

/// Result of a parallel stage: per-child results plus aggregation metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelStageResult {
    pub stage_name: String,
    pub results: Vec<AgentExecutionResult>,
    pub metadata: ParallelStageMetadata,
    pub status: StageStatus,
    pub timestamp_us: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelStageMetadata {
    pub parent_stage_execution_id: String,
    pub parallel_type: ParallelType,
    pub success_policy: SuccessPolicy,
    pub started_at_us: i64,
    #[serde(default)]
    pub completed_at_us: Option<i64>,
    pub agents: Vec<AgentExecutionMetadata>,
}

/// Per-child execution metadata carried on the parent row's `stage_output`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecutionMetadata {
    pub agent_name: String,
    #[serde(default)]
    pub llm_provider: Option<String>,
    pub iteration_strategy: IterationStrategy,
    pub status: StageStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub token_usage: Option<TokenUsage>,
}

/// Per-child overrides applied when fanning a parallel stage out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub llm_provider: Option<String>,
    #[serde(default)]
    pub iteration_strategy: Option<IterationStrategy>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub force_conclusion: Option<bool>,
    #[serde(default)]
    pub mcp_servers: Option<Vec<String>>,
}

/// Parent-row `stage_output` payload for parallel stages: the serialized
/// metadata, addressable by the per-agent cancellation path.
pub fn parallel_stage_output(metadata: &ParallelStageMetadata) -> Value {
    serde_json::json!({ "metadata": metadata })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert() -> ProcessingAlert {
        ProcessingAlert {
            alert_type: "kubernetes".into(),
            severity: "warning".into(),
            timestamp_us: 1,
            data: serde_json::json!({}),
            runbook: None,
        }
    }

    fn single_stage(name: &str) -> StageConfig {
        StageConfig {
            name: name.into(),
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
    fn shape_single() {
        let stage = single_stage("analysis");
        assert_eq!(
            stage.shape().unwrap(),
            StageShape::Single {
                agent: "KubernetesAgent".into()
            }
        );
        assert!(!stage.is_parallel());
    }

    #[test]
    fn shape_multi_agent() {
        let mut stage = single_stage("investigate");
        stage.agent = None;
        stage.agents = vec!["A1".into(), "A2".into()];
        assert!(matches!(
            stage.shape().unwrap(),
            StageShape::MultiAgent { .. }
        ));
        assert!(stage.is_parallel());
    }

    #[test]
    fn shape_replica() {
        let mut stage = single_stage("vote");
        stage.replicas = Some(3);
        assert_eq!(
            stage.shape().unwrap(),
            StageShape::Replica {
                agent: "KubernetesAgent".into(),
                replicas: 3
            }
        );
    }

    #[test]
    fn shape_rejects_ambiguous_configs() {
        // agent + agents at once
        let mut stage = single_stage("bad");
        stage.agents = vec!["A1".into()];
        assert!(stage.shape().is_err());

        // replicas without agent
        let mut stage = single_stage("bad");
        stage.agent = None;
        stage.replicas = Some(2);
        assert!(stage.shape().is_err());

        // replicas = 1 is not a fan-out
        let mut stage = single_stage("bad");
        stage.replicas = Some(1);
        assert!(stage.shape().is_err());

        // nothing at all
        let mut stage = single_stage("bad");
        stage.agent = None;
        assert!(stage.shape().is_err());
    }

    #[test]
    fn stage_id_defaults_to_name() {
        let mut stage = single_stage("analysis");
        assert_eq!(stage.stage_id(), "analysis");
        stage.id = Some("stage-0".into());
        assert_eq!(stage.stage_id(), "stage-0");
    }

    #[test]
    fn chain_context_preserves_insertion_order() {
        let mut ctx = ChainContext::new("s1", alert());
        for key in ["first", "second", "third"] {
            ctx.push_stage_output(
                key,
                StageOutput::Single(AgentExecutionResult {
                    status: StageStatus::Completed,
                    agent_name: "A".into(),
                    stage_name: key.into(),
                    timestamp_us: 1,
                    result_summary: key.into(),
                    error_message: None,
                    complete_conversation_history: None,
                }),
            );
        }
        let keys: Vec<&str> = ctx.stage_outputs().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["first", "second", "third"]);
        assert!(ctx.stage_output("second").is_some());
        assert!(ctx.stage_output("missing").is_none());
    }

    #[test]
    fn parallel_output_summary_joins_children() {
        let result = ParallelStageResult {
            stage_name: "investigate".into(),
            results: vec![
                AgentExecutionResult {
                    status: StageStatus::Completed,
                    agent_name: "A1".into(),
                    stage_name: "investigate".into(),
                    timestamp_us: 1,
                    result_summary: "ok".into(),
                    error_message: None,
                    complete_conversation_history: None,
                },
                AgentExecutionResult {
                    status: StageStatus::Failed,
                    agent_name: "A2".into(),
                    stage_name: "investigate".into(),
                    timestamp_us: 2,
                    result_summary: "boom".into(),
                    error_message: Some("boom".into()),
                    complete_conversation_history: None,
                },
            ],
            metadata: ParallelStageMetadata {
                parent_stage_execution_id: "parent-1".into(),
                parallel_type: ParallelType::MultiAgent,
                success_policy: SuccessPolicy::Any,
                started_at_us: 1,
                completed_at_us: Some(2),
                agents: vec![],
            },
            status: StageStatus::Completed,
            timestamp_us: 2,
        };
        let summary = StageOutput::Parallel(result).result_summary();
        assert!(summary.contains("A1: ok"));
        assert!(summary.contains("A2: boom"));
    }
}
