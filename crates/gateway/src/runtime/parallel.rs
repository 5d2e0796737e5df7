//! Parallel stage executor.
//!
//! Fans a multi-agent or replica stage out into concurrent child
//! executions, each with its own stage-execution row linked to a shared
//! parent row. One child's failure or cancellation never cancels its
//! siblings; only the scheduler-owned session scope cancels globally.

use std::time::Duration;

use futures_util::future::join_all;

use tarsy_agent::{AgentOutcome, AgentSpec, CancelToken, IterationEngine};
use tarsy_domain::chain::{
    parallel_stage_output, AgentExecutionMetadata, AgentExecutionResult, ChainContext,
    ExecutionConfig, ParallelStageMetadata, ParallelStageResult, StageConfig, StageOutput,
    StageShape,
};
use tarsy_domain::config::AgentConfig;
use tarsy_domain::session::StageExecution;
use tarsy_domain::status::{ParallelType, StageStatus, SuccessPolicy};
use tarsy_domain::now_us;
use tarsy_hooks::StageCaptureScope;

use crate::runtime::build_dispatcher;
use crate::state::AppState;

/// Agent label on parent rows; parents never run an agent themselves.
pub const PARENT_ROW_AGENT: &str = "parallel";

/// Everything the scheduler needs from a finished parallel stage.
pub struct ParallelStageOutcome {
    pub result: ParallelStageResult,
    pub child_statuses: Vec<StageStatus>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status aggregation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Map per-child statuses onto the stage's aggregate status.
///
/// A paused child always wins. Otherwise `cancelled` and `timed_out` count
/// as failures for the policy test: ALL completes only when every child
/// completed, ANY completes when at least one did.
pub fn aggregate_status(children: &[StageStatus], policy: SuccessPolicy) -> StageStatus {
    if children.iter().any(|s| *s == StageStatus::Paused) {
        return StageStatus::Paused;
    }
    let completed = children
        .iter()
        .filter(|s| **s == StageStatus::Completed)
        .count();
    let ok = match policy {
        SuccessPolicy::All => completed == children.len() && !children.is_empty(),
        SuccessPolicy::Any => completed >= 1,
    };
    if ok {
        StageStatus::Completed
    } else {
        StageStatus::Failed
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ChildPlan {
    child_name: String,
    agent_name: String,
    overrides: Option<ExecutionConfig>,
}

fn plan_children(stage: &StageConfig) -> (ParallelType, Vec<ChildPlan>) {
    match stage.shape() {
        Ok(StageShape::MultiAgent { agents }) => (
            ParallelType::MultiAgent,
            agents
                .into_iter()
                .map(|agent| ChildPlan {
                    child_name: agent.clone(),
                    agent_name: agent,
                    overrides: None,
                })
                .collect(),
        ),
        Ok(StageShape::Replica { agent, replicas }) => (
            ParallelType::Replica,
            (1..=replicas)
                .map(|i| ChildPlan {
                    child_name: format!("{agent}-{i}"),
                    agent_name: agent.clone(),
                    overrides: None,
                })
                .collect(),
        ),
        // The scheduler only routes parallel shapes here.
        _ => (ParallelType::MultiAgent, Vec::new()),
    }
}

struct ChildOutcome {
    result: AgentExecutionResult,
    metadata: AgentExecutionMetadata,
}

pub async fn execute_parallel_stage(
    state: &AppState,
    stage: &StageConfig,
    stage_index: i64,
    context: &ChainContext,
    cancel: &CancelToken,
) -> ParallelStageOutcome {
    let session_id = &context.session_id;
    let (parallel_type, plans) = plan_children(stage);
    let scope = StageCaptureScope::new(state.hooks.clone());

    // Parent row: created pending, then started.
    let mut parent = StageExecution::new(
        session_id,
        &stage.name,
        stage_index,
        stage.stage_id(),
        PARENT_ROW_AGENT,
    );
    scope.publish(&parent).await;
    parent.start();
    scope.publish(&parent).await;
    state.updates.publish_stage_started(&parent).await;
    let started_at_us = parent.started_at_us.unwrap_or_else(now_us);

    // Fan out. Children run concurrently; each finalizes its own row.
    let outcomes: Vec<ChildOutcome> = join_all(plans.iter().map(|plan| {
        run_child(
            state,
            stage,
            stage_index,
            context,
            cancel,
            plan,
            parent.execution_id.clone(),
        )
    }))
    .await;

    let mut results: Vec<AgentExecutionResult> = Vec::new();
    let mut agents_metadata: Vec<AgentExecutionMetadata> = Vec::new();
    for outcome in outcomes {
        results.push(outcome.result);
        agents_metadata.push(outcome.metadata);
    }
    let mut child_statuses: Vec<StageStatus> = results.iter().map(|r| r.status).collect();

    let mut status = aggregate_status(&child_statuses, stage.success_policy);

    // Optional synthesis over the collected outputs (successes and
    // failures alike), only when the fan-out is not paused or failed.
    if status == StageStatus::Completed {
        if let Some(synthesis) = &stage.synthesis {
            let had_failures = child_statuses.iter().any(|s| *s != StageStatus::Completed);
            match run_synthesis(state, stage, stage_index, context, cancel, synthesis, &results)
                .await
            {
                Ok(result) => {
                    child_statuses.push(result.status);
                    results.push(result);
                    if had_failures {
                        status = StageStatus::Partial;
                    }
                }
                Err(synth_status) => {
                    status = synth_status;
                }
            }
        }
    }

    let metadata = ParallelStageMetadata {
        parent_stage_execution_id: parent.execution_id.clone(),
        parallel_type,
        success_policy: stage.success_policy,
        started_at_us,
        completed_at_us: Some(now_us()),
        agents: agents_metadata,
    };

    // Finalize the parent row with the aggregation metadata.
    parent.stage_output = Some(parallel_stage_output(&metadata));
    if status == StageStatus::Paused {
        parent.pause();
    } else {
        parent.finish(status, None);
    }
    scope.publish(&parent).await;
    if status != StageStatus::Paused {
        state.updates.publish_stage_completed(&parent).await;
    }

    ParallelStageOutcome {
        result: ParallelStageResult {
            stage_name: stage.name.clone(),
            results,
            metadata,
            status,
            timestamp_us: now_us(),
        },
        child_statuses,
    }
}

async fn run_child(
    state: &AppState,
    stage: &StageConfig,
    stage_index: i64,
    context: &ChainContext,
    cancel: &CancelToken,
    plan: &ChildPlan,
    parent_execution_id: String,
) -> ChildOutcome {
    let session_id = &context.session_id;
    let scope = StageCaptureScope::new(state.hooks.clone());

    let mut execution = StageExecution::new(
        session_id,
        &stage.name,
        stage_index,
        stage.stage_id(),
        &plan.child_name,
    );
    execution.parent_stage_execution_id = Some(parent_execution_id);
    scope.publish(&execution).await;
    execution.start();
    scope.publish(&execution).await;

    let agent_config = state
        .registry
        .agent(&plan.agent_name)
        .cloned()
        .unwrap_or_else(|| AgentConfig {
            mcp_servers: stage.mcp_servers.clone().unwrap_or_default(),
            ..Default::default()
        });
    let spec = AgentSpec::resolve(
        &plan.agent_name,
        &agent_config,
        stage,
        plan.overrides.as_ref(),
        state.settings.execution.default_max_iterations,
    );

    let outcome = run_spec(state, spec.clone(), context, cancel, &execution).await;
    finalize_child(state, &scope, &mut execution, &outcome).await;

    ChildOutcome {
        result: AgentExecutionResult {
            status: execution.status,
            agent_name: plan.child_name.clone(),
            stage_name: stage.name.clone(),
            timestamp_us: now_us(),
            result_summary: match &outcome {
                AgentOutcome::Completed { analysis, .. } => analysis.clone(),
                other => other.error_message().unwrap_or_default(),
            },
            error_message: outcome.error_message(),
            complete_conversation_history: match outcome {
                AgentOutcome::Completed { conversation, .. } => Some(conversation),
                _ => None,
            },
        },
        metadata: AgentExecutionMetadata {
            agent_name: plan.child_name.clone(),
            llm_provider: spec.llm_provider.clone(),
            iteration_strategy: spec.strategy,
            status: execution.status,
            error_message: execution.error_message.clone(),
            token_usage: None,
        },
    }
}

/// Resolve the provider and dispatcher for a spec, then run the engine.
/// Resolution failures surface as `Failed` outcomes, never panics.
pub(crate) async fn run_spec(
    state: &AppState,
    spec: AgentSpec,
    context: &ChainContext,
    cancel: &CancelToken,
    execution: &StageExecution,
) -> AgentOutcome {
    let provider = match state.providers.resolve(spec.llm_provider.as_deref()) {
        Ok(provider) => provider,
        Err(e) => {
            return AgentOutcome::Failed {
                error: e.to_string(),
            }
        }
    };
    let dispatcher = match build_dispatcher(
        state,
        context,
        &spec,
        Some(execution.execution_id.clone()),
    ) {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            return AgentOutcome::Failed {
                error: e.to_string(),
            }
        }
    };

    let engine = IterationEngine {
        spec,
        provider,
        session_id: context.session_id.clone(),
        stage_execution_id: Some(execution.execution_id.clone()),
        hooks: state.hooks.clone(),
        llm_timeout: Duration::from_secs(state.settings.execution.llm_iteration_timeout_secs),
        max_message_size: state.settings.execution.max_llm_message_content_size,
    };
    engine
        .run(context, &dispatcher, cancel, &state.cancel_tracker)
        .await
}

/// Finalize a child row from its outcome and publish the update.
async fn finalize_child(
    state: &AppState,
    scope: &StageCaptureScope,
    execution: &mut StageExecution,
    outcome: &AgentOutcome,
) {
    match outcome {
        AgentOutcome::Paused { .. } => execution.pause(),
        other => {
            if let AgentOutcome::Completed { analysis, .. } = other {
                execution.stage_output = Some(serde_json::json!({ "result_summary": analysis }));
            }
            execution.finish(other.stage_status(), other.error_message());
        }
    }
    scope.publish(execution).await;
    if execution.status != StageStatus::Paused {
        state.updates.publish_stage_completed(execution).await;
    }
}

/// Run the synthesis agent over the collected child results.
///
/// `Err(status)` carries the stage status the failure maps to (failed,
/// cancelled, or timed_out as classified through the tracker).
async fn run_synthesis(
    state: &AppState,
    stage: &StageConfig,
    stage_index: i64,
    context: &ChainContext,
    cancel: &CancelToken,
    synthesis: &tarsy_domain::chain::SynthesisConfig,
    results: &[AgentExecutionResult],
) -> Result<AgentExecutionResult, StageStatus> {
    let scope = StageCaptureScope::new(state.hooks.clone());
    let agent_config = synthesis
        .agent
        .as_ref()
        .and_then(|name| state.registry.agent(name))
        .cloned()
        .unwrap_or_default();
    let spec = AgentSpec::for_synthesis(
        synthesis,
        &agent_config,
        state.settings.execution.default_max_iterations,
    );

    let mut execution = StageExecution::new(
        &context.session_id,
        format!("{}-synthesis", stage.name),
        stage_index,
        stage.stage_id(),
        &spec.name,
    );
    scope.publish(&execution).await;
    execution.start();
    scope.publish(&execution).await;

    // Synthesis sees every child result, successful or failed.
    let mut synthesis_context = context.clone();
    synthesis_context.push_stage_output(
        format!("{}-results", stage.name),
        StageOutput::Parallel(ParallelStageResult {
            stage_name: stage.name.clone(),
            results: results.to_vec(),
            metadata: ParallelStageMetadata {
                parent_stage_execution_id: execution.execution_id.clone(),
                parallel_type: ParallelType::MultiAgent,
                success_policy: stage.success_policy,
                started_at_us: now_us(),
                completed_at_us: None,
                agents: Vec::new(),
            },
            status: StageStatus::Completed,
            timestamp_us: now_us(),
        }),
    );

    let outcome = run_spec(state, spec.clone(), &synthesis_context, cancel, &execution).await;
    finalize_child(state, &scope, &mut execution, &outcome).await;

    match outcome {
        AgentOutcome::Completed {
            analysis,
            conversation,
        } => Ok(AgentExecutionResult {
            status: StageStatus::Completed,
            agent_name: spec.name,
            stage_name: execution.stage_name.clone(),
            timestamp_us: now_us(),
            result_summary: analysis,
            error_message: None,
            complete_conversation_history: Some(conversation),
        }),
        other => {
            tracing::warn!(
                stage = %stage.name,
                status = %other.stage_status(),
                "synthesis did not complete"
            );
            Err(other.stage_status())
        }
    }
}
