//! Chain scheduler.
//!
//! Walks the chain's stages in order, threading the growing `ChainContext`
//! forward and translating stage outcomes into session-level state. The
//! first non-success stage stops forward progress; a paused stage leaves
//! the session waiting for external resumption.

use tarsy_agent::{AgentOutcome, AgentSpec, CancelToken};
use tarsy_domain::chain::{
    AgentExecutionResult, ChainContext, ChainDefinition, StageConfig, StageOutput, StageShape,
};
use tarsy_domain::config::AgentConfig;
use tarsy_domain::session::StageExecution;
use tarsy_domain::status::{SessionStatus, StageStatus};
use tarsy_domain::now_us;
use tarsy_hooks::StageCaptureScope;

use crate::runtime::errors::{
    aggregate_error_message, classify_failed_session, AgentFailure, StageFailure,
};
use crate::runtime::parallel;
use crate::state::AppState;

/// Outcome of one scheduled stage, as seen by the chain walk.
struct StageRun {
    status: StageStatus,
    output: Option<StageOutput>,
    failure: Option<StageFailure>,
    /// Present for parallel stages; drives session-vs-stage divergence.
    child_statuses: Option<Vec<StageStatus>>,
}

/// Run the chain from `start_index` to completion, pause, or failure.
pub async fn run_chain(
    state: &AppState,
    chain: &ChainDefinition,
    mut context: ChainContext,
    start_index: usize,
    cancel: CancelToken,
) {
    let session_id = context.session_id.clone();
    state
        .history
        .update_session_status(&session_id, SessionStatus::InProgress, None, None)
        .await;
    state
        .updates
        .publish_session_status_change(&session_id, SessionStatus::InProgress, serde_json::Value::Null)
        .await;

    for (index, stage) in chain.stages.iter().enumerate().skip(start_index) {
        context.current_stage_name = stage.name.clone();
        state
            .history
            .update_session_current_stage(&session_id, index as i64, stage.stage_id())
            .await;

        let run = if stage.is_parallel() {
            run_parallel_stage(state, stage, index as i64, &context, &cancel).await
        } else {
            run_single_stage(state, stage, index as i64, &context, &cancel).await
        };

        match run.status {
            StageStatus::Completed | StageStatus::Partial => {
                if let Some(output) = run.output {
                    context.push_stage_output(stage.stage_id().to_owned(), output);
                }
            }
            StageStatus::Paused => {
                tracing::info!(session_id = %session_id, stage = %stage.name, "chain paused");
                state
                    .history
                    .update_session_status(&session_id, SessionStatus::Paused, None, None)
                    .await;
                state
                    .updates
                    .publish_session_status_change(
                        &session_id,
                        SessionStatus::Paused,
                        serde_json::Value::Null,
                    )
                    .await;
                state.cancel_map.remove(&session_id);
                return;
            }
            _ => {
                finalize_failed_session(state, &session_id, &run).await;
                state.cancel_map.remove(&session_id);
                state.cancel_tracker.clear(&session_id);
                return;
            }
        }
    }

    // Every stage completed: the last output is the session's analysis.
    let final_analysis = context
        .stage_outputs()
        .last()
        .map(|(_, output)| output.result_summary());
    state
        .history
        .update_session_status(
            &session_id,
            SessionStatus::Completed,
            None,
            final_analysis.as_deref(),
        )
        .await;
    state
        .updates
        .publish_session_status_change(&session_id, SessionStatus::Completed, serde_json::Value::Null)
        .await;
    state.cancel_map.remove(&session_id);
    state.cancel_tracker.clear(&session_id);
    tracing::info!(session_id = %session_id, "chain completed");
}

/// Classify and persist a failed / cancelled / timed-out session, then
/// publish the matching terminal envelope.
async fn finalize_failed_session(state: &AppState, session_id: &str, run: &StageRun) {
    let session_status = classify_failed_session(run.status, run.child_statuses.as_deref());
    let error_message =
        aggregate_error_message(run.failure.as_ref().map(std::slice::from_ref).unwrap_or(&[]));

    state
        .history
        .update_session_status(session_id, session_status, Some(&error_message), None)
        .await;
    state
        .updates
        .publish_session_status_change(
            session_id,
            session_status,
            serde_json::json!({ "error_message": error_message }),
        )
        .await;
    match session_status {
        SessionStatus::Cancelled => {
            state.updates.publish_session_cancelled(session_id).await;
        }
        _ => {
            state
                .updates
                .publish_session_failed(session_id, Some(error_message.clone()))
                .await;
        }
    }
    tracing::warn!(
        session_id,
        status = %session_status,
        error = %error_message,
        "chain stopped"
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Single stage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_single_stage(
    state: &AppState,
    stage: &StageConfig,
    stage_index: i64,
    context: &ChainContext,
    cancel: &CancelToken,
) -> StageRun {
    let Ok(StageShape::Single { agent }) = stage.shape() else {
        return StageRun {
            status: StageStatus::Failed,
            output: None,
            failure: Some(StageFailure::Single {
                stage_name: stage.name.clone(),
                agent: "unknown".into(),
                error: Some("invalid stage shape".into()),
            }),
            child_statuses: None,
        };
    };

    let scope = StageCaptureScope::new(state.hooks.clone());
    let mut execution = StageExecution::new(
        &context.session_id,
        &stage.name,
        stage_index,
        stage.stage_id(),
        &agent,
    );
    scope.publish(&execution).await;
    execution.start();
    scope.publish(&execution).await;
    state.updates.publish_stage_started(&execution).await;

    let agent_config = state
        .registry
        .agent(&agent)
        .cloned()
        .unwrap_or_else(|| AgentConfig {
            mcp_servers: stage.mcp_servers.clone().unwrap_or_default(),
            ..Default::default()
        });
    let spec = AgentSpec::resolve(
        &agent,
        &agent_config,
        stage,
        None,
        state.settings.execution.default_max_iterations,
    );

    let outcome = parallel::run_spec(state, spec, context, cancel, &execution).await;

    match &outcome {
        AgentOutcome::Paused { .. } => execution.pause(),
        other => {
            if let AgentOutcome::Completed { analysis, .. } = other {
                execution.stage_output = Some(serde_json::json!({ "result_summary": analysis }));
            }
            execution.finish(other.stage_status(), other.error_message());
        }
    }
    scope.publish(&execution).await;
    if execution.status != StageStatus::Paused {
        state.updates.publish_stage_completed(&execution).await;
    }

    match outcome {
        AgentOutcome::Completed {
            analysis,
            conversation,
        } => StageRun {
            status: StageStatus::Completed,
            output: Some(StageOutput::Single(AgentExecutionResult {
                status: StageStatus::Completed,
                agent_name: agent,
                stage_name: stage.name.clone(),
                timestamp_us: now_us(),
                result_summary: analysis,
                error_message: None,
                complete_conversation_history: Some(conversation),
            })),
            failure: None,
            child_statuses: None,
        },
        AgentOutcome::Paused { .. } => StageRun {
            status: StageStatus::Paused,
            output: None,
            failure: None,
            child_statuses: None,
        },
        other => StageRun {
            status: other.stage_status(),
            output: None,
            failure: Some(StageFailure::Single {
                stage_name: stage.name.clone(),
                agent,
                error: other.error_message(),
            }),
            child_statuses: None,
        },
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parallel stage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_parallel_stage(
    state: &AppState,
    stage: &StageConfig,
    stage_index: i64,
    context: &ChainContext,
    cancel: &CancelToken,
) -> StageRun {
    let outcome = parallel::execute_parallel_stage(state, stage, stage_index, context, cancel).await;
    let status = outcome.result.status;

    let failure = (!matches!(
        status,
        StageStatus::Completed | StageStatus::Partial | StageStatus::Paused
    ))
    .then(|| StageFailure::Parallel {
        stage_name: stage.name.clone(),
        agents: outcome
            .result
            .results
            .iter()
            .filter(|r| !matches!(r.status, StageStatus::Completed | StageStatus::Paused))
            .map(|r| AgentFailure {
                agent: r.agent_name.clone(),
                status: r.status,
                error: r.error_message.clone(),
            })
            .collect(),
    });

    StageRun {
        status,
        output: matches!(status, StageStatus::Completed | StageStatus::Partial)
            .then_some(StageOutput::Parallel(outcome.result)),
        failure,
        child_statuses: Some(outcome.child_statuses),
    }
}
