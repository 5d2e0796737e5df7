//! Per-agent cancellation for paused parallel stages.
//!
//! Always a user-initiated action: the `agent.cancelled` envelope is emitted
//! even when the parent stage stays paused. The recomputed aggregate decides
//! whether the session stays paused, resumes, or terminates.

use serde::Serialize;

use tarsy_domain::chain::ParallelStageMetadata;
use tarsy_domain::session::StageExecution;
use tarsy_domain::status::{SessionStatus, StageStatus, SuccessPolicy};
use tarsy_domain::{now_us, Error, Result};
use tarsy_hooks::StageCaptureScope;
use tarsy_history::HistoryHealth;

use crate::runtime::errors::{aggregate_error_message, AgentFailure, StageFailure};
use crate::runtime::parallel::aggregate_status;
use crate::runtime::session::resume_chain_after_stage;
use crate::state::AppState;

pub const CANCELLED_BY_USER: &str = "Cancelled by user";

#[derive(Debug, Clone, Serialize)]
pub struct CancelAgentResponse {
    pub session_id: String,
    pub execution_id: String,
    pub session_status: SessionStatus,
    pub stage_status: StageStatus,
}

/// Cancel one paused child of a parallel stage.
pub async fn cancel_agent(
    state: &AppState,
    session_id: &str,
    execution_id: &str,
) -> Result<CancelAgentResponse> {
    // ── Validation ladder ───────────────────────────────────────────
    if state.history.health() != HistoryHealth::Healthy {
        return Err(Error::Database(
            "history backend unavailable - cannot cancel agent".into(),
        ));
    }

    let session = state
        .history
        .get_session(session_id)
        .await
        .ok_or_else(|| Error::Other(format!("session {session_id} not found")))?;
    if session.status != SessionStatus::Paused {
        return Err(Error::Other(format!(
            "session {session_id} is {}, only paused sessions support per-agent cancellation",
            session.status
        )));
    }

    let mut child = state
        .history
        .get_stage_execution(execution_id)
        .await
        .ok_or_else(|| Error::Other(format!("stage execution {execution_id} not found")))?;
    if child.session_id != session_id {
        return Err(Error::Other(format!(
            "stage execution {execution_id} does not belong to session {session_id}"
        )));
    }
    let Some(parent_id) = child.parent_stage_execution_id.clone() else {
        return Err(Error::Other(format!(
            "stage execution {execution_id} is not part of a parallel stage"
        )));
    };
    if child.status != StageStatus::Paused {
        return Err(Error::Other(format!(
            "stage execution {execution_id} is {}, only paused agents can be cancelled",
            child.status
        )));
    }

    // ── Finalize the child ──────────────────────────────────────────
    child.status = StageStatus::Cancelled;
    child.error_message = Some(CANCELLED_BY_USER.into());
    child.completed_at_us = Some(child.paused_at_us.unwrap_or_else(now_us));
    if let (Some(start), Some(end)) = (child.started_at_us, child.completed_at_us) {
        child.duration_ms = Some((end - start) / 1000);
    }
    let scope = StageCaptureScope::new(state.hooks.clone());
    scope.publish(&child).await;

    state
        .updates
        .publish_agent_cancelled(session_id, execution_id, &child.agent)
        .await;

    // ── Recompute the aggregate across siblings ─────────────────────
    let parent = state
        .history
        .get_stage_execution(&parent_id)
        .await
        .ok_or_else(|| Error::Other(format!("parent stage execution {parent_id} not found")))?;
    let success_policy = parent_success_policy(&parent);

    let siblings = state.history.get_parallel_stage_children(&parent_id).await;
    let statuses: Vec<StageStatus> = siblings.iter().map(|s| s.status).collect();
    let aggregate = aggregate_status(&statuses, success_policy);

    let session_status = match aggregate {
        // Other siblings are still paused; nothing else changes.
        StageStatus::Paused => SessionStatus::Paused,

        // A sibling already completed (ANY policy): the stage is
        // retroactively satisfied and the chain continues after it.
        StageStatus::Completed => {
            finalize_parent(state, parent, aggregate).await;
            state
                .history
                .update_session_status(session_id, SessionStatus::InProgress, None, None)
                .await;
            state.updates.publish_session_resumed(session_id).await;
            resume_chain_after_stage(state, &session).await?;
            SessionStatus::InProgress
        }

        // Everyone is done and nobody completed. Cancellations alone make
        // the session cancelled; one real failure makes it failed.
        _ => {
            finalize_parent(state, parent, aggregate).await;
            let failures: Vec<AgentFailure> = siblings
                .iter()
                .filter(|s| !matches!(s.status, StageStatus::Completed | StageStatus::Paused))
                .map(|s| AgentFailure {
                    agent: s.agent.clone(),
                    status: s.status,
                    error: s.error_message.clone(),
                })
                .collect();
            let all_cancelled = failures.iter().all(|f| f.status == StageStatus::Cancelled);
            let error_message = aggregate_error_message(&[StageFailure::Parallel {
                stage_name: child.stage_name.clone(),
                agents: failures,
            }]);

            let status = if all_cancelled {
                SessionStatus::Cancelled
            } else {
                SessionStatus::Failed
            };
            state
                .history
                .update_session_status(session_id, status, Some(&error_message), None)
                .await;
            match status {
                SessionStatus::Cancelled => {
                    state.updates.publish_session_cancelled(session_id).await;
                }
                _ => {
                    state
                        .updates
                        .publish_session_failed(session_id, Some(error_message))
                        .await;
                }
            }
            status
        }
    };

    Ok(CancelAgentResponse {
        session_id: session_id.to_owned(),
        execution_id: execution_id.to_owned(),
        session_status,
        stage_status: aggregate,
    })
}

/// The success policy lives in the parent row's aggregation metadata.
fn parent_success_policy(parent: &StageExecution) -> SuccessPolicy {
    parent
        .stage_output
        .as_ref()
        .and_then(|v| v.get("metadata"))
        .and_then(|v| serde_json::from_value::<ParallelStageMetadata>(v.clone()).ok())
        .map(|m| m.success_policy)
        .unwrap_or_default()
}

async fn finalize_parent(state: &AppState, mut parent: StageExecution, status: StageStatus) {
    let end = now_us();
    parent.status = status;
    parent.completed_at_us = Some(end);
    if let Some(start) = parent.started_at_us {
        parent.duration_ms = Some((end - start) / 1000);
    }
    let scope = StageCaptureScope::new(state.hooks.clone());
    scope.publish(&parent).await;
}
