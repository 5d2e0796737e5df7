//! Session lifecycle: alert acceptance, chain dispatch, user cancellation,
//! and resumption after a paused parallel stage is unblocked.

use std::time::Duration;

use tarsy_domain::alert::{Alert, ProcessingAlert};
use tarsy_domain::chain::{ChainContext, ChainDefinition, StageOutput};
use tarsy_domain::chain::AgentExecutionResult;
use tarsy_domain::session::{AlertSession, StageExecution};
use tarsy_domain::status::{CancelCause, SessionStatus, StageStatus};
use tarsy_domain::{now_us, Error, Result};
use tarsy_mcp::resolve_selection;

use crate::runtime::scheduler;
use crate::state::AppState;

/// Accept an alert: select the chain, validate the MCP selection against
/// every agent the chain will dispatch, persist the session, and spawn the
/// chain task. Returns the new session id.
pub async fn submit_alert(state: &AppState, alert: Alert) -> Result<String> {
    let chain = state
        .registry
        .chain_for_alert_type(&alert.alert_type)
        .ok_or_else(|| {
            Error::Config(format!(
                "no agent chain handles alert type '{}'",
                alert.alert_type
            ))
        })?;

    // Selection errors reject the session before any stage runs.
    if let Some(selection) = &alert.mcp {
        for stage in &chain.stages {
            for agent_name in stage_agents(stage) {
                let agent_servers = state
                    .registry
                    .agent(&agent_name)
                    .map(|a| a.mcp_servers.clone())
                    .unwrap_or_else(|| stage.mcp_servers.clone().unwrap_or_default());
                resolve_selection(&agent_servers, Some(selection))?;
            }
        }
        validate_selected_tools(state, selection).await?;
    }

    let session = AlertSession::new(
        uuid::Uuid::new_v4().to_string(),
        alert.data.clone(),
        chain.chain_id.clone(),
        Some(alert.alert_type.clone()),
        Some(chain.chain_id.clone()),
        serde_json::to_value(&chain).ok(),
    );
    let session_id = session.session_id.clone();
    state.history.create_session(&session).await;
    state
        .updates
        .publish_session_status_change(&session_id, SessionStatus::Pending, serde_json::Value::Null)
        .await;

    let mut context = ChainContext::new(&session_id, ProcessingAlert::from_alert(&alert));
    context.mcp = alert.mcp.clone();

    spawn_chain(state.clone(), chain, context, 0);
    Ok(session_id)
}

fn stage_agents(stage: &tarsy_domain::chain::StageConfig) -> Vec<String> {
    match stage.shape() {
        Ok(tarsy_domain::chain::StageShape::Single { agent }) => vec![agent],
        Ok(tarsy_domain::chain::StageShape::MultiAgent { agents }) => agents,
        Ok(tarsy_domain::chain::StageShape::Replica { agent, .. }) => vec![agent],
        Err(_) => Vec::new(),
    }
}

/// Check tool narrowings against the tools the selected servers advertise.
async fn validate_selected_tools(
    state: &AppState,
    selection: &tarsy_domain::alert::MCPSelectionConfig,
) -> Result<()> {
    for server_selection in &selection.servers {
        let Some(tools) = &server_selection.tools else {
            continue;
        };
        let Some(server) = state.mcp_servers.get(&server_selection.name) else {
            continue; // server-level validation already ran
        };
        let advertised: Vec<String> = server
            .list_tools()
            .await?
            .into_iter()
            .map(|t| t.name)
            .collect();
        tarsy_mcp::selection::validate_tool_selection(&server_selection.name, tools, &advertised)?;
    }
    Ok(())
}

/// Spawn the chain task plus its session-timeout watchdog. The watchdog
/// cancels cooperatively: it marks the tracker and flips the token, and the
/// running loop winds down at its next checkpoint.
pub fn spawn_chain(
    state: AppState,
    chain: ChainDefinition,
    context: ChainContext,
    start_index: usize,
) {
    let session_id = context.session_id.clone();
    let cancel = state.cancel_map.register(&session_id);

    let watchdog_state = state.clone();
    let watchdog_cancel = cancel.clone();
    let watchdog_session = session_id.clone();
    let timeout = Duration::from_secs(state.settings.execution.session_timeout_secs);
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if watchdog_state.cancel_map.is_running(&watchdog_session) {
            tracing::warn!(session_id = %watchdog_session, "session timeout, cancelling");
            watchdog_state
                .cancel_tracker
                .mark(&watchdog_session, CancelCause::Timeout);
            watchdog_cancel.cancel();
        }
    });

    tokio::spawn(async move {
        scheduler::run_chain(&state, &chain, context, start_index, cancel).await;
    });
}

/// User-initiated cancellation of a running session.
pub fn cancel_session(state: &AppState, session_id: &str) -> bool {
    state
        .cancel_tracker
        .mark(session_id, CancelCause::UserCancel);
    state.cancel_map.cancel(session_id)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resumption
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Rebuild the chain context from persisted state and continue at
/// `current_stage_index + 1`. Used after a paused parallel stage resolved
/// to `completed` through per-agent cancellation.
pub async fn resume_chain_after_stage(state: &AppState, session: &AlertSession) -> Result<()> {
    let chain: ChainDefinition = session
        .chain_definition
        .clone()
        .and_then(|v| serde_json::from_value(v).ok())
        .ok_or_else(|| {
            Error::Other(format!(
                "session {} has no chain definition snapshot",
                session.session_id
            ))
        })?;

    let detail = state
        .history
        .get_session_detail(&session.session_id)
        .await
        .ok_or_else(|| Error::Other(format!("session {} not found", session.session_id)))?;

    let mut context = ChainContext::new(
        &session.session_id,
        ProcessingAlert {
            alert_type: session.alert_type.clone().unwrap_or_default(),
            severity: "warning".into(),
            timestamp_us: session.started_at_us,
            data: session.alert_data.clone(),
            runbook: None,
        },
    );
    rebuild_stage_outputs(&mut context, &detail.stages);

    let start_index = session.current_stage_index.unwrap_or(0) as usize + 1;
    spawn_chain(state.clone(), chain, context, start_index);
    Ok(())
}

/// Reconstruct previous stage outputs from persisted rows: top-level rows
/// in terminal success states contribute their stored result summaries;
/// parallel parents collect their children's.
fn rebuild_stage_outputs(context: &mut ChainContext, stages: &[StageExecution]) {
    let mut top_level: Vec<&StageExecution> = stages
        .iter()
        .filter(|s| s.parent_stage_execution_id.is_none())
        .filter(|s| matches!(s.status, StageStatus::Completed | StageStatus::Partial))
        .collect();
    top_level.sort_by_key(|s| s.stage_index);

    for row in top_level {
        let summary = if row.agent == crate::runtime::parallel::PARENT_ROW_AGENT {
            let mut parts: Vec<String> = stages
                .iter()
                .filter(|s| {
                    s.parent_stage_execution_id.as_deref() == Some(row.execution_id.as_str())
                })
                .filter(|s| s.status == StageStatus::Completed)
                .filter_map(|s| {
                    stored_summary(s).map(|summary| format!("{}: {summary}", s.agent))
                })
                .collect();
            parts.sort();
            parts.join("\n\n")
        } else {
            stored_summary(row).unwrap_or_default()
        };

        context.push_stage_output(
            row.stage_id.clone(),
            StageOutput::Single(AgentExecutionResult {
                status: row.status,
                agent_name: row.agent.clone(),
                stage_name: row.stage_name.clone(),
                timestamp_us: row.completed_at_us.unwrap_or_else(now_us),
                result_summary: summary,
                error_message: None,
                complete_conversation_history: None,
            }),
        );
    }
}

fn stored_summary(row: &StageExecution) -> Option<String> {
    row.stage_output
        .as_ref()
        .and_then(|v| v.get("result_summary"))
        .and_then(|v| v.as_str())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(
        stage_index: i64,
        stage_id: &str,
        agent: &str,
        status: StageStatus,
        summary: Option<&str>,
        parent: Option<&str>,
    ) -> StageExecution {
        let mut row = StageExecution::new("s1", stage_id, stage_index, stage_id, agent);
        row.status = status;
        row.parent_stage_execution_id = parent.map(str::to_owned);
        row.stage_output = summary.map(|s| serde_json::json!({ "result_summary": s }));
        row.completed_at_us = Some(1);
        row
    }

    fn context() -> ChainContext {
        ChainContext::new(
            "s1",
            ProcessingAlert {
                alert_type: "kubernetes".into(),
                severity: "warning".into(),
                timestamp_us: 1,
                data: serde_json::json!({}),
                runbook: None,
            },
        )
    }

    #[test]
    fn rebuild_collects_completed_single_stages_in_order() {
        let stages = vec![
            row(1, "analysis", "A2", StageStatus::Completed, Some("deep"), None),
            row(0, "triage", "A1", StageStatus::Completed, Some("quick"), None),
            row(2, "failed", "A3", StageStatus::Failed, None, None),
        ];
        let mut ctx = context();
        rebuild_stage_outputs(&mut ctx, &stages);

        let keys: Vec<&str> = ctx.stage_outputs().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["triage", "analysis"]);
        assert_eq!(ctx.stage_output("triage").unwrap().result_summary(), "quick");
    }

    #[test]
    fn rebuild_collects_parallel_children_summaries() {
        let mut parent = row(
            0,
            "investigate",
            crate::runtime::parallel::PARENT_ROW_AGENT,
            StageStatus::Completed,
            None,
            None,
        );
        parent.execution_id = "parent-1".into();
        let stages = vec![
            parent,
            row(0, "investigate", "A1", StageStatus::Completed, Some("found it"), Some("parent-1")),
            row(0, "investigate", "A2", StageStatus::Cancelled, None, Some("parent-1")),
        ];
        let mut ctx = context();
        rebuild_stage_outputs(&mut ctx, &stages);

        let summary = ctx.stage_output("investigate").unwrap().result_summary();
        assert!(summary.contains("A1: found it"));
        assert!(!summary.contains("A2"));
    }
}
