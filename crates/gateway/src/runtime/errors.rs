//! Session-level error aggregation.
//!
//! Humans read these strings on the dashboard; each contributing agent of a
//! failed parallel stage is labelled `(failed)` or `(cancelled)` so actual
//! errors are distinguishable from cancellations.

use tarsy_domain::status::{SessionStatus, StageStatus};

pub const NO_ERROR_MESSAGE: &str = "Failed with no error message";
pub const FALLBACK_MESSAGE: &str =
    "Chain processing failed: One or more stages failed without detailed error messages";

/// One failed stage, as collected by the scheduler.
#[derive(Debug, Clone)]
pub enum StageFailure {
    Single {
        stage_name: String,
        agent: String,
        error: Option<String>,
    },
    Parallel {
        stage_name: String,
        agents: Vec<AgentFailure>,
    },
}

/// One non-success child of a failed parallel stage.
#[derive(Debug, Clone)]
pub struct AgentFailure {
    pub agent: String,
    pub status: StageStatus,
    pub error: Option<String>,
}

impl AgentFailure {
    fn label(&self) -> &'static str {
        if self.status == StageStatus::Cancelled {
            "cancelled"
        } else {
            "failed"
        }
    }
}

fn single_entry(stage_name: &str, agent: &str, error: Option<&str>) -> String {
    format!(
        "stage '{stage_name}' ({agent}): {}",
        error.unwrap_or(NO_ERROR_MESSAGE)
    )
}

fn parallel_entry(stage_name: &str, agents: &[AgentFailure]) -> String {
    let parts: Vec<String> = agents
        .iter()
        .map(|a| {
            format!(
                "{} ({}): {}",
                a.agent,
                a.label(),
                a.error.as_deref().unwrap_or(NO_ERROR_MESSAGE)
            )
        })
        .collect();
    format!(
        "Parallel stage '{stage_name}' failed: {} agents: {}",
        agents.len(),
        parts.join("; ")
    )
}

/// Build the session's `error_message` from the collected stage failures.
pub fn aggregate_error_message(failures: &[StageFailure]) -> String {
    match failures {
        [] => FALLBACK_MESSAGE.to_string(),
        [StageFailure::Single {
            stage_name,
            agent,
            error,
        }] => format!(
            "Chain processing failed at stage '{stage_name}' ({agent}): {}",
            error.as_deref().unwrap_or(NO_ERROR_MESSAGE)
        ),
        [StageFailure::Parallel { stage_name, agents }] => parallel_entry(stage_name, agents),
        many => {
            let entries: Vec<String> = many
                .iter()
                .map(|failure| match failure {
                    StageFailure::Single {
                        stage_name,
                        agent,
                        error,
                    } => single_entry(stage_name, agent, error.as_deref()),
                    StageFailure::Parallel { stage_name, agents } => {
                        parallel_entry(stage_name, agents)
                    }
                })
                .collect();
            format!(
                "Chain processing failed ({} stage failures): {}",
                many.len(),
                entries.join("; ")
            )
        }
    }
}

/// Map a terminal stage outcome onto the session status.
///
/// For parallel stages the aggregate can read `failed` even though every
/// non-success child was merely cancelled; that session is `cancelled`,
/// not `failed`. One genuinely failed child makes the whole session
/// `failed`.
pub fn classify_failed_session(
    stage_status: StageStatus,
    parallel_children: Option<&[StageStatus]>,
) -> SessionStatus {
    match parallel_children {
        None => match stage_status {
            StageStatus::Cancelled => SessionStatus::Cancelled,
            StageStatus::TimedOut => SessionStatus::TimedOut,
            _ => SessionStatus::Failed,
        },
        Some(children) => {
            let non_success: Vec<StageStatus> = children
                .iter()
                .copied()
                .filter(|s| !matches!(s, StageStatus::Completed | StageStatus::Paused))
                .collect();
            if !non_success.is_empty()
                && non_success.iter().all(|s| *s == StageStatus::Cancelled)
            {
                SessionStatus::Cancelled
            } else {
                SessionStatus::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(stage: &str, agent: &str, error: Option<&str>) -> StageFailure {
        StageFailure::Single {
            stage_name: stage.into(),
            agent: agent.into(),
            error: error.map(str::to_owned),
        }
    }

    #[test]
    fn empty_failures_use_the_literal_fallback() {
        assert_eq!(aggregate_error_message(&[]), FALLBACK_MESSAGE);
    }

    #[test]
    fn one_single_stage_uses_the_single_format() {
        let msg = aggregate_error_message(&[single("analysis", "KubernetesAgent", Some("boom"))]);
        assert_eq!(
            msg,
            "Chain processing failed at stage 'analysis' (KubernetesAgent): boom"
        );
    }

    #[test]
    fn missing_error_falls_back_per_stage() {
        let msg = aggregate_error_message(&[single("analysis", "KubernetesAgent", None)]);
        assert!(msg.ends_with("Failed with no error message"));
    }

    #[test]
    fn multiple_single_stages_are_counted_and_listed() {
        let msg = aggregate_error_message(&[
            single("triage", "A1", Some("x")),
            single("analysis", "A2", Some("y")),
        ]);
        assert!(msg.starts_with("Chain processing failed (2 stage failures): "));
        assert!(msg.contains("stage 'triage' (A1): x"));
        assert!(msg.contains("stage 'analysis' (A2): y"));
    }

    #[test]
    fn parallel_stage_labels_each_agent() {
        let msg = aggregate_error_message(&[StageFailure::Parallel {
            stage_name: "investigate".into(),
            agents: vec![
                AgentFailure {
                    agent: "A1".into(),
                    status: StageStatus::Failed,
                    error: Some("boom".into()),
                },
                AgentFailure {
                    agent: "A2".into(),
                    status: StageStatus::Cancelled,
                    error: Some("cancelled by user".into()),
                },
            ],
        }]);
        assert_eq!(
            msg,
            "Parallel stage 'investigate' failed: 2 agents: A1 (failed): boom; \
             A2 (cancelled): cancelled by user"
        );
    }

    #[test]
    fn single_stage_classification() {
        assert_eq!(
            classify_failed_session(StageStatus::Cancelled, None),
            SessionStatus::Cancelled
        );
        assert_eq!(
            classify_failed_session(StageStatus::TimedOut, None),
            SessionStatus::TimedOut
        );
        assert_eq!(
            classify_failed_session(StageStatus::Failed, None),
            SessionStatus::Failed
        );
    }

    #[test]
    fn all_cancelled_children_cancel_the_session() {
        let children = [
            StageStatus::Completed,
            StageStatus::Cancelled,
            StageStatus::Cancelled,
        ];
        assert_eq!(
            classify_failed_session(StageStatus::Failed, Some(&children)),
            SessionStatus::Cancelled
        );
    }

    #[test]
    fn one_true_failure_fails_the_session() {
        let children = [StageStatus::Cancelled, StageStatus::Failed];
        assert_eq!(
            classify_failed_session(StageStatus::Failed, Some(&children)),
            SessionStatus::Failed
        );
        let children = [StageStatus::Cancelled, StageStatus::TimedOut];
        assert_eq!(
            classify_failed_session(StageStatus::Failed, Some(&children)),
            SessionStatus::Failed
        );
    }
}
