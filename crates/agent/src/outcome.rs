//! Iteration loop outcomes.

use tarsy_domain::interaction::LLMMessage;
use tarsy_domain::status::{CancelCause, StageStatus};

/// What one agent's loop produced. The scheduler switches on the variant;
/// there is no control-flow via panics or sentinel errors.
#[derive(Debug, Clone)]
pub enum AgentOutcome {
    /// The agent reached a final answer (possibly a forced conclusion).
    Completed {
        analysis: String,
        conversation: Vec<LLMMessage>,
    },
    /// The budget ran out and policy forbids a forced conclusion; the stage
    /// waits for external resumption.
    Paused { iteration: u32 },
    /// The loop was torn down; `cause` distinguishes user cancel from
    /// timeout.
    Cancelled { cause: CancelCause },
    /// The loop failed outright (provider error, dispatch error).
    Failed { error: String },
}

impl AgentOutcome {
    pub fn stage_status(&self) -> StageStatus {
        match self {
            AgentOutcome::Completed { .. } => StageStatus::Completed,
            AgentOutcome::Paused { .. } => StageStatus::Paused,
            AgentOutcome::Cancelled {
                cause: CancelCause::UserCancel,
            } => StageStatus::Cancelled,
            AgentOutcome::Cancelled {
                cause: CancelCause::Timeout,
            } => StageStatus::TimedOut,
            AgentOutcome::Failed { .. } => StageStatus::Failed,
        }
    }

    pub fn error_message(&self) -> Option<String> {
        match self {
            AgentOutcome::Failed { error } => Some(error.clone()),
            AgentOutcome::Cancelled {
                cause: CancelCause::UserCancel,
            } => Some("cancelled by user".into()),
            AgentOutcome::Cancelled {
                cause: CancelCause::Timeout,
            } => Some("timed out".into()),
            _ => None,
        }
    }
}
