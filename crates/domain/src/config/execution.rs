use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Iteration-loop and capture limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Timeout for each individual LLM call, in seconds.
    #[serde(default = "d_llm_iteration_timeout")]
    pub llm_iteration_timeout_secs: u64,
    /// Overall wall-clock budget for one session, in seconds.
    #[serde(default = "d_session_timeout")]
    pub session_timeout_secs: u64,
    /// Iteration budget used when neither the agent nor the stage overrides it.
    #[serde(default = "d_max_iterations")]
    pub default_max_iterations: u32,
    /// Per-message cap applied by the capture layer to user-role content.
    #[serde(default = "d_max_message_size")]
    pub max_llm_message_content_size: usize,
    /// Toggles chunked response streaming to the dashboard.
    #[serde(default)]
    pub enable_llm_streaming: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            llm_iteration_timeout_secs: d_llm_iteration_timeout(),
            session_timeout_secs: d_session_timeout(),
            default_max_iterations: d_max_iterations(),
            max_llm_message_content_size: d_max_message_size(),
            enable_llm_streaming: false,
        }
    }
}

fn d_llm_iteration_timeout() -> u64 {
    120
}

fn d_session_timeout() -> u64 {
    600
}

fn d_max_iterations() -> u32 {
    10
}

fn d_max_message_size() -> usize {
    1_048_576 // 1 MiB per user-role message
}
