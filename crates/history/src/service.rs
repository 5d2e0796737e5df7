//! History store facade.
//!
//! High-level operations over the repository with integrated retry and
//! graceful degradation: disabled by configuration means every mutating
//! operation is a debug-logged no-op, and a failed initialization leaves the
//! store unhealthy while the rest of the system keeps running.

use std::collections::HashMap;

use parking_lot::Mutex;
use rusqlite::Connection;
use serde::Serialize;

use tarsy_domain::config::HistorySettings;
use tarsy_domain::interaction::{LLMInteraction, MCPInteraction};
use tarsy_domain::session::{AlertSession, StageExecution};
use tarsy_domain::status::SessionStatus;
use tarsy_domain::{Error, Result};

use crate::repository::{
    HistoryRepository, PageInfo, SessionDetail, SessionFilters, SessionSummaryRow,
};
use crate::retry::RetryPolicy;
use crate::schema::init_schema;

/// Message stamped onto sessions orphaned by a restart.
pub const ORPHAN_ERROR_MESSAGE: &str =
    "Backend was restarted - session terminated unexpectedly";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Health
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryHealth {
    Healthy,
    Degraded,
    Disabled,
    Unhealthy,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Summary statistics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub total_interactions: usize,
    pub llm_interactions: usize,
    pub mcp_communications: usize,
    pub errors_count: usize,
    pub total_duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_statistics: Option<ChainStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainStats {
    pub total_stages: usize,
    pub completed_stages: usize,
    pub failed_stages: usize,
    pub stages_by_agent: HashMap<String, usize>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HistoryStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HistoryStore {
    enabled: bool,
    db: Option<Mutex<Connection>>,
    retry: RetryPolicy,
}

impl HistoryStore {
    /// Open the backend and create the schema. Initialization failure does
    /// not propagate: the store comes up unhealthy and capture writes
    /// degrade to no-ops.
    pub fn initialize(settings: &HistorySettings) -> Self {
        if !settings.enabled {
            tracing::info!("history disabled via configuration");
            return Self {
                enabled: false,
                db: None,
                retry: RetryPolicy::default(),
            };
        }

        if !settings.database_url.starts_with("sqlite") {
            tracing::warn!(
                url = %settings.database_url,
                "unsupported backend scheme, falling back to in-memory SQLite"
            );
        }
        let opened = match settings.sqlite_path() {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        };

        let db = match opened {
            Ok(conn) => match init_schema(&conn) {
                Ok(()) => {
                    tracing::info!(url = %settings.database_url, "history store initialized");
                    Some(Mutex::new(conn))
                }
                Err(e) => {
                    tracing::error!(error = %e, "history schema initialization failed");
                    None
                }
            },
            Err(e) => {
                tracing::error!(error = %e, "failed to open history backend");
                None
            }
        };

        Self {
            enabled: true,
            db,
            retry: RetryPolicy::default(),
        }
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Self {
        Self::initialize(&HistorySettings {
            database_url: "sqlite://:memory:".into(),
            ..Default::default()
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn health(&self) -> HistoryHealth {
        if !self.enabled {
            return HistoryHealth::Disabled;
        }
        let Some(db) = &self.db else {
            return HistoryHealth::Unhealthy;
        };
        let conn = db.lock();
        match conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)) {
            Ok(_) => HistoryHealth::Healthy,
            Err(e) => {
                tracing::warn!(error = %e, "history health probe failed");
                HistoryHealth::Degraded
            }
        }
    }

    /// Run one repository operation with the retry policy. Transient errors
    /// back off exponentially; anything else fails immediately. Returns
    /// `None` when disabled, unhealthy, or exhausted.
    async fn with_retry<T, F>(&self, operation_name: &str, retryable: bool, op: F) -> Option<T>
    where
        F: Fn(&HistoryRepository<'_>) -> Result<T>,
    {
        if !self.enabled {
            tracing::debug!(operation = operation_name, "history disabled - skipping");
            return None;
        }
        let Some(db) = &self.db else {
            tracing::debug!(operation = operation_name, "history unavailable - skipping");
            return None;
        };

        let mut last_error: Option<Error> = None;
        for attempt in 0..=self.retry.max_retries {
            let result = {
                let conn = db.lock();
                op(&HistoryRepository::new(&conn))
            };
            match result {
                Ok(value) => return Some(value),
                Err(e) => {
                    let message = e.to_string();
                    let should_retry = retryable
                        && self.retry.is_retryable(&message)
                        && attempt < self.retry.max_retries;
                    if !should_retry {
                        tracing::error!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            error = %message,
                            "history operation failed"
                        );
                        return None;
                    }
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "retrying history operation"
                    );
                    last_error = Some(e);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        if let Some(e) = last_error {
            tracing::error!(
                operation = operation_name,
                error = %e,
                "history operation failed after all retries"
            );
        }
        None
    }

    // ── Session lifecycle ────────────────────────────────────────────

    /// Create a session row. Never retried: an error after a commit could
    /// mint a duplicate session.
    pub async fn create_session(&self, session: &AlertSession) -> Option<String> {
        self.with_retry("create_session", false, |repo| {
            repo.create_alert_session(session)
        })
        .await
    }

    pub async fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        error_message: Option<&str>,
        final_analysis: Option<&str>,
    ) -> bool {
        if session_id.is_empty() {
            return false;
        }
        self.with_retry("update_session_status", true, |repo| {
            repo.update_session_status(session_id, status, error_message, final_analysis)
        })
        .await
        .unwrap_or(false)
    }

    pub async fn update_session_current_stage(
        &self,
        session_id: &str,
        current_stage_index: i64,
        current_stage_id: &str,
    ) -> bool {
        self.with_retry("update_session_current_stage", true, |repo| {
            repo.update_session_current_stage(session_id, current_stage_index, current_stage_id)
        })
        .await
        .unwrap_or(false)
    }

    pub async fn get_session(&self, session_id: &str) -> Option<AlertSession> {
        self.with_retry("get_session", true, |repo| repo.get_alert_session(session_id))
            .await
            .flatten()
    }

    // ── Stage executions ─────────────────────────────────────────────

    /// Stage rows are the spine of chain tracking: failing to create one is
    /// fatal to the chain.
    pub async fn create_stage_execution(&self, stage: &StageExecution) -> Result<String> {
        self.with_retry("create_stage_execution", true, |repo| {
            repo.create_stage_execution(stage)
        })
        .await
        .ok_or_else(|| {
            Error::Database(format!(
                "failed to create stage execution record for stage '{}'",
                stage.stage_name
            ))
        })
    }

    pub async fn update_stage_execution(&self, stage: &StageExecution) -> bool {
        self.with_retry("update_stage_execution", true, |repo| {
            repo.update_stage_execution(stage)
        })
        .await
        .unwrap_or(false)
    }

    pub async fn get_stage_execution(&self, execution_id: &str) -> Option<StageExecution> {
        self.with_retry("get_stage_execution", true, |repo| {
            repo.get_stage_execution(execution_id)
        })
        .await
        .flatten()
    }

    pub async fn get_parallel_stage_children(
        &self,
        parent_execution_id: &str,
    ) -> Vec<StageExecution> {
        self.with_retry("get_parallel_stage_children", true, |repo| {
            repo.get_parallel_stage_children(parent_execution_id)
        })
        .await
        .unwrap_or_default()
    }

    // ── Interaction logging ──────────────────────────────────────────

    pub async fn store_llm_interaction(&self, interaction: &LLMInteraction) -> bool {
        if interaction.session_id.is_empty() {
            return false;
        }
        let mut record = interaction.clone();
        if record.step_description.is_empty() {
            record.step_description = record.default_step_description();
        }
        self.with_retry("store_llm_interaction", true, |repo| {
            repo.create_llm_interaction(&record)
        })
        .await
        .is_some()
    }

    pub async fn store_mcp_interaction(&self, interaction: &MCPInteraction) -> bool {
        if interaction.session_id.is_empty() {
            return false;
        }
        let mut record = interaction.clone();
        if record.step_description.is_empty() {
            record.step_description = record.default_step_description();
        }
        self.with_retry("store_mcp_interaction", true, |repo| {
            repo.create_mcp_interaction(&record)
        })
        .await
        .is_some()
    }

    // ── Query surface ────────────────────────────────────────────────

    pub async fn get_sessions_list(
        &self,
        filters: &SessionFilters,
        page: u32,
        page_size: u32,
    ) -> (Vec<SessionSummaryRow>, PageInfo) {
        self.with_retry("get_sessions_list", true, |repo| {
            repo.get_alert_sessions(filters, page, page_size)
        })
        .await
        .unwrap_or_else(|| {
            (
                Vec::new(),
                PageInfo {
                    page,
                    page_size,
                    total_pages: 0,
                    total_items: 0,
                },
            )
        })
    }

    pub async fn get_session_detail(&self, session_id: &str) -> Option<SessionDetail> {
        self.with_retry("get_session_detail", true, |repo| {
            repo.get_session_with_stages(session_id)
        })
        .await
        .flatten()
    }

    pub async fn get_filter_options(&self) -> (Vec<String>, Vec<String>) {
        self.with_retry("get_filter_options", true, |repo| repo.get_filter_options())
            .await
            .unwrap_or_default()
    }

    /// Summary statistics computed from a session detail.
    pub fn calculate_session_stats(detail: &SessionDetail) -> SessionStats {
        let timeline = &detail.chronological_timeline;
        let llm = timeline.iter().filter(|e| e.event_type == "llm").count();
        let mcp = timeline.iter().filter(|e| e.event_type == "mcp").count();
        let errors = timeline.iter().filter(|e| !e.success).count();
        let total_duration_ms = timeline.iter().filter_map(|e| e.duration_ms).sum();

        let chain_statistics = detail.session.chain_id.as_ref().map(|_| {
            let mut stages_by_agent: HashMap<String, usize> = HashMap::new();
            for stage in &detail.stages {
                *stages_by_agent.entry(stage.agent.clone()).or_default() += 1;
            }
            ChainStats {
                total_stages: detail.stages.len(),
                completed_stages: detail
                    .stages
                    .iter()
                    .filter(|s| s.status == tarsy_domain::status::StageStatus::Completed)
                    .count(),
                failed_stages: detail
                    .stages
                    .iter()
                    .filter(|s| s.status == tarsy_domain::status::StageStatus::Failed)
                    .count(),
                stages_by_agent,
            }
        });

        SessionStats {
            total_interactions: timeline.len(),
            llm_interactions: llm,
            mcp_communications: mcp,
            errors_count: errors,
            total_duration_ms,
            chain_statistics,
        }
    }

    // ── Maintenance ──────────────────────────────────────────────────

    /// Terminate sessions left non-terminal by a previous process instance.
    /// Idempotent: a second invocation finds nothing to update.
    pub async fn cleanup_orphaned_sessions(&self) -> usize {
        let orphans = self
            .with_retry("cleanup_orphaned_sessions", true, |repo| {
                repo.get_active_sessions()
            })
            .await
            .unwrap_or_default();

        let mut cleaned = 0;
        for session in orphans {
            let updated = self
                .with_retry("cleanup_orphaned_sessions", true, |repo| {
                    repo.update_session_status(
                        &session.session_id,
                        SessionStatus::Failed,
                        Some(ORPHAN_ERROR_MESSAGE),
                        None,
                    )
                })
                .await
                .unwrap_or(false);
            if updated {
                cleaned += 1;
                tracing::debug!(session_id = %session.session_id, "marked orphaned session failed");
            }
        }

        if cleaned > 0 {
            tracing::info!(count = cleaned, "cleaned up orphaned sessions during startup");
        } else {
            tracing::info!("no orphaned sessions required cleanup during startup");
        }
        cleaned
    }
}
