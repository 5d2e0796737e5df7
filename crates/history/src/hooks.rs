//! History-side capture hooks.
//!
//! One hook per interaction kind, each forwarding the typed record to the
//! store. The stage hook decides create-vs-update on the
//! `started_at_us.is_none()` predicate: a row without a start time has
//! never been persisted.

use std::sync::Arc;

use tarsy_domain::interaction::{LLMInteraction, MCPInteraction};
use tarsy_domain::session::StageExecution;
use tarsy_domain::{Error, Result};
use tarsy_hooks::Hook;

use crate::service::HistoryStore;

pub struct LlmHistoryHook {
    store: Arc<HistoryStore>,
}

impl LlmHistoryHook {
    pub fn new(store: Arc<HistoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Hook<LLMInteraction> for LlmHistoryHook {
    fn name(&self) -> &str {
        "llm_history"
    }

    async fn execute(&self, interaction: &LLMInteraction) -> Result<()> {
        if self.store.store_llm_interaction(interaction).await {
            Ok(())
        } else if !self.store.enabled() {
            // Disabled history is a configured no-op, not a hook failure.
            Ok(())
        } else {
            Err(Error::Database(format!(
                "failed to store LLM interaction {}",
                interaction.request_id
            )))
        }
    }
}

pub struct McpHistoryHook {
    store: Arc<HistoryStore>,
}

impl McpHistoryHook {
    pub fn new(store: Arc<HistoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Hook<MCPInteraction> for McpHistoryHook {
    fn name(&self) -> &str {
        "mcp_history"
    }

    async fn execute(&self, interaction: &MCPInteraction) -> Result<()> {
        if self.store.store_mcp_interaction(interaction).await || !self.store.enabled() {
            Ok(())
        } else {
            Err(Error::Database(format!(
                "failed to store MCP interaction {}",
                interaction.request_id
            )))
        }
    }
}

pub struct McpListHistoryHook {
    store: Arc<HistoryStore>,
}

impl McpListHistoryHook {
    pub fn new(store: Arc<HistoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Hook<MCPInteraction> for McpListHistoryHook {
    fn name(&self) -> &str {
        "mcp_list_history"
    }

    async fn execute(&self, interaction: &MCPInteraction) -> Result<()> {
        if self.store.store_mcp_interaction(interaction).await || !self.store.enabled() {
            Ok(())
        } else {
            Err(Error::Database(format!(
                "failed to store MCP tool list {}",
                interaction.request_id
            )))
        }
    }
}

pub struct StageHistoryHook {
    store: Arc<HistoryStore>,
}

impl StageHistoryHook {
    pub fn new(store: Arc<HistoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Hook<StageExecution> for StageHistoryHook {
    fn name(&self) -> &str {
        "stage_history"
    }

    async fn execute(&self, stage: &StageExecution) -> Result<()> {
        if !self.store.enabled() {
            return Ok(());
        }
        if stage.started_at_us.is_none() {
            self.store.create_stage_execution(stage).await?;
        } else if !self.store.update_stage_execution(stage).await {
            return Err(Error::Database(format!(
                "failed to update stage execution {}",
                stage.execution_id
            )));
        }
        Ok(())
    }
}
