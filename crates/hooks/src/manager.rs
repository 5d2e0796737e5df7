//! Process-wide hook registries.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use tarsy_domain::interaction::{LLMInteraction, MCPInteraction};
use tarsy_domain::session::StageExecution;

use crate::hook::{Hook, HookState};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HookManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Registries for the four interaction kinds.
///
/// Registration happens at startup; triggering is read-mostly. Each trigger
/// snapshots the registry, runs every enabled hook concurrently, and returns
/// a `hook name -> success` map. A hook failure is demoted to `false` in the
/// map; it never affects siblings or the wrapped call.
#[derive(Default)]
pub struct HookManager {
    llm_hooks: RwLock<Vec<Arc<HookState<LLMInteraction>>>>,
    mcp_hooks: RwLock<Vec<Arc<HookState<MCPInteraction>>>>,
    mcp_list_hooks: RwLock<Vec<Arc<HookState<MCPInteraction>>>>,
    stage_hooks: RwLock<Vec<Arc<HookState<StageExecution>>>>,
}

impl HookManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_llm_hook(&self, hook: Arc<dyn Hook<LLMInteraction>>) {
        tracing::info!(hook = hook.name(), "registered LLM hook");
        self.llm_hooks.write().push(Arc::new(HookState::new(hook)));
    }

    pub fn register_mcp_hook(&self, hook: Arc<dyn Hook<MCPInteraction>>) {
        tracing::info!(hook = hook.name(), "registered MCP hook");
        self.mcp_hooks.write().push(Arc::new(HookState::new(hook)));
    }

    pub fn register_mcp_list_hook(&self, hook: Arc<dyn Hook<MCPInteraction>>) {
        tracing::info!(hook = hook.name(), "registered MCP list hook");
        self.mcp_list_hooks
            .write()
            .push(Arc::new(HookState::new(hook)));
    }

    pub fn register_stage_hook(&self, hook: Arc<dyn Hook<StageExecution>>) {
        tracing::info!(hook = hook.name(), "registered stage execution hook");
        self.stage_hooks
            .write()
            .push(Arc::new(HookState::new(hook)));
    }

    pub async fn trigger_llm_hooks(&self, interaction: &LLMInteraction) -> HashMap<String, bool> {
        trigger(&self.llm_hooks, interaction, "llm").await
    }

    pub async fn trigger_mcp_hooks(&self, interaction: &MCPInteraction) -> HashMap<String, bool> {
        trigger(&self.mcp_hooks, interaction, "mcp").await
    }

    pub async fn trigger_mcp_list_hooks(
        &self,
        interaction: &MCPInteraction,
    ) -> HashMap<String, bool> {
        trigger(&self.mcp_list_hooks, interaction, "mcp_list").await
    }

    pub async fn trigger_stage_hooks(
        &self,
        stage_execution: &StageExecution,
    ) -> HashMap<String, bool> {
        trigger(&self.stage_hooks, stage_execution, "stage_execution").await
    }
}

/// Snapshot the registry, then execute all enabled hooks concurrently.
async fn trigger<T: Send + Sync>(
    registry: &RwLock<Vec<Arc<HookState<T>>>>,
    interaction: &T,
    kind: &str,
) -> HashMap<String, bool> {
    let snapshot: Vec<Arc<HookState<T>>> = registry.read().iter().cloned().collect();
    if snapshot.is_empty() {
        return HashMap::new();
    }

    let enabled: Vec<&Arc<HookState<T>>> = snapshot.iter().filter(|h| h.is_enabled()).collect();
    let outcomes = futures_util::future::join_all(
        enabled.iter().map(|state| state.safe_execute(interaction)),
    )
    .await;

    let results: HashMap<String, bool> = enabled
        .iter()
        .zip(outcomes)
        .map(|(state, ok)| (state.name().to_string(), ok))
        .collect();

    tracing::debug!(kind, hooks = results.len(), "triggered hooks");
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tarsy_domain::{Error, Result};

    struct SinkHook {
        name: String,
        fail: bool,
        seen: Mutex<Vec<String>>,
    }

    impl SinkHook {
        fn new(name: &str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                fail,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl Hook<LLMInteraction> for SinkHook {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, interaction: &LLMInteraction) -> Result<()> {
            if self.fail {
                return Err(Error::Other("sink failure".into()));
            }
            self.seen.lock().push(interaction.request_id.clone());
            Ok(())
        }
    }

    fn llm_interaction() -> LLMInteraction {
        LLMInteraction::template("s1", None, "openai", "gpt-4o", vec![])
    }

    #[tokio::test]
    async fn empty_registry_yields_empty_map() {
        let manager = HookManager::new();
        let results = manager.trigger_llm_hooks(&llm_interaction()).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn all_hooks_receive_identical_data() {
        let manager = HookManager::new();
        let a = SinkHook::new("history", false);
        let b = SinkHook::new("dashboard", false);
        manager.register_llm_hook(a.clone());
        manager.register_llm_hook(b.clone());

        let interaction = llm_interaction();
        let results = manager.trigger_llm_hooks(&interaction).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results["history"], true);
        assert_eq!(results["dashboard"], true);
        assert_eq!(a.seen.lock().as_slice(), &[interaction.request_id.clone()]);
        assert_eq!(b.seen.lock().as_slice(), &[interaction.request_id.clone()]);
    }

    #[tokio::test]
    async fn failing_hook_does_not_affect_siblings() {
        let manager = HookManager::new();
        let bad = SinkHook::new("bad", true);
        let good = SinkHook::new("good", false);
        manager.register_llm_hook(bad);
        manager.register_llm_hook(good.clone());

        let results = manager.trigger_llm_hooks(&llm_interaction()).await;
        assert_eq!(results["bad"], false);
        assert_eq!(results["good"], true);
        assert_eq!(good.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn registries_are_independent() {
        let manager = HookManager::new();
        manager.register_llm_hook(SinkHook::new("llm-only", false));

        let mcp = MCPInteraction::tool_list_template("s1", None, None);
        let results = manager.trigger_mcp_list_hooks(&mcp).await;
        assert!(results.is_empty());
    }
}
