//! Startup wiring: builds every service and binds the hook fabric to its
//! history and dashboard implementations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tarsy_agent::CancellationTracker;
use tarsy_broadcast::hooks::{
    LlmDashboardHook, LlmStreamingHook, McpDashboardHook, McpListDashboardHook, StageDashboardHook,
};
use tarsy_broadcast::{Broadcaster, ConnectionManager, DashboardUpdateService, DASHBOARD_UPDATES};
use tarsy_domain::config::{AgentRegistry, ProviderKind, Settings};
use tarsy_history::hooks::{LlmHistoryHook, McpHistoryHook, McpListHistoryHook, StageHistoryHook};
use tarsy_history::HistoryStore;
use tarsy_hooks::HookManager;
use tarsy_mcp::McpServer;
use tarsy_providers::{ProviderCtor, ProviderRegistry};

use crate::runtime::cancel_map::SessionCancelMap;
use crate::state::AppState;

/// Agent class names reserved by the engine; YAML agents must not collide.
pub const BUILTIN_AGENT_CLASSES: &[&str] = &["SynthesisAgent"];

/// MCP server ids reserved by the engine.
pub const BUILTIN_MCP_SERVER_IDS: &[&str] = &[];

/// Fleet-wide channel throttle: at most 30 messages per user per minute.
const DASHBOARD_THROTTLE: (usize, Duration) = (30, Duration::from_secs(60));

/// Build the full application state and register the eight capture hooks
/// (LLM / MCP / MCP-list / stage, each into history and dashboard).
pub async fn build_state(
    settings: Settings,
    registry: AgentRegistry,
    provider_ctors: HashMap<ProviderKind, ProviderCtor>,
) -> AppState {
    let settings = Arc::new(settings);
    let registry = Arc::new(registry);

    // Persistence.
    let history = Arc::new(HistoryStore::initialize(&settings.history));

    // Broadcast fabric.
    let connections = Arc::new(ConnectionManager::new());
    let broadcaster = Arc::new(Broadcaster::new(connections.clone()));
    broadcaster.set_throttle_limit(DASHBOARD_UPDATES, DASHBOARD_THROTTLE.0, DASHBOARD_THROTTLE.1);
    broadcaster.spawn_flusher(Duration::from_millis(250));
    let updates = Arc::new(DashboardUpdateService::new(broadcaster.clone()));

    // Hook fabric: history first, dashboard second.
    let hooks = Arc::new(HookManager::new());
    hooks.register_llm_hook(Arc::new(LlmHistoryHook::new(history.clone())));
    hooks.register_llm_hook(Arc::new(LlmDashboardHook::new(broadcaster.clone())));
    hooks.register_mcp_hook(Arc::new(McpHistoryHook::new(history.clone())));
    hooks.register_mcp_hook(Arc::new(McpDashboardHook::new(broadcaster.clone())));
    hooks.register_mcp_list_hook(Arc::new(McpListHistoryHook::new(history.clone())));
    hooks.register_mcp_list_hook(Arc::new(McpListDashboardHook::new(broadcaster.clone())));
    hooks.register_stage_hook(Arc::new(StageHistoryHook::new(history.clone())));
    hooks.register_stage_hook(Arc::new(StageDashboardHook::new(broadcaster.clone())));
    if settings.execution.enable_llm_streaming {
        hooks.register_llm_hook(Arc::new(LlmStreamingHook::new(broadcaster.clone())));
    }

    // Providers and tool servers. Wire adapters come from the embedding
    // application; with an empty constructor table every configured provider
    // is recorded unavailable and surfaces at session start.
    let providers = Arc::new(ProviderRegistry::from_settings(
        &settings.llm,
        &provider_ctors,
    ));
    let mcp_servers: Arc<HashMap<String, Arc<dyn McpServer>>> = Arc::new(HashMap::new());

    AppState {
        settings,
        registry,
        hooks,
        history,
        connections,
        broadcaster,
        updates,
        providers,
        mcp_servers,
        cancel_map: Arc::new(SessionCancelMap::new()),
        cancel_tracker: Arc::new(CancellationTracker::new()),
    }
}

#[cfg(test)]
pub mod test_support {
    //! Fixture state for runtime tests: in-memory history, fake providers
    //! and tool servers injected directly.

    use super::*;
    use tarsy_providers::LlmProvider;

    pub async fn state_with(
        registry: AgentRegistry,
        providers: Vec<Arc<dyn LlmProvider>>,
        default_provider: Option<String>,
        mcp_servers: HashMap<String, Arc<dyn McpServer>>,
    ) -> AppState {
        let settings = Settings {
            history: tarsy_domain::config::HistorySettings {
                database_url: "sqlite://:memory:".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut state = build_state(settings, registry, HashMap::new()).await;
        state.providers = Arc::new(ProviderRegistry::with_providers(
            providers,
            default_provider,
        ));
        state.mcp_servers = Arc::new(mcp_servers);
        state
    }
}
