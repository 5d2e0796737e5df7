use std::collections::HashMap;
use std::sync::Arc;

use tarsy_agent::CancellationTracker;
use tarsy_broadcast::{Broadcaster, ConnectionManager, DashboardUpdateService};
use tarsy_domain::config::{AgentRegistry, Settings};
use tarsy_history::HistoryStore;
use tarsy_hooks::HookManager;
use tarsy_mcp::McpServer;
use tarsy_providers::ProviderRegistry;

use crate::runtime::cancel_map::SessionCancelMap;

/// Shared application state passed to all API handlers and the runtime.
///
/// Fields are grouped by concern:
/// - **Configuration**: settings, agent/chain registry
/// - **Capture & persistence**: hook manager, history store
/// - **Broadcast**: connections, broadcaster, update service
/// - **Execution**: providers, tool servers, cancellation state
#[derive(Clone)]
pub struct AppState {
    // ── Configuration ─────────────────────────────────────────────────
    pub settings: Arc<Settings>,
    pub registry: Arc<AgentRegistry>,

    // ── Capture & persistence ─────────────────────────────────────────
    pub hooks: Arc<HookManager>,
    pub history: Arc<HistoryStore>,

    // ── Broadcast ─────────────────────────────────────────────────────
    pub connections: Arc<ConnectionManager>,
    pub broadcaster: Arc<Broadcaster>,
    pub updates: Arc<DashboardUpdateService>,

    // ── Execution ─────────────────────────────────────────────────────
    pub providers: Arc<ProviderRegistry>,
    /// Connected tool servers by id.
    pub mcp_servers: Arc<HashMap<String, Arc<dyn McpServer>>>,
    /// Per-session cancel tokens for running chains.
    pub cancel_map: Arc<SessionCancelMap>,
    /// Process-wide cancellation causes for post-mortem classification.
    pub cancel_tracker: Arc<CancellationTracker>,
}
