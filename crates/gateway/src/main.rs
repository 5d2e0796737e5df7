use std::net::SocketAddr;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use tarsy_domain::config::{AgentRegistry, Settings};

mod api;
mod bootstrap;
mod runtime;
mod state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tarsy=info,tower_http=info")),
        )
        .json()
        .init();

    tracing::info!("tarsy starting");

    // ── Configuration ──────────────────────────────────────────────
    let settings_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tarsy.toml".into());
    let settings = Settings::load_or_default(&settings_path);

    let registry_path =
        std::env::var("TARSY_AGENTS_FILE").unwrap_or_else(|_| "agents.yaml".into());
    let registry = match std::fs::read_to_string(&registry_path) {
        Ok(raw) => {
            let registry = AgentRegistry::from_yaml(&raw)?;
            registry.validate(
                bootstrap::BUILTIN_AGENT_CLASSES,
                bootstrap::BUILTIN_MCP_SERVER_IDS,
            )?;
            registry
        }
        Err(e) => {
            tracing::warn!(path = %registry_path, error = %e, "no agent registry, starting empty");
            AgentRegistry::default()
        }
    };

    tracing::info!(
        agents = registry.agents.len(),
        chains = registry.agent_chains.len(),
        port = settings.server.port,
        "configuration loaded"
    );

    // ── State + startup recovery ───────────────────────────────────
    let state = bootstrap::build_state(settings.clone(), registry, Default::default()).await;
    let orphaned = state.history.cleanup_orphaned_sessions().await;
    if orphaned > 0 {
        tracing::warn!(count = orphaned, "terminated orphaned sessions from previous run");
    }

    // ── Serve ──────────────────────────────────────────────────────
    let app = api::router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
