use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// History store settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Durable history configuration.
///
/// With `enabled = false` every capture write becomes a no-op and queries
/// return empty results. The `postgres_*` pool options only apply to server
/// deployments; the SQLite path records them but does not use them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySettings {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Backend URL. `sqlite::memory:` selects an in-memory database
    /// (the test-mode default).
    #[serde(default = "d_database_url")]
    pub database_url: String,
    #[serde(default = "d_pool_size")]
    pub postgres_pool_size: u32,
    #[serde(default = "d_max_overflow")]
    pub postgres_max_overflow: u32,
    #[serde(default = "d_pool_timeout")]
    pub postgres_pool_timeout_secs: u64,
    #[serde(default = "d_pool_recycle")]
    pub postgres_pool_recycle_secs: u64,
    #[serde(default = "d_true")]
    pub postgres_pool_pre_ping: bool,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            database_url: d_database_url(),
            postgres_pool_size: d_pool_size(),
            postgres_max_overflow: d_max_overflow(),
            postgres_pool_timeout_secs: d_pool_timeout(),
            postgres_pool_recycle_secs: d_pool_recycle(),
            postgres_pool_pre_ping: true,
        }
    }
}

fn d_true() -> bool {
    true
}

fn d_database_url() -> String {
    "sqlite://tarsy_history.db".into()
}

fn d_pool_size() -> u32 {
    5
}

fn d_max_overflow() -> u32 {
    10
}

fn d_pool_timeout() -> u64 {
    30
}

fn d_pool_recycle() -> u64 {
    3600
}

impl HistorySettings {
    /// Filesystem path for a `sqlite://` URL; `None` for in-memory or
    /// non-SQLite backends.
    pub fn sqlite_path(&self) -> Option<&str> {
        let rest = self.database_url.strip_prefix("sqlite://")?;
        if rest == ":memory:" || rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url == "sqlite://:memory:" || self.database_url == "sqlite::memory:"
    }
}
