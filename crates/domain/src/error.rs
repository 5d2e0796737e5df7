use std::fmt;

/// Shared error type used across all Tarsy crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("MCP server selection: requested {requested:?}, available {available:?}")]
    McpServerSelection {
        requested: Vec<String>,
        available: Vec<String>,
    },

    #[error("MCP tool selection on '{server}': requested {requested:?}, available {available:?}")]
    McpToolSelection {
        server: String,
        requested: Vec<String>,
        available: Vec<String>,
    },

    #[error("{0} client not available")]
    ProviderUnavailable(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("database: {0}")]
    Database(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Short machine-readable tag for API error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Config(_) => "configuration_error",
            Error::McpServerSelection { .. } => "mcp_server_selection_error",
            Error::McpToolSelection { .. } => "mcp_tool_selection_error",
            Error::ProviderUnavailable(_) => "provider_unavailable",
            Error::Provider { .. } => "provider_error",
            Error::Database(_) => "database_error",
            Error::Timeout(_) => "timeout",
            Error::Other(_) => "other",
        }
    }
}

impl fmt::Display for SelectionSets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requested: [{}], available: [{}]",
            self.requested.join(", "),
            self.available.join(", ")
        )
    }
}

/// Requested-vs-available detail carried on selection errors for API
/// responses.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SelectionSets {
    pub requested: Vec<String>,
    pub available: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_unavailable_message_format() {
        let err = Error::ProviderUnavailable("openai".into());
        assert_eq!(err.to_string(), "openai client not available");
    }

    #[test]
    fn selection_error_carries_both_sets() {
        let err = Error::McpServerSelection {
            requested: vec!["unknown-server".into()],
            available: vec!["kubernetes-server".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("unknown-server"));
        assert!(msg.contains("kubernetes-server"));
        assert_eq!(err.kind(), "mcp_server_selection_error");
    }
}
