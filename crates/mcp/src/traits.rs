use serde::{Deserialize, Serialize};
use serde_json::Value;

use tarsy_domain::Result;

/// One tool advertised by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

/// A connected tool server. The wire protocol (process spawn, handshake,
/// transport) lives outside this workspace; the engine only needs discovery
/// and dispatch.
#[async_trait::async_trait]
pub trait McpServer: Send + Sync {
    fn server_name(&self) -> &str;

    /// Tools this server advertises.
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>>;

    /// Invoke one tool and return its result payload.
    async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<Value>;
}
