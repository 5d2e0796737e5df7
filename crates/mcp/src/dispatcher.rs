//! Audited tool dispatch with execution-time enforcement.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use tarsy_domain::interaction::MCPInteraction;
use tarsy_domain::{Error, Result};
use tarsy_hooks::{HookManager, McpCaptureScope, McpResultPatch};

use crate::selection::{validate_tool_selection, EffectiveSelection};
use crate::traits::{McpServer, ToolDefinition};

/// Error type tag on tool results produced by failed or disallowed calls.
pub const TOOL_EXECUTION_FAILURE: &str = "tool_execution_failure";

/// One structured tool-call intent from the iteration loop.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub server: String,
    pub tool: String,
    pub arguments: Value,
}

/// Outcome of one tool call, successful or not. Failures are data the
/// iteration loop feeds back to the model, never exceptions.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl ToolResult {
    fn success(tool: &str, result: Value) -> Self {
        Self {
            tool: tool.to_owned(),
            result: Some(result),
            error: None,
            error_type: None,
        }
    }

    fn failure(tool: &str, error: impl Into<String>) -> Self {
        Self {
            tool: tool.to_owned(),
            result: None,
            error: Some(error.into()),
            error_type: Some(TOOL_EXECUTION_FAILURE.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolDispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-stage tool dispatcher bound to one session's effective allow-list.
pub struct ToolDispatcher {
    session_id: String,
    stage_execution_id: Option<String>,
    servers: HashMap<String, Arc<dyn McpServer>>,
    allowed: EffectiveSelection,
    hooks: Arc<HookManager>,
}

impl ToolDispatcher {
    /// `servers` must contain a handle for every server in `allowed`;
    /// servers outside the allow-list are simply never reachable.
    pub fn new(
        session_id: impl Into<String>,
        stage_execution_id: Option<String>,
        servers: HashMap<String, Arc<dyn McpServer>>,
        allowed: EffectiveSelection,
        hooks: Arc<HookManager>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            stage_execution_id,
            servers,
            allowed,
            hooks,
        }
    }

    pub fn set_stage_execution_id(&mut self, stage_execution_id: Option<String>) {
        self.stage_execution_id = stage_execution_id;
    }

    pub fn allowed_servers(&self) -> Vec<&str> {
        self.allowed.keys().map(String::as_str).collect()
    }

    fn is_allowed(&self, server: &str, tool: &str) -> bool {
        match self.allowed.get(server) {
            None => false,
            Some(None) => true,
            Some(Some(tools)) => tools.iter().any(|t| t == tool),
        }
    }

    /// Check any per-server tool narrowing against the tools those servers
    /// actually advertise. Called once before any stage runs; a bad
    /// selection rejects the session.
    pub async fn validate_tool_selection(&self) -> Result<()> {
        for (server_name, tools) in &self.allowed {
            let Some(requested) = tools else { continue };
            let server = self.servers.get(server_name).ok_or_else(|| {
                Error::McpServerSelection {
                    requested: vec![server_name.clone()],
                    available: self.servers.keys().cloned().collect(),
                }
            })?;
            let advertised: Vec<String> = server
                .list_tools()
                .await?
                .into_iter()
                .map(|t| t.name)
                .collect();
            validate_tool_selection(server_name, requested, &advertised)?;
        }
        Ok(())
    }

    /// List the tools visible to the agent, filtered through the allow-list
    /// and recorded through the tool-list capture scope.
    pub async fn list_available_tools(
        &self,
        server_filter: Option<&str>,
    ) -> HashMap<String, Vec<ToolDefinition>> {
        let template = MCPInteraction::tool_list_template(
            &self.session_id,
            self.stage_execution_id.clone(),
            server_filter.map(str::to_owned),
        );
        let scope = McpCaptureScope::new(template, self.hooks.clone());

        let mut listing: HashMap<String, Vec<ToolDefinition>> = HashMap::new();
        let mut first_error: Option<String> = None;
        for (server_name, allowed_tools) in &self.allowed {
            if server_filter.map_or(false, |f| f != server_name) {
                continue;
            }
            let Some(server) = self.servers.get(server_name) else {
                continue;
            };
            match server.list_tools().await {
                Ok(tools) => {
                    let filtered: Vec<ToolDefinition> = tools
                        .into_iter()
                        .filter(|tool| match allowed_tools {
                            None => true,
                            Some(allowed) => allowed.iter().any(|a| a == &tool.name),
                        })
                        .collect();
                    listing.insert(server_name.clone(), filtered);
                }
                Err(e) => {
                    tracing::warn!(server = %server_name, error = %e, "tool listing failed");
                    first_error.get_or_insert_with(|| e.to_string());
                }
            }
        }

        if let Some(error) = first_error {
            scope.complete_failure(error).await;
        } else {
            let names: HashMap<String, Vec<String>> = listing
                .iter()
                .map(|(server, tools)| {
                    (
                        server.clone(),
                        tools.iter().map(|t| t.name.clone()).collect(),
                    )
                })
                .collect();
            scope
                .complete_success(McpResultPatch {
                    available_tools: Some(names),
                    ..Default::default()
                })
                .await;
        }

        listing
    }

    /// Execute one tool call. Allow-list violations and server failures both
    /// come back as error records so the loop can show them to the model.
    pub async fn execute_tool_call(&self, call: &ToolCallRequest) -> ToolResult {
        if !self.is_allowed(&call.server, &call.tool) {
            tracing::warn!(
                server = %call.server,
                tool = %call.tool,
                "tool call outside the effective selection"
            );
            return ToolResult::failure(
                &call.tool,
                format!(
                    "tool '{}' on server '{}' is not in the allowed tool set",
                    call.tool, call.server
                ),
            );
        }
        let Some(server) = self.servers.get(&call.server) else {
            return ToolResult::failure(
                &call.tool,
                format!("server '{}' is not connected", call.server),
            );
        };

        let template = MCPInteraction::tool_call_template(
            &self.session_id,
            self.stage_execution_id.clone(),
            &call.server,
            &call.tool,
            call.arguments.clone(),
        );
        let scope = McpCaptureScope::new(template, self.hooks.clone());

        match server.call_tool(&call.tool, call.arguments.clone()).await {
            Ok(result) => {
                scope
                    .complete_success(McpResultPatch {
                        tool_result: Some(result.clone()),
                        ..Default::default()
                    })
                    .await;
                ToolResult::success(&call.tool, result)
            }
            Err(e) => {
                let message = e.to_string();
                scope.complete_failure(message.clone()).await;
                ToolResult::failure(&call.tool, message)
            }
        }
    }

    /// Execute a batch of calls, grouping results by server name.
    pub async fn execute_tool_calls(
        &self,
        calls: &[ToolCallRequest],
    ) -> HashMap<String, Vec<ToolResult>> {
        let mut grouped: HashMap<String, Vec<ToolResult>> = HashMap::new();
        for call in calls {
            let result = self.execute_tool_call(call).await;
            grouped.entry(call.server.clone()).or_default().push(result);
        }
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tarsy_hooks::Hook;

    /// Scripted server: known tools, `fail_tool` errors on call.
    struct FakeServer {
        name: String,
        tools: Vec<&'static str>,
        fail_tool: Option<&'static str>,
    }

    #[async_trait::async_trait]
    impl McpServer for FakeServer {
        fn server_name(&self) -> &str {
            &self.name
        }

        async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
            Ok(self
                .tools
                .iter()
                .map(|name| ToolDefinition {
                    name: (*name).to_owned(),
                    description: None,
                    input_schema: serde_json::json!({"type": "object"}),
                })
                .collect())
        }

        async fn call_tool(&self, tool_name: &str, _arguments: Value) -> Result<Value> {
            if self.fail_tool == Some(tool_name) {
                return Err(Error::Other(format!("{tool_name} exploded")));
            }
            Ok(serde_json::json!({"tool": tool_name, "ok": true}))
        }
    }

    struct McpRecorder(Arc<Mutex<Vec<MCPInteraction>>>);

    #[async_trait::async_trait]
    impl Hook<MCPInteraction> for McpRecorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn execute(&self, interaction: &MCPInteraction) -> Result<()> {
            self.0.lock().push(interaction.clone());
            Ok(())
        }
    }

    fn dispatcher(
        allowed: EffectiveSelection,
    ) -> (ToolDispatcher, Arc<Mutex<Vec<MCPInteraction>>>, Arc<Mutex<Vec<MCPInteraction>>>) {
        let hooks = Arc::new(HookManager::new());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let lists = Arc::new(Mutex::new(Vec::new()));
        hooks.register_mcp_hook(Arc::new(McpRecorder(calls.clone())));
        hooks.register_mcp_list_hook(Arc::new(McpRecorder(lists.clone())));

        let servers: HashMap<String, Arc<dyn McpServer>> = HashMap::from([
            (
                "kubernetes-server".to_string(),
                Arc::new(FakeServer {
                    name: "kubernetes-server".into(),
                    tools: vec!["list_pods", "describe_pod"],
                    fail_tool: Some("describe_pod"),
                }) as Arc<dyn McpServer>,
            ),
            (
                "aws-server".to_string(),
                Arc::new(FakeServer {
                    name: "aws-server".into(),
                    tools: vec!["list_instances"],
                    fail_tool: None,
                }) as Arc<dyn McpServer>,
            ),
        ]);

        (
            ToolDispatcher::new("s1", Some("exec-1".into()), servers, allowed, hooks),
            calls,
            lists,
        )
    }

    fn allow_all() -> EffectiveSelection {
        HashMap::from([
            ("kubernetes-server".to_string(), None),
            ("aws-server".to_string(), None),
        ])
    }

    #[tokio::test]
    async fn successful_call_is_recorded() {
        let (dispatcher, calls, _lists) = dispatcher(allow_all());
        let result = dispatcher
            .execute_tool_call(&ToolCallRequest {
                server: "kubernetes-server".into(),
                tool: "list_pods".into(),
                arguments: serde_json::json!({"namespace": "default"}),
            })
            .await;

        assert!(!result.is_error());
        assert_eq!(result.result.as_ref().unwrap()["ok"], true);

        let recorded = calls.lock();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].success);
        assert_eq!(recorded[0].stage_execution_id.as_deref(), Some("exec-1"));
    }

    #[tokio::test]
    async fn server_failure_becomes_error_record() {
        let (dispatcher, calls, _lists) = dispatcher(allow_all());
        let result = dispatcher
            .execute_tool_call(&ToolCallRequest {
                server: "kubernetes-server".into(),
                tool: "describe_pod".into(),
                arguments: serde_json::json!({}),
            })
            .await;

        assert!(result.is_error());
        assert_eq!(result.error_type.as_deref(), Some(TOOL_EXECUTION_FAILURE));
        assert!(result.error.as_ref().unwrap().contains("exploded"));

        let recorded = calls.lock();
        assert_eq!(recorded.len(), 1);
        assert!(!recorded[0].success);
    }

    #[tokio::test]
    async fn disallowed_tool_is_rejected_without_reaching_the_server() {
        let allowed = HashMap::from([(
            "kubernetes-server".to_string(),
            Some(vec!["list_pods".to_string()]),
        )]);
        let (dispatcher, calls, _lists) = dispatcher(allowed);

        let result = dispatcher
            .execute_tool_call(&ToolCallRequest {
                server: "kubernetes-server".into(),
                tool: "describe_pod".into(),
                arguments: serde_json::json!({}),
            })
            .await;
        assert!(result.is_error());
        assert_eq!(result.error_type.as_deref(), Some(TOOL_EXECUTION_FAILURE));
        assert!(result.error.as_ref().unwrap().contains("not in the allowed"));
        assert!(calls.lock().is_empty());

        // Same for a server outside the selection.
        let result = dispatcher
            .execute_tool_call(&ToolCallRequest {
                server: "aws-server".into(),
                tool: "list_instances".into(),
                arguments: serde_json::json!({}),
            })
            .await;
        assert!(result.is_error());
    }

    #[tokio::test]
    async fn listing_filters_through_allow_list() {
        let allowed = HashMap::from([
            (
                "kubernetes-server".to_string(),
                Some(vec!["list_pods".to_string()]),
            ),
            ("aws-server".to_string(), None),
        ]);
        let (dispatcher, _calls, lists) = dispatcher(allowed);

        let listing = dispatcher.list_available_tools(None).await;
        assert_eq!(listing["kubernetes-server"].len(), 1);
        assert_eq!(listing["kubernetes-server"][0].name, "list_pods");
        assert_eq!(listing["aws-server"].len(), 1);

        let recorded = lists.lock();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].success);
        let available = recorded[0].available_tools.as_ref().unwrap();
        assert_eq!(available["kubernetes-server"], vec!["list_pods"]);
    }

    #[tokio::test]
    async fn tool_selection_validation() {
        let allowed = HashMap::from([(
            "kubernetes-server".to_string(),
            Some(vec!["list_pods".to_string()]),
        )]);
        let (dispatcher_instance, _calls, _lists) = dispatcher(allowed);
        dispatcher_instance.validate_tool_selection().await.unwrap();

        let bad = HashMap::from([(
            "kubernetes-server".to_string(),
            Some(vec!["drain_node".to_string()]),
        )]);
        let (dispatcher_instance, _calls, _lists) = dispatcher(bad);
        let err = dispatcher_instance.validate_tool_selection().await.unwrap_err();
        assert!(matches!(err, Error::McpToolSelection { .. }));
    }

    #[tokio::test]
    async fn batch_results_group_by_server() {
        let (dispatcher, _calls, _lists) = dispatcher(allow_all());
        let grouped = dispatcher
            .execute_tool_calls(&[
                ToolCallRequest {
                    server: "kubernetes-server".into(),
                    tool: "list_pods".into(),
                    arguments: serde_json::json!({}),
                },
                ToolCallRequest {
                    server: "aws-server".into(),
                    tool: "list_instances".into(),
                    arguments: serde_json::json!({}),
                },
                ToolCallRequest {
                    server: "kubernetes-server".into(),
                    tool: "describe_pod".into(),
                    arguments: serde_json::json!({}),
                },
            ])
            .await;

        assert_eq!(grouped["kubernetes-server"].len(), 2);
        assert_eq!(grouped["aws-server"].len(), 1);
        assert!(grouped["kubernetes-server"][1].is_error());
    }
}
