//! Alert payloads and per-alert tool-server selection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::timestamp::now_us;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Submission payload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An alert as submitted by an external source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_type: String,
    pub data: Value,
    #[serde(default)]
    pub runbook: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    /// Microseconds since epoch; stamped on receipt when absent.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Optional narrowing of the tool servers/tools the dispatched agents
    /// may use for this alert.
    #[serde(default)]
    pub mcp: Option<MCPSelectionConfig>,
}

/// The typed alert threaded through a chain run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingAlert {
    pub alert_type: String,
    pub severity: String,
    pub timestamp_us: i64,
    pub data: Value,
    #[serde(default)]
    pub runbook: Option<String>,
}

impl ProcessingAlert {
    pub fn from_alert(alert: &Alert) -> Self {
        Self {
            alert_type: alert.alert_type.clone(),
            severity: alert.severity.clone().unwrap_or_else(|| "warning".into()),
            timestamp_us: alert.timestamp.unwrap_or_else(now_us),
            data: alert.data.clone(),
            runbook: alert.runbook.clone(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP selection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-alert override narrowing which tool servers (and optionally which
/// tools on each) the dispatched agents may use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MCPSelectionConfig {
    pub servers: Vec<MCPServerSelection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MCPServerSelection {
    pub name: String,
    /// `None` allows every tool the server advertises.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
}

impl MCPSelectionConfig {
    pub fn server_names(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_alert_defaults() {
        let alert = Alert {
            alert_type: "kubernetes".into(),
            data: serde_json::json!({"pod": "p1", "namespace": "default"}),
            runbook: None,
            severity: None,
            timestamp: None,
            mcp: None,
        };
        let processing = ProcessingAlert::from_alert(&alert);
        assert_eq!(processing.severity, "warning");
        assert!(processing.timestamp_us > 0);
    }

    #[test]
    fn selection_config_round_trips() {
        let config = MCPSelectionConfig {
            servers: vec![
                MCPServerSelection {
                    name: "kubernetes-server".into(),
                    tools: Some(vec!["list_pods".into(), "describe_pod".into()]),
                },
                MCPServerSelection {
                    name: "aws-server".into(),
                    tools: None,
                },
            ],
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: MCPSelectionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn selection_without_tools_omits_field() {
        let config = MCPSelectionConfig {
            servers: vec![MCPServerSelection {
                name: "aws-server".into(),
                tools: None,
            }],
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("tools"));
    }
}
