//! Subscription validation and typed responses.

use serde::{Deserialize, Serialize};

use crate::envelope::{DASHBOARD_UPDATES, SYSTEM_HEALTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

/// Answer to a subscribe/unsubscribe request. The connection manager only
/// mutates its maps when `success` is true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionResponse {
    pub action: SubscriptionAction,
    pub channel: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A channel name is valid when it is one of the fixed topics or a
/// per-session topic.
pub fn is_valid_channel(channel: &str) -> bool {
    if channel == DASHBOARD_UPDATES || channel == SYSTEM_HEALTH {
        return true;
    }
    match channel.strip_prefix("session_") {
        Some(rest) => !rest.is_empty(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_channels_are_valid() {
        assert!(is_valid_channel("dashboard_updates"));
        assert!(is_valid_channel("system_health"));
    }

    #[test]
    fn session_channels_need_an_id() {
        assert!(is_valid_channel("session_abc-123"));
        assert!(!is_valid_channel("session_"));
    }

    #[test]
    fn arbitrary_channels_are_rejected() {
        assert!(!is_valid_channel("random_topic"));
        assert!(!is_valid_channel(""));
    }
}
