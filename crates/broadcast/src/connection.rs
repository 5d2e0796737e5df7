//! Dashboard connection manager.
//!
//! Tracks per-user connections and the two-way subscription mapping. All
//! three structures live behind one mutex so a disconnect cleans them
//! atomically; iteration happens over snapshots taken under the lock.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::envelope::Envelope;
use crate::subscription::{is_valid_channel, SubscriptionAction, SubscriptionResponse};

#[derive(Default)]
struct ConnectionMaps {
    /// `user_id -> outbound message channel`.
    active_connections: HashMap<String, mpsc::Sender<String>>,
    /// `user_id -> channels the user subscribed to`.
    user_subscriptions: HashMap<String, HashSet<String>>,
    /// `channel -> subscribed user ids`.
    channel_subscribers: HashMap<String, HashSet<String>>,
}

#[derive(Default)]
pub struct ConnectionManager {
    maps: Mutex<ConnectionMaps>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user's connection. A reconnect replaces the previous
    /// sender; existing subscriptions survive.
    pub fn connect(&self, user_id: &str, sender: mpsc::Sender<String>) {
        let mut maps = self.maps.lock();
        maps.active_connections.insert(user_id.to_owned(), sender);
        tracing::info!(user_id, "dashboard user connected");
    }

    /// Remove the user from all three maps atomically.
    pub fn disconnect(&self, user_id: &str) {
        let mut maps = self.maps.lock();
        maps.active_connections.remove(user_id);
        if let Some(channels) = maps.user_subscriptions.remove(user_id) {
            for channel in channels {
                if let Some(subscribers) = maps.channel_subscribers.get_mut(&channel) {
                    subscribers.remove(user_id);
                    if subscribers.is_empty() {
                        maps.channel_subscribers.remove(&channel);
                    }
                }
            }
        }
        tracing::info!(user_id, "dashboard user disconnected");
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.maps.lock().active_connections.contains_key(user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.maps.lock().active_connections.len()
    }

    /// Handle a subscribe/unsubscribe request. Maps are only mutated on a
    /// successful validation, and both directions update together.
    pub fn handle_subscription(
        &self,
        user_id: &str,
        action: SubscriptionAction,
        channel: &str,
    ) -> SubscriptionResponse {
        if !is_valid_channel(channel) {
            return SubscriptionResponse {
                action,
                channel: channel.to_owned(),
                success: false,
                message: Some(format!("unknown channel: {channel}")),
            };
        }

        let mut maps = self.maps.lock();
        if !maps.active_connections.contains_key(user_id) {
            return SubscriptionResponse {
                action,
                channel: channel.to_owned(),
                success: false,
                message: Some("user is not connected".into()),
            };
        }

        match action {
            SubscriptionAction::Subscribe => {
                maps.user_subscriptions
                    .entry(user_id.to_owned())
                    .or_default()
                    .insert(channel.to_owned());
                maps.channel_subscribers
                    .entry(channel.to_owned())
                    .or_default()
                    .insert(user_id.to_owned());
            }
            SubscriptionAction::Unsubscribe => {
                if let Some(channels) = maps.user_subscriptions.get_mut(user_id) {
                    channels.remove(channel);
                    if channels.is_empty() {
                        maps.user_subscriptions.remove(user_id);
                    }
                }
                if let Some(subscribers) = maps.channel_subscribers.get_mut(channel) {
                    subscribers.remove(user_id);
                    if subscribers.is_empty() {
                        maps.channel_subscribers.remove(channel);
                    }
                }
            }
        }

        SubscriptionResponse {
            action,
            channel: channel.to_owned(),
            success: true,
            message: None,
        }
    }

    /// Snapshot of a channel's subscribers.
    pub fn channel_subscribers(&self, channel: &str) -> HashSet<String> {
        self.maps
            .lock()
            .channel_subscribers
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    pub fn user_subscriptions(&self, user_id: &str) -> HashSet<String> {
        self.maps
            .lock()
            .user_subscriptions
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Push a serialized message to one user. Any send failure disconnects
    /// the user and cleans all three maps.
    pub async fn send_to_user(&self, user_id: &str, message: String) -> bool {
        let sender = self.maps.lock().active_connections.get(user_id).cloned();
        let Some(sender) = sender else {
            return false;
        };
        match sender.send(message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "send failed, disconnecting user");
                self.disconnect(user_id);
                false
            }
        }
    }

    /// Serialize an envelope and push it to one user.
    pub async fn send_envelope(&self, user_id: &str, envelope: &Envelope) -> bool {
        self.send_to_user(user_id, envelope.to_wire()).await
    }

    /// Send a serialized message to every subscriber of a channel except
    /// those in `exclude`. Returns the number of successful sends.
    pub async fn broadcast_raw(
        &self,
        channel: &str,
        message: &str,
        exclude: Option<&HashSet<String>>,
    ) -> usize {
        let subscribers = self.channel_subscribers(channel);
        let mut sent = 0;
        for user_id in subscribers {
            if exclude.map_or(false, |ex| ex.contains(&user_id)) {
                continue;
            }
            if self.send_to_user(&user_id, message.to_owned()).await {
                sent += 1;
            }
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(manager: &ConnectionManager, user: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(16);
        manager.connect(user, tx);
        rx
    }

    #[tokio::test]
    async fn subscribe_updates_both_directions() {
        let manager = ConnectionManager::new();
        let _rx = connect(&manager, "u1");

        let response =
            manager.handle_subscription("u1", SubscriptionAction::Subscribe, "dashboard_updates");
        assert!(response.success);
        assert!(manager.user_subscriptions("u1").contains("dashboard_updates"));
        assert!(manager
            .channel_subscribers("dashboard_updates")
            .contains("u1"));
    }

    #[tokio::test]
    async fn invalid_channel_is_rejected_without_mutation() {
        let manager = ConnectionManager::new();
        let _rx = connect(&manager, "u1");

        let response =
            manager.handle_subscription("u1", SubscriptionAction::Subscribe, "not_a_channel");
        assert!(!response.success);
        assert!(response.message.unwrap().contains("not_a_channel"));
        assert!(manager.user_subscriptions("u1").is_empty());
    }

    #[tokio::test]
    async fn unconnected_user_cannot_subscribe() {
        let manager = ConnectionManager::new();
        let response =
            manager.handle_subscription("ghost", SubscriptionAction::Subscribe, "system_health");
        assert!(!response.success);
    }

    #[tokio::test]
    async fn disconnect_cleans_all_maps() {
        let manager = ConnectionManager::new();
        let _rx = connect(&manager, "u1");
        manager.handle_subscription("u1", SubscriptionAction::Subscribe, "dashboard_updates");
        manager.handle_subscription("u1", SubscriptionAction::Subscribe, "session_abc");

        manager.disconnect("u1");

        assert!(!manager.is_connected("u1"));
        assert!(manager.user_subscriptions("u1").is_empty());
        assert!(manager.channel_subscribers("dashboard_updates").is_empty());
        assert!(manager.channel_subscribers("session_abc").is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_removes_single_channel() {
        let manager = ConnectionManager::new();
        let _rx = connect(&manager, "u1");
        manager.handle_subscription("u1", SubscriptionAction::Subscribe, "dashboard_updates");
        manager.handle_subscription("u1", SubscriptionAction::Subscribe, "system_health");

        let response =
            manager.handle_subscription("u1", SubscriptionAction::Unsubscribe, "system_health");
        assert!(response.success);
        assert!(manager.user_subscriptions("u1").contains("dashboard_updates"));
        assert!(!manager.user_subscriptions("u1").contains("system_health"));
    }

    #[tokio::test]
    async fn broadcast_counts_successful_sends_and_honors_exclusions() {
        let manager = ConnectionManager::new();
        let mut rx1 = connect(&manager, "u1");
        let mut rx2 = connect(&manager, "u2");
        let _rx3 = connect(&manager, "u3");
        for user in ["u1", "u2", "u3"] {
            manager.handle_subscription(user, SubscriptionAction::Subscribe, "dashboard_updates");
        }

        let exclude: HashSet<String> = ["u3".to_string()].into();
        let sent = manager
            .broadcast_raw("dashboard_updates", "{\"type\":\"x\"}", Some(&exclude))
            .await;
        assert_eq!(sent, 2);
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn failed_send_disconnects_user() {
        let manager = ConnectionManager::new();
        let rx = connect(&manager, "u1");
        manager.handle_subscription("u1", SubscriptionAction::Subscribe, "dashboard_updates");
        drop(rx); // closes the channel; the next send fails

        let sent = manager.send_to_user("u1", "msg".into()).await;
        assert!(!sent);
        assert!(!manager.is_connected("u1"));
        assert!(manager.channel_subscribers("dashboard_updates").is_empty());
    }

    #[tokio::test]
    async fn reconnect_replaces_sender_but_keeps_subscriptions() {
        let manager = ConnectionManager::new();
        let _old = connect(&manager, "u1");
        manager.handle_subscription("u1", SubscriptionAction::Subscribe, "system_health");

        let mut new_rx = connect(&manager, "u1");
        assert!(manager.user_subscriptions("u1").contains("system_health"));
        assert!(manager.send_to_user("u1", "hello".into()).await);
        assert_eq!(new_rx.recv().await.unwrap(), "hello");
    }
}
