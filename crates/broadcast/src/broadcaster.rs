//! Channel broadcaster with batching and per-user throttling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use crate::connection::ConnectionManager;
use crate::envelope::Envelope;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MessageBatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accumulates messages for one channel until a size or age bound is hit.
pub struct MessageBatch {
    max_size: usize,
    max_age: Duration,
    messages: Vec<Value>,
    first_added_at: Option<Instant>,
}

impl MessageBatch {
    pub fn new(max_size: usize, max_age: Duration) -> Self {
        Self {
            max_size,
            max_age,
            messages: Vec::new(),
            first_added_at: None,
        }
    }

    pub fn add(&mut self, message: Value) {
        if self.first_added_at.is_none() {
            self.first_added_at = Some(Instant::now());
        }
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Ready when either bound is reached.
    pub fn is_ready(&self) -> bool {
        if self.messages.is_empty() {
            return false;
        }
        if self.messages.len() >= self.max_size {
            return true;
        }
        self.first_added_at
            .map_or(false, |t| t.elapsed() >= self.max_age)
    }

    /// Drain into a single batch envelope. Empty batches yield `None`.
    pub fn take(&mut self) -> Option<Envelope> {
        if self.messages.is_empty() {
            return None;
        }
        let messages = std::mem::take(&mut self.messages);
        self.first_added_at = None;
        Some(Envelope::MessageBatch {
            count: messages.len(),
            messages,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Throttling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy)]
struct ThrottleLimit {
    max_messages: usize,
    time_window: Duration,
}

/// Counters exposed for the dashboard metrics envelope.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct BroadcastStats {
    pub sent: u64,
    pub throttled: u64,
    pub batched: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Broadcaster
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Broadcaster {
    connections: Arc<ConnectionManager>,
    batching_enabled: AtomicBool,
    batch_max_size: Mutex<usize>,
    batch_max_age: Mutex<Duration>,
    batches: Mutex<HashMap<String, MessageBatch>>,
    throttle_limits: Mutex<HashMap<String, ThrottleLimit>>,
    /// `(channel, user) -> send timestamps inside the sliding window`.
    windows: Mutex<HashMap<(String, String), Vec<Instant>>>,
    sent: AtomicU64,
    throttled: AtomicU64,
    batched: AtomicU64,
}

impl Broadcaster {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self {
            connections,
            batching_enabled: AtomicBool::new(false),
            batch_max_size: Mutex::new(10),
            batch_max_age: Mutex::new(Duration::from_secs(1)),
            batches: Mutex::new(HashMap::new()),
            throttle_limits: Mutex::new(HashMap::new()),
            windows: Mutex::new(HashMap::new()),
            sent: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            batched: AtomicU64::new(0),
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn configure_batching(&self, enabled: bool, max_size: usize, max_age: Duration) {
        self.batching_enabled.store(enabled, Ordering::Release);
        *self.batch_max_size.lock() = max_size.max(1);
        *self.batch_max_age.lock() = max_age;
    }

    pub fn set_throttle_limit(&self, channel: &str, max_messages: usize, time_window: Duration) {
        self.throttle_limits.lock().insert(
            channel.to_owned(),
            ThrottleLimit {
                max_messages,
                time_window,
            },
        );
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            sent: self.sent.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            batched: self.batched.load(Ordering::Relaxed),
        }
    }

    /// Would a message to `user_id` on `channel` exceed the channel's limit?
    /// A `true` verdict records nothing; a `false` verdict stamps the send
    /// into the user's window. Unthrottled channels always pass.
    fn should_throttle_user(&self, user_id: &str, channel: &str) -> bool {
        let limit = match self.throttle_limits.lock().get(channel) {
            Some(limit) => *limit,
            None => return false,
        };

        let mut windows = self.windows.lock();
        let window = windows
            .entry((channel.to_owned(), user_id.to_owned()))
            .or_default();
        let cutoff = Instant::now();
        window.retain(|t| cutoff.duration_since(*t) < limit.time_window);

        if window.len() >= limit.max_messages {
            true
        } else {
            window.push(cutoff);
            false
        }
    }

    /// Broadcast an envelope to a channel's subscribers.
    ///
    /// With batching enabled the message lands in the channel's batch and is
    /// emitted later (as a `message_batch` envelope) when the batch becomes
    /// ready; the return value is the count of sends performed now.
    pub async fn broadcast(&self, channel: &str, envelope: &Envelope) -> usize {
        if self.batching_enabled.load(Ordering::Acquire) {
            let ready = {
                let mut batches = self.batches.lock();
                let max_size = *self.batch_max_size.lock();
                let max_age = *self.batch_max_age.lock();
                let batch = batches
                    .entry(channel.to_owned())
                    .or_insert_with(|| MessageBatch::new(max_size, max_age));
                batch.add(serde_json::to_value(envelope).unwrap_or(Value::Null));
                self.batched.fetch_add(1, Ordering::Relaxed);
                if batch.is_ready() {
                    batch.take()
                } else {
                    None
                }
            };
            match ready {
                Some(batch_envelope) => self.deliver(channel, &batch_envelope).await,
                None => 0,
            }
        } else {
            self.deliver(channel, envelope).await
        }
    }

    /// Emit any batches that crossed their age bound. Called by the
    /// background flusher.
    pub async fn flush_ready_batches(&self) -> usize {
        let ready: Vec<(String, Envelope)> = {
            let mut batches = self.batches.lock();
            batches
                .iter_mut()
                .filter(|(_, b)| b.is_ready())
                .filter_map(|(channel, b)| b.take().map(|e| (channel.clone(), e)))
                .collect()
        };
        let mut sent = 0;
        for (channel, envelope) in ready {
            sent += self.deliver(&channel, &envelope).await;
        }
        sent
    }

    /// Emit everything pending regardless of readiness (shutdown path).
    pub async fn flush_all(&self) -> usize {
        let pending: Vec<(String, Envelope)> = {
            let mut batches = self.batches.lock();
            batches
                .iter_mut()
                .filter_map(|(channel, b)| b.take().map(|e| (channel.clone(), e)))
                .collect()
        };
        let mut sent = 0;
        for (channel, envelope) in pending {
            sent += self.deliver(&channel, &envelope).await;
        }
        sent
    }

    /// Spawn the periodic batch flusher.
    pub fn spawn_flusher(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let broadcaster = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                broadcaster.flush_ready_batches().await;
            }
        })
    }

    /// Per-user delivery with throttle enforcement. Suppression is silent
    /// for the user and counted in the stats.
    async fn deliver(&self, channel: &str, envelope: &Envelope) -> usize {
        let wire = envelope.to_wire();
        let subscribers = self.connections.channel_subscribers(channel);
        let mut delivered = 0;
        for user_id in subscribers {
            if self.should_throttle_user(&user_id, channel) {
                self.throttled.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if self.connections.send_to_user(&user_id, wire.clone()).await {
                delivered += 1;
                self.sent.fetch_add(1, Ordering::Relaxed);
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::SubscriptionAction;
    use tokio::sync::mpsc;

    fn setup(users: &[&str], channel: &str) -> (Arc<Broadcaster>, Vec<mpsc::Receiver<String>>) {
        let connections = Arc::new(ConnectionManager::new());
        let mut receivers = Vec::new();
        for user in users {
            let (tx, rx) = mpsc::channel(64);
            connections.connect(user, tx);
            connections.handle_subscription(user, SubscriptionAction::Subscribe, channel);
            receivers.push(rx);
        }
        (Arc::new(Broadcaster::new(connections)), receivers)
    }

    fn envelope() -> Envelope {
        Envelope::DashboardUpdate {
            data: serde_json::json!({"k": "v"}),
            timestamp_us: 1,
        }
    }

    // ── MessageBatch ───────────────────────────────────────────────

    #[test]
    fn batch_ready_by_size() {
        let mut batch = MessageBatch::new(2, Duration::from_secs(10));
        assert!(!batch.is_ready());
        batch.add(serde_json::json!(1));
        assert!(!batch.is_ready());
        batch.add(serde_json::json!(2));
        assert!(batch.is_ready());
    }

    #[test]
    fn batch_ready_by_age() {
        let mut batch = MessageBatch::new(10, Duration::from_millis(0));
        batch.add(serde_json::json!(1));
        assert!(batch.is_ready());
    }

    #[test]
    fn empty_batch_is_never_ready_and_takes_nothing() {
        let mut batch = MessageBatch::new(1, Duration::from_millis(0));
        assert!(!batch.is_ready());
        assert!(batch.take().is_none());
    }

    #[test]
    fn take_produces_batch_envelope_and_resets() {
        let mut batch = MessageBatch::new(5, Duration::from_secs(1));
        batch.add(serde_json::json!({"a": 1}));
        batch.add(serde_json::json!({"b": 2}));
        let Some(Envelope::MessageBatch { count, messages }) = batch.take() else {
            panic!("expected a batch envelope");
        };
        assert_eq!(count, 2);
        assert_eq!(messages.len(), 2);
        assert!(batch.is_empty());
    }

    // ── Throttling ─────────────────────────────────────────────────

    #[tokio::test]
    async fn throttle_suppresses_per_user_per_channel() {
        let (broadcaster, mut receivers) = setup(&["u1", "u2", "u3"], "dashboard_updates");
        broadcaster.set_throttle_limit("dashboard_updates", 1, Duration::from_secs(60));

        let mut total = 0;
        for _ in 0..3 {
            total += broadcaster.broadcast("dashboard_updates", &envelope()).await;
        }
        // Each user received exactly one message; six deliveries suppressed.
        assert_eq!(total, 3);
        assert_eq!(broadcaster.stats().throttled, 6);
        assert_eq!(broadcaster.stats().sent, 3);
        for rx in receivers.iter_mut() {
            assert!(rx.try_recv().is_ok());
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn unthrottled_channels_pass_everything() {
        let (broadcaster, mut receivers) = setup(&["u1"], "dashboard_updates");
        for _ in 0..5 {
            broadcaster.broadcast("dashboard_updates", &envelope()).await;
        }
        assert_eq!(broadcaster.stats().throttled, 0);
        let mut received = 0;
        while receivers[0].try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 5);
    }

    #[tokio::test]
    async fn window_eviction_frees_capacity() {
        let (broadcaster, _receivers) = setup(&["u1"], "dashboard_updates");
        broadcaster.set_throttle_limit("dashboard_updates", 2, Duration::from_millis(10));

        assert_eq!(broadcaster.broadcast("dashboard_updates", &envelope()).await, 1);
        assert_eq!(broadcaster.broadcast("dashboard_updates", &envelope()).await, 1);
        assert_eq!(broadcaster.broadcast("dashboard_updates", &envelope()).await, 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(broadcaster.broadcast("dashboard_updates", &envelope()).await, 1);
    }

    #[tokio::test]
    async fn limits_are_independent_per_channel_and_user() {
        let connections = Arc::new(ConnectionManager::new());
        let (tx1, _rx1) = mpsc::channel(64);
        let (tx2, _rx2) = mpsc::channel(64);
        connections.connect("u1", tx1);
        connections.connect("u2", tx2);
        for channel in ["dashboard_updates", "system_health"] {
            connections.handle_subscription("u1", SubscriptionAction::Subscribe, channel);
        }
        connections.handle_subscription("u2", SubscriptionAction::Subscribe, "dashboard_updates");

        let broadcaster = Broadcaster::new(connections);
        broadcaster.set_throttle_limit("dashboard_updates", 1, Duration::from_secs(60));

        assert_eq!(broadcaster.broadcast("dashboard_updates", &envelope()).await, 2);
        // u1 and u2 both exhausted on dashboard_updates...
        assert_eq!(broadcaster.broadcast("dashboard_updates", &envelope()).await, 0);
        // ...but u1 is free on the unthrottled system_health channel.
        assert_eq!(broadcaster.broadcast("system_health", &envelope()).await, 1);
    }

    // ── Batching ───────────────────────────────────────────────────

    #[tokio::test]
    async fn batching_accumulates_until_size_bound() {
        let (broadcaster, mut receivers) = setup(&["u1"], "dashboard_updates");
        broadcaster.configure_batching(true, 3, Duration::from_secs(60));

        assert_eq!(broadcaster.broadcast("dashboard_updates", &envelope()).await, 0);
        assert_eq!(broadcaster.broadcast("dashboard_updates", &envelope()).await, 0);
        // Third message fills the batch; one combined envelope goes out.
        assert_eq!(broadcaster.broadcast("dashboard_updates", &envelope()).await, 1);

        let wire = receivers[0].try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value["type"], "message_batch");
        assert_eq!(value["count"], 3);
        assert_eq!(value["messages"].as_array().unwrap().len(), 3);
        assert_eq!(broadcaster.stats().batched, 3);
    }

    #[tokio::test]
    async fn age_expired_batches_flush() {
        let (broadcaster, mut receivers) = setup(&["u1"], "dashboard_updates");
        broadcaster.configure_batching(true, 100, Duration::from_millis(5));

        broadcaster.broadcast("dashboard_updates", &envelope()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(broadcaster.flush_ready_batches().await, 1);

        let wire = receivers[0].try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value["type"], "message_batch");
        assert_eq!(value["count"], 1);
    }

    #[tokio::test]
    async fn batching_disabled_sends_immediately() {
        let (broadcaster, mut receivers) = setup(&["u1"], "dashboard_updates");
        assert_eq!(broadcaster.broadcast("dashboard_updates", &envelope()).await, 1);
        let wire = receivers[0].try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value["type"], "dashboard_update");
    }

    #[tokio::test]
    async fn flush_all_drains_unready_batches() {
        let (broadcaster, _receivers) = setup(&["u1"], "dashboard_updates");
        broadcaster.configure_batching(true, 100, Duration::from_secs(60));
        broadcaster.broadcast("dashboard_updates", &envelope()).await;
        assert_eq!(broadcaster.flush_ready_batches().await, 0);
        assert_eq!(broadcaster.flush_all().await, 1);
    }
}
