//! Real-time broadcast fabric for dashboard subscribers.
//!
//! Connections are per-user message channels; subscriptions map users onto
//! named topics (`dashboard_updates`, `system_health`, `session_<id>`).
//! The broadcaster layers optional batching and per-user throttling on top,
//! and the update service builds the typed envelopes the dashboard consumes.
//! Delivery is best-effort over live connections; durability belongs to the
//! history store.

pub mod broadcaster;
pub mod connection;
pub mod envelope;
pub mod hooks;
pub mod stream;
pub mod subscription;
pub mod update_service;

pub use broadcaster::{BroadcastStats, Broadcaster, MessageBatch};
pub use connection::ConnectionManager;
pub use envelope::{session_channel, Envelope, DASHBOARD_UPDATES, SYSTEM_HEALTH};
pub use stream::{chunk_response, StreamChunk, StreamingPublisher};
pub use subscription::{SubscriptionAction, SubscriptionResponse};
pub use update_service::DashboardUpdateService;
