//! Durable history for alert processing audit trails.
//!
//! Sessions, stage executions, and captured LLM/tool interactions are
//! appended to SQLite through a facade that retries transient backend
//! failures and degrades to no-ops when history is disabled or unhealthy.
//! The query side reconstructs per-session timelines ordered purely by
//! microsecond timestamps.

pub mod hooks;
pub mod repository;
pub mod retry;
pub mod schema;
pub mod service;

pub use repository::{PageInfo, SessionDetail, SessionFilters, SessionSummaryRow, TimelineEvent};
pub use service::{HistoryHealth, HistoryStore};
