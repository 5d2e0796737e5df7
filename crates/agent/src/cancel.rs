//! Cooperative cancellation.
//!
//! Each running session gets a `CancelToken` checked at loop boundaries.
//! The process-wide `CancellationTracker` remembers *why* a session was
//! cancelled so handlers tearing down a task can classify it as a user
//! cancellation versus a timeout before finalizing records.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use tarsy_domain::status::CancelCause;

/// A cancellation flag shared between the session owner and its subtasks.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Process-wide map `session_id -> cancellation cause`.
#[derive(Default)]
pub struct CancellationTracker {
    causes: Mutex<HashMap<String, CancelCause>>,
}

impl CancellationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the cause. First mark wins: a user cancel that races a
    /// timeout stays a user cancel.
    pub fn mark(&self, session_id: &str, cause: CancelCause) {
        self.causes
            .lock()
            .entry(session_id.to_owned())
            .or_insert(cause);
    }

    pub fn cause(&self, session_id: &str) -> Option<CancelCause> {
        self.causes.lock().get(session_id).copied()
    }

    /// `false` when the session was never marked.
    pub fn is_user_cancel(&self, session_id: &str) -> bool {
        self.cause(session_id) == Some(CancelCause::UserCancel)
    }

    /// Classify a torn-down task: an unmarked session means the scope was
    /// torn down by a timeout.
    pub fn classify(&self, session_id: &str) -> CancelCause {
        self.cause(session_id).unwrap_or(CancelCause::Timeout)
    }

    /// Called in the terminal finalizer.
    pub fn clear(&self, session_id: &str) {
        self.causes.lock().remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());

        // Clones share state.
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn tracker_mark_and_classify() {
        let tracker = CancellationTracker::new();
        assert!(!tracker.is_user_cancel("s1"));
        assert_eq!(tracker.classify("s1"), CancelCause::Timeout);

        tracker.mark("s1", CancelCause::UserCancel);
        assert!(tracker.is_user_cancel("s1"));
        assert_eq!(tracker.classify("s1"), CancelCause::UserCancel);
    }

    #[test]
    fn first_mark_wins() {
        let tracker = CancellationTracker::new();
        tracker.mark("s1", CancelCause::UserCancel);
        tracker.mark("s1", CancelCause::Timeout);
        assert!(tracker.is_user_cancel("s1"));
    }

    #[test]
    fn clear_removes_the_mark() {
        let tracker = CancellationTracker::new();
        tracker.mark("s1", CancelCause::Timeout);
        tracker.clear("s1");
        assert!(tracker.cause("s1").is_none());
        // Clearing twice is harmless.
        tracker.clear("s1");
    }

    #[test]
    fn sessions_are_independent() {
        let tracker = CancellationTracker::new();
        tracker.mark("s1", CancelCause::UserCancel);
        assert!(!tracker.is_user_cancel("s2"));
    }
}
