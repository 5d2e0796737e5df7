//! Per-session cancel tokens for running chains.
//!
//! Each running session registers a token; `POST .../cancel` flips it. The
//! cause (user vs timeout) lives in the process-wide tracker, not here.

use std::collections::HashMap;

use parking_lot::Mutex;

use tarsy_agent::CancelToken;

#[derive(Default)]
pub struct SessionCancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl SessionCancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a fresh token for a session.
    pub fn register(&self, session_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .insert(session_id.to_owned(), token.clone());
        token
    }

    /// Signal cancellation. Returns `false` when no chain is running for
    /// the session.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.tokens.lock().get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.tokens.lock().contains_key(session_id)
    }

    /// Remove the token when a chain finishes or pauses.
    pub fn remove(&self, session_id: &str) {
        self.tokens.lock().remove(session_id);
    }
}
