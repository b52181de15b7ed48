//! Per-session cancellation registry.
//!
//! Every streamed turn registers a `CancelToken` under its session id.
//! `POST /v1/sessions/:id/stop` cancels exactly that token; the turn engine
//! observes it at its await points around generation.
//!
//! Registering the same session twice replaces the earlier token (last
//! registration wins). Removal is keyed by token identity, so a turn that
//! finishes late cannot drop a newer turn's registration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

/// A cancellation token that can be checked or awaited by the runtime.
#[derive(Clone, Debug)]
pub struct CancelToken {
    id: u64,
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            id: NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed),
            inner: CancellationToken::new(),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }

    fn same_as(&self, other: &CancelToken) -> bool {
        self.id == other.id
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the running turn's token per session id.
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a new cancel token for a session, replacing any
    /// earlier registration.
    pub fn register(&self, session_id: &str) -> CancelToken {
        let token = CancelToken::new();
        let previous = self
            .tokens
            .lock()
            .insert(session_id.to_owned(), token.clone());
        if previous.is_some() {
            tracing::debug!(session_id, "cancel registration replaced");
        }
        token
    }

    /// Cancel the running turn for a session. Returns true if one was registered.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.tokens.lock().get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove `token`'s registration. A no-op when the session is
    /// unregistered or now holds a different token.
    pub fn remove(&self, session_id: &str, token: &CancelToken) {
        let mut tokens = self.tokens.lock();
        if tokens.get(session_id).is_some_and(|t| t.same_as(token)) {
            tokens.remove(session_id);
        }
    }

    /// Check if a session has a registered (running) turn.
    pub fn is_running(&self, session_id: &str) -> bool {
        self.tokens.lock().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
