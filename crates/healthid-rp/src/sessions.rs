//! Pending logins
//!
//! Sessions waiting for their IdP callback, keyed by `state`. Entries
//! expire after the login timeout and are removed on first use, so a
//! `state` value can complete at most one login.

use moka::future::Cache;
use std::time::Duration;
use tracing::debug;

use crate::flow::RedirectedToIdp;

/// Default number of concurrently pending logins
pub const DEFAULT_PENDING_CAPACITY: u64 = 10_000;

/// In-memory store of logins awaiting their callback
#[derive(Clone)]
pub struct PendingLogins {
    sessions: Cache<String, RedirectedToIdp>,
}

impl PendingLogins {
    /// Create a store whose entries live at most `timeout`
    pub fn new(capacity: u64, timeout: Duration) -> Self {
        Self {
            sessions: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(timeout)
                .build(),
        }
    }

    /// Park a session until its callback arrives
    pub async fn insert(&self, pending: RedirectedToIdp) {
        debug!(session_id = %pending.session().id(), "Parking login session");
        self.sessions.insert(pending.state().to_string(), pending).await;
    }

    /// Remove and return the session for `state`
    pub async fn take(&self, state: &str) -> Option<RedirectedToIdp> {
        self.sessions.remove(state).await
    }

    /// Approximate number of pending sessions
    pub fn len(&self) -> u64 {
        self.sessions.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush expirations and counters
    pub async fn run_pending_tasks(&self) {
        self.sessions.run_pending_tasks().await;
    }
}

impl std::fmt::Debug for PendingLogins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingLogins")
            .field("entries", &self.sessions.entry_count())
            .finish()
    }
}
