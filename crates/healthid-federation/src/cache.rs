//! Statement cache
//!
//! Parsed statements are cached by `(issuer, subject)`. Each entry lives no
//! longer than the statement's own `exp`. Concurrent lookups of the same key
//! share one fetch. Failed fetches are never cached, and the resolver evicts
//! an entry as soon as it fails verification.

use chrono::Utc;
use moka::future::Cache;
use moka::Expiry;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use healthid_core::EntityStatement;

use crate::error::{ResolveError, Result};

/// Cache key: `(issuer, subject)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatementKey {
    /// Issuer entity identifier
    pub issuer: String,
    /// Subject entity identifier
    pub subject: String,
}

impl StatementKey {
    /// Create a key
    pub fn new(issuer: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            subject: subject.into(),
        }
    }
}

/// Expires each entry at its statement's `exp`, optionally capped
struct StatementExpiry {
    max_ttl: Option<Duration>,
}

impl Expiry<StatementKey, Arc<EntityStatement>> for StatementExpiry {
    fn expire_after_create(
        &self,
        _key: &StatementKey,
        value: &Arc<EntityStatement>,
        _created_at: Instant,
    ) -> Option<Duration> {
        let remaining = (value.expires_at() - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        Some(match self.max_ttl {
            Some(cap) => remaining.min(cap),
            None => remaining,
        })
    }
}

/// Shared, expiry-bounded cache of parsed entity statements
#[derive(Clone)]
pub struct StatementCache {
    inner: Cache<StatementKey, Arc<EntityStatement>>,
}

impl std::fmt::Debug for StatementCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementCache")
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}

impl StatementCache {
    /// Create a cache holding at most `max_capacity` statements
    pub fn new(max_capacity: u64) -> Self {
        Self::build(max_capacity, None)
    }

    /// Create a cache that additionally caps every entry at `max_ttl`
    pub fn with_max_ttl(max_capacity: u64, max_ttl: Duration) -> Self {
        Self::build(max_capacity, Some(max_ttl))
    }

    fn build(max_capacity: u64, max_ttl: Option<Duration>) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(StatementExpiry { max_ttl })
                .build(),
        }
    }

    /// Return the cached statement or run `load` to fetch and parse it
    ///
    /// Concurrent callers for the same key await a single `load`. An error
    /// from `load` is returned to every waiter and nothing is cached.
    pub async fn get_or_load<F>(&self, key: StatementKey, load: F) -> Result<Arc<EntityStatement>>
    where
        F: Future<Output = Result<EntityStatement>>,
    {
        if let Some(hit) = self.inner.get(&key).await {
            debug!(issuer = %key.issuer, subject = %key.subject, "Using cached statement");
            return Ok(hit);
        }

        self.inner
            .try_get_with(key, async move { load.await.map(Arc::new) })
            .await
            .map_err(|e: Arc<ResolveError>| (*e).clone())
    }

    /// Look up a statement without loading
    pub async fn get(&self, issuer: &str, subject: &str) -> Option<Arc<EntityStatement>> {
        self.inner.get(&StatementKey::new(issuer, subject)).await
    }

    /// Evict a statement
    pub async fn invalidate(&self, issuer: &str, subject: &str) {
        debug!(issuer = %issuer, subject = %subject, "Evicting cached statement");
        self.inner.invalidate(&StatementKey::new(issuer, subject)).await;
    }

    /// Evict everything
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Approximate number of cached statements
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Apply pending maintenance (expirations, counts)
    pub async fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks().await;
    }
}
