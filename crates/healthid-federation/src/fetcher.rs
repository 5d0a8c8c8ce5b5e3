//! Statement fetching
//!
//! The resolver never talks to the network directly. It asks a
//! `StatementFetcher` for raw signed statements:
//!
//! - entity configurations from `{entity}/.well-known/openid-federation`
//! - subordinate statements from the superior's fetch endpoint with `?sub=`
//!
//! `HttpStatementFetcher` is the production backend. `MemoryFetcher` serves
//! pre-signed statements from memory for tests and offline tooling.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{ResolveError, Result};

/// Well-known path of an entity configuration
pub const WELL_KNOWN_PATH: &str = "/.well-known/openid-federation";

/// Fetch endpoint assumed when a superior publishes none
pub fn default_fetch_endpoint(superior: &str) -> String {
    format!("{}/fetch", superior.trim_end_matches('/'))
}

/// Source of raw signed entity statements
#[async_trait]
pub trait StatementFetcher: Send + Sync {
    /// Fetch the self-issued entity configuration of `entity`
    async fn fetch_entity_configuration(&self, entity: &str) -> Result<String>;

    /// Fetch the statement `superior` issues about `subject`
    ///
    /// `fetch_endpoint` is the superior's published federation fetch endpoint
    /// (or the default derived from its identifier).
    async fn fetch_subordinate_statement(
        &self,
        superior: &str,
        fetch_endpoint: &str,
        subject: &str,
    ) -> Result<String>;

    /// Get a description of this fetcher (for logging)
    fn description(&self) -> &str {
        "statement fetcher"
    }
}

// ============================================================================
// HTTP
// ============================================================================

/// Fetches statements over HTTPS with `reqwest`
#[derive(Debug, Clone)]
pub struct HttpStatementFetcher {
    http_client: reqwest::Client,
}

impl HttpStatementFetcher {
    /// Create a fetcher with a request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ResolveError::FetchFailed {
                issuer: String::new(),
                subject: String::new(),
                reason: format!("HTTP client: {}", e),
            })?;
        Ok(Self { http_client })
    }

    /// Create a fetcher around an existing client
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    async fn get(&self, url: Url, issuer: &str, subject: &str) -> Result<String> {
        let failed = |reason: String| ResolveError::FetchFailed {
            issuer: issuer.to_string(),
            subject: subject.to_string(),
            reason,
        };

        debug!(url = %url, "Fetching entity statement");
        let response = self
            .http_client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/entity-statement+jwt")
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?
            .error_for_status()
            .map_err(|e| failed(e.to_string()))?;

        response.text().await.map_err(|e| failed(e.to_string()))
    }
}

#[async_trait]
impl StatementFetcher for HttpStatementFetcher {
    async fn fetch_entity_configuration(&self, entity: &str) -> Result<String> {
        let url = Url::parse(&format!("{}{}", entity.trim_end_matches('/'), WELL_KNOWN_PATH))
            .map_err(|e| ResolveError::FetchFailed {
                issuer: entity.to_string(),
                subject: entity.to_string(),
                reason: e.to_string(),
            })?;
        self.get(url, entity, entity).await
    }

    async fn fetch_subordinate_statement(
        &self,
        superior: &str,
        fetch_endpoint: &str,
        subject: &str,
    ) -> Result<String> {
        let mut url = Url::parse(fetch_endpoint).map_err(|e| ResolveError::FetchFailed {
            issuer: superior.to_string(),
            subject: subject.to_string(),
            reason: e.to_string(),
        })?;
        url.query_pairs_mut().append_pair("sub", subject);
        self.get(url, superior, subject).await
    }

    fn description(&self) -> &str {
        "https statement fetcher"
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Serves pre-signed statements from memory
///
/// Keyed by `(issuer, subject)`; entity configurations use `(entity, entity)`.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    statements: RwLock<HashMap<(String, String), String>>,
    fetches: AtomicUsize,
}

impl MemoryFetcher {
    /// Create an empty fetcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an entity configuration
    pub fn insert_configuration(&self, entity: impl Into<String>, raw: impl Into<String>) {
        let entity = entity.into();
        self.statements
            .write()
            .unwrap()
            .insert((entity.clone(), entity), raw.into());
    }

    /// Publish a subordinate statement
    pub fn insert_subordinate(
        &self,
        superior: impl Into<String>,
        subject: impl Into<String>,
        raw: impl Into<String>,
    ) {
        self.statements
            .write()
            .unwrap()
            .insert((superior.into(), subject.into()), raw.into());
    }

    /// Currently published statement by `issuer` about `subject`
    pub fn get(&self, issuer: &str, subject: &str) -> Option<String> {
        self.statements
            .read()
            .unwrap()
            .get(&(issuer.to_string(), subject.to_string()))
            .cloned()
    }

    /// Remove a statement, making it unreachable
    pub fn remove(&self, issuer: &str, subject: &str) -> bool {
        self.statements
            .write()
            .unwrap()
            .remove(&(issuer.to_string(), subject.to_string()))
            .is_some()
    }

    /// Number of fetches served or attempted
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn lookup(&self, issuer: &str, subject: &str) -> Result<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.statements
            .read()
            .unwrap()
            .get(&(issuer.to_string(), subject.to_string()))
            .cloned()
            .ok_or_else(|| ResolveError::FetchFailed {
                issuer: issuer.to_string(),
                subject: subject.to_string(),
                reason: "not found".into(),
            })
    }
}

#[async_trait]
impl StatementFetcher for MemoryFetcher {
    async fn fetch_entity_configuration(&self, entity: &str) -> Result<String> {
        self.lookup(entity, entity)
    }

    async fn fetch_subordinate_statement(
        &self,
        superior: &str,
        _fetch_endpoint: &str,
        subject: &str,
    ) -> Result<String> {
        self.lookup(superior, subject)
    }

    fn description(&self) -> &str {
        "in-memory statement fetcher"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fetch_endpoint() {
        assert_eq!(
            default_fetch_endpoint("https://anchor.example.org/"),
            "https://anchor.example.org/fetch"
        );
        assert_eq!(
            default_fetch_endpoint("https://anchor.example.org/fed"),
            "https://anchor.example.org/fed/fetch"
        );
    }

    #[tokio::test]
    async fn test_memory_fetcher_lookup() {
        let fetcher = MemoryFetcher::new();
        fetcher.insert_configuration("https://a.example", "config");
        fetcher.insert_subordinate("https://a.example", "https://b.example", "sub");

        assert_eq!(
            fetcher.fetch_entity_configuration("https://a.example").await.unwrap(),
            "config"
        );
        assert_eq!(
            fetcher
                .fetch_subordinate_statement("https://a.example", "ignored", "https://b.example")
                .await
                .unwrap(),
            "sub"
        );
        assert!(matches!(
            fetcher.fetch_entity_configuration("https://b.example").await,
            Err(ResolveError::FetchFailed { .. })
        ));
        assert_eq!(fetcher.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_memory_fetcher_remove() {
        let fetcher = MemoryFetcher::new();
        fetcher.insert_configuration("https://a.example", "config");

        assert!(fetcher.remove("https://a.example", "https://a.example"));
        assert!(fetcher.fetch_entity_configuration("https://a.example").await.is_err());
    }
}
