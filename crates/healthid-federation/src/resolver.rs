//! Trust chain resolution
//!
//! Walks from a leaf entity up its authority hints to the trust anchor.
//!
//! The walk is a depth-first search over hints in listed order. Each step
//! fetches the superior's configuration and the superior's statement about
//! the current entity, and prunes the branch early on structural or
//! temporal problems. A branch that reaches the anchor is assembled into a
//! `TrustChain` and validated in full, signatures included. The first
//! branch that validates wins.
//!
//! A failing branch never aborts the search. When every branch fails, the
//! most severe branch failure is reported.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use healthid_core::{EntityStatement, JoseProvider};

use crate::cache::{StatementCache, StatementKey};
use crate::chain::{check_configuration, check_subordinate, ChainLink, TrustAnchor, TrustChain};
use crate::error::{ChainViolation, ResolveError, Result};
use crate::fetcher::{default_fetch_endpoint, StatementFetcher};

/// Default bound on entities per chain (leaf and anchor included)
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Default statement cache capacity
pub const DEFAULT_CACHE_CAPACITY: u64 = 1_000;

/// Resolver settings
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Maximum number of entities in a chain
    pub max_depth: usize,
    /// Tolerated clock skew when checking validity windows
    pub clock_skew: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            clock_skew: Duration::zero(),
        }
    }
}

impl ResolverConfig {
    /// Set the maximum chain length
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the tolerated clock skew
    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }
}

/// One entity on the path currently being explored
#[derive(Clone)]
struct PathEntry {
    entity_id: String,
    configuration: Arc<EntityStatement>,
    /// Statement about this entity from the next entity up the path
    subordinate: Option<Arc<EntityStatement>>,
}

/// Pending DFS step: extend `path` with `superior`
struct Step {
    path: Vec<PathEntry>,
    superior: String,
}

/// Establishes trust chains from leaf entities to a trust anchor
pub struct TrustChainResolver {
    fetcher: Arc<dyn StatementFetcher>,
    cache: StatementCache,
    jose: Arc<dyn JoseProvider>,
    anchor: TrustAnchor,
    config: ResolverConfig,
}

impl std::fmt::Debug for TrustChainResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustChainResolver")
            .field("fetcher", &self.fetcher.description())
            .field("anchor", &self.anchor.entity_id())
            .field("config", &self.config)
            .finish()
    }
}

impl TrustChainResolver {
    /// Create a resolver with a private cache
    pub fn new(
        fetcher: Arc<dyn StatementFetcher>,
        jose: Arc<dyn JoseProvider>,
        anchor: TrustAnchor,
    ) -> Self {
        Self {
            fetcher,
            cache: StatementCache::new(DEFAULT_CACHE_CAPACITY),
            jose,
            anchor,
            config: ResolverConfig::default(),
        }
    }

    /// Use a shared statement cache
    pub fn with_cache(mut self, cache: StatementCache) -> Self {
        self.cache = cache;
        self
    }

    /// Use custom settings
    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    /// The configured trust anchor
    pub fn anchor(&self) -> &TrustAnchor {
        &self.anchor
    }

    /// The statement cache
    pub fn cache(&self) -> &StatementCache {
        &self.cache
    }

    /// The JOSE capability used for verification
    pub fn jose(&self) -> &Arc<dyn JoseProvider> {
        &self.jose
    }

    /// Resolve a chain from `leaf` to the configured anchor, as of now
    pub async fn resolve(&self, leaf: &str) -> Result<TrustChain> {
        self.resolve_at(leaf, Utc::now()).await
    }

    /// Resolve a chain from `leaf` to the configured anchor, as of `now`
    pub async fn resolve_at(&self, leaf: &str, now: DateTime<Utc>) -> Result<TrustChain> {
        self.resolve_chain(leaf, &self.anchor, self.config.max_depth, now)
            .await
    }

    /// Resolve a chain from `leaf` to `anchor` with at most `max_depth` entities
    pub async fn resolve_chain(
        &self,
        leaf: &str,
        anchor: &TrustAnchor,
        max_depth: usize,
        now: DateTime<Utc>,
    ) -> Result<TrustChain> {
        debug!(entity = %leaf, anchor = %anchor.entity_id(), max_depth, "Resolving trust chain");

        let result = self.search(leaf, anchor, max_depth, now).await;
        match &result {
            Ok(chain) => info!(
                entity = %leaf,
                anchor = %anchor.entity_id(),
                length = chain.len(),
                expires_at = %chain.expires_at(),
                "Trust chain established"
            ),
            Err(e) => warn!(entity = %leaf, error = %e, "Trust chain resolution failed"),
        }
        result
    }

    async fn search(
        &self,
        leaf: &str,
        anchor: &TrustAnchor,
        max_depth: usize,
        now: DateTime<Utc>,
    ) -> Result<TrustChain> {
        let skew = self.config.clock_skew;

        if max_depth == 0 {
            return Err(ResolveError::TrustChainExceeded { max_depth });
        }

        let configuration = self.configuration(leaf).await?;
        self.keep_if_valid(leaf, leaf, check_configuration(&configuration, leaf, now, skew))
            .await?;

        let root = PathEntry {
            entity_id: leaf.to_string(),
            configuration,
            subordinate: None,
        };

        if leaf == anchor.entity_id() {
            return self.accept(vec![root], anchor, max_depth, now).await;
        }

        let mut failures: Vec<ResolveError> = Vec::new();
        let mut stack: Vec<Step> = Vec::new();
        push_hints(&mut stack, vec![root], max_depth)?;

        while let Some(step) = stack.pop() {
            let path = match self.extend(step, anchor, now).await {
                Ok(path) => path,
                Err(e) => {
                    warn!(entity = %leaf, error = %e, "Trust chain branch rejected");
                    failures.push(e);
                    continue;
                }
            };

            let top = path.last().map(|p| p.entity_id.as_str()).unwrap_or_default();
            if top == anchor.entity_id() {
                match self.accept(path, anchor, max_depth, now).await {
                    Ok(chain) => return Ok(chain),
                    Err(e) => {
                        warn!(entity = %leaf, error = %e, "Trust chain branch rejected");
                        failures.push(e);
                    }
                }
                continue;
            }

            if let Err(e) = push_hints(&mut stack, path, max_depth) {
                debug!(entity = %leaf, error = %e, "Trust chain branch exhausted");
                failures.push(e);
            }
        }

        Err(most_severe(failures).unwrap_or_else(|| ResolveError::NoPathToAnchor {
            entity: leaf.to_string(),
        }))
    }

    /// Extend the step's path by its superior, checking the new hop
    async fn extend(&self, step: Step, anchor: &TrustAnchor, now: DateTime<Utc>) -> Result<Vec<PathEntry>> {
        let skew = self.config.clock_skew;
        let Step { mut path, superior } = step;

        let child = path
            .last()
            .map(|p| p.entity_id.clone())
            .ok_or_else(|| ResolveError::NoPathToAnchor { entity: superior.clone() })?;

        if path.iter().any(|p| p.entity_id == superior) {
            return Err(ResolveError::violation(child, ChainViolation::Cycle));
        }

        let superior_configuration = self.configuration(&superior).await?;
        self.keep_if_valid(
            &superior,
            &superior,
            check_configuration(&superior_configuration, &superior, now, skew),
        )
        .await?;

        let endpoint = superior_configuration
            .federation_fetch_endpoint()
            .map(str::to_string)
            .unwrap_or_else(|| default_fetch_endpoint(&superior));
        let subordinate = self.subordinate(&superior, &endpoint, &child).await?;
        self.keep_if_valid(
            &superior,
            &child,
            check_subordinate(&subordinate, &superior, &child, now, skew),
        )
        .await?;

        debug!(
            subject = %child,
            superior = %superior,
            is_anchor = superior == anchor.entity_id(),
            "Trust chain hop accepted"
        );

        if let Some(last) = path.last_mut() {
            last.subordinate = Some(subordinate);
        }
        path.push(PathEntry {
            entity_id: superior,
            configuration: superior_configuration,
            subordinate: None,
        });
        Ok(path)
    }

    /// Assemble a path ending at the anchor and validate it in full
    async fn accept(
        &self,
        path: Vec<PathEntry>,
        anchor: &TrustAnchor,
        max_depth: usize,
        now: DateTime<Utc>,
    ) -> Result<TrustChain> {
        let links = path
            .iter()
            .map(|entry| match &entry.subordinate {
                Some(subordinate) => {
                    ChainLink::vouched(entry.configuration.clone(), subordinate.clone())
                }
                None => ChainLink::anchor(entry.configuration.clone(), anchor),
            })
            .collect();
        let chain = TrustChain::from_links(links);

        if let Err(e) = chain.validate(self.jose.as_ref(), anchor, max_depth, now, self.config.clock_skew) {
            if let ResolveError::InvalidTrustChain { link, .. } = &e {
                self.evict_link(&path, link).await;
            }
            return Err(e);
        }
        Ok(chain)
    }

    /// Evict the statement by `issuer` about `subject` when its check failed
    async fn keep_if_valid(&self, issuer: &str, subject: &str, check: Result<()>) -> Result<()> {
        if check.is_err() {
            self.cache.invalidate(issuer, subject).await;
        }
        check
    }

    /// Drop every cached statement about `link` on this path
    async fn evict_link(&self, path: &[PathEntry], link: &str) {
        self.cache.invalidate(link, link).await;
        if let Some(pos) = path.iter().position(|p| p.entity_id == link) {
            if let Some(superior) = path.get(pos + 1) {
                self.cache.invalidate(&superior.entity_id, link).await;
            }
        }
    }

    async fn configuration(&self, entity: &str) -> Result<Arc<EntityStatement>> {
        let fetcher = &self.fetcher;
        self.cache
            .get_or_load(StatementKey::new(entity, entity), async move {
                let raw = fetcher.fetch_entity_configuration(entity).await?;
                parse(&raw, entity)
            })
            .await
    }

    async fn subordinate(
        &self,
        superior: &str,
        endpoint: &str,
        subject: &str,
    ) -> Result<Arc<EntityStatement>> {
        let fetcher = &self.fetcher;
        self.cache
            .get_or_load(StatementKey::new(superior, subject), async move {
                let raw = fetcher
                    .fetch_subordinate_statement(superior, endpoint, subject)
                    .await?;
                parse(&raw, subject)
            })
            .await
    }
}

fn parse(raw: &str, entity: &str) -> Result<EntityStatement> {
    EntityStatement::parse(raw).map_err(|e| ResolveError::MalformedStatement {
        entity: entity.to_string(),
        reason: e.to_string(),
    })
}

/// Queue the hints of the path's top entity, first hint on top of the stack
fn push_hints(stack: &mut Vec<Step>, path: Vec<PathEntry>, max_depth: usize) -> Result<()> {
    let top = match path.last() {
        Some(top) => top,
        None => return Ok(()),
    };

    let hints = top.configuration.authority_hints();
    if hints.is_empty() {
        return Err(ResolveError::NoPathToAnchor {
            entity: top.entity_id.clone(),
        });
    }
    if path.len() >= max_depth {
        return Err(ResolveError::TrustChainExceeded { max_depth });
    }

    for hint in hints.iter().rev() {
        stack.push(Step {
            path: path.clone(),
            superior: hint.clone(),
        });
    }
    Ok(())
}

/// Highest severity wins; among equals, the earliest
fn most_severe(failures: Vec<ResolveError>) -> Option<ResolveError> {
    let mut best: Option<ResolveError> = None;
    for failure in failures {
        let replace = match &best {
            Some(current) => failure.severity() > current.severity(),
            None => true,
        };
        if replace {
            best = Some(failure);
        }
    }
    best
}
