//! # HealthID Federation
//!
//! Establishes whether an identity provider is a legitimate member of the
//! federation by resolving a trust chain from the provider up to the trust
//! anchor, and recovers the provider's keys from that chain.
//!
//! ## Architecture
//!
//! - **Fetcher**: obtains raw entity configurations and subordinate
//!   statements (`HttpStatementFetcher`, `MemoryFetcher`)
//! - **Cache**: shares parsed statements, bounded by each statement's expiry
//! - **Resolver**: depth-first walk over authority hints with full chain
//!   validation at the anchor
//! - **Key recovery**: `TrustChain::signing_keys` / `encryption_keys`
//!
//! ## Usage
//!
//! ```ignore
//! use healthid_federation::{HttpStatementFetcher, TrustAnchor, TrustChainResolver};
//!
//! let resolver = TrustChainResolver::new(
//!     Arc::new(HttpStatementFetcher::new(Duration::from_secs(10))?),
//!     Arc::new(P256Jose::new()),
//!     TrustAnchor::new("https://anchor.example.org", pinned_jwks),
//! );
//!
//! let chain = resolver.resolve("https://idp.example.org").await?;
//! let keys = chain.signing_keys("https://idp.example.org")?;
//! ```

pub mod cache;
pub mod chain;
pub mod error;
pub mod fetcher;
pub mod keys;
pub mod resolver;

pub use cache::{StatementCache, StatementKey};
pub use chain::{ChainLink, TrustAnchor, TrustChain};
pub use error::{ChainViolation, ResolveError, Result};
pub use fetcher::{HttpStatementFetcher, MemoryFetcher, StatementFetcher};
pub use resolver::{ResolverConfig, TrustChainResolver, DEFAULT_MAX_DEPTH};
