//! The login flow
//!
//! `RelyingParty` holds what every login shares: the configuration, the
//! trust chain resolver with its statement cache, the token client and the
//! JOSE capability. Each login walks the step types in `steps`, starting
//! from `RelyingParty::select_idp`.

pub mod id_token;
pub mod session;
pub mod steps;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use healthid_core::{EntityStatement, JoseProvider};
use healthid_federation::{StatementCache, StatementFetcher, TrustChainResolver};

use crate::client::OpenIdClient;
use crate::config::FederationConfig;
use crate::entity::entity_configuration;
use crate::error::{LoginError, Result};

pub use id_token::{Audience, IdTokenClaims, VerifiedIdToken};
pub use session::{AuthorizationSession, Pkce, Secret};
pub use steps::{CodeReceived, IdentityVerified, IdpSelected, RedirectedToIdp, TokenExchanged};

/// Shared relying party state for all logins
pub struct RelyingParty {
    config: Arc<FederationConfig>,
    resolver: TrustChainResolver,
    client: Arc<dyn OpenIdClient>,
    jose: Arc<dyn JoseProvider>,
}

impl std::fmt::Debug for RelyingParty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelyingParty")
            .field("iss", &self.config.iss())
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl RelyingParty {
    /// Create a relying party resolving against the configured trust anchor
    pub fn new(
        config: FederationConfig,
        fetcher: Arc<dyn StatementFetcher>,
        client: Arc<dyn OpenIdClient>,
        jose: Arc<dyn JoseProvider>,
    ) -> Self {
        let resolver = TrustChainResolver::new(fetcher, jose.clone(), config.trust_anchor().clone())
            .with_config(config.resolver_config());
        Self {
            config: Arc::new(config),
            resolver,
            client,
            jose,
        }
    }

    /// Share a statement cache with other resolvers
    pub fn with_cache(mut self, cache: StatementCache) -> Self {
        self.resolver = self.resolver.with_cache(cache);
        self
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    pub fn resolver(&self) -> &TrustChainResolver {
        &self.resolver
    }

    pub fn client(&self) -> &Arc<dyn OpenIdClient> {
        &self.client
    }

    pub fn jose(&self) -> &Arc<dyn JoseProvider> {
        &self.jose
    }

    /// Establish trust in `idp` and start a login with it
    pub async fn select_idp(&self, idp: &str) -> Result<IdpSelected> {
        self.select_idp_at(idp, Utc::now()).await
    }

    pub async fn select_idp_at(&self, idp: &str, now: DateTime<Utc>) -> Result<IdpSelected> {
        let chain = self.resolver.resolve_at(idp, now).await.map_err(|e| {
            warn!(idp = %idp, error = %e, "Identity provider is not trusted");
            LoginError::UntrustedIdp(e)
        })?;

        let selected = IdpSelected::new(idp.to_string(), chain)?;
        info!(
            idp = %idp,
            chain = ?selected.trust_chain().entities(),
            "Identity provider selected"
        );
        Ok(selected)
    }

    /// This relying party's signed entity configuration, valid from now
    pub fn entity_configuration(&self) -> healthid_core::Result<EntityStatement> {
        entity_configuration(&self.config, self.jose.as_ref(), Utc::now())
    }
}
