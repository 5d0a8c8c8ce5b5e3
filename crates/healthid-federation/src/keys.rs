//! Key recovery from a validated trust chain
//!
//! Keys for an entity come from the link describing it: the federation keys
//! its superior vouched for, plus any role keys published in the entity's
//! configuration (which was itself verified against the vouched keys).

use chrono::{DateTime, Utc};
use tracing::warn;

use healthid_core::Jwks;

use crate::chain::{ChainLink, TrustChain};
use crate::error::{ResolveError, Result};

impl TrustChain {
    /// Keys `entity_id` may sign with, as of now
    pub fn signing_keys(&self, entity_id: &str) -> Result<Jwks> {
        self.signing_keys_at(entity_id, Utc::now())
    }

    /// Keys usable to encrypt to `entity_id`, as of now
    pub fn encryption_keys(&self, entity_id: &str) -> Result<Jwks> {
        self.encryption_keys_at(entity_id, Utc::now())
    }

    /// Keys `entity_id` may sign with, as of `now`
    pub fn signing_keys_at(&self, entity_id: &str, now: DateTime<Utc>) -> Result<Jwks> {
        let link = self.usable_link(entity_id, now)?;
        let mut keys = link.authoritative_keys().signing_keys();

        let metadata = link.configuration().metadata();
        if let Some(jwks) = metadata.openid_provider.as_ref().and_then(|op| op.jwks.as_ref()) {
            keys.merge(&jwks.signing_keys());
        }
        Ok(keys)
    }

    /// Keys usable to encrypt to `entity_id`, as of `now`
    pub fn encryption_keys_at(&self, entity_id: &str, now: DateTime<Utc>) -> Result<Jwks> {
        let link = self.usable_link(entity_id, now)?;
        let mut keys = link.authoritative_keys().encryption_keys();

        let metadata = link.configuration().metadata();
        let role_keys = [
            metadata.openid_provider.as_ref().and_then(|op| op.jwks.as_ref()),
            metadata.openid_relying_party.as_ref().and_then(|rp| rp.jwks.as_ref()),
        ];
        for jwks in role_keys.into_iter().flatten() {
            keys.merge(&jwks.encryption_keys());
        }
        Ok(keys)
    }

    fn usable_link(&self, entity_id: &str, now: DateTime<Utc>) -> Result<&ChainLink> {
        let expires_at = self.expires_at();
        if now > expires_at {
            warn!(entity = %entity_id, expired_at = %expires_at, "Key lookup on stale trust chain");
            return Err(ResolveError::StaleTrustChain(expires_at));
        }

        self.link_for(entity_id).ok_or_else(|| {
            warn!(entity = %entity_id, "Key lookup for entity outside trust chain");
            ResolveError::UnknownEntity(entity_id.to_string())
        })
    }
}
