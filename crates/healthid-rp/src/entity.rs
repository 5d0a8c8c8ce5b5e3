//! Self-issued entity configuration
//!
//! The relying party publishes its own entity configuration so that
//! identity providers can resolve a trust chain for it in turn. It names the
//! federation master as its only authority hint and carries the public
//! encryption keys identity tokens must be encrypted to.

use chrono::{DateTime, Utc};
use tracing::debug;

use healthid_core::{
    EntityStatement, EntityStatementBuilder, FederationEntityMetadata, JoseProvider, Metadata,
    RelyingPartyMetadata, Result,
};

use crate::config::FederationConfig;

/// Build and sign the entity configuration valid from `now` for the configured TTL
pub fn entity_configuration(
    config: &FederationConfig,
    jose: &dyn JoseProvider,
    now: DateTime<Utc>,
) -> Result<EntityStatement> {
    let metadata = Metadata {
        openid_relying_party: Some(RelyingPartyMetadata {
            client_name: Some(config.app_name().to_string()),
            redirect_uris: config.redirect_uris().to_vec(),
            scope: Some(config.scopes().join(" ")),
            jwks: Some(config.keys().public_encryption_keys()),
            response_types: vec!["code".to_string()],
            grant_types: vec!["authorization_code".to_string()],
        }),
        federation_entity: Some(FederationEntityMetadata {
            federation_fetch_endpoint: None,
            organization_name: Some(config.app_name().to_string()),
        }),
        ..Metadata::default()
    };

    let statement = EntityStatementBuilder::new()
        .iss(config.iss())
        .sub(config.sub())
        .validity(now, now + config.ttl())
        .jwks(config.entity_signing_keys())
        .authority_hints(vec![config.federation_master().to_string()])
        .metadata(metadata)
        .sign(jose, config.keys().signing_key())?;

    debug!(
        entity = %config.iss(),
        kid = %config.keys().signing_kid(),
        exp = %statement.expires_at(),
        "Signed entity configuration"
    );
    Ok(statement)
}
