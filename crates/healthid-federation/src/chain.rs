//! Trust chains and trust anchors
//!
//! A `TrustChain` is ordered leaf-first, anchor-last. Each non-anchor link
//! holds the entity's own configuration plus the subordinate statement its
//! superior issued about it. The subordinate statement is what makes keys
//! authoritative: a superior vouches for the keys of its subordinate, and
//! the anchor's keys are pinned out of band.
//!
//! `TrustChain::validate` checks every invariant of a chain from scratch.
//! The resolver runs it on every candidate chain before returning it, and
//! callers can re-run it on a chain they kept around.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use healthid_core::{
    EntityStatement, HealthIdError, JoseProvider, Jwks, OpenIdProviderMetadata, Validity,
};

use crate::error::{ChainViolation, ResolveError, Result};

/// The federation root, with its keys pinned by configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchor {
    entity_id: String,
    jwks: Jwks,
}

impl TrustAnchor {
    /// Create a trust anchor; private material in `jwks` is dropped
    pub fn new(entity_id: impl Into<String>, jwks: Jwks) -> Self {
        Self {
            entity_id: entity_id.into(),
            jwks: jwks.to_public(),
        }
    }

    /// Entity identifier of the anchor
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Pinned public keys
    pub fn jwks(&self) -> &Jwks {
        &self.jwks
    }
}

/// One entity of a trust chain
#[derive(Debug, Clone)]
pub struct ChainLink {
    entity_id: String,
    configuration: Arc<EntityStatement>,
    subordinate: Option<Arc<EntityStatement>>,
    keys: Jwks,
}

impl ChainLink {
    /// Link for an entity below the anchor
    pub(crate) fn vouched(
        configuration: Arc<EntityStatement>,
        subordinate: Arc<EntityStatement>,
    ) -> Self {
        Self {
            entity_id: configuration.sub().to_string(),
            keys: subordinate.jwks().clone(),
            configuration,
            subordinate: Some(subordinate),
        }
    }

    /// Link for the anchor itself
    pub(crate) fn anchor(configuration: Arc<EntityStatement>, anchor: &TrustAnchor) -> Self {
        Self {
            entity_id: anchor.entity_id().to_string(),
            keys: anchor.jwks().clone(),
            configuration,
            subordinate: None,
        }
    }

    /// Entity identifier
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// The entity's self-issued configuration
    pub fn configuration(&self) -> &EntityStatement {
        &self.configuration
    }

    /// The statement the superior issued about this entity (`None` at the anchor)
    pub fn subordinate_statement(&self) -> Option<&EntityStatement> {
        self.subordinate.as_deref()
    }

    /// Federation keys vouched for this entity by its superior (pinned keys at the anchor)
    pub fn authoritative_keys(&self) -> &Jwks {
        &self.keys
    }

    /// Whether this is the anchor link
    pub fn is_anchor(&self) -> bool {
        self.subordinate.is_none()
    }
}

/// A leaf-first, anchor-last sequence of verified links
#[derive(Debug, Clone)]
pub struct TrustChain {
    links: Vec<ChainLink>,
}

impl TrustChain {
    pub(crate) fn from_links(links: Vec<ChainLink>) -> Self {
        Self { links }
    }

    /// Links, leaf first
    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    /// Entity identifiers, leaf first
    pub fn entities(&self) -> Vec<&str> {
        self.links.iter().map(|l| l.entity_id()).collect()
    }

    /// Number of entities in the chain
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Always false for a chain produced by the resolver
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// The leaf link
    pub fn leaf(&self) -> Option<&ChainLink> {
        self.links.first()
    }

    /// The anchor link
    pub fn anchor(&self) -> Option<&ChainLink> {
        self.links.last()
    }

    /// Link describing `entity_id`
    pub fn link_for(&self, entity_id: &str) -> Option<&ChainLink> {
        self.links.iter().find(|l| l.entity_id == entity_id)
    }

    /// Every statement in the chain, leaf first: each entity's configuration
    /// followed by its superior's statement about it
    pub fn statements(&self) -> Vec<&EntityStatement> {
        self.links
            .iter()
            .flat_map(|l| std::iter::once(l.configuration()).chain(l.subordinate_statement()))
            .collect()
    }

    /// OpenID provider metadata of the leaf, as published in its verified configuration
    pub fn provider_metadata(&self) -> Option<&OpenIdProviderMetadata> {
        self.leaf()
            .and_then(|l| l.configuration().metadata().openid_provider.as_ref())
    }

    /// Earliest expiry of any statement in the chain
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.statements()
            .into_iter()
            .map(EntityStatement::expires_at)
            .min()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Check every chain invariant at `now`
    ///
    /// Structure and validity windows are checked leaf-first; signatures are
    /// checked anchor-first so every key is established before it is used.
    pub fn validate(
        &self,
        jose: &dyn JoseProvider,
        anchor: &TrustAnchor,
        max_depth: usize,
        now: DateTime<Utc>,
        skew: Duration,
    ) -> Result<()> {
        let leaf = self.leaf().ok_or_else(|| ResolveError::NoPathToAnchor {
            entity: String::new(),
        })?;
        if self.len() > max_depth {
            return Err(ResolveError::TrustChainExceeded { max_depth });
        }
        let top = self.links.len() - 1;
        if self.links[top].entity_id != anchor.entity_id() {
            return Err(ResolveError::NoPathToAnchor {
                entity: leaf.entity_id.clone(),
            });
        }

        for (i, link) in self.links.iter().enumerate() {
            check_configuration(link.configuration(), &link.entity_id, now, skew)?;

            if i == top {
                continue;
            }
            let superior = &self.links[i + 1].entity_id;
            let subordinate = link
                .subordinate_statement()
                .ok_or_else(|| ResolveError::violation(&link.entity_id, ChainViolation::IssuerMismatch))?;
            check_subordinate(subordinate, superior, &link.entity_id, now, skew)?;
            if !link
                .configuration()
                .authority_hints()
                .iter()
                .any(|h| h == superior)
            {
                return Err(ResolveError::violation(&link.entity_id, ChainViolation::HintMissing));
            }
        }

        let anchor_link = &self.links[top];
        verify_signature(jose, anchor_link.configuration(), anchor.jwks(), &anchor_link.entity_id)?;

        for i in (0..top).rev() {
            let link = &self.links[i];
            let superior_keys = if i + 1 == top {
                anchor.jwks()
            } else {
                self.links[i + 1].authoritative_keys()
            };

            if let Some(subordinate) = link.subordinate_statement() {
                verify_signature(jose, subordinate, superior_keys, &link.entity_id)?;
                verify_signature(jose, link.configuration(), subordinate.jwks(), &link.entity_id)?;
            }
        }

        Ok(())
    }
}

/// Structural and temporal checks of an entity configuration
pub(crate) fn check_configuration(
    configuration: &EntityStatement,
    entity_id: &str,
    now: DateTime<Utc>,
    skew: Duration,
) -> Result<()> {
    if configuration.sub() != entity_id {
        return Err(ResolveError::violation(entity_id, ChainViolation::SubjectMismatch));
    }
    if !configuration.is_self_signed() {
        return Err(ResolveError::violation(entity_id, ChainViolation::IssuerMismatch));
    }
    check_window(configuration, entity_id, now, skew)
}

/// Structural and temporal checks of a subordinate statement
pub(crate) fn check_subordinate(
    subordinate: &EntityStatement,
    superior: &str,
    subject: &str,
    now: DateTime<Utc>,
    skew: Duration,
) -> Result<()> {
    if subordinate.iss() != superior {
        return Err(ResolveError::violation(subject, ChainViolation::IssuerMismatch));
    }
    if subordinate.sub() != subject {
        return Err(ResolveError::violation(subject, ChainViolation::SubjectMismatch));
    }
    check_window(subordinate, subject, now, skew)
}

fn check_window(
    statement: &EntityStatement,
    link: &str,
    now: DateTime<Utc>,
    skew: Duration,
) -> Result<()> {
    match statement.validity_at(now, skew) {
        Validity::Valid => Ok(()),
        Validity::Expired => Err(ResolveError::violation(link, ChainViolation::Expired)),
        Validity::NotYetValid => Err(ResolveError::violation(link, ChainViolation::NotYetValid)),
    }
}

fn verify_signature(
    jose: &dyn JoseProvider,
    statement: &EntityStatement,
    keys: &Jwks,
    link: &str,
) -> Result<()> {
    statement.verify_with(jose, keys).map_err(|e| {
        let reason = match e {
            HealthIdError::UnknownKey(_) | HealthIdError::MissingField(_) => ChainViolation::UnknownKey,
            _ => ChainViolation::BadSignature,
        };
        ResolveError::violation(link, reason)
    })
}
