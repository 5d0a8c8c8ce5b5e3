//! Entity Statements
//!
//! An entity statement is a signed federation document in which an issuer
//! asserts the keys and metadata of a subject. Two shapes occur:
//!
//! - **Entity configuration**: self-issued (`iss == sub`), published by every
//!   entity at its well-known location.
//! - **Subordinate statement**: issued by a superior about one of its
//!   subordinates, carrying the keys the superior vouches for.
//!
//! `EntityStatement::parse` is pure structural decoding. It never checks a
//! signature; `verify_with` does that once the caller knows which keys are
//! authoritative for the issuer.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{HealthIdError, Result};
use crate::jose::{CompactJws, JoseProvider};
use crate::jwk::{Jwk, Jwks};

/// JWS `typ` of entity statements
pub const ENTITY_STATEMENT_TYP: &str = "entity-statement+jwt";

/// Claim set of an entity statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityStatementClaims {
    /// Issuer entity identifier
    pub iss: String,

    /// Subject entity identifier
    pub sub: String,

    /// Issued at (seconds since epoch)
    pub iat: i64,

    /// Expiration (seconds since epoch)
    pub exp: i64,

    /// Keys of the subject
    pub jwks: Jwks,

    /// Superior entities that can vouch for the subject
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authority_hints: Vec<String>,

    /// Role metadata
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,

    /// Claims not modelled here, preserved but never interpreted
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Role metadata published in an entity statement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Present when the subject is an OpenID provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openid_provider: Option<OpenIdProviderMetadata>,

    /// Present when the subject is a relying party
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openid_relying_party: Option<RelyingPartyMetadata>,

    /// Federation-level metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub federation_entity: Option<FederationEntityMetadata>,
}

impl Metadata {
    /// Check if no role metadata is present
    pub fn is_empty(&self) -> bool {
        self.openid_provider.is_none()
            && self.openid_relying_party.is_none()
            && self.federation_entity.is_none()
    }
}

/// OpenID provider metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenIdProviderMetadata {
    /// Issuer identifier of the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Authorization endpoint
    pub authorization_endpoint: String,

    /// Token endpoint
    pub token_endpoint: String,

    /// Pushed authorization request endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pushed_authorization_request_endpoint: Option<String>,

    /// Keys used to sign identity tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks: Option<Jwks>,

    /// Scopes supported by the provider
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
}

/// OpenID relying party metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelyingPartyMetadata {
    /// Display name of the client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,

    /// Registered redirect URIs
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// Space separated scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Public encryption keys for identity tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks: Option<Jwks>,

    /// OAuth response types
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_types: Vec<String>,

    /// OAuth grant types
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grant_types: Vec<String>,
}

/// Federation entity metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FederationEntityMetadata {
    /// Endpoint serving subordinate statements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub federation_fetch_endpoint: Option<String>,

    /// Organization name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
}

/// Outcome of checking a statement's validity window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// Window covers the instant
    Valid,
    /// Instant is past `exp` (plus skew)
    Expired,
    /// Instant is before `iat` (minus skew)
    NotYetValid,
}

/// A structurally valid entity statement with its signed form retained
#[derive(Debug, Clone)]
pub struct EntityStatement {
    jws: CompactJws,
    claims: EntityStatementClaims,
}

impl EntityStatement {
    /// Decode a compact JWS entity statement
    ///
    /// Fails with `MalformedStatement` on bad encoding, missing claims,
    /// non-URI issuer/subject/hints, or `exp <= iat`.
    pub fn parse(raw: &str) -> Result<Self> {
        let jws = CompactJws::parse(raw).map_err(|e| HealthIdError::MalformedStatement(e.to_string()))?;
        let claims: EntityStatementClaims = serde_json::from_slice(jws.payload())
            .map_err(|e| HealthIdError::MalformedStatement(format!("Claims: {}", e)))?;

        ensure_uri("iss", &claims.iss)?;
        ensure_uri("sub", &claims.sub)?;
        for hint in &claims.authority_hints {
            ensure_uri("authority_hints", hint)?;
        }
        if claims.exp <= claims.iat {
            return Err(HealthIdError::MalformedStatement(format!(
                "exp ({}) must be after iat ({})",
                claims.exp, claims.iat
            )));
        }

        Ok(Self { jws, claims })
    }

    /// Issuer entity identifier
    pub fn iss(&self) -> &str {
        &self.claims.iss
    }

    /// Subject entity identifier
    pub fn sub(&self) -> &str {
        &self.claims.sub
    }

    /// Keys asserted for the subject
    pub fn jwks(&self) -> &Jwks {
        &self.claims.jwks
    }

    /// Authority hints, in preference order
    pub fn authority_hints(&self) -> &[String] {
        &self.claims.authority_hints
    }

    /// Role metadata
    pub fn metadata(&self) -> &Metadata {
        &self.claims.metadata
    }

    /// Full claim set
    pub fn claims(&self) -> &EntityStatementClaims {
        &self.claims
    }

    /// Key ID of the signing key
    pub fn kid(&self) -> Option<&str> {
        self.jws.kid()
    }

    /// The signed compact form
    pub fn raw(&self) -> &str {
        self.jws.as_str()
    }

    /// Whether this is an entity configuration (`iss == sub`)
    pub fn is_self_signed(&self) -> bool {
        self.claims.iss == self.claims.sub
    }

    /// Issued-at instant
    pub fn issued_at(&self) -> DateTime<Utc> {
        timestamp(self.claims.iat)
    }

    /// Expiry instant
    pub fn expires_at(&self) -> DateTime<Utc> {
        timestamp(self.claims.exp)
    }

    /// Endpoint where this entity serves subordinate statements
    pub fn federation_fetch_endpoint(&self) -> Option<&str> {
        self.claims
            .metadata
            .federation_entity
            .as_ref()
            .and_then(|f| f.federation_fetch_endpoint.as_deref())
    }

    /// Check the validity window at `now`, tolerating `skew` on both ends
    pub fn validity_at(&self, now: DateTime<Utc>, skew: Duration) -> Validity {
        let now = now.timestamp();
        let skew = skew.num_seconds();
        if now > self.claims.exp.saturating_add(skew) {
            Validity::Expired
        } else if now.saturating_add(skew) < self.claims.iat {
            Validity::NotYetValid
        } else {
            Validity::Valid
        }
    }

    /// Verify the signature against the key named by the header `kid`
    ///
    /// `keys` must be the keys authoritative for the issuer; the statement's
    /// own `jwks` is never consulted.
    pub fn verify_with(&self, jose: &dyn JoseProvider, keys: &Jwks) -> Result<()> {
        let kid = self
            .kid()
            .ok_or_else(|| HealthIdError::MissingField("kid".into()))?;
        let key = keys
            .find(kid)
            .ok_or_else(|| HealthIdError::UnknownKey(kid.to_string()))?;
        jose.verify(&self.jws, key)
    }
}

fn ensure_uri(field: &str, value: &str) -> Result<()> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|e| HealthIdError::MalformedStatement(format!("{} '{}' is not a URI: {}", field, value, e)))
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Builder for signed entity statements
#[derive(Debug, Default)]
pub struct EntityStatementBuilder {
    iss: Option<String>,
    sub: Option<String>,
    iat: Option<i64>,
    exp: Option<i64>,
    jwks: Jwks,
    authority_hints: Vec<String>,
    metadata: Metadata,
}

impl EntityStatementBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the issuer
    pub fn iss(mut self, iss: impl Into<String>) -> Self {
        self.iss = Some(iss.into());
        self
    }

    /// Set the subject
    pub fn sub(mut self, sub: impl Into<String>) -> Self {
        self.sub = Some(sub.into());
        self
    }

    /// Set issuer and subject to the same entity (entity configuration)
    pub fn self_issued(self, entity: impl Into<String>) -> Self {
        let entity = entity.into();
        self.iss(entity.clone()).sub(entity)
    }

    /// Set the validity window
    pub fn validity(mut self, iat: DateTime<Utc>, exp: DateTime<Utc>) -> Self {
        self.iat = Some(iat.timestamp());
        self.exp = Some(exp.timestamp());
        self
    }

    /// Set the subject keys; private material is stripped
    pub fn jwks(mut self, jwks: &Jwks) -> Self {
        self.jwks = jwks.to_public();
        self
    }

    /// Add a single subject key; private material is stripped
    pub fn add_key(mut self, key: &Jwk) -> Self {
        self.jwks.keys.push(key.to_public());
        self
    }

    /// Set authority hints
    pub fn authority_hints(mut self, hints: Vec<String>) -> Self {
        self.authority_hints = hints;
        self
    }

    /// Set role metadata
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Build the claim set
    pub fn build(self) -> Result<EntityStatementClaims> {
        let iss = self.iss.ok_or(HealthIdError::MissingField("iss".into()))?;
        let sub = self.sub.ok_or(HealthIdError::MissingField("sub".into()))?;
        let iat = self.iat.ok_or(HealthIdError::MissingField("iat".into()))?;
        let exp = self.exp.ok_or(HealthIdError::MissingField("exp".into()))?;

        Ok(EntityStatementClaims {
            iss,
            sub,
            iat,
            exp,
            jwks: self.jwks,
            authority_hints: self.authority_hints,
            metadata: self.metadata,
            extra: serde_json::Map::new(),
        })
    }

    /// Build, sign with `key` and return the parsed statement
    pub fn sign(self, jose: &dyn JoseProvider, key: &Jwk) -> Result<EntityStatement> {
        let claims = self.build()?;
        let payload = serde_json::to_vec(&claims)?;
        let raw = jose.sign(&payload, Some(ENTITY_STATEMENT_TYP), key)?;
        EntityStatement::parse(&raw)
    }
}
