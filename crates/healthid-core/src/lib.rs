//! # HealthID Core
//!
//! Key material, JOSE envelopes and entity statements for a federated
//! health-identity relying party (OpenID Connect Federation style).
//!
//! ## Key Concepts
//!
//! - **Entity statement**: a signed document in which an issuer asserts the
//!   keys and metadata of a subject
//! - **JOSE capability**: sign/verify/encrypt/decrypt behind the
//!   `JoseProvider` trait, so trust logic never calls a crypto library directly
//! - **JWKS**: key sets addressed by `kid`
//!
//! Parsing never establishes trust. A statement is only as trustworthy as the
//! keys it was verified against, and those keys come from the trust chain.

pub mod error;
pub mod jose;
pub mod jwk;
pub mod statement;

pub use error::{HealthIdError, Result};
pub use jose::{CompactJwe, CompactJws, JoseProvider, JweHeader, P256Jose};
pub use jwk::{Jwk, Jwks, KeyUse};
pub use statement::{
    EntityStatement, EntityStatementBuilder, EntityStatementClaims, FederationEntityMetadata,
    Metadata, OpenIdProviderMetadata, RelyingPartyMetadata, Validity, ENTITY_STATEMENT_TYP,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
