//! HealthID Relying Party
//!
//! A relying party for federated health-ID logins. The user picks one of
//! many sectoral identity providers; none is trusted directly. Trust is
//! established per login by resolving the provider's trust chain up to the
//! pinned federation trust anchor, and the provider's identity token is only
//! accepted when it decrypts with one of our keys and verifies against a
//! signing key the chain vouches for.
//!
//! ## Login flow
//!
//! 1. `RelyingParty::select_idp` resolves the IdP's trust chain
//! 2. `IdpSelected::redirect` builds the authorization request (state,
//!    nonce, PKCE)
//! 3. `RedirectedToIdp::receive_code` checks the callback
//! 4. `CodeReceived::exchange` redeems the code at the token endpoint
//! 5. `TokenExchanged::verify` decrypts and verifies the identity token
//!
//! ## API Endpoints
//!
//! - `GET /health` - Liveness check
//! - `GET /.well-known/openid-federation` - Self-issued entity configuration
//! - `POST /auth/login` - Start a login with a sectoral IdP
//! - `GET /auth/callback` - Complete a login

pub mod api;
pub mod client;
pub mod config;
pub mod entity;
pub mod error;
pub mod flow;
pub mod keys;
pub mod sessions;

pub use api::create_router;
pub use api::handlers::AppState;
pub use client::{ClientCredentials, HttpOpenIdClient, OpenIdClient, TokenResponse};
pub use config::{ConfigError, FederationConfig, FederationConfigBuilder, ServerConfig};
pub use entity::entity_configuration;
pub use error::{FailureKind, LoginError, Result};
pub use flow::{
    AuthorizationSession, CodeReceived, IdTokenClaims, IdentityVerified, IdpSelected,
    RedirectedToIdp, RelyingParty, TokenExchanged, VerifiedIdToken,
};
pub use keys::ClientKeyStore;
pub use sessions::{PendingLogins, DEFAULT_PENDING_CAPACITY};
