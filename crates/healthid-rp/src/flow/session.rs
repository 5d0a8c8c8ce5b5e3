//! Per-login session state
//!
//! An `AuthorizationSession` exists from the redirect to the IdP until the
//! login completes or fails. Its secrets are wiped from memory when it is
//! dropped and never appear in `Debug` output.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;
use zeroize::Zeroizing;

use healthid_federation::TrustChain;

/// A secret string, zeroized on drop and redacted in `Debug`
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// 32 random bytes, base64url without padding
    pub fn random() -> Self {
        let mut bytes = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut bytes[..]);
        Self::new(URL_SAFE_NO_PAD.encode(&bytes[..]))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    /// Compare against an untrusted value in constant time
    pub fn matches(&self, candidate: &str) -> bool {
        self.0.as_bytes().ct_eq(candidate.as_bytes()).into()
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other.expose())
    }
}

impl Eq for Secret {}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[redacted]")
    }
}

/// PKCE verifier and its S256 challenge (RFC 7636)
#[derive(Debug, Clone)]
pub struct Pkce {
    verifier: Secret,
    challenge: String,
}

impl Pkce {
    /// Generate a fresh verifier
    pub fn generate() -> Self {
        Self::from_verifier(Secret::random())
    }

    pub fn from_verifier(verifier: Secret) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.expose().as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }

    pub fn verifier(&self) -> &Secret {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }
}

/// Everything one login attempt must remember between redirect and callback
#[derive(Debug, Clone)]
pub struct AuthorizationSession {
    id: Uuid,
    idp: String,
    trust_chain: TrustChain,
    token_endpoint: String,
    state: Secret,
    nonce: Secret,
    pkce: Pkce,
    redirect_uri: String,
    expected_audience: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl AuthorizationSession {
    /// Start a session with fresh state, nonce and PKCE verifier
    pub(crate) fn new(
        idp: String,
        trust_chain: TrustChain,
        token_endpoint: String,
        redirect_uri: String,
        expected_audience: String,
        now: DateTime<Utc>,
        lifetime: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            idp,
            trust_chain,
            token_endpoint,
            state: Secret::random(),
            nonce: Secret::random(),
            pkce: Pkce::generate(),
            redirect_uri,
            expected_audience,
            created_at: now,
            expires_at: now + lifetime,
        }
    }

    /// Correlation ID for logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Entity identifier of the chosen IdP; also the expected token issuer
    pub fn idp(&self) -> &str {
        &self.idp
    }

    /// Trust chain resolved for the IdP when it was selected
    pub fn trust_chain(&self) -> &TrustChain {
        &self.trust_chain
    }

    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    pub fn state(&self) -> &Secret {
        &self.state
    }

    pub fn nonce(&self) -> &Secret {
        &self.nonce
    }

    pub fn pkce(&self) -> &Pkce {
        &self.pkce
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Audience the identity token must name (this relying party)
    pub fn expected_audience(&self) -> &str {
        &self.expected_audience
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
