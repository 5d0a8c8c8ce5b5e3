//! Identity token decryption and verification
//!
//! The token endpoint returns a JWE encrypted to one of this relying
//! party's keys. Inside is a JWS signed by the IdP. Trust in the signature
//! comes only from the IdP's trust chain, never from the token itself.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use healthid_core::{CompactJwe, CompactJws, JoseProvider};

use crate::error::{LoginError, Result};
use crate::flow::session::AuthorizationSession;
use crate::keys::ClientKeyStore;

/// `aud` claim: a single audience or a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::Single(a) => a == audience,
            Audience::Many(all) => all.iter().any(|a| a == audience),
        }
    }
}

/// Claims of a verified identity token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Audience,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Profile claims
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A verified identity token, with the signed JWS kept for audit
#[derive(Debug, Clone)]
pub struct VerifiedIdToken {
    claims: IdTokenClaims,
    jws: CompactJws,
}

impl VerifiedIdToken {
    pub fn claims(&self) -> &IdTokenClaims {
        &self.claims
    }

    /// The signed token exactly as the IdP issued it
    pub fn jws(&self) -> &CompactJws {
        &self.jws
    }

    pub fn into_claims(self) -> IdTokenClaims {
        self.claims
    }
}

/// Decrypt and verify a raw identity token for `session`
pub(crate) fn verify_id_token(
    raw: &str,
    session: &AuthorizationSession,
    keys: &ClientKeyStore,
    jose: &dyn JoseProvider,
    skew: Duration,
    now: DateTime<Utc>,
) -> Result<VerifiedIdToken> {
    let idp = session.idp();

    let jwe = CompactJwe::parse(raw).map_err(|e| LoginError::bad_id_token(e.to_string()))?;
    let enc_kid = jwe.kid().unwrap_or_default();
    let decryption_key = keys
        .decryption_key(enc_kid)
        .ok_or_else(|| LoginError::UnknownEncryptionKey(enc_kid.to_string()))?;

    let plaintext = jose
        .decrypt(&jwe, decryption_key)
        .map_err(|e| LoginError::bad_id_token(e.to_string()))?;
    let plaintext = String::from_utf8(plaintext)
        .map_err(|_| LoginError::bad_id_token("decrypted payload is not UTF-8"))?;
    let jws = CompactJws::parse(&plaintext).map_err(|e| LoginError::bad_id_token(e.to_string()))?;

    let signing_keys = session.trust_chain().signing_keys_at(idp, now)?;
    let sig_kid = jws.kid().unwrap_or_default();
    let signing_key = signing_keys
        .find(sig_kid)
        .ok_or_else(|| LoginError::UnknownSigningKey(sig_kid.to_string()))?;
    jose.verify(&jws, signing_key)
        .map_err(|e| LoginError::bad_id_token(e.to_string()))?;

    let claims: IdTokenClaims = serde_json::from_slice(jws.payload())
        .map_err(|e| LoginError::bad_id_token(format!("claims: {}", e)))?;
    check_claims(&claims, session, skew, now)?;

    Ok(VerifiedIdToken { claims, jws })
}

fn check_claims(
    claims: &IdTokenClaims,
    session: &AuthorizationSession,
    skew: Duration,
    now: DateTime<Utc>,
) -> Result<()> {
    let reject = |reason: &str| -> Result<()> {
        warn!(session_id = %session.id(), idp = %session.idp(), reason = %reason, "Rejected identity token");
        Err(LoginError::bad_id_token(reason))
    };

    if now.timestamp() > claims.exp.saturating_add(skew.num_seconds()) {
        return reject("token expired");
    }
    if claims.iss != session.idp() {
        return reject("issuer mismatch");
    }
    if !claims.aud.contains(session.expected_audience()) {
        return reject("audience mismatch");
    }
    if claims.nonce.as_deref() != Some(session.nonce().expose()) {
        return reject("nonce mismatch");
    }
    Ok(())
}
