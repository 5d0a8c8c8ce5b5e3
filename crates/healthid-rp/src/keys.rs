//! Relying party key store
//!
//! Holds the private keys this relying party owns:
//! - the signing key for its self-issued entity configuration
//! - the encryption keys identity tokens are encrypted to
//!
//! Only public halves ever leave the store.

use healthid_core::{Jwk, Jwks, KeyUse};
use tracing::info;

use crate::config::ConfigError;

/// The relying party's own key material
#[derive(Clone)]
pub struct ClientKeyStore {
    signing_key: Jwk,
    encryption_keys: Jwks,
}

impl ClientKeyStore {
    /// Create a key store
    ///
    /// The signing key and every encryption key must be private P-256 keys
    /// with a key ID.
    pub fn new(signing_key: Jwk, encryption_keys: Jwks) -> Result<Self, ConfigError> {
        check_private(&signing_key, "entity_signing_key")?;
        if signing_key.key_use == Some(KeyUse::Enc) {
            return Err(ConfigError::InvalidKey {
                field: "entity_signing_key",
                reason: "key is marked for encryption".into(),
            });
        }

        if encryption_keys.is_empty() {
            return Err(ConfigError::Missing("relying_party_enc_keys"));
        }
        for key in encryption_keys.iter() {
            check_private(key, "relying_party_enc_keys")?;
            if key.key_use == Some(KeyUse::Sig) {
                return Err(ConfigError::InvalidKey {
                    field: "relying_party_enc_keys",
                    reason: format!(
                        "key '{}' is marked for signing",
                        key.kid().unwrap_or_default()
                    ),
                });
            }
        }

        info!(
            signing_kid = %signing_key.kid().unwrap_or_default(),
            encryption_keys = encryption_keys.len(),
            "Client key store initialized"
        );

        Ok(Self {
            signing_key,
            encryption_keys,
        })
    }

    /// Private key used for outgoing signatures
    pub fn signing_key(&self) -> &Jwk {
        &self.signing_key
    }

    /// Key ID of the signing key
    pub fn signing_kid(&self) -> &str {
        self.signing_key.kid().unwrap_or_default()
    }

    /// Private encryption key for `kid`, if this relying party owns one
    pub fn decryption_key(&self, kid: &str) -> Option<&Jwk> {
        self.encryption_keys.find(kid)
    }

    pub(crate) fn encryption_keys(&self) -> &Jwks {
        &self.encryption_keys
    }

    /// Public halves of the encryption keys
    pub fn public_encryption_keys(&self) -> Jwks {
        self.encryption_keys.to_public()
    }
}

impl std::fmt::Debug for ClientKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let enc_kids: Vec<&str> = self.encryption_keys.iter().filter_map(Jwk::kid).collect();
        f.debug_struct("ClientKeyStore")
            .field("signing_kid", &self.signing_kid())
            .field("encryption_kids", &enc_kids)
            .finish_non_exhaustive()
    }
}

fn check_private(key: &Jwk, field: &'static str) -> Result<(), ConfigError> {
    let kid = key.kid().ok_or_else(|| ConfigError::InvalidKey {
        field,
        reason: "key without kid".into(),
    })?;
    key.secret_key().map_err(|e| ConfigError::InvalidKey {
        field,
        reason: format!("key '{}': {}", kid, e),
    })?;
    Ok(())
}
