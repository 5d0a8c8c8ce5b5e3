//! JSON Web Keys
//!
//! Federation documents carry their keys as JWK sets. Only P-256 elliptic
//! curve keys are used by this federation: ES256 for signatures and
//! ECDH-ES for identity token encryption.
//!
//! A `Jwk` may hold private material (`d`). Private keys never leave this
//! process: `Debug` redacts them and `to_public()` strips them before a key
//! is published in a statement.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{EncodedPoint, FieldBytes, PublicKey, SecretKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::{HealthIdError, Result};

/// Key type for elliptic curve keys
pub const KTY_EC: &str = "EC";

/// Curve name for NIST P-256
pub const CRV_P256: &str = "P-256";

/// Intended use of a public key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUse {
    /// Signature creation/verification
    Sig,
    /// Encryption/decryption
    Enc,
}

/// A single JSON Web Key
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("EC")
    pub kty: String,

    /// Key ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Intended use
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<KeyUse>,

    /// Algorithm hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// Curve name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    /// EC private scalar (base64url), present only on private keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
}

impl std::fmt::Debug for Jwk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jwk")
            .field("kty", &self.kty)
            .field("kid", &self.kid)
            .field("use", &self.key_use)
            .field("crv", &self.crv)
            .field("d", &self.d.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl Jwk {
    /// Generate a new random P-256 private key
    pub fn generate_p256(kid: impl Into<String>, key_use: KeyUse) -> Self {
        let secret = SecretKey::random(&mut OsRng);
        Self::from_secret_key(kid, key_use, &secret)
    }

    /// Build a private JWK from an existing P-256 secret key
    pub fn from_secret_key(kid: impl Into<String>, key_use: KeyUse, secret: &SecretKey) -> Self {
        let mut jwk = Self::from_public_key(kid, key_use, &secret.public_key());
        jwk.d = Some(URL_SAFE_NO_PAD.encode(secret.to_bytes()));
        jwk
    }

    /// Build a public JWK from a P-256 public key
    pub fn from_public_key(kid: impl Into<String>, key_use: KeyUse, public: &PublicKey) -> Self {
        let point = public.to_encoded_point(false);
        let alg = match key_use {
            KeyUse::Sig => "ES256",
            KeyUse::Enc => "ECDH-ES",
        };
        Self {
            kty: KTY_EC.to_string(),
            kid: Some(kid.into()),
            key_use: Some(key_use),
            alg: Some(alg.to_string()),
            crv: Some(CRV_P256.to_string()),
            x: point.x().map(|x| URL_SAFE_NO_PAD.encode(x)),
            y: point.y().map(|y| URL_SAFE_NO_PAD.encode(y)),
            d: None,
        }
    }

    /// Key ID, if any
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// Whether this key carries private material
    pub fn is_private(&self) -> bool {
        self.d.is_some()
    }

    /// Whether this key may be used for signatures (`use` is `sig` or absent)
    pub fn is_signing_key(&self) -> bool {
        self.key_use != Some(KeyUse::Enc)
    }

    /// Whether this key may be used for encryption (`use` is `enc` or absent)
    pub fn is_encryption_key(&self) -> bool {
        self.key_use != Some(KeyUse::Sig)
    }

    /// Copy of this key without private material
    pub fn to_public(&self) -> Self {
        Self {
            d: None,
            ..self.clone()
        }
    }

    /// Whether `other` describes the same public key (same kid and coordinates)
    pub fn same_public_key(&self, other: &Jwk) -> bool {
        self.kid == other.kid
            && self.kty == other.kty
            && self.crv == other.crv
            && self.x == other.x
            && self.y == other.y
    }

    /// Decode the P-256 public key
    pub fn public_key(&self) -> Result<PublicKey> {
        self.ensure_p256()?;
        let x = decode_coordinate(self.x.as_deref(), "x")?;
        let y = decode_coordinate(self.y.as_deref(), "y")?;
        let point = EncodedPoint::from_affine_coordinates(&x, &y, false);
        PublicKey::from_sec1_bytes(point.as_bytes()).map_err(HealthIdError::from)
    }

    /// Decode the P-256 private key
    pub fn secret_key(&self) -> Result<SecretKey> {
        self.ensure_p256()?;
        let d = decode_coordinate(self.d.as_deref(), "d")?;
        let secret = SecretKey::from_bytes(&d)?;

        // A private JWK whose d does not match its published coordinates is a misconfiguration
        if self.x.is_some() && secret.public_key() != self.public_key()? {
            return Err(HealthIdError::InvalidKey(format!(
                "Private scalar does not match public coordinates for key '{}'",
                self.kid.as_deref().unwrap_or("<none>")
            )));
        }
        Ok(secret)
    }

    fn ensure_p256(&self) -> Result<()> {
        if self.kty != KTY_EC {
            return Err(HealthIdError::UnsupportedAlgorithm(format!(
                "Key type: {}",
                self.kty
            )));
        }
        match self.crv.as_deref() {
            Some(CRV_P256) => Ok(()),
            other => Err(HealthIdError::UnsupportedAlgorithm(format!(
                "Curve: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }
}

fn decode_coordinate(value: Option<&str>, name: &str) -> Result<FieldBytes> {
    let value = value.ok_or_else(|| HealthIdError::InvalidKey(format!("Missing EC {}", name)))?;
    let bytes = URL_SAFE_NO_PAD.decode(value)?;
    if bytes.len() != 32 {
        return Err(HealthIdError::InvalidKey(format!(
            "EC {} must be 32 bytes, got {}",
            name,
            bytes.len()
        )));
    }
    Ok(*FieldBytes::from_slice(&bytes))
}

/// A JSON Web Key Set, keyed by `kid`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys in this set
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Create a key set from keys
    pub fn new(keys: Vec<Jwk>) -> Self {
        Self { keys }
    }

    /// Find a key by key ID
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }

    /// Check whether a key ID is present
    pub fn contains_kid(&self, kid: &str) -> bool {
        self.find(kid).is_some()
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterate over keys
    pub fn iter(&self) -> impl Iterator<Item = &Jwk> {
        self.keys.iter()
    }

    /// Keys usable for signature verification
    pub fn signing_keys(&self) -> Jwks {
        Jwks::new(self.keys.iter().filter(|k| k.is_signing_key()).cloned().collect())
    }

    /// Keys usable for encryption
    pub fn encryption_keys(&self) -> Jwks {
        Jwks::new(self.keys.iter().filter(|k| k.is_encryption_key()).cloned().collect())
    }

    /// Copy of this set with all private material removed
    pub fn to_public(&self) -> Jwks {
        Jwks::new(self.keys.iter().map(Jwk::to_public).collect())
    }

    /// Append keys from another set, skipping key IDs already present
    pub fn merge(&mut self, other: &Jwks) {
        for key in &other.keys {
            let duplicate = key.kid.as_deref().map(|kid| self.contains_kid(kid)).unwrap_or(false);
            if !duplicate {
                self.keys.push(key.clone());
            }
        }
    }
}

impl FromIterator<Jwk> for Jwks {
    fn from_iter<I: IntoIterator<Item = Jwk>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
