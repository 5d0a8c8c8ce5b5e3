//! JOSE envelopes and the cryptographic capability
//!
//! Federation documents travel as compact JWS (entity statements, identity
//! tokens) and compact JWE (encrypted identity tokens). This module keeps
//! the envelope parsing separate from the cryptography: `CompactJws` and
//! `CompactJwe` only decode structure, while a `JoseProvider` signs,
//! verifies, encrypts and decrypts.
//!
//! Key types:
//! - `CompactJws`: parsed `header.payload.signature`
//! - `CompactJwe`: parsed `header.encrypted_key.iv.ciphertext.tag`
//! - `JoseProvider`: injectable sign/verify/encrypt/decrypt capability
//! - `P256Jose`: ES256 signatures and ECDH-ES + A256GCM encryption

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{Algorithm, DecodingKey, Header};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::ecdh::EphemeralSecret;
use p256::PublicKey;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{HealthIdError, Result};
use crate::jwk::Jwk;

/// JWS algorithm used throughout the federation
pub const ALG_ES256: &str = "ES256";

/// JWE key management algorithm (direct key agreement)
pub const ALG_ECDH_ES: &str = "ECDH-ES";

/// JWE content encryption algorithm
pub const ENC_A256GCM: &str = "A256GCM";

const GCM_IV_LEN: usize = 12;
const GCM_TAG_LEN: usize = 16;

// ============================================================================
// Compact JWS
// ============================================================================

/// A parsed compact JWS
///
/// Parsing decodes the header and payload but performs no signature check.
#[derive(Debug, Clone)]
pub struct CompactJws {
    raw: String,
    header: Header,
    payload: Vec<u8>,
    signature_b64: String,
}

impl CompactJws {
    /// Parse a compact JWS
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let parts: Vec<&str> = raw.split('.').collect();
        if parts.len() != 3 {
            return Err(HealthIdError::MalformedToken(format!(
                "Compact JWS must have 3 segments, got {}",
                parts.len()
            )));
        }

        let header = jsonwebtoken::decode_header(raw)?;
        let payload = URL_SAFE_NO_PAD.decode(parts[1])?;
        if parts[2].is_empty() {
            return Err(HealthIdError::MalformedToken("Empty JWS signature".into()));
        }

        Ok(Self {
            raw: raw.to_string(),
            header,
            payload,
            signature_b64: parts[2].to_string(),
        })
    }

    /// The compact serialization this was parsed from
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Protected header
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Key ID from the protected header
    pub fn kid(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    /// Decoded payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The bytes covered by the signature: `header_b64 "." payload_b64`
    pub fn signing_input(&self) -> &str {
        match self.raw.rfind('.') {
            Some(idx) => &self.raw[..idx],
            None => &self.raw,
        }
    }

    /// Base64url signature segment
    pub fn signature(&self) -> &str {
        &self.signature_b64
    }
}

impl std::fmt::Display for CompactJws {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

// ============================================================================
// Compact JWE
// ============================================================================

/// Protected header of an ECDH-ES JWE
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JweHeader {
    /// Key management algorithm
    pub alg: String,

    /// Content encryption algorithm
    pub enc: String,

    /// Key ID of the recipient key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Content type of the plaintext ("JWT" for nested tokens)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cty: Option<String>,

    /// Ephemeral public key of the sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epk: Option<Jwk>,

    /// Agreement PartyUInfo (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apu: Option<String>,

    /// Agreement PartyVInfo (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apv: Option<String>,
}

/// A parsed compact JWE
#[derive(Debug, Clone)]
pub struct CompactJwe {
    header: JweHeader,
    protected_b64: String,
    encrypted_key: Vec<u8>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
}

impl CompactJwe {
    /// Parse a compact JWE
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.trim().split('.').collect();
        if parts.len() != 5 {
            return Err(HealthIdError::MalformedToken(format!(
                "Compact JWE must have 5 segments, got {}",
                parts.len()
            )));
        }

        let header_bytes = URL_SAFE_NO_PAD.decode(parts[0])?;
        let header: JweHeader = serde_json::from_slice(&header_bytes)
            .map_err(|e| HealthIdError::MalformedToken(format!("JWE header: {}", e)))?;

        Ok(Self {
            header,
            protected_b64: parts[0].to_string(),
            encrypted_key: URL_SAFE_NO_PAD.decode(parts[1])?,
            iv: URL_SAFE_NO_PAD.decode(parts[2])?,
            ciphertext: URL_SAFE_NO_PAD.decode(parts[3])?,
            tag: URL_SAFE_NO_PAD.decode(parts[4])?,
        })
    }

    /// Protected header
    pub fn header(&self) -> &JweHeader {
        &self.header
    }

    /// Recipient key ID
    pub fn kid(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    /// Serialize back to compact form
    pub fn to_compact(&self) -> String {
        format!(
            "{}.{}.{}.{}.{}",
            self.protected_b64,
            URL_SAFE_NO_PAD.encode(&self.encrypted_key),
            URL_SAFE_NO_PAD.encode(&self.iv),
            URL_SAFE_NO_PAD.encode(&self.ciphertext),
            URL_SAFE_NO_PAD.encode(&self.tag),
        )
    }
}

// ============================================================================
// Capability
// ============================================================================

/// Cryptographic capability used by the trust and protocol layers
///
/// Implementations look up nothing themselves: callers select the key by
/// `kid` and hand it over, so that an unknown key is reported by the caller
/// and never confused with a bad signature.
pub trait JoseProvider: Send + Sync + std::fmt::Debug {
    /// Sign `payload` as a compact JWS with the private `key`
    ///
    /// The protected header carries `alg`, the key's `kid` and `typ` if given.
    fn sign(&self, payload: &[u8], typ: Option<&str>, key: &Jwk) -> Result<String>;

    /// Verify the signature of a parsed JWS against a public `key`
    fn verify(&self, jws: &CompactJws, key: &Jwk) -> Result<()>;

    /// Encrypt `plaintext` to the recipient's public `key` as a compact JWE
    fn encrypt(&self, plaintext: &[u8], cty: Option<&str>, key: &Jwk) -> Result<String>;

    /// Decrypt a parsed JWE with the recipient's private `key`
    fn decrypt(&self, jwe: &CompactJwe, key: &Jwk) -> Result<Vec<u8>>;
}

/// P-256 JOSE backend: ES256 signatures, ECDH-ES + A256GCM encryption
#[derive(Debug, Clone, Copy, Default)]
pub struct P256Jose;

impl P256Jose {
    /// Create the backend
    pub fn new() -> Self {
        Self
    }
}

impl JoseProvider for P256Jose {
    fn sign(&self, payload: &[u8], typ: Option<&str>, key: &Jwk) -> Result<String> {
        let signing_key = SigningKey::from(key.secret_key()?);

        let mut header = Header::new(Algorithm::ES256);
        header.typ = typ.map(str::to_string);
        header.kid = key.kid.clone();

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let signature: Signature = signing_key.sign(signing_input.as_bytes());

        Ok(format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        ))
    }

    fn verify(&self, jws: &CompactJws, key: &Jwk) -> Result<()> {
        if jws.header().alg != Algorithm::ES256 {
            return Err(HealthIdError::UnsupportedAlgorithm(format!(
                "JWS alg {:?}",
                jws.header().alg
            )));
        }

        let (x, y) = match (key.x.as_deref(), key.y.as_deref()) {
            (Some(x), Some(y)) => (x, y),
            _ => return Err(HealthIdError::InvalidKey("EC key without coordinates".into())),
        };
        let decoding_key = DecodingKey::from_ec_components(x, y)?;

        let valid = jsonwebtoken::crypto::verify(
            jws.signature(),
            jws.signing_input().as_bytes(),
            &decoding_key,
            Algorithm::ES256,
        )?;

        if valid {
            Ok(())
        } else {
            Err(HealthIdError::SignatureInvalid(format!(
                "ES256 signature does not verify under key '{}'",
                key.kid().unwrap_or("<none>")
            )))
        }
    }

    fn encrypt(&self, plaintext: &[u8], cty: Option<&str>, key: &Jwk) -> Result<String> {
        let recipient = key.public_key()?;

        let ephemeral = EphemeralSecret::random(&mut OsRng);
        let epk = ephemeral_jwk(&PublicKey::from(&ephemeral));
        let shared = ephemeral.diffie_hellman(&recipient);

        let header = JweHeader {
            alg: ALG_ECDH_ES.to_string(),
            enc: ENC_A256GCM.to_string(),
            kid: key.kid.clone(),
            cty: cty.map(str::to_string),
            epk: Some(epk),
            apu: None,
            apv: None,
        };
        let protected_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);

        let cek = concat_kdf(shared.raw_secret_bytes().as_slice(), ENC_A256GCM, &[], &[]);
        let cipher = Aes256Gcm::new_from_slice(&cek)
            .map_err(|e| HealthIdError::InvalidKey(e.to_string()))?;

        let mut iv = [0u8; GCM_IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let mut sealed = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: plaintext,
                    aad: protected_b64.as_bytes(),
                },
            )
            .map_err(|_| HealthIdError::DecryptionFailed("AES-GCM encryption failed".into()))?;
        let tag = sealed.split_off(sealed.len() - GCM_TAG_LEN);

        Ok(format!(
            "{}..{}.{}.{}",
            protected_b64,
            URL_SAFE_NO_PAD.encode(iv),
            URL_SAFE_NO_PAD.encode(&sealed),
            URL_SAFE_NO_PAD.encode(&tag),
        ))
    }

    fn decrypt(&self, jwe: &CompactJwe, key: &Jwk) -> Result<Vec<u8>> {
        let header = jwe.header();
        if header.alg != ALG_ECDH_ES {
            return Err(HealthIdError::UnsupportedAlgorithm(format!("JWE alg {}", header.alg)));
        }
        if header.enc != ENC_A256GCM {
            return Err(HealthIdError::UnsupportedAlgorithm(format!("JWE enc {}", header.enc)));
        }
        if !jwe.encrypted_key.is_empty() {
            return Err(HealthIdError::MalformedToken(
                "ECDH-ES direct agreement must have an empty encrypted key".into(),
            ));
        }
        if jwe.iv.len() != GCM_IV_LEN || jwe.tag.len() != GCM_TAG_LEN {
            return Err(HealthIdError::MalformedToken("Bad AES-GCM IV or tag length".into()));
        }

        let epk = header
            .epk
            .as_ref()
            .ok_or_else(|| HealthIdError::MissingField("epk".into()))?
            .public_key()?;
        let secret = key.secret_key()?;
        let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), epk.as_affine());

        let apu = decode_party_info(header.apu.as_deref())?;
        let apv = decode_party_info(header.apv.as_deref())?;
        let cek = concat_kdf(shared.raw_secret_bytes().as_slice(), &header.enc, &apu, &apv);
        let cipher = Aes256Gcm::new_from_slice(&cek)
            .map_err(|e| HealthIdError::InvalidKey(e.to_string()))?;

        let mut sealed = jwe.ciphertext.clone();
        sealed.extend_from_slice(&jwe.tag);

        cipher
            .decrypt(
                Nonce::from_slice(&jwe.iv),
                Payload {
                    msg: &sealed,
                    aad: jwe.protected_b64.as_bytes(),
                },
            )
            .map_err(|_| HealthIdError::DecryptionFailed("AES-GCM authentication failed".into()))
    }
}

fn ephemeral_jwk(public: &PublicKey) -> Jwk {
    let mut jwk = Jwk::from_public_key("", crate::jwk::KeyUse::Enc, public);
    jwk.kid = None;
    jwk.key_use = None;
    jwk.alg = None;
    jwk
}

fn decode_party_info(value: Option<&str>) -> Result<Vec<u8>> {
    match value {
        Some(v) => Ok(URL_SAFE_NO_PAD.decode(v)?),
        None => Ok(Vec::new()),
    }
}

/// Concat KDF (NIST SP 800-56A) with SHA-256, single round for a 256-bit key
fn concat_kdf(z: &[u8], algorithm_id: &str, apu: &[u8], apv: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(1u32.to_be_bytes());
    hasher.update(z);
    for part in [algorithm_id.as_bytes(), apu, apv] {
        hasher.update((part.len() as u32).to_be_bytes());
        hasher.update(part);
    }
    hasher.update(256u32.to_be_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwk::KeyUse;

    #[test]
    fn test_sign_and_verify() {
        let jose = P256Jose::new();
        let key = Jwk::generate_p256("sig-1", KeyUse::Sig);

        let raw = jose.sign(b"{\"hello\":\"world\"}", Some("JWT"), &key).unwrap();
        let jws = CompactJws::parse(&raw).unwrap();

        assert_eq!(jws.kid(), Some("sig-1"));
        assert_eq!(jws.header().typ.as_deref(), Some("JWT"));
        assert_eq!(jws.payload(), b"{\"hello\":\"world\"}");
        jose.verify(&jws, &key.to_public()).unwrap();
    }

    #[test]
    fn test_verification_fails_with_wrong_key() {
        let jose = P256Jose::new();
        let key1 = Jwk::generate_p256("key-1", KeyUse::Sig);
        let key2 = Jwk::generate_p256("key-1", KeyUse::Sig);

        let raw = jose.sign(b"payload", None, &key1).unwrap();
        let jws = CompactJws::parse(&raw).unwrap();

        assert!(matches!(
            jose.verify(&jws, &key2.to_public()),
            Err(HealthIdError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let jose = P256Jose::new();
        let key = Jwk::generate_p256("k", KeyUse::Sig);

        let raw = jose.sign(b"payload", None, &key).unwrap();
        let (input, sig) = raw.rsplit_once('.').unwrap();
        let sig_bytes = URL_SAFE_NO_PAD.decode(sig).unwrap();
        let mut flipped = sig_bytes.clone();
        flipped[10] ^= 0x01;
        let tampered = format!("{}.{}", input, URL_SAFE_NO_PAD.encode(flipped));

        let jws = CompactJws::parse(&tampered).unwrap();
        assert!(jose.verify(&jws, &key.to_public()).is_err());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let jose = P256Jose::new();
        let key = Jwk::generate_p256("k", KeyUse::Sig);

        let raw = jose.sign(b"{\"sub\":\"alice\"}", None, &key).unwrap();
        let parts: Vec<&str> = raw.split('.').collect();
        let forged = format!(
            "{}.{}.{}",
            parts[0],
            URL_SAFE_NO_PAD.encode(b"{\"sub\":\"mallory\"}"),
            parts[2]
        );

        let jws = CompactJws::parse(&forged).unwrap();
        assert!(jose.verify(&jws, &key.to_public()).is_err());
    }

    #[test]
    fn test_malformed_jws() {
        assert!(matches!(
            CompactJws::parse("only.two"),
            Err(HealthIdError::MalformedToken(_))
        ));
        assert!(CompactJws::parse("!!!.e30.c2ln").is_err());
    }

    #[test]
    fn test_encrypt_and_decrypt() {
        let jose = P256Jose::new();
        let key = Jwk::generate_p256("enc-1", KeyUse::Enc);

        let raw = jose.encrypt(b"nested.jws.token", Some("JWT"), &key.to_public()).unwrap();
        let jwe = CompactJwe::parse(&raw).unwrap();

        assert_eq!(jwe.kid(), Some("enc-1"));
        assert_eq!(jwe.header().alg, ALG_ECDH_ES);
        assert_eq!(jwe.header().enc, ENC_A256GCM);
        assert_eq!(jwe.header().cty.as_deref(), Some("JWT"));
        assert!(jwe.header().epk.as_ref().map(|k| !k.is_private()).unwrap());
        assert_eq!(jwe.to_compact(), raw);

        let plaintext = jose.decrypt(&jwe, &key).unwrap();
        assert_eq!(plaintext, b"nested.jws.token");
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let jose = P256Jose::new();
        let key = Jwk::generate_p256("enc-1", KeyUse::Enc);
        let other = Jwk::generate_p256("enc-1", KeyUse::Enc);

        let raw = jose.encrypt(b"secret", None, &key.to_public()).unwrap();
        let jwe = CompactJwe::parse(&raw).unwrap();

        assert!(matches!(
            jose.decrypt(&jwe, &other),
            Err(HealthIdError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails_decryption() {
        let jose = P256Jose::new();
        let key = Jwk::generate_p256("enc-1", KeyUse::Enc);

        let raw = jose.encrypt(b"some identity token", None, &key.to_public()).unwrap();
        let mut parts: Vec<String> = raw.split('.').map(str::to_string).collect();
        let mut ciphertext = URL_SAFE_NO_PAD.decode(&parts[3]).unwrap();
        ciphertext[0] ^= 0x80;
        parts[3] = URL_SAFE_NO_PAD.encode(ciphertext);

        let jwe = CompactJwe::parse(&parts.join(".")).unwrap();
        assert!(matches!(
            jose.decrypt(&jwe, &key),
            Err(HealthIdError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_tampered_header_fails_decryption() {
        let jose = P256Jose::new();
        let key = Jwk::generate_p256("enc-1", KeyUse::Enc);

        let raw = jose.encrypt(b"payload", None, &key.to_public()).unwrap();
        let jwe = CompactJwe::parse(&raw).unwrap();

        // Same key agreement, different protected header: the AAD no longer matches
        let mut header = jwe.header().clone();
        header.cty = Some("JWT".into());
        let protected = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap());
        let (_, rest) = raw.split_once('.').unwrap();
        let forged = CompactJwe::parse(&format!("{}.{}", protected, rest)).unwrap();

        assert!(jose.decrypt(&forged, &key).is_err());
    }

    #[test]
    fn test_unsupported_jwe_alg() {
        let jose = P256Jose::new();
        let key = Jwk::generate_p256("enc-1", KeyUse::Enc);

        let raw = jose.encrypt(b"payload", None, &key.to_public()).unwrap();
        let jwe = CompactJwe::parse(&raw).unwrap();
        let mut header = jwe.header().clone();
        header.alg = "RSA-OAEP".into();
        let protected = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap());
        let (_, rest) = raw.split_once('.').unwrap();
        let forged = CompactJwe::parse(&format!("{}.{}", protected, rest)).unwrap();

        assert!(matches!(
            jose.decrypt(&forged, &key),
            Err(HealthIdError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_concat_kdf_depends_on_party_info() {
        let z = [7u8; 32];
        let a = concat_kdf(&z, ENC_A256GCM, &[], &[]);
        let b = concat_kdf(&z, ENC_A256GCM, b"alice", &[]);
        assert_ne!(a, b);
        assert_eq!(a, concat_kdf(&z, ENC_A256GCM, &[], &[]));
    }
}
