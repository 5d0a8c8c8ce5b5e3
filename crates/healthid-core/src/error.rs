//! Error types for the health-ID core

use thiserror::Error;

/// Result type alias using HealthIdError
pub type Result<T> = std::result::Result<T, HealthIdError>;

/// Errors raised while decoding or verifying federation documents
///
/// Structural failures (`MalformedStatement`, `MalformedToken`) are kept apart
/// from cryptographic ones (`SignatureInvalid`, `DecryptionFailed`) so callers
/// can tell a garbled document from a forged one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HealthIdError {
    /// Entity statement failed structural decoding
    #[error("Malformed entity statement: {0}")]
    MalformedStatement(String),

    /// Compact JWS/JWE envelope is structurally invalid
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// JWS signature did not verify
    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    /// JWE could not be decrypted
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// No key with the requested key ID
    #[error("Unknown key: {0}")]
    UnknownKey(String),

    /// Key material is unusable for the requested operation
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Algorithm is not supported by the JOSE backend
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl From<serde_json::Error> for HealthIdError {
    fn from(err: serde_json::Error) -> Self {
        HealthIdError::SerializationError(err.to_string())
    }
}

impl From<base64::DecodeError> for HealthIdError {
    fn from(err: base64::DecodeError) -> Self {
        HealthIdError::MalformedToken(format!("Invalid base64url segment: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for HealthIdError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::InvalidSignature => HealthIdError::SignatureInvalid(err.to_string()),
            ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidKeyFormat => {
                HealthIdError::InvalidKey(err.to_string())
            }
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                HealthIdError::UnsupportedAlgorithm(err.to_string())
            }
            _ => HealthIdError::MalformedToken(err.to_string()),
        }
    }
}

impl From<p256::elliptic_curve::Error> for HealthIdError {
    fn from(err: p256::elliptic_curve::Error) -> Self {
        HealthIdError::InvalidKey(err.to_string())
    }
}
