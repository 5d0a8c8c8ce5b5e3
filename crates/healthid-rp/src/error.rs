//! Login failures
//!
//! Every failed login surfaces as one `LoginError`. The variant carries the
//! typed reason for audit logging; the HTTP surface only ever tells the end
//! user that the login failed.

use serde::Serialize;
use thiserror::Error;

use healthid_federation::ResolveError;

/// Result type alias using LoginError
pub type Result<T> = std::result::Result<T, LoginError>;

/// Why a login attempt ended in failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoginError {
    /// No valid trust chain from the IdP to the trust anchor
    #[error("Untrusted identity provider: {0}")]
    UntrustedIdp(#[from] ResolveError),

    /// The IdP's verified configuration lacks usable OpenID provider metadata
    #[error("Unusable provider metadata for {idp}: {reason}")]
    ProviderMetadata { idp: String, reason: String },

    /// Callback `state` does not belong to this session
    #[error("State mismatch")]
    StateMismatch,

    /// Callback carried no authorization code
    #[error("Missing authorization code")]
    MissingCode,

    /// Callback arrived after the login timeout
    #[error("Login session expired")]
    SessionExpired,

    /// Token endpoint unreachable or failing server-side
    #[error("Identity provider unreachable: {0}")]
    IdpUnreachable(String),

    /// Token endpoint rejected the authorization code
    #[error("Identity provider rejected the code: {error}")]
    IdpRejectedCode {
        error: String,
        description: Option<String>,
    },

    /// Token response without a usable identity token
    #[error("Malformed token response: {0}")]
    MalformedTokenResponse(String),

    /// Identity token encrypted to a key this relying party does not own
    #[error("Unknown encryption key: {0}")]
    UnknownEncryptionKey(String),

    /// Identity token signed with a key the trust chain does not vouch for
    #[error("Unknown signing key: {0}")]
    UnknownSigningKey(String),

    /// Identity token failed decryption, signature or claim checks
    #[error("Bad identity token: {reason}")]
    BadIdToken { reason: String },
}

/// Flat failure classification for audit logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    UntrustedIdp,
    ProviderMetadata,
    StateMismatch,
    MissingCode,
    SessionExpired,
    IdpUnreachable,
    IdpRejectedCode,
    MalformedTokenResponse,
    UnknownEncryptionKey,
    UnknownSigningKey,
    BadIdToken,
}

impl FailureKind {
    /// Stable name for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::UntrustedIdp => "UNTRUSTED_IDP",
            FailureKind::ProviderMetadata => "PROVIDER_METADATA",
            FailureKind::StateMismatch => "STATE_MISMATCH",
            FailureKind::MissingCode => "MISSING_CODE",
            FailureKind::SessionExpired => "SESSION_EXPIRED",
            FailureKind::IdpUnreachable => "IDP_UNREACHABLE",
            FailureKind::IdpRejectedCode => "IDP_REJECTED_CODE",
            FailureKind::MalformedTokenResponse => "MALFORMED_TOKEN_RESPONSE",
            FailureKind::UnknownEncryptionKey => "UNKNOWN_ENCRYPTION_KEY",
            FailureKind::UnknownSigningKey => "UNKNOWN_SIGNING_KEY",
            FailureKind::BadIdToken => "BAD_ID_TOKEN",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LoginError {
    /// Classification of this failure
    pub fn kind(&self) -> FailureKind {
        match self {
            LoginError::UntrustedIdp(_) => FailureKind::UntrustedIdp,
            LoginError::ProviderMetadata { .. } => FailureKind::ProviderMetadata,
            LoginError::StateMismatch => FailureKind::StateMismatch,
            LoginError::MissingCode => FailureKind::MissingCode,
            LoginError::SessionExpired => FailureKind::SessionExpired,
            LoginError::IdpUnreachable(_) => FailureKind::IdpUnreachable,
            LoginError::IdpRejectedCode { .. } => FailureKind::IdpRejectedCode,
            LoginError::MalformedTokenResponse(_) => FailureKind::MalformedTokenResponse,
            LoginError::UnknownEncryptionKey(_) => FailureKind::UnknownEncryptionKey,
            LoginError::UnknownSigningKey(_) => FailureKind::UnknownSigningKey,
            LoginError::BadIdToken { .. } => FailureKind::BadIdToken,
        }
    }

    /// Whether a caller may retry with a fresh session
    ///
    /// Only transport-level failures qualify. Codes are single-use, so a
    /// retry always starts over from IdP selection.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LoginError::IdpUnreachable(_))
    }

    pub(crate) fn bad_id_token(reason: impl Into<String>) -> Self {
        LoginError::BadIdToken {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(LoginError::StateMismatch.kind(), FailureKind::StateMismatch);
        assert_eq!(
            LoginError::UntrustedIdp(ResolveError::UnknownEntity("x".into())).kind(),
            FailureKind::UntrustedIdp
        );
        assert_eq!(
            LoginError::bad_id_token("nonce mismatch").kind(),
            FailureKind::BadIdToken
        );
        assert_eq!(FailureKind::IdpRejectedCode.to_string(), "IDP_REJECTED_CODE");
    }

    #[test]
    fn test_only_unreachable_is_retryable() {
        assert!(LoginError::IdpUnreachable("timeout".into()).is_retryable());
        assert!(!LoginError::IdpRejectedCode {
            error: "invalid_grant".into(),
            description: None
        }
        .is_retryable());
        assert!(!LoginError::MalformedTokenResponse("no id_token".into()).is_retryable());
        assert!(!LoginError::StateMismatch.is_retryable());
    }

    #[test]
    fn test_kind_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&FailureKind::UnknownEncryptionKey).unwrap();
        assert_eq!(json, "\"UNKNOWN_ENCRYPTION_KEY\"");
    }
}
