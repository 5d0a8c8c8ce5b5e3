//! Error types for trust chain resolution

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type for federation operations
pub type Result<T> = std::result::Result<T, ResolveError>;

/// Which trust chain invariant a link violated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainViolation {
    /// Signature does not verify against the authoritative keys
    BadSignature,
    /// Signing `kid` is not among the authoritative keys
    UnknownKey,
    /// Statement is past its expiry
    Expired,
    /// Statement is not yet valid
    NotYetValid,
    /// Statement describes a different subject than expected
    SubjectMismatch,
    /// Statement was issued by a different entity than expected
    IssuerMismatch,
    /// Child does not name the superior in its authority hints
    HintMissing,
    /// Authority hints loop back to an entity already on the path
    Cycle,
}

impl std::fmt::Display for ChainViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChainViolation::BadSignature => "bad signature",
            ChainViolation::UnknownKey => "unknown signing key",
            ChainViolation::Expired => "expired",
            ChainViolation::NotYetValid => "not yet valid",
            ChainViolation::SubjectMismatch => "subject mismatch",
            ChainViolation::IssuerMismatch => "issuer mismatch",
            ChainViolation::HintMissing => "authority hint missing",
            ChainViolation::Cycle => "cycle",
        };
        f.write_str(s)
    }
}

/// Errors from trust chain resolution and key recovery
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// A fetched statement failed structural decoding
    #[error("Malformed statement for {entity}: {reason}")]
    MalformedStatement { entity: String, reason: String },

    /// A statement violated a trust chain invariant
    #[error("Invalid trust chain at {link}: {reason}")]
    InvalidTrustChain { link: String, reason: ChainViolation },

    /// The walk consumed `max_depth` entities without reaching the anchor
    #[error("Trust chain exceeds maximum depth of {max_depth}")]
    TrustChainExceeded { max_depth: usize },

    /// An entity has no authority hints and is not the trust anchor
    #[error("No path to trust anchor from {entity}")]
    NoPathToAnchor { entity: String },

    /// A statement could not be fetched
    #[error("Failed to fetch statement about {subject} from {issuer}: {reason}")]
    FetchFailed {
        issuer: String,
        subject: String,
        reason: String,
    },

    /// No link of the trust chain describes the entity
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// The trust chain was presented after its earliest expiry
    #[error("Trust chain expired at {0}")]
    StaleTrustChain(DateTime<Utc>),
}

impl ResolveError {
    /// Rank used to pick the reported failure when every branch fails
    ///
    /// Higher is more severe. A forged or tampered link outranks a garbled
    /// document, which outranks an unreachable entity, which outranks a path
    /// that simply never reached the anchor.
    pub fn severity(&self) -> u8 {
        match self {
            ResolveError::InvalidTrustChain { .. } => 5,
            ResolveError::MalformedStatement { .. } => 4,
            ResolveError::FetchFailed { .. } => 3,
            ResolveError::TrustChainExceeded { .. } => 2,
            ResolveError::NoPathToAnchor { .. } => 1,
            ResolveError::UnknownEntity(_) | ResolveError::StaleTrustChain(_) => 0,
        }
    }

    /// Shorthand for an invariant violation at `link`
    pub fn violation(link: impl Into<String>, reason: ChainViolation) -> Self {
        ResolveError::InvalidTrustChain {
            link: link.into(),
            reason,
        }
    }

    /// Whether this error is an invariant violation of the given kind
    pub fn is_violation(&self, kind: ChainViolation) -> bool {
        matches!(self, ResolveError::InvalidTrustChain { reason, .. } if *reason == kind)
    }
}
