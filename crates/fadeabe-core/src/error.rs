//! Error types for fadeabe core.

use thiserror::Error;

/// Classification of a failure, shared by every layer that can end an
/// update session.
///
/// The class decides retry and refund behaviour: only `TransientIo` is ever
/// retried, and `Fatal` aborts the engine rather than a single session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum FailureKind {
    /// Network error or timeout.
    TransientIo = 1,
    /// Hash or signature mismatch. Possible tampering.
    IntegrityViolation = 2,
    /// Policy unsatisfied or attribute expired.
    AccessDenied = 3,
    /// Corrupt ciphertext, key, or record structure.
    MalformedInput = 4,
    /// Pairing-group or setup failure.
    Fatal = 5,
}

impl FailureKind {
    /// Convert to the stored discriminant.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a stored discriminant.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::TransientIo),
            2 => Some(Self::IntegrityViolation),
            3 => Some(Self::AccessDenied),
            4 => Some(Self::MalformedInput),
            5 => Some(Self::Fatal),
            _ => None,
        }
    }

    /// Whether a failure of this class may be retried with the same inputs.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::TransientIo)
    }
}

/// Errors raised by attribute, policy and fading-function handling.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Empty after sanitization, or a policy operator word.
    #[error("invalid attribute {0:?}: empty or reserved after sanitization")]
    InvalidAttribute(String),

    #[error("attributes {first:?} and {second:?} both sanitize to {token}")]
    AttributeCollision {
        first: String,
        second: String,
        token: String,
    },

    #[error("policy parse error at offset {offset}: {message}")]
    PolicyParse { offset: usize, message: String },

    #[error("unknown dynamic attribute: {0}")]
    UnknownAttribute(String),

    #[error("invalid fading function for {name}: {reason}")]
    InvalidFadingFunction { name: String, reason: String },

    #[error("invalid expiry {0:?}: expected unix millis, YYYY-MM-DD or YYYY-MM-DD HH:MM:SS")]
    InvalidExpiry(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("decoding error: {0}")]
    DecodingError(String),
}

impl CoreError {
    /// Failure class of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            CoreError::InvalidSignature => FailureKind::IntegrityViolation,
            _ => FailureKind::MalformedInput,
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
