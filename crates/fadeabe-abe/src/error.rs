//! Error types for the ABE core.

use fadeabe_core::{CoreError, FailureKind};
use thiserror::Error;

/// Errors raised by setup, key generation, encryption and decryption.
#[derive(Debug, Error)]
pub enum AbeError {
    /// The key's attributes do not satisfy the ciphertext policy.
    #[error("policy unsatisfied")]
    PolicyUnsatisfied,

    /// Ciphertext structure or group encoding is invalid.
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// Secret key structure or group encoding is invalid.
    #[error("malformed key: {0}")]
    MalformedKey(String),

    /// The recovered plaintext does not match its group commitment.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// A message could not be converted to or from its wire form.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Pairing-group failure. Not recoverable.
    #[error("fatal pairing-group error: {0}")]
    Fatal(String),

    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl AbeError {
    /// Failure class of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            AbeError::PolicyUnsatisfied => FailureKind::AccessDenied,
            AbeError::MalformedCiphertext(_)
            | AbeError::MalformedKey(_)
            | AbeError::Encoding(_) => FailureKind::MalformedInput,
            AbeError::Integrity(_) => FailureKind::IntegrityViolation,
            AbeError::Fatal(_) => FailureKind::Fatal,
            AbeError::Core(e) => e.kind(),
        }
    }
}

/// Result type for ABE operations.
pub type Result<T> = std::result::Result<T, AbeError>;
