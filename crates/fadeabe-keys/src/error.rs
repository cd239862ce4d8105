//! Error types for the key manager.

use fadeabe_abe::AbeError;
use fadeabe_core::{CoreError, FailureKind};
use fadeabe_store::StoreError;
use thiserror::Error;

/// Errors raised while issuing, renewing, merging or using keys.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The key holds expired attributes the ciphertext needs.
    #[error("attribute expired: {}", .names.join(", "))]
    AttributeExpired { names: Vec<String> },

    /// Renewal asked for an attribute that is not a registered dynamic attribute.
    #[error("attribute {0} is not dynamic")]
    NotDynamic(String),

    #[error("attribute {name} cannot be renewed again ({renewals} renewals so far)")]
    RenewalLimitReached { name: String, renewals: u32 },

    /// A renewal descriptor issued for another device.
    #[error("renewal for device {got} applied to key of device {expected}")]
    WrongDevice { expected: String, got: String },

    /// The attribute was renewed since the descriptor was issued.
    #[error("stale renewal for {name}: key embeds {current}, descriptor replaces {previous}")]
    StaleRenewal {
        name: String,
        current: String,
        previous: String,
    },

    /// The authority has no record of this device.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// No key is installed on this device.
    #[error("no secret key installed")]
    NoKey,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("abe error: {0}")]
    Abe(#[from] AbeError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl KeyError {
    /// Failure class of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            KeyError::AttributeExpired { .. }
            | KeyError::NotDynamic(_)
            | KeyError::RenewalLimitReached { .. }
            | KeyError::UnknownDevice(_)
            | KeyError::NoKey => FailureKind::AccessDenied,
            KeyError::WrongDevice { .. }
            | KeyError::StaleRenewal { .. }
            | KeyError::Serialization(_) => FailureKind::MalformedInput,
            KeyError::Fatal(_) => FailureKind::Fatal,
            KeyError::Abe(e) => e.kind(),
            KeyError::Core(e) => e.kind(),
            KeyError::Store(e) => e.kind(),
        }
    }
}

/// Result type for key operations.
pub type Result<T> = std::result::Result<T, KeyError>;
