//! Error types for the update pipeline.

use std::time::Duration;

use fadeabe_abe::AbeError;
use fadeabe_core::{ContentHash, CoreError, FailureKind, SessionState};
use fadeabe_keys::KeyError;
use fadeabe_store::StoreError;
use thiserror::Error;

/// Errors reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// Network or transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("not found: {0}")]
    NotFound(String),

    /// The update exists but is no longer offered.
    #[error("update inactive: {0}")]
    Inactive(String),

    /// The collaborator refused the request or its input.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl CollaboratorError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }

    pub fn kind(&self) -> FailureKind {
        if self.is_transient() {
            FailureKind::TransientIo
        } else {
            FailureKind::MalformedInput
        }
    }
}

/// Errors that can end an update session.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    /// The downloaded blob does not match the published commitment.
    #[error("content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error("invalid update signature: {0}")]
    InvalidSignature(String),

    /// The ABE unwrap of the symmetric key failed, for any reason.
    #[error("symmetric key recovery failed: {0}")]
    KeyRecovery(#[source] KeyError),

    /// Bulk decryption of the payload failed.
    #[error("payload decryption failed: {0}")]
    PayloadDecrypt(String),

    #[error("installation failed: {0}")]
    Install(String),

    /// A session found unfinished at restart, refunded instead of resumed.
    #[error("session interrupted in {0}")]
    Interrupted(SessionState),

    #[error("invalid session transition from {from} to {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    /// Another session for this update exists or is running.
    #[error("session already exists for update {0}")]
    SessionExists(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("abe error: {0}")]
    Abe(#[from] AbeError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl PipelineError {
    /// Failure class of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Collaborator(e) => e.kind(),
            PipelineError::HashMismatch { .. }
            | PipelineError::InvalidSignature(_)
            | PipelineError::PayloadDecrypt(_) => FailureKind::IntegrityViolation,
            PipelineError::KeyRecovery(e) => e.kind(),
            PipelineError::Install(_) | PipelineError::SessionExists(_) => {
                FailureKind::MalformedInput
            }
            PipelineError::Interrupted(_) | PipelineError::Io(_) => FailureKind::TransientIo,
            PipelineError::InvalidTransition { .. } => FailureKind::Fatal,
            PipelineError::Store(e) => e.kind(),
            PipelineError::Abe(e) => e.kind(),
            PipelineError::Core(e) => e.kind(),
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
