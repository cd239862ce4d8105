//! Error types for the facade.

use fadeabe_abe::AbeError;
use fadeabe_core::{CoreError, FailureKind};
use fadeabe_keys::KeyError;
use fadeabe_pipeline::{CollaboratorError, PipelineError};
use fadeabe_store::StoreError;
use thiserror::Error;

/// Errors from any fadeabe component.
#[derive(Debug, Error)]
pub enum Error {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("abe error: {0}")]
    Abe(#[from] AbeError),

    #[error("key error: {0}")]
    Keys(#[from] KeyError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),
}

impl Error {
    /// Failure class of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Core(e) => e.kind(),
            Error::Abe(e) => e.kind(),
            Error::Keys(e) => e.kind(),
            Error::Store(e) => e.kind(),
            Error::Pipeline(e) => e.kind(),
            Error::Collaborator(e) => e.kind(),
        }
    }
}

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, Error>;
