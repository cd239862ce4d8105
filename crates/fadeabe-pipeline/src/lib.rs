//! # Fadeabe Pipeline
//!
//! Turns a published, encrypted, hash-committed update into an installed
//! update or a refunded purchase.
//!
//! ## Key Types
//!
//! - [`UpdatePipeline`] - Runs sessions for one device, with retries, refunds and reconciliation
//! - [`UpdateSession`] - One (device, uid) installation attempt
//! - [`Ledger`], [`BlobStore`], [`SymmetricCipher`], [`SignatureVerifier`], [`Installer`] -
//!   The external collaborators
//!
//! ## Failure handling
//!
//! Transient collaborator failures are retried a bounded number of times
//! with a timeout on every attempt. Hash, signature and policy failures are
//! never retried. Any failure before installation ends in exactly one
//! refund request; a failed refund is its own terminal state.

pub mod blob;
pub mod cipher;
pub mod error;
pub mod install;
pub mod ledger;
pub mod pipeline;
pub mod session;

pub use blob::{BlobPublisher, BlobStore, FallbackBlobStore};
pub use cipher::{Aes256CbcCipher, Ed25519Verifier, SignatureVerifier, SymmetricCipher};
pub use error::{CollaboratorError, PipelineError, Result};
pub use install::Installer;
pub use ledger::{Ledger, OwnerRecord, TxReceipt, UpdateMetadata};
pub use pipeline::{Collaborators, PipelineConfig, ReconcileMode, Trigger, UpdatePipeline};
pub use session::UpdateSession;
