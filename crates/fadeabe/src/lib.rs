//! # Fadeabe
//!
//! Attribute-based authorization of paid device updates, where access
//! attributes fade with time and must be renewed.
//!
//! ## Overview
//!
//! - **Authority**: Holds the ABE master secret, issues device keys, renews
//!   dynamic attributes and publishes encrypted, signed updates
//! - **Device**: Holds one key, decrypts update keys, and runs the
//!   purchase/download/verify/install pipeline with refunds on failure
//!
//! ## Key Concepts
//!
//! - **Fading attribute**: A dynamic attribute whose token is a function of
//!   time, e.g. `SUBSCRIPTION0` in the first hour, `SUBSCRIPTION1` after.
//! - **Renewal**: A fresh key component for one fading attribute, merged into
//!   the existing key without touching the rest of it.
//! - **Session**: One (device, update) installation attempt. It ends installed,
//!   refunded, refund-failed or install-failed.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use fadeabe::core::{DeviceId, FadingFunction, FadingRegistry, Keypair, SystemClock};
//! use fadeabe::keys::AttributeValue;
//! use fadeabe::pipeline::blob::memory::MemoryBlobStore;
//! use fadeabe::pipeline::install::memory::RecordingInstaller;
//! use fadeabe::pipeline::ledger::memory::MemoryLedger;
//! use fadeabe::pipeline::{Aes256CbcCipher, Collaborators, Ed25519Verifier};
//! use fadeabe::store::SqliteStore;
//! use fadeabe::{Authority, Device, DeviceConfig};
//!
//! async fn example() -> fadeabe::Result<()> {
//!     let registry = Arc::new(
//!         FadingRegistry::builder()
//!             .register(FadingFunction::linear("subscription", 3_600_000, 0)?)?
//!             .build(),
//!     );
//!     let ledger = Arc::new(MemoryLedger::new());
//!     let blobs = Arc::new(MemoryBlobStore::new());
//!     let cipher = Arc::new(Aes256CbcCipher);
//!
//!     let authority = Authority::setup(
//!         registry.clone(),
//!         Default::default(),
//!         Keypair::generate(),
//!         ledger.clone(),
//!         blobs.clone(),
//!         cipher.clone(),
//!         Arc::new(SystemClock),
//!     )?;
//!
//!     let collaborators = Collaborators {
//!         ledger: ledger.clone(),
//!         blobs,
//!         cipher,
//!         verifier: Arc::new(Ed25519Verifier),
//!         installer: Arc::new(RecordingInstaller::new()),
//!     };
//!     let device = Device::open(
//!         DeviceId::new("device-001"),
//!         registry,
//!         SqliteStore::open("device.db")?,
//!         collaborators,
//!         authority.signing_key(),
//!         Arc::new(SystemClock),
//!         DeviceConfig::default(),
//!     )
//!     .await?;
//!
//!     let mut attrs = BTreeMap::new();
//!     attrs.insert("model".to_string(), AttributeValue::Static("MODEL:ABC123".into()));
//!     attrs.insert("subscription".to_string(), AttributeValue::Dynamic);
//!     device.provision(authority.issue_key(device.id(), &attrs)?).await?;
//!
//!     let update = authority
//!         .publish_update(b"firmware", "MODEL_ABC123 and subscription", "1.0.1", "fixes", 10)
//!         .await?;
//!     let session = device.run(&update.uid).await?;
//!     println!("{}", session.state);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `fadeabe::core` - Attributes, policies, fading functions, identifiers
//! - `fadeabe::abe` - The CP-ABE scheme
//! - `fadeabe::store` - Key and session persistence
//! - `fadeabe::keys` - Secret keys, renewal, the key ring
//! - `fadeabe::pipeline` - Collaborators and the update pipeline

pub mod authority;
pub mod config;
pub mod device;
pub mod error;

pub use fadeabe_abe as abe;
pub use fadeabe_core as core;
pub use fadeabe_keys as keys;
pub use fadeabe_pipeline as pipeline;
pub use fadeabe_store as store;

pub use authority::Authority;
pub use config::DeviceConfig;
pub use device::Device;
pub use error::{Error, Result};

pub use fadeabe_core::{DeviceId, FailureKind, SessionState, UpdateId};
