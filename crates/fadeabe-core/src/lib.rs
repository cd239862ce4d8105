//! # Fadeabe Core
//!
//! Pure primitives shared by every fadeabe crate: attribute tokens, access
//! policies, time-fading attribute functions, identifiers, and the failure
//! taxonomy.
//!
//! This crate contains no I/O and no pairing-group arithmetic.
//!
//! ## Key Types
//!
//! - [`Attribute`] - A sanitized attribute token
//! - [`Policy`] - A boolean AND/OR policy over attributes
//! - [`FadingFunction`] - Deterministic time-to-token mapping for a dynamic attribute
//! - [`FadingRegistry`] - Immutable name-to-function map shared by authority and devices
//! - [`FailureKind`] - Classification deciding retry and refund behaviour
//!
//! ## Usage
//!
//! ```rust
//! use fadeabe_core::{FadingFunction, FadingRegistry, Policy};
//!
//! let registry = FadingRegistry::builder()
//!     .register(FadingFunction::linear("subscription", 3_600_000, 0)?)?
//!     .build();
//!
//! let policy = Policy::parse("MODEL_ABC123 and subscription")?;
//! let resolved = registry.resolve_policy(&policy, 10)?;
//! assert_eq!(resolved.to_string(), "MODELABC123 and SUBSCRIPTION0");
//! # Ok::<(), fadeabe_core::CoreError>(())
//! ```

pub mod attribute;
pub mod crypto;
pub mod error;
pub mod fading;
pub mod policy;
pub mod registry;
pub mod time;
pub mod types;

pub use attribute::{sanitize, Attribute};
pub use crypto::{Ed25519PublicKey, Ed25519Signature, Keypair};
pub use error::{CoreError, FailureKind, Result};
pub use fading::{FadingFunction, FadingKind, Window, EXPIRED_SUFFIX};
pub use policy::Policy;
pub use registry::{FadingRegistry, FadingRegistryBuilder};
pub use time::{default_expiry_offset, now_millis, parse_expiry, Clock, ExpirySpec, ManualClock, SystemClock};
pub use types::{ContentHash, DeviceId, SessionState, UpdateId};
