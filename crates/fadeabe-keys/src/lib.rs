//! # Fadeabe Keys
//!
//! Secret keys with time-fading attributes.
//!
//! The ABE layer only sees tokens. This crate decides which tokens a key
//! should embed right now, notices when an embedded token has gone stale,
//! and splices renewal components into an existing key without touching the
//! rest of it.
//!
//! ## Key Types
//!
//! - [`KeyAuthority`] - Issues keys and renewal components, encrypts under resolved policies
//! - [`SecretKey`] - A device key plus expiry bookkeeping and renewal history
//! - [`KeyRing`] - The single writer for one device's key
//! - [`RenewalDescriptor`] - A fresh component for one dynamic attribute
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use fadeabe_abe::Message;
//! use fadeabe_core::{DeviceId, FadingFunction, FadingRegistry};
//! use fadeabe_keys::{AttributeValue, KeyAuthority, KeyConfig, KeyRing};
//!
//! async fn example() -> fadeabe_keys::Result<()> {
//!     let registry = Arc::new(
//!         FadingRegistry::builder()
//!             .register(FadingFunction::linear("subscription", 3_600_000, 0)?)?
//!             .build(),
//!     );
//!     let authority = KeyAuthority::setup(registry.clone(), KeyConfig::default())?;
//!
//!     let device = DeviceId::new("device-001");
//!     let mut attrs = BTreeMap::new();
//!     attrs.insert("model".to_string(), AttributeValue::Static("MODEL:ABC123".into()));
//!     attrs.insert("subscription".to_string(), AttributeValue::Dynamic);
//!
//!     let ring = KeyRing::new(device.clone(), registry, KeyConfig::default());
//!     ring.install(authority.issue(&device, &attrs, 0)?).await?;
//!
//!     let ct = authority.encrypt(&Message::Bytes(vec![7; 32]), "MODEL_ABC123 and subscription", 0)?;
//!     let message = ring.decrypt(&ct, 0).await?;
//!     assert_eq!(message.as_bytes(), Some(&[7u8; 32][..]));
//!     Ok(())
//! }
//! ```

pub mod authority;
pub mod config;
pub mod error;
pub mod key;
pub mod ring;

pub use authority::{AttributeValue, KeyAuthority};
pub use config::{ExpiryPolicy, KeyConfig};
pub use error::{KeyError, Result};
pub use key::{
    check_validity, merge, ExpiryInfo, RenewalDescriptor, RenewalEntry, SecretKey, Validity,
};
pub use ring::KeyRing;
