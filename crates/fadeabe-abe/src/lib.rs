//! # Fadeabe ABE
//!
//! Ciphertext-policy attribute-based encryption (BSW07) over BLS12-381.
//!
//! The scheme is stateless with respect to time: it only sees sanitized
//! attribute tokens. Time-fading attributes are handled one layer up.
//!
//! ## Key Types
//!
//! - [`PublicParams`] / [`MasterSecret`] - Output of [`setup`]
//! - [`SecretKeyComponents`] - A device key, one component per attribute token
//! - [`Ciphertext`] - A message encrypted under a [`fadeabe_core::Policy`]
//! - [`Message`] - Scalar, group element, or bytes
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fadeabe_abe::{decrypt, encrypt, keygen, setup, Message};
//! use fadeabe_core::{Attribute, Policy};
//! use std::collections::BTreeSet;
//!
//! let (pk, msk) = setup()?;
//! let attrs = ["MODEL:ABC123", "SUBSCRIPTION_0"]
//!     .iter()
//!     .map(|a| Attribute::new(a))
//!     .collect::<Result<BTreeSet<_>, _>>()?;
//! let sk = keygen(&pk, &msk, &attrs)?;
//!
//! let policy = Policy::parse("MODELABC123 and SUBSCRIPTION0")?;
//! let ct = encrypt(&pk, &Message::Bytes(vec![0u8; 32]), &policy)?;
//! assert_eq!(decrypt(&sk, &ct)?, Message::Bytes(vec![0u8; 32]));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod envelope;
pub mod error;
pub mod group;
pub mod message;
pub mod scheme;
mod tree;

pub use envelope::{bind_and_hash, PayloadType, SealedEnvelope};
pub use error::{AbeError, Result};
pub use group::Gt;
pub use message::Message;
pub use scheme::{
    decrypt, encrypt, keygen, keygen_component, keygen_with_randomness, setup, Ciphertext,
    KeyComponent, KeyRandomness, LeafComponent, MasterSecret, PublicParams, SecretKeyComponents,
};
