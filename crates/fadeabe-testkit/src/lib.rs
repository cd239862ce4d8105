//! # Fadeabe Testkit
//!
//! Testing utilities for fadeabe.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: An authority, devices and in-memory collaborators on one manual clock
//! - **Generators**: Proptest strategies for attributes, fading functions and policies
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use fadeabe_testkit::generators::{fading_function, timestamp};
//!
//! proptest! {
//!     #[test]
//!     fn windows_never_go_backwards(f in fading_function(), t in timestamp()) {
//!         prop_assert!(f.window_at(t).index <= f.window_at(t + 1).index);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use fadeabe_store::MemoryStore;
//! use fadeabe_testkit::fixtures::{device_config, Harness, MODEL_POLICY};
//!
//! let harness = Harness::new();
//! let device = harness
//!     .provisioned_device("dev-1", MemoryStore::new(), device_config(&staging))
//!     .await?;
//! let update = harness.authority.publish_update(b"image", MODEL_POLICY, "1.0", "", 5).await?;
//! device.run(&update.uid).await?;
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{device_attributes, device_config, registry, Harness, BASE_TIME, HOUR_MS, MODEL_POLICY};
pub use generators::{attribute, attribute_name, fading_function, policy_over, timestamp};
