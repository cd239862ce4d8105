//! # Fadeabe Store
//!
//! Device-side persistence: the secret key (with renewal history) and the
//! update sessions needed for crash recovery.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`SessionRecord`] - The persisted part of an update session
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fadeabe_core::DeviceId;
//! use fadeabe_store::{SqliteStore, Store};
//!
//! async fn example() -> fadeabe_store::Result<()> {
//!     let store = SqliteStore::open("device.db")?;
//!     let device = DeviceId::new("device-001");
//!     for session in store.list_unfinished(&device).await? {
//!         println!("{} left in {}", session.uid, session.state);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{FailureRecord, SessionRecord, Store};
