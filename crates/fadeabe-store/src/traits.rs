//! Store trait: the abstract interface for device-side persistence.
//!
//! Two kinds of state outlive a process: the device's secret key (with its
//! renewal history) and the update sessions, which must be reconstructable
//! after a crash so a purchased update is never mistaken for one that was
//! never attempted.

use async_trait::async_trait;
use fadeabe_core::{DeviceId, FailureKind, SessionState, UpdateId};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Why a session failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub reason: String,
}

impl FailureRecord {
    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

/// The persisted part of an update session.
///
/// The recovered symmetric key is never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub device: DeviceId,
    pub uid: UpdateId,
    pub state: SessionState,
    /// Local path of the downloaded artifact, once fetched.
    pub artifact_path: Option<String>,
    pub failure: Option<FailureRecord>,
    /// Ledger receipt of the refund transaction.
    pub refund_tx: Option<String>,
    /// Ledger receipt of the installation confirmation.
    pub confirm_tx: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SessionRecord {
    /// A fresh record in `PURCHASED`.
    pub fn new(device: DeviceId, uid: UpdateId, now: i64) -> Self {
        Self {
            device,
            uid,
            state: SessionState::Purchased,
            artifact_path: None,
            failure: None,
            refund_tx: None,
            confirm_tx: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The Store trait: async interface for key and session persistence.
///
/// For SQLite, `spawn_blocking` is used internally to avoid blocking the
/// runtime.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Key Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace the serialized secret key of a device.
    ///
    /// The first write for a device fixes its `issued_at`.
    async fn put_key(&self, device: &DeviceId, key_bytes: &[u8], now: i64) -> Result<()>;

    /// The serialized secret key of a device.
    async fn get_key(&self, device: &DeviceId) -> Result<Option<Vec<u8>>>;

    /// Remove a device's key. Returns whether one existed.
    async fn delete_key(&self, device: &DeviceId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Session Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace a session record.
    async fn upsert_session(&self, record: &SessionRecord) -> Result<()>;

    /// The session for `(device, uid)`.
    async fn get_session(&self, device: &DeviceId, uid: &UpdateId) -> Result<Option<SessionRecord>>;

    /// Remove a session record. Returns whether one existed.
    async fn delete_session(&self, device: &DeviceId, uid: &UpdateId) -> Result<bool>;

    /// All sessions of a device, most recently updated first.
    async fn list_sessions(&self, device: &DeviceId) -> Result<Vec<SessionRecord>>;

    /// Sessions of a device that have not reached a terminal state.
    async fn list_unfinished(&self, device: &DeviceId) -> Result<Vec<SessionRecord>> {
        Ok(self
            .list_sessions(device)
            .await?
            .into_iter()
            .filter(|s| !s.state.is_terminal())
            .collect())
    }
}
