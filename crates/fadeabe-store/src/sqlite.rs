//! SQLite implementation of the Store trait.
//!
//! The primary storage backend for devices. Uses rusqlite with bundled
//! SQLite, wrapped in async via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use fadeabe_core::{DeviceId, SessionState, UpdateId};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{FailureRecord, SessionRecord, Store};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path, running migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        tracing::debug!(path = %path.display(), "opened sqlite store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

const SESSION_COLUMNS: &str = "device_id, uid, state, artifact_path, failure, refund_tx, \
                               confirm_tx, created_at, updated_at";

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    let state: u8 = row.get("state")?;
    let failure: Option<Vec<u8>> = row.get("failure")?;

    Ok(SessionRecord {
        device: DeviceId::new(row.get::<_, String>("device_id")?),
        uid: UpdateId::new(row.get::<_, String>("uid")?),
        state: SessionState::from_u8(state)
            .ok_or_else(|| rusqlite::Error::InvalidColumnType(2, "state".into(), Type::Integer))?,
        artifact_path: row.get("artifact_path")?,
        failure: failure
            .map(|bytes| FailureRecord::from_bytes(&bytes))
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Blob, Box::new(e)))?,
        refund_tx: row.get("refund_tx")?,
        confirm_tx: row.get("confirm_tx")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    // ─────────────────────────────────────────────────────────────────────────
    // Key Operations
    // ─────────────────────────────────────────────────────────────────────────

    async fn put_key(&self, device: &DeviceId, key_bytes: &[u8], now: i64) -> Result<()> {
        let device = device.as_str().to_string();
        let key_bytes = key_bytes.to_vec();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO secret_keys (device_id, key_bytes, issued_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(device_id) DO UPDATE SET
                    key_bytes = excluded.key_bytes,
                    updated_at = excluded.updated_at",
                params![device, key_bytes, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_key(&self, device: &DeviceId) -> Result<Option<Vec<u8>>> {
        let device = device.as_str().to_string();
        self.blocking(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT key_bytes FROM secret_keys WHERE device_id = ?1",
                    params![device],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn delete_key(&self, device: &DeviceId) -> Result<bool> {
        let device = device.as_str().to_string();
        self.blocking(move |conn| {
            let n = conn.execute("DELETE FROM secret_keys WHERE device_id = ?1", params![device])?;
            Ok(n > 0)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session Operations
    // ─────────────────────────────────────────────────────────────────────────

    async fn upsert_session(&self, record: &SessionRecord) -> Result<()> {
        let record = record.clone();
        let failure = record
            .failure
            .as_ref()
            .map(FailureRecord::to_bytes)
            .transpose()?;
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO update_sessions
                    (device_id, uid, state, artifact_path, failure, refund_tx, confirm_tx,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(device_id, uid) DO UPDATE SET
                    state = excluded.state,
                    artifact_path = excluded.artifact_path,
                    failure = excluded.failure,
                    refund_tx = excluded.refund_tx,
                    confirm_tx = excluded.confirm_tx,
                    updated_at = excluded.updated_at",
                params![
                    record.device.as_str(),
                    record.uid.as_str(),
                    record.state.to_u8(),
                    record.artifact_path,
                    failure,
                    record.refund_tx,
                    record.confirm_tx,
                    record.created_at,
                    record.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_session(&self, device: &DeviceId, uid: &UpdateId) -> Result<Option<SessionRecord>> {
        let device = device.as_str().to_string();
        let uid = uid.as_str().to_string();
        self.blocking(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {} FROM update_sessions WHERE device_id = ?1 AND uid = ?2",
                        SESSION_COLUMNS
                    ),
                    params![device, uid],
                    row_to_session,
                )
                .optional()?)
        })
        .await
    }

    async fn delete_session(&self, device: &DeviceId, uid: &UpdateId) -> Result<bool> {
        let device = device.as_str().to_string();
        let uid = uid.as_str().to_string();
        self.blocking(move |conn| {
            let n = conn.execute(
                "DELETE FROM update_sessions WHERE device_id = ?1 AND uid = ?2",
                params![device, uid],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn list_sessions(&self, device: &DeviceId) -> Result<Vec<SessionRecord>> {
        let device = device.as_str().to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM update_sessions WHERE device_id = ?1
                 ORDER BY updated_at DESC, uid ASC",
                SESSION_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![device], row_to_session)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fadeabe_core::FailureKind;

    fn record(uid: &str, state: SessionState, at: i64) -> SessionRecord {
        let mut r = SessionRecord::new(DeviceId::new("dev-1"), UpdateId::new(uid), at);
        r.state = state;
        r
    }

    #[tokio::test]
    async fn test_key_upsert_keeps_issued_at() {
        let store = SqliteStore::open_memory().unwrap();
        let device = DeviceId::new("dev-1");

        store.put_key(&device, b"v1", 100).await.unwrap();
        store.put_key(&device, b"v2", 200).await.unwrap();
        assert_eq!(store.get_key(&device).await.unwrap().unwrap(), b"v2");

        let issued: i64 = store
            .blocking(|conn| {
                Ok(conn.query_row(
                    "SELECT issued_at FROM secret_keys WHERE device_id = 'dev-1'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(issued, 100);

        assert!(store.delete_key(&device).await.unwrap());
        assert!(store.get_key(&device).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_roundtrip_with_failure() {
        let store = SqliteStore::open_memory().unwrap();
        let mut r = record("u1", SessionState::Refunded, 5);
        r.failure = Some(FailureRecord {
            kind: FailureKind::IntegrityViolation,
            reason: "hash mismatch".into(),
        });
        r.refund_tx = Some("tx-9".into());
        store.upsert_session(&r).await.unwrap();

        let back = store
            .get_session(&r.device, &r.uid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(back, r);
    }

    #[tokio::test]
    async fn test_list_orders_newest_first_and_filters_unfinished() {
        let store = SqliteStore::open_memory().unwrap();
        store
            .upsert_session(&record("old", SessionState::Confirmed, 1))
            .await
            .unwrap();
        store
            .upsert_session(&record("new", SessionState::KeyRecovered, 2))
            .await
            .unwrap();

        let device = DeviceId::new("dev-1");
        let all = store.list_sessions(&device).await.unwrap();
        assert_eq!(all[0].uid, UpdateId::new("new"));
        assert_eq!(all[1].uid, UpdateId::new("old"));

        let unfinished = store.list_unfinished(&device).await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].state, SessionState::KeyRecovered);

        assert!(store.delete_session(&device, &UpdateId::new("new")).await.unwrap());
        assert!(!store.delete_session(&device, &UpdateId::new("new")).await.unwrap());
        assert!(store.list_unfinished(&device).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .put_key(&DeviceId::new("dev-1"), b"key", 1)
                .await
                .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get_key(&DeviceId::new("dev-1")).await.unwrap().unwrap(),
            b"key"
        );
    }
}
