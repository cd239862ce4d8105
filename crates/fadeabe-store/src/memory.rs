//! In-memory implementation of the Store trait.
//!
//! Same semantics as SQLite, no persistence. Used by tests and by devices
//! that do not need to survive a restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use fadeabe_core::{DeviceId, UpdateId};

use crate::error::{Result, StoreError};
use crate::traits::{SessionRecord, Store};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
    key_writes_fail: AtomicBool,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Serialized keys with their issue time.
    keys: HashMap<DeviceId, (Vec<u8>, i64)>,

    sessions: HashMap<(DeviceId, UpdateId), SessionRecord>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
            key_writes_fail: AtomicBool::new(false),
        }
    }

    /// Make `put_key` fail until switched back.
    pub fn fail_key_writes(&self, fail: bool) {
        self.key_writes_fail.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::InvalidData(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::InvalidData(format!("lock poisoned: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put_key(&self, device: &DeviceId, key_bytes: &[u8], now: i64) -> Result<()> {
        if self.key_writes_fail.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("key writes disabled".into()));
        }
        let mut inner = self.write()?;
        let issued_at = inner.keys.get(device).map(|(_, at)| *at).unwrap_or(now);
        inner
            .keys
            .insert(device.clone(), (key_bytes.to_vec(), issued_at));
        Ok(())
    }

    async fn get_key(&self, device: &DeviceId) -> Result<Option<Vec<u8>>> {
        Ok(self.read()?.keys.get(device).map(|(k, _)| k.clone()))
    }

    async fn delete_key(&self, device: &DeviceId) -> Result<bool> {
        Ok(self.write()?.keys.remove(device).is_some())
    }

    async fn upsert_session(&self, record: &SessionRecord) -> Result<()> {
        self.write()?.sessions.insert(
            (record.device.clone(), record.uid.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn get_session(&self, device: &DeviceId, uid: &UpdateId) -> Result<Option<SessionRecord>> {
        Ok(self
            .read()?
            .sessions
            .get(&(device.clone(), uid.clone()))
            .cloned())
    }

    async fn delete_session(&self, device: &DeviceId, uid: &UpdateId) -> Result<bool> {
        Ok(self
            .write()?
            .sessions
            .remove(&(device.clone(), uid.clone()))
            .is_some())
    }

    async fn list_sessions(&self, device: &DeviceId) -> Result<Vec<SessionRecord>> {
        let inner = self.read()?;
        let mut sessions: Vec<_> = inner
            .sessions
            .values()
            .filter(|s| &s.device == device)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.uid.cmp(&b.uid))
        });
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fadeabe_core::SessionState;

    #[tokio::test]
    async fn test_key_roundtrip() {
        let store = MemoryStore::new();
        let device = DeviceId::new("dev-1");

        assert!(store.get_key(&device).await.unwrap().is_none());
        store.put_key(&device, b"key-v1", 10).await.unwrap();
        store.put_key(&device, b"key-v2", 20).await.unwrap();
        assert_eq!(store.get_key(&device).await.unwrap().unwrap(), b"key-v2");

        store.fail_key_writes(true);
        assert!(matches!(
            store.put_key(&device, b"key-v3", 30).await,
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(store.get_key(&device).await.unwrap().unwrap(), b"key-v2");
        store.fail_key_writes(false);

        assert!(store.delete_key(&device).await.unwrap());
        assert!(!store.delete_key(&device).await.unwrap());
    }

    #[tokio::test]
    async fn test_unfinished_sessions() {
        let store = MemoryStore::new();
        let device = DeviceId::new("dev-1");

        let mut done = SessionRecord::new(device.clone(), UpdateId::new("u1"), 1);
        done.state = SessionState::Confirmed;
        let mut midway = SessionRecord::new(device.clone(), UpdateId::new("u2"), 2);
        midway.state = SessionState::HashVerified;
        let other = SessionRecord::new(DeviceId::new("dev-2"), UpdateId::new("u3"), 3);

        for r in [&done, &midway, &other] {
            store.upsert_session(r).await.unwrap();
        }

        let all = store.list_sessions(&device).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].uid, UpdateId::new("u2"));

        let unfinished = store.list_unfinished(&device).await.unwrap();
        assert_eq!(unfinished, vec![midway.clone()]);

        assert!(store.delete_session(&device, &midway.uid).await.unwrap());
        assert!(!store.delete_session(&device, &midway.uid).await.unwrap());
        assert!(store.list_unfinished(&device).await.unwrap().is_empty());
    }
}
