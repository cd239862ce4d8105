//! Blob-store collaborators.
//!
//! Encrypted artifacts are content-addressed: the pointer names the blob,
//! and the ledger's hash commitment is what the pipeline actually trusts.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::CollaboratorError;

/// Result type for blob operations.
pub type Result<T> = std::result::Result<T, CollaboratorError>;

/// Read side of a blob store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn download(&self, pointer: &str) -> Result<Vec<u8>>;
}

/// Write side of a blob store, used by the publishing authority.
#[async_trait]
pub trait BlobPublisher: Send + Sync {
    /// Store `bytes` and return the pointer to fetch them by.
    async fn upload(&self, bytes: &[u8]) -> Result<String>;
}

/// Tries an ordered list of stores and returns the first success.
///
/// Used to fall back from a primary node to public gateways. The error of
/// a total failure is transient only if every source failed transiently.
pub struct FallbackBlobStore {
    sources: Vec<Arc<dyn BlobStore>>,
}

impl FallbackBlobStore {
    pub fn new(sources: Vec<Arc<dyn BlobStore>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl BlobStore for FallbackBlobStore {
    async fn download(&self, pointer: &str) -> Result<Vec<u8>> {
        let mut permanent: Option<CollaboratorError> = None;
        let mut transient: Option<CollaboratorError> = None;

        for (index, source) in self.sources.iter().enumerate() {
            match source.download(pointer).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    debug!(pointer, source = index, error = %e, "blob source failed");
                    if e.is_transient() {
                        transient = Some(e);
                    } else if permanent.is_none() {
                        permanent = Some(e);
                    }
                }
            }
        }

        Err(permanent
            .or(transient)
            .unwrap_or_else(|| CollaboratorError::NotFound(format!("no blob sources for {}", pointer))))
    }
}

/// An in-memory blob store for tests and local runs.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use std::sync::RwLock;

    use fadeabe_core::ContentHash;

    /// Content-addressed in-memory blob store.
    ///
    /// Pointers are the hex SHA3-256 of the uploaded bytes.
    #[derive(Default)]
    pub struct MemoryBlobStore {
        blobs: RwLock<HashMap<String, Vec<u8>>>,
        offline: AtomicBool,
        faults: AtomicU32,
        downloads: AtomicUsize,
    }

    impl MemoryBlobStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every download fail with a transport error.
        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        /// Fail the next `n` downloads with a transport error.
        pub fn fail_downloads(&self, n: u32) {
            self.faults.store(n, Ordering::SeqCst);
        }

        /// Download attempts so far, failed or not.
        pub fn download_count(&self) -> usize {
            self.downloads.load(Ordering::SeqCst)
        }

        /// Modify a stored blob in place. Returns false if it is absent.
        pub fn tamper<F: FnOnce(&mut Vec<u8>)>(&self, pointer: &str, f: F) -> bool {
            match self.blobs.write() {
                Ok(mut blobs) => match blobs.get_mut(pointer) {
                    Some(blob) => {
                        f(blob);
                        true
                    }
                    None => false,
                },
                Err(_) => false,
            }
        }
    }

    #[async_trait]
    impl BlobStore for MemoryBlobStore {
        async fn download(&self, pointer: &str) -> Result<Vec<u8>> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(CollaboratorError::Transport("blob store offline".into()));
            }
            let faulted = self
                .faults
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if faulted {
                return Err(CollaboratorError::Transport("connection reset".into()));
            }
            self.blobs
                .read()
                .map_err(|e| CollaboratorError::Transport(format!("blob store poisoned: {}", e)))?
                .get(pointer)
                .cloned()
                .ok_or_else(|| CollaboratorError::NotFound(pointer.to_string()))
        }
    }

    #[async_trait]
    impl BlobPublisher for MemoryBlobStore {
        async fn upload(&self, bytes: &[u8]) -> Result<String> {
            let pointer = ContentHash::compute(bytes).to_hex();
            self.blobs
                .write()
                .map_err(|e| CollaboratorError::Transport(format!("blob store poisoned: {}", e)))?
                .insert(pointer.clone(), bytes.to_vec());
            Ok(pointer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryBlobStore;
    use super::*;

    #[tokio::test]
    async fn test_fallback_uses_first_success() {
        let primary = Arc::new(MemoryBlobStore::new());
        let gateway = Arc::new(MemoryBlobStore::new());
        let pointer = gateway.upload(b"artifact").await.unwrap();
        primary.set_offline(true);

        let store = FallbackBlobStore::new(vec![primary.clone(), gateway.clone()]);
        assert_eq!(store.download(&pointer).await.unwrap(), b"artifact");
        assert_eq!(primary.download_count(), 1);
    }

    #[tokio::test]
    async fn test_fallback_error_classification() {
        let offline = Arc::new(MemoryBlobStore::new());
        offline.set_offline(true);
        let empty = Arc::new(MemoryBlobStore::new());

        let all_transient = FallbackBlobStore::new(vec![offline.clone(), offline.clone()]);
        assert!(all_transient.download("x").await.unwrap_err().is_transient());

        let mixed = FallbackBlobStore::new(vec![offline, empty]);
        assert!(matches!(
            mixed.download("x").await,
            Err(CollaboratorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_tamper() {
        let store = MemoryBlobStore::new();
        let pointer = store.upload(b"abc").await.unwrap();
        assert!(store.tamper(&pointer, |b| b[0] ^= 0xff));
        assert_ne!(store.download(&pointer).await.unwrap(), b"abc");
        assert!(!store.tamper("missing", |_| {}));
    }
}
