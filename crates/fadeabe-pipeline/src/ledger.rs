//! Ledger collaborator: update records, purchases, confirmations, refunds.
//!
//! The ledger is the event source for new updates and the record of every
//! device's purchase, installation and refund. Implementations may sit on a
//! blockchain node or anything else that can hand out transaction receipts.

use async_trait::async_trait;
use fadeabe_core::{ContentHash, DeviceId, Ed25519Signature, Keypair, UpdateId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{CollaboratorError, Result as PipelineResult};

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, CollaboratorError>;

/// A published update as recorded on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMetadata {
    pub uid: UpdateId,
    /// SHA3-256 of the encrypted artifact.
    pub content_hash: ContentHash,
    /// Blob-store pointer to the encrypted artifact.
    pub pointer: String,
    /// CBOR ABE ciphertext wrapping the 32-byte symmetric key.
    pub encrypted_key: Vec<u8>,
    pub signature: Ed25519Signature,
    pub price: u64,
    pub version: String,
    pub description: String,
    pub created_at: i64,
    pub active: bool,
}

#[derive(Serialize)]
struct SignedTuple<'a> {
    created_at: i64,
    key_hash: String,
    pointer: &'a str,
    price: u64,
    uid: &'a str,
    update_hash: String,
    version: &'a str,
}

impl UpdateMetadata {
    /// The bytes the authority signs: JSON of `{created_at, key_hash,
    /// pointer, price, uid, update_hash, version}` in that order, where
    /// `key_hash` is the SHA3-256 of `encrypted_key`.
    ///
    /// Everything the device acts on is covered; `description` and
    /// `active` are not.
    pub fn signed_message(&self) -> PipelineResult<Vec<u8>> {
        let tuple = SignedTuple {
            created_at: self.created_at,
            key_hash: ContentHash::compute(&self.encrypted_key).to_hex(),
            pointer: &self.pointer,
            price: self.price,
            uid: self.uid.as_str(),
            update_hash: self.content_hash.to_hex(),
            version: &self.version,
        };
        serde_json::to_vec(&tuple).map_err(|e| {
            CollaboratorError::Rejected(format!("unserializable update tuple: {}", e)).into()
        })
    }

    /// Sign the record in place with the authority's key.
    pub fn sign_with(&mut self, signer: &Keypair) -> PipelineResult<()> {
        self.signature = signer.sign(&self.signed_message()?);
        Ok(())
    }
}

/// Receipt of a ledger write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_id: String,
    pub at: i64,
}

/// What the ledger knows about one device's dealings with one update.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OwnerRecord {
    pub uid: Option<UpdateId>,
    pub purchased_at: Option<i64>,
    pub installed_at: Option<i64>,
    /// Version string reported with the installation confirmation.
    pub installed_version: Option<String>,
    pub refunded_at: Option<i64>,
    pub refund_tx: Option<String>,
}

/// The ledger collaborator.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Register a new update and notify subscribers.
    async fn publish_update(&self, metadata: UpdateMetadata) -> Result<TxReceipt>;

    /// Fetch an update record. Fails if absent or inactive.
    async fn get_update_metadata(&self, uid: &UpdateId) -> Result<UpdateMetadata>;

    async fn purchase_update(&self, uid: &UpdateId, device: &DeviceId) -> Result<TxReceipt>;

    async fn confirm_installation(
        &self,
        uid: &UpdateId,
        device: &DeviceId,
        version: &str,
    ) -> Result<TxReceipt>;

    async fn request_refund(&self, uid: &UpdateId, device: &DeviceId) -> Result<TxReceipt>;

    /// Every record the ledger keeps for `device`.
    async fn owner_history(&self, device: &DeviceId) -> Result<Vec<OwnerRecord>>;

    /// Stream of newly published update ids.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<UpdateId>;
}

/// An in-memory ledger for tests and local runs.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex, RwLock};

    use fadeabe_core::{Clock, SystemClock};

    #[derive(Default)]
    struct LedgerState {
        updates: HashMap<UpdateId, UpdateMetadata>,
        owners: HashMap<(DeviceId, UpdateId), OwnerRecord>,
        purchases: HashMap<(DeviceId, UpdateId), u32>,
        confirms: HashMap<(DeviceId, UpdateId), u32>,
        refunds: HashMap<(DeviceId, UpdateId), u32>,
    }

    /// In-memory ledger with simple fault injection.
    pub struct MemoryLedger {
        state: RwLock<LedgerState>,
        subscribers: Mutex<Vec<mpsc::UnboundedSender<UpdateId>>>,
        clock: Arc<dyn Clock>,
        next_tx: AtomicU64,
        metadata_faults: AtomicU32,
        purchase_faults: AtomicU32,
        lost_purchase_receipts: AtomicU32,
        confirm_faults: AtomicU32,
        refund_faults: AtomicU32,
        history_faults: AtomicU32,
    }

    impl MemoryLedger {
        pub fn new() -> Self {
            Self::with_clock(Arc::new(SystemClock))
        }

        /// A ledger that stamps receipts with `clock`.
        pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
            Self {
                state: RwLock::new(LedgerState::default()),
                subscribers: Mutex::new(Vec::new()),
                clock,
                next_tx: AtomicU64::new(1),
                metadata_faults: AtomicU32::new(0),
                purchase_faults: AtomicU32::new(0),
                lost_purchase_receipts: AtomicU32::new(0),
                confirm_faults: AtomicU32::new(0),
                refund_faults: AtomicU32::new(0),
                history_faults: AtomicU32::new(0),
            }
        }

        /// Fail the next `n` metadata reads with a transport error.
        pub fn fail_metadata(&self, n: u32) {
            self.metadata_faults.store(n, Ordering::SeqCst);
        }

        /// Fail the next `n` purchases with a transport error, recording nothing.
        pub fn fail_purchases(&self, n: u32) {
            self.purchase_faults.store(n, Ordering::SeqCst);
        }

        /// Record the next `n` purchases but answer with a transport error,
        /// as if the receipt was lost on the way back.
        pub fn lose_purchase_receipts(&self, n: u32) {
            self.lost_purchase_receipts.store(n, Ordering::SeqCst);
        }

        /// Fail the next `n` owner history reads with a transport error.
        pub fn fail_history(&self, n: u32) {
            self.history_faults.store(n, Ordering::SeqCst);
        }

        /// Fail the next `n` confirmations with a transport error.
        pub fn fail_confirmations(&self, n: u32) {
            self.confirm_faults.store(n, Ordering::SeqCst);
        }

        /// Fail the next `n` refund requests with a transport error.
        pub fn fail_refunds(&self, n: u32) {
            self.refund_faults.store(n, Ordering::SeqCst);
        }

        /// How many refunds were requested for (device, uid), failed or not.
        pub fn refund_requests(&self, device: &DeviceId, uid: &UpdateId) -> u32 {
            self.read()
                .map(|s| s.refunds.get(&(device.clone(), uid.clone())).copied().unwrap_or(0))
                .unwrap_or(0)
        }

        /// How many purchases were requested for (device, uid), failed or not.
        pub fn purchase_requests(&self, device: &DeviceId, uid: &UpdateId) -> u32 {
            self.read()
                .map(|s| s.purchases.get(&(device.clone(), uid.clone())).copied().unwrap_or(0))
                .unwrap_or(0)
        }

        /// How many confirmations were requested for (device, uid), failed or not.
        pub fn confirm_requests(&self, device: &DeviceId, uid: &UpdateId) -> u32 {
            self.read()
                .map(|s| s.confirms.get(&(device.clone(), uid.clone())).copied().unwrap_or(0))
                .unwrap_or(0)
        }

        /// Rewrite a stored update record in place, leaving its signature alone.
        pub fn tamper(&self, uid: &UpdateId, f: impl FnOnce(&mut UpdateMetadata)) -> bool {
            match self.write() {
                Ok(mut state) => state.updates.get_mut(uid).map(f).is_some(),
                Err(_) => false,
            }
        }

        /// Deactivate a published update.
        pub fn deactivate(&self, uid: &UpdateId) -> Result<()> {
            let mut state = self.write()?;
            let update = state
                .updates
                .get_mut(uid)
                .ok_or_else(|| CollaboratorError::NotFound(uid.to_string()))?;
            update.active = false;
            Ok(())
        }

        fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, LedgerState>> {
            self.state
                .read()
                .map_err(|e| CollaboratorError::Transport(format!("ledger poisoned: {}", e)))
        }

        fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, LedgerState>> {
            self.state
                .write()
                .map_err(|e| CollaboratorError::Transport(format!("ledger poisoned: {}", e)))
        }

        fn receipt(&self) -> TxReceipt {
            let n = self.next_tx.fetch_add(1, Ordering::SeqCst);
            TxReceipt {
                tx_id: format!("0x{:064x}", n),
                at: self.clock.now_millis(),
            }
        }

        fn take_fault(counter: &AtomicU32, op: &str) -> Result<()> {
            let tripped = counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if tripped {
                Err(CollaboratorError::Transport(format!("{} unavailable", op)))
            } else {
                Ok(())
            }
        }
    }

    impl Default for MemoryLedger {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Ledger for MemoryLedger {
        async fn publish_update(&self, metadata: UpdateMetadata) -> Result<TxReceipt> {
            let uid = metadata.uid.clone();
            {
                let mut state = self.write()?;
                if state.updates.contains_key(&uid) {
                    return Err(CollaboratorError::Rejected(format!("duplicate update {}", uid)));
                }
                state.updates.insert(uid.clone(), metadata);
            }
            if let Ok(mut subscribers) = self.subscribers.lock() {
                subscribers.retain(|tx| tx.send(uid.clone()).is_ok());
            }
            Ok(self.receipt())
        }

        async fn get_update_metadata(&self, uid: &UpdateId) -> Result<UpdateMetadata> {
            Self::take_fault(&self.metadata_faults, "metadata")?;
            let state = self.read()?;
            let update = state
                .updates
                .get(uid)
                .ok_or_else(|| CollaboratorError::NotFound(uid.to_string()))?;
            if !update.active {
                return Err(CollaboratorError::Inactive(uid.to_string()));
            }
            Ok(update.clone())
        }

        async fn purchase_update(&self, uid: &UpdateId, device: &DeviceId) -> Result<TxReceipt> {
            let key = (device.clone(), uid.clone());
            *self.write()?.purchases.entry(key).or_insert(0) += 1;
            Self::take_fault(&self.purchase_faults, "purchase")?;

            let receipt = self.receipt();
            let mut state = self.write()?;
            match state.updates.get(uid) {
                Some(u) if u.active => {}
                Some(_) => return Err(CollaboratorError::Inactive(uid.to_string())),
                None => return Err(CollaboratorError::NotFound(uid.to_string())),
            }
            let record = state
                .owners
                .entry((device.clone(), uid.clone()))
                .or_insert_with(|| OwnerRecord {
                    uid: Some(uid.clone()),
                    ..OwnerRecord::default()
                });
            record.purchased_at = Some(receipt.at);
            drop(state);
            Self::take_fault(&self.lost_purchase_receipts, "purchase receipt")?;
            Ok(receipt)
        }

        async fn confirm_installation(
            &self,
            uid: &UpdateId,
            device: &DeviceId,
            version: &str,
        ) -> Result<TxReceipt> {
            let key = (device.clone(), uid.clone());
            *self.write()?.confirms.entry(key.clone()).or_insert(0) += 1;
            Self::take_fault(&self.confirm_faults, "confirmation")?;

            let receipt = self.receipt();
            let mut state = self.write()?;
            let record = state
                .owners
                .get_mut(&key)
                .ok_or_else(|| CollaboratorError::NotFound(format!("no purchase of {}", uid)))?;
            record.installed_at = Some(receipt.at);
            record.installed_version = Some(version.to_string());
            Ok(receipt)
        }

        async fn request_refund(&self, uid: &UpdateId, device: &DeviceId) -> Result<TxReceipt> {
            let key = (device.clone(), uid.clone());
            *self.write()?.refunds.entry(key.clone()).or_insert(0) += 1;
            Self::take_fault(&self.refund_faults, "refund")?;

            let receipt = self.receipt();
            let mut state = self.write()?;
            let record = state
                .owners
                .get_mut(&key)
                .ok_or_else(|| CollaboratorError::NotFound(format!("no purchase of {}", uid)))?;
            if record.refunded_at.is_some() {
                return Err(CollaboratorError::Rejected(format!("{} already refunded", uid)));
            }
            record.refunded_at = Some(receipt.at);
            record.refund_tx = Some(receipt.tx_id.clone());
            Ok(receipt)
        }

        async fn owner_history(&self, device: &DeviceId) -> Result<Vec<OwnerRecord>> {
            Self::take_fault(&self.history_faults, "history")?;
            let state = self.read()?;
            let mut records: Vec<_> = state
                .owners
                .iter()
                .filter(|((d, _), _)| d == device)
                .map(|(_, r)| r.clone())
                .collect();
            records.sort_by_key(|r| std::cmp::Reverse(r.purchased_at));
            Ok(records)
        }

        fn subscribe(&self) -> mpsc::UnboundedReceiver<UpdateId> {
            let (tx, rx) = mpsc::unbounded_channel();
            if let Ok(mut subscribers) = self.subscribers.lock() {
                subscribers.push(tx);
            }
            rx
        }
    }
}
