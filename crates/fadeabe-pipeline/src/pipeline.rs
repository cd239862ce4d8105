//! The update authorization pipeline.
//!
//! Drives one session per (device, uid) from purchase to confirmation:
//!
//! ```text
//! PURCHASED → DOWNLOADING → HASH_VERIFIED → SIGNATURE_VERIFIED → KEY_RECOVERED
//!           → PAYLOAD_DECRYPTED → INSTALLED → CONFIRMED
//! ```
//!
//! Any failure before installation moves the session to `REFUND_PENDING` and
//! issues exactly one refund request, ending in `REFUNDED` or
//! `REFUND_FAILED`. Every transition is persisted before the next stage
//! starts, so [`UpdatePipeline::reconcile`] can pick up after a crash.

use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fadeabe_abe::Ciphertext;
use fadeabe_core::{Clock, ContentHash, DeviceId, Ed25519PublicKey, SessionState, UpdateId};
use fadeabe_keys::KeyRing;
use fadeabe_store::{FailureRecord, SessionRecord, Store};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::blob::BlobStore;
use crate::cipher::{SignatureVerifier, SymmetricCipher};
use crate::error::{CollaboratorError, PipelineError, Result};
use crate::install::Installer;
use crate::ledger::{Ledger, OwnerRecord, UpdateMetadata};
use crate::session::UpdateSession;

/// What to do with sessions found unfinished at restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileMode {
    /// Re-run pre-install sessions from `DOWNLOADING`.
    #[default]
    Resume,
    /// Refund pre-install sessions.
    Refund,
}

/// Configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Timeout for one blob download attempt.
    pub fetch_timeout: Duration,
    /// Timeout for one ledger call.
    pub ledger_timeout: Duration,
    /// Retries after a transient failure. Verification failures are never retried.
    pub max_retries: u32,
    /// Base delay between retries, multiplied by the attempt number.
    pub retry_backoff: Duration,
    /// Retries for the installation confirmation.
    pub confirm_retries: u32,
    /// Whether to check the authority's signature on update records.
    pub verify_signatures: bool,
    /// Where downloaded artifacts are staged.
    pub staging_dir: PathBuf,
    pub reconcile: ReconcileMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            ledger_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_millis(250),
            confirm_retries: 3,
            verify_signatures: true,
            staging_dir: std::env::temp_dir().join("fadeabe-staging"),
            reconcile: ReconcileMode::default(),
        }
    }
}

/// The external collaborators a pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub ledger: Arc<dyn Ledger>,
    pub blobs: Arc<dyn BlobStore>,
    pub cipher: Arc<dyn SymmetricCipher>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub installer: Arc<dyn Installer>,
}

/// Outcome of an update notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// A session ran; this is where it ended.
    Ran(SessionRecord),
    /// A session for this update already exists or is running.
    Duplicate,
}

/// Removes the uid from the active set when the session returns.
struct Claim<'a> {
    active: &'a Mutex<HashSet<UpdateId>>,
    uid: UpdateId,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.uid);
        }
    }
}

/// Runs update sessions for one device.
pub struct UpdatePipeline<S: Store> {
    device: DeviceId,
    keys: Arc<KeyRing>,
    store: Arc<S>,
    collaborators: Collaborators,
    authority_key: Ed25519PublicKey,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
    active: Mutex<HashSet<UpdateId>>,
}

impl<S: Store> UpdatePipeline<S> {
    pub fn new(
        keys: Arc<KeyRing>,
        store: Arc<S>,
        collaborators: Collaborators,
        authority_key: Ed25519PublicKey,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            device: keys.device().clone(),
            keys,
            store,
            collaborators,
            authority_key,
            clock,
            config,
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Entry points
    // ─────────────────────────────────────────────────────────────────────────

    /// Purchase and install update `uid`.
    ///
    /// The session is persisted in `PURCHASED` before the ledger is asked to
    /// charge, so a crash mid-purchase leaves a record for
    /// [`reconcile`](Self::reconcile). Returns the final session record.
    /// Failures of individual stages end up in the record; an `Err` means
    /// the update could not be fetched or purchased, or the store failed.
    pub async fn run(&self, uid: &UpdateId) -> Result<SessionRecord> {
        let _claim = self.claim(uid)?;
        if self.store.get_session(&self.device, uid).await?.is_some() {
            return Err(PipelineError::SessionExists(uid.to_string()));
        }

        let ledger = &self.collaborators.ledger;
        let metadata = self
            .retry("get_update_metadata", self.config.ledger_timeout, self.config.max_retries, || {
                ledger.get_update_metadata(uid)
            })
            .await?;

        let session = UpdateSession::new(self.device.clone(), uid.clone(), self.now());
        self.save(&session).await?;
        self.purchase(uid).await?;

        self.drive(session, &metadata).await
    }

    /// Handle an update notification. Idempotent per uid.
    pub async fn handle_notification(&self, uid: &UpdateId) -> Result<Trigger> {
        match self.run(uid).await {
            Ok(record) => Ok(Trigger::Ran(record)),
            Err(PipelineError::SessionExists(_)) => {
                debug!(device = %self.device, uid = %uid, "ignoring duplicate notification");
                Ok(Trigger::Duplicate)
            }
            Err(e) => Err(e),
        }
    }

    /// Handle notifications until the channel closes.
    pub async fn listen(&self, mut notifications: mpsc::UnboundedReceiver<UpdateId>) {
        while let Some(uid) = notifications.recv().await {
            if let Err(e) = self.handle_notification(&uid).await {
                warn!(device = %self.device, uid = %uid, error = %e, "update notification failed");
            }
        }
    }

    /// Finish or compensate every session left unfinished by a crash.
    ///
    /// Returns the sessions that reached a new state. A session whose ledger
    /// lookups fail stays where it is for the next pass.
    pub async fn reconcile(&self) -> Result<Vec<SessionRecord>> {
        let mut done = Vec::new();
        for record in self.store.list_unfinished(&self.device).await? {
            let uid = record.uid.clone();
            let Ok(_claim) = self.claim(&uid) else {
                continue;
            };
            info!(device = %self.device, uid = %uid, state = %record.state, "reconciling session");
            if let Some(outcome) = self.reconcile_session(UpdateSession::from_record(record)).await? {
                done.push(outcome);
            }
        }
        Ok(done)
    }

    async fn reconcile_session(&self, session: UpdateSession) -> Result<Option<SessionRecord>> {
        let uid = session.uid().clone();
        let state = session.state();

        if state == SessionState::Purchased {
            match self.purchase_recorded(&uid).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(device = %self.device, uid = %uid, "purchase never reached the ledger");
                    self.store.delete_session(&self.device, &uid).await?;
                    return Ok(None);
                }
                Err(e) => {
                    warn!(device = %self.device, uid = %uid, error = %e, "purchase status unknown");
                    return Ok(None);
                }
            }
        }

        let outcome = match state {
            SessionState::RefundPending => self.finish_pending_refund(session).await?,
            SessionState::Installed => match self.fetch_metadata(&uid).await {
                Ok(metadata) => Some(self.confirm(session, &metadata.version).await?),
                Err(e) => {
                    warn!(device = %self.device, uid = %uid, error = %e, "cannot confirm yet");
                    None
                }
            },
            s if s.is_refundable() => match self.config.reconcile {
                ReconcileMode::Refund => {
                    Some(self.refund(session, &PipelineError::Interrupted(state)).await?)
                }
                ReconcileMode::Resume => match self.fetch_metadata(&uid).await {
                    Ok(metadata) => Some(self.drive(session, &metadata).await?),
                    Err(e) if e.is_transient() => {
                        warn!(device = %self.device, uid = %uid, error = %e, "cannot resume yet");
                        None
                    }
                    Err(e) => Some(self.refund(session, &e.into()).await?),
                },
            },
            _ => None,
        };
        Ok(outcome)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stages
    // ─────────────────────────────────────────────────────────────────────────

    async fn drive(&self, mut session: UpdateSession, metadata: &UpdateMetadata) -> Result<SessionRecord> {
        let payload = match self.verify_and_decrypt(&mut session, metadata).await {
            Ok(payload) => payload,
            Err(e) => return self.refund(session, &e).await,
        };

        let installed = self
            .collaborators
            .installer
            .install(session.uid(), &metadata.version, &payload)
            .await;
        if let Err(e) = installed {
            let e = PipelineError::Install(e.to_string());
            error!(device = %self.device, uid = %session.uid(), error = %e, "installation failed");
            session.set_failure(FailureRecord {
                kind: e.kind(),
                reason: e.to_string(),
            });
            session.advance(SessionState::InstallFailed, self.now())?;
            self.discard_artifact(&mut session).await;
            self.save(&session).await?;
            return Ok(session.into_record());
        }
        self.transition(&mut session, SessionState::Installed).await?;
        self.discard_artifact(&mut session).await;
        self.save(&session).await?;

        self.confirm(session, &metadata.version).await
    }

    /// Everything between purchase and install. Any error here is refundable.
    async fn verify_and_decrypt(
        &self,
        session: &mut UpdateSession,
        metadata: &UpdateMetadata,
    ) -> Result<Vec<u8>> {
        let uid = session.uid().clone();
        self.transition(session, SessionState::Downloading).await?;

        let blobs = &self.collaborators.blobs;
        let blob = self
            .retry("download", self.config.fetch_timeout, self.config.max_retries, || {
                blobs.download(&metadata.pointer)
            })
            .await?;
        let path = self.stage_artifact(&uid, &blob).await?;
        session.set_artifact_path(Some(path.display().to_string()));

        let actual = ContentHash::compute(&blob);
        if actual != metadata.content_hash {
            warn!(
                device = %self.device,
                uid = %uid,
                expected = %metadata.content_hash,
                actual = %actual,
                "content hash mismatch"
            );
            self.discard_artifact(session).await;
            return Err(PipelineError::HashMismatch {
                expected: metadata.content_hash,
                actual,
            });
        }
        self.transition(session, SessionState::HashVerified).await?;

        if self.config.verify_signatures {
            let message = metadata.signed_message()?;
            if !self
                .collaborators
                .verifier
                .verify(&message, &metadata.signature, &self.authority_key)
            {
                warn!(device = %self.device, uid = %uid, "update signature rejected");
                return Err(PipelineError::InvalidSignature(format!(
                    "signature on {} does not verify",
                    uid
                )));
            }
        } else {
            debug!(uid = %uid, "signature check disabled");
        }
        self.transition(session, SessionState::SignatureVerified).await?;

        let ct = Ciphertext::from_bytes(&metadata.encrypted_key)
            .map_err(|e| PipelineError::KeyRecovery(e.into()))?;
        let message = self
            .keys
            .decrypt(&ct, self.now())
            .await
            .map_err(PipelineError::KeyRecovery)?;
        let key = message
            .symmetric_key()
            .map_err(|e| PipelineError::KeyRecovery(e.into()))?;
        session.set_symmetric_key(key);
        self.transition(session, SessionState::KeyRecovered).await?;

        let key = session
            .symmetric_key()
            .copied()
            .ok_or_else(|| PipelineError::PayloadDecrypt("no symmetric key".into()))?;
        let payload = self
            .collaborators
            .cipher
            .decrypt(&key, &blob)
            .map_err(|e| PipelineError::PayloadDecrypt(e.to_string()))?;
        self.transition(session, SessionState::PayloadDecrypted).await?;

        Ok(payload)
    }

    /// Record the installation with the ledger.
    ///
    /// A failure leaves the session in `INSTALLED` for a later reconcile.
    async fn confirm(&self, mut session: UpdateSession, version: &str) -> Result<SessionRecord> {
        let ledger = &self.collaborators.ledger;
        let uid = session.uid().clone();
        let confirmed = self
            .retry("confirm_installation", self.config.ledger_timeout, self.config.confirm_retries, || {
                ledger.confirm_installation(&uid, &self.device, version)
            })
            .await;

        match confirmed {
            Ok(receipt) => {
                session.set_confirm_tx(receipt.tx_id);
                self.transition(&mut session, SessionState::Confirmed).await?;
                info!(device = %self.device, uid = %uid, "update confirmed");
            }
            Err(e) => {
                error!(
                    device = %self.device,
                    uid = %uid,
                    error = %e,
                    "installation not confirmed on ledger; reconciliation needed"
                );
            }
        }
        Ok(session.into_record())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Refunds
    // ─────────────────────────────────────────────────────────────────────────

    async fn refund(&self, mut session: UpdateSession, cause: &PipelineError) -> Result<SessionRecord> {
        info!(
            device = %self.device,
            uid = %session.uid(),
            state = %session.state(),
            kind = ?cause.kind(),
            error = %cause,
            "session failed, refunding"
        );
        session.set_failure(FailureRecord {
            kind: cause.kind(),
            reason: cause.to_string(),
        });
        self.discard_artifact(&mut session).await;
        self.transition(&mut session, SessionState::RefundPending).await?;
        self.issue_refund(session).await
    }

    /// A crash may have hit between the refund request and its record.
    ///
    /// Refunds only when the ledger positively shows none; an unreadable
    /// history leaves the session pending.
    async fn finish_pending_refund(&self, mut session: UpdateSession) -> Result<Option<SessionRecord>> {
        let history = match self.fetch_history().await {
            Ok(history) => history,
            Err(e) => {
                warn!(
                    device = %self.device,
                    uid = %session.uid(),
                    error = %e,
                    "refund status unknown"
                );
                return Ok(None);
            }
        };
        let recorded = history
            .into_iter()
            .find(|r| r.uid.as_ref() == Some(session.uid()) && r.refunded_at.is_some());

        match recorded {
            Some(record) => {
                if let Some(tx) = record.refund_tx {
                    session.set_refund_tx(tx);
                }
                self.transition(&mut session, SessionState::Refunded).await?;
                Ok(Some(session.into_record()))
            }
            None => self.issue_refund(session).await.map(Some),
        }
    }

    /// The single refund attempt for a session in `REFUND_PENDING`.
    async fn issue_refund(&self, mut session: UpdateSession) -> Result<SessionRecord> {
        let uid = session.uid().clone();
        let result = attempt(
            self.config.ledger_timeout,
            self.collaborators.ledger.request_refund(&uid, &self.device),
        )
        .await;

        match result {
            Ok(receipt) => {
                session.set_refund_tx(receipt.tx_id);
                self.transition(&mut session, SessionState::Refunded).await?;
                info!(device = %self.device, uid = %uid, "refund recorded");
            }
            Err(e) => {
                self.transition(&mut session, SessionState::RefundFailed).await?;
                error!(
                    device = %self.device,
                    uid = %uid,
                    error = %e,
                    "refund failed; operator attention required"
                );
            }
        }
        Ok(session.into_record())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    fn claim(&self, uid: &UpdateId) -> Result<Claim<'_>> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| PipelineError::SessionExists(uid.to_string()))?;
        if !active.insert(uid.clone()) {
            return Err(PipelineError::SessionExists(uid.to_string()));
        }
        Ok(Claim {
            active: &self.active,
            uid: uid.clone(),
        })
    }

    async fn transition(&self, session: &mut UpdateSession, next: SessionState) -> Result<()> {
        session.advance(next, self.now())?;
        self.save(session).await?;
        debug!(device = %self.device, uid = %session.uid(), state = %next, "session advanced");
        Ok(())
    }

    async fn save(&self, session: &UpdateSession) -> Result<()> {
        Ok(self.store.upsert_session(session.record()).await?)
    }

    /// Charge for `uid` on the ledger.
    ///
    /// A transient failure may hide a purchase that went through, so the
    /// owner history is checked before trying again. When the ledger shows
    /// no purchase the intent record is dropped; when it cannot tell, the
    /// record stays for reconcile.
    async fn purchase(&self, uid: &UpdateId) -> Result<()> {
        let ledger = &self.collaborators.ledger;
        let mut attempts = 0;
        loop {
            let err = match attempt(self.config.ledger_timeout, ledger.purchase_update(uid, &self.device)).await {
                Ok(receipt) => {
                    info!(device = %self.device, uid = %uid, tx = %receipt.tx_id, "update purchased");
                    return Ok(());
                }
                Err(e) => e,
            };
            if !err.is_transient() {
                self.store.delete_session(&self.device, uid).await?;
                return Err(err.into());
            }

            match self.purchase_recorded(uid).await {
                Ok(true) => {
                    info!(device = %self.device, uid = %uid, error = %err, "purchase found on ledger");
                    return Ok(());
                }
                Ok(false) if attempts < self.config.max_retries => {
                    attempts += 1;
                    warn!(op = "purchase_update", attempt = attempts, error = %err, "transient failure, retrying");
                    tokio::time::sleep(self.config.retry_backoff * attempts).await;
                }
                Ok(false) => {
                    self.store.delete_session(&self.device, uid).await?;
                    return Err(err.into());
                }
                Err(lookup) => {
                    error!(
                        device = %self.device,
                        uid = %uid,
                        error = %lookup,
                        "purchase outcome unknown; left for reconciliation"
                    );
                    return Err(err.into());
                }
            }
        }
    }

    /// Whether the ledger holds a purchase of `uid` by this device.
    async fn purchase_recorded(&self, uid: &UpdateId) -> std::result::Result<bool, CollaboratorError> {
        Ok(self
            .fetch_history()
            .await?
            .iter()
            .any(|r| r.uid.as_ref() == Some(uid) && r.purchased_at.is_some()))
    }

    async fn fetch_metadata(&self, uid: &UpdateId) -> std::result::Result<UpdateMetadata, CollaboratorError> {
        let ledger = &self.collaborators.ledger;
        self.retry("get_update_metadata", self.config.ledger_timeout, self.config.max_retries, || {
            ledger.get_update_metadata(uid)
        })
        .await
    }

    async fn fetch_history(&self) -> std::result::Result<Vec<OwnerRecord>, CollaboratorError> {
        let ledger = &self.collaborators.ledger;
        self.retry("owner_history", self.config.ledger_timeout, self.config.max_retries, || {
            ledger.owner_history(&self.device)
        })
        .await
    }

    /// Staging file for `uid`, named by a digest so the ledger-supplied uid
    /// never becomes a path component.
    fn staging_path(&self, uid: &UpdateId) -> PathBuf {
        let mut name = Vec::with_capacity(self.device.as_str().len() + uid.as_str().len() + 1);
        name.extend_from_slice(self.device.as_str().as_bytes());
        name.push(0);
        name.extend_from_slice(uid.as_str().as_bytes());
        self.config
            .staging_dir
            .join(format!("{}.blob", ContentHash::compute(&name).to_hex()))
    }

    async fn stage_artifact(&self, uid: &UpdateId, blob: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.config.staging_dir).await?;
        let path = self.staging_path(uid);
        tokio::fs::write(&path, blob).await?;
        Ok(path)
    }

    async fn discard_artifact(&self, session: &mut UpdateSession) {
        if let Some(path) = session.record().artifact_path.clone() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path, error = %e, "failed to remove staged artifact");
                }
            }
            session.set_artifact_path(None);
        }
    }

    /// Call `op` with a per-attempt timeout, retrying transient failures.
    async fn retry<T, F, Fut>(
        &self,
        op: &'static str,
        timeout: Duration,
        retries: u32,
        mut f: F,
    ) -> std::result::Result<T, CollaboratorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, CollaboratorError>>,
    {
        let mut attempts = 0;
        loop {
            match attempt(timeout, f()).await {
                Err(e) if e.is_transient() && attempts < retries => {
                    attempts += 1;
                    warn!(op, attempt = attempts, error = %e, "transient failure, retrying");
                    tokio::time::sleep(self.config.retry_backoff * attempts).await;
                }
                other => return other,
            }
        }
    }
}

/// One collaborator call bounded by `timeout`.
async fn attempt<T, Fut>(timeout: Duration, call: Fut) -> std::result::Result<T, CollaboratorError>
where
    Fut: Future<Output = std::result::Result<T, CollaboratorError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(CollaboratorError::Timeout(timeout)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::memory::MemoryBlobStore;
    use crate::blob::BlobPublisher;
    use crate::cipher::{Aes256CbcCipher, Ed25519Verifier};
    use crate::install::memory::RecordingInstaller;
    use crate::ledger::memory::MemoryLedger;
    use fadeabe_abe::Message;
    use fadeabe_core::{FadingFunction, FadingRegistry, FailureKind, Keypair, ManualClock};
    use fadeabe_keys::{AttributeValue, KeyAuthority, KeyConfig};
    use fadeabe_store::MemoryStore;
    use std::collections::BTreeMap;

    const HOUR: i64 = 3_600_000;
    const BASE: i64 = 1_700_000_000_000;

    struct Fixture {
        authority: KeyAuthority,
        signer: Keypair,
        ledger: Arc<MemoryLedger>,
        blobs: Arc<MemoryBlobStore>,
        installer: Arc<RecordingInstaller>,
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        keys: Arc<KeyRing>,
        staging: tempfile::TempDir,
    }

    impl Fixture {
        async fn new() -> Self {
            let registry = Arc::new(
                FadingRegistry::builder()
                    .register(FadingFunction::linear("subscription", HOUR, BASE).unwrap())
                    .unwrap()
                    .build(),
            );
            let authority = KeyAuthority::setup(registry.clone(), KeyConfig::default()).unwrap();
            let clock = Arc::new(ManualClock::new(BASE));
            let device = DeviceId::new("dev-1");

            let attrs: BTreeMap<String, AttributeValue> = [
                ("model", AttributeValue::Static("MODEL:ABC123".into())),
                ("subscription", AttributeValue::Dynamic),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
            let keys = Arc::new(KeyRing::new(device.clone(), registry, KeyConfig::default()));
            keys.install(authority.issue(&device, &attrs, BASE).unwrap())
                .await
                .unwrap();

            Self {
                authority,
                signer: Keypair::generate(),
                ledger: Arc::new(MemoryLedger::with_clock(clock.clone())),
                blobs: Arc::new(MemoryBlobStore::new()),
                installer: Arc::new(RecordingInstaller::new()),
                clock,
                store: Arc::new(MemoryStore::new()),
                keys,
                staging: tempfile::tempdir().unwrap(),
            }
        }

        fn config(&self) -> PipelineConfig {
            PipelineConfig {
                fetch_timeout: Duration::from_secs(2),
                ledger_timeout: Duration::from_secs(2),
                retry_backoff: Duration::from_millis(1),
                staging_dir: self.staging.path().to_path_buf(),
                ..PipelineConfig::default()
            }
        }

        fn pipeline(&self, config: PipelineConfig) -> UpdatePipeline<MemoryStore> {
            UpdatePipeline::new(
                self.keys.clone(),
                self.store.clone(),
                Collaborators {
                    ledger: self.ledger.clone(),
                    blobs: self.blobs.clone(),
                    cipher: Arc::new(Aes256CbcCipher),
                    verifier: Arc::new(Ed25519Verifier),
                    installer: self.installer.clone(),
                },
                self.signer.public_key(),
                self.clock.clone(),
                config,
            )
        }

        async fn publish(&self, uid: &str, policy: &str, payload: &[u8]) -> UpdateMetadata {
            let key = [9u8; 32];
            let blob = Aes256CbcCipher.encrypt(&key, payload).unwrap();
            let pointer = self.blobs.upload(&blob).await.unwrap();
            let content_hash = ContentHash::compute(&blob);
            let now = self.clock.now_millis();
            let ct = self
                .authority
                .encrypt(&Message::Bytes(key.to_vec()), policy, now)
                .unwrap();
            let mut metadata = UpdateMetadata {
                uid: UpdateId::new(uid),
                content_hash,
                pointer,
                encrypted_key: ct.to_bytes().unwrap(),
                signature: fadeabe_core::Ed25519Signature::from_bytes([0; 64]),
                price: 100,
                version: "2.0.0".into(),
                description: "firmware".into(),
                created_at: now,
                active: true,
            };
            metadata.sign_with(&self.signer).unwrap();
            self.ledger.publish_update(metadata.clone()).await.unwrap();
            metadata
        }

        fn device(&self) -> DeviceId {
            DeviceId::new("dev-1")
        }
    }

    const POLICY: &str = "MODEL_ABC123 and subscription";

    #[tokio::test]
    async fn test_happy_path_confirms() {
        let fx = Fixture::new().await;
        let pipeline = fx.pipeline(fx.config());
        let meta = fx.publish("u1", POLICY, b"new firmware").await;

        let record = pipeline.run(&meta.uid).await.unwrap();
        assert_eq!(record.state, SessionState::Confirmed);
        assert!(record.confirm_tx.is_some());
        assert!(record.failure.is_none());
        assert!(record.artifact_path.is_none());

        let installed = fx.installer.installed();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].payload, b"new firmware");
        assert_eq!(installed[0].version, "2.0.0");
        assert_eq!(fx.ledger.refund_requests(&fx.device(), &meta.uid), 0);
    }

    #[tokio::test]
    async fn test_corrupt_blob_refunds_once() {
        let fx = Fixture::new().await;
        let pipeline = fx.pipeline(fx.config());
        let meta = fx.publish("u1", POLICY, b"new firmware").await;
        assert!(fx.blobs.tamper(&meta.pointer, |b| b[20] ^= 0x01));

        let record = pipeline.run(&meta.uid).await.unwrap();
        assert_eq!(record.state, SessionState::Refunded);
        assert_eq!(
            record.failure.as_ref().map(|f| f.kind),
            Some(FailureKind::IntegrityViolation)
        );
        assert!(record.refund_tx.is_some());
        assert_eq!(fx.ledger.refund_requests(&fx.device(), &meta.uid), 1);
        assert_eq!(fx.blobs.download_count(), 1);
        assert!(fx.installer.installed().is_empty());
        assert_eq!(std::fs::read_dir(fx.staging.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_notification_is_noop() {
        let fx = Fixture::new().await;
        let pipeline = fx.pipeline(fx.config());
        let meta = fx.publish("u1", POLICY, b"fw").await;

        let first = pipeline.handle_notification(&meta.uid).await.unwrap();
        assert!(matches!(first, Trigger::Ran(ref r) if r.state == SessionState::Confirmed));

        let second = pipeline.handle_notification(&meta.uid).await.unwrap();
        assert_eq!(second, Trigger::Duplicate);
        assert_eq!(fx.blobs.download_count(), 1);
        assert_eq!(fx.ledger.confirm_requests(&fx.device(), &meta.uid), 1);
    }

    #[tokio::test]
    async fn test_expired_subscription_is_access_denied() {
        let fx = Fixture::new().await;
        let pipeline = fx.pipeline(fx.config());
        let meta = fx.publish("u1", POLICY, b"fw").await;
        fx.clock.advance(3_601_000);

        let record = pipeline.run(&meta.uid).await.unwrap();
        assert_eq!(record.state, SessionState::Refunded);
        let failure = record.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::AccessDenied);
        assert!(failure.reason.contains("symmetric key recovery failed"));
    }

    #[tokio::test]
    async fn test_bad_signature_refunds() {
        let fx = Fixture::new().await;
        let pipeline = fx.pipeline(fx.config());
        let mut meta = fx.publish("u1", POLICY, b"fw").await;
        meta.uid = UpdateId::new("u2");
        meta.signature = Keypair::generate().sign(&meta.signed_message().unwrap());
        fx.ledger.publish_update(meta.clone()).await.unwrap();

        let record = pipeline.run(&meta.uid).await.unwrap();
        assert_eq!(record.state, SessionState::Refunded);
        assert_eq!(
            record.failure.map(|f| f.kind),
            Some(FailureKind::IntegrityViolation)
        );
    }

    #[tokio::test]
    async fn test_swapped_version_or_key_is_refunded() {
        let fx = Fixture::new().await;
        let pipeline = fx.pipeline(fx.config());
        let meta = fx.publish("u1", POLICY, b"fw").await;
        let other = fx.publish("u2", POLICY, b"other fw").await;

        let mut relabeled = meta.clone();
        relabeled.uid = UpdateId::new("u3");
        relabeled.signature = fx.signer.sign(&relabeled.signed_message().unwrap());
        relabeled.version = "9.9.9".into();

        let mut rekeyed = meta.clone();
        rekeyed.uid = UpdateId::new("u4");
        rekeyed.signature = fx.signer.sign(&rekeyed.signed_message().unwrap());
        rekeyed.encrypted_key = other.encrypted_key.clone();

        for forged in [relabeled, rekeyed] {
            fx.ledger.publish_update(forged.clone()).await.unwrap();
            let record = pipeline.run(&forged.uid).await.unwrap();
            assert_eq!(record.state, SessionState::Refunded);
            let failure = record.failure.unwrap();
            assert_eq!(failure.kind, FailureKind::IntegrityViolation);
            assert!(failure.reason.contains("signature"));
            assert_eq!(fx.ledger.refund_requests(&fx.device(), &forged.uid), 1);
        }
        assert!(fx.installer.installed().is_empty());
    }

    #[tokio::test]
    async fn test_uid_never_escapes_staging_dir() {
        let fx = Fixture::new().await;
        let pipeline = fx.pipeline(fx.config());

        for uid in ["release/2.0", "../../outside"] {
            let path = pipeline.staging_path(&UpdateId::new(uid));
            assert_eq!(path.parent(), Some(fx.staging.path()));
        }
        assert_ne!(
            pipeline.staging_path(&UpdateId::new("a")),
            pipeline.staging_path(&UpdateId::new("b"))
        );

        let meta = fx.publish("release/2.0", POLICY, b"fw").await;
        let record = pipeline.run(&meta.uid).await.unwrap();
        assert_eq!(record.state, SessionState::Confirmed);
        assert_eq!(fx.installer.installed()[0].payload, b"fw");
    }

    #[tokio::test]
    async fn test_lost_purchase_receipt_is_not_charged_twice() {
        let fx = Fixture::new().await;
        let pipeline = fx.pipeline(fx.config());
        let meta = fx.publish("u1", POLICY, b"fw").await;
        fx.ledger.lose_purchase_receipts(1);

        let record = pipeline.run(&meta.uid).await.unwrap();
        assert_eq!(record.state, SessionState::Confirmed);
        assert_eq!(fx.ledger.purchase_requests(&fx.device(), &meta.uid), 1);
    }

    #[tokio::test]
    async fn test_purchase_that_never_landed_is_retried() {
        let fx = Fixture::new().await;
        let pipeline = fx.pipeline(fx.config());
        let meta = fx.publish("u1", POLICY, b"fw").await;
        fx.ledger.fail_purchases(2);

        let record = pipeline.run(&meta.uid).await.unwrap();
        assert_eq!(record.state, SessionState::Confirmed);
        assert_eq!(fx.ledger.purchase_requests(&fx.device(), &meta.uid), 3);
    }

    #[tokio::test]
    async fn test_failed_purchase_leaves_no_session() {
        let fx = Fixture::new().await;
        let pipeline = fx.pipeline(fx.config());
        let meta = fx.publish("u1", POLICY, b"fw").await;
        fx.ledger.fail_purchases(10);

        let err = pipeline.run(&meta.uid).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::TransientIo);
        assert_eq!(fx.ledger.purchase_requests(&fx.device(), &meta.uid), 4);
        assert!(fx.store.get_session(&fx.device(), &meta.uid).await.unwrap().is_none());
        assert!(pipeline.reconcile().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purchase_with_unknown_outcome_is_reconciled() {
        let fx = Fixture::new().await;
        let pipeline = fx.pipeline(fx.config());
        let meta = fx.publish("u1", POLICY, b"fw").await;
        fx.ledger.lose_purchase_receipts(1);
        fx.ledger.fail_history(4);

        assert!(pipeline.run(&meta.uid).await.is_err());
        let pending = fx.store.get_session(&fx.device(), &meta.uid).await.unwrap().unwrap();
        assert_eq!(pending.state, SessionState::Purchased);

        let done = pipeline.reconcile().await.unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].state, SessionState::Confirmed);
        assert_eq!(fx.ledger.purchase_requests(&fx.device(), &meta.uid), 1);
    }

    #[tokio::test]
    async fn test_reconcile_drops_intent_without_purchase() {
        let fx = Fixture::new().await;
        let meta = fx.publish("u1", POLICY, b"fw").await;
        let intent = SessionRecord::new(fx.device(), meta.uid.clone(), BASE);
        fx.store.upsert_session(&intent).await.unwrap();

        assert!(fx.pipeline(fx.config()).reconcile().await.unwrap().is_empty());
        assert!(fx.store.get_session(&fx.device(), &meta.uid).await.unwrap().is_none());
        assert_eq!(fx.ledger.refund_requests(&fx.device(), &meta.uid), 0);
    }

    #[tokio::test]
    async fn test_failed_refund_is_terminal_and_not_retried() {
        let fx = Fixture::new().await;
        let pipeline = fx.pipeline(fx.config());
        let meta = fx.publish("u1", POLICY, b"fw").await;
        fx.blobs.tamper(&meta.pointer, |b| b.truncate(8));
        fx.ledger.fail_refunds(5);

        let record = pipeline.run(&meta.uid).await.unwrap();
        assert_eq!(record.state, SessionState::RefundFailed);
        assert_eq!(fx.ledger.refund_requests(&fx.device(), &meta.uid), 1);
        assert!(pipeline.reconcile().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_download_is_retried() {
        let fx = Fixture::new().await;
        let pipeline = fx.pipeline(fx.config());
        let meta = fx.publish("u1", POLICY, b"fw").await;
        fx.blobs.fail_downloads(2);

        let record = pipeline.run(&meta.uid).await.unwrap();
        assert_eq!(record.state, SessionState::Confirmed);
        assert_eq!(fx.blobs.download_count(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_blob_store_refunds_after_retries() {
        let fx = Fixture::new().await;
        let pipeline = fx.pipeline(fx.config());
        let meta = fx.publish("u1", POLICY, b"fw").await;
        fx.blobs.set_offline(true);

        let record = pipeline.run(&meta.uid).await.unwrap();
        assert_eq!(record.state, SessionState::Refunded);
        assert_eq!(
            record.failure.map(|f| f.kind),
            Some(FailureKind::TransientIo)
        );
        assert_eq!(fx.blobs.download_count(), 4);
    }

    #[tokio::test]
    async fn test_install_failure_does_not_refund() {
        let fx = Fixture::new().await;
        let pipeline = fx.pipeline(fx.config());
        let meta = fx.publish("u1", POLICY, b"fw").await;
        fx.installer.set_broken(true);

        let record = pipeline.run(&meta.uid).await.unwrap();
        assert_eq!(record.state, SessionState::InstallFailed);
        assert_eq!(fx.ledger.refund_requests(&fx.device(), &meta.uid), 0);
    }

    #[tokio::test]
    async fn test_unconfirmed_install_is_reconciled() {
        let fx = Fixture::new().await;
        let pipeline = fx.pipeline(fx.config());
        let meta = fx.publish("u1", POLICY, b"fw").await;
        fx.ledger.fail_confirmations(4);

        let record = pipeline.run(&meta.uid).await.unwrap();
        assert_eq!(record.state, SessionState::Installed);
        assert_eq!(fx.ledger.refund_requests(&fx.device(), &meta.uid), 0);

        let done = pipeline.reconcile().await.unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].state, SessionState::Confirmed);
        assert_eq!(fx.installer.installed().len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_waits_for_metadata_before_confirming() {
        let fx = Fixture::new().await;
        let pipeline = fx.pipeline(fx.config());
        let meta = fx.publish("u1", POLICY, b"fw").await;
        fx.ledger.fail_confirmations(4);
        assert_eq!(pipeline.run(&meta.uid).await.unwrap().state, SessionState::Installed);

        fx.ledger.fail_metadata(4);
        assert!(pipeline.reconcile().await.unwrap().is_empty());
        let stored = fx.store.get_session(&fx.device(), &meta.uid).await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Installed);
        assert_eq!(fx.ledger.confirm_requests(&fx.device(), &meta.uid), 4);

        let done = pipeline.reconcile().await.unwrap();
        assert_eq!(done[0].state, SessionState::Confirmed);
        let history = fx.ledger.owner_history(&fx.device()).await.unwrap();
        assert_eq!(history[0].installed_version.as_deref(), Some("2.0.0"));
    }

    #[tokio::test]
    async fn test_reconcile_resumes_or_refunds_interrupted_sessions() {
        let fx = Fixture::new().await;
        let device = fx.device();

        for (uid, mode, expected) in [
            ("u1", ReconcileMode::Resume, SessionState::Confirmed),
            ("u2", ReconcileMode::Refund, SessionState::Refunded),
        ] {
            let meta = fx.publish(uid, POLICY, b"fw").await;
            fx.ledger.purchase_update(&meta.uid, &device).await.unwrap();
            let mut crashed = SessionRecord::new(device.clone(), meta.uid.clone(), BASE);
            crashed.state = SessionState::HashVerified;
            fx.store.upsert_session(&crashed).await.unwrap();

            let pipeline = fx.pipeline(PipelineConfig {
                reconcile: mode,
                ..fx.config()
            });
            let done = pipeline.reconcile().await.unwrap();
            assert_eq!(done.len(), 1);
            assert_eq!(done[0].state, expected);
        }
    }

    #[tokio::test]
    async fn test_reconcile_pending_refund_checks_ledger_first() {
        let fx = Fixture::new().await;
        let device = fx.device();
        let meta = fx.publish("u1", POLICY, b"fw").await;
        fx.ledger.purchase_update(&meta.uid, &device).await.unwrap();
        fx.ledger.request_refund(&meta.uid, &device).await.unwrap();

        let mut crashed = SessionRecord::new(device.clone(), meta.uid.clone(), BASE);
        crashed.state = SessionState::RefundPending;
        fx.store.upsert_session(&crashed).await.unwrap();

        let pipeline = fx.pipeline(fx.config());
        fx.ledger.fail_history(4);
        assert!(pipeline.reconcile().await.unwrap().is_empty());
        assert_eq!(fx.ledger.refund_requests(&device, &meta.uid), 1);
        let stored = fx.store.get_session(&device, &meta.uid).await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::RefundPending);

        let done = pipeline.reconcile().await.unwrap();
        assert_eq!(done[0].state, SessionState::Refunded);
        assert!(done[0].refund_tx.is_some());
        assert_eq!(fx.ledger.refund_requests(&device, &meta.uid), 1);
    }
}
