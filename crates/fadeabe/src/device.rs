//! The device side: one key ring, one store, one update pipeline.

use std::sync::Arc;

use fadeabe_abe::{Ciphertext, Message};
use fadeabe_core::{Clock, DeviceId, Ed25519PublicKey, FadingRegistry, SessionState, UpdateId};
use fadeabe_keys::{KeyRing, RenewalDescriptor, SecretKey, Validity};
use fadeabe_pipeline::{Collaborators, Trigger, UpdatePipeline};
use fadeabe_store::{SessionRecord, Store};
use tokio::sync::mpsc;
use tracing::info;

use crate::authority::Authority;
use crate::config::DeviceConfig;
use crate::error::Result;

/// A device that holds a fading-attribute key and installs updates.
///
/// The key is persisted after every change, so a device reopened over the
/// same store picks up where it left off. Call [`Device::reconcile`] after
/// reopening to settle sessions interrupted by a crash.
pub struct Device<S: Store> {
    ring: Arc<KeyRing>,
    store: Arc<S>,
    pipeline: UpdatePipeline<S>,
    clock: Arc<dyn Clock>,
}

impl<S: Store> Device<S> {
    /// Open a device over `store`, loading its key if one was persisted.
    pub async fn open(
        id: DeviceId,
        registry: Arc<FadingRegistry>,
        store: S,
        collaborators: Collaborators,
        authority_key: Ed25519PublicKey,
        clock: Arc<dyn Clock>,
        config: DeviceConfig,
    ) -> Result<Self> {
        let store = Arc::new(store);
        let ring = Arc::new(KeyRing::new(id, registry, config.keys));
        if ring.load(store.as_ref()).await? {
            info!(device = %ring.device(), "loaded persisted key");
        }
        let pipeline = UpdatePipeline::new(
            ring.clone(),
            store.clone(),
            collaborators,
            authority_key,
            clock.clone(),
            config.pipeline,
        );
        Ok(Self {
            ring,
            store,
            pipeline,
            clock,
        })
    }

    pub fn id(&self) -> &DeviceId {
        self.ring.device()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn key_ring(&self) -> &Arc<KeyRing> {
        &self.ring
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Key Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist a freshly issued key, then install it.
    pub async fn provision(&self, key: SecretKey) -> Result<()> {
        Ok(self.ring.provision(key, self.store.as_ref(), self.now()).await?)
    }

    /// Renew one dynamic attribute with `authority`.
    ///
    /// The renewed key is persisted before it replaces the one in memory.
    pub async fn renew(&self, authority: &Authority, name: &str) -> Result<RenewalDescriptor> {
        Ok(self
            .ring
            .renew(authority.keys(), name, self.store.as_ref(), self.now())
            .await?)
    }

    /// Merge a renewal obtained out of band, persisting the result first.
    pub async fn apply_renewal(&self, renewal: &RenewalDescriptor) -> Result<()> {
        Ok(self
            .ring
            .apply_renewal(renewal, self.store.as_ref(), self.now())
            .await?)
    }

    pub async fn check_validity(&self) -> Result<Validity> {
        Ok(self.ring.check_validity(self.now()).await?)
    }

    pub async fn decrypt(&self, ct: &Ciphertext) -> Result<Message> {
        Ok(self.ring.decrypt(ct, self.now()).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Updates
    // ─────────────────────────────────────────────────────────────────────────

    /// Purchase and install `uid`, returning the final session record.
    pub async fn run(&self, uid: &UpdateId) -> Result<SessionRecord> {
        Ok(self.pipeline.run(uid).await?)
    }

    pub async fn handle_notification(&self, uid: &UpdateId) -> Result<Trigger> {
        Ok(self.pipeline.handle_notification(uid).await?)
    }

    /// Handle ledger notifications until the channel closes.
    pub async fn listen(&self, notifications: mpsc::UnboundedReceiver<UpdateId>) {
        self.pipeline.listen(notifications).await
    }

    pub async fn reconcile(&self) -> Result<Vec<SessionRecord>> {
        Ok(self.pipeline.reconcile().await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Installed and confirmed updates, newest first.
    pub async fn update_history(&self) -> Result<Vec<SessionRecord>> {
        self.sessions_in(&[SessionState::Installed, SessionState::Confirmed])
            .await
    }

    /// Sessions that ended in a refund, successful or not, newest first.
    pub async fn refunded_updates(&self) -> Result<Vec<SessionRecord>> {
        self.sessions_in(&[SessionState::Refunded, SessionState::RefundFailed])
            .await
    }

    async fn sessions_in(&self, states: &[SessionState]) -> Result<Vec<SessionRecord>> {
        let mut sessions: Vec<_> = self
            .store
            .list_sessions(self.id())
            .await?
            .into_iter()
            .filter(|s| states.contains(&s.state))
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    fn now(&self) -> i64 {
        self.clock.now_millis()
    }
}
