//! End-to-end scenarios: an authority, a device over SQLite, and in-memory
//! ledger, blob store and installer.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fadeabe::core::{DeviceId, FadingFunction, FadingRegistry, Keypair, ManualClock};
use fadeabe::keys::{AttributeValue, KeyConfig, KeyError};
use fadeabe::pipeline::blob::memory::MemoryBlobStore;
use fadeabe::pipeline::install::memory::RecordingInstaller;
use fadeabe::pipeline::ledger::memory::MemoryLedger;
use fadeabe::pipeline::{
    Aes256CbcCipher, Collaborators, Ed25519Verifier, Ledger, PipelineConfig, Trigger,
};
use fadeabe::store::{SessionRecord, SqliteStore, Store};
use fadeabe::{Authority, Device, DeviceConfig, Error, FailureKind, SessionState};
use tempfile::TempDir;

const T0: i64 = 1_700_000_000_000;
const HOUR: i64 = 3_600_000;
const POLICY: &str = "MODEL_ABC123 and subscription";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

struct World {
    dir: TempDir,
    clock: Arc<ManualClock>,
    registry: Arc<FadingRegistry>,
    ledger: Arc<MemoryLedger>,
    blobs: Arc<MemoryBlobStore>,
    installer: Arc<RecordingInstaller>,
    authority: Authority,
}

impl World {
    fn new() -> anyhow::Result<Self> {
        init_tracing();
        let clock = Arc::new(ManualClock::new(T0));
        let registry = Arc::new(
            FadingRegistry::builder()
                .register(FadingFunction::linear("subscription", HOUR, T0)?)?
                .register(FadingFunction::hard_expiry("trial", HOUR, Some(2), T0)?)?
                .build(),
        );
        let ledger = Arc::new(MemoryLedger::with_clock(clock.clone()));
        let blobs = Arc::new(MemoryBlobStore::new());
        let authority = Authority::setup(
            registry.clone(),
            KeyConfig::default(),
            Keypair::generate(),
            ledger.clone(),
            blobs.clone(),
            Arc::new(Aes256CbcCipher),
            clock.clone(),
        )?;
        Ok(Self {
            dir: tempfile::tempdir()?,
            clock,
            registry,
            ledger,
            blobs,
            installer: Arc::new(RecordingInstaller::new()),
            authority,
        })
    }

    fn db_path(&self) -> std::path::PathBuf {
        self.dir.path().join("device.db")
    }

    fn config(&self, staging: &Path) -> DeviceConfig {
        DeviceConfig {
            keys: KeyConfig::default(),
            pipeline: PipelineConfig {
                retry_backoff: Duration::from_millis(1),
                staging_dir: staging.to_path_buf(),
                ..PipelineConfig::default()
            },
        }
    }

    async fn open_device(&self) -> anyhow::Result<Device<SqliteStore>> {
        let collaborators = Collaborators {
            ledger: self.ledger.clone(),
            blobs: self.blobs.clone(),
            cipher: Arc::new(Aes256CbcCipher),
            verifier: Arc::new(Ed25519Verifier),
            installer: self.installer.clone(),
        };
        Ok(Device::open(
            DeviceId::new("device-001"),
            self.registry.clone(),
            SqliteStore::open(self.db_path())?,
            collaborators,
            self.authority.signing_key(),
            self.clock.clone(),
            self.config(&self.dir.path().join("staging")),
        )
        .await?)
    }

    async fn provisioned_device(
        &self,
        attrs: &BTreeMap<String, AttributeValue>,
    ) -> anyhow::Result<Device<SqliteStore>> {
        let device = self.open_device().await?;
        device
            .provision(self.authority.issue_key(device.id(), attrs)?)
            .await?;
        Ok(device)
    }
}

fn model_and_subscription() -> BTreeMap<String, AttributeValue> {
    let mut attrs = BTreeMap::new();
    attrs.insert("model".into(), AttributeValue::Static("MODEL:ABC123".into()));
    attrs.insert("subscription".into(), AttributeValue::Dynamic);
    attrs
}

#[tokio::test]
async fn test_subscription_lapses_and_renewal_restores_access() -> anyhow::Result<()> {
    let world = World::new()?;
    let device = world.provisioned_device(&model_and_subscription()).await?;

    let first = world
        .authority
        .publish_update(b"firmware-1.0.1", POLICY, "1.0.1", "security fixes", 10)
        .await?;
    assert_eq!(device.run(&first.uid).await?.state, SessionState::Confirmed);

    world.clock.advance(HOUR + 1_000);
    let second = world
        .authority
        .publish_update(b"firmware-1.0.2", POLICY, "1.0.2", "more fixes", 10)
        .await?;
    let record = device.run(&second.uid).await?;
    assert_eq!(record.state, SessionState::Refunded);
    assert_eq!(
        record.failure.map(|f| f.kind),
        Some(FailureKind::AccessDenied)
    );
    assert!(!device.check_validity().await?.is_fully_valid());

    device.renew(&world.authority, "subscription").await?;
    assert!(device.check_validity().await?.is_fully_valid());

    let third = world
        .authority
        .publish_update(b"firmware-1.0.3", POLICY, "1.0.3", "renewed", 10)
        .await?;
    assert_eq!(device.run(&third.uid).await?.state, SessionState::Confirmed);

    let installed: Vec<_> = world
        .installer
        .installed()
        .into_iter()
        .map(|i| i.version)
        .collect();
    assert_eq!(installed, vec!["1.0.1".to_string(), "1.0.3".to_string()]);

    let history: Vec<_> = device
        .update_history()
        .await?
        .into_iter()
        .map(|r| r.uid)
        .collect();
    assert_eq!(history, vec![third.uid.clone(), first.uid.clone()]);

    let refunded = device.refunded_updates().await?;
    assert_eq!(refunded.len(), 1);
    assert_eq!(refunded[0].uid, second.uid);
    Ok(())
}

#[tokio::test]
async fn test_corrupt_artifact_is_refunded_once() -> anyhow::Result<()> {
    let world = World::new()?;
    let device = world.provisioned_device(&model_and_subscription()).await?;

    let update = world
        .authority
        .publish_update(b"firmware", POLICY, "2.0.0", "major", 25)
        .await?;
    assert!(world.blobs.tamper(&update.pointer, |blob| blob[0] ^= 0x01));

    let record = device.run(&update.uid).await?;
    assert_eq!(record.state, SessionState::Refunded);
    assert_eq!(
        record.failure.map(|f| f.kind),
        Some(FailureKind::IntegrityViolation)
    );
    assert!(record.refund_tx.is_some());
    assert_eq!(world.ledger.refund_requests(device.id(), &update.uid), 1);
    assert!(world.installer.installed().is_empty());

    let history = world.ledger.owner_history(device.id()).await?;
    assert!(history
        .iter()
        .any(|h| h.uid.as_ref() == Some(&update.uid) && h.refunded_at.is_some()));
    Ok(())
}

#[tokio::test]
async fn test_relabeled_update_is_refunded() -> anyhow::Result<()> {
    let world = World::new()?;
    let device = world.provisioned_device(&model_and_subscription()).await?;

    let update = world
        .authority
        .publish_update(b"firmware", POLICY, "2.1.0", "", 15)
        .await?;
    assert!(world
        .ledger
        .tamper(&update.uid, |m| m.version = "9.9.9-tampered".into()));

    let record = device.run(&update.uid).await?;
    assert_eq!(record.state, SessionState::Refunded);
    assert_eq!(
        record.failure.map(|f| f.kind),
        Some(FailureKind::IntegrityViolation)
    );
    assert!(world.installer.installed().is_empty());
    assert_eq!(world.ledger.refund_requests(device.id(), &update.uid), 1);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_notification_is_ignored() -> anyhow::Result<()> {
    let world = World::new()?;
    let device = world.provisioned_device(&model_and_subscription()).await?;

    let update = world
        .authority
        .publish_update(b"firmware", POLICY, "1.1.0", "", 0)
        .await?;
    assert!(matches!(
        device.handle_notification(&update.uid).await?,
        Trigger::Ran(SessionRecord { state: SessionState::Confirmed, .. })
    ));
    let downloads = world.blobs.download_count();

    assert_eq!(
        device.handle_notification(&update.uid).await?,
        Trigger::Duplicate
    );
    assert_eq!(world.blobs.download_count(), downloads);
    assert_eq!(world.installer.installed().len(), 1);
    assert_eq!(world.ledger.confirm_requests(device.id(), &update.uid), 1);
    Ok(())
}

#[tokio::test]
async fn test_listen_installs_published_updates() -> anyhow::Result<()> {
    let world = World::new()?;
    let device = world.provisioned_device(&model_and_subscription()).await?;
    let notifications = world.ledger.subscribe();

    let update = world
        .authority
        .publish_update(b"firmware", POLICY, "1.2.0", "", 0)
        .await?;
    // The ledger keeps its sender, so the channel never closes.
    let _ = tokio::time::timeout(Duration::from_millis(500), device.listen(notifications)).await;

    let history = device.update_history().await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].uid, update.uid);
    Ok(())
}

#[tokio::test]
async fn test_key_survives_restart() -> anyhow::Result<()> {
    let world = World::new()?;
    {
        let device = world.provisioned_device(&model_and_subscription()).await?;
        world.clock.advance(HOUR);
        device.renew(&world.authority, "subscription").await?;
    }

    let device = world.open_device().await?;
    let key = device
        .key_ring()
        .snapshot()
        .await
        .ok_or_else(|| anyhow::anyhow!("key was not reloaded"))?;
    assert_eq!(key.history().len(), 1);
    assert_eq!(
        key.expiry_info("subscription").map(|e| e.current_renewals),
        Some(1)
    );

    let update = world
        .authority
        .publish_update(b"firmware", POLICY, "1.3.0", "", 0)
        .await?;
    assert_eq!(device.run(&update.uid).await?.state, SessionState::Confirmed);
    Ok(())
}

#[tokio::test]
async fn test_interrupted_session_resumes_after_restart() -> anyhow::Result<()> {
    let world = World::new()?;
    let update = {
        let device = world.provisioned_device(&model_and_subscription()).await?;
        let update = world
            .authority
            .publish_update(b"firmware", POLICY, "1.4.0", "", 3)
            .await?;

        // Simulate a crash right after the hash check.
        world.ledger.purchase_update(&update.uid, device.id()).await?;
        let mut record = SessionRecord::new(device.id().clone(), update.uid.clone(), T0);
        record.state = SessionState::HashVerified;
        device.store().upsert_session(&record).await?;
        update
    };

    let device = world.open_device().await?;
    let reconciled = device.reconcile().await?;
    assert_eq!(reconciled.len(), 1);
    assert_eq!(reconciled[0].state, SessionState::Confirmed);
    assert_eq!(world.installer.installed().len(), 1);
    assert_eq!(world.installer.installed()[0].uid, update.uid);

    assert!(device.reconcile().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_trial_stops_renewing_after_limit() -> anyhow::Result<()> {
    let world = World::new()?;
    let mut attrs = model_and_subscription();
    attrs.insert("trial".into(), AttributeValue::Dynamic);
    let device = world.provisioned_device(&attrs).await?;

    for _ in 0..2 {
        world.clock.advance(HOUR);
        device.renew(&world.authority, "trial").await?;
    }

    world.clock.advance(HOUR);
    let err = device.renew(&world.authority, "trial").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Keys(KeyError::RenewalLimitReached { .. })
    ));
    assert_eq!(err.kind(), FailureKind::AccessDenied);
    Ok(())
}

#[tokio::test]
async fn test_unprovisioned_device_refunds() -> anyhow::Result<()> {
    let world = World::new()?;
    let device = world.open_device().await?;

    let update = world
        .authority
        .publish_update(b"firmware", POLICY, "1.5.0", "", 7)
        .await?;
    let record = device.run(&update.uid).await?;
    assert_eq!(record.state, SessionState::Refunded);
    assert_eq!(world.ledger.refund_requests(device.id(), &update.uid), 1);
    Ok(())
}
