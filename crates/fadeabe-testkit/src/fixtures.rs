//! Test fixtures and helpers.
//!
//! A [`Harness`] wires an authority and any number of devices to the same
//! in-memory ledger, blob store and installer, all driven by one manual
//! clock.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fadeabe::{Authority, Device, DeviceConfig};
use fadeabe_core::{DeviceId, FadingFunction, FadingRegistry, Keypair, ManualClock};
use fadeabe_keys::{AttributeValue, KeyConfig};
use fadeabe_pipeline::blob::memory::MemoryBlobStore;
use fadeabe_pipeline::install::memory::RecordingInstaller;
use fadeabe_pipeline::ledger::memory::MemoryLedger;
use fadeabe_pipeline::{Aes256CbcCipher, Collaborators, Ed25519Verifier, PipelineConfig};
use fadeabe_store::Store;

/// 2023-11-14T22:13:20Z, a round number to start clocks at.
pub const BASE_TIME: i64 = 1_700_000_000_000;

pub const HOUR_MS: i64 = 3_600_000;

/// Policy most fixtures publish under.
pub const MODEL_POLICY: &str = "MODEL_ABC123 and subscription";

/// Registry with the fading functions the fixtures use:
///
/// - `subscription`: linear, one hour
/// - `trial`: hard expiry, one hour, two renewals
/// - `tier`: four steps over four hours
pub fn registry(base_time: i64) -> Arc<FadingRegistry> {
    let build = || -> fadeabe_core::Result<FadingRegistry> {
        Ok(FadingRegistry::builder()
            .register(FadingFunction::linear("subscription", HOUR_MS, base_time)?)?
            .register(FadingFunction::hard_expiry("trial", HOUR_MS, Some(2), base_time)?)?
            .register(FadingFunction::step("tier", 4 * HOUR_MS, 4, base_time)?)?
            .build())
    };
    Arc::new(build().expect("fixture registry is valid"))
}

/// `model = MODEL:ABC123` plus a dynamic `subscription`.
pub fn device_attributes() -> BTreeMap<String, AttributeValue> {
    let mut attrs = BTreeMap::new();
    attrs.insert(
        "model".to_string(),
        AttributeValue::Static("MODEL:ABC123".into()),
    );
    attrs.insert("subscription".to_string(), AttributeValue::Dynamic);
    attrs
}

/// Pipeline settings for tests: millisecond backoff, short timeouts.
pub fn device_config(staging_dir: &Path) -> DeviceConfig {
    DeviceConfig {
        keys: KeyConfig::default(),
        pipeline: PipelineConfig {
            fetch_timeout: Duration::from_secs(2),
            ledger_timeout: Duration::from_secs(2),
            retry_backoff: Duration::from_millis(1),
            staging_dir: staging_dir.to_path_buf(),
            ..PipelineConfig::default()
        },
    }
}

/// An authority plus shared in-memory collaborators.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub registry: Arc<FadingRegistry>,
    pub ledger: Arc<MemoryLedger>,
    pub blobs: Arc<MemoryBlobStore>,
    pub installer: Arc<RecordingInstaller>,
    pub authority: Authority,
}

impl Harness {
    /// A harness whose clock and fading functions start at [`BASE_TIME`].
    pub fn new() -> Self {
        Self::with_signer(Keypair::generate())
    }

    /// A harness signing with a deterministic key.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self::with_signer(Keypair::from_seed(&seed))
    }

    fn with_signer(signer: Keypair) -> Self {
        let clock = Arc::new(ManualClock::new(BASE_TIME));
        let registry = registry(BASE_TIME);
        let ledger = Arc::new(MemoryLedger::with_clock(clock.clone()));
        let blobs = Arc::new(MemoryBlobStore::new());
        let installer = Arc::new(RecordingInstaller::new());
        let authority = Authority::setup(
            registry.clone(),
            KeyConfig::default(),
            signer,
            ledger.clone(),
            blobs.clone(),
            Arc::new(Aes256CbcCipher),
            clock.clone(),
        )
        .expect("authority setup");

        Self {
            clock,
            registry,
            ledger,
            blobs,
            installer,
            authority,
        }
    }

    /// Collaborators for a device talking to this harness.
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            ledger: self.ledger.clone(),
            blobs: self.blobs.clone(),
            cipher: Arc::new(Aes256CbcCipher),
            verifier: Arc::new(Ed25519Verifier),
            installer: self.installer.clone(),
        }
    }

    /// Open a device over `store` without provisioning a key.
    pub async fn device<S: Store>(
        &self,
        id: &str,
        store: S,
        config: DeviceConfig,
    ) -> fadeabe::Result<Device<S>> {
        Device::open(
            DeviceId::new(id),
            self.registry.clone(),
            store,
            self.collaborators(),
            self.authority.signing_key(),
            self.clock.clone(),
            config,
        )
        .await
    }

    /// Open a device and provision it with [`device_attributes`].
    pub async fn provisioned_device<S: Store>(
        &self,
        id: &str,
        store: S,
        config: DeviceConfig,
    ) -> fadeabe::Result<Device<S>> {
        let device = self.device(id, store, config).await?;
        let key = self
            .authority
            .issue_key(device.id(), &device_attributes())?;
        device.provision(key).await?;
        Ok(device)
    }

    /// Advance the shared clock.
    pub fn advance(&self, ms: i64) -> i64 {
        self.clock.advance(ms)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
