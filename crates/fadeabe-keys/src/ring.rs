//! Device-side owner of a secret key.
//!
//! All mutation goes through the ring's write lock, so two renewals of the
//! same attribute cannot interleave their remove and insert. Decryptions take
//! a snapshot under the read lock and run the pairing work off the async
//! runtime.

use std::sync::Arc;

use fadeabe_abe::{self as abe, AbeError, Ciphertext, Message};
use fadeabe_core::{DeviceId, FadingRegistry};
use fadeabe_store::Store;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::authority::KeyAuthority;
use crate::config::{ExpiryPolicy, KeyConfig};
use crate::error::{KeyError, Result};
use crate::key::{self, RenewalDescriptor, SecretKey, Validity};

/// The single writer for one device's key.
pub struct KeyRing {
    device: DeviceId,
    registry: Arc<FadingRegistry>,
    config: KeyConfig,
    key: RwLock<Option<SecretKey>>,
}

impl KeyRing {
    /// An empty ring for `device`.
    pub fn new(device: DeviceId, registry: Arc<FadingRegistry>, config: KeyConfig) -> Self {
        Self {
            device,
            registry,
            config,
            key: RwLock::new(None),
        }
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Install `key`, replacing any current key.
    pub async fn install(&self, key: SecretKey) -> Result<()> {
        if key.device != self.device {
            return Err(KeyError::WrongDevice {
                expected: self.device.to_string(),
                got: key.device.to_string(),
            });
        }
        *self.key.write().await = Some(key);
        Ok(())
    }

    /// A copy of the current key.
    pub async fn snapshot(&self) -> Option<SecretKey> {
        self.key.read().await.clone()
    }

    pub async fn has_key(&self) -> bool {
        self.key.read().await.is_some()
    }

    /// Classify the key's dynamic attributes at `now`.
    pub async fn check_validity(&self, now: i64) -> Result<Validity> {
        let guard = self.key.read().await;
        let key = guard.as_ref().ok_or(KeyError::NoKey)?;
        Ok(key::check_validity(key, &self.registry, now))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Renewal
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist `key` to `store`, then install it.
    pub async fn provision<S: Store + ?Sized>(&self, key: SecretKey, store: &S, now: i64) -> Result<()> {
        if key.device != self.device {
            return Err(KeyError::WrongDevice {
                expected: self.device.to_string(),
                got: key.device.to_string(),
            });
        }
        let mut guard = self.key.write().await;
        self.commit(&mut guard, key, store, now).await
    }

    /// Merge a renewal descriptor into the current key and persist it.
    pub async fn apply_renewal<S: Store + ?Sized>(
        &self,
        renewal: &RenewalDescriptor,
        store: &S,
        now: i64,
    ) -> Result<()> {
        let mut guard = self.key.write().await;
        let current = guard.as_ref().ok_or(KeyError::NoKey)?;
        let next = key::merge(current, renewal)?;
        self.commit(&mut guard, next, store, now).await?;
        info!(
            device = %self.device,
            attribute = %renewal.attribute,
            value = %renewal.value,
            "merged renewal"
        );
        Ok(())
    }

    /// Request a renewal of `name` from `authority`, merge it and persist it.
    ///
    /// The write lock is held from the request through the store write.
    pub async fn renew<S: Store + ?Sized>(
        &self,
        authority: &KeyAuthority,
        name: &str,
        store: &S,
        now: i64,
    ) -> Result<RenewalDescriptor> {
        let mut guard = self.key.write().await;
        let current = guard.as_ref().ok_or(KeyError::NoKey)?;
        let renewal = authority.renew_attribute(current, name, now)?;
        let next = key::merge(current, &renewal)?;
        self.commit(&mut guard, next, store, now).await?;
        info!(
            device = %self.device,
            attribute = %renewal.attribute,
            previous = %renewal.previous,
            value = %renewal.value,
            "renewed attribute"
        );
        Ok(renewal)
    }

    /// Write `next` to `store` and only then make it the current key.
    async fn commit<S: Store + ?Sized>(
        &self,
        slot: &mut Option<SecretKey>,
        next: SecretKey,
        store: &S,
        now: i64,
    ) -> Result<()> {
        store.put_key(&self.device, &next.to_bytes()?, now).await?;
        *slot = Some(next);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Decryption
    // ─────────────────────────────────────────────────────────────────────────

    /// Decrypt `ct` with the current key at `now`.
    ///
    /// Expired attributes are checked before any pairing runs. Which expired
    /// attributes block is set by [`KeyConfig::expiry_policy`]. If the pairing
    /// decrypt reports an unsatisfied policy while the key holds expired
    /// attributes, the failure is reported as [`KeyError::AttributeExpired`].
    pub async fn decrypt(&self, ct: &Ciphertext, now: i64) -> Result<Message> {
        let key = self.snapshot().await.ok_or(KeyError::NoKey)?;
        let validity = key::check_validity(&key, &self.registry, now);

        if !validity.is_fully_valid() {
            let blocking: Vec<String> = match self.config.expiry_policy {
                ExpiryPolicy::AnyDynamic => validity.expired_names(),
                ExpiryPolicy::PolicyLiterals => {
                    let literals = ct.policy().literals();
                    validity
                        .expired
                        .iter()
                        .filter(|(_, token)| literals.contains(*token))
                        .map(|(name, _)| name.to_string())
                        .collect()
                }
            };
            if !blocking.is_empty() {
                debug!(device = %self.device, expired = ?blocking, "decrypt blocked by expired attributes");
                return Err(KeyError::AttributeExpired { names: blocking });
            }
        }

        let components = key.components.clone();
        let ct = ct.clone();
        let result = tokio::task::spawn_blocking(move || abe::decrypt(&components, &ct))
            .await
            .map_err(|e| KeyError::Fatal(format!("decrypt task failed: {}", e)))?;

        match result {
            Ok(message) => Ok(message),
            Err(AbeError::PolicyUnsatisfied) if !validity.is_fully_valid() => {
                Err(KeyError::AttributeExpired {
                    names: validity.expired_names(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────────

    /// Load the device's key from `store`. Returns whether a key was found.
    pub async fn load<S: Store + ?Sized>(&self, store: &S) -> Result<bool> {
        match store.get_key(&self.device).await? {
            Some(bytes) => {
                let key = SecretKey::from_bytes(&bytes)?;
                self.install(key).await?;
                debug!(device = %self.device, "loaded secret key");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
