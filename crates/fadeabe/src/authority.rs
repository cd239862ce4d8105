//! The publishing authority.

use std::collections::BTreeMap;
use std::sync::Arc;

use fadeabe_abe::Message;
use fadeabe_core::{
    Clock, ContentHash, DeviceId, Ed25519PublicKey, Ed25519Signature, FadingRegistry, Keypair,
    UpdateId,
};
use fadeabe_keys::{AttributeValue, KeyAuthority, KeyConfig, RenewalDescriptor, SecretKey};
use fadeabe_pipeline::{BlobPublisher, Ledger, SymmetricCipher, UpdateMetadata};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::info;

use crate::error::Result;

/// Issues device keys and publishes encrypted updates.
///
/// Owns the ABE master secret and the Ed25519 key that signs update
/// records.
pub struct Authority {
    keys: KeyAuthority,
    signer: Keypair,
    ledger: Arc<dyn Ledger>,
    publisher: Arc<dyn BlobPublisher>,
    cipher: Arc<dyn SymmetricCipher>,
    clock: Arc<dyn Clock>,
}

impl Authority {
    /// Run scheme setup and create an authority.
    pub fn setup(
        registry: Arc<FadingRegistry>,
        config: KeyConfig,
        signer: Keypair,
        ledger: Arc<dyn Ledger>,
        publisher: Arc<dyn BlobPublisher>,
        cipher: Arc<dyn SymmetricCipher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self {
            keys: KeyAuthority::setup(registry, config)?,
            signer,
            ledger,
            publisher,
            cipher,
            clock,
        })
    }

    /// The key authority, for issuance and renewal.
    pub fn keys(&self) -> &KeyAuthority {
        &self.keys
    }

    /// Key devices use to verify update signatures.
    pub fn signing_key(&self) -> Ed25519PublicKey {
        self.signer.public_key()
    }

    /// Issue a key for `device` at the current time.
    pub fn issue_key(
        &self,
        device: &DeviceId,
        attributes: &BTreeMap<String, AttributeValue>,
    ) -> Result<SecretKey> {
        Ok(self.keys.issue(device, attributes, self.clock.now_millis())?)
    }

    /// Renew one dynamic attribute of `key` at the current time.
    pub fn renew(&self, key: &SecretKey, name: &str) -> Result<RenewalDescriptor> {
        Ok(self.keys.renew_attribute(key, name, self.clock.now_millis())?)
    }

    /// Encrypt and publish an update readable by devices satisfying `policy`.
    ///
    /// The payload is encrypted under a fresh 256-bit key, the blob is
    /// uploaded and committed by hash, the key is ABE-encrypted under the
    /// resolved policy, and the signed record is registered on the ledger.
    pub async fn publish_update(
        &self,
        payload: &[u8],
        policy: &str,
        version: &str,
        description: &str,
        price: u64,
    ) -> Result<UpdateMetadata> {
        let now = self.clock.now_millis();

        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        let blob = self.cipher.encrypt(&key, payload)?;
        let content_hash = ContentHash::compute(&blob);
        let pointer = self.publisher.upload(&blob).await?;

        let encrypted_key = self
            .keys
            .encrypt(&Message::Bytes(key.to_vec()), policy, now)?
            .to_bytes()?;

        let mut metadata = UpdateMetadata {
            uid: UpdateId::generate(),
            content_hash,
            pointer,
            encrypted_key,
            signature: Ed25519Signature::from_bytes([0; 64]),
            price,
            version: version.to_string(),
            description: description.to_string(),
            created_at: now,
            active: true,
        };
        metadata.sign_with(&self.signer)?;
        let receipt = self.ledger.publish_update(metadata.clone()).await?;
        info!(uid = %metadata.uid, version, tx = %receipt.tx_id, "published update");
        Ok(metadata)
    }
}
