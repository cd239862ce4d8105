//! The key authority: issuance, renewal and policy encryption.
//!
//! The authority owns the master secret and one record per device holding
//! the key randomness `r`. Renewal components are generated under that same
//! `r`, which is what lets a device splice them into its existing key.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use fadeabe_abe::{
    self as abe, Ciphertext, KeyRandomness, MasterSecret, Message, PublicParams,
};
use fadeabe_core::{Attribute, CoreError, DeviceId, ExpirySpec, FadingRegistry, Policy};
use tracing::{debug, info};

use crate::config::KeyConfig;
use crate::error::{KeyError, Result};
use crate::key::{ExpiryInfo, RenewalDescriptor, SecretKey};

/// How one attribute of a new key gets its token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// A fixed value, embedded under `sanitize(value)`.
    Static(String),
    /// A registered fading attribute, embedded under its current token.
    Dynamic,
    /// Embedded under the sanitized attribute name until the given time.
    Expiring(ExpirySpec),
}

/// Issues keys and renewal components, and encrypts under resolved policies.
pub struct KeyAuthority {
    pk: PublicParams,
    msk: MasterSecret,
    registry: Arc<FadingRegistry>,
    config: KeyConfig,
    users: RwLock<HashMap<DeviceId, KeyRandomness>>,
}

impl KeyAuthority {
    /// Run scheme setup and create an authority with no devices.
    pub fn setup(registry: Arc<FadingRegistry>, config: KeyConfig) -> Result<Self> {
        let (pk, msk) = abe::setup()?;
        info!(dynamic = registry.names().count(), "key authority initialized");
        Ok(Self::from_parts(pk, msk, registry, config))
    }

    /// Create an authority from existing scheme parameters.
    pub fn from_parts(
        pk: PublicParams,
        msk: MasterSecret,
        registry: Arc<FadingRegistry>,
        config: KeyConfig,
    ) -> Self {
        Self {
            pk,
            msk,
            registry,
            config,
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Public parameters to hand to devices.
    pub fn public_params(&self) -> &PublicParams {
        &self.pk
    }

    /// The fading registry shared with devices.
    pub fn registry(&self) -> &Arc<FadingRegistry> {
        &self.registry
    }

    /// Whether a user record exists for `device`.
    pub fn knows(&self, device: &DeviceId) -> bool {
        self.users
            .read()
            .map(|users| users.contains_key(device))
            .unwrap_or(false)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Issuance
    // ─────────────────────────────────────────────────────────────────────────

    /// Issue a key for `device`.
    ///
    /// Reissuing for a known device replaces its randomness, so renewal
    /// components for the previous key no longer fit.
    pub fn issue(
        &self,
        device: &DeviceId,
        attributes: &BTreeMap<String, AttributeValue>,
        now: i64,
    ) -> Result<SecretKey> {
        let mut tokens: BTreeMap<Attribute, &str> = BTreeMap::new();
        let mut dynamic_attributes = BTreeMap::new();
        let mut expiry_info = BTreeMap::new();

        for (name, value) in attributes {
            let token = match value {
                AttributeValue::Static(raw) => Attribute::new(raw)?,
                AttributeValue::Dynamic => {
                    let function = self
                        .registry
                        .get(name)
                        .ok_or_else(|| CoreError::UnknownAttribute(name.clone()))?;
                    if function.is_exhausted_at(now) {
                        return Err(KeyError::RenewalLimitReached {
                            name: name.clone(),
                            renewals: function.max_renewals().unwrap_or(0),
                        });
                    }
                    let token = function.compute_current_value(now);
                    dynamic_attributes.insert(Attribute::new(name)?, token.clone());
                    expiry_info.insert(
                        Attribute::new(name)?,
                        ExpiryInfo {
                            expiry_time: function.window_at(now).ends_at,
                            max_renewals: function.max_renewals(),
                            current_renewals: 0,
                        },
                    );
                    token
                }
                AttributeValue::Expiring(spec) => {
                    let at = spec.resolve(self.config.expiry_offset)?;
                    let token = Attribute::new(name)?;
                    dynamic_attributes.insert(token.clone(), token.clone());
                    expiry_info.insert(
                        token.clone(),
                        ExpiryInfo {
                            expiry_time: Some(at),
                            max_renewals: None,
                            current_renewals: 0,
                        },
                    );
                    token
                }
            };

            if let Some(first) = tokens.get(&token) {
                return Err(CoreError::AttributeCollision {
                    first: (*first).to_string(),
                    second: name.clone(),
                    token: token.to_string(),
                }
                .into());
            }
            tokens.insert(token, name);
        }

        let r = KeyRandomness::generate();
        let held: BTreeSet<Attribute> = tokens.into_keys().collect();
        let components = abe::keygen_with_randomness(&self.pk, &self.msk, &r, &held)?;

        self.users
            .write()
            .map_err(|e| KeyError::Fatal(format!("user table poisoned: {}", e)))?
            .insert(device.clone(), r);

        debug!(
            device = %device,
            attributes = held.len(),
            dynamic = dynamic_attributes.len(),
            "issued secret key"
        );

        Ok(SecretKey {
            device: device.clone(),
            components,
            dynamic_attributes,
            expiry_info,
            history: Vec::new(),
            issued_at: now,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Renewal
    // ─────────────────────────────────────────────────────────────────────────

    /// Produce a fresh component for the dynamic attribute `name` of `key`.
    ///
    /// Only the one attribute is regenerated. The descriptor names the token
    /// it replaces so a stale descriptor cannot be merged later. A request in
    /// the window the key already holds is a refresh: it is not held to the
    /// renewal limit and [`merge`](crate::merge) does not count it.
    pub fn renew_attribute(&self, key: &SecretKey, name: &str, now: i64) -> Result<RenewalDescriptor> {
        let logical = Attribute::new(name)?;
        let function = self
            .registry
            .get(name)
            .ok_or_else(|| KeyError::NotDynamic(name.to_string()))?;
        let previous = key
            .dynamic_attributes
            .get(&logical)
            .ok_or_else(|| KeyError::NotDynamic(name.to_string()))?;

        let renewals = key
            .expiry_info
            .get(&logical)
            .map(|info| info.current_renewals)
            .unwrap_or(0);
        let value = function.compute_current_value(now);
        let refresh = value == *previous;
        let over_limit = !refresh && function.max_renewals().is_some_and(|max| renewals >= max);
        if over_limit || function.is_exhausted_at(now) {
            return Err(KeyError::RenewalLimitReached {
                name: logical.to_string(),
                renewals,
            });
        }

        let users = self
            .users
            .read()
            .map_err(|e| KeyError::Fatal(format!("user table poisoned: {}", e)))?;
        let r = users
            .get(&key.device)
            .ok_or_else(|| KeyError::UnknownDevice(key.device.to_string()))?;

        let component = abe::keygen_component(&self.pk, r, &value)?;

        debug!(
            device = %key.device,
            attribute = %logical,
            previous = %previous,
            value = %value,
            "issued renewal component"
        );

        Ok(RenewalDescriptor {
            device: key.device.clone(),
            attribute: logical,
            previous: previous.clone(),
            value,
            component,
            expiry_time: function.window_at(now).ends_at,
            issued_at: now,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Encryption
    // ─────────────────────────────────────────────────────────────────────────

    /// Encrypt under a policy string, resolving dynamic literals at `now`.
    pub fn encrypt(&self, message: &Message, policy: &str, now: i64) -> Result<Ciphertext> {
        self.encrypt_policy(message, &Policy::parse(policy)?, now)
    }

    /// Encrypt under the conjunction of `attributes`.
    pub fn encrypt_attributes<I, S>(&self, message: &Message, attributes: I, now: i64) -> Result<Ciphertext>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.encrypt_policy(message, &Policy::all_of(attributes)?, now)
    }

    /// Encrypt under a parsed policy, resolving dynamic literals at `now`.
    pub fn encrypt_policy(&self, message: &Message, policy: &Policy, now: i64) -> Result<Ciphertext> {
        let resolved = self.registry.resolve_policy(policy, now)?;
        debug!(policy = %resolved, "encrypting under resolved policy");
        Ok(abe::encrypt(&self.pk, message, &resolved)?)
    }
}
