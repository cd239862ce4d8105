//! Secret keys that mix static and time-fading attributes.
//!
//! A [`SecretKey`] wraps the pairing key components with the bookkeeping the
//! scheme itself cannot see: which token each dynamic attribute currently
//! embeds, when that token stops being current, and how often it has been
//! renewed. Keys change only through [`merge`].

use fadeabe_abe::{KeyComponent, SecretKeyComponents};
use fadeabe_core::{Attribute, CoreError, DeviceId, FadingRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{KeyError, Result};

/// Expiry bookkeeping for one dynamic attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryInfo {
    /// End of the embedded token's window (Unix ms). `None` if it never ends.
    pub expiry_time: Option<i64>,
    pub max_renewals: Option<u32>,
    pub current_renewals: u32,
}

/// One entry of the append-only renewal history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalEntry {
    /// Logical attribute name (sanitized).
    pub attribute: Attribute,
    pub previous: Attribute,
    pub value: Attribute,
    pub at: i64,
}

/// A device's secret key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKey {
    pub(crate) device: DeviceId,
    pub(crate) components: SecretKeyComponents,
    /// Logical name to the token currently embedded for it.
    pub(crate) dynamic_attributes: BTreeMap<Attribute, Attribute>,
    pub(crate) expiry_info: BTreeMap<Attribute, ExpiryInfo>,
    pub(crate) history: Vec<RenewalEntry>,
    pub(crate) issued_at: i64,
}

impl SecretKey {
    /// The device this key was issued to.
    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// The pairing key components.
    pub fn components(&self) -> &SecretKeyComponents {
        &self.components
    }

    /// Logical name to currently embedded token, for every dynamic attribute.
    pub fn dynamic_attributes(&self) -> &BTreeMap<Attribute, Attribute> {
        &self.dynamic_attributes
    }

    /// Token currently embedded for the logical name `name`.
    pub fn embedded_token(&self, name: &str) -> Option<&Attribute> {
        let name = Attribute::new(name).ok()?;
        self.dynamic_attributes.get(&name)
    }

    /// Expiry bookkeeping for the logical name `name`.
    pub fn expiry_info(&self, name: &str) -> Option<&ExpiryInfo> {
        let name = Attribute::new(name).ok()?;
        self.expiry_info.get(&name)
    }

    /// Renewal history, oldest first.
    pub fn history(&self) -> &[RenewalEntry] {
        &self.history
    }

    /// When the key was issued (Unix ms).
    pub fn issued_at(&self) -> i64 {
        self.issued_at
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| KeyError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| KeyError::Serialization(e.to_string()))
    }
}

/// A fresh component for one dynamic attribute, issued by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalDescriptor {
    pub device: DeviceId,
    /// Logical attribute name (sanitized).
    pub attribute: Attribute,
    /// Token the descriptor replaces.
    pub previous: Attribute,
    /// New token.
    pub value: Attribute,
    pub component: KeyComponent,
    pub expiry_time: Option<i64>,
    pub issued_at: i64,
}

impl RenewalDescriptor {
    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| KeyError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| KeyError::Serialization(e.to_string()))
    }
}

/// Dynamic attributes split by whether their embedded token is still current.
///
/// Both maps go from logical name to embedded token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validity {
    pub valid: BTreeMap<Attribute, Attribute>,
    pub expired: BTreeMap<Attribute, Attribute>,
}

impl Validity {
    /// No dynamic attribute has expired.
    pub fn is_fully_valid(&self) -> bool {
        self.expired.is_empty()
    }

    /// Logical names of the expired attributes.
    pub fn expired_names(&self) -> Vec<String> {
        self.expired.keys().map(|a| a.to_string()).collect()
    }
}

/// Classify every dynamic attribute of `key` at `now`.
///
/// An attribute with a recorded `expiry_time` is expired once `now` reaches
/// it, whatever its component says. Without one, the embedded token is
/// compared against the registry's current value; attributes the registry
/// does not know never fade.
pub fn check_validity(key: &SecretKey, registry: &FadingRegistry, now: i64) -> Validity {
    let mut validity = Validity::default();
    for (name, token) in &key.dynamic_attributes {
        let expiry = key.expiry_info.get(name).and_then(|e| e.expiry_time);
        let expired = match expiry {
            Some(at) => now >= at,
            None => match registry.get(name.as_str()) {
                Some(_) => !registry.is_valid(name.as_str(), token, now),
                None => false,
            },
        };
        let bucket = if expired {
            &mut validity.expired
        } else {
            &mut validity.valid
        };
        bucket.insert(name.clone(), token.clone());
    }
    validity
}

/// Apply a renewal, producing the updated key.
///
/// The old token's component is removed and the new one inserted in the
/// same step, so the result holds exactly one component for the attribute.
/// Every other component is carried over unchanged. A descriptor whose
/// `value` equals `previous` refreshes the component without counting as a
/// renewal or entering the history.
pub fn merge(key: &SecretKey, renewal: &RenewalDescriptor) -> Result<SecretKey> {
    if renewal.device != key.device {
        return Err(KeyError::WrongDevice {
            expected: key.device.to_string(),
            got: renewal.device.to_string(),
        });
    }

    let current = key
        .dynamic_attributes
        .get(&renewal.attribute)
        .ok_or_else(|| KeyError::NotDynamic(renewal.attribute.to_string()))?;
    if *current != renewal.previous {
        return Err(KeyError::StaleRenewal {
            name: renewal.attribute.to_string(),
            current: current.to_string(),
            previous: renewal.previous.to_string(),
        });
    }
    if renewal.value != renewal.previous && key.components.contains(&renewal.value) {
        return Err(CoreError::AttributeCollision {
            first: renewal.attribute.to_string(),
            second: renewal.value.to_string(),
            token: renewal.value.to_string(),
        }
        .into());
    }

    let mut next = key.clone();
    next.components.remove(&renewal.previous);
    next.components
        .insert(renewal.value.clone(), renewal.component.clone());
    next.dynamic_attributes
        .insert(renewal.attribute.clone(), renewal.value.clone());

    let info = next
        .expiry_info
        .entry(renewal.attribute.clone())
        .or_insert(ExpiryInfo {
            expiry_time: None,
            max_renewals: None,
            current_renewals: 0,
        });
    info.expiry_time = renewal.expiry_time;
    if renewal.value == renewal.previous {
        return Ok(next);
    }
    info.current_renewals += 1;

    next.history.push(RenewalEntry {
        attribute: renewal.attribute.clone(),
        previous: renewal.previous.clone(),
        value: renewal.value.clone(),
        at: renewal.issued_at,
    });

    Ok(next)
}
