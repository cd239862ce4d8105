//! Strong type definitions for fadeabe.
//!
//! Identifiers are newtypes so a device id cannot be passed where an update
//! id is expected.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;

/// Identifier of a device (one secret key holder).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap a device identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a published update.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UpdateId(String);

impl UpdateId {
    /// Wrap an update identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random identifier (16 random bytes, hex).
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::random();
        Self(hex::encode(bytes))
    }

    /// The identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UpdateId({})", self.0)
    }
}

impl fmt::Display for UpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UpdateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A 32-byte SHA3-256 content commitment.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Hash `data`.
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha3_256::digest(data).into())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AsRef<[u8]> for ContentHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// State of one update session.
///
/// The happy path runs top to bottom. `RefundPending` is reachable from any
/// state before `Installed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SessionState {
    Purchased = 0,
    Downloading = 1,
    HashVerified = 2,
    SignatureVerified = 3,
    KeyRecovered = 4,
    PayloadDecrypted = 5,
    Installed = 6,
    Confirmed = 7,
    RefundPending = 8,
    Refunded = 9,
    RefundFailed = 10,
    InstallFailed = 11,
}

impl SessionState {
    /// Convert to the stored discriminant.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a stored discriminant.
    pub fn from_u8(v: u8) -> Option<Self> {
        use SessionState::*;
        Some(match v {
            0 => Purchased,
            1 => Downloading,
            2 => HashVerified,
            3 => SignatureVerified,
            4 => KeyRecovered,
            5 => PayloadDecrypted,
            6 => Installed,
            7 => Confirmed,
            8 => RefundPending,
            9 => Refunded,
            10 => RefundFailed,
            11 => InstallFailed,
            _ => return None,
        })
    }

    /// No further transition will happen.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Confirmed | Self::Refunded | Self::RefundFailed | Self::InstallFailed
        )
    }

    /// A failure in this state is compensated with a refund.
    pub fn is_refundable(self) -> bool {
        matches!(
            self,
            Self::Purchased
                | Self::Downloading
                | Self::HashVerified
                | Self::SignatureVerified
                | Self::KeyRecovered
                | Self::PayloadDecrypted
        )
    }

    /// The update reached the device.
    pub fn is_installed(self) -> bool {
        matches!(self, Self::Installed | Self::Confirmed)
    }

    /// Upper-case name as shown in logs and stored rows.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Purchased => "PURCHASED",
            Self::Downloading => "DOWNLOADING",
            Self::HashVerified => "HASH_VERIFIED",
            Self::SignatureVerified => "SIGNATURE_VERIFIED",
            Self::KeyRecovered => "KEY_RECOVERED",
            Self::PayloadDecrypted => "PAYLOAD_DECRYPTED",
            Self::Installed => "INSTALLED",
            Self::Confirmed => "CONFIRMED",
            Self::RefundPending => "REFUND_PENDING",
            Self::Refunded => "REFUNDED",
            Self::RefundFailed => "REFUND_FAILED",
            Self::InstallFailed => "INSTALL_FAILED",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
