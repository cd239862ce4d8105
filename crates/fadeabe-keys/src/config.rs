//! Key manager configuration.

use chrono::FixedOffset;
use fadeabe_core::default_expiry_offset;

/// Which expired attributes block a decryption before any pairing runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpiryPolicy {
    /// Block only if an expired attribute's embedded token is one of the
    /// ciphertext policy's literals.
    #[default]
    PolicyLiterals,
    /// Block if any dynamic attribute of the key has expired.
    AnyDynamic,
}

/// Configuration for issuing and using keys.
#[derive(Debug, Clone)]
pub struct KeyConfig {
    /// Pre-decrypt expiry short-circuit rule.
    pub expiry_policy: ExpiryPolicy,
    /// Offset used to read date-string expiries.
    pub expiry_offset: FixedOffset,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            expiry_policy: ExpiryPolicy::default(),
            expiry_offset: default_expiry_offset(),
        }
    }
}
