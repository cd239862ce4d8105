//! Attribute tokens and sanitization.
//!
//! Every attribute value that is compared, hashed into a policy, or embedded
//! in a key passes through [`sanitize`] first. The function is lossy on
//! purpose: separators and punctuation disappear, so `MODEL:ABC123` and
//! `model_abc123` name the same token.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// Normalize a raw attribute value: trim, uppercase, keep only `[A-Z0-9]`.
///
/// Idempotent: `sanitize(&sanitize(x)) == sanitize(x)`.
pub fn sanitize(raw: &str) -> String {
    raw.trim()
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .collect()
}

/// Tokens that would read back as policy operators.
const RESERVED: [&str; 2] = ["AND", "OR"];

/// A sanitized, non-empty attribute token.
///
/// Construction always sanitizes, so two `Attribute`s are equal exactly when
/// their sanitized forms are. `AND` and `OR` are refused so every policy
/// prints in a form that parses back.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Attribute(String);

impl Attribute {
    /// Sanitize `raw` into an attribute token.
    pub fn new(raw: &str) -> Result<Self> {
        let token = sanitize(raw);
        if token.is_empty() || RESERVED.contains(&token.as_str()) {
            return Err(CoreError::InvalidAttribute(raw.to_string()));
        }
        Ok(Self(token))
    }

    /// Wrap a token already known to be sanitized and non-empty.
    pub(crate) fn from_token(token: String) -> Self {
        debug_assert!(!token.is_empty() && sanitize(&token) == token);
        Self(token)
    }

    /// The sanitized token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw bytes of the token, as hashed into the pairing group.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Attribute({})", self.0)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Attribute {
    type Error = CoreError;

    fn try_from(raw: String) -> Result<Self> {
        Self::new(&raw)
    }
}

impl From<Attribute> for String {
    fn from(attr: Attribute) -> Self {
        attr.0
    }
}

impl std::str::FromStr for Attribute {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sanitize_strips_separators() {
        assert_eq!(sanitize("  model:abc_123 "), "MODELABC123");
        assert_eq!(sanitize("subscription_0"), "SUBSCRIPTION0");
        assert_eq!(sanitize("loc_seoul_2_1"), "LOCSEOUL21");
    }

    #[test]
    fn test_attribute_equality_after_sanitize() {
        let a = Attribute::new("MODEL:ABC123").unwrap();
        let b = Attribute::new("model_abc123").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "MODELABC123");
    }

    #[test]
    fn test_empty_attribute_rejected() {
        assert!(matches!(
            Attribute::new("__::"),
            Err(CoreError::InvalidAttribute(_))
        ));
    }

    #[test]
    fn test_operator_words_rejected() {
        for raw in ["and", "Or", " a:n-d ", "o_r"] {
            assert!(matches!(
                Attribute::new(raw),
                Err(CoreError::InvalidAttribute(_))
            ));
        }
        assert!(Attribute::new("android").is_ok());
        assert!(Attribute::new("or0").is_ok());
    }

    #[test]
    fn test_attribute_serde_resanitizes() {
        let attr: Attribute = serde_json::from_str("\"warranty_3\"").unwrap();
        assert_eq!(attr.as_str(), "WARRANTY3");
        assert!(serde_json::from_str::<Attribute>("\"--\"").is_err());
    }

    proptest! {
        #[test]
        fn sanitize_is_idempotent(raw in ".{0,64}") {
            let once = sanitize(&raw);
            prop_assert_eq!(sanitize(&once), once.clone());
            prop_assert!(once.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }
}
