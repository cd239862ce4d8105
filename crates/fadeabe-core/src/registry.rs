//! The fading-function registry.
//!
//! Maps each dynamic attribute's logical name to its bound fading function.
//! The registry is assembled once with [`FadingRegistryBuilder`] and is
//! immutable afterwards; share it behind an `Arc`. Both the encrypting
//! authority and validating devices must consult the same registry with the
//! same clock, or the tokens they compute diverge.

use std::collections::BTreeMap;

use crate::attribute::Attribute;
use crate::error::{CoreError, Result};
use crate::fading::FadingFunction;
use crate::policy::Policy;

/// Builder for a [`FadingRegistry`].
#[derive(Debug, Default)]
pub struct FadingRegistryBuilder {
    functions: BTreeMap<Attribute, FadingFunction>,
}

impl FadingRegistryBuilder {
    /// Start an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fading function under its sanitized name.
    ///
    /// Fails if another function's name sanitizes to the same token.
    pub fn register(mut self, function: FadingFunction) -> Result<Self> {
        let key = Attribute::new(function.name())?;
        if let Some(existing) = self.functions.get(&key) {
            return Err(CoreError::AttributeCollision {
                first: existing.name().to_string(),
                second: function.name().to_string(),
                token: key.to_string(),
            });
        }
        self.functions.insert(key, function);
        Ok(self)
    }

    /// Freeze the registry.
    pub fn build(self) -> FadingRegistry {
        FadingRegistry {
            functions: self.functions,
        }
    }
}

/// Immutable map from dynamic attribute name to fading function.
#[derive(Debug, Clone, Default)]
pub struct FadingRegistry {
    functions: BTreeMap<Attribute, FadingFunction>,
}

impl FadingRegistry {
    /// A registry with no dynamic attributes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start building a registry.
    pub fn builder() -> FadingRegistryBuilder {
        FadingRegistryBuilder::new()
    }

    /// Look up a function by logical name (sanitized before lookup).
    pub fn get(&self, name: &str) -> Option<&FadingFunction> {
        let key = Attribute::new(name).ok()?;
        self.functions.get(&key)
    }

    /// Whether `name` is a registered dynamic attribute.
    pub fn is_dynamic(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sanitized names of all registered attributes.
    pub fn names(&self) -> impl Iterator<Item = &Attribute> {
        self.functions.keys()
    }

    /// Current token of a dynamic attribute.
    pub fn compute_current_value(&self, name: &str, now: i64) -> Result<Attribute> {
        self.get(name)
            .map(|f| f.compute_current_value(now))
            .ok_or_else(|| CoreError::UnknownAttribute(name.to_string()))
    }

    /// Whether `token` is the current value of `name` at `now`.
    ///
    /// Unknown attributes and hard-expiry tokens are never valid.
    pub fn is_valid(&self, name: &str, token: &Attribute, now: i64) -> bool {
        self.get(name).is_some_and(|f| f.is_valid(token, now))
    }

    /// Replace a literal naming a dynamic attribute with its current token.
    /// Static literals pass through unchanged.
    pub fn resolve_literal(&self, literal: &Attribute, now: i64) -> Attribute {
        match self.functions.get(literal) {
            Some(f) => f.compute_current_value(now),
            None => literal.clone(),
        }
    }

    /// Resolve every dynamic literal of a policy.
    pub fn resolve_policy(&self, policy: &Policy, now: i64) -> Result<Policy> {
        policy.map_literals(&mut |lit| Ok(self.resolve_literal(lit, now)))
    }
}
