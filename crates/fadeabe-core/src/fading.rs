//! Fading functions: deterministic time-to-token mappings for dynamic
//! attributes.
//!
//! A fading function splits time after its `base_time` into fixed windows and
//! names each window. A key that embeds the token of window `i` stops
//! matching freshly computed tokens once the clock enters window `i + 1`.
//!
//! | variant      | window length           | raw token                     |
//! |--------------|-------------------------|-------------------------------|
//! | `Linear`     | `lifetime`              | `{name}_{i}`                  |
//! | `Step`       | `lifetime / steps`      | `{name}_step{min(i, steps)}`  |
//! | `Location`   | `lifetime / granularity`| `loc_{id}_{granularity}_{i}`  |
//! | `HardExpiry` | `lifetime`              | `{name}_{i}` or `{name}_expired` once `i > max_renewals` |
//!
//! Raw tokens are sanitized before use, so `subscription_2` becomes
//! `SUBSCRIPTION2`.

use serde::{Deserialize, Serialize};

use crate::attribute::{sanitize, Attribute};
use crate::error::{CoreError, Result};

/// Raw suffix of a hard-expiry token.
pub const EXPIRED_SUFFIX: &str = "_expired";

/// The variant-specific parameters of a fading function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FadingKind {
    /// One window per `lifetime_ms`.
    Linear { lifetime_ms: i64 },
    /// `steps` windows spread over `lifetime_ms`; the last one never ends.
    Step { lifetime_ms: i64, steps: u32 },
    /// Windows of `lifetime_ms / granularity`; finer locations fade faster.
    Location {
        location_id: String,
        granularity: u32,
        lifetime_ms: i64,
    },
    /// Like `Linear`, but permanently expired after `max_renewals` windows.
    HardExpiry {
        lifetime_ms: i64,
        max_renewals: Option<u32>,
    },
}

/// A fading function bound to an attribute name and a base time.
///
/// Only constructed through [`FadingFunction::new`] and friends, so the
/// window length is always positive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FadingFunction {
    name: String,
    base_time: i64,
    kind: FadingKind,
}

/// Window index and the bounds of that window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Zero-based window index, after any cap.
    pub index: i64,
    /// End of the window (exclusive, Unix ms). `None` if it never ends.
    pub ends_at: Option<i64>,
}

impl FadingFunction {
    /// A linear fading function.
    pub fn linear(name: &str, lifetime_ms: i64, base_time: i64) -> Result<Self> {
        Self::new(name.to_string(), base_time, FadingKind::Linear { lifetime_ms })
    }

    /// A step fading function.
    pub fn step(name: &str, lifetime_ms: i64, steps: u32, base_time: i64) -> Result<Self> {
        Self::new(
            name.to_string(),
            base_time,
            FadingKind::Step { lifetime_ms, steps },
        )
    }

    /// A location fading function. The attribute name is derived from the
    /// location id and granularity.
    pub fn location(
        location_id: &str,
        granularity: u32,
        lifetime_ms: i64,
        base_time: i64,
    ) -> Result<Self> {
        Self::new(
            format!("loc_{}_{}", location_id, granularity),
            base_time,
            FadingKind::Location {
                location_id: location_id.to_string(),
                granularity,
                lifetime_ms,
            },
        )
    }

    /// A hard-expiry fading function.
    pub fn hard_expiry(
        name: &str,
        lifetime_ms: i64,
        max_renewals: Option<u32>,
        base_time: i64,
    ) -> Result<Self> {
        Self::new(
            name.to_string(),
            base_time,
            FadingKind::HardExpiry {
                lifetime_ms,
                max_renewals,
            },
        )
    }

    /// Build from parts, validating the parameters.
    pub fn new(name: String, base_time: i64, kind: FadingKind) -> Result<Self> {
        let invalid = |reason: &str| CoreError::InvalidFadingFunction {
            name: name.clone(),
            reason: reason.to_string(),
        };

        if sanitize(&name).is_empty() {
            return Err(invalid("name is empty after sanitization"));
        }
        let window = match &kind {
            FadingKind::Linear { lifetime_ms } | FadingKind::HardExpiry { lifetime_ms, .. } => {
                *lifetime_ms
            }
            FadingKind::Step { lifetime_ms, steps } => {
                if *steps == 0 {
                    return Err(invalid("steps must be positive"));
                }
                lifetime_ms / i64::from(*steps)
            }
            FadingKind::Location {
                granularity,
                lifetime_ms,
                ..
            } => {
                if *granularity == 0 {
                    return Err(invalid("granularity must be positive"));
                }
                lifetime_ms / i64::from(*granularity)
            }
        };
        if window <= 0 {
            return Err(invalid("window length must be at least 1 ms"));
        }

        Ok(Self {
            name,
            base_time,
            kind,
        })
    }

    /// The logical attribute name, unsanitized.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start of window zero (Unix ms).
    pub fn base_time(&self) -> i64 {
        self.base_time
    }

    /// The variant parameters.
    pub fn kind(&self) -> &FadingKind {
        &self.kind
    }

    /// Full lifetime of the function.
    pub fn lifetime_ms(&self) -> i64 {
        match &self.kind {
            FadingKind::Linear { lifetime_ms }
            | FadingKind::Step { lifetime_ms, .. }
            | FadingKind::Location { lifetime_ms, .. }
            | FadingKind::HardExpiry { lifetime_ms, .. } => *lifetime_ms,
        }
    }

    /// Maximum number of renewals, if this function limits them.
    pub fn max_renewals(&self) -> Option<u32> {
        match &self.kind {
            FadingKind::HardExpiry { max_renewals, .. } => *max_renewals,
            _ => None,
        }
    }

    /// Length of one window in milliseconds.
    pub fn window_ms(&self) -> i64 {
        match &self.kind {
            FadingKind::Linear { lifetime_ms } | FadingKind::HardExpiry { lifetime_ms, .. } => {
                *lifetime_ms
            }
            FadingKind::Step { lifetime_ms, steps } => lifetime_ms / i64::from(*steps),
            FadingKind::Location {
                granularity,
                lifetime_ms,
                ..
            } => lifetime_ms / i64::from(*granularity),
        }
    }

    /// The window containing `now`.
    ///
    /// Times before `base_time` fall in window zero, which keeps the index
    /// non-decreasing over all of time.
    pub fn window_at(&self, now: i64) -> Window {
        let window = self.window_ms();
        let elapsed = now.saturating_sub(self.base_time).max(0);
        let raw = elapsed / window;

        match &self.kind {
            FadingKind::Step { steps, .. } if raw >= i64::from(*steps) => Window {
                index: i64::from(*steps),
                ends_at: None,
            },
            FadingKind::HardExpiry {
                max_renewals: Some(max),
                ..
            } if raw > i64::from(*max) => Window {
                index: raw,
                ends_at: None,
            },
            _ => Window {
                index: raw,
                ends_at: Some(
                    self.base_time
                        .saturating_add(raw.saturating_add(1).saturating_mul(window)),
                ),
            },
        }
    }

    /// Whether the function has passed its renewal limit at `now`.
    pub fn is_exhausted_at(&self, now: i64) -> bool {
        match &self.kind {
            FadingKind::HardExpiry {
                max_renewals: Some(max),
                ..
            } => self.window_at(now).index > i64::from(*max),
            _ => false,
        }
    }

    /// The unsanitized token for `now`.
    pub fn raw_value(&self, now: i64) -> String {
        let index = self.window_at(now).index;
        match &self.kind {
            FadingKind::Linear { .. } => format!("{}_{}", self.name, index),
            FadingKind::Step { .. } => format!("{}_step{}", self.name, index),
            FadingKind::Location {
                location_id,
                granularity,
                ..
            } => format!("loc_{}_{}_{}", location_id, granularity, index),
            FadingKind::HardExpiry { .. } => {
                if self.is_exhausted_at(now) {
                    format!("{}{}", self.name, EXPIRED_SUFFIX)
                } else {
                    format!("{}_{}", self.name, index)
                }
            }
        }
    }

    /// The sanitized token for `now`.
    pub fn compute_current_value(&self, now: i64) -> Attribute {
        // The name was checked non-empty after sanitization in `new`.
        Attribute::from_token(sanitize(&self.raw_value(now)))
    }

    /// The sanitized expired token, if this function has one.
    pub fn expired_token(&self) -> Option<Attribute> {
        match &self.kind {
            FadingKind::HardExpiry { .. } => Some(Attribute::from_token(sanitize(&format!(
                "{}{}",
                self.name, EXPIRED_SUFFIX
            )))),
            _ => None,
        }
    }

    /// Whether `token` is the current value at `now`.
    ///
    /// Expired tokens are never valid, even when they equal the current value.
    pub fn is_valid(&self, token: &Attribute, now: i64) -> bool {
        if self.expired_token().as_ref() == Some(token) {
            return false;
        }
        *token == self.compute_current_value(now)
    }
}
