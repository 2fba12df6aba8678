//! Retry policy normalization.
//!
//! A job declares its retry behaviour loosely ([`RetrySpec`]); the executor
//! only ever sees the canonical [`RetryConfig`]. Normalization never fails:
//! every declared form has exactly one canonical meaning.
//!
//! A non-positive attempt count means "discard on first failure", the same
//! as `retry: false`. It never means "zero retries, then dead-letter".

use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

/// Attempts allowed when a job declares nothing (or only `dead`).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 25;

/// Retry configuration as declared on a job definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<RetrySpecRepr>", into = "Option<RetrySpecRepr>")]
pub enum RetrySpec {
    /// Nothing declared.
    #[default]
    Default,
    /// `retry: false`.
    Disabled,
    /// `retry: <n>`.
    Attempts(i64),
    /// `retry: { maxAttempts?, dead? }`.
    Custom {
        max_attempts: Option<i64>,
        dead: Option<bool>,
    },
}

/// Wire shape: `null | false | true | <int> | { maxAttempts?, dead? }`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
enum RetrySpecRepr {
    Flag(bool),
    Attempts(i64),
    Custom {
        #[serde(rename = "maxAttempts", default, skip_serializing_if = "Option::is_none")]
        max_attempts: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dead: Option<bool>,
    },
}

impl From<Option<RetrySpecRepr>> for RetrySpec {
    fn from(value: Option<RetrySpecRepr>) -> Self {
        match value {
            None | Some(RetrySpecRepr::Flag(true)) => RetrySpec::Default,
            Some(RetrySpecRepr::Flag(false)) => RetrySpec::Disabled,
            Some(RetrySpecRepr::Attempts(n)) => RetrySpec::Attempts(n),
            Some(RetrySpecRepr::Custom { max_attempts, dead }) => {
                RetrySpec::Custom { max_attempts, dead }
            }
        }
    }
}

impl From<RetrySpec> for Option<RetrySpecRepr> {
    fn from(value: RetrySpec) -> Self {
        match value {
            RetrySpec::Default => None,
            RetrySpec::Disabled => Some(RetrySpecRepr::Flag(false)),
            RetrySpec::Attempts(n) => Some(RetrySpecRepr::Attempts(n)),
            RetrySpec::Custom { max_attempts, dead } => {
                Some(RetrySpecRepr::Custom { max_attempts, dead })
            }
        }
    }
}

impl RetrySpec {
    pub fn attempts(n: i64) -> Self {
        Self::Attempts(n)
    }

    pub fn custom(max_attempts: Option<i64>, dead: Option<bool>) -> Self {
        Self::Custom { max_attempts, dead }
    }

    /// Canonical form of this declaration.
    pub fn normalize(self) -> RetryConfig {
        match self {
            RetrySpec::Disabled => RetryConfig::disabled(),
            RetrySpec::Attempts(n) if n <= 0 => RetryConfig::disabled(),
            RetrySpec::Attempts(n) => RetryConfig::limited(clamp(n), true),
            RetrySpec::Default => RetryConfig::default(),
            RetrySpec::Custom { max_attempts, dead } => {
                let max = max_attempts.unwrap_or(i64::from(DEFAULT_MAX_ATTEMPTS));
                if max <= 0 {
                    RetryConfig::disabled()
                } else {
                    RetryConfig::limited(clamp(max), dead.unwrap_or(true))
                }
            }
        }
    }
}

fn clamp(n: i64) -> NonZeroU32 {
    let n = u32::try_from(n).unwrap_or(u32::MAX).max(1);
    NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN)
}

/// Upper bound on attempts for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaxAttempts {
    /// Any failure is final.
    Disabled,
    Limited(NonZeroU32),
}

/// Canonical retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RetryConfig {
    pub max_attempts: MaxAttempts,
    /// Route to dead-letter (instead of discarding) once attempts run out.
    pub dead_letter_on_exhaustion: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::limited(clamp(i64::from(DEFAULT_MAX_ATTEMPTS)), true)
    }
}

impl RetryConfig {
    pub fn disabled() -> Self {
        Self {
            max_attempts: MaxAttempts::Disabled,
            dead_letter_on_exhaustion: false,
        }
    }

    pub fn limited(max_attempts: NonZeroU32, dead_letter_on_exhaustion: bool) -> Self {
        Self {
            max_attempts: MaxAttempts::Limited(max_attempts),
            dead_letter_on_exhaustion,
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self.max_attempts, MaxAttempts::Disabled)
    }

    /// Attempt limit, `None` when retries are disabled.
    pub fn limit(&self) -> Option<u32> {
        match self.max_attempts {
            MaxAttempts::Disabled => None,
            MaxAttempts::Limited(n) => Some(n.get()),
        }
    }

    /// Re-express as a declaration that normalizes back to `self`.
    pub fn to_spec(self) -> RetrySpec {
        match self.max_attempts {
            MaxAttempts::Disabled => RetrySpec::Disabled,
            MaxAttempts::Limited(n) => RetrySpec::Custom {
                max_attempts: Some(i64::from(n.get())),
                dead: Some(self.dead_letter_on_exhaustion),
            },
        }
    }
}

impl From<RetrySpec> for RetryConfig {
    fn from(spec: RetrySpec) -> Self {
        spec.normalize()
    }
}
