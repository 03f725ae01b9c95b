//! Retry budget for network-classified step errors.

use serde::{Deserialize, Serialize};

/// Default number of retries granted per tracker before a network error turns fatal.
pub const DEFAULT_MAX_RETRIES: u32 = 10;
/// Delay used when the source gave no `Retry-After` hint.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 30;
/// Upper bound on any single retry delay.
pub const DEFAULT_MAX_RETRY_DELAY_SECS: u64 = 300;

/// Retry budget consulted by the runner's retriability predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_delay_secs")]
    pub default_delay_secs: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_delay_secs() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}

fn default_max_delay_secs() -> u64 {
    DEFAULT_MAX_RETRY_DELAY_SECS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            default_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            max_delay_secs: DEFAULT_MAX_RETRY_DELAY_SECS,
        }
    }
}

impl RetryPolicy {
    /// Whether the `attempt`-th retry (1-based) still fits in the budget.
    #[must_use]
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}
