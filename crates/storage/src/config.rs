//! Retry configuration for storage access.
//!
//! Two independent policies exist because the two failure classes need
//! different handling:
//!
//! - [`RetryConfig`] governs transient failures (connection loss, timeouts) with exponential
//!   backoff.
//! - [`CasRetryConfig`] governs compare-and-set conflicts, where the operation re-reads and
//!   re-validates with a short jittered pause.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(50)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(2)
}

fn default_cas_max_retries() -> u32 {
    32
}

fn default_cas_base_delay() -> Duration {
    Duration::from_millis(1)
}

/// Backoff policy for transient storage failures.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use keyward_storage::RetryConfig;
///
/// let config = RetryConfig::builder().max_retries(5).build();
/// assert_eq!(config.max_retries, 5);
/// assert_eq!(config.initial_backoff, Duration::from_millis(50));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the first attempt. Zero disables retry.
    #[serde(default = "default_max_retries")]
    #[builder(default = default_max_retries())]
    pub max_retries: u32,

    /// Delay before the first retry; doubles on each subsequent retry.
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    #[builder(default = default_initial_backoff())]
    pub initial_backoff: Duration,

    /// Upper bound on the computed delay, before jitter.
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    #[builder(default = default_max_backoff())]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

/// Policy for re-running a read-modify-write cycle after a CAS conflict.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CasRetryConfig {
    /// Re-runs after the first attempt.
    #[serde(default = "default_cas_max_retries")]
    #[builder(default = default_cas_max_retries())]
    pub max_retries: u32,

    /// Base pause between attempts; up to the same amount of jitter is added.
    #[serde(with = "humantime_serde", default = "default_cas_base_delay")]
    #[builder(default = default_cas_base_delay())]
    pub base_delay: Duration,
}

impl Default for CasRetryConfig {
    fn default() -> Self {
        Self { max_retries: default_cas_max_retries(), base_delay: default_cas_base_delay() }
    }
}
