//! Retry helpers for storage access.
//!
//! [`with_retry`] re-runs an operation on transient failures with exponential
//! backoff. [`with_cas_retry`] re-runs a read-modify-write cycle on
//! compare-and-set conflicts. Neither retries anything else: a business
//! failure or a corrupt record is returned on the first attempt.
//!
//! # Backoff Strategy
//!
//! - Base delay doubles with each attempt: `initial_backoff * 2^attempt`
//! - Delay is capped at `max_backoff`
//! - Random jitter of 0–50% of the computed delay is added

use std::{future::Future, time::Duration};

use fail::fail_point;
use rand::Rng;

use crate::{
    config::{CasRetryConfig, RetryConfig},
    error::{StorageError, StorageResult},
};

/// Executes `operation`, retrying transient errors per `config`.
///
/// Returns the first success, the first non-transient error, or the last
/// transient error once retries are exhausted.
///
/// # Errors
///
/// Propagates the error of the final attempt.
#[tracing::instrument(skip(config, operation), fields(max_retries = config.max_retries))]
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "operation succeeded after retry",
                    );
                }
                return Ok(value);
            },
            Err(err) if err.is_transient() && attempt < config.max_retries => {
                let delay = compute_backoff(config, attempt);
                tracing::debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = config.max_retries + 1,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "transient error, retrying after backoff",
                );
                fail_point!("retry-before-sleep");
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(err) => return Err(err),
        }
    }
}

/// Re-runs a read-modify-write cycle on [`StorageError::Conflict`].
///
/// The closure must perform the whole cycle (read, compute, conditional
/// write) so each attempt sees fresh data. Other errors are returned
/// immediately.
///
/// # Errors
///
/// Returns [`StorageError::CasRetriesExhausted`] when every attempt conflicts.
#[tracing::instrument(skip(config, operation), fields(max_retries = config.max_retries))]
pub async fn with_cas_retry<F, Fut, T>(config: &CasRetryConfig, mut operation: F) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(StorageError::Conflict) if attempt < config.max_retries => {
                let delay = conflict_pause(config);
                tracing::debug!(
                    attempt = attempt + 1,
                    max_attempts = config.max_retries + 1,
                    delay_us = u64::try_from(delay.as_micros()).unwrap_or(u64::MAX),
                    "CAS conflict, retrying after jitter",
                );
                fail_point!("cas-retry-before-sleep");
                tokio::time::sleep(delay).await;
            },
            Err(StorageError::Conflict) => break,
            Err(err) => return Err(err),
        }
    }

    Err(StorageError::cas_retries_exhausted(config.max_retries.saturating_add(1)))
}

/// Pause between conflicting attempts: `base_delay + random(0..=base_delay)`.
pub fn conflict_pause(config: &CasRetryConfig) -> Duration {
    let range = u64::try_from(config.base_delay.as_micros()).unwrap_or(u64::MAX);
    if range == 0 {
        return Duration::ZERO;
    }
    config.base_delay + Duration::from_micros(rand::rng().random_range(0..=range))
}

/// Computes the backoff duration for the given attempt number.
///
/// `min(initial_backoff * 2^attempt, max_backoff) + random(0..50% of delay)`
fn compute_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.initial_backoff.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = base.min(config.max_backoff);

    let jitter_range = u64::try_from(capped.as_millis()).unwrap_or(u64::MAX) / 2;
    if jitter_range > 0 {
        capped + Duration::from_millis(rand::rng().random_range(0..=jitter_range))
    } else {
        capped
    }
}
