//! Token replay prevention via nonce tracking.
//!
//! Posted location codes are scanned by many people, so replay detection is
//! off by default. It is meant for single-use codes, such as a code shown on
//! a rotating screen, where a second presentation of the same nonce means
//! the code was copied.
//!
//! # Design
//!
//! - **Opt-in**: install a [`ReplayDetector`] on the
//!   [`LocationTokenService`](crate::LocationTokenService) to enable it.
//! - **Per-entry expiry**: each nonce is retained for the remaining lifetime of its token, bounding
//!   memory automatically.
//! - **Capacity-bounded**: the in-memory implementation evicts least-recently-used entries as a
//!   safety net beyond per-entry expiry.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::{future::Cache, policy::EvictionPolicy};

use crate::error::TokenError;

/// Tracks seen nonces and rejects duplicates.
#[async_trait]
pub trait ReplayDetector: Send + Sync {
    /// Checks whether `nonce` has been seen and marks it as seen.
    ///
    /// `retain_for` bounds how long the nonce must be remembered.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::TokenReplayed`] if the nonce was already recorded.
    async fn check_and_mark(&self, nonce: &str, retain_for: Duration) -> Result<(), TokenError>;

    /// Forgets `nonce`, so that a presentation whose operation did not
    /// complete can be retried with the same token.
    async fn release(&self, nonce: &str);
}

/// Per-entry expiry that reads the absolute deadline stored as the value.
struct NonceExpiry;

impl moka::Expiry<String, Instant> for NonceExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Instant,
        created_at: Instant,
    ) -> Option<Duration> {
        Some(value.saturating_duration_since(created_at))
    }
}

/// In-memory replay detector backed by a [`moka::future::Cache`].
///
/// `Send + Sync` and safe for concurrent use. Two concurrent presentations
/// of the same nonce are resolved by the cache's atomic entry insertion, so
/// exactly one of them is accepted.
pub struct InMemoryReplayDetector {
    /// Nonce to retention deadline.
    seen: Cache<String, Instant>,
}

impl InMemoryReplayDetector {
    /// Creates a detector tracking at most `max_capacity` nonces.
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        let seen = Cache::builder()
            .max_capacity(max_capacity)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(NonceExpiry)
            .build();
        Self { seen }
    }
}

impl std::fmt::Debug for InMemoryReplayDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryReplayDetector").field("entries", &self.seen.entry_count()).finish()
    }
}

#[async_trait]
impl ReplayDetector for InMemoryReplayDetector {
    async fn check_and_mark(&self, nonce: &str, retain_for: Duration) -> Result<(), TokenError> {
        let deadline = Instant::now() + retain_for;
        let entry = self.seen.entry(nonce.to_owned()).or_insert(deadline).await;
        if entry.is_fresh() {
            Ok(())
        } else {
            tracing::warn!("token nonce presented twice");
            Err(TokenError::token_replayed(nonce))
        }
    }

    async fn release(&self, nonce: &str) {
        self.seen.invalidate(nonce).await;
    }
}
