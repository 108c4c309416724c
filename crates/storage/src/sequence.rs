//! Monotonic id allocation.
//!
//! A sequence is a counter stored under [`sequence_key`](crate::keys::sequence_key)
//! and advanced with compare-and-set. Ids are unique and increasing per
//! sequence. An id whose enclosing write later fails is simply skipped, so a
//! sequence may have gaps.

use crate::{
    backend::StorageBackend,
    config::CasRetryConfig,
    error::{StorageError, StorageResult},
    keys::sequence_key,
    retry::with_cas_retry,
};

/// Allocates the next id of the named sequence. The first id is `1`.
///
/// # Errors
///
/// - [`StorageError::CasRetriesExhausted`] under sustained contention
/// - [`StorageError::Serialization`] if the stored counter is corrupt
/// - Backend errors from the underlying reads and writes
#[tracing::instrument(skip(backend, config))]
pub async fn next_id<B>(backend: &B, name: &str, config: &CasRetryConfig) -> StorageResult<i64>
where
    B: StorageBackend + ?Sized,
{
    let key = sequence_key(name);
    with_cas_retry(config, || {
        let key = key.clone();
        async move {
            let current = backend.get(&key).await?;
            let last: i64 = match &current {
                Some(bytes) => serde_json::from_slice(bytes)?,
                None => 0,
            };
            let next = last
                .checked_add(1)
                .ok_or_else(|| StorageError::internal(format!("sequence {name} overflowed")))?;
            backend
                .compare_and_set(&key, current.as_deref(), serde_json::to_vec(&next)?)
                .await?;
            Ok(next)
        }
    })
    .await
}
