//! Storage backend trait definition.
//!
//! [`StorageBackend`] is the record store the custody core is written
//! against. It is a deliberately small key-value interface:
//!
//! - **Keys and values are bytes**: records are encoded by the layer above
//! - **Async**: loads and saves are the only suspension points in a custody operation
//! - **Ordered range scans**: ledger history is read with a prefix scan
//! - **Transactional**: multi-key commits guarded by compare-and-set
//!
//! Domain logic (assets, ledger entries, sequences) lives in the crates built
//! on top of this trait, never in the backends.

use std::ops::RangeBounds;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{error::StorageResult, transaction::Transaction, types::KeyValue};

/// Abstract storage backend for key-value operations.
///
/// Backends are `Send + Sync` and must tolerate concurrent callers.
///
/// | Method | Description |
/// |--------|-------------|
/// | [`get`](StorageBackend::get) | Retrieve a single value by key |
/// | [`set`](StorageBackend::set) | Store a key-value pair |
/// | [`compare_and_set`](StorageBackend::compare_and_set) | Atomic compare-and-swap |
/// | [`delete`](StorageBackend::delete) | Remove a key |
/// | [`get_range`](StorageBackend::get_range) | Retrieve keys in a range, in key order |
/// | [`transaction`](StorageBackend::transaction) | Begin an atomic transaction |
/// | [`health_check`](StorageBackend::health_check) | Verify backend availability |
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use keyward_storage::{MemoryBackend, StorageBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
///
/// backend.set(b"key".to_vec(), b"value".to_vec()).await.unwrap();
/// let value = backend.get(b"key").await.unwrap();
/// assert_eq!(value, Some(Bytes::from("value")));
/// # });
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves a value by key.
    ///
    /// Returns `Ok(None)` when the key does not exist.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Stores a key-value pair, overwriting any existing value.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;

    /// Atomically sets a key's value if it matches the expected current value.
    ///
    /// - **`expected: None`**: insert-if-absent. Fails with
    ///   [`Conflict`](crate::StorageError::Conflict) if any value is present.
    /// - **`expected: Some(value)`**: update-if-unchanged. Fails with
    ///   [`Conflict`](crate::StorageError::Conflict) if the key is absent or holds different
    ///   bytes.
    ///
    /// The comparison is exact and length-sensitive. Records compared this
    /// way must be re-serialized deterministically, or better, the caller
    /// should pass back the exact bytes it read.
    ///
    /// `Conflict` is not transient. Implement an application-level loop that
    /// re-reads before retrying:
    ///
    /// ```no_run
    /// use keyward_storage::{MemoryBackend, StorageBackend, StorageError};
    ///
    /// async fn increment(backend: &MemoryBackend, key: &[u8]) -> Result<(), StorageError> {
    ///     loop {
    ///         let current = backend.get(key).await?;
    ///         let (expected, new_value) = match current {
    ///             Some(bytes) => {
    ///                 let n: u64 = String::from_utf8_lossy(&bytes).parse().unwrap_or(0);
    ///                 (Some(bytes.to_vec()), (n + 1).to_string().into_bytes())
    ///             },
    ///             None => (None, b"1".to_vec()),
    ///         };
    ///         match backend.compare_and_set(key, expected.as_deref(), new_value).await {
    ///             Ok(()) => return Ok(()),
    ///             Err(StorageError::Conflict) => continue,
    ///             Err(e) => return Err(e),
    ///         }
    ///     }
    /// }
    /// ```
    #[must_use = "compare-and-set may fail with a conflict and errors must be handled"]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()>;

    /// Deletes a key. Deleting a missing key is a no-op.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// Retrieves all key-value pairs within a range, in ascending key order.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send;

    /// Begins a new transaction.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>>;

    /// Verifies that the backend can serve requests.
    #[must_use = "health check results indicate backend availability and must be inspected"]
    async fn health_check(&self) -> StorageResult<()>;
}
