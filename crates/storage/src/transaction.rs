//! Transaction trait for atomic storage operations.
//!
//! Custody transitions write two things that must land together: the mutated
//! asset record and the ledger entry describing the mutation. A [`Transaction`]
//! buffers both and applies them in one step, guarded by compare-and-set
//! preconditions that are checked under the backend's write lock.
//!
//! # Example
//!
//! ```
//! use keyward_storage::{MemoryBackend, StorageBackend, StorageError};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//! backend.set(b"assets/7".to_vec(), b"available".to_vec()).await.unwrap();
//!
//! let mut txn = backend.transaction().await.unwrap();
//! txn.compare_and_set(b"assets/7".to_vec(), Some(b"available".to_vec()), b"checked-out".to_vec())
//!     .unwrap();
//! txn.set(b"ledger/7/1".to_vec(), b"check-out".to_vec());
//! txn.commit().await.unwrap();
//!
//! // A second writer that read the old value loses.
//! let mut stale = backend.transaction().await.unwrap();
//! stale
//!     .compare_and_set(b"assets/7".to_vec(), Some(b"available".to_vec()), b"checked-out".to_vec())
//!     .unwrap();
//! assert!(matches!(stale.commit().await, Err(StorageError::Conflict)));
//! # });
//! ```

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// Transaction handle for atomic multi-operation commits.
///
/// Writes are buffered until [`commit`](Transaction::commit). Reads through
/// [`get`](Transaction::get) see the transaction's own pending writes.
///
/// # Concurrency
///
/// Isolation is optimistic. Preconditions registered with
/// [`compare_and_set`](Transaction::compare_and_set) are evaluated at commit
/// time; if any fails, nothing is applied and the commit returns
/// [`StorageError::Conflict`](crate::StorageError::Conflict).
#[async_trait]
pub trait Transaction: Send {
    /// Gets a value, preferring this transaction's pending writes.
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Buffers an unconditional write.
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>);

    /// Buffers a delete.
    fn delete(&mut self, key: Vec<u8>);

    /// Buffers a conditional write checked at commit time.
    ///
    /// `expected: None` requires the key to be absent; `Some(bytes)` requires
    /// an exact byte-for-byte match.
    ///
    /// # Errors
    ///
    /// Backends may reject the operation while buffering (e.g. size limits).
    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) -> StorageResult<()>;

    /// Buffers a conditional delete checked at commit time.
    ///
    /// The commit fails with a conflict unless the key currently holds
    /// exactly `expected`.
    fn compare_and_delete(&mut self, key: Vec<u8>, expected: Vec<u8>);

    /// Commits all buffered operations atomically.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Conflict`](crate::StorageError::Conflict) if any compare-and-set
    ///   precondition no longer holds
    /// - Other [`StorageError`](crate::StorageError) variants on backend failures
    async fn commit(self: Box<Self>) -> StorageResult<()>;
}
