//! In-memory storage backend implementation.
//!
//! [`MemoryBackend`] keeps every record in a [`BTreeMap`] behind a
//! [`parking_lot::RwLock`]. It is the backend used by tests and single-node
//! development deployments.
//!
//! Transactions are validated and applied under a single write-lock
//! acquisition, so compare-and-set preconditions are checked and the writes
//! are applied with no interleaving. That is what serializes two concurrent
//! checkouts of the same asset.
//!
//! # Failure injection
//!
//! With the `failpoints` feature enabled, the following sites can be
//! configured through the `fail` crate:
//!
//! | Fail point | Effect when set to `return` |
//! |------------|-----------------------------|
//! | `memory-get` | `get` fails with a connection error |
//! | `memory-get-range` | `get_range` fails with a connection error |
//! | `memory-commit` | `commit` fails with a connection error before applying anything |
//! | `memory-health-check` | `health_check` fails with a connection error |
//!
//! # Limitations
//!
//! - Data is lost when the process exits
//! - No replication

use std::{
    collections::BTreeMap,
    ops::{Bound, RangeBounds},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use fail::fail_point;
use parking_lot::RwLock;

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    transaction::Transaction,
    types::KeyValue,
};

/// In-memory storage backend using [`BTreeMap`].
///
/// Cloning is cheap; all clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Bytes>>>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend").field("keys", &self.data.read().len()).finish()
    }
}

impl MemoryBackend {
    /// Creates a new, empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns `true` if no keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

fn precondition_holds(expected: Option<&[u8]>, current: Option<&Bytes>) -> bool {
    match (expected, current) {
        (None, None) => true,
        (Some(exp), Some(cur)) => exp == &cur[..],
        _ => false,
    }
}

fn is_empty_range(start: Bound<&[u8]>, end: Bound<&[u8]>) -> bool {
    match (start, end) {
        (Bound::Excluded(s), Bound::Excluded(e)) => s >= e,
        (Bound::Included(s) | Bound::Excluded(s), Bound::Included(e) | Bound::Excluded(e)) => {
            s > e
        },
        _ => false,
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    #[tracing::instrument(skip(self, key), fields(key_len = key.len()))]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        fail_point!("memory-get", |_| Err(StorageError::connection("injected get failure")));
        Ok(self.data.read().get(key).cloned())
    }

    #[tracing::instrument(skip(self, key, value), fields(key_len = key.len()))]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.data.write().insert(key, Bytes::from(value));
        Ok(())
    }

    #[tracing::instrument(skip(self, key, expected, new_value), fields(key_len = key.len()))]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        let mut data = self.data.write();
        if !precondition_holds(expected, data.get(key)) {
            return Err(StorageError::Conflict);
        }
        data.insert(key.to_vec(), Bytes::from(new_value));
        Ok(())
    }

    #[tracing::instrument(skip(self, key), fields(key_len = key.len()))]
    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.data.write().remove(key);
        Ok(())
    }

    #[tracing::instrument(skip(self, range))]
    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send,
    {
        fail_point!("memory-get-range", |_| Err(StorageError::connection(
            "injected range scan failure"
        )));

        let start = match range.start_bound() {
            Bound::Included(b) => Bound::Included(b.as_slice()),
            Bound::Excluded(b) => Bound::Excluded(b.as_slice()),
            Bound::Unbounded => Bound::Unbounded,
        };
        let end = match range.end_bound() {
            Bound::Included(b) => Bound::Included(b.as_slice()),
            Bound::Excluded(b) => Bound::Excluded(b.as_slice()),
            Bound::Unbounded => Bound::Unbounded,
        };

        // BTreeMap::range panics on inverted bounds; treat them as empty.
        if is_empty_range(start, end) {
            return Ok(Vec::new());
        }

        let data = self.data.read();
        Ok(data
            .range::<[u8], _>((start, end))
            .map(|(k, v)| KeyValue::new(Bytes::copy_from_slice(k), v.clone()))
            .collect())
    }

    #[tracing::instrument(skip(self))]
    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction::new(self.clone())))
    }

    async fn health_check(&self) -> StorageResult<()> {
        fail_point!("memory-health-check", |_| Err(StorageError::connection(
            "injected health check failure"
        )));
        // Acquiring the read lock proves we're not deadlocked.
        let _unused = self.data.read();
        Ok(())
    }
}

/// A conditional operation verified at commit time.
#[derive(Debug, Clone)]
struct CasOperation {
    key: Vec<u8>,
    expected: Option<Vec<u8>>,
    /// `None` deletes the key once the precondition holds.
    new_value: Option<Vec<u8>>,
}

/// In-memory transaction with read-your-writes semantics.
struct MemoryTransaction {
    backend: MemoryBackend,
    pending_writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    pending_cas: Vec<CasOperation>,
}

impl MemoryTransaction {
    fn new(backend: MemoryBackend) -> Self {
        Self { backend, pending_writes: BTreeMap::new(), pending_cas: Vec::new() }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        if let Some(value) = self.pending_writes.get(key) {
            return Ok(value.as_ref().map(|v| Bytes::copy_from_slice(v)));
        }
        if let Some(cas) = self.pending_cas.iter().rev().find(|cas| cas.key == key) {
            return Ok(cas.new_value.as_ref().map(|v| Bytes::copy_from_slice(v)));
        }
        self.backend.get(key).await
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending_writes.insert(key, Some(value));
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.pending_writes.insert(key, None);
    }

    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        self.pending_cas.push(CasOperation { key, expected, new_value: Some(new_value) });
        Ok(())
    }

    fn compare_and_delete(&mut self, key: Vec<u8>, expected: Vec<u8>) {
        self.pending_cas.push(CasOperation { key, expected: Some(expected), new_value: None });
    }

    #[tracing::instrument(
        name = "commit",
        skip(self),
        fields(writes = self.pending_writes.len(), conditions = self.pending_cas.len())
    )]
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        fail_point!("memory-commit", |_| Err(StorageError::connection("injected commit failure")));

        let mut data = self.backend.data.write();

        // Verify every precondition before touching anything.
        for cas in &self.pending_cas {
            if !precondition_holds(cas.expected.as_deref(), data.get(&cas.key)) {
                tracing::debug!(key_len = cas.key.len(), "compare-and-set precondition failed");
                return Err(StorageError::Conflict);
            }
        }

        for cas in self.pending_cas {
            match cas.new_value {
                Some(v) => {
                    data.insert(cas.key, Bytes::from(v));
                },
                None => {
                    data.remove(&cas.key);
                },
            }
        }

        for (key, value) in self.pending_writes {
            match value {
                Some(v) => {
                    data.insert(key, Bytes::from(v));
                },
                None => {
                    data.remove(&key);
                },
            }
        }

        Ok(())
    }
}
