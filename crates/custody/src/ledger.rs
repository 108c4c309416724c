//! Append-only custody ledger.
//!
//! One entry per custody transition, keyed by the asset revision it
//! produced. Entries are staged into the same transaction as the asset
//! write, so an entry exists if and only if its transition committed.
//! Nothing here updates or removes a single entry; the only removal is the
//! cascade when an asset is deleted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use keyward_storage::{
    AssetId, CasRetryConfig, KeyValue, LedgerEntryId, RetryConfig, StorageBackend, StorageError,
    Transaction, keys, next_id, with_retry,
};
use keyward_token::Location;
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    model::{Actor, CustodyAction},
};

/// Sequence that ledger entry ids are drawn from.
const LEDGER_SEQUENCE: &str = "ledger";

/// One recorded custody transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry identity.
    pub id: LedgerEntryId,
    /// The asset that moved.
    pub asset_id: AssetId,
    /// Who performed the transition. For a checkout this is the borrower.
    pub borrower: Actor,
    /// Location of the verified code.
    pub location: Location,
    /// What happened.
    pub action: CustodyAction,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// The asset revision this transition produced.
    pub revision: u64,
}

/// Reads and stages ledger entries.
pub struct CustodyLedger<B> {
    backend: Arc<B>,
    retry: RetryConfig,
    cas_retry: CasRetryConfig,
}

impl<B> CustodyLedger<B>
where
    B: StorageBackend,
{
    /// Creates a ledger over `backend`.
    pub fn new(backend: Arc<B>, retry: RetryConfig, cas_retry: CasRetryConfig) -> Self {
        Self { backend, retry, cas_retry }
    }

    /// Allocates an id for an entry about to be staged.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::StoreUnavailable`](crate::CustodyError::StoreUnavailable)
    /// if the sequence cannot be advanced.
    pub async fn allocate_id(&self) -> Result<LedgerEntryId> {
        Ok(LedgerEntryId(next_id(self.backend.as_ref(), LEDGER_SEQUENCE, &self.cas_retry).await?))
    }

    /// Stages `entry` into `txn` as an insert-if-absent.
    ///
    /// A second entry for the same revision makes the commit conflict.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::StoreUnavailable`](crate::CustodyError::StoreUnavailable)
    /// if the entry cannot be encoded or buffered.
    pub fn stage_append(&self, txn: &mut dyn Transaction, entry: &LedgerEntry) -> Result<()> {
        let key = keys::ledger_entry_key(entry.asset_id, entry.revision);
        let value = serde_json::to_vec(entry).map_err(StorageError::from)?;
        txn.compare_and_set(key, None, value)?;
        Ok(())
    }

    /// Stages removal of every entry of `asset_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::StoreUnavailable`](crate::CustodyError::StoreUnavailable)
    /// if the entries cannot be listed.
    pub async fn stage_purge(&self, txn: &mut dyn Transaction, asset_id: AssetId) -> Result<usize> {
        let existing = self.scan(asset_id).await?;
        let count = existing.len();
        for kv in existing {
            txn.delete(kv.key.to_vec());
        }
        Ok(count)
    }

    /// Entries of `asset_id`, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::StoreUnavailable`](crate::CustodyError::StoreUnavailable)
    /// if the store fails or holds an undecodable entry.
    #[tracing::instrument(skip(self))]
    pub async fn entries(&self, asset_id: AssetId) -> Result<Vec<LedgerEntry>> {
        let mut entries = self
            .scan(asset_id)
            .await?
            .iter()
            .map(|kv| serde_json::from_slice::<LedgerEntry>(&kv.value))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StorageError::from)?;
        entries.reverse();
        Ok(entries)
    }

    async fn scan(&self, asset_id: AssetId) -> Result<Vec<KeyValue>> {
        let backend = &self.backend;
        Ok(with_retry(&self.retry, "ledger_scan", || backend.get_range(keys::ledger_range(asset_id)))
            .await?)
    }
}
