//! Asset directory.
//!
//! Owns the asset records. The state machine reads through
//! [`load_snapshot`](AssetDirectory::load_snapshot) and writes through
//! [`stage_save`](AssetDirectory::stage_save), which compare-and-sets
//! against the exact bytes that were read. There is no cache: every
//! operation reloads.
//!
//! Administrative CRUD lives here too. Role checks happen in
//! [`CustodyService`](crate::CustodyService), not at this layer.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use keyward_storage::{
    AssetId, CasRetryConfig, RetryConfig, StorageBackend, StorageError, Transaction, keys,
    next_id, retry::conflict_pause, with_retry,
};
use keyward_token::{Location, LocationSet};

use crate::{
    error::{CustodyError, Result},
    ledger::CustodyLedger,
    model::{Asset, AssetStatus},
};

/// Sequence that asset ids are drawn from.
const ASSET_SEQUENCE: &str = "assets";

/// An asset together with the exact stored bytes it was decoded from.
#[derive(Debug, Clone)]
pub struct AssetSnapshot {
    asset: Asset,
    raw: Bytes,
}

impl AssetSnapshot {
    /// The decoded asset.
    #[must_use]
    pub fn asset(&self) -> &Asset {
        &self.asset
    }

    /// Consumes the snapshot, returning the asset.
    #[must_use]
    pub fn into_asset(self) -> Asset {
        self.asset
    }
}

/// Administrative changes to an asset. Unset fields are left alone.
///
/// Status is deliberately absent: it only changes through checkout and
/// check-in.
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct AssetUpdate {
    /// New label.
    #[builder(into)]
    pub name: Option<String>,
    /// New home location name, resolved case-insensitively.
    #[builder(into)]
    pub home_location: Option<String>,
}

/// CRUD over asset records.
pub struct AssetDirectory<B> {
    backend: Arc<B>,
    locations: LocationSet,
    retry: RetryConfig,
    cas_retry: CasRetryConfig,
}

impl<B> AssetDirectory<B>
where
    B: StorageBackend,
{
    /// Creates a directory over `backend` recognizing `locations`.
    pub fn new(
        backend: Arc<B>,
        locations: LocationSet,
        retry: RetryConfig,
        cas_retry: CasRetryConfig,
    ) -> Self {
        Self { backend, locations, retry, cas_retry }
    }

    /// The recognized locations.
    #[must_use]
    pub fn locations(&self) -> &LocationSet {
        &self.locations
    }

    /// Loads an asset, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::StoreUnavailable`] if the store fails after
    /// retries or the record is corrupt.
    pub async fn load(&self, id: AssetId) -> Result<Option<Asset>> {
        Ok(self.load_snapshot(id).await?.map(AssetSnapshot::into_asset))
    }

    /// Loads an asset with the bytes needed to save it back conditionally.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    #[tracing::instrument(skip(self))]
    pub async fn load_snapshot(&self, id: AssetId) -> Result<Option<AssetSnapshot>> {
        let key = keys::asset_key(id);
        let backend = &self.backend;
        let Some(raw) = with_retry(&self.retry, "load_asset", || backend.get(&key)).await? else {
            return Ok(None);
        };
        let asset: Asset = serde_json::from_slice(&raw).map_err(StorageError::from)?;
        Ok(Some(AssetSnapshot { asset, raw }))
    }

    /// Stages `updated` as the replacement of `snapshot`.
    ///
    /// The commit conflicts if the stored record changed since the snapshot
    /// was read.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::StoreUnavailable`] if the record cannot be
    /// encoded or buffered.
    pub fn stage_save(
        &self,
        txn: &mut dyn Transaction,
        snapshot: &AssetSnapshot,
        updated: &Asset,
    ) -> Result<()> {
        let value = serde_json::to_vec(updated).map_err(StorageError::from)?;
        txn.compare_and_set(keys::asset_key(updated.id), Some(snapshot.raw.to_vec()), value)?;
        Ok(())
    }

    /// Registers a new, available asset.
    ///
    /// # Errors
    ///
    /// - [`CustodyError::InvalidRequest`] for a blank name or an unknown location
    /// - [`CustodyError::StoreUnavailable`] on store failure
    #[tracing::instrument(skip(self))]
    pub async fn create(&self, name: &str, home_location: &str) -> Result<Asset> {
        let name = validate_name(name)?;
        let home_location = self.resolve(home_location)?;

        let id = AssetId(next_id(self.backend.as_ref(), ASSET_SEQUENCE, &self.cas_retry).await?);
        let asset = Asset::new(id, name, home_location, Utc::now());

        let mut txn = self.backend.transaction().await?;
        txn.compare_and_set(
            keys::asset_key(id),
            None,
            serde_json::to_vec(&asset).map_err(StorageError::from)?,
        )?;
        txn.commit().await?;

        tracing::info!(asset_id = %id, location = %asset.home_location, "asset registered");
        Ok(asset)
    }

    /// Gets an asset by id.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::NotFound`] if it does not exist.
    pub async fn get(&self, id: AssetId) -> Result<Asset> {
        self.load(id).await?.ok_or(CustodyError::NotFound { id })
    }

    /// Every asset, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::StoreUnavailable`] on store failure or a
    /// corrupt record.
    #[tracing::instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<Asset>> {
        let backend = &self.backend;
        let records = with_retry(&self.retry, "list_assets", || backend.get_range(keys::asset_range())).await?;
        records
            .iter()
            .map(|kv| {
                serde_json::from_slice::<Asset>(&kv.value)
                    .map_err(|e| CustodyError::from(StorageError::from(e)))
            })
            .collect()
    }

    /// Assets homed at `location`, resolved case-insensitively.
    ///
    /// An unknown location has no assets.
    ///
    /// # Errors
    ///
    /// See [`list`](Self::list).
    pub async fn list_by_location(&self, location: &str) -> Result<Vec<Asset>> {
        let Ok(location) = self.locations.resolve(location) else {
            return Ok(Vec::new());
        };
        let mut assets = self.list().await?;
        assets.retain(|asset| asset.home_location == location);
        Ok(assets)
    }

    /// Every recognized location in configured order, with its assets.
    ///
    /// Locations without assets are included with an empty list.
    ///
    /// # Errors
    ///
    /// See [`list`](Self::list).
    pub async fn list_grouped(&self) -> Result<Vec<(Location, Vec<Asset>)>> {
        let mut assets = self.list().await?;
        let mut grouped = Vec::with_capacity(self.locations.len());
        for location in self.locations.iter() {
            let (here, rest): (Vec<Asset>, Vec<Asset>) =
                assets.into_iter().partition(|asset| &asset.home_location == location);
            grouped.push((location.clone(), here));
            assets = rest;
        }
        Ok(grouped)
    }

    /// Applies an administrative update.
    ///
    /// Rehoming is only allowed while the asset is available; a checked-out
    /// key must come back to where it was taken from.
    ///
    /// # Errors
    ///
    /// - [`CustodyError::NotFound`] if the asset does not exist
    /// - [`CustodyError::InvalidRequest`] for a blank name, an unknown location, or rehoming a
    ///   checked-out asset
    /// - [`CustodyError::StoreUnavailable`] on store failure or sustained contention
    #[tracing::instrument(skip(self))]
    pub async fn update(&self, id: AssetId, update: &AssetUpdate) -> Result<Asset> {
        let name = update.name.as_deref().map(validate_name).transpose()?;
        let home_location = update.home_location.as_deref().map(|l| self.resolve(l)).transpose()?;
        let (name, home_location) = (name.as_deref(), home_location.as_ref());

        self.retry_on_conflict(|| async move {
            let snapshot = self.load_snapshot(id).await?.ok_or(CustodyError::NotFound { id })?;
            let mut updated = snapshot.asset().clone();

            if let Some(name) = name {
                name.clone_into(&mut updated.name);
            }
            match home_location {
                Some(location) if *location != updated.home_location => {
                    if updated.status() == AssetStatus::CheckedOut {
                        return Err(CustodyError::invalid_request(
                            "cannot change the home location of a checked-out key",
                        ));
                    }
                    updated.home_location = location.clone();
                },
                _ => {},
            }

            let mut txn = self.backend.transaction().await?;
            self.stage_save(txn.as_mut(), &snapshot, &updated)?;
            txn.commit().await?;
            Ok(updated)
        })
        .await
    }

    /// Deletes an asset together with its ledger entries, in one commit.
    ///
    /// # Errors
    ///
    /// - [`CustodyError::NotFound`] if the asset does not exist
    /// - [`CustodyError::StoreUnavailable`] on store failure or sustained contention
    #[tracing::instrument(skip(self, ledger))]
    pub async fn delete(&self, id: AssetId, ledger: &CustodyLedger<B>) -> Result<Asset> {
        self.retry_on_conflict(|| async move {
            let snapshot = self.load_snapshot(id).await?.ok_or(CustodyError::NotFound { id })?;

            let mut txn = self.backend.transaction().await?;
            txn.compare_and_delete(keys::asset_key(id), snapshot.raw.to_vec());
            let purged = ledger.stage_purge(txn.as_mut(), id).await?;
            txn.commit().await?;

            tracing::info!(asset_id = %id, ledger_entries = purged, "asset deleted");
            Ok(snapshot.into_asset())
        })
        .await
    }

    /// Re-runs `operation` while its commit conflicts, up to the CAS budget.
    ///
    /// Business errors raised by a re-run reflect the state that won.
    pub(crate) async fn retry_on_conflict<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Err(CustodyError::StoreUnavailable { source: StorageError::Conflict })
                    if attempt < self.cas_retry.max_retries =>
                {
                    attempt += 1;
                    let delay = conflict_pause(&self.cas_retry);
                    tracing::debug!(attempt, "asset record changed concurrently, reloading");
                    tokio::time::sleep(delay).await;
                },
                Err(CustodyError::StoreUnavailable { source: StorageError::Conflict }) => {
                    return Err(StorageError::cas_retries_exhausted(attempt + 1).into());
                },
                other => return other,
            }
        }
    }

    fn resolve(&self, location: &str) -> Result<Location> {
        self.locations
            .resolve(location)
            .map_err(|_| CustodyError::invalid_request(format!("unknown location: {location}")))
    }
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CustodyError::invalid_request("key name cannot be blank"));
    }
    Ok(name.to_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use keyward_storage::MemoryBackend;

    use super::*;
    use crate::error::ErrorKind;

    fn directory() -> (Arc<MemoryBackend>, AssetDirectory<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let directory = AssetDirectory::new(
            Arc::clone(&backend),
            LocationSet::default(),
            RetryConfig::default(),
            CasRetryConfig::default(),
        );
        (backend, directory)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (_, directory) = directory();
        let created = directory.create("  Lab 3 master  ", "block a").await.unwrap();
        assert_eq!(created.name, "Lab 3 master");
        assert_eq!(created.home_location.as_str(), "Block A");
        assert_eq!(created.status(), AssetStatus::Available);
        assert_eq!(created.revision, 0);

        assert_eq!(directory.get(created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn test_create_validation() {
        let (backend, directory) = directory();
        let err = directory.create("  ", "Block A").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let err = directory.create("Gym", "Block Z").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        assert!(backend.is_empty(), "rejected creates must not allocate ids");
    }

    #[tokio::test]
    async fn test_ids_are_distinct_and_increasing() {
        let (_, directory) = directory();
        let a = directory.create("A", "Block A").await.unwrap();
        let b = directory.create("B", "Block A").await.unwrap();
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let (_, directory) = directory();
        let err = directory.get(AssetId(99)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(directory.load(AssetId(99)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_listing() {
        let (_, directory) = directory();
        let a = directory.create("A1", "Block A").await.unwrap();
        let b = directory.create("B1", "Block B").await.unwrap();
        let a2 = directory.create("A2", "Block A").await.unwrap();

        let ids: Vec<AssetId> = directory.list().await.unwrap().iter().map(|x| x.id).collect();
        assert_eq!(ids, vec![a.id, b.id, a2.id]);

        let in_a = directory.list_by_location("BLOCK A").await.unwrap();
        assert_eq!(in_a.iter().map(|x| x.id).collect::<Vec<_>>(), vec![a.id, a2.id]);
        assert!(directory.list_by_location("Nowhere").await.unwrap().is_empty());

        let grouped = directory.list_grouped().await.unwrap();
        assert_eq!(grouped.len(), 7);
        assert_eq!(grouped[0].0.as_str(), "FrontGate");
        assert!(grouped[0].1.is_empty());
        assert_eq!(grouped[1].1.len(), 2);
        assert_eq!(grouped[2].1.len(), 1);
    }

    #[tokio::test]
    async fn test_update_name_and_location() {
        let (_, directory) = directory();
        let created = directory.create("Old", "Block A").await.unwrap();

        let update = AssetUpdate::builder().name("New").home_location("block c").build();
        let updated = directory.update(created.id, &update).await.unwrap();
        assert_eq!(updated.name, "New");
        assert_eq!(updated.home_location.as_str(), "Block C");
        assert_eq!(updated.revision, created.revision);
        assert_eq!(directory.get(created.id).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn test_update_validation() {
        let (_, directory) = directory();
        let created = directory.create("Old", "Block A").await.unwrap();

        let blank = AssetUpdate::builder().name(" ").build();
        assert_eq!(directory.update(created.id, &blank).await.unwrap_err().kind(), ErrorKind::InvalidRequest);

        let unknown = AssetUpdate::builder().home_location("Roof").build();
        assert_eq!(
            directory.update(created.id, &unknown).await.unwrap_err().kind(),
            ErrorKind::InvalidRequest
        );

        let missing = AssetUpdate::builder().name("x").build();
        assert_eq!(directory.update(AssetId(99), &missing).await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_stale_snapshot_conflicts() {
        let (backend, directory) = directory();
        let created = directory.create("A", "Block A").await.unwrap();
        let stale = directory.load_snapshot(created.id).await.unwrap().unwrap();

        directory
            .update(created.id, &AssetUpdate::builder().name("B").build())
            .await
            .unwrap();

        let mut txn = backend.transaction().await.unwrap();
        directory.stage_save(txn.as_mut(), &stale, stale.asset()).unwrap();
        assert!(matches!(txn.commit().await, Err(StorageError::Conflict)));
    }
}
