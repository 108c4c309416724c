//! The custody service.
//!
//! [`CustodyService`] is the single entry point for callers: it verifies
//! scanned location codes, runs the checkout/check-in state machine, mints
//! codes for administrators and fronts the asset directory. Every mutating
//! call is audited, including the refused ones.
//!
//! # Check order
//!
//! Checkout and check-in evaluate, in order:
//!
//! 1. the location code (any failure is [`CustodyError::InvalidToken`])
//! 2. the asset's existence ([`CustodyError::NotFound`])
//! 3. the code's location against the asset's home ([`CustodyError::LocationMismatch`])
//! 4. the status precondition ([`CustodyError::AlreadyCheckedOut`] or
//!    [`CustodyError::NotCheckedOut`])
//!
//! The asset write and the ledger append commit together. If another writer
//! commits first, the operation reloads and re-evaluates steps 2 to 4, so a
//! losing racer sees the winner's state.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use fail::fail_point;
use keyward_storage::{
    AssetId, CasRetryConfig, RetryConfig, StorageBackend, StorageError, keys, with_retry,
};
use keyward_token::{Location, LocationTokenService, MintedToken, VerifiedScan};
use serde::{Deserialize, Serialize};

use crate::{
    audit::{
        AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger, actor_identity,
        asset_resource, location_resource,
    },
    config::CustodyConfig,
    directory::{AssetDirectory, AssetUpdate},
    error::{ConfigError, CustodyError, Result},
    ledger::{CustodyLedger, LedgerEntry},
    model::{Actor, Asset, CustodyAction, Role},
};

/// Stored record of the most recent mint for a location.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MintRecord {
    location: Location,
    last_minted_at: DateTime<Utc>,
}

/// A recognized location and when a code was last minted for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationCode {
    /// The location.
    pub location: Location,
    /// Issue time of the most recent code, if one was ever minted.
    pub last_minted_at: Option<DateTime<Utc>>,
}

/// Location-verified key custody.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use keyward_custody::{Actor, CustodyService, Role};
/// use keyward_storage::{MemoryBackend, UserId};
/// use keyward_token::{LocationTokenService, TokenConfig};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let tokens = TokenConfig::builder()
///     .secret("0123456789abcdef0123456789abcdef".to_owned())
///     .build()
///     .unwrap();
/// let service = CustodyService::builder()
///     .backend(Arc::new(MemoryBackend::new()))
///     .tokens(Arc::new(LocationTokenService::new(&tokens).unwrap()))
///     .build();
///
/// let admin = Actor::new(UserId(1), "Facilities", Role::Admin).unwrap();
/// let student = Actor::new(UserId(42), "Ada", Role::Student).unwrap();
///
/// let key = service.create_asset(&admin, "Lab 3 master", "Block A").await.unwrap();
/// let code = service.mint_token("Block A", &admin).await.unwrap();
///
/// let out = service.checkout(key.id, &code.token, &student).await.unwrap();
/// assert_eq!(out.borrower(), Some(&student));
/// # });
/// ```
pub struct CustodyService<B> {
    backend: Arc<B>,
    tokens: Arc<LocationTokenService>,
    directory: AssetDirectory<B>,
    ledger: CustodyLedger<B>,
    retry: RetryConfig,
    audit: Arc<dyn AuditLogger>,
}

#[bon::bon]
impl<B> CustodyService<B>
where
    B: StorageBackend,
{
    /// Assembles a service.
    ///
    /// The audit logger defaults to [`TracingAuditLogger`].
    #[builder]
    pub fn new(
        backend: Arc<B>,
        tokens: Arc<LocationTokenService>,
        #[builder(default)] retry: RetryConfig,
        #[builder(default)] cas_retry: CasRetryConfig,
        audit: Option<Arc<dyn AuditLogger>>,
    ) -> Self {
        let directory = AssetDirectory::new(
            Arc::clone(&backend),
            tokens.locations().clone(),
            retry.clone(),
            cas_retry.clone(),
        );
        let ledger = CustodyLedger::new(Arc::clone(&backend), retry.clone(), cas_retry);
        Self {
            backend,
            tokens,
            directory,
            ledger,
            retry,
            audit: audit.unwrap_or_else(|| Arc::new(TracingAuditLogger)),
        }
    }

    /// Assembles a service from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Token`] if the token section does not validate.
    pub fn from_config(backend: Arc<B>, config: &CustodyConfig) -> std::result::Result<Self, ConfigError> {
        let tokens = LocationTokenService::new(&config.token)?;
        Ok(Self::builder()
            .backend(backend)
            .tokens(Arc::new(tokens))
            .retry(config.retry.clone())
            .cas_retry(config.cas_retry.clone())
            .build())
    }

    /// The asset directory.
    #[must_use]
    pub fn directory(&self) -> &AssetDirectory<B> {
        &self.directory
    }

    // -----------------------------------------------------------------------
    // Custody
    // -----------------------------------------------------------------------

    /// Checks an asset out to `actor` on presentation of its location's code.
    ///
    /// # Errors
    ///
    /// See the [module documentation](self) for the check order.
    /// [`CustodyError::StoreUnavailable`] is returned if the store fails, in
    /// which case nothing was written.
    #[tracing::instrument(skip(self, token, actor), fields(user_id = %actor.user_id()))]
    pub async fn checkout(&self, asset_id: AssetId, token: &str, actor: &Actor) -> Result<Asset> {
        self.custody_transition(CustodyAction::CheckOut, asset_id, token, actor).await
    }

    /// Checks an asset back in on presentation of its location's code.
    ///
    /// Any authenticated user may return a key; the ledger records who did.
    ///
    /// # Errors
    ///
    /// See [`checkout`](Self::checkout).
    #[tracing::instrument(skip(self, token, actor), fields(user_id = %actor.user_id()))]
    pub async fn checkin(&self, asset_id: AssetId, token: &str, actor: &Actor) -> Result<Asset> {
        self.custody_transition(CustodyAction::CheckIn, asset_id, token, actor).await
    }

    /// Verifies a scanned code and returns the location it was minted for.
    ///
    /// Verifying does not use up a single-use code; only a committed
    /// checkout or check-in does.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::InvalidToken`] for any verification failure.
    /// The specific reason is logged.
    pub async fn verify_token(&self, token: &str) -> Result<Location> {
        let scan = self.verify(token).await?;
        self.tokens.release_scan(&scan).await;
        Ok(scan.location)
    }

    /// Ledger entries of an asset, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::NotFound`] if the asset does not exist.
    pub async fn ledger(&self, asset_id: AssetId) -> Result<Vec<LedgerEntry>> {
        self.directory.get(asset_id).await?;
        self.ledger.entries(asset_id).await
    }

    async fn custody_transition(
        &self,
        action: CustodyAction,
        asset_id: AssetId,
        token: &str,
        actor: &Actor,
    ) -> Result<Asset> {
        // The nonce is held for the duration of the transition and only kept
        // once the transition commits.
        let outcome = match self.verify(token).await {
            Ok(scan) => match self.apply(action, asset_id, &scan, actor).await {
                Ok(asset) => Ok((asset, scan)),
                Err(err) => {
                    self.tokens.release_scan(&scan).await;
                    Err(err)
                },
            },
            Err(err) => Err(err),
        };

        let audit_action = match action {
            CustodyAction::CheckOut => AuditAction::CheckOut,
            CustodyAction::CheckIn => AuditAction::CheckIn,
        };
        let mut metadata = BTreeMap::new();
        if let Ok((_, scan)) = &outcome {
            metadata.insert("location".to_owned(), scan.location.to_string());
        }
        if let Err(CustodyError::LocationMismatch { scanned, home }) = &outcome {
            metadata.insert("location".to_owned(), scanned.to_string());
            metadata.insert("home_location".to_owned(), home.to_string());
        }
        self.record(actor, audit_action, asset_resource(asset_id), &outcome, metadata).await;

        let (asset, scan) = outcome?;
        tracing::info!(
            asset_id = %asset_id,
            action = %action,
            location = %scan.location,
            revision = asset.revision,
            "custody transition committed"
        );
        Ok(asset)
    }

    async fn verify(&self, token: &str) -> Result<VerifiedScan> {
        self.tokens.verify_scan(token).await.map_err(|err| {
            tracing::warn!(error = %err, "location code rejected");
            CustodyError::InvalidToken
        })
    }

    async fn apply(
        &self,
        action: CustodyAction,
        asset_id: AssetId,
        scan: &VerifiedScan,
        actor: &Actor,
    ) -> Result<Asset> {
        self.directory
            .retry_on_conflict(|| async move {
                let snapshot = self
                    .directory
                    .load_snapshot(asset_id)
                    .await?
                    .ok_or(CustodyError::NotFound { id: asset_id })?;
                let current = snapshot.asset();

                if scan.location != current.home_location {
                    return Err(CustodyError::LocationMismatch {
                        scanned: scan.location.clone(),
                        home: current.home_location.clone(),
                    });
                }

                let now = Utc::now();
                let updated = current.transition(action, actor, now)?;
                let entry = LedgerEntry {
                    id: self.ledger.allocate_id().await?,
                    asset_id,
                    borrower: actor.clone(),
                    location: scan.location.clone(),
                    action,
                    timestamp: now,
                    revision: updated.revision,
                };

                let mut txn = self.backend.transaction().await?;
                self.directory.stage_save(txn.as_mut(), &snapshot, &updated)?;
                self.ledger.stage_append(txn.as_mut(), &entry)?;

                fail_point!("custody-before-commit", |_| {
                    Err(StorageError::connection("injected custody commit failure").into())
                });
                txn.commit().await?;
                Ok(updated)
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Location codes
    // -----------------------------------------------------------------------

    /// Mints a code for `location` and records when it was issued.
    ///
    /// # Errors
    ///
    /// - [`CustodyError::Forbidden`] unless `caller` is an administrator
    /// - [`CustodyError::InvalidRequest`] for an unknown location
    /// - [`CustodyError::StoreUnavailable`] if the mint time cannot be recorded
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id()))]
    pub async fn mint_token(&self, location: &str, caller: &Actor) -> Result<MintedToken> {
        let outcome = self.mint_and_record(location, caller).await;
        let resource = match &outcome {
            Ok(minted) => location_resource(minted.location.as_str()),
            Err(_) => location_resource(location),
        };
        self.record(caller, AuditAction::MintToken, resource, &outcome, BTreeMap::new()).await;
        outcome
    }

    async fn mint_and_record(&self, location: &str, caller: &Actor) -> Result<MintedToken> {
        require_admin(caller, "mint_token")?;
        let minted = self.tokens.mint(location)?;

        let record = MintRecord { location: minted.location.clone(), last_minted_at: minted.issued_at };
        let key = keys::mint_key(minted.location.as_str());
        let value = serde_json::to_vec(&record).map_err(StorageError::from)?;
        let backend = &self.backend;
        with_retry(&self.retry, "record_mint", || backend.set(key.clone(), value.clone())).await?;

        Ok(minted)
    }

    /// Every recognized location with the time its code was last minted.
    ///
    /// # Errors
    ///
    /// - [`CustodyError::Forbidden`] unless `caller` is an administrator
    /// - [`CustodyError::StoreUnavailable`] on store failure
    pub async fn location_codes(&self, caller: &Actor) -> Result<Vec<LocationCode>> {
        require_admin(caller, "location_codes")?;

        let backend = &self.backend;
        let mut codes = Vec::with_capacity(self.tokens.locations().len());
        for location in self.tokens.locations().iter() {
            let key = keys::mint_key(location.as_str());
            let stored = with_retry(&self.retry, "load_mint", || backend.get(&key)).await?;
            let last_minted_at = match stored {
                Some(raw) => {
                    let record: MintRecord = serde_json::from_slice(&raw).map_err(StorageError::from)?;
                    Some(record.last_minted_at)
                },
                None => None,
            };
            codes.push(LocationCode { location: location.clone(), last_minted_at });
        }
        Ok(codes)
    }

    // -----------------------------------------------------------------------
    // Directory
    // -----------------------------------------------------------------------

    /// Gets an asset.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::NotFound`] if it does not exist.
    pub async fn get_asset(&self, id: AssetId) -> Result<Asset> {
        self.directory.get(id).await
    }

    /// Every asset, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::StoreUnavailable`] on store failure.
    pub async fn list_assets(&self) -> Result<Vec<Asset>> {
        self.directory.list().await
    }

    /// Assets homed at `location`. Unknown locations have none.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::StoreUnavailable`] on store failure.
    pub async fn list_assets_by_location(&self, location: &str) -> Result<Vec<Asset>> {
        self.directory.list_by_location(location).await
    }

    /// Every location in configured order, with its assets.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::StoreUnavailable`] on store failure.
    pub async fn list_assets_grouped(&self) -> Result<Vec<(Location, Vec<Asset>)>> {
        self.directory.list_grouped().await
    }

    /// Registers a key. Administrators only.
    ///
    /// # Errors
    ///
    /// - [`CustodyError::Forbidden`] unless `caller` is an administrator
    /// - See [`AssetDirectory::create`]
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id()))]
    pub async fn create_asset(&self, caller: &Actor, name: &str, home_location: &str) -> Result<Asset> {
        let outcome = match require_admin(caller, "create_asset") {
            Ok(()) => self.directory.create(name, home_location).await,
            Err(err) => Err(err),
        };
        let resource = match &outcome {
            Ok(asset) => asset_resource(asset.id),
            Err(_) => asset_resource("new"),
        };
        self.record(caller, AuditAction::CreateAsset, resource, &outcome, BTreeMap::new()).await;
        outcome
    }

    /// Renames or rehomes a key. Administrators only.
    ///
    /// # Errors
    ///
    /// - [`CustodyError::Forbidden`] unless `caller` is an administrator
    /// - See [`AssetDirectory::update`]
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id()))]
    pub async fn update_asset(&self, caller: &Actor, id: AssetId, update: &AssetUpdate) -> Result<Asset> {
        let outcome = match require_admin(caller, "update_asset") {
            Ok(()) => self.directory.update(id, update).await,
            Err(err) => Err(err),
        };
        self.record(caller, AuditAction::UpdateAsset, asset_resource(id), &outcome, BTreeMap::new()).await;
        outcome
    }

    /// Deletes a key and its ledger. Administrators only.
    ///
    /// # Errors
    ///
    /// - [`CustodyError::Forbidden`] unless `caller` is an administrator
    /// - See [`AssetDirectory::delete`]
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id()))]
    pub async fn delete_asset(&self, caller: &Actor, id: AssetId) -> Result<Asset> {
        let outcome = match require_admin(caller, "delete_asset") {
            Ok(()) => self.directory.delete(id, &self.ledger).await,
            Err(err) => Err(err),
        };
        self.record(caller, AuditAction::DeleteAsset, asset_resource(id), &outcome, BTreeMap::new()).await;
        outcome
    }

    async fn record<T>(
        &self,
        actor: &Actor,
        action: AuditAction,
        resource: String,
        outcome: &Result<T>,
        metadata: BTreeMap<String, String>,
    ) {
        let result = match outcome {
            Ok(_) => AuditResult::Success,
            Err(err) => AuditResult::Failure(err.kind().to_string()),
        };
        let event = AuditEvent::builder()
            .actor(actor_identity(actor))
            .action(action)
            .resource(resource)
            .result(result)
            .metadata(metadata)
            .build();
        self.audit.log(&event).await;
    }
}

fn require_admin(caller: &Actor, operation: &'static str) -> Result<()> {
    if caller.is_admin() {
        return Ok(());
    }
    tracing::debug!(user_id = %caller.user_id(), role = %caller.role(), operation, "administrative call refused");
    Err(CustodyError::Forbidden { operation, required: Role::Admin })
}
