//! Audit trail for custody operations.
//!
//! Every checkout, check-in, code mint and administrative change produces an
//! [`AuditEvent`] naming who acted, on what, and with which outcome. The
//! ledger records committed transitions; the audit trail also records the
//! refusals, which is where tampering attempts show up.
//!
//! [`TracingAuditLogger`] is the default sink. Deployments forwarding to a
//! SIEM implement [`AuditLogger`] themselves.
//!
//! ```no_run
//! use keyward_custody::audit::{
//!     AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger, asset_resource,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let event = AuditEvent::builder()
//!     .actor("user:42")
//!     .action(AuditAction::CheckOut)
//!     .resource(asset_resource(7))
//!     .result(AuditResult::Success)
//!     .build();
//! TracingAuditLogger.log(&event).await;
//! # });
//! ```

use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::Actor;

/// Audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    /// A key was checked out.
    CheckOut,
    /// A key was checked in.
    CheckIn,
    /// A location code was minted.
    MintToken,
    /// A key was registered.
    CreateAsset,
    /// A key's name or home was edited.
    UpdateAsset,
    /// A key was removed along with its history.
    DeleteAsset,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CheckOut => write!(f, "check_out"),
            Self::CheckIn => write!(f, "check_in"),
            Self::MintToken => write!(f, "mint_token"),
            Self::CreateAsset => write!(f, "create_asset"),
            Self::UpdateAsset => write!(f, "update_asset"),
            Self::DeleteAsset => write!(f, "delete_asset"),
        }
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditResult {
    /// Operation completed.
    Success,
    /// Operation was refused or failed, with the error kind.
    Failure(String),
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

/// A structured audit record.
#[derive(Debug, Clone, bon::Builder)]
pub struct AuditEvent {
    /// When the event occurred (defaults to now).
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// Who acted, as produced by [`actor_identity`].
    #[builder(into)]
    pub actor: String,
    /// What was attempted.
    pub action: AuditAction,
    /// What was affected, e.g. `asset:7` or `location:Block A`.
    #[builder(into)]
    pub resource: String,
    /// How it ended.
    pub result: AuditResult,
    /// Extra context such as the scanned location.
    #[builder(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Audit sink.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Records an event. Delivery problems are the sink's to report.
    async fn log(&self, event: &AuditEvent);
}

#[async_trait]
impl<L: AuditLogger> AuditLogger for std::sync::Arc<L> {
    async fn log(&self, event: &AuditEvent) {
        (**self).log(event).await;
    }
}

/// Emits each event as an `INFO` tracing event with `audit.*` fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        let metadata = event.metadata.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(", ");

        tracing::info!(
            audit.timestamp = %event.timestamp.to_rfc3339(),
            audit.actor = %event.actor,
            audit.action = %event.action,
            audit.resource = %event.resource,
            audit.result = %event.result,
            audit.metadata = %metadata,
            "audit_event"
        );
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditLogger;

#[async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _event: &AuditEvent) {}
}

/// Audit identity of an actor: `user:{id}`.
pub fn actor_identity(actor: &Actor) -> String {
    format!("user:{}", actor.user_id())
}

/// Resource identifier of an asset.
pub fn asset_resource(id: impl fmt::Display) -> String {
    format!("asset:{id}")
}

/// Resource identifier of a location.
pub fn location_resource(location: &str) -> String {
    format!("location:{location}")
}
