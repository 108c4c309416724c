//! Location-verified key custody.
//!
//! Physical keys hang at fixed locations, each with a posted code minted by
//! [`keyward_token`]. A user checks a key out or back in by scanning the code
//! at the key's home location; the scan proves presence, and this crate
//! turns it into a custody transition recorded in an append-only ledger.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      CustodyService                          │
//! │   verify code · role checks · state machine · audit trail    │
//! ├──────────────────────┬───────────────────────────────────────┤
//! │   AssetDirectory     │   CustodyLedger                       │
//! │   assets/{id}        │   ledger/{asset}/{revision}           │
//! ├──────────────────────┴───────────────────────────────────────┤
//! │            keyward-storage (StorageBackend)                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The asset write and its ledger entry are committed in one transaction,
//! guarded by a compare-and-set on the asset record, so concurrent scans of
//! the same key cannot both succeed.
//!
//! # Feature Flags
//!
//! - **`failpoints`**: activates the `custody-before-commit` fail point and those of the storage
//!   layer.

#![deny(unsafe_code)]

pub mod audit;
pub mod config;
pub mod directory;
pub mod error;
pub mod ledger;
pub mod model;
pub mod service;

pub use audit::{AuditLogger, NoopAuditLogger, TracingAuditLogger};
pub use config::CustodyConfig;
pub use directory::{AssetDirectory, AssetSnapshot, AssetUpdate};
pub use error::{ConfigError, CustodyError, ErrorKind, Result};
pub use ledger::{CustodyLedger, LedgerEntry};
pub use model::{Actor, Asset, AssetStatus, Custody, CustodyAction, Role};
pub use service::{CustodyService, LocationCode};
