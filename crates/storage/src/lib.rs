//! Transactional key-value storage for the keyward custody service.
//!
//! This crate provides the [`StorageBackend`] trait the custody core is
//! written against, an in-memory implementation, and the small set of
//! helpers every record store needs: a key layout, id sequences, and retry
//! loops for transient failures and compare-and-set conflicts.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   keyward-custody                           │
//! │      Custody state machine, asset directory, ledger         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   keyward-storage                           │
//! │   StorageBackend trait · keys · sequences · retry           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    MemoryBackend                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use keyward_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set(b"assets/7".to_vec(), b"available".to_vec()).await?;
//!
//!     let mut txn = backend.transaction().await?;
//!     txn.compare_and_set(
//!         b"assets/7".to_vec(),
//!         Some(b"available".to_vec()),
//!         b"checked-out".to_vec(),
//!     )?;
//!     txn.set(b"ledger/7/1".to_vec(), b"check-out".to_vec());
//!     txn.commit().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: shared helpers and assertion macros for integration tests.
//! - **`failpoints`**: activates `fail_point!` sites in the memory backend and the retry loops.

#![deny(unsafe_code)]

pub mod backend;
pub mod config;
pub mod error;
pub mod keys;
pub mod memory;
pub mod retry;
pub mod sequence;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
pub mod transaction;
pub mod types;

pub use backend::StorageBackend;
pub use config::{CasRetryConfig, RetryConfig};
pub use error::{BoxError, StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use retry::{with_cas_retry, with_retry};
pub use sequence::next_id;
pub use transaction::Transaction;
pub use types::{AssetId, KeyValue, LedgerEntryId, UserId};
