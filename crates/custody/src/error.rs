//! Custody error types.
//!
//! Every failure a caller can see is a [`CustodyError`] with a stable
//! [`ErrorKind`] and a human-readable message. Token verification detail is
//! logged where it happens and never carried in the error, so a caller
//! cannot learn which check a forged code failed.

use std::fmt;

use keyward_storage::{AssetId, StorageError};
use keyward_token::{Location, TokenError};
use thiserror::Error;

use crate::model::Role;

/// Stable classification of a [`CustodyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The presented code failed verification.
    InvalidToken,
    /// The asset does not exist.
    NotFound,
    /// The code was minted for a different location than the asset's home.
    LocationMismatch,
    /// Checkout of an asset that is already out.
    AlreadyCheckedOut,
    /// Check-in of an asset that is not out.
    NotCheckedOut,
    /// The request itself is invalid (unknown location, blank name).
    InvalidRequest,
    /// The caller lacks the required role.
    Forbidden,
    /// The record store failed or stayed contended.
    StoreUnavailable,
}

impl ErrorKind {
    /// Snake-case name, suitable for metrics labels and API error codes.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidToken => "invalid_token",
            Self::NotFound => "not_found",
            Self::LocationMismatch => "location_mismatch",
            Self::AlreadyCheckedOut => "already_checked_out",
            Self::NotCheckedOut => "not_checked_out",
            Self::InvalidRequest => "invalid_request",
            Self::Forbidden => "forbidden",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Custody operation errors.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CustodyError {
    /// The presented code is forged, altered, stale or reused.
    #[error("invalid or tampered code")]
    InvalidToken,

    /// No asset with this id exists.
    #[error("key {id} not found")]
    NotFound {
        /// The requested asset.
        id: AssetId,
    },

    /// The code belongs to a different location than the asset.
    #[error("code does not match key location: scanned {scanned}, key belongs to {home}")]
    LocationMismatch {
        /// Location carried by the verified code.
        scanned: Location,
        /// The asset's home location.
        home: Location,
    },

    /// The asset is already checked out.
    #[error("key {id} is already checked out")]
    AlreadyCheckedOut {
        /// The contested asset.
        id: AssetId,
    },

    /// The asset is not checked out.
    #[error("key {id} is not checked out")]
    NotCheckedOut {
        /// The asset.
        id: AssetId,
    },

    /// The request is invalid.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// What is wrong with it.
        message: String,
    },

    /// The caller's role does not permit the operation.
    #[error("{operation} requires the {required} role")]
    Forbidden {
        /// The refused operation.
        operation: &'static str,
        /// The role it requires.
        required: Role,
    },

    /// The record store is unavailable.
    #[error("custody store unavailable: {source}")]
    StoreUnavailable {
        /// The underlying storage failure.
        #[source]
        source: StorageError,
    },
}

impl CustodyError {
    /// Creates a [`CustodyError::InvalidRequest`].
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest { message: message.into() }
    }

    /// The stable classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidToken => ErrorKind::InvalidToken,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::LocationMismatch { .. } => ErrorKind::LocationMismatch,
            Self::AlreadyCheckedOut { .. } => ErrorKind::AlreadyCheckedOut,
            Self::NotCheckedOut { .. } => ErrorKind::NotCheckedOut,
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
        }
    }

    /// Whether repeating the same request may succeed.
    ///
    /// Only store failures qualify. Business outcomes are final for the
    /// state they were evaluated against.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::StoreUnavailable
    }
}

impl From<StorageError> for CustodyError {
    fn from(source: StorageError) -> Self {
        Self::StoreUnavailable { source }
    }
}

impl From<TokenError> for CustodyError {
    /// Minting failures map to the caller's mistake; every verification
    /// failure collapses to [`CustodyError::InvalidToken`].
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::UnknownLocation { location } => {
                Self::invalid_request(format!("unknown location: {location}"))
            },
            _ => Self::InvalidToken,
        }
    }
}

/// Result type alias for custody operations.
pub type Result<T> = std::result::Result<T, CustodyError>;

/// Configuration errors raised when assembling a custody service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration document is not valid JSON for [`CustodyConfig`](crate::CustodyConfig).
    #[error("invalid custody configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The token section does not validate.
    #[error("invalid token configuration: {0}")]
    Token(#[from] keyward_token::ConfigError),
}
