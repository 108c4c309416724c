//! Token error types.
//!
//! [`TokenError`] covers minting and verification failures. [`ConfigError`]
//! covers rejected configuration, which is only ever raised at startup.

use thiserror::Error;

/// Minting and verification errors.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TokenError {
    /// The token text is not two base64url segments carrying a well-formed
    /// payload for a recognized location.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// The signature does not match the payload under the shared secret.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Minting was requested for a location outside the recognized set.
    #[error("Unknown location: {location}")]
    UnknownLocation {
        /// The location name as supplied by the caller.
        location: String,
    },

    /// The token is older than the configured freshness window.
    #[error("Token expired")]
    TokenExpired,

    /// The token claims an issue time too far in the future.
    #[error("Token not yet valid")]
    TokenNotYetValid,

    /// The token's nonce was already presented within its retention window.
    #[error("Token replayed: nonce {nonce}")]
    TokenReplayed {
        /// The nonce that was seen before.
        nonce: String,
    },

    /// The shared secret could not key the MAC.
    #[error("Invalid secret: {0}")]
    InvalidSecret(String),
}

impl TokenError {
    /// Creates a [`TokenError::MalformedToken`].
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedToken(message.into())
    }

    /// Creates a [`TokenError::UnknownLocation`].
    pub fn unknown_location(location: impl Into<String>) -> Self {
        Self::UnknownLocation { location: location.into() }
    }

    /// Creates a [`TokenError::TokenReplayed`].
    pub fn token_replayed(nonce: impl Into<String>) -> Self {
        Self::TokenReplayed { nonce: nonce.into() }
    }
}

/// Configuration errors raised when building a token service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The shared secret is shorter than the minimum.
    #[error("secret must be at least {min} bytes, got {actual}")]
    SecretTooShort {
        /// Minimum accepted length in bytes.
        min: usize,
        /// Length of the supplied secret.
        actual: usize,
    },

    /// The recognized-location set is empty.
    #[error("at least one location is required")]
    NoLocations,

    /// A location name is blank.
    #[error("location names cannot be blank")]
    BlankLocation,

    /// Two location names collide case-insensitively.
    #[error("duplicate location: {0}")]
    DuplicateLocation(String),

    /// A location name contains surrounding whitespace.
    #[error("location name has surrounding whitespace: {0:?}")]
    UntrimmedLocation(String),

    /// A freshness window of zero would reject every token.
    #[error("max_age must be greater than zero")]
    ZeroMaxAge,

    /// A replay cache that cannot hold a single entry.
    #[error("replay_cache_capacity must be greater than zero")]
    ZeroReplayCapacity,
}

/// Result type alias for token operations.
pub type Result<T> = std::result::Result<T, TokenError>;
