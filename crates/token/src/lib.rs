//! # Keyward Location Tokens
//!
//! Signed, location-bound tokens for physical custody scans.
//!
//! A token is minted for one recognized location and posted there (as a QR
//! code, NFC tag or manual code). Presenting it later proves the presenter
//! was at that location, and that the claim was not altered.
//!
//! This crate provides:
//! - **Minting and verification**: HMAC-SHA256 over a small JSON payload, compared in constant time
//! - **Location set**: case-insensitive resolution to canonical names
//! - **Opt-in hardening**: a freshness window and nonce replay detection
//!
//! ## Example
//!
//! ```
//! use keyward_token::{LocationTokenService, TokenConfig, TokenError};
//!
//! let config = TokenConfig::builder()
//!     .secret("0123456789abcdef0123456789abcdef".to_owned())
//!     .build()?;
//! let service = LocationTokenService::new(&config)?;
//!
//! let minted = service.mint("Block A")?;
//! assert_eq!(service.verify_location(&minted.token)?.as_str(), "Block A");
//!
//! let mut tampered = minted.token.clone();
//! tampered.insert(0, 'x');
//! assert!(service.verify(&tampered).is_err());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Token service configuration.
pub mod config;
/// Token error types.
pub mod error;
/// Recognized premises locations.
pub mod location;
/// Nonce replay detection.
pub mod replay;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
/// Minting and verification.
pub mod token;

pub use config::{MIN_SECRET_LEN, TokenConfig};
pub use error::{ConfigError, Result, TokenError};
pub use location::{DEFAULT_LOCATIONS, Location, LocationSet};
pub use replay::{InMemoryReplayDetector, ReplayDetector};
pub use token::{
    CLOCK_SKEW_LEEWAY, LocationTokenPayload, LocationTokenService, MintedToken, VerifiedScan,
};
