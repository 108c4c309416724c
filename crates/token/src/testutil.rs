//! Shared test utilities for token-dependent tests.
//!
//! Enable the `testutil` feature in `[dev-dependencies]`:
//!
//! ```toml
//! [dev-dependencies]
//! keyward-token = { workspace = true, features = ["testutil"] }
//! ```

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{config::TokenConfig, token::LocationTokenService};

/// A secret long enough to pass validation.
pub const TEST_SECRET: &str = "keyward-test-secret-0123456789abcdef";

/// A second valid secret, for cross-deployment tests.
pub const OTHER_SECRET: &str = "keyward-other-secret-fedcba9876543210";

/// Default test configuration over the default location set.
///
/// # Panics
///
/// Never, since the constants are valid.
#[must_use]
pub fn test_config() -> TokenConfig {
    TokenConfig::builder().secret(TEST_SECRET.to_owned()).build().expect("valid test config")
}

/// A shared token service over [`test_config`].
///
/// # Panics
///
/// Never, since the configuration is valid.
#[must_use]
pub fn test_service() -> Arc<LocationTokenService> {
    Arc::new(LocationTokenService::new(&test_config()).expect("valid test service"))
}

/// A token service keyed with `secret`.
///
/// # Panics
///
/// Panics if `secret` is shorter than the minimum length.
#[must_use]
pub fn service_with_secret(secret: &str) -> LocationTokenService {
    let config = TokenConfig::builder().secret(secret.to_owned()).build().expect("valid secret");
    LocationTokenService::new(&config).expect("valid service")
}

/// Signs arbitrary payload bytes with [`TEST_SECRET`], producing a token
/// whose signature is valid regardless of payload content.
///
/// Used to reach the checks that follow signature verification.
///
/// # Panics
///
/// Never; HMAC accepts keys of any length.
#[must_use]
pub fn sign_raw_payload(payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(TEST_SECRET.as_bytes()).expect("hmac key");
    mac.update(payload);
    format!("{}.{}", URL_SAFE_NO_PAD.encode(payload), URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}
