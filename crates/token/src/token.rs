//! Location token minting and verification.
//!
//! A location token proves that a scan happened at a recognized location and
//! that nobody altered the claim. The wire format is:
//!
//! ```text
//! base64url(payload) "." base64url(HMAC-SHA256(secret, payload))
//! ```
//!
//! where `payload` is the JSON object `{"location", "issuedAt", "nonce"}` in
//! that field order. Both segments use the URL-safe alphabet without
//! padding, so neither can contain `.`.
//!
//! # Verification pipeline
//!
//! 1. Split into exactly two segments and decode both ([`TokenError::MalformedToken`])
//! 2. Recompute the MAC and compare in constant time ([`TokenError::InvalidSignature`])
//! 3. Parse the payload and resolve its location ([`TokenError::MalformedToken`])
//! 4. Optional freshness window ([`TokenError::TokenExpired`], [`TokenError::TokenNotYetValid`])
//! 5. Optional replay detection ([`TokenError::TokenReplayed`])
//!
//! The signature is checked before the payload is parsed, so unauthenticated
//! bytes never reach the JSON parser.

use std::{sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::{
    config::TokenConfig,
    error::{ConfigError, Result, TokenError},
    location::{Location, LocationSet},
    replay::{InMemoryReplayDetector, ReplayDetector},
};

type HmacSha256 = Hmac<Sha256>;

/// Tolerated clock difference between the minting and verifying hosts.
pub const CLOCK_SKEW_LEEWAY: Duration = Duration::from_secs(60);

/// How long nonces are remembered when no freshness window is configured.
pub const DEFAULT_REPLAY_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Length of the random nonce in bytes, before encoding.
pub const NONCE_LEN: usize = 16;

/// Signed claims carried by a location token.
///
/// Field order is part of the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LocationTokenPayload {
    /// Canonical location name.
    pub location: String,
    /// Unix seconds at minting.
    pub issued_at: i64,
    /// Random nonce, base64url text.
    pub nonce: String,
}

/// The authenticated content of a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedScan {
    /// Where the token was minted for.
    pub location: Location,
    /// When it was minted.
    pub issued_at: DateTime<Utc>,
    /// Its nonce.
    pub nonce: String,
}

/// A freshly minted token with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintedToken {
    /// Token text to embed in a QR code, NFC tag or manual code.
    pub token: String,
    /// Canonical location the token is bound to.
    pub location: Location,
    /// Issue time, truncated to whole seconds as carried in the payload.
    pub issued_at: DateTime<Utc>,
}

/// Mints and verifies location tokens.
///
/// Built once at startup and shared read-only, typically behind an [`Arc`].
///
/// # Example
///
/// ```
/// use keyward_token::{LocationTokenService, TokenConfig};
///
/// let config = TokenConfig::builder()
///     .secret("0123456789abcdef0123456789abcdef".to_owned())
///     .build()
///     .unwrap();
/// let service = LocationTokenService::new(&config).unwrap();
///
/// let minted = service.mint("block a").unwrap();
/// assert_eq!(minted.location.as_str(), "Block A");
///
/// let scan = service.verify(&minted.token).unwrap();
/// assert_eq!(scan.location, minted.location);
/// ```
pub struct LocationTokenService {
    secret: Zeroizing<Vec<u8>>,
    locations: LocationSet,
    max_age: Option<Duration>,
    replay_detector: Option<Arc<dyn ReplayDetector>>,
}

impl LocationTokenService {
    /// Builds a service from validated configuration.
    ///
    /// Installs an [`InMemoryReplayDetector`] when `replay_cache_capacity`
    /// is set.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the configuration does not validate.
    pub fn new(config: &TokenConfig) -> std::result::Result<Self, ConfigError> {
        let locations = config.validate()?;
        let replay_detector = config.replay_cache_capacity.map(|capacity| {
            Arc::new(InMemoryReplayDetector::new(capacity)) as Arc<dyn ReplayDetector>
        });

        tracing::debug!(
            locations = locations.len(),
            max_age_secs = config.max_age.map(|d| d.as_secs()),
            replay_detection = replay_detector.is_some(),
            "location token service configured",
        );

        Ok(Self {
            secret: Zeroizing::new(config.secret.as_bytes().to_vec()),
            locations,
            max_age: config.max_age,
            replay_detector,
        })
    }

    /// Replaces the replay detector.
    #[must_use]
    pub fn with_replay_detector(mut self, detector: Arc<dyn ReplayDetector>) -> Self {
        self.replay_detector = Some(detector);
        self
    }

    /// The recognized locations.
    #[must_use]
    pub fn locations(&self) -> &LocationSet {
        &self.locations
    }

    /// Mints a token for `location`, resolved case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::UnknownLocation`] if `location` is not recognized.
    pub fn mint(&self, location: &str) -> Result<MintedToken> {
        self.mint_at(location, Utc::now())
    }

    /// Mints a token as if the current time were `now`.
    ///
    /// # Errors
    ///
    /// See [`mint`](Self::mint).
    #[tracing::instrument(skip_all)]
    pub fn mint_at(&self, location: &str, now: DateTime<Utc>) -> Result<MintedToken> {
        let location = self.locations.resolve(location)?;
        let issued_at = now.timestamp();
        let payload = LocationTokenPayload {
            location: location.as_str().to_owned(),
            issued_at,
            nonce: URL_SAFE_NO_PAD.encode(rand::random::<[u8; NONCE_LEN]>()),
        };

        let payload_bytes = serde_json::to_vec(&payload)
            .map_err(|e| TokenError::malformed(format!("payload serialization failed: {e}")))?;
        let signature = self.sign(&payload_bytes)?;
        let token = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload_bytes),
            URL_SAFE_NO_PAD.encode(signature)
        );

        tracing::debug!(location = %location, "minted location token");
        Ok(MintedToken {
            token,
            location,
            issued_at: DateTime::from_timestamp(issued_at, 0).unwrap_or(now),
        })
    }

    /// Verifies a token's structure, signature, location and freshness.
    ///
    /// Does not consult the replay detector; see
    /// [`verify_scan`](Self::verify_scan).
    ///
    /// # Errors
    ///
    /// Returns the first failing check of the verification pipeline.
    pub fn verify(&self, token: &str) -> Result<VerifiedScan> {
        self.verify_at(token, Utc::now())
    }

    /// Verifies a token and returns only its location.
    ///
    /// # Errors
    ///
    /// See [`verify`](Self::verify).
    pub fn verify_location(&self, token: &str) -> Result<Location> {
        self.verify(token).map(|scan| scan.location)
    }

    /// Verifies a token as if the current time were `now`.
    ///
    /// # Errors
    ///
    /// See [`verify`](Self::verify).
    #[tracing::instrument(skip_all)]
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<VerifiedScan> {
        let mut parts = token.split('.');
        let (Some(payload_part), Some(signature_part), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::malformed("expected 2 dot-separated parts"));
        };

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload_part)
            .map_err(|e| TokenError::malformed(format!("payload is not base64url: {e}")))?;
        let provided = URL_SAFE_NO_PAD
            .decode(signature_part)
            .map_err(|e| TokenError::malformed(format!("signature is not base64url: {e}")))?;

        let expected = self.sign(&payload_bytes)?;
        if !bool::from(expected.as_slice().ct_eq(&provided)) {
            tracing::warn!("location token signature mismatch");
            return Err(TokenError::InvalidSignature);
        }

        // Serde also accepts a struct as a sequence; the wire format is an object.
        let object = match serde_json::from_slice::<serde_json::Value>(&payload_bytes) {
            Ok(serde_json::Value::Object(object)) => object,
            Ok(_) => return Err(TokenError::malformed("payload is not a JSON object")),
            Err(e) => return Err(TokenError::malformed(format!("invalid payload: {e}"))),
        };
        let payload: LocationTokenPayload = serde_json::from_value(serde_json::Value::Object(object))
            .map_err(|e| TokenError::malformed(format!("invalid payload: {e}")))?;

        // Minting always writes the canonical spelling, so match exactly.
        let location = self
            .locations
            .iter()
            .find(|known| known.as_str() == payload.location)
            .cloned()
            .ok_or_else(|| {
                TokenError::malformed(format!("unrecognized location {:?}", payload.location))
            })?;
        let issued_at = DateTime::from_timestamp(payload.issued_at, 0)
            .ok_or_else(|| TokenError::malformed("issuedAt out of range"))?;

        self.check_freshness(issued_at, now)?;

        Ok(VerifiedScan { location, issued_at, nonce: payload.nonce })
    }

    /// Full verification, including replay detection when installed.
    ///
    /// # Errors
    ///
    /// Returns the first failing check of the verification pipeline.
    pub async fn verify_scan(&self, token: &str) -> Result<VerifiedScan> {
        let now = Utc::now();
        let scan = self.verify_at(token, now)?;
        if let Some(detector) = &self.replay_detector {
            detector.check_and_mark(&scan.nonce, self.replay_retention(scan.issued_at, now)).await?;
        }
        Ok(scan)
    }

    /// Forgets the nonce of a scan accepted by [`verify_scan`](Self::verify_scan).
    ///
    /// Callers whose operation failed after verification use this so the
    /// same token can be presented again. A no-op without a replay detector.
    pub async fn release_scan(&self, scan: &VerifiedScan) {
        if let Some(detector) = &self.replay_detector {
            detector.release(&scan.nonce).await;
        }
    }

    fn check_freshness(&self, issued_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        let Some(max_age) = self.max_age else {
            return Ok(());
        };

        let age = now.signed_duration_since(issued_at);
        let leeway = chrono::Duration::from_std(CLOCK_SKEW_LEEWAY).unwrap_or(chrono::TimeDelta::MAX);
        if age < -leeway {
            tracing::debug!(age_secs = age.num_seconds(), "location token issued in the future");
            return Err(TokenError::TokenNotYetValid);
        }
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::TimeDelta::MAX);
        if age > max_age {
            tracing::debug!(age_secs = age.num_seconds(), "location token expired");
            return Err(TokenError::TokenExpired);
        }
        Ok(())
    }

    /// How long a verified nonce must be remembered: until the token could no
    /// longer pass the freshness check, or a fixed day without a window.
    fn replay_retention(&self, issued_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        match self.max_age {
            Some(max_age) => {
                let age = now.signed_duration_since(issued_at).to_std().unwrap_or(Duration::ZERO);
                (max_age + CLOCK_SKEW_LEEWAY).saturating_sub(age)
            },
            None => DEFAULT_REPLAY_RETENTION,
        }
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| TokenError::InvalidSecret(e.to_string()))?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

impl std::fmt::Debug for LocationTokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationTokenService")
            .field("secret", &"[REDACTED]")
            .field("locations", &self.locations)
            .field("max_age", &self.max_age)
            .field("replay_detection", &self.replay_detector.is_some())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const SECRET: &str = "unit-test-secret-with-enough-bytes!!";

    fn service() -> LocationTokenService {
        let config = TokenConfig::builder().secret(SECRET.to_owned()).build().unwrap();
        LocationTokenService::new(&config).unwrap()
    }

    fn sign_raw(payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(payload);
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload),
            URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
        )
    }

    #[test]
    fn test_payload_field_order() {
        let payload = LocationTokenPayload {
            location: "Block A".into(),
            issued_at: 1_700_000_000,
            nonce: "abc".into(),
        };
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"location":"Block A","issuedAt":1700000000,"nonce":"abc"}"#
        );
    }

    #[test]
    fn test_mint_canonicalizes_location() {
        let minted = service().mint("FRONTGATE").unwrap();
        assert_eq!(minted.location.as_str(), "FrontGate");

        let (payload, _) = minted.token.split_once('.').unwrap();
        let payload: LocationTokenPayload =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap();
        assert_eq!(payload.location, "FrontGate");
        assert_eq!(URL_SAFE_NO_PAD.decode(&payload.nonce).unwrap().len(), NONCE_LEN);
    }

    #[test]
    fn test_mint_unknown_location() {
        assert!(matches!(service().mint("Block G"), Err(TokenError::UnknownLocation { .. })));
    }

    #[test]
    fn test_nonces_differ() {
        let service = service();
        let a = service.mint("Block A").unwrap();
        let b = service.mint("Block A").unwrap();
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_signed_payload_with_unknown_location_is_malformed() {
        let token = sign_raw(br#"{"location":"Block G","issuedAt":1700000000,"nonce":"abc"}"#);
        assert!(matches!(service().verify(&token), Err(TokenError::MalformedToken(_))));
    }

    #[test]
    fn test_signed_payload_with_noncanonical_location_is_malformed() {
        let token = sign_raw(br#"{"location":"block a","issuedAt":1700000000,"nonce":"abc"}"#);
        assert!(matches!(service().verify(&token), Err(TokenError::MalformedToken(_))));
    }

    #[test]
    fn test_signed_payload_missing_field_is_malformed() {
        let token = sign_raw(br#"{"location":"Block A","nonce":"abc"}"#);
        assert!(matches!(service().verify(&token), Err(TokenError::MalformedToken(_))));
    }

    #[test]
    fn test_signed_array_payload_is_malformed() {
        let token = sign_raw(br#"["Block A",1700000000,"abc"]"#);
        assert!(matches!(service().verify(&token), Err(TokenError::MalformedToken(_))));

        let token = sign_raw(br#""Block A""#);
        assert!(matches!(service().verify(&token), Err(TokenError::MalformedToken(_))));
    }

    #[test]
    fn test_signed_non_json_is_malformed() {
        let token = sign_raw(b"not json at all");
        assert!(matches!(service().verify(&token), Err(TokenError::MalformedToken(_))));
    }

    #[test]
    fn test_freshness_window() {
        let config = TokenConfig::builder()
            .secret(SECRET.to_owned())
            .max_age(Duration::from_secs(300))
            .build()
            .unwrap();
        let service = LocationTokenService::new(&config).unwrap();
        let issued = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let token = service.mint_at("Block A", issued).unwrap().token;

        let within = issued + chrono::Duration::seconds(300);
        assert!(service.verify_at(&token, within).is_ok());

        let after = issued + chrono::Duration::seconds(301);
        assert!(matches!(service.verify_at(&token, after), Err(TokenError::TokenExpired)));

        let skewed = issued - chrono::Duration::seconds(30);
        assert!(service.verify_at(&token, skewed).is_ok());

        let early = issued - chrono::Duration::seconds(61);
        assert!(matches!(service.verify_at(&token, early), Err(TokenError::TokenNotYetValid)));
    }

    #[test]
    fn test_no_window_accepts_old_tokens() {
        let service = service();
        let issued = DateTime::from_timestamp(1_000_000_000, 0).unwrap();
        let token = service.mint_at("Block C", issued).unwrap().token;
        let scan = service.verify(&token).unwrap();
        assert_eq!(scan.issued_at, issued);
    }

    #[test]
    fn test_replay_retention() {
        let config = TokenConfig::builder()
            .secret(SECRET.to_owned())
            .max_age(Duration::from_secs(300))
            .build()
            .unwrap();
        let service = LocationTokenService::new(&config).unwrap();
        let issued = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let now = issued + chrono::Duration::seconds(100);
        assert_eq!(service.replay_retention(issued, now), Duration::from_secs(260));

        assert_eq!(self::service().replay_retention(issued, now), DEFAULT_REPLAY_RETENTION);
    }

    #[tokio::test]
    async fn test_verify_scan_rejects_replay_when_installed() {
        let config = TokenConfig::builder()
            .secret(SECRET.to_owned())
            .replay_cache_capacity(100)
            .build()
            .unwrap();
        let service = LocationTokenService::new(&config).unwrap();
        let token = service.mint("Block D").unwrap().token;

        assert!(service.verify_scan(&token).await.is_ok());
        assert!(matches!(service.verify_scan(&token).await, Err(TokenError::TokenReplayed { .. })));
        // Plain verification never consults the detector.
        assert!(service.verify(&token).is_ok());
    }

    #[tokio::test]
    async fn test_release_scan_allows_another_presentation() {
        let config = TokenConfig::builder()
            .secret(SECRET.to_owned())
            .replay_cache_capacity(100)
            .build()
            .unwrap();
        let service = LocationTokenService::new(&config).unwrap();
        let token = service.mint("Block E").unwrap().token;

        let scan = service.verify_scan(&token).await.unwrap();
        service.release_scan(&scan).await;
        assert!(service.verify_scan(&token).await.is_ok());
        assert!(matches!(service.verify_scan(&token).await, Err(TokenError::TokenReplayed { .. })));
    }

    #[tokio::test]
    async fn test_verify_scan_without_detector_allows_reuse() {
        let service = service();
        let token = service.mint("Block D").unwrap().token;
        assert!(service.verify_scan(&token).await.is_ok());
        assert!(service.verify_scan(&token).await.is_ok());
    }

    #[test]
    fn test_debug_redacts_secret() {
        assert!(!format!("{:?}", service()).contains(SECRET));
    }

    mod proptest_no_panic {
        use super::*;

        proptest! {
            /// Verification never panics, whatever the input.
            #[test]
            fn verify_arbitrary_input(input in ".{0,256}") {
                let _ = service().verify(&input);
            }

            /// Two base64url segments of arbitrary bytes never verify.
            #[test]
            fn random_segments_rejected(
                payload in proptest::collection::vec(any::<u8>(), 0..128),
                signature in proptest::collection::vec(any::<u8>(), 0..64),
            ) {
                let token = format!(
                    "{}.{}",
                    URL_SAFE_NO_PAD.encode(&payload),
                    URL_SAFE_NO_PAD.encode(&signature)
                );
                prop_assert!(service().verify(&token).is_err());
            }
        }
    }
}
