//! Token service configuration.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    error::ConfigError,
    location::{DEFAULT_LOCATIONS, LocationSet},
};

/// Minimum accepted shared-secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

fn default_locations() -> Vec<String> {
    DEFAULT_LOCATIONS.iter().map(|name| (*name).to_owned()).collect()
}

/// Configuration for [`LocationTokenService`](crate::LocationTokenService).
///
/// The secret is held in [`Zeroizing`] and scrubbed on drop. It never
/// appears in `Debug` output.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use keyward_token::TokenConfig;
///
/// let config = TokenConfig::builder()
///     .secret("0123456789abcdef0123456789abcdef".to_owned())
///     .max_age(Duration::from_secs(300))
///     .build()
///     .unwrap();
/// assert_eq!(config.locations.len(), 7);
/// assert!(!format!("{config:?}").contains("0123456789abcdef"));
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenConfig {
    /// HMAC key shared by every deployment that mints or verifies tokens.
    pub secret: Zeroizing<String>,

    /// Canonical location names, in display order.
    #[serde(default = "default_locations")]
    pub locations: Vec<String>,

    /// Freshness window. Unset means tokens never expire.
    #[serde(with = "humantime_serde", default)]
    pub max_age: Option<Duration>,

    /// Capacity of the in-memory replay detector. Unset means no replay
    /// detection.
    #[serde(default)]
    pub replay_cache_capacity: Option<u64>,
}

#[bon::bon]
impl TokenConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the secret is shorter than
    /// [`MIN_SECRET_LEN`] bytes, the location set is invalid, or a zero
    /// `max_age` or `replay_cache_capacity` is given.
    #[builder]
    pub fn new(
        #[builder(into)] secret: Zeroizing<String>,
        #[builder(default = default_locations(), with = |iter: impl IntoIterator<Item = impl Into<String>>| {
            iter.into_iter().map(Into::into).collect()
        })]
        locations: Vec<String>,
        max_age: Option<Duration>,
        replay_cache_capacity: Option<u64>,
    ) -> Result<Self, ConfigError> {
        let config = Self { secret, locations, max_age, replay_cache_capacity };
        config.validate()?;
        Ok(config)
    }

    /// Checks every field and returns the recognized-location set.
    ///
    /// Deserialized configurations are validated when the service is built.
    ///
    /// # Errors
    ///
    /// See [`TokenConfig::new`].
    pub fn validate(&self) -> Result<LocationSet, ConfigError> {
        if self.secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::SecretTooShort { min: MIN_SECRET_LEN, actual: self.secret.len() });
        }
        if self.max_age == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroMaxAge);
        }
        if self.replay_cache_capacity == Some(0) {
            return Err(ConfigError::ZeroReplayCapacity);
        }
        LocationSet::new(self.locations.iter().cloned())
    }
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"[REDACTED]")
            .field("locations", &self.locations)
            .field("max_age", &self.max_age)
            .field("replay_cache_capacity", &self.replay_cache_capacity)
            .finish()
    }
}
