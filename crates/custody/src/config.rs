//! Service configuration.

use keyward_storage::{CasRetryConfig, RetryConfig};
use keyward_token::TokenConfig;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for [`CustodyService`](crate::CustodyService).
///
/// Loaded from a JSON document; only the `token` section is required.
///
/// ```
/// use keyward_custody::CustodyConfig;
///
/// let config = CustodyConfig::from_json(
///     r#"{
///         "token": {
///             "secret": "0123456789abcdef0123456789abcdef",
///             "max_age": "10m"
///         },
///         "cas_retry": { "max_retries": 8 }
///     }"#,
/// )
/// .unwrap();
/// assert_eq!(config.cas_retry.max_retries, 8);
/// assert_eq!(config.retry.max_retries, 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustodyConfig {
    /// Location token settings.
    pub token: TokenConfig,

    /// Retry policy for transient store failures on reads.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Retry policy for concurrent writers racing on the same record.
    #[serde(default)]
    pub cas_retry: CasRetryConfig,
}

impl CustodyConfig {
    /// A configuration with default retry policies.
    #[must_use]
    pub fn new(token: TokenConfig) -> Self {
        Self { token, retry: RetryConfig::default(), cas_retry: CasRetryConfig::default() }
    }

    /// Parses and validates a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON or unknown fields,
    /// and [`ConfigError::Token`] if the token section does not validate.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.token.validate()?;
        Ok(config)
    }
}
