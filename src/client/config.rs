//! Declarative client configuration.

use std::collections::BTreeMap;

use serde::Deserialize;
use url::Url;

use super::constants::{MAX_CONFIGURED_RETRIES, TIMEOUT_SECS_RANGE};
use crate::message::RedirectPolicy;

/// Serde-loadable client settings. Every field is optional; unset fields
/// keep the builder defaults.
///
/// ```
/// use fetcher_core::client::ClientConfig;
///
/// let config = ClientConfig::from_json(r#"{
///     "base_url": "https://api.example.com/v1/",
///     "timeout_secs": 20,
///     "max_retries": 2,
///     "default_headers": { "accept": "application/json" }
/// }"#).unwrap();
/// assert_eq!(config.max_retries, Some(2));
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    /// Per-attempt request timeout.
    pub timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_non_idempotent: Option<bool>,
    pub throw_on_http_error: Option<bool>,
    pub redirect: Option<RedirectPolicy>,
    pub keep_alive: Option<bool>,
    pub default_headers: BTreeMap<String, String>,
}

/// Rejected configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config value for `{field}`: {value}. Expected range: {expected}")]
    OutOfRange {
        field: &'static str,
        value: u64,
        expected: String,
    },

    #[error("invalid config value for `base_url`: {url}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("malformed client config: {0}")]
    Parse(#[from] serde_json::Error),

    /// The default transport could not be built.
    #[error("failed to build HTTP transport: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ClientConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON or unknown fields.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Checks value ranges and that the base URL parses.
    ///
    /// # Errors
    ///
    /// Returns the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_timeout_secs("timeout_secs", self.timeout_secs)?;
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;

        if let Some(max_retries) = self.max_retries
            && max_retries > MAX_CONFIGURED_RETRIES
        {
            return Err(ConfigError::OutOfRange {
                field: "max_retries",
                value: u64::from(max_retries),
                expected: format!("0..={MAX_CONFIGURED_RETRIES}"),
            });
        }

        if let Some(base_url) = &self.base_url {
            parse_base_url(base_url)?;
        }
        Ok(())
    }
}

pub(crate) fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|source| ConfigError::InvalidBaseUrl {
        url: raw.to_string(),
        source,
    })
}

fn validate_timeout_secs(field: &'static str, value: Option<u64>) -> Result<(), ConfigError> {
    let Some(value) = value else {
        return Ok(());
    };
    if !TIMEOUT_SECS_RANGE.contains(&value) {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            expected: format!(
                "{}..={}",
                TIMEOUT_SECS_RANGE.start(),
                TIMEOUT_SECS_RANGE.end()
            ),
        });
    }
    Ok(())
}
