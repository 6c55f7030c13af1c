//! Environment configuration
//!
//! # Required Variables
//!
//! - `YC_TOKEN` - Yandex Cloud OAuth or IAM token
//! - `NETBOX_URL` - NetBox base URL
//! - `NETBOX_TOKEN` - NetBox API token
//!
//! # Optional Variables
//!
//! - `LOG_LEVEL` - Log level used when `RUST_LOG` is unset (default: "INFO")
//! - `LOG_FORMAT` - `json` for JSON lines, anything else for text
//! - `NBSYNC_HTTP_TIMEOUT_SECS` - Per-request timeout (default: 30)
//! - `NBSYNC_MAX_RETRIES` - Retries for transient HTTP failures (default: 3)
//! - `YC_API_BASE` - Single base URL replacing the Yandex Cloud service hosts

use std::fmt;
use std::str::FromStr;

use nbsync_connector_rest::config::mask_secret;
use nbsync_connector_rest::{NetBoxConfig, RetryConfig, YandexConfig};
use thiserror::Error;

const REQUIRED: [&str; 3] = ["YC_TOKEN", "NETBOX_URL", "NETBOX_TOKEN"];

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable(s): {}", .0.join(", "))]
    MissingVars(Vec<String>),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Runtime configuration read from the environment.
#[derive(Clone)]
pub struct SyncConfig {
    pub yc_token: String,
    pub netbox_url: String,
    pub netbox_token: String,
    pub log_level: String,
    pub log_json: bool,
    pub http_timeout_secs: u64,
    pub max_retries: u32,
    pub yc_api_base: Option<String>,
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("yc_token", &mask_secret(&self.yc_token))
            .field("netbox_url", &self.netbox_url)
            .field("netbox_token", &mask_secret(&self.netbox_token))
            .field("log_level", &self.log_level)
            .field("log_json", &self.log_json)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("yc_api_base", &self.yc_api_base)
            .finish()
    }
}

impl SyncConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|name| std::env::var(name).ok())
    }

    /// Load configuration through a variable lookup function.
    ///
    /// Blank values count as unset. Every missing required variable is
    /// reported in one error.
    pub fn from_reader<F>(read: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            read(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let missing: Vec<String> = REQUIRED
            .iter()
            .filter(|name| get(name).is_none())
            .map(|name| (*name).to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingVars(missing));
        }

        Ok(Self {
            yc_token: get("YC_TOKEN").unwrap_or_default(),
            netbox_url: get("NETBOX_URL").unwrap_or_default(),
            netbox_token: get("NETBOX_TOKEN").unwrap_or_default(),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "INFO".to_string()),
            log_json: get("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            http_timeout_secs: parse_or("NBSYNC_HTTP_TIMEOUT_SECS", get("NBSYNC_HTTP_TIMEOUT_SECS"), 30)?,
            max_retries: parse_or("NBSYNC_MAX_RETRIES", get("NBSYNC_MAX_RETRIES"), 3)?,
            yc_api_base: get("YC_API_BASE"),
        })
    }

    /// Log filter directive derived from `LOG_LEVEL`.
    #[must_use]
    pub fn log_filter(&self) -> String {
        self.log_level.to_lowercase()
    }

    fn retry(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries)
    }

    /// Source client configuration.
    #[must_use]
    pub fn yandex_config(&self) -> YandexConfig {
        let config = YandexConfig::new(&self.yc_token)
            .with_timeout(self.http_timeout_secs)
            .with_retry(self.retry());
        match &self.yc_api_base {
            Some(base) => config.with_api_base(base),
            None => config,
        }
    }

    /// Destination client configuration.
    #[must_use]
    pub fn netbox_config(&self) -> NetBoxConfig {
        NetBoxConfig::new(&self.netbox_url, &self.netbox_token)
            .with_timeout(self.http_timeout_secs)
            .with_retry(self.retry())
    }
}

fn parse_or<T: FromStr>(var: &str, value: Option<String>, default: T) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            message: format!("expected a non-negative integer, got '{raw}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn reader(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("YC_TOKEN", "y0_AgAAAAB1234567890abcdef"),
            ("NETBOX_URL", "https://netbox.example.com"),
            ("NETBOX_TOKEN", "0123456789abcdef0123456789abcdef"),
        ]
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::from_reader(reader(&required())).unwrap();

        assert_eq!(config.log_level, "INFO");
        assert_eq!(config.log_filter(), "info");
        assert!(!config.log_json);
        assert_eq!(config.http_timeout_secs, 30);
        assert_eq!(config.max_retries, 3);
        assert!(config.yc_api_base.is_none());
    }

    #[test]
    fn test_all_missing_reported_together() {
        let err = SyncConfig::from_reader(reader(&[("NETBOX_URL", "https://nb")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingVars(vec!["YC_TOKEN".to_string(), "NETBOX_TOKEN".to_string()])
        );
        assert!(err.to_string().contains("YC_TOKEN, NETBOX_TOKEN"));
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let mut vars = required();
        vars[0] = ("YC_TOKEN", "   ");
        let err = SyncConfig::from_reader(reader(&vars)).unwrap_err();
        assert_eq!(err, ConfigError::MissingVars(vec!["YC_TOKEN".to_string()]));
    }

    #[test]
    fn test_optional_overrides() {
        let mut vars = required();
        vars.extend([
            ("LOG_LEVEL", "DEBUG"),
            ("LOG_FORMAT", "JSON"),
            ("NBSYNC_HTTP_TIMEOUT_SECS", "5"),
            ("NBSYNC_MAX_RETRIES", "0"),
            ("YC_API_BASE", "http://127.0.0.1:9000"),
        ]);
        let config = SyncConfig::from_reader(reader(&vars)).unwrap();

        assert_eq!(config.log_filter(), "debug");
        assert!(config.log_json);
        assert_eq!(config.http_timeout_secs, 5);
        assert_eq!(config.max_retries, 0);

        let yandex = config.yandex_config();
        assert_eq!(yandex.api_base.as_deref(), Some("http://127.0.0.1:9000"));
        assert_eq!(yandex.timeout_secs, 5);
        assert_eq!(yandex.retry.max_retries, 0);

        let netbox = config.netbox_config();
        assert_eq!(netbox.timeout_secs, 5);
    }

    #[test]
    fn test_invalid_number_rejected() {
        let mut vars = required();
        vars.push(("NBSYNC_MAX_RETRIES", "many"));
        let err = SyncConfig::from_reader(reader(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref var, .. } if var == "NBSYNC_MAX_RETRIES"));
    }

    #[test]
    fn test_debug_masks_secrets() {
        let config = SyncConfig::from_reader(reader(&required())).unwrap();
        let debug = format!("{config:?}");

        assert!(!debug.contains("0123456789abcdef0123456789abcdef"));
        assert!(debug.contains("0123***cdef"));
        assert!(debug.contains("y0_A***cdef"));
        assert!(debug.contains("https://netbox.example.com"));
    }
}
