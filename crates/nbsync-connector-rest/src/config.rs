//! REST client configuration
//!
//! Endpoint, credential and retry settings for both HTTP repositories.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use nbsync_connector::error::{ConnectorError, ConnectorResult};
use nbsync_connector::types::ObjectKind;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds (default: 100).
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds (default: 30000).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Backoff multiplier (default: 2.0).
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Whether to add jitter to backoff (default: true).
    #[serde(default = "default_use_jitter")]
    pub use_jitter: bool,

    /// HTTP status codes that should trigger a retry.
    #[serde(default = "default_retry_status_codes")]
    pub retry_status_codes: Vec<u16>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    30000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_use_jitter() -> bool {
    true
}

fn default_retry_status_codes() -> Vec<u16> {
    vec![429, 502, 503, 504]
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            use_jitter: default_use_jitter(),
            retry_status_codes: default_retry_status_codes(),
        }
    }
}

impl RetryConfig {
    /// Create a retry config with custom max retries.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Disable retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set initial backoff.
    #[must_use]
    pub fn with_initial_backoff(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    /// Set max backoff.
    #[must_use]
    pub fn with_max_backoff(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    /// Calculate backoff duration for a given attempt.
    #[must_use]
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_backoff_ms as f64);

        let delay_ms = if self.use_jitter {
            // Up to 25% either way
            let jitter_range = capped * 0.25;
            let jitter = (jitter_fraction() * jitter_range * 2.0) - jitter_range;
            (capped + jitter).max(0.0)
        } else {
            capped
        };

        Duration::from_millis(delay_ms as u64)
    }

    /// Check if a status code should trigger a retry.
    #[must_use]
    pub fn should_retry(&self, status_code: u16) -> bool {
        self.retry_status_codes.contains(&status_code)
    }
}

/// Pseudo-random value in `[0, 1)` for jitter.
fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (f64::from(nanos) / f64::from(u32::MAX)).fract()
}

/// Mask a secret for display: short values are hidden entirely, longer
/// ones keep their first and last four characters.
#[must_use]
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 12 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}***{tail}")
}

fn validate_base_url(field: &str, value: &str) -> ConnectorResult<()> {
    let url = url::Url::parse(value).map_err(|e| ConnectorError::InvalidConfiguration {
        message: format!("{field} is not a valid URL ({value}): {e}"),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConnectorError::InvalidConfiguration {
            message: format!("{field} has unsupported scheme: {other}"),
        }),
    }
}

fn validate_token(field: &str, token: &str) -> ConnectorResult<()> {
    if token.trim().is_empty() {
        return Err(ConnectorError::InvalidConfiguration {
            message: format!("{field} is required"),
        });
    }
    Ok(())
}

// =============================================================================
// NetBox
// =============================================================================

/// Configuration for the NetBox destination client.
#[derive(Clone, Serialize, Deserialize)]
pub struct NetBoxConfig {
    /// Base URL of the NetBox instance (without `/api`).
    pub base_url: String,

    /// API token, sent as `Authorization: Token <token>`.
    pub token: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Page size for listings.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Retry configuration.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_page_size() -> u32 {
    1000
}

impl NetBoxConfig {
    /// Create a config with default timeout and retry settings.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
            retry: RetryConfig::default(),
        }
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the listing page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Set retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConnectorResult<()> {
        validate_base_url("NetBox URL", &self.base_url)?;
        validate_token("NetBox token", &self.token)
    }

    /// Collection URL for a kind, e.g. `<base>/api/dcim/sites/`.
    #[must_use]
    pub fn collection_url(&self, kind: ObjectKind) -> String {
        format!(
            "{}/api/{}/",
            self.base_url.trim_end_matches('/'),
            kind.endpoint()
        )
    }

    /// URL of a single record.
    #[must_use]
    pub fn record_url(&self, kind: ObjectKind, id: impl fmt::Display) -> String {
        format!("{}{id}/", self.collection_url(kind))
    }
}

impl fmt::Debug for NetBoxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetBoxConfig")
            .field("base_url", &self.base_url)
            .field("token", &mask_secret(&self.token))
            .field("timeout_secs", &self.timeout_secs)
            .field("page_size", &self.page_size)
            .field("retry", &self.retry)
            .finish()
    }
}

// =============================================================================
// Yandex Cloud
// =============================================================================

/// Yandex Cloud API a request is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YandexService {
    Compute,
    ResourceManager,
    Vpc,
}

impl YandexService {
    /// Public host of the service.
    #[must_use]
    pub fn host(&self) -> &'static str {
        match self {
            YandexService::Compute => "https://compute.api.cloud.yandex.net",
            YandexService::ResourceManager => "https://resource-manager.api.cloud.yandex.net",
            YandexService::Vpc => "https://vpc.api.cloud.yandex.net",
        }
    }
}

/// Configuration for the Yandex Cloud source client.
#[derive(Clone, Serialize, Deserialize)]
pub struct YandexConfig {
    /// OAuth or IAM token, sent as `Authorization: Bearer <token>`.
    pub token: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Single base URL replacing every service host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,

    /// Retry configuration.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl YandexConfig {
    /// Create a config with default timeout and retry settings.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            timeout_secs: default_timeout_secs(),
            api_base: None,
            retry: RetryConfig::default(),
        }
    }

    /// Route every service to one base URL.
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = Some(base.into());
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConnectorResult<()> {
        if let Some(base) = &self.api_base {
            validate_base_url("Yandex API base", base)?;
        }
        validate_token("Yandex Cloud token", &self.token)
    }

    /// Full URL of an API path, e.g. `compute/v1/zones`.
    #[must_use]
    pub fn url(&self, service: YandexService, path: &str) -> String {
        let base = self.api_base.as_deref().unwrap_or(service.host());
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl fmt::Debug for YandexConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YandexConfig")
            .field("token", &mask_secret(&self.token))
            .field("timeout_secs", &self.timeout_secs)
            .field("api_base", &self.api_base)
            .field("retry", &self.retry)
            .finish()
    }
}
