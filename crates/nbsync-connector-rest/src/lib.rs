//! # REST Repositories
//!
//! HTTP implementations of the sync repositories.
//!
//! - [`YandexCloudClient`] lists zones, clouds, folders, subnets and
//!   instances from the Yandex Cloud REST APIs.
//! - [`NetBoxClient`] reads and writes NetBox records through its REST API.
//!
//! Both clients share one transport: bearer/token authentication, a
//! per-request timeout and retry with exponential backoff for transient
//! failures. Callers see a single terminal result per call.
//!
//! ## Example
//!
//! ```ignore
//! use nbsync_connector_rest::{NetBoxClient, NetBoxConfig, RetryConfig};
//!
//! let config = NetBoxConfig::new("https://netbox.example.com", "api-token")
//!     .with_retry(RetryConfig::new(5));
//! let netbox = NetBoxClient::new(config)?;
//! let clusters = netbox.list(ObjectKind::Cluster).await?;
//! ```

pub mod config;
pub mod netbox;
mod transport;
pub mod yandex;

// Re-exports
pub use config::{NetBoxConfig, RetryConfig, YandexConfig, YandexService};
pub use netbox::NetBoxClient;
pub use transport::parse_retry_after;
pub use yandex::YandexCloudClient;
