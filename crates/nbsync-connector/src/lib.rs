//! # Sync Connector Contracts
//!
//! Shared types and repository traits for reconciling a cloud provider's
//! inventory into a NetBox-style inventory system.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐        ┌────────────────────┐        ┌──────────────────────┐
//! │ SourceRepository │──────▶ │  reconciliation    │──────▶ │ DestinationRepository│
//! │  (zones, clouds, │ lists  │  core (provisioning│ writes │  (sites, clusters,   │
//! │  folders, ...)   │        │  crate)            │        │  VMs, IPs, ...)      │
//! └──────────────────┘        └────────────────────┘        └──────────────────────┘
//! ```
//!
//! - [`SourceRepository`](traits::SourceRepository) - read-only provider listings
//! - [`DestinationRepository`](traits::DestinationRepository) - inventory CRUD plus tagging
//!
//! ## Crate Organization
//!
//! - [`ids`] - `RecordId`, `PendingTag` and the `Ref` placeholder union
//! - [`types`] - `ObjectKind` and its REST endpoints
//! - [`fields`] - `FieldSet` / `FieldValue` payloads
//! - [`record`] - `DestinationRecord`
//! - [`source`] - provider snapshot records
//! - [`error`] - error types with transient/permanent classification
//! - [`traits`] - repository traits

pub mod error;
pub mod fields;
pub mod ids;
pub mod record;
pub mod source;
pub mod traits;
pub mod types;

/// Prelude module for convenient imports.
///
/// ```
/// use nbsync_connector::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{ConnectorError, ConnectorResult};
    pub use crate::fields::{FieldSet, FieldValue};
    pub use crate::ids::{PendingTag, RecordId, Ref};
    pub use crate::record::DestinationRecord;
    pub use crate::source::{
        Cloud, DiskKind, Folder, Instance, InstanceDisk, InstanceInterface, InstanceResources,
        Subnet, Zone,
    };
    pub use crate::traits::{DestinationRepository, SourceRepository};
    pub use crate::types::ObjectKind;
}

// Re-export async_trait for repository implementors
pub use async_trait::async_trait;
