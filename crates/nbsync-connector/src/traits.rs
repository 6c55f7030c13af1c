//! Repository traits
//!
//! Contracts for the two remote systems a sync run talks to. Implementations
//! own transport, authentication and retry; callers see one terminal result
//! per call.

use async_trait::async_trait;

use crate::error::ConnectorResult;
use crate::fields::FieldSet;
use crate::ids::RecordId;
use crate::record::DestinationRecord;
use crate::source::{Cloud, Folder, Instance, Subnet, Zone};
use crate::types::ObjectKind;

/// Read-only access to the cloud provider's inventory.
///
/// Each listing returns a finite, already-fetched sequence. A failure
/// surfaces as a single error for that listing.
#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Get the display name for this repository.
    fn display_name(&self) -> &str;

    /// List availability zones.
    async fn list_zones(&self) -> ConnectorResult<Vec<Zone>>;

    /// List clouds.
    async fn list_clouds(&self) -> ConnectorResult<Vec<Cloud>>;

    /// List folders across all clouds.
    async fn list_folders(&self) -> ConnectorResult<Vec<Folder>>;

    /// List subnets across all folders.
    async fn list_subnets(&self) -> ConnectorResult<Vec<Subnet>>;

    /// List instances across all folders.
    async fn list_instances(&self) -> ConnectorResult<Vec<Instance>>;
}

/// Read/write access to the destination inventory.
#[async_trait]
pub trait DestinationRepository: Send + Sync {
    /// Get the display name for this repository.
    fn display_name(&self) -> &str;

    /// List every record of a kind.
    async fn list(&self, kind: ObjectKind) -> ConnectorResult<Vec<DestinationRecord>>;

    /// List records of a kind whose `field` equals `value`.
    async fn filter(
        &self,
        kind: ObjectKind,
        field: &str,
        value: &str,
    ) -> ConnectorResult<Vec<DestinationRecord>>;

    /// List records of a kind by their identifying name.
    async fn filter_by_name(
        &self,
        kind: ObjectKind,
        name: &str,
    ) -> ConnectorResult<Vec<DestinationRecord>> {
        self.filter(kind, kind.name_field(), name).await
    }

    /// Get the first record of a kind with the given name.
    async fn get_by_name(
        &self,
        kind: ObjectKind,
        name: &str,
    ) -> ConnectorResult<Option<DestinationRecord>> {
        Ok(self.filter_by_name(kind, name).await?.into_iter().next())
    }

    /// Create a record and return its new ID.
    async fn create(&self, kind: ObjectKind, fields: FieldSet) -> ConnectorResult<RecordId>;

    /// Apply a partial update to a record.
    async fn update(&self, kind: ObjectKind, id: RecordId, fields: FieldSet)
        -> ConnectorResult<()>;

    /// Delete a record.
    async fn delete(&self, kind: ObjectKind, id: RecordId) -> ConnectorResult<()>;

    /// Add a tag to a record, keeping its existing tags.
    async fn tag(&self, kind: ObjectKind, id: RecordId, tag: RecordId) -> ConnectorResult<()>;
}
