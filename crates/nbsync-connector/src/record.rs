//! Destination records
//!
//! A record as read from the inventory: its kind, ID and flattened fields.

use serde::{Deserialize, Serialize};

use crate::fields::FieldSet;
use crate::ids::RecordId;
use crate::types::ObjectKind;

/// A record stored in the destination inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationRecord {
    /// Destination-assigned ID.
    pub id: RecordId,
    /// Record kind.
    pub kind: ObjectKind,
    /// Flattened fields (references carried as IDs).
    pub fields: FieldSet,
}

impl DestinationRecord {
    /// Create a record.
    #[must_use]
    pub fn new(kind: ObjectKind, id: RecordId, fields: FieldSet) -> Self {
        Self { id, kind, fields }
    }

    /// The identifying name (`name`, `prefix` or `address` depending on kind).
    #[must_use]
    pub fn name(&self) -> &str {
        self.fields.get_str(self.kind.name_field()).unwrap_or_default()
    }

    /// The slug, if the kind carries one.
    #[must_use]
    pub fn slug(&self) -> Option<&str> {
        self.fields.get_str("slug")
    }

    /// A string field, empty when absent.
    #[must_use]
    pub fn text(&self, field: &str) -> &str {
        self.fields.get_str(field).unwrap_or_default()
    }

    /// A reference field.
    #[must_use]
    pub fn reference(&self, field: &str) -> Option<RecordId> {
        self.fields.get_record_id(field)
    }

    /// Tag IDs attached to the record.
    #[must_use]
    pub fn tags(&self) -> Vec<RecordId> {
        self.fields.get_record_ids("tags")
    }

    /// Check if the record carries the given tag.
    #[must_use]
    pub fn has_tag(&self, tag: RecordId) -> bool {
        self.tags().contains(&tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_follows_kind() {
        let prefix = DestinationRecord::new(
            ObjectKind::Prefix,
            RecordId::new(3),
            FieldSet::new().with("prefix", "10.0.0.0/24"),
        );
        assert_eq!(prefix.name(), "10.0.0.0/24");

        let cluster = DestinationRecord::new(
            ObjectKind::Cluster,
            RecordId::new(4),
            FieldSet::new().with("name", "cloud/folder").with("slug", "cloud-folder"),
        );
        assert_eq!(cluster.name(), "cloud/folder");
        assert_eq!(cluster.slug(), Some("cloud-folder"));
    }

    #[test]
    fn test_tags() {
        let record = DestinationRecord::new(
            ObjectKind::VirtualMachine,
            RecordId::new(1),
            FieldSet::new().with("tags", vec![RecordId::new(8)]),
        );
        assert!(record.has_tag(RecordId::new(8)));
        assert!(!record.has_tag(RecordId::new(9)));
    }
}
