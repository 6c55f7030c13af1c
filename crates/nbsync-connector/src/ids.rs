//! Record identifiers
//!
//! Newtype wrappers for destination-assigned IDs and the placeholders that
//! stand in for records which have been planned but not yet created.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Identifier assigned by the destination inventory to a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    /// Wrap a raw destination ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw numeric value.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<RecordId> for u64 {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

/// Placeholder for a record queued for creation.
///
/// Tags are allocated per run and never reused within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingTag(u32);

impl PendingTag {
    /// Create a tag from its sequence number.
    #[must_use]
    pub const fn new(seq: u32) -> Self {
        Self(seq)
    }

    /// Get the sequence number.
    #[must_use]
    pub const fn seq(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for PendingTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pending#{}", self.0)
    }
}

/// Reference to a destination record that may not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "id", rename_all = "snake_case")]
pub enum Ref {
    /// The record exists and has a real ID.
    Resolved(RecordId),
    /// The record is queued for creation.
    Pending(PendingTag),
}

impl Ref {
    /// Get the real ID, if the reference is resolved.
    #[must_use]
    pub fn resolved(&self) -> Option<RecordId> {
        match self {
            Ref::Resolved(id) => Some(*id),
            Ref::Pending(_) => None,
        }
    }

    /// Get the placeholder tag, if the reference is still pending.
    #[must_use]
    pub fn pending(&self) -> Option<PendingTag> {
        match self {
            Ref::Resolved(_) => None,
            Ref::Pending(tag) => Some(*tag),
        }
    }

    /// Check if the reference holds a real ID.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Ref::Resolved(_))
    }
}

impl From<RecordId> for Ref {
    fn from(id: RecordId) -> Self {
        Ref::Resolved(id)
    }
}

impl From<PendingTag> for Ref {
    fn from(tag: PendingTag) -> Self {
        Ref::Pending(tag)
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ref::Resolved(id) => write!(f, "{id}"),
            Ref::Pending(tag) => write!(f, "{tag}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_roundtrip_display() {
        let id = RecordId::new(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!("42".parse::<RecordId>().unwrap(), id);
        assert!("abc".parse::<RecordId>().is_err());
    }

    #[test]
    fn test_ref_accessors() {
        let resolved = Ref::from(RecordId::new(7));
        assert!(resolved.is_resolved());
        assert_eq!(resolved.resolved(), Some(RecordId::new(7)));
        assert_eq!(resolved.pending(), None);

        let pending = Ref::from(PendingTag::new(3));
        assert!(!pending.is_resolved());
        assert_eq!(pending.resolved(), None);
        assert_eq!(pending.pending(), Some(PendingTag::new(3)));
        assert_eq!(pending.to_string(), "pending#3");
    }

    #[test]
    fn test_pending_never_equals_resolved() {
        assert_ne!(Ref::Pending(PendingTag::new(1)), Ref::Resolved(RecordId::new(1)));
    }

    #[test]
    fn test_ref_serialization() {
        let json = serde_json::to_value(Ref::Resolved(RecordId::new(5))).unwrap();
        assert_eq!(json, serde_json::json!({"state": "resolved", "id": 5}));
        let json = serde_json::to_value(Ref::Pending(PendingTag::new(2))).unwrap();
        assert_eq!(json, serde_json::json!({"state": "pending", "id": 2}));
    }
}
