//! Reconciliation type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How planned changes are executed against the destination.
///
/// Both modes produce the same final state for the same input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// All entities advance through ordered phases together.
    #[default]
    Batch,
    /// Each entity runs through every phase before the next one starts.
    Standard,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Batch => write!(f, "batch"),
            ExecutionMode::Standard => write!(f, "standard"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "batch" => Ok(ExecutionMode::Batch),
            "standard" => Ok(ExecutionMode::Standard),
            _ => Err(format!("Unknown execution mode: {s}")),
        }
    }
}

/// Kind of write a decision stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Migrate,
    Tag,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create => write!(f, "create"),
            Action::Update => write!(f, "update"),
            Action::Migrate => write!(f, "migrate"),
            Action::Tag => write!(f, "tag"),
            Action::Delete => write!(f, "delete"),
        }
    }
}

/// Category an updated field is reported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldCategory {
    /// Descriptive or measured values (notes, status, sizes).
    Content,
    /// References to owning records, compared by ID.
    ParentReference,
    /// The primary-address designation.
    PrimaryAddress,
    /// Anything else (platform, tags).
    Other,
}

impl FieldCategory {
    /// Classify a destination field name.
    #[must_use]
    pub fn of(field: &str) -> Self {
        match field {
            "name" | "slug" | "comments" | "description" | "status" | "vcpus" | "memory"
            | "size" | "prefix" | "address" | "enabled" => FieldCategory::Content,
            "cluster" | "site" | "type" | "virtual_machine" | "assigned_object_type"
            | "assigned_object_id" | "scope_type" | "scope_id" => FieldCategory::ParentReference,
            "primary_ip4" | "primary_ip6" => FieldCategory::PrimaryAddress,
            _ => FieldCategory::Other,
        }
    }
}

impl fmt::Display for FieldCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldCategory::Content => write!(f, "content"),
            FieldCategory::ParentReference => write!(f, "parent_reference"),
            FieldCategory::PrimaryAddress => write!(f, "primary_address"),
            FieldCategory::Other => write!(f, "other"),
        }
    }
}
