//! Destination object kinds
//!
//! The record types the synchroniser reads and writes in the inventory.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of record stored in the destination inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectKind {
    /// Management tag.
    Tag,
    /// Site (one per availability zone).
    Site,
    /// Cluster type.
    ClusterType,
    /// Cluster (one per folder).
    Cluster,
    /// Operating system platform.
    Platform,
    /// IP prefix (one per subnet).
    Prefix,
    /// Virtual machine.
    VirtualMachine,
    /// VM network interface (attachment point).
    VmInterface,
    /// IP address.
    IpAddress,
    /// Virtual disk.
    VirtualDisk,
}

impl ObjectKind {
    /// Get all kinds in snapshot load order.
    #[must_use]
    pub fn all() -> &'static [ObjectKind] {
        &[
            ObjectKind::Tag,
            ObjectKind::Site,
            ObjectKind::ClusterType,
            ObjectKind::Cluster,
            ObjectKind::Platform,
            ObjectKind::Prefix,
            ObjectKind::VirtualMachine,
            ObjectKind::VmInterface,
            ObjectKind::IpAddress,
            ObjectKind::VirtualDisk,
        ]
    }

    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Tag => "tag",
            ObjectKind::Site => "site",
            ObjectKind::ClusterType => "cluster-type",
            ObjectKind::Cluster => "cluster",
            ObjectKind::Platform => "platform",
            ObjectKind::Prefix => "prefix",
            ObjectKind::VirtualMachine => "virtual-machine",
            ObjectKind::VmInterface => "vm-interface",
            ObjectKind::IpAddress => "ip-address",
            ObjectKind::VirtualDisk => "virtual-disk",
        }
    }

    /// Get the REST API path for this kind, relative to `/api/`.
    #[must_use]
    pub fn endpoint(&self) -> &'static str {
        match self {
            ObjectKind::Tag => "extras/tags",
            ObjectKind::Site => "dcim/sites",
            ObjectKind::ClusterType => "virtualization/cluster-types",
            ObjectKind::Cluster => "virtualization/clusters",
            ObjectKind::Platform => "dcim/platforms",
            ObjectKind::Prefix => "ipam/prefixes",
            ObjectKind::VirtualMachine => "virtualization/virtual-machines",
            ObjectKind::VmInterface => "virtualization/interfaces",
            ObjectKind::IpAddress => "ipam/ip-addresses",
            ObjectKind::VirtualDisk => "virtualization/virtual-disks",
        }
    }

    /// Field holding the record's identifying name.
    #[must_use]
    pub fn name_field(&self) -> &'static str {
        match self {
            ObjectKind::Prefix => "prefix",
            ObjectKind::IpAddress => "address",
            _ => "name",
        }
    }

    /// Check if records of this kind can carry tags.
    #[must_use]
    pub fn is_taggable(&self) -> bool {
        !matches!(self, ObjectKind::Tag)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = ParseObjectKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObjectKind::all()
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s.to_lowercase())
            .ok_or_else(|| ParseObjectKindError(s.to_string()))
    }
}

/// Error parsing an object kind from string.
#[derive(Debug, Clone)]
pub struct ParseObjectKindError(String);

impl fmt::Display for ParseObjectKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid object kind '{}'", self.0)
    }
}

impl std::error::Error for ParseObjectKindError {}
