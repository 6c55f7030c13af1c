//! Source inventory model
//!
//! Read-only snapshot records listed from the cloud provider.

use serde::{Deserialize, Serialize};

/// Availability zone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

impl Zone {
    /// Create a zone whose name equals its ID.
    #[must_use]
    pub fn named(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
        }
    }
}

/// Cloud (top-level organisation unit).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cloud {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Folder inside a cloud.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub cloud_id: String,
    #[serde(default)]
    pub cloud_name: String,
    #[serde(default)]
    pub description: String,
}

/// VPC subnet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub name: String,
    pub cidr: Option<String>,
    pub network_id: String,
    pub network_name: Option<String>,
    pub folder_id: String,
    pub zone_id: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// Virtual machine instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub status: String,
    pub folder_id: String,
    pub cloud_id: String,
    pub zone_id: Option<String>,
    #[serde(default)]
    pub resources: InstanceResources,
    #[serde(default)]
    pub disks: Vec<InstanceDisk>,
    #[serde(default)]
    pub interfaces: Vec<InstanceInterface>,
    pub os: Option<String>,
    pub platform_id: Option<String>,
    pub created_at: Option<String>,
}

/// Compute resources as reported by the provider (raw text quantities).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceResources {
    pub memory: Option<String>,
    pub cores: Option<String>,
}

/// Disk attached to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDisk {
    pub id: Option<String>,
    pub name: String,
    pub size_bytes: u64,
    pub kind: DiskKind,
}

/// Disk storage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskKind {
    Cloud,
    Local,
}

impl DiskKind {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskKind::Cloud => "cloud",
            DiskKind::Local => "local",
        }
    }
}

/// Network interface of an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInterface {
    pub index: u32,
    pub subnet_id: Option<String>,
    pub primary_v4_address: Option<String>,
    pub one_to_one_nat: Option<String>,
}
