//! Shared fixtures: an in-memory destination and a fixed source.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use nbsync_connector::error::{ConnectorError, ConnectorResult};
use nbsync_connector::fields::FieldSet;
use nbsync_connector::ids::RecordId;
use nbsync_connector::record::DestinationRecord;
use nbsync_connector::source::{
    Cloud, DiskKind, Folder, Instance, InstanceDisk, InstanceInterface, InstanceResources,
    Subnet, Zone,
};
use nbsync_connector::traits::{DestinationRepository, SourceRepository};
use nbsync_connector::types::ObjectKind;

// =============================================================================
// Destination
// =============================================================================

/// In-memory destination inventory.
pub struct MockDestination {
    records: Mutex<BTreeMap<(ObjectKind, RecordId), DestinationRecord>>,
    next_id: AtomicU64,
    creates: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
    tags: AtomicUsize,
    failing: Mutex<HashSet<ObjectKind>>,
}

impl MockDestination {
    #[must_use]
    pub fn new() -> Self {
        Self::with_records(Vec::new())
    }

    #[must_use]
    pub fn with_records(records: Vec<DestinationRecord>) -> Self {
        let next = records.iter().map(|r| r.id.get()).max().unwrap_or(0) + 1;
        Self {
            records: Mutex::new(records.into_iter().map(|r| ((r.kind, r.id), r)).collect()),
            next_id: AtomicU64::new(next.max(1000)),
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            tags: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Reject every create of a kind.
    pub fn fail_creates(&self, kind: ObjectKind) {
        self.failing.lock().unwrap().insert(kind);
    }

    pub fn record(&self, kind: ObjectKind, id: RecordId) -> Option<DestinationRecord> {
        self.records.lock().unwrap().get(&(kind, id)).cloned()
    }

    pub fn all(&self, kind: ObjectKind) -> Vec<DestinationRecord> {
        self.records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    /// Every stored record, for seeding another destination.
    pub fn records(&self) -> Vec<DestinationRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    /// Overwrite one field without counting a write.
    pub fn set_field(&self, kind: ObjectKind, id: RecordId, field: &str, value: &str) {
        if let Some(record) = self.records.lock().unwrap().get_mut(&(kind, id)) {
            record.fields.set(field, value);
        }
    }

    pub fn named(&self, kind: ObjectKind, name: &str) -> Vec<DestinationRecord> {
        self.all(kind)
            .into_iter()
            .filter(|r| r.name() == name)
            .collect()
    }

    pub fn count(&self, kind: ObjectKind) -> usize {
        self.all(kind).len()
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn mutating_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
            + self.updates.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
            + self.tags.load(Ordering::SeqCst)
    }

    /// Records with IDs blanked out, for comparing end states of two runs.
    pub fn shape(&self) -> Vec<(ObjectKind, String, Vec<(String, String)>)> {
        let records = self.records.lock().unwrap();
        let names: BTreeMap<(ObjectKind, RecordId), String> = records
            .iter()
            .map(|(key, r)| (*key, r.name().to_string()))
            .collect();
        let label = |kind: ObjectKind, id: Option<RecordId>| {
            id.and_then(|id| names.get(&(kind, id)).cloned())
                .unwrap_or_else(|| "-".to_string())
        };

        let mut shape: Vec<_> = records
            .values()
            .map(|r| {
                let mut fields: Vec<(String, String)> = r
                    .fields
                    .iter()
                    .filter(|(name, _)| name.as_str() != "tags")
                    .map(|(name, value)| {
                        let rendered = match name.as_str() {
                            "cluster" => label(ObjectKind::Cluster, value.as_record_id()),
                            "site" | "scope_id" => label(ObjectKind::Site, value.as_record_id()),
                            "type" if r.kind == ObjectKind::Cluster => {
                                label(ObjectKind::ClusterType, value.as_record_id())
                            }
                            "platform" => label(ObjectKind::Platform, value.as_record_id()),
                            "virtual_machine" => {
                                label(ObjectKind::VirtualMachine, value.as_record_id())
                            }
                            "assigned_object_id" => {
                                label(ObjectKind::VmInterface, value.as_record_id())
                            }
                            "primary_ip4" => label(ObjectKind::IpAddress, value.as_record_id()),
                            _ => serde_json::to_string(value).unwrap(),
                        };
                        (name.clone(), rendered)
                    })
                    .collect();
                fields.sort();
                (r.kind, r.name().to_string(), fields)
            })
            .collect();
        shape.sort();
        shape
    }
}

impl Default for MockDestination {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DestinationRepository for MockDestination {
    fn display_name(&self) -> &str {
        "mock-netbox"
    }

    async fn list(&self, kind: ObjectKind) -> ConnectorResult<Vec<DestinationRecord>> {
        Ok(self.all(kind))
    }

    async fn filter(
        &self,
        kind: ObjectKind,
        field: &str,
        value: &str,
    ) -> ConnectorResult<Vec<DestinationRecord>> {
        Ok(self
            .all(kind)
            .into_iter()
            .filter(|r| r.fields.get_str(field) == Some(value))
            .collect())
    }

    async fn create(&self, kind: ObjectKind, fields: FieldSet) -> ConnectorResult<RecordId> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(&kind) {
            return Err(ConnectorError::InvalidData {
                message: format!("{kind} rejected"),
            });
        }
        let id = RecordId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.records
            .lock()
            .unwrap()
            .insert((kind, id), DestinationRecord::new(kind, id, fields));
        Ok(id)
    }

    async fn update(&self, kind: ObjectKind, id: RecordId, fields: FieldSet) -> ConnectorResult<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&(kind, id))
            .ok_or_else(|| ConnectorError::not_found(kind, id.to_string()))?;
        record.fields.merge(fields);
        Ok(())
    }

    async fn delete(&self, kind: ObjectKind, id: RecordId) -> ConnectorResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap()
            .remove(&(kind, id))
            .map(|_| ())
            .ok_or_else(|| ConnectorError::not_found(kind, id.to_string()))
    }

    async fn tag(&self, kind: ObjectKind, id: RecordId, tag: RecordId) -> ConnectorResult<()> {
        self.tags.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&(kind, id))
            .ok_or_else(|| ConnectorError::not_found(kind, id.to_string()))?;
        let mut tags = record.tags();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
        record.fields.set("tags", tags);
        Ok(())
    }
}

// =============================================================================
// Source
// =============================================================================

/// Source inventory returning fixed listings.
#[derive(Debug, Clone, Default)]
pub struct FixedSource {
    pub zones: Vec<Zone>,
    pub clouds: Vec<Cloud>,
    pub folders: Vec<Folder>,
    pub subnets: Vec<Subnet>,
    pub instances: Vec<Instance>,
    pub fail_instances: bool,
}

#[async_trait]
impl SourceRepository for FixedSource {
    fn display_name(&self) -> &str {
        "fixed-cloud"
    }

    async fn list_zones(&self) -> ConnectorResult<Vec<Zone>> {
        Ok(self.zones.clone())
    }

    async fn list_clouds(&self) -> ConnectorResult<Vec<Cloud>> {
        Ok(self.clouds.clone())
    }

    async fn list_folders(&self) -> ConnectorResult<Vec<Folder>> {
        Ok(self.folders.clone())
    }

    async fn list_subnets(&self) -> ConnectorResult<Vec<Subnet>> {
        Ok(self.subnets.clone())
    }

    async fn list_instances(&self) -> ConnectorResult<Vec<Instance>> {
        if self.fail_instances {
            return Err(ConnectorError::TargetUnavailable {
                message: "compute API down".to_string(),
            });
        }
        Ok(self.instances.clone())
    }
}

// =============================================================================
// Fixture builders
// =============================================================================

pub const CLOUD: &str = "grand-trade";
pub const ZONE: &str = "ru-central1-a";

pub fn record(kind: ObjectKind, id: u64, fields: FieldSet) -> DestinationRecord {
    DestinationRecord::new(kind, RecordId::new(id), fields)
}

pub fn folder(id: &str, name: &str) -> Folder {
    Folder {
        id: id.to_string(),
        name: name.to_string(),
        cloud_id: "b1g-cloud".to_string(),
        cloud_name: CLOUD.to_string(),
        description: String::new(),
    }
}

pub fn instance(name: &str, folder_id: &str, private: &str, nat: Option<&str>) -> Instance {
    Instance {
        id: format!("fhm-{name}"),
        name: name.to_string(),
        status: "RUNNING".to_string(),
        folder_id: folder_id.to_string(),
        cloud_id: "b1g-cloud".to_string(),
        zone_id: Some(ZONE.to_string()),
        resources: InstanceResources {
            memory: Some("4294967296".to_string()),
            cores: Some("2".to_string()),
        },
        disks: vec![InstanceDisk {
            id: Some(format!("epd-{name}")),
            name: format!("{name}-boot"),
            size_bytes: 20 * 1024 * 1024 * 1024,
            kind: DiskKind::Cloud,
        }],
        interfaces: vec![InstanceInterface {
            index: 0,
            subnet_id: Some("e9b-subnet".to_string()),
            primary_v4_address: Some(private.to_string()).filter(|p| !p.is_empty()),
            one_to_one_nat: nat.map(str::to_string),
        }],
        os: Some("ubuntu-22-04-lts".to_string()),
        platform_id: Some("standard-v3".to_string()),
        created_at: Some("2024-05-01T10:00:00Z".to_string()),
    }
}

/// A source with one zone, one cloud and the given folders and instances.
pub fn source(folders: Vec<Folder>, instances: Vec<Instance>) -> FixedSource {
    FixedSource {
        zones: vec![Zone::named(ZONE)],
        clouds: vec![Cloud {
            id: "b1g-cloud".to_string(),
            name: CLOUD.to_string(),
            description: String::new(),
        }],
        folders,
        subnets: vec![Subnet {
            id: "e9b-subnet".to_string(),
            name: "default-a".to_string(),
            cidr: Some("10.128.0.0/24".to_string()),
            network_id: "enp-net".to_string(),
            network_name: Some("default".to_string()),
            folder_id: "b1g-prod".to_string(),
            zone_id: Some(ZONE.to_string()),
            description: String::new(),
        }],
        instances,
        fail_instances: false,
    }
}
