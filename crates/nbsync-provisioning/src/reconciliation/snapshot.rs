//! Run snapshots.
//!
//! Both inventories are read once at run start. The destination snapshot is
//! indexed and kept current as the run writes, so later passes see the
//! effect of earlier ones without re-querying.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use nbsync_connector::error::ConnectorResult;
use nbsync_connector::fields::FieldSet;
use nbsync_connector::ids::RecordId;
use nbsync_connector::record::DestinationRecord;
use nbsync_connector::source::{Cloud, Folder, Instance, Subnet, Zone};
use nbsync_connector::traits::{DestinationRepository, SourceRepository};
use nbsync_connector::types::ObjectKind;
use tracing::{info, warn};

use crate::error::{SyncError, SyncResult};

use super::address::base_address;

/// Object type marking an address as attached to a VM interface.
pub const VM_INTERFACE_OBJECT_TYPE: &str = "virtualization.vminterface";

/// Zones used when the provider's zone listing is unavailable or empty.
pub const DEFAULT_ZONES: [&str; 4] = [
    "ru-central1-a",
    "ru-central1-b",
    "ru-central1-c",
    "ru-central1-d",
];

/// Source inventory as listed at run start.
#[derive(Debug, Clone, Default)]
pub struct SourceSnapshot {
    pub zones: Vec<Zone>,
    pub clouds: Vec<Cloud>,
    pub folders: Vec<Folder>,
    pub subnets: Vec<Subnet>,
    pub instances: Vec<Instance>,
    /// Set when any listing failed and was replaced by a fallback.
    pub partial: bool,
}

impl SourceSnapshot {
    /// List every source collection once.
    ///
    /// Only a failed cloud listing aborts; other failures leave an empty
    /// (or default) collection and mark the snapshot partial.
    pub async fn fetch<S: SourceRepository + ?Sized>(source: &S) -> SyncResult<Self> {
        let mut snapshot = Self::default();

        snapshot.zones = match source.list_zones().await {
            Ok(zones) if !zones.is_empty() => zones,
            Ok(_) => default_zones(),
            Err(e) => {
                warn!(error = %e, "Failed to list zones, falling back to defaults");
                snapshot.partial = true;
                default_zones()
            }
        };

        snapshot.clouds = source
            .list_clouds()
            .await
            .map_err(|e| SyncError::source_unavailable(format!("failed to list clouds: {e}")))?;

        snapshot.folders = snapshot.collect("folders", source.list_folders().await);
        snapshot.subnets = snapshot.collect("subnets", source.list_subnets().await);
        snapshot.instances = snapshot.collect("instances", source.list_instances().await);

        info!(
            source = %source.display_name(),
            zones = snapshot.zones.len(),
            clouds = snapshot.clouds.len(),
            folders = snapshot.folders.len(),
            subnets = snapshot.subnets.len(),
            instances = snapshot.instances.len(),
            partial = snapshot.partial,
            "Fetched source inventory"
        );

        Ok(snapshot)
    }

    fn collect<T>(&mut self, what: &str, listing: ConnectorResult<Vec<T>>) -> Vec<T> {
        match listing {
            Ok(items) => items,
            Err(e) => {
                warn!(listing = what, error = %e, "Source listing failed, continuing without it");
                self.partial = true;
                Vec::new()
            }
        }
    }

    /// Find a folder by ID.
    #[must_use]
    pub fn folder(&self, folder_id: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| f.id == folder_id)
    }

    /// Name of the cloud a folder belongs to.
    #[must_use]
    pub fn cloud_name(&self, folder: &Folder) -> String {
        if !folder.cloud_name.is_empty() {
            return folder.cloud_name.clone();
        }
        self.clouds
            .iter()
            .find(|c| c.id == folder.cloud_id)
            .map(|c| c.name.clone())
            .unwrap_or_default()
    }
}

fn default_zones() -> Vec<Zone> {
    DEFAULT_ZONES.iter().map(|id| Zone::named(*id)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IndexKey {
    /// Exact value of a lookup field (`name`/`prefix`/`address` or `slug`).
    Field(ObjectKind, &'static str, String),
    /// Children of a record: interfaces and disks by VM, addresses by interface.
    Parent(ObjectKind, RecordId),
    /// Addresses by base value.
    Address(String),
    /// VMs whose primary points at an address.
    PrimaryOf(RecordId),
}

fn index_keys(record: &DestinationRecord) -> Vec<IndexKey> {
    let mut keys = Vec::new();
    let kind = record.kind;

    let name = record.name();
    if !name.is_empty() {
        keys.push(IndexKey::Field(kind, kind.name_field(), name.to_string()));
    }
    if let Some(slug) = record.slug() {
        keys.push(IndexKey::Field(kind, "slug", slug.to_string()));
    }

    match kind {
        ObjectKind::VmInterface | ObjectKind::VirtualDisk => {
            if let Some(vm) = record.reference("virtual_machine") {
                keys.push(IndexKey::Parent(kind, vm));
            }
        }
        ObjectKind::IpAddress => {
            keys.push(IndexKey::Address(base_address(name).to_string()));
            if record.text("assigned_object_type") == VM_INTERFACE_OBJECT_TYPE {
                if let Some(interface) = record.reference("assigned_object_id") {
                    keys.push(IndexKey::Parent(kind, interface));
                }
            }
        }
        ObjectKind::VirtualMachine => {
            if let Some(address) = record.reference("primary_ip4") {
                keys.push(IndexKey::PrimaryOf(address));
            }
        }
        _ => {}
    }

    keys
}

/// Indexed, in-memory copy of the destination inventory.
#[derive(Debug, Clone, Default)]
pub struct DestinationSnapshot {
    records: HashMap<ObjectKind, BTreeMap<RecordId, DestinationRecord>>,
    index: HashMap<IndexKey, BTreeSet<RecordId>>,
}

impl DestinationSnapshot {
    /// Create an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from records.
    pub fn from_records(records: impl IntoIterator<Item = DestinationRecord>) -> Self {
        let mut snapshot = Self::new();
        for record in records {
            snapshot.insert(record);
        }
        snapshot
    }

    /// List every kind from the destination.
    pub async fn load<D: DestinationRepository + ?Sized>(destination: &D) -> SyncResult<Self> {
        let mut snapshot = Self::new();
        for kind in ObjectKind::all() {
            let records = destination.list(*kind).await?;
            info!(kind = %kind, count = records.len(), "Loaded destination records");
            for record in records {
                snapshot.insert(record);
            }
        }
        Ok(snapshot)
    }

    /// Insert or replace a record.
    pub fn insert(&mut self, record: DestinationRecord) {
        self.remove(record.kind, record.id);
        for key in index_keys(&record) {
            self.index.entry(key).or_default().insert(record.id);
        }
        self.records
            .entry(record.kind)
            .or_default()
            .insert(record.id, record);
    }

    /// Remove a record.
    pub fn remove(&mut self, kind: ObjectKind, id: RecordId) -> Option<DestinationRecord> {
        let record = self.records.get_mut(&kind)?.remove(&id)?;
        for key in index_keys(&record) {
            if let Some(ids) = self.index.get_mut(&key) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.index.remove(&key);
                }
            }
        }
        Some(record)
    }

    /// Merge fields into a stored record. Returns false when the record is unknown.
    pub fn apply_update(&mut self, kind: ObjectKind, id: RecordId, fields: &FieldSet) -> bool {
        let Some(mut record) = self.remove(kind, id) else {
            return false;
        };
        record.fields.merge(fields.clone());
        self.insert(record);
        true
    }

    /// Get a record.
    #[must_use]
    pub fn get(&self, kind: ObjectKind, id: RecordId) -> Option<&DestinationRecord> {
        self.records.get(&kind)?.get(&id)
    }

    /// Iterate over records of a kind in ID order.
    pub fn records(&self, kind: ObjectKind) -> impl Iterator<Item = &DestinationRecord> {
        self.records.get(&kind).into_iter().flat_map(BTreeMap::values)
    }

    /// Number of records of a kind.
    #[must_use]
    pub fn count(&self, kind: ObjectKind) -> usize {
        self.records.get(&kind).map_or(0, BTreeMap::len)
    }

    fn indexed(&self, kind: ObjectKind, key: &IndexKey) -> Vec<&DestinationRecord> {
        self.index
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|id| self.get(kind, *id))
            .collect()
    }

    /// Records of a kind whose `field` equals `value`, in ID order.
    #[must_use]
    pub fn find(&self, kind: ObjectKind, field: &str, value: &str) -> Vec<&DestinationRecord> {
        if field == kind.name_field() {
            return self.indexed(kind, &IndexKey::Field(kind, kind.name_field(), value.to_string()));
        }
        if field == "slug" {
            return self.indexed(kind, &IndexKey::Field(kind, "slug", value.to_string()));
        }
        self.records(kind)
            .filter(|r| r.fields.get_str(field) == Some(value))
            .collect()
    }

    /// Records of a kind with the given identifying name.
    #[must_use]
    pub fn find_by_name(&self, kind: ObjectKind, name: &str) -> Vec<&DestinationRecord> {
        self.find(kind, kind.name_field(), name)
    }

    /// Interfaces owned by a VM, in ID order.
    #[must_use]
    pub fn interfaces_of(&self, vm: RecordId) -> Vec<&DestinationRecord> {
        self.indexed(
            ObjectKind::VmInterface,
            &IndexKey::Parent(ObjectKind::VmInterface, vm),
        )
    }

    /// Disks owned by a VM, in ID order.
    #[must_use]
    pub fn disks_of(&self, vm: RecordId) -> Vec<&DestinationRecord> {
        self.indexed(
            ObjectKind::VirtualDisk,
            &IndexKey::Parent(ObjectKind::VirtualDisk, vm),
        )
    }

    /// Addresses attached to an interface, in ID order.
    #[must_use]
    pub fn addresses_on(&self, interface: RecordId) -> Vec<&DestinationRecord> {
        self.indexed(
            ObjectKind::IpAddress,
            &IndexKey::Parent(ObjectKind::IpAddress, interface),
        )
    }

    /// Addresses with the given base value (any mask), in ID order.
    #[must_use]
    pub fn addresses_by_base(&self, address: &str) -> Vec<&DestinationRecord> {
        self.indexed(
            ObjectKind::IpAddress,
            &IndexKey::Address(base_address(address).to_string()),
        )
    }

    /// VMs whose primary address is the given address.
    #[must_use]
    pub fn vms_with_primary(&self, address: RecordId) -> Vec<RecordId> {
        self.index
            .get(&IndexKey::PrimaryOf(address))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: ObjectKind, id: u64, fields: FieldSet) -> DestinationRecord {
        DestinationRecord::new(kind, RecordId::new(id), fields)
    }

    fn sample() -> DestinationSnapshot {
        DestinationSnapshot::from_records([
            record(
                ObjectKind::Cluster,
                1,
                FieldSet::new().with("name", "prod-devops").with("slug", "prod-devops"),
            ),
            record(
                ObjectKind::VirtualMachine,
                10,
                FieldSet::new().with("name", "web-01").with("primary_ip4", RecordId::new(30)),
            ),
            record(
                ObjectKind::VmInterface,
                20,
                FieldSet::new().with("name", "eth0").with("virtual_machine", RecordId::new(10)),
            ),
            record(
                ObjectKind::IpAddress,
                30,
                FieldSet::new()
                    .with("address", "10.0.0.5/24")
                    .with("assigned_object_type", VM_INTERFACE_OBJECT_TYPE)
                    .with("assigned_object_id", RecordId::new(20)),
            ),
        ])
    }

    #[test]
    fn test_find_by_name_and_slug() {
        let snapshot = sample();
        assert_eq!(snapshot.find_by_name(ObjectKind::Cluster, "prod-devops").len(), 1);
        assert_eq!(snapshot.find(ObjectKind::Cluster, "slug", "prod-devops").len(), 1);
        assert!(snapshot.find_by_name(ObjectKind::Cluster, "other").is_empty());
    }

    #[test]
    fn test_children_indexes() {
        let snapshot = sample();
        let interfaces = snapshot.interfaces_of(RecordId::new(10));
        assert_eq!(interfaces.len(), 1);
        assert_eq!(snapshot.addresses_on(RecordId::new(20)).len(), 1);
        assert_eq!(snapshot.addresses_by_base("10.0.0.5/32").len(), 1);
        assert_eq!(snapshot.vms_with_primary(RecordId::new(30)), vec![RecordId::new(10)]);
    }

    #[test]
    fn test_update_reindexes() {
        let mut snapshot = sample();
        let rename = FieldSet::new()
            .with("name", "grand-trade/prod-devops")
            .with("slug", "grand-trade-prod-devops");
        assert!(snapshot.apply_update(ObjectKind::Cluster, RecordId::new(1), &rename));

        assert!(snapshot.find_by_name(ObjectKind::Cluster, "prod-devops").is_empty());
        assert_eq!(
            snapshot.find_by_name(ObjectKind::Cluster, "grand-trade/prod-devops")[0].id,
            RecordId::new(1)
        );
        assert!(!snapshot.apply_update(ObjectKind::Cluster, RecordId::new(99), &rename));
    }

    #[test]
    fn test_remove_clears_index() {
        let mut snapshot = sample();
        snapshot.remove(ObjectKind::IpAddress, RecordId::new(30));
        assert!(snapshot.addresses_by_base("10.0.0.5").is_empty());
        assert!(snapshot.addresses_on(RecordId::new(20)).is_empty());
        assert_eq!(snapshot.count(ObjectKind::IpAddress), 0);
    }

    #[test]
    fn test_unset_primary_reindexes() {
        let mut snapshot = sample();
        snapshot.apply_update(
            ObjectKind::VirtualMachine,
            RecordId::new(10),
            &FieldSet::new().with("primary_ip4", None::<RecordId>),
        );
        assert!(snapshot.vms_with_primary(RecordId::new(30)).is_empty());
    }
}
