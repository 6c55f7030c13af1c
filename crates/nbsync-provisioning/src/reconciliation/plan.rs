//! Staged change plans for virtual machines.
//!
//! Each VM is planned once against the snapshot taken after infrastructure
//! sync. Records that do not exist yet get placeholders so dependent
//! records (interfaces, addresses, disks, the primary address) can be
//! planned in the same pass and wired up when the executor creates them.

use std::collections::{BTreeSet, HashMap};

use nbsync_connector::fields::FieldSet;
use nbsync_connector::ids::{PendingTag, RecordId, Ref};
use nbsync_connector::record::DestinationRecord;
use nbsync_connector::types::ObjectKind;

use super::address::same_address;
use super::changeset::{diff, ChangeSet, StagedFields};
use super::context::PendingRegistry;
use super::desired::{DesiredAddress, DesiredDisk, DesiredVm};
use super::report::{Decision, PreviewSummary};
use super::selector::{select_primary, AttachmentPoint, Candidate, PrimaryDecision};
use super::snapshot::{DestinationSnapshot, VM_INTERFACE_OBJECT_TYPE};
use super::types::Action;

/// Infrastructure records a VM hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmTargets {
    pub cluster: Ref,
    pub site: Option<Ref>,
    pub platform: Option<Ref>,
}

/// A dependent record to create.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedCreate {
    pub tag: PendingTag,
    pub name: String,
    pub fields: StagedFields,
}

/// An existing address moving to one of this VM's interfaces.
#[derive(Debug, Clone, PartialEq)]
pub struct Reassignment {
    pub address: RecordId,
    pub value: String,
    pub fields: StagedFields,
    /// Other VMs using this address as primary.
    pub displaced: Vec<RecordId>,
}

/// A disk whose size changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskResize {
    pub id: RecordId,
    pub name: String,
    pub size_mb: u64,
}

/// A disk no longer present on the instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskRemoval {
    pub id: RecordId,
    pub name: String,
}

/// Primary address write decided once placeholders are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryWrite {
    Set(Ref),
    Clear,
}

/// Every change needed for one VM.
#[derive(Debug, Clone, PartialEq)]
pub struct VmPlan {
    pub name: String,
    /// Existing VM, or placeholder for one being created.
    pub vm: Ref,
    pub change: ChangeSet,
    /// Existing VM lacks the management tag.
    pub needs_tag: bool,
    pub primary: PrimaryDecision,
    pub interfaces: Vec<StagedCreate>,
    pub addresses: Vec<StagedCreate>,
    pub reassignments: Vec<Reassignment>,
    pub disk_creates: Vec<StagedCreate>,
    pub disk_resizes: Vec<DiskResize>,
    pub disk_removals: Vec<DiskRemoval>,
    pub warnings: Vec<String>,
    /// Filled in by the placeholder resolution pass.
    pub primary_write: Option<PrimaryWrite>,
}

impl VmPlan {
    /// Check if the plan writes nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.change.is_noop()
            && !self.needs_tag
            && !self.primary.is_change()
            && self.interfaces.is_empty()
            && self.addresses.is_empty()
            && self.reassignments.is_empty()
            && self.disk_creates.is_empty()
            && self.disk_resizes.is_empty()
            && self.disk_removals.is_empty()
    }

    /// Decisions this plan stands for, without executing anything.
    #[must_use]
    pub fn decisions(&self) -> Vec<Decision> {
        let mut decisions = Vec::new();
        let vm = ObjectKind::VirtualMachine;

        for reassignment in &self.reassignments {
            for displaced in &reassignment.displaced {
                decisions.push(
                    Decision::new(vm, displaced.to_string(), Action::Update)
                        .with_target(*displaced)
                        .with_fields(FieldSet::new().with("primary_ip4", None::<RecordId>)),
                );
            }
        }
        for removal in &self.disk_removals {
            decisions.push(
                Decision::new(ObjectKind::VirtualDisk, &removal.name, Action::Delete)
                    .with_target(removal.id),
            );
        }
        match &self.change {
            ChangeSet::Create(fields) => decisions.push(
                Decision::new(vm, &self.name, Action::Create)
                    .with_target(self.vm)
                    .with_fields(fields.preview()),
            ),
            ChangeSet::Update(fields) => decisions.push(
                Decision::new(vm, &self.name, Action::Update)
                    .with_target(self.vm)
                    .with_fields(fields.clone()),
            ),
            ChangeSet::Noop => {}
        }
        if self.needs_tag {
            decisions.push(Decision::new(vm, &self.name, Action::Tag).with_target(self.vm));
        }
        for (kind, creates) in [
            (ObjectKind::VmInterface, &self.interfaces),
            (ObjectKind::IpAddress, &self.addresses),
            (ObjectKind::VirtualDisk, &self.disk_creates),
        ] {
            for create in creates {
                decisions.push(
                    Decision::new(kind, &create.name, Action::Create)
                        .with_target(create.tag)
                        .with_fields(create.fields.preview()),
                );
            }
        }
        for reassignment in &self.reassignments {
            decisions.push(
                Decision::new(ObjectKind::IpAddress, &reassignment.value, Action::Update)
                    .with_target(reassignment.address)
                    .with_fields(reassignment.fields.preview()),
            );
        }
        for resize in &self.disk_resizes {
            decisions.push(
                Decision::new(ObjectKind::VirtualDisk, &resize.name, Action::Update)
                    .with_target(resize.id)
                    .with_fields(FieldSet::new().with("size", resize.size_mb)),
            );
        }
        let primary = match self.primary {
            PrimaryDecision::Keep => None,
            PrimaryDecision::SwitchTo(id) => Some(FieldSet::new().with("primary_ip4", id)),
            PrimaryDecision::Pending(tag) => {
                Some(FieldSet::new().with("primary_ip4", tag.to_string()))
            }
            PrimaryDecision::Remove => {
                Some(FieldSet::new().with("primary_ip4", None::<RecordId>))
            }
        };
        if let Some(fields) = primary {
            decisions.push(
                Decision::new(vm, &self.name, Action::Update)
                    .with_target(self.vm)
                    .with_fields(fields),
            );
        }
        decisions
    }
}

/// Plans for every VM in a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangePlan {
    pub vms: Vec<VmPlan>,
}

impl ChangePlan {
    /// Breakdown of the planned changes by category.
    #[must_use]
    pub fn preview(&self) -> PreviewSummary {
        let decisions: Vec<Decision> = self.vms.iter().flat_map(VmPlan::decisions).collect();
        PreviewSummary::from_decisions(&decisions)
    }
}

fn lowest<'a>(records: &[&'a DestinationRecord]) -> Option<&'a DestinationRecord> {
    records.iter().min_by_key(|r| r.id).copied()
}

fn vm_fields(desired: &DesiredVm, targets: &VmTargets) -> StagedFields {
    let mut fields = StagedFields::new()
        .value("name", desired.name.as_str())
        .value("status", desired.status)
        .value("vcpus", desired.vcpus)
        .value("comments", desired.comments.as_str())
        .reference("cluster", targets.cluster)
        .maybe_reference("site", targets.site)
        .maybe_reference("platform", targets.platform);
    if desired.memory_mb > 0 {
        fields = fields.value("memory", desired.memory_mb);
    }
    fields
}

fn disk_fields(disk: &DesiredDisk, vm: Ref) -> StagedFields {
    StagedFields::new()
        .value("name", disk.name.as_str())
        .value("size", disk.size_mb)
        .value("description", disk.description.as_str())
        .reference("virtual_machine", vm)
}

fn assignment(interface: Ref) -> StagedFields {
    StagedFields::new()
        .value("assigned_object_type", VM_INTERFACE_OBJECT_TYPE)
        .reference("assigned_object_id", interface)
}

/// Plans VMs against a snapshot, allocating placeholders for new records.
pub struct VmPlanner<'a> {
    snapshot: &'a DestinationSnapshot,
    registry: &'a mut PendingRegistry,
    sync_tag: Option<RecordId>,
}

impl<'a> VmPlanner<'a> {
    pub fn new(
        snapshot: &'a DestinationSnapshot,
        registry: &'a mut PendingRegistry,
        sync_tag: Option<RecordId>,
    ) -> Self {
        Self {
            snapshot,
            registry,
            sync_tag,
        }
    }

    /// Plan one VM.
    pub fn plan(&mut self, desired: &DesiredVm, targets: &VmTargets) -> VmPlan {
        let snapshot = self.snapshot;
        let mut warnings = Vec::new();
        let matches = snapshot
            .find_by_name(ObjectKind::VirtualMachine, &desired.name);
        if matches.len() > 1 {
            warnings.push(format!(
                "{} virtual machines share this name, using the lowest ID",
                matches.len()
            ));
        }
        let current = lowest(&matches);

        let staged = vm_fields(desired, targets);
        let change = diff(&staged, current, &*self.registry);
        let vm = match current {
            Some(record) => Ref::Resolved(record.id),
            None => Ref::Pending(self.registry.allocate()),
        };
        let needs_tag = match (current, self.sync_tag) {
            (Some(record), Some(tag)) => !record.has_tag(tag),
            _ => false,
        };

        let mut plan = VmPlan {
            name: desired.name.clone(),
            vm,
            change,
            needs_tag,
            primary: PrimaryDecision::Keep,
            interfaces: Vec::new(),
            addresses: Vec::new(),
            reassignments: Vec::new(),
            disk_creates: Vec::new(),
            disk_resizes: Vec::new(),
            disk_removals: Vec::new(),
            warnings,
            primary_write: None,
        };

        let points = self.plan_interfaces(&mut plan, desired, current);
        let current_primary = current.and_then(|r| r.reference("primary_ip4"));
        plan.primary = select_primary(current_primary, &points, snapshot);
        self.plan_disks(&mut plan, &desired.disks, current);
        plan
    }

    fn plan_interfaces(
        &mut self,
        plan: &mut VmPlan,
        desired: &DesiredVm,
        current: Option<&DestinationRecord>,
    ) -> Vec<AttachmentPoint> {
        let snapshot = self.snapshot;
        let existing: HashMap<&str, RecordId> = match current {
            Some(vm) => {
                let mut by_name = HashMap::new();
                for interface in snapshot.interfaces_of(vm.id) {
                    by_name.entry(interface.name()).or_insert(interface.id);
                }
                by_name
            }
            None => HashMap::new(),
        };

        let mut points = Vec::with_capacity(desired.interfaces.len());
        for interface in &desired.interfaces {
            let interface_ref = match existing.get(interface.name.as_str()) {
                Some(id) => Ref::Resolved(*id),
                None => {
                    let tag = self.registry.allocate();
                    plan.interfaces.push(StagedCreate {
                        tag,
                        name: format!("{}/{}", desired.name, interface.name),
                        fields: StagedFields::new()
                            .value("name", interface.name.as_str())
                            .value("type", "virtual")
                            .value("enabled", true)
                            .reference("virtual_machine", plan.vm),
                    });
                    Ref::Pending(tag)
                }
            };

            let addresses = interface
                .addresses
                .iter()
                .map(|address| self.plan_address(plan, address, interface_ref))
                .collect();
            points.push(AttachmentPoint {
                interface: interface_ref,
                addresses,
            });
        }
        points
    }

    fn plan_address(
        &mut self,
        plan: &mut VmPlan,
        desired: &DesiredAddress,
        interface: Ref,
    ) -> Candidate {
        let snapshot = self.snapshot;
        let candidate = |target| Candidate {
            address: desired.address.clone(),
            class: desired.class,
            target,
        };

        if let Ref::Resolved(interface_id) = interface {
            let attached = snapshot
                .addresses_on(interface_id)
                .into_iter()
                .find(|a| same_address(a.name(), &desired.address));
            if let Some(address) = attached {
                return candidate(Ref::Resolved(address.id));
            }
        }

        if let Some(address) = snapshot.addresses_by_base(&desired.address).first() {
            let vm = plan.vm.resolved();
            let displaced = snapshot
                .vms_with_primary(address.id)
                .into_iter()
                .filter(|id| Some(*id) != vm)
                .collect();
            plan.reassignments.push(Reassignment {
                address: address.id,
                value: address.name().to_string(),
                fields: assignment(interface),
                displaced,
            });
            return candidate(Ref::Resolved(address.id));
        }

        let tag = self.registry.allocate();
        plan.addresses.push(StagedCreate {
            tag,
            name: desired.address.clone(),
            fields: assignment(interface)
                .value("address", desired.address.as_str())
                .value("status", "active")
                .value("description", desired.description),
        });
        candidate(Ref::Pending(tag))
    }

    fn plan_disks(
        &mut self,
        plan: &mut VmPlan,
        desired: &[DesiredDisk],
        current: Option<&DestinationRecord>,
    ) {
        let snapshot = self.snapshot;
        let existing = current
            .map(|vm| snapshot.disks_of(vm.id))
            .unwrap_or_default();
        let wanted: BTreeSet<&str> = desired.iter().map(|d| d.name.as_str()).collect();

        for disk in desired {
            match existing.iter().find(|d| d.name() == disk.name) {
                Some(record) => {
                    let size = record.fields.get("size").and_then(|v| v.as_f64());
                    if disk.size_mb > 0 && size != Some(disk.size_mb as f64) {
                        plan.disk_resizes.push(DiskResize {
                            id: record.id,
                            name: format!("{}/{}", plan.name, disk.name),
                            size_mb: disk.size_mb,
                        });
                    }
                }
                None if disk.size_mb == 0 => plan
                    .warnings
                    .push(format!("disk {} has no size and was not created", disk.name)),
                None => {
                    let tag = self.registry.allocate();
                    plan.disk_creates.push(StagedCreate {
                        tag,
                        name: format!("{}/{}", plan.name, disk.name),
                        fields: disk_fields(disk, plan.vm),
                    });
                }
            }
        }

        for record in existing {
            if !wanted.contains(record.name()) {
                plan.disk_removals.push(DiskRemoval {
                    id: record.id,
                    name: format!("{}/{}", plan.name, record.name()),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::address::AddressClass;
    use crate::reconciliation::desired::{DesiredAddress, DesiredInterface};
    use crate::reconciliation::types::FieldCategory;

    fn record(kind: ObjectKind, id: u64, fields: FieldSet) -> DestinationRecord {
        DestinationRecord::new(kind, RecordId::new(id), fields)
    }

    fn targets() -> VmTargets {
        VmTargets {
            cluster: Ref::Resolved(RecordId::new(10)),
            site: Some(Ref::Resolved(RecordId::new(20))),
            platform: None,
        }
    }

    fn desired(interfaces: Vec<DesiredInterface>, disks: Vec<DesiredDisk>) -> DesiredVm {
        DesiredVm {
            name: "web-1".to_string(),
            source_id: "fhm1".to_string(),
            folder_id: "b1g".to_string(),
            zone_id: Some("ru-central1-a".to_string()),
            status: "active",
            vcpus: 2,
            memory_mb: 4000,
            comments: "YC VM ID: fhm1".to_string(),
            platform_slug: "linux",
            interfaces,
            disks,
        }
    }

    fn interface(index: u32, addresses: &[&str]) -> DesiredInterface {
        DesiredInterface {
            name: format!("eth{index}"),
            addresses: addresses
                .iter()
                .map(|a| {
                    let class = AddressClass::of(a);
                    DesiredAddress {
                        address: (*a).to_string(),
                        class,
                        description: class.description(),
                    }
                })
                .collect(),
        }
    }

    fn existing_vm() -> Vec<DestinationRecord> {
        vec![
            record(
                ObjectKind::VirtualMachine,
                1,
                FieldSet::new()
                    .with("name", "web-1")
                    .with("status", "active")
                    .with("vcpus", 2_i64)
                    .with("memory", 4000_i64)
                    .with("comments", "YC VM ID: fhm1 ")
                    .with("cluster", RecordId::new(10))
                    .with("site", RecordId::new(20))
                    .with("primary_ip4", RecordId::new(100)),
            ),
            record(
                ObjectKind::VmInterface,
                50,
                FieldSet::new()
                    .with("name", "eth0")
                    .with("virtual_machine", RecordId::new(1)),
            ),
            record(
                ObjectKind::IpAddress,
                100,
                FieldSet::new()
                    .with("address", "10.0.0.5/32")
                    .with("assigned_object_type", VM_INTERFACE_OBJECT_TYPE)
                    .with("assigned_object_id", RecordId::new(50)),
            ),
        ]
    }

    #[test]
    fn test_new_vm_with_public_address_only() {
        let snapshot = DestinationSnapshot::new();
        let mut registry = PendingRegistry::default();
        let mut planner = VmPlanner::new(&snapshot, &mut registry, None);

        let plan = planner.plan(
            &desired(vec![interface(0, &[]), interface(1, &["51.250.1.1/32"])], vec![]),
            &targets(),
        );

        assert!(matches!(plan.change, ChangeSet::Create(_)));
        assert!(!plan.vm.is_resolved());
        assert_eq!(plan.interfaces.len(), 2);
        assert_eq!(plan.addresses.len(), 1);
        assert_eq!(plan.primary, PrimaryDecision::Pending(plan.addresses[0].tag));
        assert_eq!(
            plan.interfaces[1].fields.references().get("virtual_machine"),
            Some(&plan.vm)
        );
        assert_eq!(
            plan.addresses[0].fields.references().get("assigned_object_id"),
            Some(&Ref::Pending(plan.interfaces[1].tag))
        );
    }

    #[test]
    fn test_unchanged_vm_is_noop() {
        let snapshot = DestinationSnapshot::from_records(existing_vm());
        let mut registry = PendingRegistry::default();
        let mut planner = VmPlanner::new(&snapshot, &mut registry, None);

        let plan = planner.plan(&desired(vec![interface(0, &["10.0.0.5/32"])], vec![]), &targets());

        assert!(plan.is_noop(), "{plan:?}");
        assert_eq!(plan.vm, Ref::Resolved(RecordId::new(1)));
    }

    #[test]
    fn test_address_on_other_vm_is_reassigned() {
        let mut records = existing_vm();
        records.push(record(
            ObjectKind::VirtualMachine,
            2,
            FieldSet::new()
                .with("name", "db-1")
                .with("primary_ip4", RecordId::new(101)),
        ));
        records.push(record(
            ObjectKind::IpAddress,
            101,
            FieldSet::new()
                .with("address", "10.0.0.9/24")
                .with("assigned_object_type", VM_INTERFACE_OBJECT_TYPE)
                .with("assigned_object_id", RecordId::new(77)),
        ));
        let snapshot = DestinationSnapshot::from_records(records);
        let mut registry = PendingRegistry::default();
        let mut planner = VmPlanner::new(&snapshot, &mut registry, None);

        let plan = planner.plan(
            &desired(vec![interface(0, &["10.0.0.5/32", "10.0.0.9/32"])], vec![]),
            &targets(),
        );

        assert_eq!(plan.reassignments.len(), 1);
        assert_eq!(plan.reassignments[0].address, RecordId::new(101));
        assert_eq!(plan.reassignments[0].displaced, vec![RecordId::new(2)]);
        assert!(plan.addresses.is_empty());
        assert_eq!(plan.primary, PrimaryDecision::Keep);
    }

    #[test]
    fn test_disk_changes() {
        let mut records = existing_vm();
        records.push(record(
            ObjectKind::VirtualDisk,
            60,
            FieldSet::new()
                .with("name", "boot")
                .with("size", 10240_i64)
                .with("virtual_machine", RecordId::new(1)),
        ));
        records.push(record(
            ObjectKind::VirtualDisk,
            61,
            FieldSet::new()
                .with("name", "scratch")
                .with("size", 1024_i64)
                .with("virtual_machine", RecordId::new(1)),
        ));
        let snapshot = DestinationSnapshot::from_records(records);
        let mut registry = PendingRegistry::default();
        let mut planner = VmPlanner::new(&snapshot, &mut registry, None);

        let disks = vec![
            DesiredDisk {
                name: "boot".to_string(),
                size_mb: 20480,
                description: "Type: cloud".to_string(),
            },
            DesiredDisk {
                name: "data".to_string(),
                size_mb: 5120,
                description: "Type: local".to_string(),
            },
        ];
        let plan = planner.plan(&desired(vec![interface(0, &["10.0.0.5/32"])], disks), &targets());

        assert_eq!(plan.disk_resizes.len(), 1);
        assert_eq!(plan.disk_resizes[0].size_mb, 20480);
        assert_eq!(plan.disk_creates.len(), 1);
        assert_eq!(plan.disk_creates[0].name, "web-1/data");
        assert_eq!(plan.disk_removals.len(), 1);
        assert_eq!(plan.disk_removals[0].id, RecordId::new(61));
    }

    #[test]
    fn test_preview_breakdown_by_category() {
        let mut records = existing_vm();
        records[0].fields.set("cluster", RecordId::new(11));
        records[0].fields.set("vcpus", 1_i64);
        let snapshot = DestinationSnapshot::from_records(records);
        let mut registry = PendingRegistry::default();
        let mut planner = VmPlanner::new(&snapshot, &mut registry, None);

        let plan = ChangePlan {
            vms: vec![planner.plan(
                &desired(vec![interface(0, &["10.0.0.5/32"])], vec![]),
                &targets(),
            )],
        };
        let preview = plan.preview();

        assert_eq!(preview.update, 1);
        assert_eq!(preview.updates_in(FieldCategory::Content), 1);
        assert_eq!(preview.updates_in(FieldCategory::ParentReference), 1);
        assert_eq!(preview.updates_in(FieldCategory::PrimaryAddress), 0);
        assert_eq!(preview.create, 0);
    }
}
