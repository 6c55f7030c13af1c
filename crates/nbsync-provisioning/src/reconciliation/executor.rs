//! Plan execution.
//!
//! Batch mode runs each phase across every VM before moving on; standard
//! mode runs all phases for one VM before the next. Both call the same
//! phase functions in the same order, so the final destination state does
//! not depend on the mode.

use tracing::{debug, info};

use nbsync_connector::fields::FieldSet;
use nbsync_connector::ids::{RecordId, Ref};
use nbsync_connector::traits::DestinationRepository;
use nbsync_connector::types::ObjectKind;

use crate::error::{SyncError, SyncResult};

use super::changeset::{ChangeSet, StagedFields};
use super::context::{Binding, SyncContext};
use super::plan::{ChangePlan, PrimaryWrite, StagedCreate, VmPlan};
use super::selector::PrimaryDecision;
use super::types::{Action, ExecutionMode};

/// Ordered execution phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    UnsetDisplacedPrimaries,
    DeleteStaleDisks,
    CreateEntities,
    CreateAttachmentPoints,
    ReassignAddresses,
    CreateAddresses,
    SyncDisks,
    ResolvePlaceholders,
    ApplyUpdates,
    SetPrimaries,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 10] = [
        Phase::UnsetDisplacedPrimaries,
        Phase::DeleteStaleDisks,
        Phase::CreateEntities,
        Phase::CreateAttachmentPoints,
        Phase::ReassignAddresses,
        Phase::CreateAddresses,
        Phase::SyncDisks,
        Phase::ResolvePlaceholders,
        Phase::ApplyUpdates,
        Phase::SetPrimaries,
    ];
}

/// Execute a plan in the given mode.
pub async fn execute<D: DestinationRepository + ?Sized>(
    ctx: &mut SyncContext,
    destination: &D,
    plan: &mut ChangePlan,
    mode: ExecutionMode,
) {
    info!(mode = %mode, vms = plan.vms.len(), simulate = ctx.is_simulate(), "Executing VM plan");

    for vm in &plan.vms {
        for warning in &vm.warnings {
            ctx.warn(&vm.name, warning.clone());
        }
    }

    match mode {
        ExecutionMode::Batch => {
            for phase in Phase::ALL {
                let before = ctx.decisions().len();
                run_phase(ctx, destination, &mut plan.vms, phase).await;
                info!(phase = ?phase, writes = ctx.decisions().len() - before, "Phase complete");
            }
        }
        ExecutionMode::Standard => {
            for vm in &mut plan.vms {
                for phase in Phase::ALL {
                    run_phase(ctx, destination, std::slice::from_mut(vm), phase).await;
                }
            }
        }
    }

    for vm in &plan.vms {
        if vm.is_noop() {
            ctx.unchanged(ObjectKind::VirtualMachine);
        }
    }
}

async fn run_phase<D: DestinationRepository + ?Sized>(
    ctx: &mut SyncContext,
    destination: &D,
    plans: &mut [VmPlan],
    phase: Phase,
) {
    match phase {
        Phase::UnsetDisplacedPrimaries => unset_displaced_primaries(ctx, destination, plans).await,
        Phase::DeleteStaleDisks => delete_stale_disks(ctx, destination, plans).await,
        Phase::CreateEntities => create_entities(ctx, destination, plans).await,
        Phase::CreateAttachmentPoints => {
            for plan in plans.iter() {
                create_all(ctx, destination, ObjectKind::VmInterface, &plan.interfaces).await;
            }
        }
        Phase::ReassignAddresses => reassign_addresses(ctx, destination, plans).await,
        Phase::CreateAddresses => {
            for plan in plans.iter() {
                create_all(ctx, destination, ObjectKind::IpAddress, &plan.addresses).await;
            }
        }
        Phase::SyncDisks => sync_disks(ctx, destination, plans).await,
        Phase::ResolvePlaceholders => resolve_placeholders(ctx, plans),
        Phase::ApplyUpdates => apply_updates(ctx, destination, plans).await,
        Phase::SetPrimaries => set_primaries(ctx, destination, plans).await,
    }
}

/// Drop the error of a write already recorded by the context.
fn settle<T>(result: SyncResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(error = %e, "Continuing after failed write");
            None
        }
    }
}

async fn unset_displaced_primaries<D: DestinationRepository + ?Sized>(
    ctx: &mut SyncContext,
    destination: &D,
    plans: &[VmPlan],
) {
    for plan in plans {
        for reassignment in &plan.reassignments {
            for vm in &reassignment.displaced {
                let still_primary = ctx
                    .snapshot()
                    .get(ObjectKind::VirtualMachine, *vm)
                    .is_some_and(|r| r.reference("primary_ip4") == Some(reassignment.address));
                if !still_primary {
                    continue;
                }
                let subject = ctx
                    .snapshot()
                    .get(ObjectKind::VirtualMachine, *vm)
                    .map(|r| r.name().to_string())
                    .unwrap_or_else(|| vm.to_string());
                info!(vm = %subject, address = %reassignment.value, "Unsetting primary of VM losing its address");
                settle(
                    ctx.update(
                        destination,
                        ObjectKind::VirtualMachine,
                        *vm,
                        &subject,
                        FieldSet::new().with("primary_ip4", None::<RecordId>),
                        Action::Update,
                    )
                    .await,
                );
            }
        }
    }
}

async fn delete_stale_disks<D: DestinationRepository + ?Sized>(
    ctx: &mut SyncContext,
    destination: &D,
    plans: &[VmPlan],
) {
    for plan in plans {
        for removal in &plan.disk_removals {
            settle(
                ctx.delete(destination, ObjectKind::VirtualDisk, removal.id, &removal.name)
                    .await,
            );
        }
    }
}

async fn create_entities<D: DestinationRepository + ?Sized>(
    ctx: &mut SyncContext,
    destination: &D,
    plans: &[VmPlan],
) {
    for plan in plans {
        let (ChangeSet::Create(staged), Ref::Pending(tag)) = (&plan.change, plan.vm) else {
            continue;
        };
        let (fields, unresolved) = staged.materialize(ctx);
        if unresolved.iter().any(|f| f == "cluster") {
            ctx.skip(
                ObjectKind::VirtualMachine,
                &plan.name,
                "cluster was not created",
            );
            continue;
        }
        for field in unresolved {
            ctx.warn(
                &plan.name,
                SyncError::unresolved(&plan.name, field).to_string(),
            );
        }
        settle(
            ctx.create(
                destination,
                ObjectKind::VirtualMachine,
                &plan.name,
                fields,
                Some(tag),
            )
            .await,
        );
    }
}

/// Create dependent records whose parent placeholder must be bound.
async fn create_all<D: DestinationRepository + ?Sized>(
    ctx: &mut SyncContext,
    destination: &D,
    kind: ObjectKind,
    creates: &[StagedCreate],
) {
    for create in creates {
        let (fields, unresolved) = create.fields.materialize(ctx);
        if !unresolved.is_empty() {
            ctx.skip(
                kind,
                &create.name,
                format!("parent was not created ({})", unresolved.join(", ")),
            );
            continue;
        }
        settle(
            ctx.create(destination, kind, &create.name, fields, Some(create.tag))
                .await,
        );
    }
}

async fn reassign_addresses<D: DestinationRepository + ?Sized>(
    ctx: &mut SyncContext,
    destination: &D,
    plans: &[VmPlan],
) {
    for plan in plans {
        for reassignment in &plan.reassignments {
            let (fields, unresolved) = reassignment.fields.materialize(ctx);
            if !unresolved.is_empty() {
                ctx.skip(
                    ObjectKind::IpAddress,
                    &reassignment.value,
                    "interface was not created",
                );
                continue;
            }
            info!(vm = %plan.name, address = %reassignment.value, "Reassigning address");
            settle(
                ctx.update(
                    destination,
                    ObjectKind::IpAddress,
                    reassignment.address,
                    &reassignment.value,
                    fields,
                    Action::Update,
                )
                .await,
            );
        }
    }
}

async fn sync_disks<D: DestinationRepository + ?Sized>(
    ctx: &mut SyncContext,
    destination: &D,
    plans: &[VmPlan],
) {
    for plan in plans {
        create_all(ctx, destination, ObjectKind::VirtualDisk, &plan.disk_creates).await;
        for resize in &plan.disk_resizes {
            settle(
                ctx.update(
                    destination,
                    ObjectKind::VirtualDisk,
                    resize.id,
                    &resize.name,
                    FieldSet::new().with("size", resize.size_mb),
                    Action::Update,
                )
                .await,
            );
        }
    }
}

fn resolve_placeholders(ctx: &mut SyncContext, plans: &mut [VmPlan]) {
    for plan in plans {
        if let Binding::Unbound(_) = ctx.bind(plan.vm) {
            continue;
        }
        plan.primary_write = match plan.primary {
            PrimaryDecision::Keep => None,
            PrimaryDecision::Remove => Some(PrimaryWrite::Clear),
            PrimaryDecision::SwitchTo(id) => Some(PrimaryWrite::Set(Ref::Resolved(id))),
            PrimaryDecision::Pending(tag) => match ctx.bind(Ref::Pending(tag)) {
                Binding::Unbound(_) => {
                    ctx.warn(
                        &plan.name,
                        SyncError::unresolved(&plan.name, "primary_ip4").to_string(),
                    );
                    None
                }
                _ => Some(PrimaryWrite::Set(Ref::Pending(tag))),
            },
        };
    }
}

async fn apply_updates<D: DestinationRepository + ?Sized>(
    ctx: &mut SyncContext,
    destination: &D,
    plans: &[VmPlan],
) {
    for plan in plans {
        let Some(id) = plan.vm.resolved() else {
            continue;
        };
        if let ChangeSet::Update(fields) = &plan.change {
            debug!(vm = %plan.name, fields = ?fields.names().collect::<Vec<_>>(), "VM fields differ");
            settle(
                ctx.update(
                    destination,
                    ObjectKind::VirtualMachine,
                    id,
                    &plan.name,
                    fields.clone(),
                    Action::Update,
                )
                .await,
            );
        }
        if plan.needs_tag {
            settle(
                ctx.tag(destination, ObjectKind::VirtualMachine, id, &plan.name)
                    .await,
            );
        }
    }
}

async fn set_primaries<D: DestinationRepository + ?Sized>(
    ctx: &mut SyncContext,
    destination: &D,
    plans: &[VmPlan],
) {
    for plan in plans {
        let fields = match plan.primary_write {
            None => continue,
            Some(PrimaryWrite::Clear) => FieldSet::new().with("primary_ip4", None::<RecordId>),
            Some(PrimaryWrite::Set(address)) => {
                let (fields, unresolved) = StagedFields::new()
                    .reference("primary_ip4", address)
                    .materialize(ctx);
                if !unresolved.is_empty() {
                    ctx.warn(
                        &plan.name,
                        SyncError::unresolved(&plan.name, "primary_ip4").to_string(),
                    );
                    continue;
                }
                fields
            }
        };
        settle(
            ctx.update_ref(
                destination,
                ObjectKind::VirtualMachine,
                plan.vm,
                &plan.name,
                fields,
                Action::Update,
            )
            .await,
        );
    }
}
