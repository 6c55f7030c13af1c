//! Sync run orchestrator.
//!
//! Main entry point for a sync run: load both snapshots, reconcile
//! infrastructure, plan and execute VM changes, then clean up orphans.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use nbsync_connector::traits::{DestinationRepository, SourceRepository};
use nbsync_connector::types::ObjectKind;

use crate::error::{SyncError, SyncResult};

use super::context::SyncContext;
use super::desired::DesiredVm;
use super::executor::execute;
use super::infrastructure::{sync_infrastructure, Infrastructure};
use super::orphan::{cleanup_orphans, SourceKeys};
use super::plan::{ChangePlan, VmPlanner, VmTargets};
use super::report::RunReport;
use super::snapshot::{DestinationSnapshot, SourceSnapshot};
use super::types::ExecutionMode;

/// Options for a sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Execution mode.
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Collect decisions without writing.
    #[serde(default)]
    pub simulate: bool,
    /// Delete managed records with no source counterpart.
    #[serde(default = "default_cleanup")]
    pub cleanup: bool,
    /// Name of the management tag.
    #[serde(default = "default_sync_tag")]
    pub sync_tag: String,
}

fn default_cleanup() -> bool {
    true
}

fn default_sync_tag() -> String {
    "synced-from-yc".to_string()
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            simulate: false,
            cleanup: default_cleanup(),
            sync_tag: default_sync_tag(),
        }
    }
}

/// Sync engine for one source and one destination.
pub struct SyncEngine<S: ?Sized, D: ?Sized> {
    source: Arc<S>,
    destination: Arc<D>,
    options: RunOptions,
}

impl<S, D> SyncEngine<S, D>
where
    S: SourceRepository + ?Sized,
    D: DestinationRepository + ?Sized,
{
    /// Create a new engine.
    pub fn new(source: Arc<S>, destination: Arc<D>, options: RunOptions) -> Self {
        Self {
            source,
            destination,
            options,
        }
    }

    /// Run options.
    #[must_use]
    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run one full sync.
    ///
    /// Fails only when a snapshot cannot be loaded; per-entity failures are
    /// collected in the report.
    pub async fn run(&self) -> SyncResult<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let destination = self.destination.as_ref();
        info!(
            run_id = %run_id,
            source = %self.source.display_name(),
            destination = %destination.display_name(),
            mode = %self.options.mode,
            simulate = self.options.simulate,
            "Starting sync run"
        );

        let source = SourceSnapshot::fetch(self.source.as_ref()).await?;
        let snapshot = DestinationSnapshot::load(destination).await?;
        let mut ctx = SyncContext::new(snapshot, self.options.simulate);

        let infra =
            sync_infrastructure(&mut ctx, destination, &source, &self.options.sync_tag).await;

        let mut plan = plan_vms(&mut ctx, &source, &infra);
        info!(
            vms = plan.vms.len(),
            preview = ?plan.preview(),
            "Planned VM changes"
        );
        execute(&mut ctx, destination, &mut plan, self.options.mode).await;

        let cleanup_ran = if !self.options.cleanup {
            false
        } else if source.partial {
            warn!("Source snapshot is partial, skipping orphan cleanup");
            false
        } else {
            cleanup_orphans(&mut ctx, destination, &SourceKeys::from_snapshot(&source)).await;
            true
        };

        let report = ctx.into_report(run_id, self.options.mode, cleanup_ran, started_at);
        let totals = report.statistics.totals();
        info!(
            run_id = %run_id,
            created = totals.created,
            updated = totals.updated,
            migrated = totals.migrated,
            deleted = totals.deleted,
            unchanged = totals.unchanged,
            skipped = totals.skipped,
            failed = totals.failed,
            warnings = report.warnings.len(),
            duration_ms = report.statistics.duration_ms,
            "Sync run finished"
        );
        Ok(report)
    }
}

/// Plan every instance against the current snapshot.
///
/// Instances without a name, or whose folder or cluster is missing, are
/// skipped with a reason, as are later instances repeating an earlier name.
pub fn plan_vms(ctx: &mut SyncContext, source: &SourceSnapshot, infra: &Infrastructure) -> ChangePlan {
    let mut plans = Vec::new();
    let mut names = HashSet::new();
    let sync_tag = ctx.sync_tag();

    for instance in &source.instances {
        let subject = instance.name.as_str();
        if subject.trim().is_empty() {
            ctx.skip(ObjectKind::VirtualMachine, &instance.id, "VM without name");
            continue;
        }
        if !names.insert(subject) {
            ctx.skip(ObjectKind::VirtualMachine, subject, "duplicate VM name in source");
            continue;
        }
        if source.folder(&instance.folder_id).is_none() {
            let error = SyncError::inconsistency(
                subject,
                format!("folder {} not in folder listing", instance.folder_id),
            );
            ctx.skip(ObjectKind::VirtualMachine, subject, error.to_string());
            continue;
        }
        let Some(cluster) = infra.clusters.get(&instance.folder_id).copied() else {
            ctx.skip(
                ObjectKind::VirtualMachine,
                subject,
                format!("no cluster for folder {}", instance.folder_id),
            );
            continue;
        };

        let desired = DesiredVm::from_instance(instance);
        let targets = VmTargets {
            cluster,
            site: desired
                .zone_id
                .as_ref()
                .and_then(|z| infra.sites.get(z))
                .copied(),
            platform: infra.platforms.get(desired.platform_slug).copied(),
        };

        let (snapshot, registry) = ctx.planner();
        let plan = VmPlanner::new(snapshot, registry, sync_tag).plan(&desired, &targets);
        plans.push(plan);
    }

    ChangePlan { vms: plans }
}
