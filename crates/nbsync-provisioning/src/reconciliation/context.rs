//! Per-run state.
//!
//! [`SyncContext`] owns everything a run accumulates: the destination
//! snapshot, placeholder bindings, the decision list and the failure
//! summary. Every destination write goes through it, so simulate-only runs
//! route writes into the decision list while still updating the snapshot
//! and binding placeholders as if the writes had happened.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use nbsync_connector::error::ConnectorError;
use nbsync_connector::fields::FieldSet;
use nbsync_connector::ids::{PendingTag, RecordId, Ref};
use nbsync_connector::record::DestinationRecord;
use nbsync_connector::traits::DestinationRepository;
use nbsync_connector::types::ObjectKind;

use crate::error::{SyncError, SyncResult};

use super::report::{
    Decision, Migration, PreviewSummary, RunFailure, RunReport, RunWarning, SkippedEntity,
};
use super::snapshot::DestinationSnapshot;
use super::statistics::{Outcome, StatisticsTracker};
use super::types::{Action, ExecutionMode};

/// What a reference points at right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// A real destination record.
    Real(RecordId),
    /// A record created only in simulation.
    Simulated(PendingTag),
    /// A placeholder whose creation has not happened (or failed).
    Unbound(PendingTag),
}

/// Allocates placeholders and records what they resolve to.
///
/// Bindings are append-only for the lifetime of a run.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    next: u32,
    resolved: HashMap<PendingTag, RecordId>,
    simulated: HashSet<PendingTag>,
}

impl PendingRegistry {
    /// Allocate a fresh placeholder.
    pub fn allocate(&mut self) -> PendingTag {
        self.next += 1;
        PendingTag::new(self.next)
    }

    /// Resolve a reference against the bindings made so far.
    #[must_use]
    pub fn bind(&self, reference: Ref) -> Binding {
        match reference {
            Ref::Resolved(id) => Binding::Real(id),
            Ref::Pending(tag) => match self.resolved.get(&tag) {
                Some(id) => Binding::Real(*id),
                None if self.simulated.contains(&tag) => Binding::Simulated(tag),
                None => Binding::Unbound(tag),
            },
        }
    }

    fn resolve(&mut self, tag: PendingTag, id: RecordId) {
        self.resolved.entry(tag).or_insert(id);
    }

    fn simulate(&mut self, tag: PendingTag) {
        self.simulated.insert(tag);
    }
}

/// Mutable state of one sync run.
#[derive(Debug)]
pub struct SyncContext {
    snapshot: DestinationSnapshot,
    simulate: bool,
    sync_tag: Option<RecordId>,
    pending: PendingRegistry,
    planned: HashMap<(ObjectKind, String), PendingTag>,
    decisions: Vec<Decision>,
    migrations: Vec<Migration>,
    warnings: Vec<RunWarning>,
    failures: Vec<RunFailure>,
    skipped: Vec<SkippedEntity>,
    stats: StatisticsTracker,
}

impl SyncContext {
    /// Create a context over a loaded snapshot.
    #[must_use]
    pub fn new(snapshot: DestinationSnapshot, simulate: bool) -> Self {
        Self {
            snapshot,
            simulate,
            sync_tag: None,
            pending: PendingRegistry::default(),
            planned: HashMap::new(),
            decisions: Vec::new(),
            migrations: Vec::new(),
            warnings: Vec::new(),
            failures: Vec::new(),
            skipped: Vec::new(),
            stats: StatisticsTracker::new(),
        }
    }

    /// Whether writes are only simulated.
    #[must_use]
    pub fn is_simulate(&self) -> bool {
        self.simulate
    }

    /// The destination snapshot as updated by this run.
    #[must_use]
    pub fn snapshot(&self) -> &DestinationSnapshot {
        &self.snapshot
    }

    /// Borrow the snapshot and the placeholder registry together, for
    /// planning passes that read one while allocating from the other.
    pub fn planner(&mut self) -> (&DestinationSnapshot, &mut PendingRegistry) {
        (&self.snapshot, &mut self.pending)
    }

    /// Placeholder bindings made so far.
    #[must_use]
    pub fn registry(&self) -> &PendingRegistry {
        &self.pending
    }

    /// The management tag, once known.
    #[must_use]
    pub fn sync_tag(&self) -> Option<RecordId> {
        self.sync_tag
    }

    /// Set the management tag.
    pub fn set_sync_tag(&mut self, tag: Option<RecordId>) {
        self.sync_tag = tag;
    }

    /// Allocate a fresh placeholder.
    pub fn allocate(&mut self) -> PendingTag {
        self.pending.allocate()
    }

    /// Resolve a reference against the bindings made so far.
    #[must_use]
    pub fn bind(&self, reference: Ref) -> Binding {
        self.pending.bind(reference)
    }

    /// Placeholder of a record created earlier in this simulated run.
    #[must_use]
    pub fn planned(&self, kind: ObjectKind, name: &str) -> Option<PendingTag> {
        self.planned.get(&(kind, name.to_string())).copied()
    }

    /// Write a reference into a payload.
    ///
    /// Real IDs are written as-is; simulated records are written as their
    /// placeholder label. Returns false for an unbound placeholder, leaving
    /// the payload untouched.
    pub fn bind_into(&self, fields: &mut FieldSet, field: &str, reference: Ref) -> bool {
        match self.bind(reference) {
            Binding::Real(id) => {
                fields.set(field, id);
                true
            }
            Binding::Simulated(tag) => {
                fields.set(field, tag.to_string());
                true
            }
            Binding::Unbound(_) => false,
        }
    }

    fn with_sync_tag(&self, kind: ObjectKind, mut fields: FieldSet) -> FieldSet {
        if let Some(tag) = self.sync_tag {
            if kind.is_taggable() && !fields.has("tags") {
                fields.set("tags", vec![tag]);
            }
        }
        fields
    }

    /// Create a record.
    ///
    /// When `tag` is given, the placeholder is bound to the new record. In a
    /// simulated run the record is not created and the returned reference is
    /// the (simulated) placeholder.
    pub async fn create<D: DestinationRepository + ?Sized>(
        &mut self,
        destination: &D,
        kind: ObjectKind,
        subject: &str,
        fields: FieldSet,
        tag: Option<PendingTag>,
    ) -> SyncResult<Ref> {
        let fields = self.with_sync_tag(kind, fields);
        let decision = Decision::new(kind, subject, Action::Create).with_fields(fields.clone());

        if self.simulate {
            let tag = tag.unwrap_or_else(|| self.pending.allocate());
            self.pending.simulate(tag);
            if let Some(name) = fields.get_str(kind.name_field()) {
                self.planned.insert((kind, name.to_string()), tag);
            }
            debug!(kind = %kind, subject = %subject, "Would create record");
            self.stats.record(kind, Outcome::Created);
            self.decisions.push(decision.with_target(tag));
            return Ok(Ref::Pending(tag));
        }

        match destination.create(kind, fields.clone()).await {
            Ok(id) => {
                info!(kind = %kind, subject = %subject, id = %id, "Created record");
                if let Some(tag) = tag {
                    self.pending.resolve(tag, id);
                }
                self.snapshot
                    .insert(DestinationRecord::new(kind, id, fields));
                self.stats.record(kind, Outcome::Created);
                self.decisions
                    .push(decision.with_target(id).with_applied(true));
                Ok(Ref::Resolved(id))
            }
            Err(e) => {
                self.fail(kind, subject, Action::Create, &e);
                Err(e.into())
            }
        }
    }

    /// Apply a partial update to a record.
    ///
    /// `action` is [`Action::Update`] or [`Action::Migrate`].
    pub async fn update<D: DestinationRepository + ?Sized>(
        &mut self,
        destination: &D,
        kind: ObjectKind,
        id: RecordId,
        subject: &str,
        fields: FieldSet,
        action: Action,
    ) -> SyncResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let decision = Decision::new(kind, subject, action)
            .with_target(id)
            .with_fields(fields.clone());
        let outcome = if action == Action::Migrate {
            Outcome::Migrated
        } else {
            Outcome::Updated
        };

        if self.simulate {
            debug!(kind = %kind, subject = %subject, fields = ?fields.names().collect::<Vec<_>>(), "Would update record");
            self.snapshot.apply_update(kind, id, &fields);
            self.stats.record(kind, outcome);
            self.decisions.push(decision);
            return Ok(());
        }

        match destination.update(kind, id, fields.clone()).await {
            Ok(()) => {
                info!(kind = %kind, subject = %subject, id = %id, action = %action, "Updated record");
                self.snapshot.apply_update(kind, id, &fields);
                self.stats.record(kind, outcome);
                self.decisions.push(decision.with_applied(true));
                Ok(())
            }
            Err(e) => {
                self.fail(kind, subject, action, &e);
                Err(e.into())
            }
        }
    }

    /// Apply a partial update to a record that may have been created in this
    /// run.
    ///
    /// A record created only in simulation gets a decision and a planned
    /// outcome, nothing else.
    /// An unbound target fails with [`SyncError::UnresolvedReference`].
    pub async fn update_ref<D: DestinationRepository + ?Sized>(
        &mut self,
        destination: &D,
        kind: ObjectKind,
        target: Ref,
        subject: &str,
        fields: FieldSet,
        action: Action,
    ) -> SyncResult<()> {
        match self.bind(target) {
            Binding::Real(id) => {
                self.update(destination, kind, id, subject, fields, action)
                    .await
            }
            Binding::Simulated(tag) => {
                if !fields.is_empty() {
                    let outcome = if action == Action::Migrate {
                        Outcome::Migrated
                    } else {
                        Outcome::Updated
                    };
                    self.stats.record(kind, outcome);
                    self.decisions.push(
                        Decision::new(kind, subject, action)
                            .with_target(tag)
                            .with_fields(fields),
                    );
                }
                Ok(())
            }
            Binding::Unbound(_) => Err(SyncError::unresolved(subject, "id")),
        }
    }

    /// Add the management tag to a record that lacks it.
    pub async fn tag<D: DestinationRepository + ?Sized>(
        &mut self,
        destination: &D,
        kind: ObjectKind,
        id: RecordId,
        subject: &str,
    ) -> SyncResult<()> {
        let Some(tag) = self.sync_tag else {
            return Ok(());
        };
        let Some(record) = self.snapshot.get(kind, id) else {
            return Ok(());
        };
        if !kind.is_taggable() || record.has_tag(tag) {
            return Ok(());
        }

        let mut tags = record.tags();
        tags.push(tag);
        let fields = FieldSet::new().with("tags", tags);
        let decision = Decision::new(kind, subject, Action::Tag)
            .with_target(id)
            .with_fields(fields.clone());

        if self.simulate {
            self.snapshot.apply_update(kind, id, &fields);
            self.stats.record(kind, Outcome::Updated);
            self.decisions.push(decision);
            return Ok(());
        }

        match destination.tag(kind, id, tag).await {
            Ok(()) => {
                debug!(kind = %kind, subject = %subject, id = %id, "Tagged record");
                self.snapshot.apply_update(kind, id, &fields);
                self.stats.record(kind, Outcome::Updated);
                self.decisions.push(decision.with_applied(true));
                Ok(())
            }
            Err(e) => {
                self.fail(kind, subject, Action::Tag, &e);
                Err(e.into())
            }
        }
    }

    /// Delete a record.
    pub async fn delete<D: DestinationRepository + ?Sized>(
        &mut self,
        destination: &D,
        kind: ObjectKind,
        id: RecordId,
        subject: &str,
    ) -> SyncResult<()> {
        let decision = Decision::new(kind, subject, Action::Delete).with_target(id);

        if self.simulate {
            debug!(kind = %kind, subject = %subject, "Would delete record");
            self.snapshot.remove(kind, id);
            self.stats.record(kind, Outcome::Deleted);
            self.decisions.push(decision);
            return Ok(());
        }

        match destination.delete(kind, id).await {
            Ok(()) => {
                info!(kind = %kind, subject = %subject, id = %id, "Deleted record");
                self.snapshot.remove(kind, id);
                self.stats.record(kind, Outcome::Deleted);
                self.decisions.push(decision.with_applied(true));
                Ok(())
            }
            Err(e) => {
                self.fail(kind, subject, Action::Delete, &e);
                Err(e.into())
            }
        }
    }

    fn fail(&mut self, kind: ObjectKind, subject: &str, operation: Action, error: &ConnectorError) {
        warn!(
            kind = %kind,
            subject = %subject,
            operation = %operation,
            error_code = error.error_code(),
            error = %error,
            "Destination write failed"
        );
        self.stats.record(kind, Outcome::Failed);
        self.failures.push(RunFailure {
            kind,
            subject: subject.to_string(),
            operation,
            message: error.to_string(),
        });
    }

    /// Record a failure that did not come from a repository call.
    pub fn record_failure(
        &mut self,
        kind: ObjectKind,
        subject: &str,
        operation: Action,
        message: impl Into<String>,
    ) {
        let message = message.into();
        warn!(kind = %kind, subject = %subject, operation = %operation, error = %message, "Operation failed");
        self.stats.record(kind, Outcome::Failed);
        self.failures.push(RunFailure {
            kind,
            subject: subject.to_string(),
            operation,
            message,
        });
    }

    /// Record a legacy rename.
    pub fn record_migration(&mut self, migration: Migration) {
        self.migrations.push(migration);
    }

    /// Record a per-entity warning.
    pub fn warn(&mut self, subject: &str, message: impl Into<String>) {
        let message = message.into();
        warn!(subject = %subject, "{message}");
        self.warnings.push(RunWarning {
            subject: subject.to_string(),
            message,
        });
    }

    /// Record a skipped source entity.
    pub fn skip(&mut self, kind: ObjectKind, subject: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(kind = %kind, subject = %subject, reason = %reason, "Skipping entity");
        self.stats.record(kind, Outcome::Skipped);
        self.skipped.push(SkippedEntity {
            kind,
            subject: subject.to_string(),
            reason,
        });
    }

    /// Record an entity that needed no change.
    pub fn unchanged(&mut self, kind: ObjectKind) {
        self.stats.record(kind, Outcome::Unchanged);
    }

    /// Decisions recorded so far.
    #[must_use]
    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    /// Migrations recorded so far.
    #[must_use]
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Warnings recorded so far.
    #[must_use]
    pub fn warnings(&self) -> &[RunWarning] {
        &self.warnings
    }

    /// Failures recorded so far.
    #[must_use]
    pub fn failures(&self) -> &[RunFailure] {
        &self.failures
    }

    /// Skipped entities recorded so far.
    #[must_use]
    pub fn skipped(&self) -> &[SkippedEntity] {
        &self.skipped
    }

    /// Close the run and produce its report.
    #[must_use]
    pub fn into_report(
        self,
        run_id: Uuid,
        mode: ExecutionMode,
        cleanup_ran: bool,
        started_at: chrono::DateTime<Utc>,
    ) -> RunReport {
        RunReport {
            run_id,
            mode,
            simulate: self.simulate,
            cleanup_ran,
            started_at,
            finished_at: Utc::now(),
            statistics: self.stats.finish(),
            preview: PreviewSummary::from_decisions(&self.decisions),
            migrations: self.migrations,
            warnings: self.warnings,
            failures: self.failures,
            skipped: self.skipped,
            decisions: self.decisions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::test_support::MemoryDestination;

    #[test]
    fn test_registry_bindings() {
        let mut registry = PendingRegistry::default();
        let a = registry.allocate();
        let b = registry.allocate();
        let c = registry.allocate();
        assert_ne!(a, b);

        registry.resolve(a, RecordId::new(10));
        registry.simulate(b);

        assert_eq!(registry.bind(Ref::Pending(a)), Binding::Real(RecordId::new(10)));
        assert_eq!(registry.bind(Ref::Pending(b)), Binding::Simulated(b));
        assert_eq!(registry.bind(Ref::Pending(c)), Binding::Unbound(c));
        assert_eq!(
            registry.bind(Ref::Resolved(RecordId::new(3))),
            Binding::Real(RecordId::new(3))
        );
    }

    #[test]
    fn test_bindings_are_append_only() {
        let mut registry = PendingRegistry::default();
        let tag = registry.allocate();
        registry.resolve(tag, RecordId::new(1));
        registry.resolve(tag, RecordId::new(2));
        assert_eq!(registry.bind(Ref::Pending(tag)), Binding::Real(RecordId::new(1)));
    }

    #[test]
    fn test_bind_into_skips_unbound() {
        let mut ctx = SyncContext::new(DestinationSnapshot::new(), false);
        let tag = ctx.allocate();
        let mut fields = FieldSet::new();
        assert!(!ctx.bind_into(&mut fields, "cluster", Ref::Pending(tag)));
        assert!(fields.is_empty());
        assert!(ctx.bind_into(&mut fields, "cluster", Ref::Resolved(RecordId::new(4))));
        assert_eq!(fields.get_record_id("cluster"), Some(RecordId::new(4)));
    }

    #[tokio::test]
    async fn test_simulated_writes_count_as_planned_outcomes() {
        let existing = vec![
            DestinationRecord::new(
                ObjectKind::Cluster,
                RecordId::new(1),
                FieldSet::new().with("name", "prod-devops"),
            ),
            DestinationRecord::new(
                ObjectKind::Site,
                RecordId::new(2),
                FieldSet::new().with("name", "ru-central1-d"),
            ),
        ];
        let destination = MemoryDestination::with_records(existing.clone());
        let mut ctx = SyncContext::new(DestinationSnapshot::from_records(existing), true);

        let vm = ctx
            .create(
                &destination,
                ObjectKind::VirtualMachine,
                "web-01",
                FieldSet::new().with("name", "web-01"),
                None,
            )
            .await
            .unwrap();
        ctx.update_ref(
            &destination,
            ObjectKind::VirtualMachine,
            vm,
            "web-01",
            FieldSet::new().with("comments", "x"),
            Action::Update,
        )
        .await
        .unwrap();
        ctx.update(
            &destination,
            ObjectKind::Cluster,
            RecordId::new(1),
            "grand-trade/prod-devops",
            FieldSet::new().with("name", "grand-trade/prod-devops"),
            Action::Migrate,
        )
        .await
        .unwrap();
        ctx.delete(&destination, ObjectKind::Site, RecordId::new(2), "ru-central1-d")
            .await
            .unwrap();

        assert_eq!(destination.mutating_calls(), 0);
        let vm_counts = ctx.stats.kind(ObjectKind::VirtualMachine);
        assert_eq!(vm_counts.created, 1);
        assert_eq!(vm_counts.updated, 1);
        assert_eq!(ctx.stats.kind(ObjectKind::Cluster).migrated, 1);
        assert_eq!(ctx.stats.kind(ObjectKind::Site).deleted, 1);
        assert!(ctx.decisions().iter().all(|d| !d.applied));
    }
}
