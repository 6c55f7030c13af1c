//! Decisions, previews and run reports.
//!
//! Every write a run performs (or would perform, when simulating) is
//! recorded as a [`Decision`]. The preview breakdown and the final report
//! are derived from that list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use nbsync_connector::fields::FieldSet;
use nbsync_connector::ids::{RecordId, Ref};
use nbsync_connector::types::ObjectKind;

use super::statistics::RunStatistics;
use super::types::{Action, ExecutionMode, FieldCategory};

/// A single planned or applied write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Record kind written.
    pub kind: ObjectKind,
    /// Human-readable subject (usually the record name).
    pub subject: String,
    /// Kind of write.
    pub action: Action,
    /// Record written, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Ref>,
    /// Payload.
    #[serde(skip_serializing_if = "FieldSet::is_empty", default)]
    pub fields: FieldSet,
    /// Categories of the fields touched by an update.
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub categories: BTreeSet<FieldCategory>,
    /// Whether the write reached the destination.
    pub applied: bool,
}

impl Decision {
    /// Create a decision.
    pub fn new(kind: ObjectKind, subject: impl Into<String>, action: Action) -> Self {
        Self {
            kind,
            subject: subject.into(),
            action,
            target: None,
            fields: FieldSet::new(),
            categories: BTreeSet::new(),
            applied: false,
        }
    }

    /// Set the target record.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<Ref>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Set the payload; update categories are derived from field names.
    #[must_use]
    pub fn with_fields(mut self, fields: FieldSet) -> Self {
        if self.action == Action::Update {
            self.categories = fields.names().map(FieldCategory::of).collect();
        }
        self.fields = fields;
        self
    }

    /// Mark whether the write was applied.
    #[must_use]
    pub fn with_applied(mut self, applied: bool) -> Self {
        self.applied = applied;
        self
    }
}

/// Create/update/delete counts for one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSummary {
    pub create: u32,
    pub update: u32,
    pub delete: u32,
}

/// Breakdown of pending (or performed) changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewSummary {
    /// Records to create.
    pub create: u32,
    /// Records to update (migrations and tagging excluded).
    pub update: u32,
    /// Updates touching each field category.
    pub update_by_category: BTreeMap<FieldCategory, u32>,
    /// Records to delete.
    pub delete: u32,
    /// Legacy-named records to rename.
    pub migrate: u32,
    /// Records that only gain the management tag.
    pub tag: u32,
    /// Per-kind breakdown.
    pub by_kind: BTreeMap<ObjectKind, KindSummary>,
}

impl PreviewSummary {
    /// Summarize a decision list.
    #[must_use]
    pub fn from_decisions(decisions: &[Decision]) -> Self {
        let mut summary = Self::default();
        for decision in decisions {
            let per_kind = summary.by_kind.entry(decision.kind).or_default();
            match decision.action {
                Action::Create => {
                    summary.create += 1;
                    per_kind.create += 1;
                }
                Action::Update => {
                    summary.update += 1;
                    per_kind.update += 1;
                    for category in &decision.categories {
                        *summary.update_by_category.entry(*category).or_insert(0) += 1;
                    }
                }
                Action::Delete => {
                    summary.delete += 1;
                    per_kind.delete += 1;
                }
                Action::Migrate => summary.migrate += 1,
                Action::Tag => summary.tag += 1,
            }
        }
        summary
    }

    /// Updates touching a category.
    #[must_use]
    pub fn updates_in(&self, category: FieldCategory) -> u32 {
        self.update_by_category.get(&category).copied().unwrap_or(0)
    }

    /// Total number of writes.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.create + self.update + self.delete + self.migrate + self.tag
    }

    /// Check if nothing would change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// A legacy-named record renamed to the current scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    pub kind: ObjectKind,
    pub id: RecordId,
    pub old_name: String,
    pub new_name: String,
    pub applied: bool,
}

/// A recoverable problem attached to one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunWarning {
    pub subject: String,
    pub message: String,
}

/// A failed remote operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: ObjectKind,
    pub subject: String,
    pub operation: Action,
    pub message: String,
}

/// A source entity that was not processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntity {
    pub kind: ObjectKind,
    pub subject: String,
    pub reason: String,
}

/// Complete report of a sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Run ID.
    pub run_id: Uuid,
    /// Execution mode.
    pub mode: ExecutionMode,
    /// Whether writes were only simulated.
    pub simulate: bool,
    /// Whether orphan cleanup ran.
    pub cleanup_ran: bool,
    /// Started at.
    pub started_at: DateTime<Utc>,
    /// Finished at.
    pub finished_at: DateTime<Utc>,
    /// Outcome counts. When simulating these are the planned outcomes.
    pub statistics: RunStatistics,
    /// Change breakdown.
    pub preview: PreviewSummary,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub migrations: Vec<Migration>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<RunWarning>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub failures: Vec<RunFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub skipped: Vec<SkippedEntity>,
    /// Full decision list.
    pub decisions: Vec<Decision>,
}

impl RunReport {
    /// Check if the run finished without failed operations.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Decisions for one kind and action.
    pub fn decisions_for(
        &self,
        kind: ObjectKind,
        action: Action,
    ) -> impl Iterator<Item = &Decision> {
        self.decisions
            .iter()
            .filter(move |d| d.kind == kind && d.action == action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_categories_derived_from_fields() {
        let decision = Decision::new(ObjectKind::VirtualMachine, "web-01", Action::Update)
            .with_fields(
                FieldSet::new()
                    .with("comments", "x")
                    .with("cluster", RecordId::new(2))
                    .with("primary_ip4", RecordId::new(3)),
            );
        assert_eq!(
            decision.categories,
            BTreeSet::from([
                FieldCategory::Content,
                FieldCategory::ParentReference,
                FieldCategory::PrimaryAddress
            ])
        );

        let create = Decision::new(ObjectKind::VirtualMachine, "web-02", Action::Create)
            .with_fields(FieldSet::new().with("comments", "x"));
        assert!(create.categories.is_empty());
    }

    #[test]
    fn test_summary_counts() {
        let decisions = vec![
            Decision::new(ObjectKind::Cluster, "a/b", Action::Migrate),
            Decision::new(ObjectKind::VirtualMachine, "web-01", Action::Create),
            Decision::new(ObjectKind::VirtualMachine, "web-02", Action::Update)
                .with_fields(FieldSet::new().with("memory", 4096_i64)),
            Decision::new(ObjectKind::VirtualMachine, "web-03", Action::Update)
                .with_fields(FieldSet::new().with("platform", RecordId::new(4))),
            Decision::new(ObjectKind::Site, "old-zone", Action::Delete),
        ];
        let summary = PreviewSummary::from_decisions(&decisions);
        assert_eq!(summary.create, 1);
        assert_eq!(summary.update, 2);
        assert_eq!(summary.delete, 1);
        assert_eq!(summary.migrate, 1);
        assert_eq!(summary.updates_in(FieldCategory::Content), 1);
        assert_eq!(summary.updates_in(FieldCategory::Other), 1);
        assert_eq!(summary.updates_in(FieldCategory::PrimaryAddress), 0);
        assert_eq!(summary.by_kind[&ObjectKind::VirtualMachine].update, 2);
        assert_eq!(summary.total(), 5);
    }

    #[test]
    fn test_empty_summary() {
        assert!(PreviewSummary::from_decisions(&[]).is_empty());
    }
}
