//! Identity resolution for grouping records.
//!
//! A folder's cluster is looked up under the current naming scheme first,
//! then under each legacy scheme in order. A legacy hit is renamed in place
//! so the record ends the run addressed by its current name.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use nbsync_connector::fields::FieldSet;
use nbsync_connector::ids::{RecordId, Ref};
use nbsync_connector::record::DestinationRecord;
use nbsync_connector::traits::DestinationRepository;
use nbsync_connector::types::ObjectKind;

use crate::error::SyncResult;

use super::context::SyncContext;
use super::keys::{slugify, GroupKey};
use super::report::Migration;
use super::types::Action;

/// Field/value pair a scheme looks a record up by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupKey {
    pub field: &'static str,
    pub value: String,
}

/// A legacy naming scheme: how to look a record up, and what to write
/// to it when found.
#[derive(Clone, Copy)]
pub struct LegacyScheme {
    /// Scheme name for logs.
    pub name: &'static str,
    /// Build the lookup for a group.
    pub lookup: fn(&GroupKey) -> LookupKey,
    /// Build the migration payload for a matched record.
    pub on_found: fn(&DestinationRecord, &GroupKey) -> FieldSet,
}

impl std::fmt::Debug for LegacyScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyScheme")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn rename_to_current(_record: &DestinationRecord, key: &GroupKey) -> FieldSet {
    FieldSet::new()
        .with("name", key.current())
        .with("slug", key.slug())
}

/// Schemes used before clusters were qualified by cloud name: the bare
/// folder name, then its slug.
#[must_use]
pub fn default_schemes() -> Vec<LegacyScheme> {
    vec![
        LegacyScheme {
            name: "folder-name",
            lookup: |key| LookupKey {
                field: "name",
                value: key.legacy(),
            },
            on_found: rename_to_current,
        },
        LegacyScheme {
            name: "folder-slug",
            lookup: |key| LookupKey {
                field: "slug",
                value: slugify(&key.legacy()),
            },
            on_found: rename_to_current,
        },
    ]
}

/// How a group was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// Found under the current name.
    Existing,
    /// Created (or would be, when simulating).
    Created,
    /// Found under a legacy name and renamed (or would be).
    Migrated,
}

/// Result of [`IdentityResolver::resolve_or_migrate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Record the group resolves to. Pending only for a simulated create.
    pub id: Ref,
    pub outcome: ResolutionOutcome,
}

impl Resolution {
    #[must_use]
    pub fn created(&self) -> bool {
        self.outcome == ResolutionOutcome::Created
    }

    #[must_use]
    pub fn migrated(&self) -> bool {
        self.outcome == ResolutionOutcome::Migrated
    }
}

/// Maps groups to destination records of one kind.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    kind: ObjectKind,
    schemes: Vec<LegacyScheme>,
}

impl IdentityResolver {
    /// Create a resolver with the default legacy schemes.
    #[must_use]
    pub fn new(kind: ObjectKind) -> Self {
        Self::with_schemes(kind, default_schemes())
    }

    /// Create a resolver with explicit legacy schemes, tried in order.
    #[must_use]
    pub fn with_schemes(kind: ObjectKind, schemes: Vec<LegacyScheme>) -> Self {
        Self { kind, schemes }
    }

    /// Append a legacy scheme, tried after the existing ones.
    #[must_use]
    pub fn then(mut self, scheme: LegacyScheme) -> Self {
        self.schemes.push(scheme);
        self
    }

    fn find_current(&self, ctx: &mut SyncContext, name: &str) -> Option<Ref> {
        let ids: Vec<RecordId> = ctx
            .snapshot()
            .find_by_name(self.kind, name)
            .iter()
            .map(|r| r.id)
            .collect();
        match ids.as_slice() {
            [] => ctx.planned(self.kind, name).map(Ref::Pending),
            [id] => Some(Ref::Resolved(*id)),
            [first, ..] => {
                ctx.warn(
                    name,
                    format!(
                        "{} {} records share this name, using ID {}",
                        ids.len(),
                        self.kind,
                        first
                    ),
                );
                Some(Ref::Resolved(*first))
            }
        }
    }

    fn find_legacy(
        &self,
        ctx: &mut SyncContext,
        scheme: &LegacyScheme,
        key: &LookupKey,
        current: &str,
    ) -> Option<RecordId> {
        let matches: Vec<RecordId> = ctx
            .snapshot()
            .find(self.kind, key.field, &key.value)
            .iter()
            .filter(|r| r.name() != current)
            .map(|r| r.id)
            .collect();
        match matches.as_slice() {
            [] => None,
            [id] => Some(*id),
            _ => {
                ctx.warn(
                    current,
                    format!(
                        "ambiguous legacy lookup: {} {} records match {}={} under scheme {}",
                        matches.len(),
                        self.kind,
                        key.field,
                        key.value,
                        scheme.name
                    ),
                );
                None
            }
        }
    }

    /// Resolve a group to a record, renaming a legacy match or creating the
    /// record when nothing matches.
    ///
    /// `create_fields` is the payload for a new record; name and slug are
    /// added here. In a simulated run nothing is written, but the snapshot
    /// reflects the rename and a created record resolves to its placeholder,
    /// so a repeated call returns the same reference.
    pub async fn resolve_or_migrate<D: DestinationRepository + ?Sized>(
        &self,
        ctx: &mut SyncContext,
        destination: &D,
        key: &GroupKey,
        create_fields: FieldSet,
    ) -> SyncResult<Resolution> {
        let current = key.current();

        if let Some(id) = self.find_current(ctx, &current) {
            debug!(kind = %self.kind, name = %current, id = %id, "Resolved under current name");
            return Ok(Resolution {
                id,
                outcome: ResolutionOutcome::Existing,
            });
        }

        for scheme in &self.schemes {
            let lookup = (scheme.lookup)(key);
            let Some(id) = self.find_legacy(ctx, scheme, &lookup, &current) else {
                continue;
            };
            let Some(record) = ctx.snapshot().get(self.kind, id) else {
                continue;
            };
            let old_name = record.name().to_string();
            let fields = (scheme.on_found)(record, key);

            ctx.update(destination, self.kind, id, &current, fields, Action::Migrate)
                .await?;
            info!(
                kind = %self.kind,
                id = %id,
                old_name = %old_name,
                new_name = %current,
                scheme = scheme.name,
                simulate = ctx.is_simulate(),
                "Migrated legacy record"
            );
            ctx.record_migration(Migration {
                kind: self.kind,
                id,
                old_name,
                new_name: current.clone(),
                applied: !ctx.is_simulate(),
            });
            return Ok(Resolution {
                id: Ref::Resolved(id),
                outcome: ResolutionOutcome::Migrated,
            });
        }

        let fields = create_fields
            .with(self.kind.name_field(), current.clone())
            .with("slug", key.slug());
        let id = ctx
            .create(destination, self.kind, &current, fields, None)
            .await?;
        Ok(Resolution {
            id,
            outcome: ResolutionOutcome::Created,
        })
    }
}
