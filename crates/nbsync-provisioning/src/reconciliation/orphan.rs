//! Orphan detection and cleanup.
//!
//! A managed record is an orphan when none of its identity keys matches a
//! source entity. Detection runs after identity resolution, so renamed
//! legacy records are matched under their current names.

use std::collections::HashSet;

use tracing::info;

use nbsync_connector::ids::RecordId;
use nbsync_connector::record::DestinationRecord;
use nbsync_connector::traits::DestinationRepository;
use nbsync_connector::types::ObjectKind;

use super::context::SyncContext;
use super::keys::{zone_slug, GroupKey};
use super::snapshot::SourceSnapshot;

/// Managed records of `kind` whose identity keys match no source key.
///
/// `identity` yields every key a record may be matched by; a record is
/// kept when any of them is in `source_keys`.
pub fn find_orphans<'a, F>(
    source_keys: &HashSet<String>,
    records: impl IntoIterator<Item = &'a DestinationRecord>,
    tag: RecordId,
    identity: F,
) -> Vec<&'a DestinationRecord>
where
    F: Fn(&DestinationRecord) -> Vec<String>,
{
    records
        .into_iter()
        .filter(|record| record.has_tag(tag))
        .filter(|record| !identity(record).iter().any(|key| source_keys.contains(key)))
        .collect()
}

const FOLDER_ID_PREFIX: &str = "Folder ID: ";

fn cluster_identity(record: &DestinationRecord) -> Vec<String> {
    let mut keys = vec![record.name().to_string()];
    if let Some(folder_id) = record
        .text("comments")
        .lines()
        .find_map(|line| line.trim().strip_prefix(FOLDER_ID_PREFIX))
    {
        keys.push(format!("{FOLDER_ID_PREFIX}{}", folder_id.trim()));
    }
    keys
}

fn name_identity(record: &DestinationRecord) -> Vec<String> {
    vec![record.name().to_string()]
}

fn slug_identity(record: &DestinationRecord) -> Vec<String> {
    record.slug().map(str::to_string).into_iter().collect()
}

/// Identity keys of every source entity, per managed kind.
#[derive(Debug, Clone, Default)]
pub struct SourceKeys {
    pub sites: HashSet<String>,
    pub clusters: HashSet<String>,
    pub prefixes: HashSet<String>,
    pub vms: HashSet<String>,
}

impl SourceKeys {
    /// Collect keys from a source snapshot.
    #[must_use]
    pub fn from_snapshot(source: &SourceSnapshot) -> Self {
        let mut keys = Self::default();
        keys.sites = source.zones.iter().map(|z| zone_slug(&z.id)).collect();
        for folder in &source.folders {
            let group = GroupKey::new(source.cloud_name(folder), folder.name.clone());
            keys.clusters.insert(group.current());
            keys.clusters.insert(format!("{FOLDER_ID_PREFIX}{}", folder.id));
        }
        keys.prefixes = source
            .subnets
            .iter()
            .filter_map(|s| s.cidr.clone())
            .collect();
        keys.vms = source.instances.iter().map(|i| i.name.clone()).collect();
        keys
    }
}

/// Delete managed records with no source counterpart.
///
/// VMs go first, then prefixes, clusters and sites, so no record is
/// deleted while something still references it.
pub async fn cleanup_orphans<D: DestinationRepository + ?Sized>(
    ctx: &mut SyncContext,
    destination: &D,
    keys: &SourceKeys,
) {
    let Some(tag) = ctx.sync_tag() else {
        info!("Management tag unknown, skipping orphan cleanup");
        return;
    };

    let passes: [(ObjectKind, &HashSet<String>, fn(&DestinationRecord) -> Vec<String>); 4] = [
        (ObjectKind::VirtualMachine, &keys.vms, name_identity),
        (ObjectKind::Prefix, &keys.prefixes, name_identity),
        (ObjectKind::Cluster, &keys.clusters, cluster_identity),
        (ObjectKind::Site, &keys.sites, slug_identity),
    ];

    for (kind, source_keys, identity) in passes {
        let orphans: Vec<(RecordId, String)> =
            find_orphans(source_keys, ctx.snapshot().records(kind), tag, identity)
                .into_iter()
                .map(|r| (r.id, r.name().to_string()))
                .collect();
        if !orphans.is_empty() {
            info!(kind = %kind, count = orphans.len(), "Removing orphaned records");
        }
        for (id, name) in orphans {
            if let Err(e) = ctx.delete(destination, kind, id, &name).await {
                tracing::debug!(error = %e, "Continuing after failed delete");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbsync_connector::fields::FieldSet;

    const TAG: RecordId = RecordId::new(1);

    fn record(kind: ObjectKind, id: u64, fields: FieldSet, tagged: bool) -> DestinationRecord {
        let fields = if tagged {
            fields.with("tags", vec![TAG])
        } else {
            fields
        };
        DestinationRecord::new(kind, RecordId::new(id), fields)
    }

    #[test]
    fn test_only_tagged_unmatched_records() {
        let records = vec![
            record(ObjectKind::VirtualMachine, 1, FieldSet::new().with("name", "web-1"), true),
            record(ObjectKind::VirtualMachine, 2, FieldSet::new().with("name", "gone"), true),
            record(ObjectKind::VirtualMachine, 3, FieldSet::new().with("name", "manual"), false),
        ];
        let source: HashSet<String> = ["web-1".to_string()].into();

        let orphans = find_orphans(&source, &records, TAG, name_identity);
        let ids: Vec<u64> = orphans.iter().map(|r| r.id.get()).collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_cluster_matched_by_folder_id() {
        let records = vec![record(
            ObjectKind::Cluster,
            5,
            FieldSet::new()
                .with("name", "old-name")
                .with("comments", "Folder ID: b1gfolder\nnotes"),
            true,
        )];
        let source: HashSet<String> = ["Folder ID: b1gfolder".to_string()].into();

        assert!(find_orphans(&source, &records, TAG, cluster_identity).is_empty());
    }

    #[test]
    fn test_site_without_slug_is_orphan() {
        let records = vec![record(ObjectKind::Site, 5, FieldSet::new().with("name", "x"), true)];
        let source: HashSet<String> = ["ru-central1-a".to_string()].into();
        assert_eq!(find_orphans(&source, &records, TAG, slug_identity).len(), 1);
    }
}
