//! Infrastructure records VMs depend on.
//!
//! Runs before VM planning: the management tag, one site per zone, the
//! cluster type, one cluster per folder, one prefix per subnet and the
//! platforms the instances need.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info};

use nbsync_connector::ids::{RecordId, Ref};
use nbsync_connector::record::DestinationRecord;
use nbsync_connector::traits::DestinationRepository;
use nbsync_connector::types::ObjectKind;

use crate::error::SyncError;

use super::changeset::{diff, ChangeSet, StagedFields};
use super::context::SyncContext;
use super::desired::detect_platform_slug;
use super::identity::IdentityResolver;
use super::keys::{slugify, zone_slug, GroupKey};
use super::normalize::normalize;
use super::snapshot::SourceSnapshot;
use super::types::Action;

/// Color of the management tag.
pub const SYNC_TAG_COLOR: &str = "2196f3";
/// Description of the management tag.
pub const SYNC_TAG_DESCRIPTION: &str = "Object synced from Yandex Cloud";
/// Name and slug of the cluster type for folders.
pub const CLUSTER_TYPE: &str = "yandex-cloud";
const CLUSTER_TYPE_DESCRIPTION: &str = "Yandex Cloud Platform";

/// References produced by infrastructure sync, keyed by source ID.
#[derive(Debug, Clone, Default)]
pub struct Infrastructure {
    /// Sites by zone ID.
    pub sites: HashMap<String, Ref>,
    pub cluster_type: Option<Ref>,
    /// Clusters by folder ID.
    pub clusters: HashMap<String, Ref>,
    /// Platforms by slug.
    pub platforms: HashMap<&'static str, Ref>,
}

fn lowest(records: Vec<&DestinationRecord>) -> Option<RecordId> {
    records.into_iter().map(|r| r.id).min()
}

fn find_by_name_or_slug(ctx: &SyncContext, kind: ObjectKind, name: &str, slug: &str) -> Option<RecordId> {
    lowest(ctx.snapshot().find_by_name(kind, name))
        .or_else(|| lowest(ctx.snapshot().find(kind, "slug", slug)))
}

async fn create<D: DestinationRepository + ?Sized>(
    ctx: &mut SyncContext,
    destination: &D,
    kind: ObjectKind,
    subject: &str,
    desired: &StagedFields,
) -> Option<Ref> {
    let (fields, unresolved) = desired.materialize(ctx);
    for field in unresolved {
        ctx.warn(subject, SyncError::unresolved(subject, field).to_string());
    }
    ctx.create(destination, kind, subject, fields, None).await.ok()
}

/// Bring one record in line with its desired fields, creating it when
/// absent. Returns None when the record could not be created.
async fn ensure<D: DestinationRepository + ?Sized>(
    ctx: &mut SyncContext,
    destination: &D,
    kind: ObjectKind,
    subject: &str,
    existing: Option<RecordId>,
    desired: StagedFields,
    tag_existing: bool,
) -> Option<Ref> {
    let Some(id) = existing else {
        return create(ctx, destination, kind, subject, &desired).await;
    };

    match diff(&desired, ctx.snapshot().get(kind, id), ctx.registry()) {
        ChangeSet::Create(_) => return create(ctx, destination, kind, subject, &desired).await,
        ChangeSet::Update(fields) => {
            debug!(kind = %kind, subject = %subject, fields = ?fields.names().collect::<Vec<_>>(), "Fields differ");
            if ctx
                .update(destination, kind, id, subject, fields, Action::Update)
                .await
                .is_err()
            {
                return Some(Ref::Resolved(id));
            }
        }
        ChangeSet::Noop => {
            let tagged = match (ctx.sync_tag(), ctx.snapshot().get(kind, id)) {
                (Some(tag), Some(record)) => record.has_tag(tag),
                _ => true,
            };
            if !tag_existing || tagged {
                ctx.unchanged(kind);
            }
        }
    }

    if tag_existing {
        if let Err(e) = ctx.tag(destination, kind, id, subject).await {
            debug!(error = %e, "Continuing after failed tag");
        }
    }
    Some(Ref::Resolved(id))
}

/// Find or create the management tag and remember it in the context.
pub async fn ensure_sync_tag<D: DestinationRepository + ?Sized>(
    ctx: &mut SyncContext,
    destination: &D,
    name: &str,
) {
    let slug = slugify(name);
    let existing = find_by_name_or_slug(ctx, ObjectKind::Tag, name, &slug);
    let desired = StagedFields::new()
        .value("name", name)
        .value("slug", slug.as_str())
        .value("color", SYNC_TAG_COLOR)
        .value("description", SYNC_TAG_DESCRIPTION);

    let tag = match existing {
        Some(id) => Some(Ref::Resolved(id)),
        None => create(ctx, destination, ObjectKind::Tag, name, &desired).await,
    };
    match tag {
        Some(Ref::Resolved(id)) => {
            info!(tag = %name, id = %id, "Using management tag");
            ctx.set_sync_tag(Some(id));
        }
        _ => info!(tag = %name, "Management tag not available, records will not be tagged"),
    }
}

async fn sync_sites<D: DestinationRepository + ?Sized>(
    ctx: &mut SyncContext,
    destination: &D,
    source: &SourceSnapshot,
    infra: &mut Infrastructure,
) {
    for zone in &source.zones {
        if zone.id.is_empty() {
            continue;
        }
        let name = if zone.name.is_empty() { &zone.id } else { &zone.name };
        let slug = zone_slug(&zone.id);
        let existing = find_by_name_or_slug(ctx, ObjectKind::Site, name, &slug);
        let desired = StagedFields::new()
            .value("name", name.as_str())
            .value("slug", slug.as_str())
            .value(
                "description",
                format!("Yandex Cloud Availability Zone: {}", zone.id),
            )
            .value("status", "active");

        if let Some(site) =
            ensure(ctx, destination, ObjectKind::Site, name, existing, desired, true).await
        {
            infra.sites.insert(zone.id.clone(), site);
        }
    }
}

async fn sync_cluster_type<D: DestinationRepository + ?Sized>(
    ctx: &mut SyncContext,
    destination: &D,
    infra: &mut Infrastructure,
) {
    let existing = lowest(ctx.snapshot().find(ObjectKind::ClusterType, "slug", CLUSTER_TYPE))
        .or_else(|| lowest(ctx.snapshot().find_by_name(ObjectKind::ClusterType, CLUSTER_TYPE)));
    let desired = StagedFields::new()
        .value("name", CLUSTER_TYPE)
        .value("slug", CLUSTER_TYPE)
        .value("description", CLUSTER_TYPE_DESCRIPTION);
    infra.cluster_type = ensure(
        ctx,
        destination,
        ObjectKind::ClusterType,
        CLUSTER_TYPE,
        existing,
        desired,
        false,
    )
    .await;
}

fn cluster_comments(folder_id: &str, description: &str) -> String {
    normalize(Some(&format!("Folder ID: {folder_id}\n{description}")))
}

async fn sync_clusters<D: DestinationRepository + ?Sized>(
    ctx: &mut SyncContext,
    destination: &D,
    source: &SourceSnapshot,
    infra: &mut Infrastructure,
) {
    let resolver = IdentityResolver::new(ObjectKind::Cluster);

    for folder in &source.folders {
        let key = GroupKey::new(source.cloud_name(folder), folder.name.clone());
        let subject = key.current();
        let desired = StagedFields::new()
            .value("comments", cluster_comments(&folder.id, &folder.description))
            .maybe_reference("type", infra.cluster_type);

        let create_fields = desired.clone().value("status", "active").materialize(ctx).0;

        let resolution = match resolver
            .resolve_or_migrate(ctx, destination, &key, create_fields)
            .await
        {
            Ok(resolution) => resolution,
            Err(e) => {
                debug!(cluster = %subject, error = %e, "Cluster unavailable");
                continue;
            }
        };

        if !resolution.created() {
            if let Ref::Resolved(id) = resolution.id {
                ensure(ctx, destination, ObjectKind::Cluster, &subject, Some(id), desired, true)
                    .await;
            }
        }
        infra.clusters.insert(folder.id.clone(), resolution.id);
    }
}

async fn sync_prefixes<D: DestinationRepository + ?Sized>(
    ctx: &mut SyncContext,
    destination: &D,
    source: &SourceSnapshot,
    infra: &Infrastructure,
) {
    let mut seen = BTreeSet::new();

    for subnet in &source.subnets {
        let Some(cidr) = subnet.cidr.as_deref().filter(|c| !c.is_empty()) else {
            continue;
        };
        if !seen.insert(cidr.to_string()) {
            debug!(prefix = %cidr, subnet = %subnet.id, "Prefix already synced from another subnet");
            continue;
        }

        let vpc = subnet.network_name.as_deref().unwrap_or(&subnet.network_id);
        let mut desired = StagedFields::new().value("prefix", cidr).value(
            "description",
            normalize(Some(&format!("VPC: {vpc}\n{}", subnet.description))),
        );
        if let Some(site) = subnet.zone_id.as_ref().and_then(|z| infra.sites.get(z)) {
            desired = desired
                .value("scope_type", "dcim.site")
                .reference("scope_id", *site);
        }

        let existing = lowest(ctx.snapshot().find_by_name(ObjectKind::Prefix, cidr));
        let desired = if existing.is_none() {
            desired.value("status", "active")
        } else {
            desired
        };
        ensure(ctx, destination, ObjectKind::Prefix, cidr, existing, desired, true).await;
    }
}

async fn sync_platforms<D: DestinationRepository + ?Sized>(
    ctx: &mut SyncContext,
    destination: &D,
    source: &SourceSnapshot,
    infra: &mut Infrastructure,
) {
    let slugs: BTreeSet<&'static str> = source
        .instances
        .iter()
        .map(|i| detect_platform_slug(i.os.as_deref().unwrap_or_default()))
        .collect();

    for slug in slugs {
        let existing = lowest(ctx.snapshot().find(ObjectKind::Platform, "slug", slug));
        let platform = match existing {
            Some(id) => Some(Ref::Resolved(id)),
            None => {
                let desired = StagedFields::new().value("name", slug).value("slug", slug);
                create(ctx, destination, ObjectKind::Platform, slug, &desired).await
            }
        };
        if let Some(platform) = platform {
            infra.platforms.insert(slug, platform);
        }
    }
}

/// Reconcile every infrastructure record and return their references.
pub async fn sync_infrastructure<D: DestinationRepository + ?Sized>(
    ctx: &mut SyncContext,
    destination: &D,
    source: &SourceSnapshot,
    tag_name: &str,
) -> Infrastructure {
    let mut infra = Infrastructure::default();

    ensure_sync_tag(ctx, destination, tag_name).await;
    sync_sites(ctx, destination, source, &mut infra).await;
    sync_cluster_type(ctx, destination, &mut infra).await;
    sync_clusters(ctx, destination, source, &mut infra).await;
    sync_prefixes(ctx, destination, source, &infra).await;
    sync_platforms(ctx, destination, source, &mut infra).await;

    info!(
        sites = infra.sites.len(),
        clusters = infra.clusters.len(),
        platforms = infra.platforms.len(),
        "Infrastructure synced"
    );
    infra
}
