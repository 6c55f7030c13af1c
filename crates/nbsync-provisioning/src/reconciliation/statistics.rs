//! Run statistics tracking.
//!
//! Counts outcomes per record kind while a run executes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use nbsync_connector::types::ObjectKind;

/// Outcome of handling one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Created,
    Updated,
    Migrated,
    Deleted,
    Unchanged,
    Skipped,
    Failed,
}

/// Outcome counts for one record kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    #[serde(default)]
    pub created: u32,
    #[serde(default)]
    pub updated: u32,
    #[serde(default)]
    pub migrated: u32,
    #[serde(default)]
    pub deleted: u32,
    #[serde(default)]
    pub unchanged: u32,
    #[serde(default)]
    pub skipped: u32,
    #[serde(default)]
    pub failed: u32,
}

impl KindCounts {
    fn bump(&mut self, outcome: Outcome) {
        let slot = match outcome {
            Outcome::Created => &mut self.created,
            Outcome::Updated => &mut self.updated,
            Outcome::Migrated => &mut self.migrated,
            Outcome::Deleted => &mut self.deleted,
            Outcome::Unchanged => &mut self.unchanged,
            Outcome::Skipped => &mut self.skipped,
            Outcome::Failed => &mut self.failed,
        };
        *slot += 1;
    }

    /// Number of writes that reached the destination.
    #[must_use]
    pub fn changes(&self) -> u32 {
        self.created + self.updated + self.migrated + self.deleted
    }
}

/// Statistics for a sync run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStatistics {
    /// Counts keyed by record kind.
    #[serde(default)]
    pub by_kind: BTreeMap<ObjectKind, KindCounts>,
    /// Total duration in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
}

impl RunStatistics {
    /// Create new empty statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts for a kind (zero when never touched).
    #[must_use]
    pub fn kind(&self, kind: ObjectKind) -> KindCounts {
        self.by_kind.get(&kind).copied().unwrap_or_default()
    }

    /// Sum of counts across all kinds.
    #[must_use]
    pub fn totals(&self) -> KindCounts {
        self.by_kind.values().fold(KindCounts::default(), |mut acc, c| {
            acc.created += c.created;
            acc.updated += c.updated;
            acc.migrated += c.migrated;
            acc.deleted += c.deleted;
            acc.unchanged += c.unchanged;
            acc.skipped += c.skipped;
            acc.failed += c.failed;
            acc
        })
    }

    /// Merge with another statistics instance.
    pub fn merge(&mut self, other: &RunStatistics) {
        for (kind, counts) in &other.by_kind {
            let entry = self.by_kind.entry(*kind).or_default();
            entry.created += counts.created;
            entry.updated += counts.updated;
            entry.migrated += counts.migrated;
            entry.deleted += counts.deleted;
            entry.unchanged += counts.unchanged;
            entry.skipped += counts.skipped;
            entry.failed += counts.failed;
        }
        self.duration_ms += other.duration_ms;
    }
}

/// Accumulates statistics during a run.
#[derive(Debug)]
pub struct StatisticsTracker {
    counts: BTreeMap<ObjectKind, KindCounts>,
    start_time: Instant,
}

impl StatisticsTracker {
    /// Create a new tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: BTreeMap::new(),
            start_time: Instant::now(),
        }
    }

    /// Record an outcome for a kind.
    pub fn record(&mut self, kind: ObjectKind, outcome: Outcome) {
        self.counts.entry(kind).or_default().bump(outcome);
    }

    /// Current counts for a kind.
    #[must_use]
    pub fn kind(&self, kind: ObjectKind) -> KindCounts {
        self.counts.get(&kind).copied().unwrap_or_default()
    }

    /// Produce final statistics.
    #[must_use]
    pub fn finish(&self) -> RunStatistics {
        RunStatistics {
            by_kind: self.counts.clone(),
            duration_ms: self.start_time.elapsed().as_millis() as u64,
        }
    }
}

impl Default for StatisticsTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_counts_per_kind() {
        let mut tracker = StatisticsTracker::new();
        tracker.record(ObjectKind::Cluster, Outcome::Migrated);
        tracker.record(ObjectKind::Cluster, Outcome::Unchanged);
        tracker.record(ObjectKind::VirtualMachine, Outcome::Created);
        tracker.record(ObjectKind::VirtualMachine, Outcome::Failed);

        let stats = tracker.finish();
        assert_eq!(stats.kind(ObjectKind::Cluster).migrated, 1);
        assert_eq!(stats.kind(ObjectKind::Cluster).unchanged, 1);
        assert_eq!(stats.kind(ObjectKind::VirtualMachine).created, 1);
        assert_eq!(stats.kind(ObjectKind::Site), KindCounts::default());

        let totals = stats.totals();
        assert_eq!(totals.changes(), 2);
        assert_eq!(totals.failed, 1);
    }

    #[test]
    fn test_merge() {
        let mut a = RunStatistics::new();
        a.by_kind.insert(
            ObjectKind::Site,
            KindCounts {
                created: 1,
                ..Default::default()
            },
        );
        let mut b = RunStatistics::new();
        b.by_kind.insert(
            ObjectKind::Site,
            KindCounts {
                created: 2,
                deleted: 1,
                ..Default::default()
            },
        );
        a.merge(&b);
        assert_eq!(a.kind(ObjectKind::Site).created, 3);
        assert_eq!(a.kind(ObjectKind::Site).deleted, 1);
    }

    #[test]
    fn test_serializes_kinds_as_keys() {
        let mut tracker = StatisticsTracker::new();
        tracker.record(ObjectKind::IpAddress, Outcome::Created);
        let json = serde_json::to_value(tracker.finish()).unwrap();
        assert_eq!(json["by_kind"]["ip-address"]["created"], 1);
    }
}
