//! In-memory destination for unit tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use nbsync_connector::error::{ConnectorError, ConnectorResult};
use nbsync_connector::fields::FieldSet;
use nbsync_connector::ids::RecordId;
use nbsync_connector::record::DestinationRecord;
use nbsync_connector::traits::DestinationRepository;
use nbsync_connector::types::ObjectKind;

pub(crate) struct MemoryDestination {
    records: Mutex<BTreeMap<(ObjectKind, RecordId), DestinationRecord>>,
    next_id: AtomicU64,
    writes: AtomicUsize,
}

impl MemoryDestination {
    pub(crate) fn with_records(records: Vec<DestinationRecord>) -> Self {
        let next = records.iter().map(|r| r.id.get()).max().unwrap_or(0) + 1;
        Self {
            records: Mutex::new(records.into_iter().map(|r| ((r.kind, r.id), r)).collect()),
            next_id: AtomicU64::new(next),
            writes: AtomicUsize::new(0),
        }
    }

    pub(crate) fn record(&self, kind: ObjectKind, id: RecordId) -> Option<DestinationRecord> {
        self.records.lock().unwrap().get(&(kind, id)).cloned()
    }

    pub(crate) fn all(&self, kind: ObjectKind) -> Vec<DestinationRecord> {
        self.records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    pub(crate) fn mutating_calls(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DestinationRepository for MemoryDestination {
    fn display_name(&self) -> &str {
        "memory"
    }

    async fn list(&self, kind: ObjectKind) -> ConnectorResult<Vec<DestinationRecord>> {
        Ok(self.all(kind))
    }

    async fn filter(
        &self,
        kind: ObjectKind,
        field: &str,
        value: &str,
    ) -> ConnectorResult<Vec<DestinationRecord>> {
        Ok(self
            .all(kind)
            .into_iter()
            .filter(|r| r.fields.get_str(field) == Some(value))
            .collect())
    }

    async fn create(&self, kind: ObjectKind, fields: FieldSet) -> ConnectorResult<RecordId> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let id = RecordId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.records
            .lock()
            .unwrap()
            .insert((kind, id), DestinationRecord::new(kind, id, fields));
        Ok(id)
    }

    async fn update(&self, kind: ObjectKind, id: RecordId, fields: FieldSet) -> ConnectorResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&(kind, id))
            .ok_or_else(|| ConnectorError::not_found(kind, id.to_string()))?;
        record.fields.merge(fields);
        Ok(())
    }

    async fn delete(&self, kind: ObjectKind, id: RecordId) -> ConnectorResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap()
            .remove(&(kind, id))
            .map(|_| ())
            .ok_or_else(|| ConnectorError::not_found(kind, id.to_string()))
    }

    async fn tag(&self, kind: ObjectKind, id: RecordId, tag: RecordId) -> ConnectorResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&(kind, id))
            .ok_or_else(|| ConnectorError::not_found(kind, id.to_string()))?;
        let mut tags = record.tags();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
        record.fields.set("tags", tags);
        Ok(())
    }
}
