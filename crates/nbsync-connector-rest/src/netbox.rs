//! NetBox destination client
//!
//! Implements [`DestinationRepository`] over the NetBox REST API. Records
//! are flattened on read: nested references become their IDs, choice
//! objects become their values and tag objects become tag IDs.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use nbsync_connector::error::{ConnectorError, ConnectorResult};
use nbsync_connector::fields::{FieldSet, FieldValue};
use nbsync_connector::ids::RecordId;
use nbsync_connector::record::DestinationRecord;
use nbsync_connector::traits::DestinationRepository;
use nbsync_connector::types::ObjectKind;

use crate::config::NetBoxConfig;
use crate::transport::Transport;

/// Read-only or presentation fields dropped when flattening a record.
const SKIPPED_FIELDS: &[&str] = &[
    "id",
    "url",
    "display",
    "display_url",
    "created",
    "last_updated",
    "custom_fields",
    "config_context",
    "local_context_data",
];

/// NetBox REST client.
pub struct NetBoxClient {
    config: NetBoxConfig,
    display_name: String,
    transport: Transport,
}

impl std::fmt::Debug for NetBoxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetBoxClient")
            .field("config", &self.config)
            .field("display_name", &self.display_name)
            .finish()
    }
}

impl NetBoxClient {
    /// Create a client for the configured NetBox instance.
    pub fn new(config: NetBoxConfig) -> ConnectorResult<Self> {
        config.validate()?;

        let transport = Transport::new(
            format!("Token {}", config.token),
            config.timeout_secs,
            config.retry.clone(),
        )?;
        let display_name = format!("NetBox: {}", config.base_url);

        Ok(Self {
            config,
            display_name,
            transport,
        })
    }

    /// Fetch every page of a listing, following `next` links.
    async fn fetch_all(
        &self,
        kind: ObjectKind,
        filters: Vec<(String, String)>,
    ) -> ConnectorResult<Vec<DestinationRecord>> {
        let mut query = filters;
        query.push(("limit".to_string(), self.config.page_size.to_string()));
        let mut url = self.config.collection_url(kind);
        let mut records = Vec::new();

        loop {
            let page = self.transport.get(&url, &query, None).await?;
            let results = page
                .get("results")
                .and_then(Value::as_array)
                .ok_or_else(|| ConnectorError::Serialization {
                    message: format!("{kind} listing has no results array"),
                })?;
            for item in results {
                records.push(record_from_json(kind, item)?);
            }

            match page.get("next").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => {
                    // `next` already carries the filters and offset
                    url = next.to_string();
                    query.clear();
                }
                _ => break,
            }
        }

        debug!(kind = %kind, count = records.len(), "Listed NetBox records");
        Ok(records)
    }

    /// Fetch a single record.
    pub async fn get(&self, kind: ObjectKind, id: RecordId) -> ConnectorResult<DestinationRecord> {
        let identifier = id.to_string();
        let body = self
            .transport
            .get(
                &self.config.record_url(kind, id),
                &[],
                Some((kind, identifier.as_str())),
            )
            .await?;
        record_from_json(kind, &body)
    }
}

/// Flatten a NetBox JSON object into a record.
pub fn record_from_json(kind: ObjectKind, value: &Value) -> ConnectorResult<DestinationRecord> {
    let object = value.as_object().ok_or_else(|| ConnectorError::Serialization {
        message: format!("{kind} record is not an object"),
    })?;
    let id = object
        .get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| ConnectorError::Serialization {
            message: format!("{kind} record has no numeric id"),
        })?;

    let fields = object
        .iter()
        .filter(|(name, _)| !SKIPPED_FIELDS.contains(&name.as_str()))
        .filter_map(|(name, value)| flatten(value).map(|v| (name.clone(), v)))
        .collect::<FieldSet>();

    Ok(DestinationRecord::new(kind, RecordId::new(id), fields))
}

fn flatten_object(object: &Map<String, Value>) -> Option<FieldValue> {
    if let Some(choice) = object.get("value") {
        return flatten(choice);
    }
    object
        .get("id")
        .and_then(Value::as_i64)
        .map(FieldValue::Integer)
}

fn flatten(value: &Value) -> Option<FieldValue> {
    match value {
        Value::Null => Some(FieldValue::Null),
        Value::Bool(b) => Some(FieldValue::Boolean(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(FieldValue::Integer)
            .or_else(|| n.as_f64().map(FieldValue::Float)),
        Value::String(s) => Some(FieldValue::String(s.clone())),
        Value::Array(items) => Some(FieldValue::List(items.iter().filter_map(flatten).collect())),
        Value::Object(object) => flatten_object(object),
    }
}

fn to_body(fields: &FieldSet) -> ConnectorResult<Value> {
    serde_json::to_value(fields).map_err(|e| ConnectorError::Serialization {
        message: format!("Failed to encode fields: {e}"),
    })
}

#[async_trait]
impl DestinationRepository for NetBoxClient {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    #[instrument(skip(self))]
    async fn list(&self, kind: ObjectKind) -> ConnectorResult<Vec<DestinationRecord>> {
        self.fetch_all(kind, Vec::new()).await
    }

    #[instrument(skip(self))]
    async fn filter(
        &self,
        kind: ObjectKind,
        field: &str,
        value: &str,
    ) -> ConnectorResult<Vec<DestinationRecord>> {
        self.fetch_all(kind, vec![(field.to_string(), value.to_string())])
            .await
    }

    #[instrument(skip(self, fields))]
    async fn create(&self, kind: ObjectKind, fields: FieldSet) -> ConnectorResult<RecordId> {
        let name = fields.get_str(kind.name_field()).unwrap_or_default().to_string();
        let body = to_body(&fields)?;

        let response = self
            .transport
            .json(
                Method::POST,
                &self.config.collection_url(kind),
                &[],
                Some(&body),
                Some((kind, name.as_str())),
            )
            .await?;

        let id = response
            .get("id")
            .and_then(Value::as_u64)
            .map(RecordId::new)
            .ok_or_else(|| ConnectorError::InvalidData {
                message: format!("{kind} create response did not contain an id"),
            })?;

        info!(kind = %kind, name = %name, id = %id, "NetBox record created");
        Ok(id)
    }

    #[instrument(skip(self, fields))]
    async fn update(
        &self,
        kind: ObjectKind,
        id: RecordId,
        fields: FieldSet,
    ) -> ConnectorResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let identifier = id.to_string();
        let body = to_body(&fields)?;

        self.transport
            .json(
                Method::PATCH,
                &self.config.record_url(kind, id),
                &[],
                Some(&body),
                Some((kind, identifier.as_str())),
            )
            .await?;

        debug!(kind = %kind, id = %id, fields = ?fields.names().collect::<Vec<_>>(), "NetBox record updated");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, kind: ObjectKind, id: RecordId) -> ConnectorResult<()> {
        let identifier = id.to_string();
        self.transport
            .json(
                Method::DELETE,
                &self.config.record_url(kind, id),
                &[],
                None,
                Some((kind, identifier.as_str())),
            )
            .await?;

        info!(kind = %kind, id = %id, "NetBox record deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn tag(&self, kind: ObjectKind, id: RecordId, tag: RecordId) -> ConnectorResult<()> {
        let record = self.get(kind, id).await?;
        let mut tags = record.tags();
        if tags.contains(&tag) {
            return Ok(());
        }
        tags.push(tag);
        self.update(kind, id, FieldSet::new().with("tags", tags)).await
    }
}
