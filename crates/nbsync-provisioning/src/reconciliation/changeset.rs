//! Field-level change detection.
//!
//! [`diff`] compares a desired record against the current one and produces
//! the smallest payload that brings the destination in line. Free text is
//! compared after normalization, numbers by value, references by ID.

use std::collections::BTreeMap;

use nbsync_connector::fields::{FieldSet, FieldValue};
use nbsync_connector::ids::Ref;
use nbsync_connector::record::DestinationRecord;

use super::context::{Binding, PendingRegistry, SyncContext};
use super::normalize::text_eq;

/// Desired fields of a record, with references that may still be pending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagedFields {
    values: FieldSet,
    references: BTreeMap<String, Ref>,
}

impl StagedFields {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a plain value.
    #[must_use]
    pub fn value(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.values.set(name, value);
        self
    }

    /// Set a reference to another record.
    #[must_use]
    pub fn reference(mut self, name: &str, reference: Ref) -> Self {
        self.references.insert(name.to_string(), reference);
        self
    }

    /// Set a reference when one is known.
    #[must_use]
    pub fn maybe_reference(self, name: &str, reference: Option<Ref>) -> Self {
        match reference {
            Some(reference) => self.reference(name, reference),
            None => self,
        }
    }

    /// Plain values.
    #[must_use]
    pub fn values(&self) -> &FieldSet {
        &self.values
    }

    /// References by field name.
    #[must_use]
    pub fn references(&self) -> &BTreeMap<String, Ref> {
        &self.references
    }

    /// Payload for reporting, with placeholders shown by label.
    #[must_use]
    pub fn preview(&self) -> FieldSet {
        let mut fields = self.values.clone();
        for (name, reference) in &self.references {
            match reference {
                Ref::Resolved(id) => fields.set(name.clone(), *id),
                Ref::Pending(tag) => fields.set(name.clone(), tag.to_string()),
            }
        }
        fields
    }

    /// Build the payload to write now.
    ///
    /// Returns the payload and the names of reference fields whose
    /// placeholder is still unbound; those fields are left out.
    #[must_use]
    pub fn materialize(&self, ctx: &SyncContext) -> (FieldSet, Vec<String>) {
        let mut fields = self.values.clone();
        let mut unresolved = Vec::new();
        for (name, reference) in &self.references {
            if !ctx.bind_into(&mut fields, name, *reference) {
                unresolved.push(name.clone());
            }
        }
        (fields, unresolved)
    }
}

/// What has to happen to one record.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeSet {
    /// The record does not exist yet.
    Create(StagedFields),
    /// The record exists; these fields differ.
    Update(FieldSet),
    /// The record is up to date.
    Noop,
}

impl ChangeSet {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self, ChangeSet::Noop)
    }
}

fn value_matches(current: Option<&FieldValue>, desired: &FieldValue) -> bool {
    match desired {
        FieldValue::String(text) => text_eq(current.and_then(FieldValue::as_str), Some(text.as_str())),
        FieldValue::Integer(_) | FieldValue::Float(_) => {
            current.and_then(FieldValue::as_f64) == desired.as_f64()
        }
        FieldValue::Null => current.map_or(true, FieldValue::is_null),
        other => current == Some(other),
    }
}

/// Compare desired fields against the current record.
///
/// A reference is compared only when the desired side is bound to a real
/// record; placeholders are left for a later pass.
#[must_use]
pub fn diff(
    desired: &StagedFields,
    current: Option<&DestinationRecord>,
    registry: &PendingRegistry,
) -> ChangeSet {
    let Some(current) = current else {
        return ChangeSet::Create(desired.clone());
    };

    let mut update = FieldSet::new();
    for (name, value) in desired.values.iter() {
        if !value_matches(current.fields.get(name), value) {
            update.set(name.clone(), value.clone());
        }
    }
    for (name, reference) in &desired.references {
        let Binding::Real(id) = registry.bind(*reference) else {
            continue;
        };
        if current.reference(name) != Some(id) {
            update.set(name.clone(), id);
        }
    }

    if update.is_empty() {
        ChangeSet::Noop
    } else {
        ChangeSet::Update(update)
    }
}
