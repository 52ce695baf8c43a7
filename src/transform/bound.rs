//! A schema bound to one request's instance and payload.

use crate::schema::Schema;
use crate::transform::{to_internal, to_representation, IngestMode};
use crate::validation::{validate, Validation};
use crate::value::{Payload, Record};
use std::sync::Arc;

/// Update intent iff `instance` is set. Built per request, never reused.
#[derive(Clone, Debug)]
pub struct BoundInstance {
    schema: Arc<Schema>,
    instance: Option<Record>,
    payload: Option<Payload>,
    partial: bool,
}

impl BoundInstance {
    pub fn for_read(schema: Arc<Schema>, instance: Record) -> Self {
        BoundInstance {
            schema,
            instance: Some(instance),
            payload: None,
            partial: false,
        }
    }

    pub fn for_create(schema: Arc<Schema>, payload: Payload) -> Self {
        BoundInstance {
            schema,
            instance: None,
            payload: Some(payload),
            partial: false,
        }
    }

    pub fn for_update(schema: Arc<Schema>, instance: Record, payload: Payload, partial: bool) -> Self {
        BoundInstance {
            schema,
            instance: Some(instance),
            payload: Some(payload),
            partial,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn instance(&self) -> Option<&Record> {
        self.instance.as_ref()
    }

    pub fn into_instance(self) -> Option<Record> {
        self.instance
    }

    pub fn is_create(&self) -> bool {
        self.instance.is_none()
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }

    /// Ingest then validate the bound payload. Without a payload every required field is missing.
    pub fn validate(&self) -> Validation {
        let empty = Payload::new();
        let raw = self.payload.as_ref().unwrap_or(&empty);
        let mode = if self.partial { IngestMode::Partial } else { IngestMode::Full };
        let ingested = to_internal(&self.schema, raw, mode);
        validate(&self.schema, ingested, self.instance.as_ref())
    }

    /// Representation of the bound instance, if any.
    pub fn representation(&self) -> Option<Payload> {
        self.instance.as_ref().map(|r| to_representation(&self.schema, r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordTypeConfig;
    use crate::schema::{resolve, Declaration, StorageField, StorageKind};
    use crate::value::{FieldValue, InternalMap};
    use serde_json::json;

    fn schema() -> Arc<Schema> {
        let rt = RecordTypeConfig::new("person")
            .field(StorageField::new("id", StorageKind::Integer).with_default())
            .field(StorageField::new("name", StorageKind::String).max_length(5))
            .field(StorageField::new("age", StorageKind::Integer).nullable());
        Arc::new(resolve(&rt, &Declaration::new("people")).unwrap())
    }

    fn existing() -> Record {
        let mut f = InternalMap::new();
        f.insert("id".into(), FieldValue::Int(3));
        f.insert("name".into(), "old".into());
        f.insert("age".into(), FieldValue::Int(40));
        Record::new("person", "id", f)
    }

    fn body(v: serde_json::Value) -> Payload {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn intent_follows_instance() {
        assert!(BoundInstance::for_create(schema(), body(json!({}))).is_create());
        assert!(!BoundInstance::for_update(schema(), existing(), body(json!({})), true).is_create());
    }

    #[test]
    fn partial_update_validates_only_sent_fields() {
        let bound = BoundInstance::for_update(schema(), existing(), body(json!({"age": 41})), true);
        let record = bound.validate().into_result().unwrap();
        assert_eq!(record.values().len(), 1);
        let full = BoundInstance::for_update(schema(), existing(), body(json!({"age": 41})), false);
        assert!(full.validate().errors.contains("name"));
    }

    #[test]
    fn read_binding_renders() {
        let bound = BoundInstance::for_read(schema(), existing());
        assert_eq!(
            serde_json::Value::Object(bound.representation().unwrap()),
            json!({"id": 3, "name": "old", "age": 40})
        );
    }
}
