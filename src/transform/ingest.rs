//! Ingest: raw payload -> partial internal map plus per-field errors.

use crate::schema::{FieldDescriptor, FieldKind, Schema};
use crate::transform::coerce::{coerce_key, coerce_scalar, NOT_NULL, REQUIRED};
use crate::validation::{validate, ErrorMap, ValidatedRecord};
use crate::value::{FieldValue, InternalMap, Payload};
use serde_json::Value;

/// `Partial` skips absent fields instead of reporting or defaulting them (PATCH).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IngestMode {
    #[default]
    Full,
    Partial,
}

/// Coerced values keyed by external field name, with the errors collected on the way.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Ingested {
    pub mode: IngestMode,
    pub values: InternalMap,
    pub errors: ErrorMap,
    /// Fields filled from their declared default; validation leaves them alone.
    pub defaulted: Vec<String>,
}

impl Ingested {
    pub fn is_defaulted(&self, field: &str) -> bool {
        self.defaulted.iter().any(|f| f == field)
    }
}

pub fn to_internal(schema: &Schema, raw: &Payload, mode: IngestMode) -> Ingested {
    let mut out = Ingested {
        mode,
        ..Ingested::default()
    };
    for field in schema.fields().iter().filter(|f| f.is_writable()) {
        match raw.get(&field.name) {
            None => {
                if mode == IngestMode::Partial {
                    continue;
                }
                if field.required {
                    out.errors.add(&field.name, REQUIRED);
                } else if let Some(default) = &field.default {
                    out.values.insert(field.name.clone(), default.clone());
                    out.defaulted.push(field.name.clone());
                }
            }
            Some(Value::Null) => {
                if field.nullable {
                    out.values.insert(field.name.clone(), FieldValue::Null);
                } else {
                    out.errors.add(&field.name, NOT_NULL);
                }
            }
            Some(raw_value) => match ingest_field(field, raw_value, mode) {
                Ok(value) => {
                    out.values.insert(field.name.clone(), value);
                }
                Err(FieldErrors::Messages(messages)) => {
                    for message in messages {
                        out.errors.add(&field.name, message);
                    }
                }
                Err(FieldErrors::Nested(nested)) => out.errors.merge(nested),
            },
        }
    }
    out
}

enum FieldErrors {
    Messages(Vec<String>),
    /// Already prefixed with the field name.
    Nested(ErrorMap),
}

impl From<String> for FieldErrors {
    fn from(message: String) -> Self {
        FieldErrors::Messages(vec![message])
    }
}

fn ingest_field(field: &FieldDescriptor, raw: &Value, mode: IngestMode) -> Result<FieldValue, FieldErrors> {
    match &field.kind {
        FieldKind::Scalar(ty) => Ok(coerce_scalar(*ty, raw, &field.constraints)?),
        FieldKind::Related { many: false, .. } => Ok(coerce_key(raw)?),
        FieldKind::Related { many: true, .. } => {
            let items = raw
                .as_array()
                .ok_or_else(|| format!("expected a list of keys, got {}", describe(raw)))?;
            if items.is_empty() && field.required && !field.constraints.allow_blank {
                return Err("this list may not be empty".to_string().into());
            }
            let mut keys = Vec::with_capacity(items.len());
            let mut messages = Vec::new();
            for item in items {
                match coerce_key(item) {
                    Ok(key) => keys.push(key),
                    Err(message) => messages.push(message),
                }
            }
            if messages.is_empty() {
                Ok(FieldValue::List(keys))
            } else {
                Err(FieldErrors::Messages(messages))
            }
        }
        FieldKind::Nested { schema, many: false, .. } => {
            let object = raw
                .as_object()
                .ok_or_else(|| format!("expected an object, got {}", describe(raw)))?;
            let (values, errors) = ingest_nested(schema, object, mode);
            if errors.is_empty() {
                Ok(FieldValue::Map(values))
            } else {
                let mut prefixed = ErrorMap::new();
                prefixed.merge_prefixed(&field.name, errors);
                Err(FieldErrors::Nested(prefixed))
            }
        }
        FieldKind::Nested { schema, many: true, .. } => {
            let items = raw
                .as_array()
                .ok_or_else(|| format!("expected a list of objects, got {}", describe(raw)))?;
            let mut values = Vec::with_capacity(items.len());
            let mut prefixed = ErrorMap::new();
            for (i, item) in items.iter().enumerate() {
                let key = format!("{}[{}]", field.name, i);
                let Some(object) = item.as_object() else {
                    prefixed.add(key, format!("expected an object, got {}", describe(item)));
                    continue;
                };
                let (nested, errors) = ingest_nested(schema, object, mode);
                if errors.is_empty() {
                    values.push(FieldValue::Map(nested));
                } else {
                    prefixed.merge_prefixed(&key, errors);
                }
            }
            if prefixed.is_empty() {
                Ok(FieldValue::List(values))
            } else {
                Err(FieldErrors::Nested(prefixed))
            }
        }
        FieldKind::Computed => Err(format!("field '{}' is computed", field.name).into()),
    }
}

/// Nested objects go through the nested schema's whole pipeline, hooks included, and keep
/// their primary key (when sent) so writes can link by identity.
fn ingest_nested(schema: &Schema, raw: &Payload, mode: IngestMode) -> (InternalMap, ErrorMap) {
    let outcome = validate(schema, to_internal(schema, raw, mode), None);
    let mut errors = outcome.errors;
    let mut values = outcome.record.map(ValidatedRecord::into_values).unwrap_or_default();
    let pk = schema.primary_key();
    if let Some(raw_key) = raw.get(pk).filter(|v| !v.is_null()) {
        match coerce_key(raw_key) {
            Ok(key) => {
                values.insert(pk.to_string(), key);
            }
            Err(message) => errors.add(pk, message),
        }
    }
    (values, errors)
}

fn describe(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{resolve, Declaration, FieldDescriptor, RecordViolation};
    use crate::config::RecordTypeConfig;
    use crate::schema::{StorageField, StorageKind};
    use serde_json::json;
    use std::sync::Arc;

    fn person() -> Schema {
        let rt = RecordTypeConfig::new("person")
            .field(StorageField::new("id", StorageKind::Integer).with_default())
            .field(StorageField::new("name", StorageKind::String).max_length(5))
            .field(StorageField::new("age", StorageKind::Integer).nullable())
            .field(StorageField::new("active", StorageKind::Boolean).with_default());
        let decl = Declaration::new("people")
            .field(FieldDescriptor::integer("age").optional().nullable().range(0.0, 120.0))
            .field(FieldDescriptor::boolean("active").default(FieldValue::Bool(true)));
        resolve(&rt, &decl).unwrap()
    }

    fn payload(v: serde_json::Value) -> Payload {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn too_long_name_is_reported() {
        let out = to_internal(&person(), &payload(json!({"name": "toolong"})), IngestMode::Full);
        assert_eq!(out.errors.get("name"), Some(&["exceeds max length 5".to_string()][..]));
        assert!(!out.values.contains_key("name"));
    }

    #[test]
    fn absent_optional_uses_default_and_skips_otherwise() {
        let out = to_internal(&person(), &payload(json!({"name": "ok", "id": 44})), IngestMode::Full);
        assert!(out.errors.is_empty());
        assert_eq!(out.values.get("active"), Some(&FieldValue::Bool(true)));
        assert!(out.is_defaulted("active"));
        assert!(!out.values.contains_key("age"));
        assert!(!out.values.contains_key("id"), "read-only keys are ignored");
    }

    #[test]
    fn every_field_is_attempted() {
        let out = to_internal(&person(), &payload(json!({"age": 150, "active": "maybe"})), IngestMode::Full);
        let fields: Vec<_> = out.errors.fields().collect();
        assert_eq!(fields, ["name", "age", "active"]);
        assert_eq!(out.errors.get("name").unwrap()[0], REQUIRED);
    }

    #[test]
    fn partial_mode_skips_absent_fields() {
        let out = to_internal(&person(), &payload(json!({"age": null})), IngestMode::Partial);
        assert!(out.errors.is_empty());
        assert_eq!(out.values.get("age"), Some(&FieldValue::Null));
        assert!(!out.values.contains_key("active"));
    }

    #[test]
    fn nested_errors_are_flattened_with_index() {
        let tag_rt = RecordTypeConfig::new("tag")
            .field(StorageField::new("id", StorageKind::Integer).with_default())
            .field(StorageField::new("label", StorageKind::String).max_length(3));
        let tag = Arc::new(resolve(&tag_rt, &Declaration::new("tags")).unwrap());
        let decl = Declaration::new("tagged").field(FieldDescriptor::nested_many("tags", tag).optional());
        let rt = RecordTypeConfig::new("post").field(StorageField::new("id", StorageKind::Integer).with_default());
        let schema = resolve(&rt, &decl).unwrap();
        let out = to_internal(
            &schema,
            &payload(json!({"tags": [{"id": 3, "label": "ok"}, {"label": "long"}]})),
            IngestMode::Full,
        );
        assert_eq!(out.errors.get("tags[1].label").unwrap()[0], "exceeds max length 3");

        let out = to_internal(&schema, &payload(json!({"tags": [{"id": 3, "label": "ok"}]})), IngestMode::Full);
        let tags = out.values.get("tags").unwrap().as_list().unwrap();
        assert_eq!(tags[0].as_map().unwrap().get("id"), Some(&FieldValue::Int(3)));
    }

    #[test]
    fn nested_schema_hooks_run() {
        let tag_rt = RecordTypeConfig::new("tag")
            .field(StorageField::new("id", StorageKind::Integer).with_default())
            .field(StorageField::new("label", StorageKind::String).max_length(10));
        let tag_decl = Declaration::new("tags")
            .field_hook("label", |v| {
                if v.as_str().is_some_and(|s| s.chars().any(char::is_uppercase)) {
                    Err("labels are lowercase".into())
                } else {
                    Ok(v)
                }
            })
            .record_hook(|map, _| {
                if map.get("label").and_then(|v| v.as_str()) == Some("todo") {
                    return Err(vec![RecordViolation::record("todo is not a tag")]);
                }
                Ok(map)
            });
        let tag = Arc::new(resolve(&tag_rt, &tag_decl).unwrap());
        let rt = RecordTypeConfig::new("post").field(StorageField::new("id", StorageKind::Integer).with_default());
        let schema = resolve(&rt, &Declaration::new("tagged").field(FieldDescriptor::nested_many("tags", tag))).unwrap();

        let out = to_internal(
            &schema,
            &payload(json!({"tags": [{"label": "Rust"}, {"label": "todo"}, {"label": "ok"}]})),
            IngestMode::Full,
        );
        assert_eq!(out.errors.get("tags[0].label").unwrap(), ["labels are lowercase"]);
        assert_eq!(out.errors.get("tags[1]").unwrap(), ["todo is not a tag"]);
        assert_eq!(out.errors.len(), 2);
    }
}
