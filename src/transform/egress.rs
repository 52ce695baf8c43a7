//! Egress: record instance -> representation.

use crate::schema::{FieldDescriptor, FieldKind, Relation, Schema};
use crate::value::{Payload, Record, Related};
use serde_json::Value;

/// Render every non-write-only field. Related data must already be prefetched onto `record`.
pub fn to_representation(schema: &Schema, record: &Record) -> Payload {
    let mut out = Payload::new();
    for field in schema.fields().iter().filter(|f| !f.write_only) {
        out.insert(field.name.clone(), render_field(schema, field, record));
    }
    out
}

pub fn to_representation_many(schema: &Schema, records: &[Record]) -> Vec<Value> {
    records
        .iter()
        .map(|r| Value::Object(to_representation(schema, r)))
        .collect()
}

fn render_field(schema: &Schema, field: &FieldDescriptor, record: &Record) -> Value {
    match &field.kind {
        FieldKind::Computed => schema
            .hooks()
            .getter(&field.name)
            .map(|getter| getter(record))
            .unwrap_or(Value::Null),
        FieldKind::Scalar(_) => record
            .resolve_value(&field.source)
            .map(|v| v.to_json())
            .unwrap_or(Value::Null),
        FieldKind::Related { many, relation, .. } => match (relation, record.resolve_related(&field.source)) {
            (Relation::Forward, None) => record
                .resolve_value(&field.source)
                .map(|v| v.to_json())
                .unwrap_or(if *many { Value::Array(Vec::new()) } else { Value::Null }),
            (_, Some(Related::One(Some(r)))) => r.key().to_json(),
            (_, Some(Related::One(None))) => Value::Null,
            (_, Some(Related::Many(rs))) => Value::Array(rs.iter().map(|r| r.key().to_json()).collect()),
            (Relation::Reverse { .. }, None) => empty(*many),
        },
        FieldKind::Nested { schema: nested, many, .. } => match record.resolve_related(&field.source) {
            Some(Related::One(Some(r))) => Value::Object(to_representation(nested, r)),
            Some(Related::Many(rs)) => Value::Array(to_representation_many(nested, rs)),
            Some(Related::One(None)) => Value::Null,
            None => empty(*many),
        },
    }
}

fn empty(many: bool) -> Value {
    if many {
        Value::Array(Vec::new())
    } else {
        Value::Null
    }
}
