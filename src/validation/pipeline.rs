//! Three-stage validation over an ingested map: structural re-checks, field hooks,
//! then the whole-record hook. Expected failures land in the error map, never in `Err`.

use crate::schema::{FieldDescriptor, FieldKind, Schema};
use crate::transform::coerce::{check_constraints, matches_scalar, NOT_NULL, REQUIRED};
use crate::transform::{IngestMode, Ingested};
use crate::validation::ErrorMap;
use crate::value::{FieldValue, InternalMap, Record};

/// Values that passed every stage. Never partially populated.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidatedRecord(InternalMap);

impl ValidatedRecord {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    pub fn values(&self) -> &InternalMap {
        &self.0
    }

    pub fn into_values(self) -> InternalMap {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Validation {
    pub record: Option<ValidatedRecord>,
    pub errors: ErrorMap,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.record.is_some()
    }

    pub fn into_result(self) -> Result<ValidatedRecord, ErrorMap> {
        match self.record {
            Some(record) => Ok(record),
            None => Err(self.errors),
        }
    }
}

pub fn validate(schema: &Schema, ingested: Ingested, existing: Option<&Record>) -> Validation {
    let Ingested {
        mode,
        mut values,
        mut errors,
        defaulted,
    } = ingested;

    // Stage 1: structural checks on every writable field that has no error yet.
    for field in schema.fields().iter().filter(|f| f.is_writable()) {
        if errors.contains_prefixed(&field.name) || defaulted.contains(&field.name) {
            continue;
        }
        match values.get(&field.name) {
            None => {
                if mode == IngestMode::Full && field.required {
                    errors.add(&field.name, REQUIRED);
                }
            }
            Some(value) => {
                if let Err(message) = structural_check(field, value) {
                    errors.add(&field.name, message);
                    values.shift_remove(&field.name);
                }
            }
        }
    }
    // Values for unknown or read-only names never reach storage.
    values.retain(|name, _| schema.field(name).is_some_and(|f| f.is_writable()));

    // Stage 2: per-field hooks on present, error-free values.
    for field in schema.fields() {
        let Some(hook) = schema.hooks().field_hook(&field.name) else {
            continue;
        };
        if errors.contains_prefixed(&field.name) || defaulted.contains(&field.name) {
            continue;
        }
        let Some(value) = values.shift_remove(&field.name) else {
            continue;
        };
        match hook(value) {
            Ok(value) => {
                values.insert(field.name.clone(), value);
            }
            Err(message) => errors.add(&field.name, message),
        }
    }
    // shift_remove + insert moves hooked fields to the end; restore declaration order.
    values = reorder(schema, values);

    // Stage 3: whole-record hook on the surviving map.
    if let Some(hook) = schema.hooks().record_hook() {
        match hook(values.clone(), existing) {
            Ok(map) => values = map,
            Err(violations) => {
                for violation in violations {
                    match violation.field {
                        Some(field) => errors.add(field, violation.message),
                        None => errors.add_non_field(violation.message),
                    }
                }
            }
        }
    }

    if errors.is_empty() {
        Validation {
            record: Some(ValidatedRecord(values)),
            errors,
        }
    } else {
        Validation { record: None, errors }
    }
}

fn structural_check(field: &FieldDescriptor, value: &FieldValue) -> Result<(), String> {
    if value.is_null() {
        return if field.nullable { Ok(()) } else { Err(NOT_NULL.into()) };
    }
    match &field.kind {
        FieldKind::Scalar(ty) => {
            if !matches_scalar(*ty, value) {
                return Err(format!("expected a {} value", ty.name()));
            }
            check_constraints(value, &field.constraints)
        }
        FieldKind::Related { many: false, .. } => match value {
            FieldValue::Int(_) | FieldValue::Text(_) | FieldValue::Uuid(_) => Ok(()),
            _ => Err("invalid key".into()),
        },
        FieldKind::Related { many: true, .. } => match value {
            FieldValue::List(items) if items.iter().all(|v| matches!(v, FieldValue::Int(_) | FieldValue::Text(_) | FieldValue::Uuid(_))) => Ok(()),
            _ => Err("expected a list of keys".into()),
        },
        FieldKind::Nested { many: false, .. } => match value {
            FieldValue::Map(_) => Ok(()),
            _ => Err("expected an object".into()),
        },
        FieldKind::Nested { many: true, .. } => match value {
            FieldValue::List(items) if items.iter().all(|v| matches!(v, FieldValue::Map(_))) => Ok(()),
            _ => Err("expected a list of objects".into()),
        },
        FieldKind::Computed => Err("computed fields are read-only".into()),
    }
}

fn reorder(schema: &Schema, mut values: InternalMap) -> InternalMap {
    let mut ordered = InternalMap::with_capacity(values.len());
    for field in schema.fields() {
        if let Some(v) = values.shift_remove(&field.name) {
            ordered.insert(field.name.clone(), v);
        }
    }
    ordered.extend(values);
    ordered
}
