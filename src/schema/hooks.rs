//! Typed callbacks registered at schema construction: per-field checks, the
//! whole-record check and computed-field getters.

use crate::value::{FieldValue, InternalMap, Record};
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// May transform or reject a single field's value; sees no other field.
pub type FieldHook = Arc<dyn Fn(FieldValue) -> Result<FieldValue, String> + Send + Sync>;

/// Receives the whole partial map (and the existing instance on update).
pub type RecordHook =
    Arc<dyn Fn(InternalMap, Option<&Record>) -> Result<InternalMap, Vec<RecordViolation>> + Send + Sync>;

/// Produces a computed field's representation from the record.
pub type Getter = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

/// A whole-record violation, optionally addressed to one field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordViolation {
    pub field: Option<String>,
    pub message: String,
}

impl RecordViolation {
    pub fn record(message: impl Into<String>) -> Self {
        RecordViolation { field: None, message: message.into() }
    }

    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        RecordViolation {
            field: Some(field.into()),
            message: message.into(),
        }
    }
}

#[derive(Clone, Default)]
pub struct Hooks {
    pub(crate) fields: IndexMap<String, FieldHook>,
    pub(crate) record: Option<RecordHook>,
    pub(crate) getters: IndexMap<String, Getter>,
}

impl Hooks {
    pub fn field_hook(&self, name: &str) -> Option<&FieldHook> {
        self.fields.get(name)
    }

    pub fn record_hook(&self) -> Option<&RecordHook> {
        self.record.as_ref()
    }

    pub fn getter(&self, name: &str) -> Option<&Getter> {
        self.getters.get(name)
    }

    fn names(&self) -> (Vec<&str>, bool, Vec<&str>) {
        (
            self.fields.keys().map(String::as_str).collect(),
            self.record.is_some(),
            self.getters.keys().map(String::as_str).collect(),
        )
    }
}

impl PartialEq for Hooks {
    fn eq(&self, other: &Self) -> bool {
        self.names() == other.names()
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (fields, record, getters) = self.names();
        f.debug_struct("Hooks")
            .field("fields", &fields)
            .field("record", &record)
            .field("getters", &getters)
            .finish()
    }
}
