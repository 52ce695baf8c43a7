//! Record-type descriptors: the introspection surface schema derivation depends on.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Storage-level kind of a field. Unknown names are kept so resolution can report them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StorageKind {
    String,
    Text,
    Integer,
    BigInt,
    Float,
    Boolean,
    Timestamp,
    Uuid,
    /// Single relation: stores the target's key.
    ForeignKey,
    /// Multi relation: stores a list of target keys.
    ManyToMany,
    Other(String),
}

impl From<String> for StorageKind {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "string" | "varchar" => StorageKind::String,
            "text" => StorageKind::Text,
            "integer" | "int" => StorageKind::Integer,
            "bigint" => StorageKind::BigInt,
            "float" | "double" => StorageKind::Float,
            "boolean" | "bool" => StorageKind::Boolean,
            "timestamp" | "timestamptz" | "datetime" => StorageKind::Timestamp,
            "uuid" => StorageKind::Uuid,
            "foreign_key" => StorageKind::ForeignKey,
            "many_to_many" => StorageKind::ManyToMany,
            _ => StorageKind::Other(s),
        }
    }
}

impl From<StorageKind> for String {
    fn from(k: StorageKind) -> Self {
        k.name().to_string()
    }
}

impl StorageKind {
    pub fn name(&self) -> &str {
        match self {
            StorageKind::String => "string",
            StorageKind::Text => "text",
            StorageKind::Integer => "integer",
            StorageKind::BigInt => "bigint",
            StorageKind::Float => "float",
            StorageKind::Boolean => "boolean",
            StorageKind::Timestamp => "timestamp",
            StorageKind::Uuid => "uuid",
            StorageKind::ForeignKey => "foreign_key",
            StorageKind::ManyToMany => "many_to_many",
            StorageKind::Other(s) => s,
        }
    }

    pub fn is_relation(&self) -> bool {
        matches!(self, StorageKind::ForeignKey | StorageKind::ManyToMany)
    }
}

/// One storage field as exposed by a record type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageField {
    pub name: String,
    pub kind: StorageKind,
    #[serde(default)]
    pub nullable: bool,
    /// Empty values (blank strings, empty relation lists) are accepted.
    #[serde(default)]
    pub blank: bool,
    #[serde(default)]
    pub max_length: Option<usize>,
    /// Related record type for relation kinds.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub unique: bool,
    /// Storage fills the value when it is omitted (auto keys, `NOW()` timestamps).
    #[serde(default)]
    pub has_default: bool,
    #[serde(default)]
    pub choices: Vec<String>,
}

impl StorageField {
    pub fn new(name: impl Into<String>, kind: StorageKind) -> Self {
        StorageField {
            name: name.into(),
            kind,
            nullable: false,
            blank: false,
            max_length: None,
            target: None,
            unique: false,
            has_default: false,
            choices: Vec::new(),
        }
    }

    pub fn relation(name: impl Into<String>, kind: StorageKind, target: impl Into<String>) -> Self {
        StorageField {
            target: Some(target.into()),
            ..StorageField::new(name, kind)
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn blank(mut self) -> Self {
        self.blank = true;
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.max_length = Some(n);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    pub fn choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }
}

/// Minimal introspection surface of a stored record type.
pub trait RecordType: Send + Sync {
    fn type_name(&self) -> &str;

    fn primary_key(&self) -> &str;

    /// Storage fields in declaration order.
    fn fields(&self) -> &[StorageField];

    fn field(&self, name: &str) -> Option<&StorageField> {
        self.fields().iter().find(|f| f.name == name)
    }

    /// Table (or collection) name used by storage adapters.
    fn storage_name(&self) -> &str {
        self.type_name()
    }

    /// Storage namespace, e.g. a PostgreSQL schema.
    fn namespace(&self) -> Option<&str> {
        None
    }
}

/// Record types by name, shared by controllers (prefetch) and storage adapters (constraints).
#[derive(Clone, Default)]
pub struct RecordTypes {
    by_name: HashMap<String, Arc<dyn RecordType>>,
}

impl RecordTypes {
    pub fn new() -> Self {
        RecordTypes::default()
    }

    pub fn insert(&mut self, record_type: Arc<dyn RecordType>) {
        self.by_name.insert(record_type.type_name().to_string(), record_type);
    }

    pub fn with(mut self, record_type: Arc<dyn RecordType>) -> Self {
        self.insert(record_type);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn RecordType>> {
        self.by_name.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn RecordType>> {
        self.by_name.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_kind_parses_aliases_and_keeps_unknown() {
        let f: StorageField = serde_json::from_value(serde_json::json!({
            "name": "payload",
            "kind": "jsonb"
        }))
        .unwrap();
        assert_eq!(f.kind, StorageKind::Other("jsonb".into()));
        assert_eq!(StorageKind::from("TimestampTZ".to_string()), StorageKind::Timestamp);
        assert_eq!(String::from(StorageKind::ManyToMany), "many_to_many");
    }
}
