//! Raw config types matching `record_types.json` and `resources.json`.

use crate::error::ConfigError;
use crate::schema::{Declaration, FieldOverride, Pattern, RecordType, StorageField};
use crate::value::FieldValue;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

fn default_primary_key() -> String {
    "id".into()
}

/// Declarative record-type descriptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordTypeConfig {
    pub name: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    /// Storage table; defaults to `name`.
    #[serde(default)]
    pub table: Option<String>,
    /// Storage schema (namespace); adapters choose their own default.
    #[serde(default)]
    pub schema: Option<String>,
    pub fields: Vec<StorageField>,
}

impl RecordTypeConfig {
    pub fn new(name: impl Into<String>) -> Self {
        RecordTypeConfig {
            name: name.into(),
            primary_key: default_primary_key(),
            table: None,
            schema: None,
            fields: Vec::new(),
        }
    }

    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = name.into();
        self
    }

    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table = Some(name.into());
        self
    }

    pub fn field(mut self, field: StorageField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }
}

impl RecordType for RecordTypeConfig {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn primary_key(&self) -> &str {
        &self.primary_key
    }

    fn fields(&self) -> &[StorageField] {
        &self.fields
    }

    fn storage_name(&self) -> &str {
        self.table_name()
    }

    fn namespace(&self) -> Option<&str> {
        self.schema.as_deref()
    }
}

/// Per-field refinement declared on a resource.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub nullable: Option<bool>,
    #[serde(default)]
    pub read_only: Option<bool>,
    #[serde(default)]
    pub write_only: Option<bool>,
    #[serde(default)]
    pub allow_blank: Option<bool>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
    /// Dotted source path.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

impl FieldRule {
    pub fn to_override(&self, field: &str) -> Result<FieldOverride, ConfigError> {
        let pattern = match &self.pattern {
            Some(p) => Some(Pattern(Regex::new(p).map_err(|e| {
                ConfigError::Validation(format!("field '{}': invalid pattern: {}", field, e))
            })?)),
            None => None,
        };
        Ok(FieldOverride {
            required: self.required,
            nullable: self.nullable,
            read_only: self.read_only,
            write_only: self.write_only,
            default: self.default.as_ref().map(FieldValue::from_json),
            source: self.source.clone(),
            max_length: self.max_length.map(|n| n as usize),
            min_length: self.min_length.map(|n| n as usize),
            allow_blank: self.allow_blank,
            pattern,
            minimum: self.minimum,
            maximum: self.maximum,
            choices: self
                .allowed
                .as_ref()
                .map(|values| values.iter().map(FieldValue::from_json).collect()),
        })
    }
}

fn default_operations() -> Vec<String> {
    ["list", "create", "retrieve", "update", "partial_update", "destroy"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// One exposed resource: a record type mounted under a path segment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub path_segment: String,
    pub record_type: String,
    /// Standard operation names; `read` and `delete` are accepted as shorthands.
    #[serde(default = "default_operations")]
    pub operations: Vec<String>,
    /// Exposed fields in order; all fields when omitted.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub read_only_fields: Vec<String>,
    /// Accepted on write, never rendered (password hashes, secrets).
    #[serde(default)]
    pub sensitive_fields: Vec<String>,
    #[serde(default)]
    pub validation: IndexMap<String, FieldRule>,
    /// Fields usable as exact-match list filters (`?field=value`).
    #[serde(default)]
    pub filter_fields: Vec<String>,
    /// Field addressed by the detail path segment; the primary key when omitted.
    #[serde(default)]
    pub lookup_field: Option<String>,
}

impl ResourceConfig {
    pub fn new(path_segment: impl Into<String>, record_type: impl Into<String>) -> Self {
        ResourceConfig {
            path_segment: path_segment.into(),
            record_type: record_type.into(),
            operations: default_operations(),
            fields: None,
            exclude: Vec::new(),
            read_only_fields: Vec::new(),
            sensitive_fields: Vec::new(),
            validation: IndexMap::new(),
            filter_fields: Vec::new(),
            lookup_field: None,
        }
    }

    /// Schema declaration described by this resource. Sensitive fields become write-only.
    pub fn declaration(&self) -> Result<Declaration, ConfigError> {
        if self.fields.is_some() && !self.exclude.is_empty() {
            return Err(ConfigError::Validation(format!(
                "resource '{}': set either fields or exclude, not both",
                self.path_segment
            )));
        }
        let mut decl = Declaration::new(self.path_segment.clone());
        decl = match &self.fields {
            Some(names) => decl.only(names.iter().cloned()),
            None if !self.exclude.is_empty() => decl.exclude(self.exclude.iter().cloned()),
            None => decl,
        };
        decl = decl.read_only_fields(self.read_only_fields.iter().cloned());
        let mut overrides: IndexMap<String, FieldOverride> = IndexMap::new();
        for name in &self.sensitive_fields {
            overrides.insert(name.clone(), FieldOverride::write_only());
        }
        for (name, rule) in &self.validation {
            let mut over = rule.to_override(name)?;
            if self.sensitive_fields.contains(name) {
                over.write_only = Some(true);
            }
            overrides.insert(name.clone(), over);
        }
        for name in &self.read_only_fields {
            if let Some(over) = overrides.get_mut(name) {
                over.read_only = Some(true);
            }
        }
        for (name, over) in overrides {
            decl = decl.override_field(name, over);
        }
        Ok(decl)
    }
}

/// All config in one struct for in-memory loading.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FullConfig {
    #[serde(default)]
    pub record_types: Vec<RecordTypeConfig>,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{resolve, StorageKind};
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn resource_config_deserializes_with_defaults() {
        let r: ResourceConfig = serde_json::from_value(json!({
            "path_segment": "snippets",
            "record_type": "snippet",
            "validation": { "title": { "max_length": 5, "allowed": ["a", "b"] } }
        }))
        .unwrap();
        assert_eq!(r.operations.len(), 6);
        let over = r.validation["title"].to_override("title").unwrap();
        assert_eq!(over.max_length, Some(5));
        assert_eq!(over.choices, Some(vec![FieldValue::from("a"), FieldValue::from("b")]));
    }

    #[test]
    fn sensitive_fields_become_write_only() {
        let rt = RecordTypeConfig::new("user")
            .field(StorageField::new("id", StorageKind::Integer).with_default())
            .field(StorageField::new("username", StorageKind::String).unique())
            .field(StorageField::new("password", StorageKind::String));
        let mut r = ResourceConfig::new("users", "user");
        r.sensitive_fields = vec!["password".into()];
        r.read_only_fields = vec!["username".into()];
        let schema = resolve(&rt, &r.declaration().unwrap()).unwrap();
        let password = schema.field("password").unwrap();
        assert!(password.write_only && password.required);
        assert!(schema.field("username").unwrap().read_only);
    }

    #[test]
    fn bad_pattern_is_a_config_error() {
        let rule = FieldRule {
            pattern: Some("([".into()),
            ..FieldRule::default()
        };
        assert_matches!(rule.to_override("code"), Err(ConfigError::Validation(_)));
    }

    #[test]
    fn fields_and_exclude_are_exclusive() {
        let mut r = ResourceConfig::new("snippets", "snippet");
        r.fields = Some(vec!["id".into()]);
        r.exclude = vec!["code".into()];
        assert_matches!(r.declaration(), Err(ConfigError::Validation(_)));
    }
}
