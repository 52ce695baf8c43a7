//! Schema resolution: merge explicit declarations with fields derived from a
//! record-type descriptor, then cache the result per (record type, declaration).

use crate::error::SchemaError;
use crate::schema::descriptor::{RecordType, StorageField, StorageKind};
use crate::schema::field::{Constraints, FieldDescriptor, FieldKind, FieldOverride, Relation, ScalarType};
use crate::schema::hooks::{Getter, Hooks, RecordHook, RecordViolation};
use crate::value::{FieldValue, InternalMap, Record};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Which fields a schema exposes. Exactly one mode is active.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum FieldSelection {
    #[default]
    All,
    Only(Vec<String>),
    Exclude(Vec<String>),
}

impl FieldSelection {
    fn includes(&self, name: &str) -> bool {
        match self {
            FieldSelection::All => true,
            FieldSelection::Only(names) => names.iter().any(|n| n == name),
            FieldSelection::Exclude(names) => !names.iter().any(|n| n == name),
        }
    }
}

/// Explicitly authored part of a schema: replacement descriptors, flag overrides,
/// the field selection and the hook registry.
#[derive(Clone, Debug, Default)]
pub struct Declaration {
    name: String,
    fields: Vec<FieldDescriptor>,
    overrides: IndexMap<String, FieldOverride>,
    selection: FieldSelection,
    hooks: Hooks,
}

impl Declaration {
    pub fn new(name: impl Into<String>) -> Self {
        Declaration {
            name: name.into(),
            ..Declaration::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field(mut self, descriptor: FieldDescriptor) -> Self {
        self.fields.push(descriptor);
        self
    }

    pub fn override_field(mut self, name: impl Into<String>, over: FieldOverride) -> Self {
        self.overrides.insert(name.into(), over);
        self
    }

    pub fn read_only_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let entry = self.overrides.entry(name.into()).or_default();
            entry.read_only = Some(true);
        }
        self
    }

    pub fn select(mut self, selection: FieldSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn only<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select(FieldSelection::Only(names.into_iter().map(Into::into).collect()))
    }

    pub fn exclude<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select(FieldSelection::Exclude(names.into_iter().map(Into::into).collect()))
    }

    pub fn field_hook<F>(mut self, name: impl Into<String>, hook: F) -> Self
    where
        F: Fn(FieldValue) -> Result<FieldValue, String> + Send + Sync + 'static,
    {
        self.hooks.fields.insert(name.into(), Arc::new(hook));
        self
    }

    pub fn record_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(InternalMap, Option<&Record>) -> Result<InternalMap, Vec<RecordViolation>> + Send + Sync + 'static,
    {
        let hook: RecordHook = Arc::new(hook);
        self.hooks.record = Some(hook);
        self
    }

    /// Adds a computed field together with its getter.
    pub fn computed<F>(mut self, name: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        let name = name.into();
        let getter: Getter = Arc::new(getter);
        self.hooks.getters.insert(name.clone(), getter);
        self.fields.push(FieldDescriptor::computed(name));
        self
    }

    pub fn selection(&self) -> &FieldSelection {
        &self.selection
    }
}

/// Resolved, ordered set of field descriptors for one record type.
#[derive(Clone, PartialEq)]
pub struct Schema {
    name: String,
    type_name: String,
    primary_key: String,
    fields: Vec<FieldDescriptor>,
    hooks: Hooks,
}

impl Schema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Field whose single-segment source is the given storage field.
    pub fn field_by_source(&self, source: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.source == source)
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("fields", &self.fields.iter().map(|d| d.name.as_str()).collect::<Vec<_>>())
            .finish()
    }
}

/// Map one storage field to a descriptor using the fixed kind lookup table.
pub fn derive_field(field: &StorageField, primary_key: &str) -> Result<FieldDescriptor, SchemaError> {
    let relation_target = || {
        field.target.clone().ok_or_else(|| {
            SchemaError::Resolution(format!("relation field '{}' has no target record type", field.name))
        })
    };
    let kind = match &field.kind {
        StorageKind::String | StorageKind::Text => FieldKind::Scalar(ScalarType::String),
        StorageKind::Integer | StorageKind::BigInt => FieldKind::Scalar(ScalarType::Integer),
        StorageKind::Float => FieldKind::Scalar(ScalarType::Float),
        StorageKind::Boolean => FieldKind::Scalar(ScalarType::Boolean),
        StorageKind::Timestamp => FieldKind::Scalar(ScalarType::DateTime),
        StorageKind::Uuid => FieldKind::Scalar(ScalarType::Uuid),
        StorageKind::ForeignKey => FieldKind::Related {
            target: relation_target()?,
            many: false,
            relation: Relation::Forward,
        },
        StorageKind::ManyToMany => FieldKind::Related {
            target: relation_target()?,
            many: true,
            relation: Relation::Forward,
        },
        StorageKind::Other(kind) => {
            return Err(SchemaError::UnsupportedFieldKind {
                field: field.name.clone(),
                kind: kind.clone(),
            })
        }
    };
    let is_pk = field.name == primary_key;
    let mut descriptor = FieldDescriptor::new(field.name.clone(), kind);
    descriptor.nullable = field.nullable;
    descriptor.read_only = is_pk;
    descriptor.required = !(is_pk || field.nullable || field.blank || field.has_default);
    descriptor.constraints = Constraints {
        max_length: field.max_length,
        allow_blank: field.blank,
        choices: if field.choices.is_empty() {
            None
        } else {
            Some(field.choices.iter().map(|c| FieldValue::Text(c.clone())).collect())
        },
        ..Constraints::default()
    };
    Ok(descriptor)
}

/// Resolve a schema for `record_type`. Pure: the same inputs always yield equal schemas.
pub fn resolve(record_type: &dyn RecordType, declaration: &Declaration) -> Result<Schema, SchemaError> {
    let primary_key = record_type.primary_key();
    let selection = &declaration.selection;

    let mut explicit: IndexMap<&str, &FieldDescriptor> = IndexMap::new();
    for f in &declaration.fields {
        if explicit.insert(f.name.as_str(), f).is_some() {
            return Err(SchemaError::Resolution(format!("field '{}' is declared twice", f.name)));
        }
    }

    let storage_names: HashSet<&str> = record_type.fields().iter().map(|f| f.name.as_str()).collect();
    let selected_names: &[String] = match selection {
        FieldSelection::All => &[],
        FieldSelection::Only(names) | FieldSelection::Exclude(names) => names,
    };
    for name in selected_names {
        if !storage_names.contains(name.as_str()) && !explicit.contains_key(name.as_str()) {
            return Err(SchemaError::Resolution(format!(
                "field '{}' is selected but {} has no such field",
                name,
                record_type.type_name()
            )));
        }
    }

    let mut fields: Vec<FieldDescriptor> = Vec::new();
    for storage_field in record_type.fields() {
        let name = storage_field.name.as_str();
        if let Some(declared) = explicit.get(name) {
            match derive_field(storage_field, primary_key) {
                Ok(derived) if derived.kind.family() != declared.kind.family() && !declared.override_kind => {
                    return Err(SchemaError::Resolution(format!(
                        "field '{}' is declared as {} but {} stores {}; mark the declaration as a kind override",
                        name,
                        declared.kind.describe(),
                        record_type.type_name(),
                        derived.kind.describe()
                    )));
                }
                _ => {}
            }
            if selection.includes(name) {
                fields.push((*declared).clone());
            }
        } else if selection.includes(name) {
            fields.push(derive_field(storage_field, primary_key)?);
        }
    }
    for (name, declared) in &explicit {
        if storage_names.contains(name) {
            continue;
        }
        if !selection.includes(name) {
            return Err(SchemaError::Resolution(format!(
                "field '{}' is declared but not included in the field selection",
                name
            )));
        }
        fields.push((*declared).clone());
    }

    if let FieldSelection::Only(order) = selection {
        let mut by_name: HashMap<String, FieldDescriptor> =
            fields.into_iter().map(|f| (f.name.clone(), f)).collect();
        fields = order.iter().filter_map(|n| by_name.remove(n)).collect();
    }

    for (name, over) in &declaration.overrides {
        let field = fields
            .iter_mut()
            .find(|f| f.name == *name)
            .ok_or_else(|| SchemaError::Resolution(format!("override for unknown field '{}'", name)))?;
        over.apply(field);
    }

    for name in declaration.hooks.fields.keys() {
        if !fields.iter().any(|f| f.name == *name) {
            return Err(SchemaError::Resolution(format!("hook registered for unknown field '{}'", name)));
        }
    }
    for field in &fields {
        if matches!(field.kind, FieldKind::Computed) && declaration.hooks.getter(&field.name).is_none() {
            return Err(SchemaError::Resolution(format!(
                "computed field '{}' has no getter",
                field.name
            )));
        }
    }

    Ok(Schema {
        name: declaration.name.clone(),
        type_name: record_type.type_name().to_string(),
        primary_key: primary_key.to_string(),
        fields,
        hooks: declaration.hooks.clone(),
    })
}

/// Process-lifetime schema cache, keyed by (record type, declaration name).
/// Read-mostly after warm-up.
#[derive(Default)]
pub struct SchemaRegistry {
    cache: RwLock<HashMap<(String, String), Arc<Schema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        SchemaRegistry::default()
    }

    pub fn get(&self, type_name: &str, declaration: &str) -> Option<Arc<Schema>> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        cache.get(&(type_name.to_string(), declaration.to_string())).cloned()
    }

    pub fn get_or_resolve(
        &self,
        record_type: &dyn RecordType,
        declaration: &Declaration,
    ) -> Result<Arc<Schema>, SchemaError> {
        if let Some(schema) = self.get(record_type.type_name(), declaration.name()) {
            return Ok(schema);
        }
        let schema = Arc::new(resolve(record_type, declaration)?);
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        let entry = cache
            .entry((record_type.type_name().to_string(), declaration.name().to_string()))
            .or_insert(schema);
        tracing::debug!(
            record_type = %record_type.type_name(),
            declaration = %declaration.name(),
            fields = entry.fields().len(),
            "schema resolved"
        );
        Ok(entry.clone())
    }

    pub fn len(&self) -> usize {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
