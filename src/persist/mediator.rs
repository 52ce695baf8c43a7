//! Persistence mediator: create-vs-update, nested write strategies, one unit of work per save.

use crate::error::AppError;
use crate::schema::{FieldDescriptor, FieldKind, Relation, Schema};
use crate::store::{bounded, Query, Storage, StorageError, UnitOfWork};
use crate::validation::{ErrorMap, ValidatedRecord};
use crate::value::{FieldValue, InternalMap, Record};
use indexmap::IndexMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// How a writable nested (or reverse-related) field is persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NestedWrite {
    /// Drop the submitted value.
    Ignore,
    /// Delete the current children and create the submitted ones.
    ReplaceAll,
    /// Point the relation at the identifiers carried by the submitted objects.
    LinkById,
}

/// Strategy per nested field name.
pub type NestedStrategies = IndexMap<String, NestedWrite>;

#[derive(Error, Debug)]
pub enum SaveError {
    #[error("nested field '{0}' has no write strategy")]
    UnsupportedNestedWrite(String),
    #[error("invalid nested data")]
    Invalid(ErrorMap),
    #[error("request cancelled before write")]
    Cancelled,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<SaveError> for AppError {
    fn from(e: SaveError) -> Self {
        match e {
            SaveError::UnsupportedNestedWrite(field) => AppError::UnsupportedNestedWrite(format!(
                "field '{}' is nested and writable but no nested write strategy is configured",
                field
            )),
            SaveError::Invalid(errors) => AppError::Validation(errors),
            SaveError::Cancelled => AppError::Cancelled,
            SaveError::Storage(e) => AppError::from(e),
        }
    }
}

/// Nested value scheduled for a write, with its strategy.
struct NestedPlan<'s> {
    field: &'s FieldDescriptor,
    strategy: NestedWrite,
    value: FieldValue,
}

struct SavePlan<'s> {
    fields: InternalMap,
    forward: Vec<NestedPlan<'s>>,
    reverse: Vec<NestedPlan<'s>>,
}

#[derive(Clone)]
pub struct Mediator {
    storage: Arc<dyn Storage>,
    timeout: Duration,
    cancel: Option<CancellationToken>,
}

impl Mediator {
    pub fn new(storage: Arc<dyn Storage>, timeout: Duration) -> Self {
        Mediator {
            storage,
            timeout,
            cancel: None,
        }
    }

    /// Writes are refused once `token` is cancelled; a write already issued runs to completion.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Update when `existing` is given, otherwise create. `extra` holds server-assigned
    /// storage values that never went through validation.
    pub async fn save(
        &self,
        schema: &Schema,
        validated: ValidatedRecord,
        existing: Option<&Record>,
        extra: InternalMap,
        strategies: &NestedStrategies,
    ) -> Result<Record, SaveError> {
        let mut plan = plan(schema, validated, strategies)?;
        plan.fields.extend(extra);
        self.ensure_live()?;
        let mut uow = self.call(self.storage.begin()).await?;
        match self.write(uow.as_mut(), schema, plan, existing).await {
            Ok(record) => {
                self.finish(uow).await?;
                tracing::debug!(
                    record_type = %schema.type_name(),
                    key = %record.key(),
                    created = existing.is_none(),
                    "saved"
                );
                Ok(record)
            }
            Err(e) => {
                self.abort(uow).await;
                Err(e)
            }
        }
    }

    /// Hard delete inside a unit of work.
    pub async fn destroy(&self, record: &Record) -> Result<(), SaveError> {
        self.ensure_live()?;
        let mut uow = self.call(self.storage.begin()).await?;
        match self.call(uow.delete(record)).await {
            Ok(()) => {
                self.finish(uow).await?;
                tracing::debug!(record_type = %record.type_name, key = %record.key(), "deleted");
                Ok(())
            }
            Err(e) => {
                self.abort(uow).await;
                Err(e.into())
            }
        }
    }

    /// Commit within the timeout. A commit that times out has handed its unit of work to
    /// storage, which discards it when the dropped call releases it.
    async fn finish(&self, uow: Box<dyn UnitOfWork>) -> Result<(), StorageError> {
        self.call(uow.commit()).await.map_err(|e| {
            tracing::warn!(error = %e, "commit did not complete");
            e
        })
    }

    /// Roll back within the timeout; failure is logged and the write error is what the caller sees.
    async fn abort(&self, uow: Box<dyn UnitOfWork>) {
        if let Err(rb) = self.call(uow.rollback()).await {
            tracing::warn!(error = %rb, "rollback failed");
        }
    }

    fn ensure_live(&self) -> Result<(), SaveError> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(SaveError::Cancelled),
            _ => Ok(()),
        }
    }

    async fn call<T>(&self, f: impl Future<Output = Result<T, StorageError>>) -> Result<T, StorageError> {
        bounded(self.timeout, f).await
    }

    async fn write(
        &self,
        uow: &mut dyn UnitOfWork,
        schema: &Schema,
        plan: SavePlan<'_>,
        existing: Option<&Record>,
    ) -> Result<Record, SaveError> {
        let SavePlan {
            mut fields,
            forward,
            reverse,
        } = plan;

        let mut replaced = Vec::new();
        for nested in forward {
            let key = self.write_forward(uow, &nested).await?;
            if let (Some(existing), NestedWrite::ReplaceAll) = (existing, nested.strategy) {
                replaced.extend(stale_children(nested.field, existing, &key));
            }
            fields.insert(nested.field.source.clone(), key);
        }

        self.ensure_live()?;
        let written = match existing {
            Some(existing) => self.call(uow.update(existing, fields)).await,
            None => self.call(uow.create(schema.type_name(), fields)).await,
        };
        let record = written.map_err(|e| attribute(schema, e, None))?;

        // The parent no longer points at these, so they can go.
        for (child, key) in replaced {
            let pk = child.primary_key().to_string();
            let found = self
                .call(uow.query(child.type_name(), &Query::new().filter(pk, key).page(1, 0)))
                .await?;
            for old in &found {
                self.call(uow.delete(old)).await?;
            }
        }

        for nested in reverse {
            self.write_reverse(uow, &nested, record.key()).await?;
        }
        Ok(record)
    }

    /// Child records the parent points at. Returns the key (or keys) to store on the parent.
    async fn write_forward(&self, uow: &mut dyn UnitOfWork, nested: &NestedPlan<'_>) -> Result<FieldValue, SaveError> {
        let FieldKind::Nested { schema: child, .. } = &nested.field.kind else {
            return Ok(nested.value.clone());
        };
        match (&nested.value, nested.strategy) {
            (FieldValue::Null, _) => Ok(FieldValue::Null),
            (FieldValue::Map(map), NestedWrite::LinkById) => link_key(child, map, &nested.field.name),
            (FieldValue::List(items), NestedWrite::LinkById) => {
                let mut keys = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let map = item.as_map().cloned().unwrap_or_default();
                    keys.push(link_key(child, &map, &format!("{}[{}]", nested.field.name, i))?);
                }
                Ok(FieldValue::List(keys))
            }
            (FieldValue::Map(map), _) => {
                let created = self
                    .create_child(uow, child, map, None, &nested.field.name)
                    .await?;
                Ok(created.key().clone())
            }
            (FieldValue::List(items), _) => {
                let mut keys = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let map = item.as_map().cloned().unwrap_or_default();
                    let created = self
                        .create_child(uow, child, &map, None, &format!("{}[{}]", nested.field.name, i))
                        .await?;
                    keys.push(created.key().clone());
                }
                Ok(FieldValue::List(keys))
            }
            (other, _) => Ok(other.clone()),
        }
    }

    /// Children pointing back at the parent through `foreign_field`.
    async fn write_reverse(
        &self,
        uow: &mut dyn UnitOfWork,
        nested: &NestedPlan<'_>,
        parent_key: &FieldValue,
    ) -> Result<(), SaveError> {
        let Relation::Reverse { foreign_field } = relation_of(nested.field) else {
            return Ok(());
        };
        let (target, child_schema) = match &nested.field.kind {
            FieldKind::Nested { schema, .. } => (schema.type_name().to_string(), Some(schema.as_ref())),
            FieldKind::Related { target, .. } => (target.clone(), None),
            _ => return Ok(()),
        };
        let items: Vec<FieldValue> = match &nested.value {
            FieldValue::List(items) => items.clone(),
            FieldValue::Null => Vec::new(),
            single => vec![single.clone()],
        };

        match nested.strategy {
            NestedWrite::Ignore => Ok(()),
            NestedWrite::ReplaceAll => {
                let Some(child) = child_schema else {
                    return Err(SaveError::UnsupportedNestedWrite(nested.field.name.clone()));
                };
                let current = self
                    .call(uow.query(&target, &Query::new().filter(foreign_field.clone(), parent_key.clone())))
                    .await?;
                for old in &current {
                    self.call(uow.delete(old)).await?;
                }
                for (i, item) in items.iter().enumerate() {
                    let map = item.as_map().cloned().unwrap_or_default();
                    let link = (foreign_field.as_str(), parent_key);
                    self.create_child(uow, child, &map, Some(link), &format!("{}[{}]", nested.field.name, i))
                        .await?;
                }
                Ok(())
            }
            NestedWrite::LinkById => {
                for (i, item) in items.iter().enumerate() {
                    let path = format!("{}[{}]", nested.field.name, i);
                    let key = match (item, child_schema) {
                        (FieldValue::Map(map), Some(child)) => link_key(child, map, &path)?,
                        (key, _) => key.clone(),
                    };
                    let pk = child_schema.map(|c| c.primary_key().to_string());
                    let found = self
                        .call(uow.query(&target, &Query::new().filter(pk.unwrap_or_else(|| "id".into()), key.clone()).page(1, 0)))
                        .await?;
                    let Some(child_record) = found.into_iter().next() else {
                        let mut errors = ErrorMap::new();
                        errors.add(path, format!("invalid key \"{}\": object does not exist", key));
                        return Err(SaveError::Invalid(errors));
                    };
                    let mut link = InternalMap::new();
                    link.insert(foreign_field.clone(), parent_key.clone());
                    self.call(uow.update(&child_record, link)).await?;
                }
                Ok(())
            }
        }
    }

    async fn create_child(
        &self,
        uow: &mut dyn UnitOfWork,
        child: &Schema,
        values: &InternalMap,
        link: Option<(&str, &FieldValue)>,
        path: &str,
    ) -> Result<Record, SaveError> {
        let mut fields = storage_fields(child, values);
        if let Some((foreign_field, parent_key)) = link {
            fields.insert(foreign_field.to_string(), parent_key.clone());
        }
        self.call(uow.create(child.type_name(), fields))
            .await
            .map_err(|e| attribute(child, e, Some(path)))
    }
}

fn relation_of(field: &FieldDescriptor) -> &Relation {
    match &field.kind {
        FieldKind::Related { relation, .. } | FieldKind::Nested { relation, .. } => relation,
        _ => &Relation::Forward,
    }
}

/// Split validated values into storage fields and nested writes. Fails before any storage call.
fn plan<'s>(schema: &'s Schema, validated: ValidatedRecord, strategies: &NestedStrategies) -> Result<SavePlan<'s>, SaveError> {
    let mut out = SavePlan {
        fields: InternalMap::new(),
        forward: Vec::new(),
        reverse: Vec::new(),
    };
    for (name, value) in validated.into_values() {
        let Some(field) = schema.field(&name) else {
            continue;
        };
        let reverse = matches!(relation_of(field), Relation::Reverse { .. });
        if field.is_nested() || reverse {
            let strategy = strategies
                .get(&name)
                .copied()
                .ok_or_else(|| SaveError::UnsupportedNestedWrite(name.clone()))?;
            if strategy == NestedWrite::Ignore {
                continue;
            }
            let nested = NestedPlan { field, strategy, value };
            if reverse {
                out.reverse.push(nested);
            } else {
                out.forward.push(nested);
            }
            continue;
        }
        if field.source.contains('.') {
            tracing::debug!(field = %name, source = %field.source, "skipping write through dotted source");
            continue;
        }
        out.fields.insert(field.source.clone(), value);
    }
    Ok(out)
}

/// Map a nested schema's validated values onto its storage fields. Submitted keys and
/// deeper nesting are not written.
fn storage_fields(schema: &Schema, values: &InternalMap) -> InternalMap {
    let mut out = InternalMap::new();
    for (name, value) in values {
        if name == schema.primary_key() {
            continue;
        }
        if let Some(f) = schema.field(name).filter(|f| !f.is_nested() && !f.source.contains('.')) {
            out.insert(f.source.clone(), value.clone());
        }
    }
    out
}

fn link_key(child: &Schema, map: &InternalMap, path: &str) -> Result<FieldValue, SaveError> {
    match map.get(child.primary_key()) {
        Some(key) if !key.is_null() => Ok(key.clone()),
        _ => {
            let mut errors = ErrorMap::new();
            errors.add(
                format!("{}.{}", path, child.primary_key()),
                "an identifier is required to link an existing object",
            );
            Err(SaveError::Invalid(errors))
        }
    }
}

/// Key a storage constraint on a column by the external field that writes it, under
/// `path` for nested children. Columns no field writes land on the record (or on `path`).
fn attribute(schema: &Schema, e: StorageError, path: Option<&str>) -> SaveError {
    let StorageError::Constraint { field: Some(column), message } = e else {
        return SaveError::Storage(e);
    };
    let mut errors = ErrorMap::new();
    match (schema.field_by_source(&column), path) {
        (Some(f), path) => {
            let message = message.replace(&format!("with this {}", column), &format!("with this {}", f.name));
            match path {
                Some(path) => errors.add(format!("{}.{}", path, f.name), message),
                None => errors.add(&f.name, message),
            }
        }
        (None, Some(path)) => errors.add(path, message),
        (None, None) => errors.add_non_field(message),
    }
    SaveError::Invalid(errors)
}

/// Children a forward replace-all save leaves behind: keys the instance held that the
/// new value does not.
fn stale_children(field: &FieldDescriptor, existing: &Record, new_key: &FieldValue) -> Vec<(Arc<Schema>, FieldValue)> {
    let FieldKind::Nested { schema: child, .. } = &field.kind else {
        return Vec::new();
    };
    let keys = |v: Option<&FieldValue>| -> Vec<FieldValue> {
        match v {
            None | Some(FieldValue::Null) => Vec::new(),
            Some(FieldValue::List(items)) => items.iter().filter(|k| !k.is_null()).cloned().collect(),
            Some(key) => vec![key.clone()],
        }
    };
    let kept = keys(Some(new_key));
    keys(existing.get(&field.source))
        .into_iter()
        .filter(|old| !kept.iter().any(|k| k.same_key(old)))
        .map(|old| (child.clone(), old))
        .collect()
}
