//! Generic controller over one schema and one storage.

use crate::config::Settings;
use crate::controller::{
    Capabilities, Create, CustomAction, Destroy, List, Outcome, Prefetcher, Resource, RequestContext, Retrieve,
    Update,
};
use crate::dispatch::{Actor, Permission};
use crate::error::AppError;
use crate::persist::{Mediator, NestedStrategies, NestedWrite};
use crate::response::page;
use crate::schema::{Constraints, FieldKind, RecordTypes, Schema};
use crate::store::{bounded, Query, Storage, StorageError};
use crate::transform::{coerce_scalar, key_from_str, to_representation, to_representation_many, BoundInstance};
use crate::validation::ErrorMap;
use crate::value::{FieldValue, InternalMap, Record};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Server-assigned storage values for a create, e.g. the owner taken from the actor.
pub type ServerFields = Arc<dyn Fn(&Actor) -> InternalMap + Send + Sync>;

pub struct ModelResource {
    name: String,
    schema: Arc<Schema>,
    storage: Arc<dyn Storage>,
    types: RecordTypes,
    capabilities: Capabilities,
    filter_fields: Vec<String>,
    lookup_field: Option<String>,
    page_size: usize,
    max_page_size: usize,
    timeout: Duration,
    nested: NestedStrategies,
    server_fields: Option<ServerFields>,
    permissions: Option<Vec<Arc<dyn Permission>>>,
    actions: Vec<CustomAction>,
}

pub struct ModelResourceBuilder {
    inner: ModelResource,
}

impl ModelResourceBuilder {
    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.inner.capabilities = capabilities;
        self
    }

    pub fn read_only(self) -> Self {
        self.capabilities(Capabilities::read_only())
    }

    /// Related record types, needed to prefetch dotted source paths.
    pub fn record_types(mut self, types: RecordTypes) -> Self {
        self.inner.types = types;
        self
    }

    /// Storage field names accepted as exact-match list filters.
    pub fn filter_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.filter_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn lookup_field(mut self, field: impl Into<String>) -> Self {
        self.inner.lookup_field = Some(field.into());
        self
    }

    pub fn pagination(mut self, page_size: usize, max_page_size: usize) -> Self {
        self.inner.page_size = page_size;
        self.inner.max_page_size = max_page_size.max(page_size);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.inner.timeout = timeout;
        self
    }

    /// Page sizes and storage timeout from runtime settings.
    pub fn settings(self, settings: &Settings) -> Self {
        self.pagination(settings.page_size, settings.max_page_size)
            .timeout(settings.storage_timeout)
    }

    pub fn nested_write(mut self, field: impl Into<String>, strategy: NestedWrite) -> Self {
        self.inner.nested.insert(field.into(), strategy);
        self
    }

    pub fn perform_create<F>(mut self, f: F) -> Self
    where
        F: Fn(&Actor) -> InternalMap + Send + Sync + 'static,
    {
        self.inner.server_fields = Some(Arc::new(f));
        self
    }

    pub fn permissions(mut self, permissions: Vec<Arc<dyn Permission>>) -> Self {
        self.inner.permissions = Some(permissions);
        self
    }

    pub fn action(mut self, action: CustomAction) -> Self {
        self.inner.actions.push(action);
        self
    }

    pub fn build(self) -> ModelResource {
        self.inner
    }
}

impl ModelResource {
    pub fn builder(name: impl Into<String>, schema: Arc<Schema>, storage: Arc<dyn Storage>) -> ModelResourceBuilder {
        let defaults = Settings::default();
        ModelResourceBuilder {
            inner: ModelResource {
                name: name.into(),
                schema,
                storage,
                types: RecordTypes::new(),
                capabilities: Capabilities::all(),
                filter_fields: Vec::new(),
                lookup_field: None,
                page_size: defaults.page_size,
                max_page_size: defaults.max_page_size,
                timeout: defaults.storage_timeout,
                nested: NestedStrategies::new(),
                server_fields: None,
                permissions: None,
                actions: Vec::new(),
            },
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    async fn call<T>(&self, f: impl Future<Output = Result<T, StorageError>>) -> Result<T, StorageError> {
        bounded(self.timeout, f).await
    }

    fn mediator(&self, ctx: &RequestContext) -> Mediator {
        Mediator::new(self.storage.clone(), self.timeout).with_cancellation(ctx.cancel.clone())
    }

    fn prefetcher(&self) -> Prefetcher<'_> {
        Prefetcher::new(self.storage.as_ref(), &self.types, self.timeout)
    }

    async fn render(&self, mut record: Record) -> Result<(Value, Record), AppError> {
        self.prefetcher().prefetch(&self.schema, &mut record).await?;
        Ok((Value::Object(to_representation(&self.schema, &record)), record))
    }

    /// Typed value for a storage field, coerced like the schema field that reads it.
    fn typed_value(&self, storage_field: &str, raw: &str) -> Result<FieldValue, String> {
        match self.schema.field_by_source(storage_field).map(|f| &f.kind) {
            Some(FieldKind::Scalar(ty)) => {
                let loose = Constraints {
                    allow_blank: true,
                    ..Constraints::default()
                };
                coerce_scalar(*ty, &Value::String(raw.to_string()), &loose)
            }
            _ => Ok(key_from_str(raw)),
        }
    }

    fn pagination(&self, ctx: &RequestContext) -> Result<(usize, usize), AppError> {
        let mut errors = ErrorMap::new();
        let limit = match ctx.query_param("limit").map(str::parse::<usize>) {
            None => self.page_size,
            Some(Ok(n)) if n > 0 => n.min(self.max_page_size),
            Some(_) => {
                errors.add("limit", "a valid positive integer is required");
                0
            }
        };
        let offset = match ctx.query_param("offset").map(str::parse::<usize>) {
            None => 0,
            Some(Ok(n)) => n,
            Some(Err(_)) => {
                errors.add("offset", "a valid integer is required");
                0
            }
        };
        if errors.is_empty() {
            Ok((limit, offset))
        } else {
            Err(AppError::Validation(errors))
        }
    }
}

#[async_trait]
impl Resource for ModelResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_list(&self) -> Option<&dyn List> {
        self.capabilities.list.then_some(self as &dyn List)
    }

    fn as_create(&self) -> Option<&dyn Create> {
        self.capabilities.create.then_some(self as &dyn Create)
    }

    fn as_retrieve(&self) -> Option<&dyn Retrieve> {
        self.capabilities.retrieve.then_some(self as &dyn Retrieve)
    }

    fn as_update(&self) -> Option<&dyn Update> {
        self.capabilities.update.then_some(self as &dyn Update)
    }

    fn as_destroy(&self) -> Option<&dyn Destroy> {
        self.capabilities.destroy.then_some(self as &dyn Destroy)
    }

    /// Lookup values that cannot be coerced to the field's type address nothing.
    async fn load(&self, _ctx: &RequestContext, lookup: &str) -> Result<Option<Record>, AppError> {
        let field = self.lookup_field.as_deref().unwrap_or(self.schema.primary_key());
        let Ok(value) = self.typed_value(field, lookup) else {
            return Ok(None);
        };
        if self.lookup_field.is_none() {
            return Ok(self.call(self.storage.get(self.schema.type_name(), &value)).await?);
        }
        let query = Query::new().filter(field, value).page(1, 0);
        let rows = self.call(self.storage.query(self.schema.type_name(), &query)).await?;
        Ok(rows.into_iter().next())
    }

    fn actions(&self) -> &[CustomAction] {
        &self.actions
    }

    fn permissions(&self) -> Option<&[Arc<dyn Permission>]> {
        self.permissions.as_deref()
    }
}

#[async_trait]
impl List for ModelResource {
    async fn list(&self, ctx: &RequestContext) -> Result<Outcome, AppError> {
        let (limit, offset) = self.pagination(ctx)?;
        let mut query = Query::new().page(limit, offset);
        let mut errors = ErrorMap::new();
        for (name, raw) in &ctx.query {
            if !self.filter_fields.iter().any(|f| f == name) {
                continue;
            }
            match self.typed_value(name, raw) {
                Ok(value) => query = query.filter(name.clone(), value),
                Err(msg) => errors.add(name.clone(), msg),
            }
        }
        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }
        let mut records = self.call(self.storage.query(self.schema.type_name(), &query)).await?;
        self.prefetcher().prefetch_all(&self.schema, &mut records).await?;
        let data = to_representation_many(&self.schema, &records);
        Ok(Outcome::Ok(page(data, limit, offset)))
    }
}

#[async_trait]
impl Create for ModelResource {
    async fn create(&self, ctx: &RequestContext) -> Result<Outcome, AppError> {
        let bound = BoundInstance::for_create(self.schema.clone(), ctx.payload.clone());
        let validated = bound.validate().into_result().map_err(AppError::Validation)?;
        let extra = self
            .server_fields
            .as_ref()
            .map(|f| f(&ctx.actor))
            .unwrap_or_default();
        let record = self
            .mediator(ctx)
            .save(&self.schema, validated, None, extra, &self.nested)
            .await?;
        let (body, record) = self.render(record).await?;
        Ok(Outcome::Created {
            body,
            key: record.key().clone(),
        })
    }
}

#[async_trait]
impl Retrieve for ModelResource {
    async fn retrieve(&self, _ctx: &RequestContext, record: Record) -> Result<Outcome, AppError> {
        let (body, _) = self.render(record).await?;
        Ok(Outcome::Ok(body))
    }
}

#[async_trait]
impl Update for ModelResource {
    async fn update(&self, ctx: &RequestContext, record: Record, partial: bool) -> Result<Outcome, AppError> {
        let bound = BoundInstance::for_update(self.schema.clone(), record, ctx.payload.clone(), partial);
        let validated = bound.validate().into_result().map_err(AppError::Validation)?;
        let existing = bound.into_instance();
        let saved = self
            .mediator(ctx)
            .save(&self.schema, validated, existing.as_ref(), InternalMap::new(), &self.nested)
            .await?;
        let (body, _) = self.render(saved).await?;
        Ok(Outcome::Ok(body))
    }
}

#[async_trait]
impl Destroy for ModelResource {
    async fn destroy(&self, ctx: &RequestContext, record: Record) -> Result<Outcome, AppError> {
        self.mediator(ctx).destroy(&record).await?;
        Ok(Outcome::NoContent)
    }
}
