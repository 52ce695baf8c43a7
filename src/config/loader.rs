//! Load declarative config from `record_types.json` + `resources.json` and build controllers.

use crate::config::{validate, FullConfig, RecordTypeConfig, ResourceConfig, Settings};
use crate::controller::{Capabilities, ModelResource, Resource};
use crate::error::ConfigError;
use crate::schema::{RecordTypes, SchemaRegistry};
use crate::store::Storage;
use std::path::Path;
use std::sync::Arc;

pub const RECORD_TYPES_FILE: &str = "record_types.json";
pub const RESOURCES_FILE: &str = "resources.json";

/// Read both config files from `dir`. A missing `resources.json` exposes nothing.
pub async fn load_from_dir(dir: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let dir = dir.as_ref();
    let record_types: Vec<RecordTypeConfig> = read_json(&dir.join(RECORD_TYPES_FILE), true)
        .await?
        .unwrap_or_default();
    let resources: Vec<ResourceConfig> = read_json(&dir.join(RESOURCES_FILE), false)
        .await?
        .unwrap_or_default();
    let config = FullConfig { record_types, resources };
    tracing::info!(
        dir = %dir.display(),
        record_types = config.record_types.len(),
        resources = config.resources.len(),
        "config loaded"
    );
    Ok(config)
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path, required: bool) -> Result<Option<T>, ConfigError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => return Ok(None),
        Err(e) => return Err(ConfigError::Load(format!("{}: {}", path.display(), e))),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}

/// Record types of `config`, as shared by storage adapters and controllers.
pub fn record_types(config: &FullConfig) -> RecordTypes {
    config
        .record_types
        .iter()
        .fold(RecordTypes::new(), |types, rt| types.with(Arc::new(rt.clone())))
}

/// Validate `config` and turn every resource into a `ModelResource`, resolving schemas
/// through `registry`. Fails before any traffic is served.
pub fn build_resources(
    config: &FullConfig,
    storage: Arc<dyn Storage>,
    registry: &SchemaRegistry,
    settings: &Settings,
) -> Result<Vec<ModelResource>, ConfigError> {
    validate(config)?;
    let types = record_types(config);
    let mut out = Vec::with_capacity(config.resources.len());
    for res in &config.resources {
        let rt = types.get(&res.record_type).ok_or_else(|| ConfigError::MissingReference {
            kind: "record type",
            id: res.record_type.clone(),
        })?;
        let schema = registry.get_or_resolve(rt.as_ref(), &res.declaration()?)?;
        let mut builder = ModelResource::builder(res.path_segment.clone(), schema, storage.clone())
            .record_types(types.clone())
            .capabilities(Capabilities::from_operations(&res.operations)?)
            .filter_fields(res.filter_fields.iter().cloned())
            .settings(settings);
        if let Some(field) = &res.lookup_field {
            builder = builder.lookup_field(field.clone());
        }
        let resource = builder.build();
        tracing::debug!(resource = %resource.name(), record_type = %res.record_type, "resource built");
        out.push(resource);
    }
    Ok(out)
}
