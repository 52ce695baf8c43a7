//! Resource SDK: schema-driven transform, validation, persistence and dispatch for HTTP resource APIs.

pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod persist;
pub mod response;
pub mod routes;
pub mod schema;
pub mod sql;
pub mod state;
pub mod store;
pub mod transform;
pub mod validation;
pub mod value;

pub use config::{build_resources, load_from_dir, record_types, FullConfig, RecordTypeConfig, ResourceConfig, Settings};
pub use controller::{
    ActionInput, Capabilities, CustomAction, ModelResource, Outcome, RequestContext, Resource,
};
pub use dispatch::{
    Actor, Authenticator, DispatchRequest, DispatchResponse, Dispatcher, DispatcherConfig, Identity, Permission,
};
pub use error::{AppError, ConfigError, DecodeError, SchemaError};
pub use persist::{Mediator, NestedWrite};
pub use response::{error_body, page};
pub use routes::{app, common_routes, common_routes_with_ready, resource_routes};
pub use schema::{Declaration, FieldDescriptor, RecordType, RecordTypes, Schema, SchemaRegistry, StorageField, StorageKind};
pub use state::AppState;
pub use store::{InMemoryStorage, PgStorage, Storage, StorageError};
pub use transform::BoundInstance;
pub use validation::ErrorMap;
pub use value::{FieldValue, InternalMap, Payload, Record};
