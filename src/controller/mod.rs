//! Resource controllers: capability traits, custom actions and the model-backed controller.

mod model;
mod prefetch;

pub use model::{ModelResource, ModelResourceBuilder, ServerFields};
pub use prefetch::Prefetcher;

use crate::dispatch::{Actor, OperationName, Permission};
use crate::error::{AppError, ConfigError};
use crate::value::{FieldValue, Payload, Record};
use async_trait::async_trait;
use axum::http::Method;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-request data handed to a controller once authentication and authorization passed.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub actor: Actor,
    pub operation: OperationName,
    pub query: Vec<(String, String)>,
    pub payload: Payload,
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(actor: Actor, operation: OperationName) -> Self {
        RequestContext {
            actor,
            operation,
            query: Vec::new(),
            payload: Payload::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// First value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

/// What a controller produced; the dispatcher turns it into status, headers and body.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Ok(Value),
    Created { body: Value, key: FieldValue },
    NoContent,
}

#[async_trait]
pub trait List: Send + Sync {
    async fn list(&self, ctx: &RequestContext) -> Result<Outcome, AppError>;
}

#[async_trait]
pub trait Create: Send + Sync {
    async fn create(&self, ctx: &RequestContext) -> Result<Outcome, AppError>;
}

#[async_trait]
pub trait Retrieve: Send + Sync {
    async fn retrieve(&self, ctx: &RequestContext, record: Record) -> Result<Outcome, AppError>;
}

/// Serves PUT (`partial == false`) and PATCH.
#[async_trait]
pub trait Update: Send + Sync {
    async fn update(&self, ctx: &RequestContext, record: Record, partial: bool) -> Result<Outcome, AppError>;
}

#[async_trait]
pub trait Destroy: Send + Sync {
    async fn destroy(&self, ctx: &RequestContext, record: Record) -> Result<Outcome, AppError>;
}

/// A controller mounted under `name`. The operation table is built from the
/// capabilities it exposes.
#[async_trait]
pub trait Resource: Send + Sync {
    fn name(&self) -> &str;

    fn as_list(&self) -> Option<&dyn List> {
        None
    }

    fn as_create(&self) -> Option<&dyn Create> {
        None
    }

    fn as_retrieve(&self) -> Option<&dyn Retrieve> {
        None
    }

    fn as_update(&self) -> Option<&dyn Update> {
        None
    }

    fn as_destroy(&self) -> Option<&dyn Destroy> {
        None
    }

    /// Fetch the instance addressed by the detail path segment.
    async fn load(&self, ctx: &RequestContext, lookup: &str) -> Result<Option<Record>, AppError>;

    fn actions(&self) -> &[CustomAction] {
        &[]
    }

    /// Replaces the dispatcher's default permission chain for this resource.
    fn permissions(&self) -> Option<&[Arc<dyn Permission>]> {
        None
    }
}

/// Which standard operations a controller serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub list: bool,
    pub create: bool,
    pub retrieve: bool,
    pub update: bool,
    pub destroy: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Capabilities {
            list: true,
            create: true,
            retrieve: true,
            update: true,
            destroy: true,
        }
    }

    pub fn read_only() -> Self {
        Capabilities {
            list: true,
            retrieve: true,
            ..Capabilities::none()
        }
    }

    pub fn none() -> Self {
        Capabilities {
            list: false,
            create: false,
            retrieve: false,
            update: false,
            destroy: false,
        }
    }

    /// From config operation names. `read` means list + retrieve, `delete` means destroy,
    /// and `partial_update` enables the same capability as `update`.
    pub fn from_operations<S: AsRef<str>>(operations: &[S]) -> Result<Self, ConfigError> {
        let mut caps = Capabilities::none();
        for op in operations {
            match op.as_ref() {
                "list" => caps.list = true,
                "create" => caps.create = true,
                "retrieve" => caps.retrieve = true,
                "read" => {
                    caps.list = true;
                    caps.retrieve = true;
                }
                "update" | "partial_update" => caps.update = true,
                "destroy" | "delete" => caps.destroy = true,
                other => return Err(ConfigError::Validation(format!("unknown operation '{}'", other))),
            }
        }
        Ok(caps)
    }
}

/// Everything a custom action handler receives.
#[derive(Clone, Debug)]
pub struct ActionInput {
    pub actor: Actor,
    pub query: Vec<(String, String)>,
    pub payload: Payload,
    /// Loaded instance for detail actions.
    pub record: Option<Record>,
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn call(&self, input: ActionInput) -> Result<Outcome, AppError>;
}

#[async_trait]
impl<F, Fut> ActionHandler for F
where
    F: Fn(ActionInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Outcome, AppError>> + Send,
{
    async fn call(&self, input: ActionInput) -> Result<Outcome, AppError> {
        (self)(input).await
    }
}

/// An extra route on a resource: `/{resource}/{action}/` or `/{resource}/{lookup}/{action}/`.
#[derive(Clone)]
pub struct CustomAction {
    pub name: String,
    pub method: Method,
    pub detail: bool,
    pub permissions: Option<Vec<Arc<dyn Permission>>>,
    handler: Arc<dyn ActionHandler>,
}

impl CustomAction {
    pub fn new<H>(name: impl Into<String>, method: Method, detail: bool, handler: H) -> Self
    where
        H: ActionHandler + 'static,
    {
        CustomAction {
            name: name.into(),
            method,
            detail,
            permissions: None,
            handler: Arc::new(handler),
        }
    }

    pub fn permissions(mut self, permissions: Vec<Arc<dyn Permission>>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub async fn call(&self, input: ActionInput) -> Result<Outcome, AppError> {
        self.handler.call(input).await
    }
}

impl std::fmt::Debug for CustomAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomAction")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("detail", &self.detail)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn operations_map_to_capabilities() {
        let caps = Capabilities::from_operations(&["read", "delete"]).unwrap();
        assert!(caps.list && caps.retrieve && caps.destroy);
        assert!(!caps.create && !caps.update);
        assert_eq!(Capabilities::from_operations(&["list", "retrieve"]).unwrap(), Capabilities::read_only());
        assert_matches!(Capabilities::from_operations(&["upsert"]), Err(ConfigError::Validation(_)));
    }

    #[tokio::test]
    async fn closures_are_action_handlers() {
        let action = CustomAction::new("ping", Method::POST, false, |input: ActionInput| async move {
            Ok::<_, AppError>(Outcome::Ok(Value::Bool(input.record.is_none())))
        });
        let input = ActionInput {
            actor: Actor::Anonymous,
            query: Vec::new(),
            payload: Payload::new(),
            record: None,
            cancel: CancellationToken::new(),
        };
        assert_eq!(action.call(input).await.unwrap(), Outcome::Ok(Value::Bool(true)));
    }
}
