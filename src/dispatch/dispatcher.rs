//! Per-request state machine: resolve, authenticate, authorize, load, authorize again, execute, respond.

use crate::config::Settings;
use crate::controller::{ActionInput, CustomAction, Outcome, RequestContext, Resource};
use crate::dispatch::codec::{self, JSON};
use crate::dispatch::{authenticate, Actor, AllowAny, Authenticator, OperationEntry, OperationName, OperationTable, Permission};
use crate::error::{AppError, ConfigError};
use crate::value::{Payload, Record};
use axum::body::{Body, Bytes};
use axum::http::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Explicit dispatcher wiring; nothing is read from globals.
#[derive(Clone)]
pub struct DispatcherConfig {
    pub settings: Settings,
    pub authenticators: Vec<Arc<dyn Authenticator>>,
    /// Used when neither the action nor the resource overrides permissions.
    pub default_permissions: Vec<Arc<dyn Permission>>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            settings: Settings::default(),
            authenticators: Vec::new(),
            default_permissions: vec![Arc::new(AllowAny)],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Resolved,
    Authenticating,
    AuthorizingCollection,
    Loading,
    AuthorizingInstance,
    Executing,
    Responding,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Terminal {
    Completed,
    /// Error code of the rejection, e.g. `permission_denied`.
    Rejected(&'static str),
}

#[derive(Clone, Debug)]
pub struct DispatchRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub cancel: CancellationToken,
}

impl DispatchRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        DispatchRequest {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn query_pair(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: axum::http::HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn json(self, body: &serde_json::Value) -> Self {
        let mut req = self.header(CONTENT_TYPE, JSON);
        req.body = Bytes::from(body.to_string());
        req
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn header_str(&self, name: axum::http::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn format(&self) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == "format").map(|(_, v)| v.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct DispatchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub terminal: Terminal,
}

impl DispatchResponse {
    /// Body parsed as JSON; `None` for empty bodies.
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    fn rejected(err: AppError) -> Self {
        err.log();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
        DispatchResponse {
            status: err.status(),
            headers,
            body: Bytes::from(err.body().to_string()),
            terminal: Terminal::Rejected(err.code()),
        }
    }
}

impl IntoResponse for DispatchResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Routes requests to resources. Cheap to clone; the operation table is shared and immutable.
#[derive(Clone)]
pub struct Dispatcher {
    table: Arc<OperationTable>,
    resources: Arc<HashMap<String, Arc<dyn Resource>>>,
    config: Arc<DispatcherConfig>,
}

fn transition(phase: Phase, entry: &OperationEntry) {
    tracing::debug!(phase = ?phase, operation = %entry.name, resource = %entry.resource, "dispatch");
}

fn denied(actor: &Actor, permission: &dyn Permission) -> AppError {
    tracing::debug!(permission = %permission.name(), authenticated = actor.is_authenticated(), "permission denied");
    if actor.is_authenticated() {
        AppError::PermissionDenied(permission.message().to_string())
    } else {
        AppError::NotAuthenticated
    }
}

impl Dispatcher {
    pub fn new(resources: Vec<Arc<dyn Resource>>, config: DispatcherConfig) -> Result<Self, ConfigError> {
        let table = OperationTable::build(&resources)?;
        let resources = resources
            .into_iter()
            .map(|r| (r.name().to_string(), r))
            .collect();
        Ok(Dispatcher {
            table: Arc::new(table),
            resources: Arc::new(resources),
            config: Arc::new(config),
        })
    }

    pub fn table(&self) -> &OperationTable {
        &self.table
    }

    pub fn settings(&self) -> &Settings {
        &self.config.settings
    }

    pub async fn dispatch(&self, req: DispatchRequest) -> DispatchResponse {
        let span = tracing::debug_span!("dispatch", method = %req.method, path = %req.path);
        async {
            let response = match self.run(&req).await {
                Ok(response) => response,
                Err(err) => DispatchResponse::rejected(err),
            };
            tracing::debug!(status = response.status.as_u16(), terminal = ?response.terminal, "request finished");
            response
        }
        .instrument(span)
        .await
    }

    async fn run(&self, req: &DispatchRequest) -> Result<DispatchResponse, AppError> {
        let (entry, lookup) = self
            .table
            .resolve(&req.method, &req.path, &self.config.settings.base_path)
            .ok_or_else(|| AppError::NotFound(format!("no operation for {} {}", req.method, req.path)))?;
        transition(Phase::Resolved, entry);
        codec::negotiate(req.header_str(ACCEPT), req.format())?;
        let resource = self
            .resources
            .get(&entry.resource)
            .ok_or_else(|| AppError::Internal(format!("resource '{}' is not registered", entry.resource)))?;
        let action = match &entry.name {
            OperationName::Custom(name) => Some(
                resource
                    .actions()
                    .iter()
                    .find(|a| &a.name == name && a.method == entry.method && a.detail == entry.detail)
                    .ok_or_else(|| AppError::Internal(format!("action '{}' is not registered", name)))?,
            ),
            _ => None,
        };

        transition(Phase::Authenticating, entry);
        let actor = authenticate(&self.config.authenticators, &req.headers)
            .await
            .map_err(AppError::AuthenticationFailed)?;

        let permissions: &[Arc<dyn Permission>] = action
            .and_then(|a| a.permissions.as_deref())
            .or_else(|| resource.permissions())
            .unwrap_or(self.config.default_permissions.as_slice());
        transition(Phase::AuthorizingCollection, entry);
        if let Some(p) = permissions.iter().find(|p| !p.has_permission(&actor, entry)) {
            return Err(denied(&actor, p.as_ref()));
        }
        if req.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let mut ctx = RequestContext {
            actor,
            operation: entry.name.clone(),
            query: req.query.clone(),
            payload: Payload::new(),
            cancel: req.cancel.clone(),
        };

        let record = if entry.detail {
            transition(Phase::Loading, entry);
            let lookup = lookup.unwrap_or_default();
            let record = resource
                .load(&ctx, &lookup)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("{} '{}'", entry.resource, lookup)))?;
            transition(Phase::AuthorizingInstance, entry);
            if let Some(p) = permissions
                .iter()
                .find(|p| !p.has_object_permission(&ctx.actor, entry, &record))
            {
                return Err(denied(&ctx.actor, p.as_ref()));
            }
            Some(record)
        } else {
            None
        };

        transition(Phase::Executing, entry);
        ctx.payload = codec::decode(&req.body, req.header_str(CONTENT_TYPE))?;
        if req.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let outcome = execute(resource.as_ref(), entry, action, &ctx, record).await?;

        transition(Phase::Responding, entry);
        self.render(entry, outcome, req)
    }

    fn render(&self, entry: &OperationEntry, outcome: Outcome, req: &DispatchRequest) -> Result<DispatchResponse, AppError> {
        let mut headers = HeaderMap::new();
        let (status, body) = match outcome {
            Outcome::NoContent => (StatusCode::NO_CONTENT, None),
            Outcome::Ok(body) => (StatusCode::OK, Some(body)),
            Outcome::Created { body, key } => {
                let location = format!("{}/{}/{}/", self.config.settings.base_path, entry.resource, key);
                if let Ok(value) = HeaderValue::from_str(&location) {
                    headers.insert(LOCATION, value);
                }
                (StatusCode::CREATED, Some(body))
            }
        };
        let body = match body {
            Some(body) => {
                let (bytes, content_type) = codec::encode(&body, req.header_str(ACCEPT), req.format())?;
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
                bytes
            }
            None => Bytes::new(),
        };
        Ok(DispatchResponse {
            status,
            headers,
            body,
            terminal: Terminal::Completed,
        })
    }
}

async fn execute(
    resource: &dyn Resource,
    entry: &OperationEntry,
    action: Option<&CustomAction>,
    ctx: &RequestContext,
    record: Option<Record>,
) -> Result<Outcome, AppError> {
    let missing = || AppError::Internal(format!("{} is not served by '{}'", entry.name, entry.resource));
    let instance = |record: Option<Record>| record.ok_or_else(|| AppError::Internal("detail operation without an instance".into()));
    match &entry.name {
        OperationName::List => resource.as_list().ok_or_else(missing)?.list(ctx).await,
        OperationName::Create => resource.as_create().ok_or_else(missing)?.create(ctx).await,
        OperationName::Retrieve => {
            resource
                .as_retrieve()
                .ok_or_else(missing)?
                .retrieve(ctx, instance(record)?)
                .await
        }
        OperationName::Update | OperationName::PartialUpdate => {
            let partial = entry.name == OperationName::PartialUpdate;
            resource
                .as_update()
                .ok_or_else(missing)?
                .update(ctx, instance(record)?, partial)
                .await
        }
        OperationName::Destroy => {
            resource
                .as_destroy()
                .ok_or_else(missing)?
                .destroy(ctx, instance(record)?)
                .await
        }
        OperationName::Custom(_) => {
            let action = action.ok_or_else(missing)?;
            action
                .call(ActionInput {
                    actor: ctx.actor.clone(),
                    query: ctx.query.clone(),
                    payload: ctx.payload.clone(),
                    record,
                    cancel: ctx.cancel.clone(),
                })
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordTypeConfig;
    use crate::controller::ModelResource;
    use crate::dispatch::{Identity, IsAuthenticatedOrReadOnly, IsOwnerOrReadOnly, TokenAuthenticator};
    use crate::schema::{resolve, Declaration, RecordTypes, StorageField, StorageKind};
    use crate::store::InMemoryStorage;
    use crate::value::{FieldValue, InternalMap};
    use axum::http::header::AUTHORIZATION;
    use serde_json::json;

    struct Fixture {
        storage: Arc<InMemoryStorage>,
        dispatcher: Dispatcher,
    }

    async fn fixture() -> Fixture {
        let user = RecordTypeConfig::new("user")
            .field(StorageField::new("id", StorageKind::Integer).with_default())
            .field(StorageField::new("username", StorageKind::String).unique());
        let snippet = RecordTypeConfig::new("snippet")
            .field(StorageField::new("id", StorageKind::Integer).with_default())
            .field(StorageField::new("title", StorageKind::String).max_length(5))
            .field(StorageField::relation("owner", StorageKind::ForeignKey, "user"));
        let types = RecordTypes::new().with(Arc::new(user)).with(Arc::new(snippet.clone()));
        let storage = Arc::new(InMemoryStorage::new(types.clone()));
        for name in ["alice", "bob"] {
            let mut u = InternalMap::new();
            u.insert("username".into(), name.into());
            storage.seed("user", u).await.unwrap();
        }
        let mut s = InternalMap::new();
        s.insert("title".into(), "mine".into());
        s.insert("owner".into(), FieldValue::Int(1));
        storage.seed("snippet", s).await.unwrap();

        let schema = Arc::new(resolve(&snippet, &Declaration::new("snippets").read_only_fields(["owner"])).unwrap());
        let resource = ModelResource::builder("snippets", schema, storage.clone())
            .record_types(types)
            .perform_create(|actor: &Actor| {
                let mut extra = InternalMap::new();
                if let Some(i) = actor.identity() {
                    extra.insert("owner".into(), i.id.clone());
                }
                extra
            })
            .permissions(vec![Arc::new(IsAuthenticatedOrReadOnly), Arc::new(IsOwnerOrReadOnly::new("owner"))])
            .build();
        let config = DispatcherConfig {
            settings: Settings::default().with_base_path("/api"),
            authenticators: vec![Arc::new(
                TokenAuthenticator::new()
                    .token("alice-token", Identity::new(FieldValue::Int(1), "alice"))
                    .token("bob-token", Identity::new(FieldValue::Int(2), "bob")),
            )],
            default_permissions: vec![Arc::new(AllowAny)],
        };
        let dispatcher = Dispatcher::new(vec![Arc::new(resource)], config).unwrap();
        Fixture { storage, dispatcher }
    }

    #[tokio::test]
    async fn create_returns_201_with_location() {
        let f = fixture().await;
        let req = DispatchRequest::new(Method::POST, "/api/snippets/")
            .header(AUTHORIZATION, "Token alice-token")
            .json(&json!({"title": "hello"}));
        let res = f.dispatcher.dispatch(req).await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.location(), Some("/api/snippets/2/"));
        assert_eq!(res.json().unwrap(), json!({"id": 2, "title": "hello", "owner": 1}));
    }

    #[tokio::test]
    async fn anonymous_write_is_401_and_writes_nothing() {
        let f = fixture().await;
        let req = DispatchRequest::new(Method::POST, "/api/snippets").json(&json!({"title": "x"}));
        let res = f.dispatcher.dispatch(req).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.terminal, Terminal::Rejected("not_authenticated"));
        assert_eq!(f.storage.calls().begins, 0);
    }

    #[tokio::test]
    async fn object_denial_is_403_after_lookup_without_delete() {
        let f = fixture().await;
        let before = f.storage.calls();
        let req = DispatchRequest::new(Method::DELETE, "/api/snippets/1/").header(AUTHORIZATION, "Token bob-token");
        let res = f.dispatcher.dispatch(req).await;
        assert_eq!(res.status, StatusCode::FORBIDDEN);
        let after = f.storage.calls();
        assert_eq!(after.gets, before.gets + 1);
        assert_eq!(after.deletes, before.deletes);
        assert_eq!(after.begins, before.begins);
    }

    #[tokio::test]
    async fn owner_may_delete() {
        let f = fixture().await;
        let req = DispatchRequest::new(Method::DELETE, "/api/snippets/1/").header(AUTHORIZATION, "Token alice-token");
        let res = f.dispatcher.dispatch(req).await;
        assert_eq!(res.status, StatusCode::NO_CONTENT);
        assert!(res.body.is_empty());
        let res = f.dispatcher.dispatch(DispatchRequest::new(Method::GET, "/api/snippets/1/")).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_route_and_bad_token() {
        let f = fixture().await;
        let res = f.dispatcher.dispatch(DispatchRequest::new(Method::GET, "/api/widgets/")).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        let res = f
            .dispatcher
            .dispatch(DispatchRequest::new(Method::GET, "/api/snippets/").header(AUTHORIZATION, "Token nope"))
            .await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.terminal, Terminal::Rejected("authentication_failed"));
    }

    #[tokio::test]
    async fn validation_errors_carry_the_error_map() {
        let f = fixture().await;
        let before = f.storage.calls();
        let req = DispatchRequest::new(Method::POST, "/api/snippets/")
            .header(AUTHORIZATION, "Token alice-token")
            .json(&json!({"title": "toolong"}));
        let res = f.dispatcher.dispatch(req).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.json().unwrap()["error"]["details"], json!({"title": ["exceeds max length 5"]}));
        assert_eq!(f.storage.calls().creates, before.creates);
    }

    #[tokio::test]
    async fn media_types() {
        let f = fixture().await;
        let mut req = DispatchRequest::new(Method::POST, "/api/snippets/").header(AUTHORIZATION, "Token alice-token");
        req = req.header(CONTENT_TYPE, "text/csv");
        req.body = Bytes::from_static(b"title\nx");
        assert_eq!(f.dispatcher.dispatch(req).await.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let req = DispatchRequest::new(Method::GET, "/api/snippets/").header(ACCEPT, "text/html");
        assert_eq!(f.dispatcher.dispatch(req).await.status, StatusCode::NOT_ACCEPTABLE);

        let req = DispatchRequest::new(Method::GET, "/api/snippets/")
            .header(ACCEPT, "text/html")
            .query_pair("format", "json");
        assert_eq!(f.dispatcher.dispatch(req).await.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn cancelled_request_never_writes() {
        let f = fixture().await;
        let token = CancellationToken::new();
        token.cancel();
        let req = DispatchRequest::new(Method::PATCH, "/api/snippets/1/")
            .header(AUTHORIZATION, "Token alice-token")
            .json(&json!({"title": "new"}))
            .cancel_token(token);
        let before = f.storage.calls();
        let res = f.dispatcher.dispatch(req).await;
        assert_eq!(res.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(f.storage.calls().writes(), before.writes());
    }
}
