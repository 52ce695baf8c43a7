//! Example consumer: a snippets API served through resource-sdk.
//!
//! Run from repo root: `cargo run -p example-consumer`
//!
//! With `CONFIG_PATH` set, resources come from `record_types.json` / `resources.json`
//! in that directory. Otherwise a built-in snippets/users demo is served.
//! With `DATABASE_URL` set, records live in Postgres (tables must exist); otherwise in memory.

use resource_sdk::controller::ActionInput;
use resource_sdk::dispatch::{IsAuthenticatedOrReadOnly, IsOwnerOrReadOnly, RecordTokenAuthenticator};
use resource_sdk::{
    app, build_resources, load_from_dir, record_types, Actor, AppError, AppState, CustomAction, Declaration,
    Dispatcher, DispatcherConfig, FieldDescriptor, InMemoryStorage, InternalMap, ModelResource, Outcome, PgStorage,
    RecordTypeConfig, RecordTypes, Resource, SchemaRegistry, Settings, Storage, StorageField, StorageKind,
};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;

type BoxError = Box<dyn std::error::Error>;

fn demo_types() -> RecordTypes {
    let user = RecordTypeConfig::new("user")
        .field(StorageField::new("id", StorageKind::Integer).with_default())
        .field(StorageField::new("username", StorageKind::String).max_length(150).unique())
        .field(StorageField::new("auth_token", StorageKind::String).unique())
        .field(StorageField::new("is_staff", StorageKind::Boolean).with_default());
    let snippet = RecordTypeConfig::new("snippet")
        .field(StorageField::new("id", StorageKind::Integer).with_default())
        .field(StorageField::new("created", StorageKind::Timestamp).with_default())
        .field(StorageField::new("title", StorageKind::String).max_length(100).blank())
        .field(StorageField::new("code", StorageKind::Text))
        .field(StorageField::new("language", StorageKind::String).choices(["python", "rust", "text"]))
        .field(StorageField::relation("owner", StorageKind::ForeignKey, "user"));
    RecordTypes::new().with(Arc::new(user)).with(Arc::new(snippet))
}

fn demo_resources(
    types: &RecordTypes,
    storage: Arc<dyn Storage>,
    settings: &Settings,
) -> Result<Vec<Arc<dyn Resource>>, BoxError> {
    let registry = SchemaRegistry::new();
    let snippet_type = types.get("snippet").ok_or("snippet record type missing")?;
    let user_type = types.get("user").ok_or("user record type missing")?;

    let snippet_schema = registry.get_or_resolve(
        snippet_type.as_ref(),
        &Declaration::new("snippets")
            .field(FieldDescriptor::string("owner_name").source("owner.username").read_only())
            .read_only_fields(["owner"]),
    )?;
    let highlight_schema = snippet_schema.clone();
    let snippets = ModelResource::builder("snippets", snippet_schema, storage.clone())
        .record_types(types.clone())
        .settings(settings)
        .filter_fields(["language", "owner"])
        .perform_create(|actor: &Actor| {
            let mut extra = InternalMap::new();
            if let Some(identity) = actor.identity() {
                extra.insert("owner".into(), identity.id.clone());
            }
            extra
        })
        .permissions(vec![Arc::new(IsAuthenticatedOrReadOnly), Arc::new(IsOwnerOrReadOnly::new("owner"))])
        .action(CustomAction::new("highlight", axum::http::Method::GET, true, move |input: ActionInput| {
            let schema = highlight_schema.clone();
            async move {
                let record = input.record.ok_or_else(|| AppError::Internal("no instance".into()))?;
                let code = record.get("code").map(|c| c.to_string()).unwrap_or_default();
                Ok::<_, AppError>(Outcome::Ok(json!({
                    "type": schema.type_name(),
                    "html": format!("<pre>{}</pre>", code),
                })))
            }
        }))
        .build();

    let user_schema = registry.get_or_resolve(
        user_type.as_ref(),
        &Declaration::new("users")
            .exclude(["auth_token"])
            .field(FieldDescriptor::related_many("snippets", "snippet").reverse("owner").read_only()),
    )?;
    let users = ModelResource::builder("users", user_schema, storage)
        .record_types(types.clone())
        .settings(settings)
        .lookup_field("username")
        .read_only()
        .build();

    Ok(vec![Arc::new(snippets), Arc::new(users)])
}

async fn seed_demo(storage: &InMemoryStorage) -> Result<(), BoxError> {
    for (name, token) in [("alice", "alice-token"), ("bob", "bob-token")] {
        let mut fields = InternalMap::new();
        fields.insert("username".into(), name.into());
        fields.insert("auth_token".into(), token.into());
        storage.seed("user", fields).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("resource_sdk=info,example_consumer=info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let config = match std::env::var("CONFIG_PATH") {
        Ok(dir) => Some(load_from_dir(&dir).await?),
        Err(_) => None,
    };
    let types = match &config {
        Some(config) => record_types(config),
        None => demo_types(),
    };

    let storage: Arc<dyn Storage> = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new().max_connections(5).connect(&url).await?;
            Arc::new(PgStorage::new(pool, &types))
        }
        Err(_) => {
            let memory = InMemoryStorage::new(types.clone());
            if config.is_none() {
                seed_demo(&memory).await?;
            }
            Arc::new(memory)
        }
    };

    let (resources, authenticators) = match &config {
        Some(config) => {
            let registry = SchemaRegistry::new();
            let resources = build_resources(config, storage.clone(), &registry, &settings)?
                .into_iter()
                .map(|r| Arc::new(r) as Arc<dyn Resource>)
                .collect();
            (resources, Vec::new())
        }
        None => {
            let auth = RecordTokenAuthenticator::new(storage.clone(), "user", "auth_token")
                .username_field("username")
                .staff_field("is_staff")
                .timeout(settings.storage_timeout);
            let resources = demo_resources(&types, storage.clone(), &settings)?;
            (resources, vec![Arc::new(auth) as Arc<dyn resource_sdk::Authenticator>])
        }
    };

    let dispatcher = Dispatcher::new(
        resources,
        DispatcherConfig {
            settings,
            authenticators,
            ..DispatcherConfig::default()
        },
    )?;
    for entry in dispatcher.table().entries() {
        tracing::info!("{} {} -> {}", entry.method, entry.pattern(), entry.name);
    }

    let app = app(AppState::new(dispatcher, storage));
    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    let port = listener.local_addr()?.port();
    tracing::info!("Example consumer listening on http://127.0.0.1:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}
