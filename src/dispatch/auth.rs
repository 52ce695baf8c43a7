//! Authentication chain: each authenticator vouches for an identity, abstains, or fails hard.

use crate::store::{bounded, Query, Storage};
use crate::value::FieldValue;
use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Authenticated identity. `id` is the key of the user record, compared against owner fields.
#[derive(Clone, Debug, PartialEq)]
pub struct Identity {
    pub id: FieldValue,
    pub username: String,
    pub staff: bool,
}

impl Identity {
    pub fn new(id: impl Into<FieldValue>, username: impl Into<String>) -> Self {
        Identity {
            id: id.into(),
            username: username.into(),
            staff: false,
        }
    }

    pub fn staff(mut self) -> Self {
        self.staff = true;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum Actor {
    #[default]
    Anonymous,
    User(Identity),
}

impl Actor {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Actor::User(_))
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Actor::User(identity) => Some(identity),
            Actor::Anonymous => None,
        }
    }

    pub fn is_staff(&self) -> bool {
        self.identity().map(|i| i.staff).unwrap_or(false)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AuthOutcome {
    Authenticated(Actor),
    NoOpinion,
    Failed(String),
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    fn name(&self) -> &str;

    async fn authenticate(&self, headers: &HeaderMap) -> AuthOutcome;
}

/// Run the chain in order. First identity wins, a hard failure stops the chain,
/// and a chain where everyone abstains yields the anonymous actor.
pub async fn authenticate(chain: &[Arc<dyn Authenticator>], headers: &HeaderMap) -> Result<Actor, String> {
    for authenticator in chain {
        match authenticator.authenticate(headers).await {
            AuthOutcome::Authenticated(actor) => {
                tracing::debug!(authenticator = %authenticator.name(), "authenticated");
                return Ok(actor);
            }
            AuthOutcome::Failed(reason) => {
                tracing::warn!(authenticator = %authenticator.name(), reason = %reason, "authentication rejected");
                return Err(reason);
            }
            AuthOutcome::NoOpinion => {}
        }
    }
    Ok(Actor::Anonymous)
}

/// Token from `Authorization: Token <t>` or `Authorization: Bearer <t>`.
/// `Ok(None)` when the header is absent or uses another scheme.
fn token_from_headers(headers: &HeaderMap) -> Result<Option<String>, String> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| "authorization header is not valid text".to_string())?;
    let mut parts = value.trim().splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    if !scheme.eq_ignore_ascii_case("token") && !scheme.eq_ignore_ascii_case("bearer") {
        return Ok(None);
    }
    match parts.next().map(str::trim).filter(|t| !t.is_empty()) {
        Some(token) if !token.contains(' ') => Ok(Some(token.to_string())),
        Some(_) => Err("invalid token header: token string should not contain spaces".into()),
        None => Err("invalid token header: no credentials provided".into()),
    }
}

/// Fixed token table, for service accounts and tests.
#[derive(Clone, Debug, Default)]
pub struct TokenAuthenticator {
    tokens: HashMap<String, Identity>,
}

impl TokenAuthenticator {
    pub fn new() -> Self {
        TokenAuthenticator::default()
    }

    pub fn token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    fn name(&self) -> &str {
        "token"
    }

    async fn authenticate(&self, headers: &HeaderMap) -> AuthOutcome {
        match token_from_headers(headers) {
            Ok(None) => AuthOutcome::NoOpinion,
            Ok(Some(token)) => match self.tokens.get(&token) {
                Some(identity) => AuthOutcome::Authenticated(Actor::User(identity.clone())),
                None => AuthOutcome::Failed("invalid token".into()),
            },
            Err(reason) => AuthOutcome::Failed(reason),
        }
    }
}

/// Looks the token up in a stored record type, e.g. `user.auth_token`.
pub struct RecordTokenAuthenticator {
    storage: Arc<dyn Storage>,
    record_type: String,
    token_field: String,
    username_field: String,
    staff_field: Option<String>,
    timeout: Duration,
}

impl RecordTokenAuthenticator {
    pub fn new(storage: Arc<dyn Storage>, record_type: impl Into<String>, token_field: impl Into<String>) -> Self {
        RecordTokenAuthenticator {
            storage,
            record_type: record_type.into(),
            token_field: token_field.into(),
            username_field: "username".into(),
            staff_field: None,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn username_field(mut self, name: impl Into<String>) -> Self {
        self.username_field = name.into();
        self
    }

    pub fn staff_field(mut self, name: impl Into<String>) -> Self {
        self.staff_field = Some(name.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl RecordTokenAuthenticator {
    /// Tokens are text even when they look numeric.
    fn token_query(&self, token: &str) -> Query {
        Query::new()
            .filter(self.token_field.clone(), FieldValue::Text(token.to_string()))
            .page(1, 0)
    }
}

#[async_trait]
impl Authenticator for RecordTokenAuthenticator {
    fn name(&self) -> &str {
        "record_token"
    }

    async fn authenticate(&self, headers: &HeaderMap) -> AuthOutcome {
        let token = match token_from_headers(headers) {
            Ok(Some(token)) => token,
            Ok(None) => return AuthOutcome::NoOpinion,
            Err(reason) => return AuthOutcome::Failed(reason),
        };
        let query = self.token_query(&token);
        let found = bounded(self.timeout, self.storage.query(&self.record_type, &query)).await;
        match found {
            Ok(mut rows) if !rows.is_empty() => {
                let user = rows.remove(0);
                let username = user
                    .get(&self.username_field)
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                let staff = self
                    .staff_field
                    .as_deref()
                    .and_then(|f| user.get(f))
                    .map(|v| matches!(v, FieldValue::Bool(true)))
                    .unwrap_or(false);
                AuthOutcome::Authenticated(Actor::User(Identity {
                    id: user.key().clone(),
                    username,
                    staff,
                }))
            }
            Ok(_) => AuthOutcome::Failed("invalid token".into()),
            Err(e) => {
                tracing::error!(error = %e, "token lookup failed");
                AuthOutcome::Failed("credentials could not be verified".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordTypeConfig;
    use crate::schema::{RecordTypes, StorageField, StorageKind};
    use crate::store::InMemoryStorage;
    use assert_matches::assert_matches;
    use axum::http::HeaderValue;

    fn headers(auth: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        h
    }

    struct Abstain;

    #[async_trait]
    impl Authenticator for Abstain {
        fn name(&self) -> &str {
            "abstain"
        }

        async fn authenticate(&self, _headers: &HeaderMap) -> AuthOutcome {
            AuthOutcome::NoOpinion
        }
    }

    #[tokio::test]
    async fn chain_first_identity_wins() {
        let tokens = TokenAuthenticator::new().token("abc", Identity::new(FieldValue::Int(1), "alice"));
        let chain: Vec<Arc<dyn Authenticator>> = vec![Arc::new(Abstain), Arc::new(tokens)];
        let actor = authenticate(&chain, &headers("Token abc")).await.unwrap();
        assert_eq!(actor.identity().unwrap().username, "alice");
    }

    #[tokio::test]
    async fn all_abstain_is_anonymous() {
        let chain: Vec<Arc<dyn Authenticator>> = vec![Arc::new(Abstain)];
        assert_eq!(authenticate(&chain, &HeaderMap::new()).await.unwrap(), Actor::Anonymous);
        let tokens: Vec<Arc<dyn Authenticator>> = vec![Arc::new(TokenAuthenticator::new())];
        assert_eq!(authenticate(&tokens, &headers("Basic Zm9v")).await.unwrap(), Actor::Anonymous);
    }

    #[tokio::test]
    async fn unknown_token_fails_hard() {
        let chain: Vec<Arc<dyn Authenticator>> = vec![Arc::new(TokenAuthenticator::new()), Arc::new(Abstain)];
        assert!(authenticate(&chain, &headers("Bearer nope")).await.is_err());
        assert!(authenticate(&chain, &headers("Token")).await.is_err());
    }

    #[tokio::test]
    async fn record_token_lookup() {
        let user = RecordTypeConfig::new("user")
            .field(StorageField::new("id", StorageKind::Integer).with_default())
            .field(StorageField::new("username", StorageKind::String))
            .field(StorageField::new("auth_token", StorageKind::String).unique())
            .field(StorageField::new("is_staff", StorageKind::Boolean));
        let storage = Arc::new(InMemoryStorage::new(RecordTypes::new().with(Arc::new(user))));
        let mut fields = crate::value::InternalMap::new();
        fields.insert("username".into(), "root".into());
        fields.insert("auth_token".into(), "s3cret".into());
        fields.insert("is_staff".into(), FieldValue::Bool(true));
        storage.seed("user", fields).await.unwrap();
        let auth = RecordTokenAuthenticator::new(storage, "user", "auth_token").staff_field("is_staff");
        let outcome = auth.authenticate(&headers("Token s3cret")).await;
        assert_matches!(outcome, AuthOutcome::Authenticated(Actor::User(ref i)) if i.staff && i.username == "root");
        assert_matches!(auth.authenticate(&headers("Token other")).await, AuthOutcome::Failed(_));
        assert_eq!(
            auth.token_query("00123").filters,
            [("auth_token".to_string(), FieldValue::Text("00123".into()))]
        );
    }
}
