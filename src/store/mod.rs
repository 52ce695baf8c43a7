//! Storage collaborator: typed record access plus atomic units of work.

mod memory;
mod postgres;

pub use memory::{CallCounts, InMemoryStorage};
pub use postgres::PgStorage;

use crate::value::{FieldValue, InternalMap, Record};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Unique, foreign-key or not-null violation; `field` is set when one field is to blame.
    #[error("constraint violation: {message}")]
    Constraint { field: Option<String>, message: String },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage call timed out")]
    Timeout,
    #[error("record not found")]
    NotFound,
    #[error("unknown record type: {0}")]
    UnknownType(String),
    #[error("storage: {0}")]
    Internal(String),
}

/// Exact-match filters with limit/offset paging. Every adapter returns rows ordered by
/// primary key (integer keys numerically).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<(String, FieldValue)>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    pub fn filter(mut self, field: impl Into<String>, value: FieldValue) -> Self {
        self.filters.push((field.into(), value));
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, type_name: &str, key: &FieldValue) -> Result<Option<Record>, StorageError>;

    async fn query(&self, type_name: &str, query: &Query) -> Result<Vec<Record>, StorageError>;

    /// Start an atomic unit of work. Dropping it without `commit` discards its writes.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StorageError>;

    async fn ping(&self) -> Result<(), StorageError>;
}

/// Writes that commit or roll back together.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Insert a record; storage fills keys and defaults for absent fields.
    async fn create(&mut self, type_name: &str, fields: InternalMap) -> Result<Record, StorageError>;

    /// Apply `fields` over `record` and return the stored result.
    async fn update(&mut self, record: &Record, fields: InternalMap) -> Result<Record, StorageError>;

    async fn delete(&mut self, record: &Record) -> Result<(), StorageError>;

    async fn query(&mut self, type_name: &str, query: &Query) -> Result<Vec<Record>, StorageError>;

    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}

/// Bound one storage call by `limit`. Expiry is reported, never retried.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(timeout_ms = limit.as_millis() as u64, "storage call timed out");
            Err(StorageError::Timeout)
        }
    }
}

/// Row matches every filter. List-valued fields match when they contain the value.
pub(crate) fn matches_filters(fields: &InternalMap, filters: &[(String, FieldValue)]) -> bool {
    filters.iter().all(|(name, wanted)| match fields.get(name) {
        Some(FieldValue::List(items)) => items.iter().any(|v| v == wanted || v.same_key(wanted)),
        Some(v) => v == wanted || v.same_key(wanted),
        None => wanted.is_null(),
    })
}
