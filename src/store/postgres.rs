//! PostgreSQL storage over sqlx. Tables must already exist; many-to-many fields are
//! stored as a `jsonb` array of target keys.

use crate::schema::{RecordTypes, StorageKind};
use crate::sql::{self, Column, PgBindValue, QueryBuf, Table};
use crate::store::{Query, Storage, StorageError, UnitOfWork};
use crate::value::{FieldValue, InternalMap, Record};
use async_trait::async_trait;
use sqlx::error::ErrorKind;
use sqlx::postgres::{PgDatabaseError, PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::HashMap;
use std::sync::Arc;

const DEFAULT_SCHEMA: &str = "public";

#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
    tables: Arc<HashMap<String, Table>>,
}

impl PgStorage {
    pub fn new(pool: PgPool, types: &RecordTypes) -> Self {
        PgStorage::with_schema(pool, types, DEFAULT_SCHEMA)
    }

    /// Record types without an explicit namespace live in `schema`.
    pub fn with_schema(pool: PgPool, types: &RecordTypes, schema: &str) -> Self {
        let tables = types
            .iter()
            .map(|rt| {
                let table = Table::from_record_type(rt.as_ref(), types, schema);
                (table.type_name.clone(), table)
            })
            .collect();
        PgStorage {
            pool,
            tables: Arc::new(tables),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn table(&self, type_name: &str) -> Result<&Table, StorageError> {
        self.tables
            .get(type_name)
            .ok_or_else(|| StorageError::UnknownType(type_name.to_string()))
    }
}

async fn fetch<'c, E>(executor: E, table: &Table, q: &QueryBuf) -> Result<Vec<Record>, StorageError>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(PgBindValue::from(p));
    }
    let rows = query
        .fetch_all(executor)
        .await
        .map_err(|e| db_error(table, e))?;
    rows.iter().map(|row| row_to_record(table, row)).collect()
}

fn row_to_record(table: &Table, row: &PgRow) -> Result<Record, StorageError> {
    let mut fields = InternalMap::new();
    for column in &table.columns {
        fields.insert(column.name.clone(), cell_to_value(row, column)?);
    }
    Ok(Record::new(table.type_name.clone(), table.primary_key.clone(), fields))
}

fn cell_to_value(row: &PgRow, column: &Column) -> Result<FieldValue, StorageError> {
    let name = column.name.as_str();
    let decode = |e: sqlx::Error| StorageError::Internal(format!("decode column {}: {}", name, e));
    let value = match (&column.kind, column.cast) {
        (StorageKind::Integer | StorageKind::BigInt, _) | (StorageKind::ForeignKey, "bigint") => {
            match row.try_get::<Option<i64>, _>(name) {
                Ok(v) => v.map(FieldValue::Int),
                Err(_) => row.try_get::<Option<i32>, _>(name).map_err(decode)?.map(|n| FieldValue::Int(n.into())),
            }
        }
        (StorageKind::Float, _) => match row.try_get::<Option<f64>, _>(name) {
            Ok(v) => v.map(FieldValue::Float),
            Err(_) => row.try_get::<Option<f32>, _>(name).map_err(decode)?.map(|n| FieldValue::Float(n.into())),
        },
        (StorageKind::Boolean, _) => row.try_get::<Option<bool>, _>(name).map_err(decode)?.map(FieldValue::Bool),
        (StorageKind::Timestamp, _) => match row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
            Ok(v) => v.map(FieldValue::DateTime),
            Err(_) => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(name)
                .map_err(decode)?
                .map(|d| FieldValue::DateTime(d.and_utc())),
        },
        (StorageKind::Uuid, _) | (StorageKind::ForeignKey, "uuid") => {
            row.try_get::<Option<uuid::Uuid>, _>(name).map_err(decode)?.map(FieldValue::Uuid)
        }
        (StorageKind::ManyToMany, _) => row
            .try_get::<Option<serde_json::Value>, _>(name)
            .map_err(decode)?
            .map(|v| FieldValue::from_json(&v)),
        _ => row.try_get::<Option<String>, _>(name).map_err(decode)?.map(FieldValue::Text),
    };
    Ok(value.unwrap_or(FieldValue::Null))
}

/// Attribute a constraint named `<table>_<column>_key` / `_fkey` to its column.
fn constrained_column(table: &Table, constraint: &str) -> Option<String> {
    let rest = constraint.strip_prefix(&format!("{}_", table.name))?;
    let column = rest
        .strip_suffix("_fkey")
        .or_else(|| rest.strip_suffix("_key"))
        .or_else(|| rest.strip_suffix("_check"))?;
    table.column(column).map(|c| c.name.clone())
}

fn db_error(table: &Table, e: sqlx::Error) -> StorageError {
    let sqlx::Error::Database(db) = &e else {
        return StorageError::from(e);
    };
    let field = match db.kind() {
        ErrorKind::NotNullViolation => db
            .try_downcast_ref::<PgDatabaseError>()
            .and_then(|pg| pg.column())
            .map(String::from),
        ErrorKind::UniqueViolation | ErrorKind::ForeignKeyViolation | ErrorKind::CheckViolation => {
            db.constraint().and_then(|c| constrained_column(table, c))
        }
        _ => return StorageError::from(e),
    };
    let message = match (db.kind(), &field) {
        (ErrorKind::UniqueViolation, Some(f)) => format!("{} with this {} already exists", table.type_name, f),
        (ErrorKind::ForeignKeyViolation, Some(_)) => "invalid key: object does not exist".to_string(),
        (ErrorKind::NotNullViolation, Some(_)) => "this field may not be null".to_string(),
        _ => db.message().to_string(),
    };
    StorageError::Constraint { field, message }
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StorageError::NotFound,
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => StorageError::Unavailable(e.to_string()),
            sqlx::Error::Database(db) if !matches!(db.kind(), ErrorKind::Other) => StorageError::Constraint {
                field: None,
                message: db.message().to_string(),
            },
            other => StorageError::Internal(other.to_string()),
        }
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn get(&self, type_name: &str, key: &FieldValue) -> Result<Option<Record>, StorageError> {
        let table = self.table(type_name)?;
        let q = sql::select_by_key(table, key);
        Ok(fetch(&self.pool, table, &q).await?.into_iter().next())
    }

    async fn query(&self, type_name: &str, query: &Query) -> Result<Vec<Record>, StorageError> {
        let table = self.table(type_name)?;
        let q = sql::select_list(table, &query.filters, query.limit, query.offset);
        fetch(&self.pool, table, &q).await
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StorageError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork {
            storage: self.clone(),
            tx,
        }))
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgUnitOfWork {
    storage: PgStorage,
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn create(&mut self, type_name: &str, fields: InternalMap) -> Result<Record, StorageError> {
        let table = self.storage.table(type_name)?;
        let q = sql::insert(table, &fields);
        fetch(&mut *self.tx, table, &q)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::Internal("insert returned no row".into()))
    }

    async fn update(&mut self, record: &Record, fields: InternalMap) -> Result<Record, StorageError> {
        let table = self.storage.table(&record.type_name)?;
        let q = sql::update(table, record.key(), &fields);
        fetch(&mut *self.tx, table, &q)
            .await?
            .into_iter()
            .next()
            .ok_or(StorageError::NotFound)
    }

    async fn delete(&mut self, record: &Record) -> Result<(), StorageError> {
        let table = self.storage.table(&record.type_name)?;
        let q = sql::delete(table, record.key());
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from(p));
        }
        let deleted = query
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error(table, e))?;
        deleted.map(|_| ()).ok_or(StorageError::NotFound)
    }

    async fn query(&mut self, type_name: &str, query: &Query) -> Result<Vec<Record>, StorageError> {
        let table = self.storage.table(type_name)?;
        let q = sql::select_list(table, &query.filters, query.limit, query.offset);
        fetch(&mut *self.tx, table, &q).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordTypeConfig;
    use crate::schema::StorageField;

    #[test]
    fn constraint_names_map_to_columns() {
        let rt = RecordTypeConfig::new("snippet")
            .table("snippets")
            .field(StorageField::new("id", StorageKind::Integer))
            .field(StorageField::new("title", StorageKind::String).unique())
            .field(StorageField::relation("owner_id", StorageKind::ForeignKey, "user"));
        let types = RecordTypes::new().with(Arc::new(rt.clone()));
        let table = Table::from_record_type(&rt, &types, DEFAULT_SCHEMA);
        assert_eq!(constrained_column(&table, "snippets_title_key").as_deref(), Some("title"));
        assert_eq!(constrained_column(&table, "snippets_owner_id_fkey").as_deref(), Some("owner_id"));
        assert_eq!(constrained_column(&table, "snippets_title_owner_id_key"), None);
        assert_eq!(constrained_column(&table, "other_title_key"), None);
    }

    #[test]
    fn pool_errors_are_unavailable() {
        assert!(matches!(StorageError::from(sqlx::Error::PoolTimedOut), StorageError::Unavailable(_)));
        assert_eq!(StorageError::from(sqlx::Error::RowNotFound), StorageError::NotFound);
    }
}
