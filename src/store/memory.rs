//! In-memory storage with the constraints declared by registered record types.
//!
//! A unit of work holds the write lock for its lifetime and edits a working copy
//! that replaces the committed state on `commit`.

use crate::schema::{RecordType, RecordTypes, StorageKind};
use crate::store::{matches_filters, Query, Storage, StorageError, UnitOfWork};
use crate::value::{FieldValue, InternalMap, Record};
use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

#[derive(Clone, Debug, Default)]
struct Tables {
    rows: HashMap<String, IndexMap<String, InternalMap>>,
    sequences: HashMap<String, i64>,
}

#[derive(Default)]
struct Counters {
    gets: AtomicUsize,
    queries: AtomicUsize,
    begins: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

/// Snapshot of storage calls, for asserting which operations touched storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub gets: usize,
    pub queries: usize,
    pub begins: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

impl CallCounts {
    pub fn writes(&self) -> usize {
        self.creates + self.updates + self.deletes
    }
}

#[derive(Clone)]
pub struct InMemoryStorage {
    types: RecordTypes,
    state: Arc<RwLock<Tables>>,
    counters: Arc<Counters>,
    latency_ms: Arc<AtomicU64>,
}

impl InMemoryStorage {
    pub fn new(types: RecordTypes) -> Self {
        InMemoryStorage {
            types,
            state: Arc::new(RwLock::new(Tables::default())),
            counters: Arc::new(Counters::default()),
            latency_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.counters;
        CallCounts {
            gets: c.gets.load(Ordering::Relaxed),
            queries: c.queries.load(Ordering::Relaxed),
            begins: c.begins.load(Ordering::Relaxed),
            creates: c.creates.load(Ordering::Relaxed),
            updates: c.updates.load(Ordering::Relaxed),
            deletes: c.deletes.load(Ordering::Relaxed),
            commits: c.commits.load(Ordering::Relaxed),
            rollbacks: c.rollbacks.load(Ordering::Relaxed),
        }
    }

    /// Delay every call; used to exercise storage timeouts.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Insert a record outside any unit of work (fixtures, seeding).
    pub async fn seed(&self, type_name: &str, fields: InternalMap) -> Result<Record, StorageError> {
        let mut uow = self.begin().await?;
        let record = uow.create(type_name, fields).await?;
        uow.commit().await?;
        Ok(record)
    }

    async fn delay(&self) {
        let ms = self.latency_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn record_type(&self, type_name: &str) -> Result<Arc<dyn RecordType>, StorageError> {
        self.types
            .get(type_name)
            .cloned()
            .ok_or_else(|| StorageError::UnknownType(type_name.to_string()))
    }
}

fn to_record(rt: &dyn RecordType, fields: &InternalMap) -> Record {
    Record::new(rt.type_name(), rt.primary_key(), fields.clone())
}

fn select(rt: &dyn RecordType, tables: &Tables, query: &Query) -> Vec<Record> {
    let Some(rows) = tables.rows.get(rt.type_name()) else {
        return Vec::new();
    };
    let pk = rt.primary_key();
    let mut matching: Vec<&InternalMap> = rows
        .values()
        .filter(|fields| matches_filters(fields, &query.filters))
        .collect();
    matching.sort_by(|a, b| key_order(a.get(pk), b.get(pk)));
    let limit = query.limit.unwrap_or(usize::MAX);
    matching
        .into_iter()
        .skip(query.offset)
        .take(limit)
        .map(|fields| to_record(rt, fields))
        .collect()
}

/// Integer keys compare numerically, anything else by canonical string.
fn key_order(a: Option<&FieldValue>, b: Option<&FieldValue>) -> std::cmp::Ordering {
    match (a, b) {
        (Some(FieldValue::Int(x)), Some(FieldValue::Int(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
        (x, y) => x.is_some().cmp(&y.is_some()),
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get(&self, type_name: &str, key: &FieldValue) -> Result<Option<Record>, StorageError> {
        self.counters.gets.fetch_add(1, Ordering::Relaxed);
        self.delay().await;
        let rt = self.record_type(type_name)?;
        let tables = self.state.read().await;
        Ok(tables
            .rows
            .get(type_name)
            .and_then(|rows| rows.get(&key.to_string()))
            .map(|fields| to_record(rt.as_ref(), fields)))
    }

    async fn query(&self, type_name: &str, query: &Query) -> Result<Vec<Record>, StorageError> {
        self.counters.queries.fetch_add(1, Ordering::Relaxed);
        self.delay().await;
        let rt = self.record_type(type_name)?;
        let tables = self.state.read().await;
        Ok(select(rt.as_ref(), &tables, query))
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StorageError> {
        self.counters.begins.fetch_add(1, Ordering::Relaxed);
        self.delay().await;
        let guard = self.state.clone().write_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork {
            storage: self.clone(),
            guard,
            working,
        }))
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.delay().await;
        Ok(())
    }
}

struct MemoryUnitOfWork {
    storage: InMemoryStorage,
    guard: OwnedRwLockWriteGuard<Tables>,
    working: Tables,
}

impl MemoryUnitOfWork {
    fn fill_defaults(&mut self, rt: &dyn RecordType, fields: &mut InternalMap) {
        for sf in rt.fields() {
            let present = fields.get(&sf.name).is_some_and(|v| !v.is_null());
            if present || !sf.has_default {
                continue;
            }
            let value = if sf.name == rt.primary_key() {
                match sf.kind {
                    StorageKind::Uuid => FieldValue::Uuid(uuid::Uuid::new_v4()),
                    _ => {
                        let next = self.working.sequences.entry(rt.type_name().to_string()).or_insert(0);
                        *next += 1;
                        FieldValue::Int(*next)
                    }
                }
            } else {
                match sf.kind {
                    StorageKind::Timestamp => FieldValue::DateTime(Utc::now()),
                    StorageKind::Boolean => FieldValue::Bool(false),
                    StorageKind::ManyToMany => FieldValue::List(Vec::new()),
                    _ => FieldValue::Null,
                }
            };
            fields.insert(sf.name.clone(), value);
        }
        // Explicit integer keys advance the sequence so later inserts don't collide.
        if let Some(FieldValue::Int(n)) = fields.get(rt.primary_key()) {
            let seq = self.working.sequences.entry(rt.type_name().to_string()).or_insert(0);
            *seq = (*seq).max(*n);
        }
    }

    fn check_constraints(&self, rt: &dyn RecordType, fields: &InternalMap, own_key: Option<&str>) -> Result<(), StorageError> {
        let rows = self.working.rows.get(rt.type_name());
        for sf in rt.fields() {
            let value = fields.get(&sf.name).unwrap_or(&FieldValue::Null);
            if value.is_null() {
                if !sf.nullable && !sf.has_default && sf.kind != StorageKind::ManyToMany {
                    return Err(StorageError::Constraint {
                        field: Some(sf.name.clone()),
                        message: "this field may not be null".into(),
                    });
                }
                continue;
            }
            if sf.unique || sf.name == rt.primary_key() {
                let taken = rows.is_some_and(|rows| {
                    rows.iter().any(|(key, other)| {
                        Some(key.as_str()) != own_key && other.get(&sf.name).is_some_and(|v| v.same_key(value))
                    })
                });
                if taken {
                    return Err(StorageError::Constraint {
                        field: Some(sf.name.clone()),
                        message: format!("{} with this {} already exists", rt.type_name(), sf.name),
                    });
                }
            }
            if let Some(target) = sf.target.as_deref().filter(|_| sf.kind.is_relation()) {
                let keys: Vec<&FieldValue> = match value {
                    FieldValue::List(items) => items.iter().collect(),
                    single => vec![single],
                };
                let target_rows = self.working.rows.get(target);
                for key in keys {
                    let exists = target_rows.is_some_and(|rows| rows.contains_key(&key.to_string()));
                    if !exists {
                        return Err(StorageError::Constraint {
                            field: Some(sf.name.clone()),
                            message: format!("invalid key \"{}\": object does not exist", key),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Rows of other types whose relation fields still point at `key`.
    fn referenced_by(&self, type_name: &str, key: &FieldValue) -> Option<String> {
        for rt in self.storage.types.iter() {
            for sf in rt.fields().iter().filter(|f| f.target.as_deref() == Some(type_name)) {
                let Some(rows) = self.working.rows.get(rt.type_name()) else {
                    continue;
                };
                let hit = rows.values().any(|fields| match fields.get(&sf.name) {
                    Some(FieldValue::List(items)) => items.iter().any(|v| v.same_key(key)),
                    Some(v) => v.same_key(key),
                    None => false,
                });
                if hit {
                    return Some(format!("{}.{}", rt.type_name(), sf.name));
                }
            }
        }
        None
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn create(&mut self, type_name: &str, mut fields: InternalMap) -> Result<Record, StorageError> {
        self.storage.counters.creates.fetch_add(1, Ordering::Relaxed);
        self.storage.delay().await;
        let rt = self.storage.record_type(type_name)?;
        fields.retain(|name, _| rt.field(name).is_some());
        self.fill_defaults(rt.as_ref(), &mut fields);
        self.check_constraints(rt.as_ref(), &fields, None)?;
        let key = fields.get(rt.primary_key()).cloned().unwrap_or(FieldValue::Null).to_string();
        // Keep storage field order regardless of payload order.
        let ordered: InternalMap = rt
            .fields()
            .iter()
            .map(|sf| (sf.name.clone(), fields.get(&sf.name).cloned().unwrap_or(FieldValue::Null)))
            .collect();
        self.working
            .rows
            .entry(type_name.to_string())
            .or_default()
            .insert(key, ordered.clone());
        Ok(to_record(rt.as_ref(), &ordered))
    }

    async fn update(&mut self, record: &Record, fields: InternalMap) -> Result<Record, StorageError> {
        self.storage.counters.updates.fetch_add(1, Ordering::Relaxed);
        self.storage.delay().await;
        let rt = self.storage.record_type(&record.type_name)?;
        let key = record.key().to_string();
        let mut current = self
            .working
            .rows
            .get(&record.type_name)
            .and_then(|rows| rows.get(&key))
            .cloned()
            .ok_or(StorageError::NotFound)?;
        for (name, value) in fields {
            if rt.field(&name).is_some() && name != rt.primary_key() {
                current.insert(name, value);
            }
        }
        self.check_constraints(rt.as_ref(), &current, Some(&key))?;
        if let Some(rows) = self.working.rows.get_mut(&record.type_name) {
            rows.insert(key, current.clone());
        }
        Ok(to_record(rt.as_ref(), &current))
    }

    async fn delete(&mut self, record: &Record) -> Result<(), StorageError> {
        self.storage.counters.deletes.fetch_add(1, Ordering::Relaxed);
        self.storage.delay().await;
        let key = record.key().to_string();
        let removed = self
            .working
            .rows
            .get_mut(&record.type_name)
            .and_then(|rows| rows.shift_remove(&key));
        if removed.is_none() {
            return Err(StorageError::NotFound);
        }
        if let Some(referrer) = self.referenced_by(&record.type_name, record.key()) {
            return Err(StorageError::Constraint {
                field: None,
                message: format!("{} {} is still referenced by {}", record.type_name, key, referrer),
            });
        }
        Ok(())
    }

    async fn query(&mut self, type_name: &str, query: &Query) -> Result<Vec<Record>, StorageError> {
        self.storage.counters.queries.fetch_add(1, Ordering::Relaxed);
        let rt = self.storage.record_type(type_name)?;
        Ok(select(rt.as_ref(), &self.working, query))
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let MemoryUnitOfWork {
            storage,
            mut guard,
            working,
        } = *self;
        storage.counters.commits.fetch_add(1, Ordering::Relaxed);
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        self.storage.counters.rollbacks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordTypeConfig;
    use crate::schema::StorageField;
    use assert_matches::assert_matches;

    fn storage() -> InMemoryStorage {
        let user = RecordTypeConfig::new("user")
            .field(StorageField::new("id", StorageKind::Integer).with_default())
            .field(StorageField::new("username", StorageKind::String).unique());
        let snippet = RecordTypeConfig::new("snippet")
            .field(StorageField::new("id", StorageKind::Integer).with_default())
            .field(StorageField::new("title", StorageKind::String).blank())
            .field(StorageField::relation("owner", StorageKind::ForeignKey, "user"));
        InMemoryStorage::new(RecordTypes::new().with(Arc::new(user)).with(Arc::new(snippet)))
    }

    fn map(pairs: &[(&str, FieldValue)]) -> InternalMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn create_assigns_sequential_keys() {
        let s = storage();
        let a = s.seed("user", map(&[("username", "ada".into())])).await.unwrap();
        let b = s.seed("user", map(&[("username", "bob".into())])).await.unwrap();
        assert_eq!(a.key(), &FieldValue::Int(1));
        assert_eq!(b.key(), &FieldValue::Int(2));
        assert_eq!(s.get("user", &FieldValue::from("2")).await.unwrap().unwrap().get("username"), Some(&"bob".into()));
    }

    #[tokio::test]
    async fn unique_and_foreign_key_violations_name_the_field() {
        let s = storage();
        s.seed("user", map(&[("username", "ada".into())])).await.unwrap();
        assert_matches!(
            s.seed("user", map(&[("username", "ada".into())])).await,
            Err(StorageError::Constraint { field: Some(f), .. }) if f == "username"
        );
        assert_matches!(
            s.seed("snippet", map(&[("title", "x".into()), ("owner", FieldValue::Int(99))])).await,
            Err(StorageError::Constraint { field: Some(f), .. }) if f == "owner"
        );
    }

    #[tokio::test]
    async fn dropped_unit_of_work_discards_writes() {
        let s = storage();
        {
            let mut uow = s.begin().await.unwrap();
            uow.create("user", map(&[("username", "ada".into())])).await.unwrap();
        }
        assert!(s.query("user", &Query::new()).await.unwrap().is_empty());
        assert_eq!(s.calls().creates, 1);
        assert_eq!(s.calls().commits, 0);
    }

    #[tokio::test]
    async fn delete_of_referenced_row_conflicts() {
        let s = storage();
        let ada = s.seed("user", map(&[("username", "ada".into())])).await.unwrap();
        s.seed("snippet", map(&[("title", "x".into()), ("owner", ada.key().clone())]))
            .await
            .unwrap();
        let mut uow = s.begin().await.unwrap();
        assert_matches!(uow.delete(&ada).await, Err(StorageError::Constraint { field: None, .. }));
    }

    #[tokio::test]
    async fn query_filters_and_pages() {
        let s = storage();
        let ada = s.seed("user", map(&[("username", "ada".into())])).await.unwrap();
        for title in ["a", "b", "c"] {
            s.seed("snippet", map(&[("title", title.into()), ("owner", ada.key().clone())]))
                .await
                .unwrap();
        }
        let page = s.query("snippet", &Query::new().filter("owner", FieldValue::from("1")).page(2, 1)).await.unwrap();
        let titles: Vec<_> = page.iter().map(|r| r.get("title").unwrap().to_string()).collect();
        assert_eq!(titles, ["b", "c"]);
    }

    #[tokio::test]
    async fn query_orders_by_primary_key() {
        let s = storage();
        for (id, name) in [(10, "ten"), (2, "two")] {
            s.seed("user", map(&[("id", FieldValue::Int(id)), ("username", name.into())]))
                .await
                .unwrap();
        }
        let rows = s.query("user", &Query::new()).await.unwrap();
        let keys: Vec<_> = rows.iter().map(|r| r.key().clone()).collect();
        assert_eq!(keys, [FieldValue::Int(2), FieldValue::Int(10)]);
    }
}
