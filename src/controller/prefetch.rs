//! Loads related records onto instances so egress never touches storage.

use crate::schema::{FieldKind, RecordTypes, Relation, Schema};
use crate::store::{bounded, Query, Storage, StorageError};
use crate::value::{FieldValue, Record, Related};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

type PrefetchFuture<'b> = Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + 'b>>;

/// Walks a schema and attaches what it needs: dotted source paths, nested
/// fields (recursively) and reverse relations.
pub struct Prefetcher<'a> {
    storage: &'a dyn Storage,
    types: &'a RecordTypes,
    timeout: Duration,
}

impl<'a> Prefetcher<'a> {
    pub fn new(storage: &'a dyn Storage, types: &'a RecordTypes, timeout: Duration) -> Self {
        Prefetcher { storage, types, timeout }
    }

    pub async fn prefetch_all(&self, schema: &Schema, records: &mut [Record]) -> Result<(), StorageError> {
        for record in records.iter_mut() {
            self.prefetch(schema, record).await?;
        }
        Ok(())
    }

    pub fn prefetch<'b>(&'b self, schema: &'b Schema, record: &'b mut Record) -> PrefetchFuture<'b> {
        Box::pin(async move {
            for field in schema.fields().iter().filter(|f| !f.write_only) {
                let (owner_path, last) = match field.source.rsplit_once('.') {
                    Some((prefix, last)) => (Some(prefix), last),
                    None => (None, field.source.as_str()),
                };
                if let Some(prefix) = owner_path {
                    self.load_path(record, prefix).await?;
                }
                match &field.kind {
                    FieldKind::Computed | FieldKind::Scalar(_) => {}
                    FieldKind::Related { relation: Relation::Forward, .. } => {}
                    FieldKind::Related {
                        target,
                        many,
                        relation: Relation::Reverse { foreign_field },
                    } => {
                        let Some(owner) = walk_mut(record, owner_path) else { continue };
                        if owner.related.contains_key(last) {
                            continue;
                        }
                        let rows = self.reverse(target, foreign_field, owner.key()).await?;
                        owner.related.insert(last.to_string(), collect(rows, *many));
                    }
                    FieldKind::Nested { schema: nested, many, relation } => {
                        let Some(owner) = walk_mut(record, owner_path) else { continue };
                        let mut rows = match relation {
                            Relation::Forward => self.forward(nested.type_name(), owner.get(last)).await?,
                            Relation::Reverse { foreign_field } => {
                                self.reverse(nested.type_name(), foreign_field, owner.key()).await?
                            }
                        };
                        for row in rows.iter_mut() {
                            self.prefetch(nested, row).await?;
                        }
                        owner.related.insert(last.to_string(), collect(rows, *many));
                    }
                }
            }
            Ok(())
        })
    }

    /// Attach each to-one relation along `path` (`owner`, `owner.team`, ...).
    async fn load_path(&self, record: &mut Record, path: &str) -> Result<(), StorageError> {
        let mut current = record;
        for segment in path.split('.') {
            if !current.related.contains_key(segment) {
                let target = self
                    .types
                    .get(&current.type_name)
                    .and_then(|rt| rt.field(segment))
                    .and_then(|f| f.target.clone());
                let Some(target) = target else {
                    return Ok(());
                };
                let mut rows = self.forward(&target, current.get(segment)).await?;
                let related = if rows.is_empty() {
                    Related::One(None)
                } else {
                    Related::One(Some(Box::new(rows.remove(0))))
                };
                current.related.insert(segment.to_string(), related);
            }
            match current.related.get_mut(segment) {
                Some(Related::One(Some(next))) => current = next.as_mut(),
                _ => return Ok(()),
            }
        }
        Ok(())
    }

    /// Records addressed by a stored key or list of keys. Dangling keys are skipped.
    async fn forward(&self, target: &str, keys: Option<&FieldValue>) -> Result<Vec<Record>, StorageError> {
        let keys: Vec<FieldValue> = match keys {
            None | Some(FieldValue::Null) => Vec::new(),
            Some(FieldValue::List(items)) => items.clone(),
            Some(key) => vec![key.clone()],
        };
        let mut out = Vec::with_capacity(keys.len());
        for key in keys.iter().filter(|k| !k.is_null()) {
            if let Some(row) = bounded(self.timeout, self.storage.get(target, key)).await? {
                out.push(row);
            }
        }
        Ok(out)
    }

    async fn reverse(&self, target: &str, foreign_field: &str, key: &FieldValue) -> Result<Vec<Record>, StorageError> {
        if key.is_null() {
            return Ok(Vec::new());
        }
        let query = Query::new().filter(foreign_field, key.clone());
        bounded(self.timeout, self.storage.query(target, &query)).await
    }
}

fn collect(mut rows: Vec<Record>, many: bool) -> Related {
    if many {
        Related::Many(rows)
    } else if rows.is_empty() {
        Related::One(None)
    } else {
        Related::One(Some(Box::new(rows.remove(0))))
    }
}

fn walk_mut<'r>(record: &'r mut Record, path: Option<&str>) -> Option<&'r mut Record> {
    let mut current = record;
    if let Some(path) = path {
        for segment in path.split('.') {
            match current.related.get_mut(segment) {
                Some(Related::One(Some(next))) => current = next.as_mut(),
                _ => return None,
            }
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordTypeConfig;
    use crate::schema::{resolve, Declaration, FieldDescriptor, StorageField, StorageKind};
    use crate::store::InMemoryStorage;
    use crate::transform::to_representation;
    use crate::value::InternalMap;
    use serde_json::json;
    use std::sync::Arc;

    fn types() -> RecordTypes {
        let user = RecordTypeConfig::new("user")
            .field(StorageField::new("id", StorageKind::Integer).with_default())
            .field(StorageField::new("username", StorageKind::String));
        let snippet = RecordTypeConfig::new("snippet")
            .field(StorageField::new("id", StorageKind::Integer).with_default())
            .field(StorageField::new("title", StorageKind::String))
            .field(StorageField::relation("owner", StorageKind::ForeignKey, "user"));
        RecordTypes::new().with(Arc::new(user)).with(Arc::new(snippet))
    }

    async fn seeded() -> (InMemoryStorage, Record) {
        let storage = InMemoryStorage::new(types());
        let mut u = InternalMap::new();
        u.insert("username".into(), "ada".into());
        let user = storage.seed("user", u).await.unwrap();
        for title in ["one", "two"] {
            let mut s = InternalMap::new();
            s.insert("title".into(), title.into());
            s.insert("owner".into(), user.key().clone());
            storage.seed("snippet", s).await.unwrap();
        }
        (storage, user)
    }

    #[tokio::test]
    async fn dotted_source_and_reverse_relation() {
        let (storage, user) = seeded().await;
        let types = types();
        let prefetcher = Prefetcher::new(&storage, &types, Duration::from_secs(1));

        let snippet_schema = resolve(
            types.get("snippet").unwrap().as_ref(),
            &Declaration::new("snippets").field(FieldDescriptor::string("owner_name").source("owner.username").read_only()),
        )
        .unwrap();
        let mut snippets = storage.query("snippet", &Query::new()).await.unwrap();
        prefetcher.prefetch_all(&snippet_schema, &mut snippets).await.unwrap();
        assert_eq!(to_representation(&snippet_schema, &snippets[0])["owner_name"], json!("ada"));

        let user_schema = resolve(
            types.get("user").unwrap().as_ref(),
            &Declaration::new("users").field(FieldDescriptor::related_many("snippets", "snippet").reverse("owner").read_only()),
        )
        .unwrap();
        let mut user = user;
        prefetcher.prefetch(&user_schema, &mut user).await.unwrap();
        assert_eq!(to_representation(&user_schema, &user)["snippets"], json!([1, 2]));
    }

    #[tokio::test]
    async fn nested_forward_is_rendered() {
        let (storage, _) = seeded().await;
        let types = types();
        let prefetcher = Prefetcher::new(&storage, &types, Duration::from_secs(1));
        let owner = Arc::new(resolve(types.get("user").unwrap().as_ref(), &Declaration::new("owner")).unwrap());
        let schema = resolve(
            types.get("snippet").unwrap().as_ref(),
            &Declaration::new("snippet-detail").field(FieldDescriptor::nested("owner", owner).read_only()),
        )
        .unwrap();
        let mut snippet = storage.get("snippet", &FieldValue::Int(1)).await.unwrap().unwrap();
        prefetcher.prefetch(&schema, &mut snippet).await.unwrap();
        assert_eq!(
            to_representation(&schema, &snippet)["owner"],
            json!({"id": 1, "username": "ada"})
        );
    }
}
