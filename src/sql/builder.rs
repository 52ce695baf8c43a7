//! Builds parameterized INSERT, SELECT, UPDATE, DELETE from a record type.

use crate::schema::{RecordType, RecordTypes, StorageKind};
use crate::value::{FieldValue, InternalMap};

/// Quote identifier for PostgreSQL (safe: only from config).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<FieldValue>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: FieldValue) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }
}

/// PostgreSQL type a storage kind is cast to when bound.
fn pg_type(kind: &StorageKind) -> &'static str {
    match kind {
        StorageKind::String | StorageKind::Text | StorageKind::Other(_) => "text",
        StorageKind::Integer | StorageKind::BigInt => "bigint",
        StorageKind::Float => "double precision",
        StorageKind::Boolean => "boolean",
        StorageKind::Timestamp => "timestamptz",
        StorageKind::Uuid => "uuid",
        StorageKind::ForeignKey => "bigint",
        StorageKind::ManyToMany => "jsonb",
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub kind: StorageKind,
    /// Cast applied to placeholders and, for foreign keys, the target key's type.
    pub cast: &'static str,
    pub has_default: bool,
}

/// A record type flattened for SQL generation.
#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    pub type_name: String,
    pub schema: String,
    pub name: String,
    pub primary_key: String,
    pub columns: Vec<Column>,
}

impl Table {
    /// Foreign keys take the cast of the target's primary key.
    pub fn from_record_type(rt: &dyn RecordType, types: &RecordTypes, default_schema: &str) -> Table {
        let columns = rt
            .fields()
            .iter()
            .map(|f| {
                let cast = match (&f.kind, f.target.as_deref().and_then(|t| types.get(t))) {
                    (StorageKind::ForeignKey, Some(target)) => target
                        .field(target.primary_key())
                        .map(|pk| pg_type(&pk.kind))
                        .unwrap_or("bigint"),
                    (kind, _) => pg_type(kind),
                };
                Column {
                    name: f.name.clone(),
                    kind: f.kind.clone(),
                    cast,
                    has_default: f.has_default,
                }
            })
            .collect();
        Table {
            type_name: rt.type_name().to_string(),
            schema: rt.namespace().unwrap_or(default_schema).to_string(),
            name: rt.storage_name().to_string(),
            primary_key: rt.primary_key().to_string(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn qualified(&self) -> String {
        qualified_table(&self.schema, &self.name)
    }

    fn key_cast(&self) -> &'static str {
        self.column(&self.primary_key).map(|c| c.cast).unwrap_or("text")
    }

    /// Placeholder with the column's cast: `$n::type`.
    fn placeholder(&self, q: &mut QueryBuf, column: &Column, value: FieldValue) -> String {
        let n = q.push_param(value);
        format!("${}::{}", n, column.cast)
    }
}

/// SELECT list in storage field order.
fn select_column_list(table: &Table) -> String {
    table
        .columns
        .iter()
        .map(|c| quoted(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// SELECT by primary key.
pub fn select_by_key(table: &Table, key: &FieldValue) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(key.clone());
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} = ${}::{}",
        select_column_list(table),
        table.qualified(),
        quoted(&table.primary_key),
        n,
        table.key_cast()
    );
    q
}

/// SELECT list with exact-match filters, ORDER BY pk, optional LIMIT/OFFSET.
/// Filters on unknown columns are skipped; many-to-many filters test containment.
pub fn select_list(table: &Table, filters: &[(String, FieldValue)], limit: Option<usize>, offset: usize) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut where_parts = Vec::new();
    for (col, val) in filters {
        let Some(column) = table.column(col) else { continue };
        if val.is_null() {
            where_parts.push(format!("{} IS NULL", quoted(col)));
        } else if column.kind == StorageKind::ManyToMany {
            let n = q.push_param(FieldValue::List(vec![val.clone()]));
            where_parts.push(format!("{} @> ${}::jsonb", quoted(col), n));
        } else {
            let ph = table.placeholder(&mut q, column, val.clone());
            where_parts.push(format!("{} = {}", quoted(col), ph));
        }
    }
    let where_clause = if where_parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_parts.join(" AND "))
    };
    let limit_clause = limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = if offset > 0 { format!(" OFFSET {}", offset) } else { String::new() };
    q.sql = format!(
        "SELECT {} FROM {}{} ORDER BY {}{}{}",
        select_column_list(table),
        table.qualified(),
        where_clause,
        quoted(&table.primary_key),
        limit_clause,
        offset_clause
    );
    q
}

/// INSERT the given fields. Columns with a storage default are omitted when absent or null
/// so the database fills them.
pub fn insert(table: &Table, fields: &InternalMap) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for c in &table.columns {
        let val = fields.get(&c.name).cloned().unwrap_or(FieldValue::Null);
        if val.is_null() && c.has_default {
            continue;
        }
        if val.is_null() && !fields.contains_key(&c.name) {
            continue;
        }
        placeholders.push(table.placeholder(&mut q, c, val));
        cols.push(quoted(&c.name));
    }
    q.sql = if cols.is_empty() {
        format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING {}",
            table.qualified(),
            select_column_list(table)
        )
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table.qualified(),
            cols.join(", "),
            placeholders.join(", "),
            select_column_list(table)
        )
    };
    q
}

/// UPDATE by key: SET only known, non-key columns present in `fields`.
pub fn update(table: &Table, key: &FieldValue, fields: &InternalMap) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for (name, value) in fields {
        if *name == table.primary_key {
            continue;
        }
        let Some(c) = table.column(name) else { continue };
        let rhs = table.placeholder(&mut q, c, value.clone());
        sets.push(format!("{} = {}", quoted(name), rhs));
    }
    if sets.is_empty() {
        return select_by_key(table, key);
    }
    let id_param = q.push_param(key.clone());
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = ${}::{} RETURNING {}",
        table.qualified(),
        sets.join(", "),
        quoted(&table.primary_key),
        id_param,
        table.key_cast(),
        select_column_list(table)
    );
    q
}

/// DELETE by key.
pub fn delete(table: &Table, key: &FieldValue) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(key.clone());
    q.sql = format!(
        "DELETE FROM {} WHERE {} = ${}::{} RETURNING {}",
        table.qualified(),
        quoted(&table.primary_key),
        n,
        table.key_cast(),
        quoted(&table.primary_key)
    );
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordTypeConfig;
    use crate::schema::StorageField;
    use std::sync::Arc;

    fn tables() -> (Table, RecordTypes) {
        let user = RecordTypeConfig::new("user")
            .field(StorageField::new("id", StorageKind::Uuid).with_default())
            .field(StorageField::new("username", StorageKind::String));
        let snippet = RecordTypeConfig::new("snippet")
            .table("snippets")
            .field(StorageField::new("id", StorageKind::Integer).with_default())
            .field(StorageField::new("title", StorageKind::String))
            .field(StorageField::new("created", StorageKind::Timestamp).with_default())
            .field(StorageField::relation("owner", StorageKind::ForeignKey, "user"))
            .field(StorageField::relation("tags", StorageKind::ManyToMany, "tag"));
        let types = RecordTypes::new().with(Arc::new(user)).with(Arc::new(snippet.clone()));
        (Table::from_record_type(&snippet, &types, "public"), types)
    }

    #[test]
    fn foreign_key_takes_target_key_cast() {
        let (table, _) = tables();
        assert_eq!(table.column("owner").unwrap().cast, "uuid");
        assert_eq!(table.name, "snippets");
    }

    #[test]
    fn insert_skips_defaulted_columns() {
        let (table, _) = tables();
        let mut fields = InternalMap::new();
        fields.insert("title".into(), "hi".into());
        let q = insert(&table, &fields);
        assert_eq!(
            q.sql,
            "INSERT INTO \"public\".\"snippets\" (\"title\") VALUES ($1::text) RETURNING \"id\", \"title\", \"created\", \"owner\", \"tags\""
        );
        assert_eq!(q.params, vec![FieldValue::from("hi")]);
    }

    #[test]
    fn list_filters_in_order_with_paging() {
        let (table, _) = tables();
        let q = select_list(
            &table,
            &[("title".into(), "a".into()), ("bogus".into(), "x".into()), ("tags".into(), FieldValue::Int(3))],
            Some(10),
            20,
        );
        assert_eq!(
            q.sql,
            "SELECT \"id\", \"title\", \"created\", \"owner\", \"tags\" FROM \"public\".\"snippets\" WHERE \"title\" = $1::text AND \"tags\" @> $2::jsonb ORDER BY \"id\" LIMIT 10 OFFSET 20"
        );
        assert_eq!(q.params.len(), 2);
    }

    #[test]
    fn update_without_columns_reads_back() {
        let (table, _) = tables();
        let q = update(&table, &FieldValue::Int(4), &InternalMap::new());
        assert!(q.sql.starts_with("SELECT"));
        let mut fields = InternalMap::new();
        fields.insert("id".into(), FieldValue::Int(9));
        fields.insert("title".into(), "new".into());
        let q = update(&table, &FieldValue::Int(4), &fields);
        assert_eq!(
            q.sql,
            "UPDATE \"public\".\"snippets\" SET \"title\" = $1::text WHERE \"id\" = $2::bigint RETURNING \"id\", \"title\", \"created\", \"owner\", \"tags\""
        );
    }
}
