//! Typed internal values, wire payloads and record instances.

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;

/// Inbound wire data (raw payload) or outbound wire data (representation).
pub type Payload = serde_json::Map<String, Value>;

/// Ordered field name -> typed value.
pub type InternalMap = IndexMap<String, FieldValue>;

/// A normalized, type-checked value held by internal maps and records.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(DateTime<Utc>),
    Uuid(uuid::Uuid),
    List(Vec<FieldValue>),
    Map(InternalMap),
}

static NULL: FieldValue = FieldValue::Null;

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&InternalMap> {
        match self {
            FieldValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Two values identify the same record when their canonical key strings match
    /// (a path segment "7" and a stored integer 7 address the same row).
    pub fn same_key(&self, other: &FieldValue) -> bool {
        !self.is_null() && !other.is_null() && self.to_string() == other.to_string()
    }

    /// Inverse coercion used by egress: datetimes become RFC 3339 strings, uuids
    /// hyphenated strings, maps and lists recurse.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Int(n) => Value::Number((*n).into()),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::DateTime(d) => Value::String(d.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            FieldValue::Uuid(u) => Value::String(u.to_string()),
            FieldValue::List(v) => Value::Array(v.iter().map(FieldValue::to_json).collect()),
            FieldValue::Map(m) => Value::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Untyped conversion for values that never pass through a field descriptor
    /// (server-assigned extras, storage rows without a declared kind).
    pub fn from_json(v: &Value) -> FieldValue {
        match v {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Int(i),
                None => n.as_f64().map(FieldValue::Float).unwrap_or(FieldValue::Null),
            },
            Value::String(s) => FieldValue::Text(s.clone()),
            Value::Array(a) => FieldValue::List(a.iter().map(FieldValue::from_json).collect()),
            Value::Object(o) => FieldValue::Map(
                o.iter()
                    .map(|(k, v)| (k.clone(), FieldValue::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(n) => write!(f, "{}", n),
            FieldValue::Float(n) => write!(f, "{}", n),
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::DateTime(d) => write!(f, "{}", d.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            FieldValue::Uuid(u) => write!(f, "{}", u),
            FieldValue::List(_) | FieldValue::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Int(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

/// Related instances prefetched onto a record so egress can stay pure.
#[derive(Clone, Debug, PartialEq)]
pub enum Related {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
}

/// A stored record instance.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub type_name: String,
    /// Name of the field holding the record's identity.
    pub primary_key: String,
    pub fields: InternalMap,
    pub related: IndexMap<String, Related>,
}

impl Record {
    pub fn new(type_name: impl Into<String>, primary_key: impl Into<String>, fields: InternalMap) -> Self {
        Record {
            type_name: type_name.into(),
            primary_key: primary_key.into(),
            fields,
            related: IndexMap::new(),
        }
    }

    pub fn key(&self) -> &FieldValue {
        self.fields.get(&self.primary_key).unwrap_or(&NULL)
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn with_related(mut self, name: impl Into<String>, related: Related) -> Self {
        self.related.insert(name.into(), related);
        self
    }

    /// Value at a dotted source path; intermediate segments walk to-one relations.
    pub fn resolve_value(&self, path: &str) -> Option<&FieldValue> {
        let (owner, last) = self.walk(path)?;
        owner.fields.get(last)
    }

    /// Prefetched relation at a dotted source path.
    pub fn resolve_related(&self, path: &str) -> Option<&Related> {
        let (owner, last) = self.walk(path)?;
        owner.related.get(last)
    }

    fn walk<'a, 'p>(&'a self, path: &'p str) -> Option<(&'a Record, &'p str)> {
        let mut current = self;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                return Some((current, segment));
            }
            match current.related.get(segment)? {
                Related::One(Some(next)) => current = next,
                _ => return None,
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn user() -> Record {
        let mut fields = InternalMap::new();
        fields.insert("id".into(), FieldValue::Int(1));
        fields.insert("username".into(), "ada".into());
        Record::new("user", "id", fields)
    }

    #[test]
    fn dotted_path_walks_prefetched_relation() {
        let mut fields = InternalMap::new();
        fields.insert("id".into(), FieldValue::Int(9));
        fields.insert("owner".into(), FieldValue::Int(1));
        let snippet = Record::new("snippet", "id", fields)
            .with_related("owner", Related::One(Some(Box::new(user()))));
        assert_eq!(snippet.resolve_value("owner.username"), Some(&FieldValue::from("ada")));
        assert_eq!(snippet.resolve_value("owner"), Some(&FieldValue::Int(1)));
        assert_eq!(snippet.resolve_value("missing.username"), None);
    }

    #[test]
    fn datetime_renders_as_utc_rfc3339() {
        let d = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(FieldValue::DateTime(d).to_json(), Value::String("2024-05-01T12:30:00Z".into()));
    }

    #[test]
    fn keys_compare_by_canonical_string() {
        assert!(FieldValue::Int(7).same_key(&FieldValue::from("7")));
        assert!(!FieldValue::Null.same_key(&FieldValue::Null));
        assert_eq!(user().key(), &FieldValue::Int(1));
    }
}
