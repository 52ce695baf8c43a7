//! Field-addressable violation messages.

use indexmap::IndexMap;
use serde::Serialize;

/// Key used for violations that belong to the whole record rather than one field.
pub const NON_FIELD_ERRORS: &str = "non_field_errors";

/// Field name (or [`NON_FIELD_ERRORS`]) -> ordered messages. Non-empty iff validation failed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ErrorMap(IndexMap<String, Vec<String>>);

impl ErrorMap {
    pub fn new() -> Self {
        ErrorMap(IndexMap::new())
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn add_non_field(&mut self, message: impl Into<String>) {
        self.add(NON_FIELD_ERRORS, message);
    }

    /// Merge a nested map, addressing its keys under `prefix` (`owner.name`, `tags[1].label`).
    pub fn merge_prefixed(&mut self, prefix: &str, other: ErrorMap) {
        for (field, messages) in other.0 {
            let key = if field == NON_FIELD_ERRORS {
                prefix.to_string()
            } else {
                format!("{}.{}", prefix, field)
            };
            self.0.entry(key).or_default().extend(messages);
        }
    }

    pub fn merge(&mut self, other: ErrorMap) {
        for (field, messages) in other.0 {
            self.0.entry(field).or_default().extend(messages);
        }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// True when `field` or one of its nested paths (`field.sub`, `field[0].sub`) has errors.
    pub fn contains_prefixed(&self, field: &str) -> bool {
        self.0.keys().any(|key| {
            key.strip_prefix(field)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('.') || rest.starts_with('['))
        })
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}
