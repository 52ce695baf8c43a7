//! Operation table: (method, path pattern) -> operation, built once from the exposed capabilities.

use crate::controller::Resource;
use crate::error::ConfigError;
use axum::http::Method;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OperationName {
    List,
    Create,
    Retrieve,
    Update,
    PartialUpdate,
    Destroy,
    Custom(String),
}

impl OperationName {
    pub fn as_str(&self) -> &str {
        match self {
            OperationName::List => "list",
            OperationName::Create => "create",
            OperationName::Retrieve => "retrieve",
            OperationName::Update => "update",
            OperationName::PartialUpdate => "partial_update",
            OperationName::Destroy => "destroy",
            OperationName::Custom(name) => name,
        }
    }
}

impl fmt::Display for OperationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    Lookup,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationEntry {
    pub resource: String,
    pub method: Method,
    pub name: OperationName,
    /// Operates on one loaded record.
    pub detail: bool,
    pub segments: Vec<Segment>,
}

impl OperationEntry {
    fn standard(resource: &str, method: Method, name: OperationName) -> Self {
        let detail = matches!(
            name,
            OperationName::Retrieve | OperationName::Update | OperationName::PartialUpdate | OperationName::Destroy
        );
        let mut segments = vec![Segment::Literal(resource.to_string())];
        if detail {
            segments.push(Segment::Lookup);
        }
        OperationEntry {
            resource: resource.to_string(),
            method,
            name,
            detail,
            segments,
        }
    }

    fn custom(resource: &str, method: Method, name: &str, detail: bool) -> Self {
        let mut segments = vec![Segment::Literal(resource.to_string())];
        if detail {
            segments.push(Segment::Lookup);
        }
        segments.push(Segment::Literal(name.to_string()));
        OperationEntry {
            resource: resource.to_string(),
            method,
            name: OperationName::Custom(name.to_string()),
            detail,
            segments,
        }
    }

    /// GET, HEAD and OPTIONS.
    pub fn is_safe(&self) -> bool {
        matches!(self.method, Method::GET | Method::HEAD | Method::OPTIONS)
    }

    /// `/snippets/{lookup}/highlight/`
    pub fn pattern(&self) -> String {
        let mut out = String::from("/");
        for s in &self.segments {
            match s {
                Segment::Literal(l) => out.push_str(l),
                Segment::Lookup => out.push_str("{lookup}"),
            }
            out.push('/');
        }
        out
    }

    fn literal_count(&self) -> usize {
        self.segments.iter().filter(|s| matches!(s, Segment::Literal(_))).count()
    }

    fn matches<'p>(&self, parts: &[&'p str]) -> Option<Option<&'p str>> {
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut lookup = None;
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(l) if l == part => {}
                Segment::Literal(_) => return None,
                Segment::Lookup => lookup = Some(*part),
            }
        }
        Some(lookup)
    }
}

/// Immutable after build; shared behind an `Arc`.
#[derive(Clone, Debug, Default)]
pub struct OperationTable {
    entries: Vec<OperationEntry>,
}

impl OperationTable {
    pub fn build(resources: &[Arc<dyn Resource>]) -> Result<Self, ConfigError> {
        let mut entries = Vec::new();
        let mut names = HashSet::new();
        for resource in resources {
            let name = resource.name();
            if !crate::config::is_path_safe(name) {
                return Err(ConfigError::Validation(format!("resource name '{}' is not path safe", name)));
            }
            if !names.insert(name.to_string()) {
                return Err(ConfigError::DuplicatePathSegment(name.to_string()));
            }
            if resource.as_list().is_some() {
                entries.push(OperationEntry::standard(name, Method::GET, OperationName::List));
            }
            if resource.as_create().is_some() {
                entries.push(OperationEntry::standard(name, Method::POST, OperationName::Create));
            }
            if resource.as_retrieve().is_some() {
                entries.push(OperationEntry::standard(name, Method::GET, OperationName::Retrieve));
            }
            if resource.as_update().is_some() {
                entries.push(OperationEntry::standard(name, Method::PUT, OperationName::Update));
                entries.push(OperationEntry::standard(name, Method::PATCH, OperationName::PartialUpdate));
            }
            if resource.as_destroy().is_some() {
                entries.push(OperationEntry::standard(name, Method::DELETE, OperationName::Destroy));
            }
            for action in resource.actions() {
                if !crate::config::is_path_safe(&action.name) {
                    return Err(ConfigError::Validation(format!(
                        "action '{}' on '{}' is not path safe",
                        action.name, name
                    )));
                }
                entries.push(OperationEntry::custom(name, action.method.clone(), &action.name, action.detail));
            }
        }

        let mut seen = HashSet::new();
        for e in &entries {
            if !seen.insert((e.method.clone(), e.segments.clone())) {
                return Err(ConfigError::Validation(format!(
                    "{} {} is declared twice",
                    e.method,
                    e.pattern()
                )));
            }
        }
        // Literal segments win over lookups: `/snippets/recent/` is an action, not a key.
        entries.sort_by_key(|e| std::cmp::Reverse(e.literal_count()));
        for e in &entries {
            tracing::debug!(method = %e.method, path = %e.pattern(), operation = %e.name, "operation registered");
        }
        Ok(OperationTable { entries })
    }

    pub fn entries(&self) -> &[OperationEntry] {
        &self.entries
    }

    /// Match `path` after stripping `base_path`. Trailing slash is optional.
    /// Returns the entry and the lookup segment, if the pattern has one.
    pub fn resolve(&self, method: &Method, path: &str, base_path: &str) -> Option<(&OperationEntry, Option<String>)> {
        let rest = if base_path.is_empty() {
            path
        } else {
            let stripped = path.strip_prefix(base_path)?;
            if !stripped.is_empty() && !stripped.starts_with('/') {
                return None;
            }
            stripped
        };
        let trimmed = rest.strip_prefix('/').unwrap_or(rest);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return None;
        }
        let parts: Vec<&str> = trimmed.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return None;
        }
        self.entries
            .iter()
            .filter(|e| &e.method == method)
            .find_map(|e| e.matches(&parts).map(|lookup| (e, lookup.map(str::to_string))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordTypeConfig;
    use crate::controller::{ActionInput, Capabilities, CustomAction, ModelResource, Outcome};
    use crate::schema::{resolve, Declaration, RecordTypes, StorageField, StorageKind};
    use crate::store::InMemoryStorage;
    use assert_matches::assert_matches;

    fn resource(name: &str, caps: Capabilities) -> Arc<dyn Resource> {
        let rt = RecordTypeConfig::new("snippet").field(StorageField::new("id", StorageKind::Integer).with_default());
        let schema = Arc::new(resolve(&rt, &Declaration::new(name)).unwrap());
        let storage = Arc::new(InMemoryStorage::new(RecordTypes::new().with(Arc::new(rt))));
        Arc::new(
            ModelResource::builder(name, schema, storage)
                .capabilities(caps)
                .action(CustomAction::new("highlight", Method::GET, true, |_input: ActionInput| async {
                    Ok::<_, crate::error::AppError>(Outcome::NoContent)
                }))
                .action(CustomAction::new("recent", Method::GET, false, |_input: ActionInput| async {
                    Ok::<_, crate::error::AppError>(Outcome::NoContent)
                }))
                .build(),
        )
    }

    #[test]
    fn table_follows_capabilities() {
        let table = OperationTable::build(&[resource("snippets", Capabilities::read_only())]).unwrap();
        let names: Vec<&str> = table.entries().iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"list") && names.contains(&"retrieve"));
        assert!(!names.contains(&"create") && !names.contains(&"destroy"));
        assert!(table.resolve(&Method::DELETE, "/snippets/1/", "").is_none());
    }

    #[test]
    fn resolves_detail_and_actions() {
        let table = OperationTable::build(&[resource("snippets", Capabilities::all())]).unwrap();
        let (e, lookup) = table.resolve(&Method::PATCH, "/snippets/7", "").unwrap();
        assert_eq!(e.name, OperationName::PartialUpdate);
        assert_eq!(lookup.as_deref(), Some("7"));

        let (e, lookup) = table.resolve(&Method::GET, "/snippets/7/highlight/", "").unwrap();
        assert_eq!(e.name, OperationName::Custom("highlight".into()));
        assert_eq!(lookup.as_deref(), Some("7"));

        let (e, lookup) = table.resolve(&Method::GET, "/snippets/recent/", "").unwrap();
        assert_eq!(e.name.as_str(), "recent");
        assert!(lookup.is_none());
    }

    #[test]
    fn base_path_is_stripped() {
        let table = OperationTable::build(&[resource("snippets", Capabilities::all())]).unwrap();
        assert!(table.resolve(&Method::GET, "/api/v1/snippets/", "/api/v1").is_some());
        assert!(table.resolve(&Method::GET, "/snippets/", "/api/v1").is_none());
        assert!(table.resolve(&Method::GET, "/api/v1x/snippets/", "/api/v1").is_none());
        assert!(table.resolve(&Method::GET, "/api/v1/", "/api/v1").is_none());
    }

    #[test]
    fn duplicate_resource_names_rejected() {
        let dup = [resource("snippets", Capabilities::all()), resource("snippets", Capabilities::all())];
        assert_matches!(OperationTable::build(&dup), Err(ConfigError::DuplicatePathSegment(_)));
    }
}
