//! Config validation: referential integrity and API consistency.

use crate::config::FullConfig;
use crate::controller::Capabilities;
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

/// Path segments become URL components; keep them to a safe alphabet.
pub fn is_path_safe(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let mut types = HashMap::new();
    for rt in &config.record_types {
        if types.insert(rt.name.as_str(), rt).is_some() {
            return Err(ConfigError::Validation(format!("duplicate record type '{}'", rt.name)));
        }
    }

    for rt in &config.record_types {
        let names: HashSet<&str> = rt.fields.iter().map(|f| f.name.as_str()).collect();
        if names.len() != rt.fields.len() {
            return Err(ConfigError::Validation(format!(
                "record type '{}' declares a field twice",
                rt.name
            )));
        }
        if !names.contains(rt.primary_key.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "primary key field",
                id: format!("{}.{}", rt.name, rt.primary_key),
            });
        }
        for f in &rt.fields {
            match (&f.target, f.kind.is_relation()) {
                (Some(target), true) if !types.contains_key(target.as_str()) => {
                    return Err(ConfigError::MissingReference {
                        kind: "relation target",
                        id: format!("{}.{} -> {}", rt.name, f.name, target),
                    });
                }
                (None, true) => {
                    return Err(ConfigError::Validation(format!(
                        "relation field {}.{} has no target",
                        rt.name, f.name
                    )));
                }
                _ => {}
            }
        }
    }

    let mut path_segments = HashSet::new();
    for res in &config.resources {
        let rt = types.get(res.record_type.as_str()).ok_or_else(|| ConfigError::MissingReference {
            kind: "record type",
            id: res.record_type.clone(),
        })?;
        if !is_path_safe(&res.path_segment) {
            return Err(ConfigError::Validation(format!(
                "path segment '{}' may only contain letters, digits, '-' and '_'",
                res.path_segment
            )));
        }
        if !path_segments.insert(res.path_segment.as_str()) {
            return Err(ConfigError::DuplicatePathSegment(res.path_segment.clone()));
        }
        Capabilities::from_operations(&res.operations)?;
        let known = |name: &str| rt.fields.iter().any(|f| f.name == name);
        for name in res.filter_fields.iter().chain(res.lookup_field.iter()) {
            if !known(name) {
                return Err(ConfigError::MissingReference {
                    kind: "field",
                    id: format!("{}.{}", res.record_type, name),
                });
            }
        }
        res.declaration()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RecordTypeConfig, ResourceConfig};
    use crate::schema::{StorageField, StorageKind};
    use assert_matches::assert_matches;

    fn config() -> FullConfig {
        FullConfig {
            record_types: vec![
                RecordTypeConfig::new("user")
                    .field(StorageField::new("id", StorageKind::Integer).with_default())
                    .field(StorageField::new("username", StorageKind::String)),
                RecordTypeConfig::new("snippet")
                    .field(StorageField::new("id", StorageKind::Integer).with_default())
                    .field(StorageField::relation("owner", StorageKind::ForeignKey, "user")),
            ],
            resources: vec![ResourceConfig::new("snippets", "snippet"), ResourceConfig::new("users", "user")],
        }
    }

    #[test]
    fn accepts_consistent_config() {
        validate(&config()).unwrap();
    }

    #[test]
    fn unknown_record_type() {
        let mut c = config();
        c.resources.push(ResourceConfig::new("posts", "post"));
        assert_matches!(validate(&c), Err(ConfigError::MissingReference { kind: "record type", .. }));
    }

    #[test]
    fn duplicate_path_segment() {
        let mut c = config();
        c.resources.push(ResourceConfig::new("users", "user"));
        assert_matches!(validate(&c), Err(ConfigError::DuplicatePathSegment(s)) if s == "users");
    }

    #[test]
    fn dangling_relation_target() {
        let mut c = config();
        c.record_types.remove(0);
        c.resources.pop();
        assert_matches!(validate(&c), Err(ConfigError::MissingReference { kind: "relation target", .. }));
    }

    #[test]
    fn unknown_filter_field_and_bad_segment() {
        let mut c = config();
        c.resources[0].filter_fields = vec!["language".into()];
        assert_matches!(validate(&c), Err(ConfigError::MissingReference { kind: "field", .. }));

        let mut c = config();
        c.resources[0].path_segment = "snip pets".into();
        assert_matches!(validate(&c), Err(ConfigError::Validation(_)));
    }

    #[test]
    fn unknown_operation() {
        let mut c = config();
        c.resources[0].operations = vec!["list".into(), "explode".into()];
        assert_matches!(validate(&c), Err(ConfigError::Validation(_)));
    }
}
