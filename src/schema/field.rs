//! Field descriptors: kind, visibility flags, defaults, source path and constraints.

use crate::schema::Schema;
use crate::value::FieldValue;
use regex::Regex;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarType {
    String,
    Integer,
    Float,
    Boolean,
    DateTime,
    Uuid,
}

impl ScalarType {
    pub fn name(&self) -> &'static str {
        match self {
            ScalarType::String => "string",
            ScalarType::Integer => "integer",
            ScalarType::Float => "float",
            ScalarType::Boolean => "boolean",
            ScalarType::DateTime => "datetime",
            ScalarType::Uuid => "uuid",
        }
    }
}

/// Where related records are found relative to the record being transformed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Relation {
    /// The key (or list of keys) is stored on this record under the source path.
    Forward,
    /// Records of the target type whose `foreign_field` holds this record's key.
    Reverse { foreign_field: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldKind {
    Scalar(ScalarType),
    /// Rendered and accepted as the related record's key (or list of keys).
    Related { target: String, many: bool, relation: Relation },
    /// Rendered and accepted through a nested schema.
    Nested { schema: Arc<Schema>, many: bool, relation: Relation },
    /// Read-only value produced by a registered getter.
    Computed,
}

/// Coarse kind used when an explicit descriptor replaces a derived one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum KindFamily {
    Scalar(ScalarType),
    Reference { many: bool },
    Computed,
}

impl FieldKind {
    pub(crate) fn family(&self) -> KindFamily {
        match self {
            FieldKind::Scalar(t) => KindFamily::Scalar(*t),
            FieldKind::Related { many, .. } | FieldKind::Nested { many, .. } => KindFamily::Reference { many: *many },
            FieldKind::Computed => KindFamily::Computed,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            FieldKind::Scalar(t) => t.name().to_string(),
            FieldKind::Related { target, many: false, .. } => format!("reference to {}", target),
            FieldKind::Related { target, many: true, .. } => format!("references to {}", target),
            FieldKind::Nested { schema, many: false, .. } => format!("nested {}", schema.type_name()),
            FieldKind::Nested { schema, many: true, .. } => format!("nested list of {}", schema.type_name()),
            FieldKind::Computed => "computed".to_string(),
        }
    }
}

/// Compiled regex compared by its source text.
#[derive(Clone, Debug)]
pub struct Pattern(pub Regex);

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_str() == other.0.as_str()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Constraints {
    pub max_length: Option<usize>,
    pub min_length: Option<usize>,
    pub allow_blank: bool,
    pub pattern: Option<Pattern>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub choices: Option<Vec<FieldValue>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDescriptor {
    /// External name used in payloads and representations.
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub nullable: bool,
    pub read_only: bool,
    pub write_only: bool,
    /// Trusted value used when an optional field is absent; never re-validated.
    pub default: Option<FieldValue>,
    /// Dotted accessor into the record.
    pub source: String,
    pub constraints: Constraints,
    /// Allows this explicit descriptor to replace a derived field of a different kind.
    pub override_kind: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        let read_only = matches!(kind, FieldKind::Computed);
        FieldDescriptor {
            source: name.clone(),
            name,
            kind,
            required: !read_only,
            nullable: false,
            read_only,
            write_only: false,
            default: None,
            constraints: Constraints::default(),
            override_kind: false,
        }
    }

    pub fn scalar(name: impl Into<String>, ty: ScalarType) -> Self {
        FieldDescriptor::new(name, FieldKind::Scalar(ty))
    }

    pub fn string(name: impl Into<String>) -> Self {
        FieldDescriptor::scalar(name, ScalarType::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        FieldDescriptor::scalar(name, ScalarType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        FieldDescriptor::scalar(name, ScalarType::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        FieldDescriptor::scalar(name, ScalarType::Boolean)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        FieldDescriptor::scalar(name, ScalarType::DateTime)
    }

    pub fn uuid(name: impl Into<String>) -> Self {
        FieldDescriptor::scalar(name, ScalarType::Uuid)
    }

    pub fn related(name: impl Into<String>, target: impl Into<String>) -> Self {
        FieldDescriptor::new(
            name,
            FieldKind::Related {
                target: target.into(),
                many: false,
                relation: Relation::Forward,
            },
        )
    }

    pub fn related_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        FieldDescriptor::new(
            name,
            FieldKind::Related {
                target: target.into(),
                many: true,
                relation: Relation::Forward,
            },
        )
    }

    pub fn nested(name: impl Into<String>, schema: Arc<Schema>) -> Self {
        FieldDescriptor::new(
            name,
            FieldKind::Nested {
                schema,
                many: false,
                relation: Relation::Forward,
            },
        )
    }

    pub fn nested_many(name: impl Into<String>, schema: Arc<Schema>) -> Self {
        FieldDescriptor::new(
            name,
            FieldKind::Nested {
                schema,
                many: true,
                relation: Relation::Forward,
            },
        )
    }

    pub fn computed(name: impl Into<String>) -> Self {
        FieldDescriptor::new(name, FieldKind::Computed)
    }

    /// Switch a related or nested field to a reverse relation (children pointing at us).
    pub fn reverse(mut self, foreign_field: impl Into<String>) -> Self {
        let reverse = Relation::Reverse {
            foreign_field: foreign_field.into(),
        };
        match &mut self.kind {
            FieldKind::Related { relation, .. } | FieldKind::Nested { relation, .. } => *relation = reverse,
            FieldKind::Scalar(_) | FieldKind::Computed => {}
        }
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn optional(self) -> Self {
        self.required(false)
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self.required = false;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    pub fn default(mut self, value: FieldValue) -> Self {
        self.default = Some(value);
        self.required = false;
        self
    }

    pub fn source(mut self, path: impl Into<String>) -> Self {
        self.source = path.into();
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.constraints.max_length = Some(n);
        self
    }

    pub fn min_length(mut self, n: usize) -> Self {
        self.constraints.min_length = Some(n);
        self
    }

    pub fn allow_blank(mut self) -> Self {
        self.constraints.allow_blank = true;
        self
    }

    pub fn pattern(mut self, re: Regex) -> Self {
        self.constraints.pattern = Some(Pattern(re));
        self
    }

    pub fn minimum(mut self, min: f64) -> Self {
        self.constraints.minimum = Some(min);
        self
    }

    pub fn maximum(mut self, max: f64) -> Self {
        self.constraints.maximum = Some(max);
        self
    }

    pub fn range(self, min: f64, max: f64) -> Self {
        self.minimum(min).maximum(max)
    }

    pub fn choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FieldValue>,
    {
        self.constraints.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    pub fn override_kind(mut self) -> Self {
        self.override_kind = true;
        self
    }

    /// Ingest touches this field.
    pub fn is_writable(&self) -> bool {
        !self.read_only && !matches!(self.kind, FieldKind::Computed)
    }

    pub fn is_nested(&self) -> bool {
        matches!(self.kind, FieldKind::Nested { .. })
    }
}

/// Flag refinements applied to a derived (or explicit) field without replacing it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldOverride {
    pub required: Option<bool>,
    pub nullable: Option<bool>,
    pub read_only: Option<bool>,
    pub write_only: Option<bool>,
    pub default: Option<FieldValue>,
    pub source: Option<String>,
    pub max_length: Option<usize>,
    pub min_length: Option<usize>,
    pub allow_blank: Option<bool>,
    pub pattern: Option<Pattern>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub choices: Option<Vec<FieldValue>>,
}

impl FieldOverride {
    pub fn read_only() -> Self {
        FieldOverride {
            read_only: Some(true),
            ..FieldOverride::default()
        }
    }

    pub fn write_only() -> Self {
        FieldOverride {
            write_only: Some(true),
            ..FieldOverride::default()
        }
    }

    pub(crate) fn apply(&self, field: &mut FieldDescriptor) {
        if let Some(read_only) = self.read_only {
            field.read_only = read_only;
            if read_only {
                field.required = false;
            }
        }
        if let Some(required) = self.required {
            field.required = required;
        }
        if let Some(nullable) = self.nullable {
            field.nullable = nullable;
        }
        if let Some(write_only) = self.write_only {
            field.write_only = write_only;
        }
        if let Some(default) = &self.default {
            field.default = Some(default.clone());
            field.required = false;
        }
        if let Some(source) = &self.source {
            field.source = source.clone();
        }
        let c = &mut field.constraints;
        if self.max_length.is_some() {
            c.max_length = self.max_length;
        }
        if self.min_length.is_some() {
            c.min_length = self.min_length;
        }
        if let Some(allow_blank) = self.allow_blank {
            c.allow_blank = allow_blank;
        }
        if self.pattern.is_some() {
            c.pattern = self.pattern.clone();
        }
        if self.minimum.is_some() {
            c.minimum = self.minimum;
        }
        if self.maximum.is_some() {
            c.maximum = self.maximum;
        }
        if self.choices.is_some() {
            c.choices = self.choices.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_and_default_clear_required() {
        let f = FieldDescriptor::string("title").read_only();
        assert!(!f.required && !f.is_writable());
        let g = FieldDescriptor::integer("age").default(FieldValue::Int(0));
        assert!(!g.required);
        assert!(!FieldDescriptor::computed("highlight").is_writable());
    }

    #[test]
    fn related_and_nested_share_reference_family() {
        let related = FieldDescriptor::related_many("snippets", "snippet");
        assert_eq!(related.kind.family(), KindFamily::Reference { many: true });
        assert_ne!(
            FieldDescriptor::string("x").kind.family(),
            FieldDescriptor::integer("x").kind.family()
        );
    }

    #[test]
    fn override_refines_flags_only() {
        let mut f = FieldDescriptor::string("code").max_length(10);
        FieldOverride {
            max_length: Some(20),
            required: Some(false),
            ..FieldOverride::default()
        }
        .apply(&mut f);
        assert_eq!(f.constraints.max_length, Some(20));
        assert!(!f.required);
        assert_eq!(f.kind, FieldKind::Scalar(ScalarType::String));
    }
}
