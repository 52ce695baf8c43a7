//! Schema registry: field descriptors, record-type introspection, hooks and resolution.

pub mod descriptor;
pub mod field;
pub mod hooks;
mod registry;

pub use descriptor::{RecordType, RecordTypes, StorageField, StorageKind};
pub use field::{Constraints, FieldDescriptor, FieldKind, FieldOverride, Pattern, Relation, ScalarType};
pub use hooks::{FieldHook, Getter, Hooks, RecordHook, RecordViolation};
pub use registry::{derive_field, resolve, Declaration, FieldSelection, Schema, SchemaRegistry};
