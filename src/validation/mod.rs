//! Validation pipeline and the error map it produces.

mod error_map;
mod pipeline;

pub use error_map::{ErrorMap, NON_FIELD_ERRORS};
pub use pipeline::{validate, ValidatedRecord, Validation};
