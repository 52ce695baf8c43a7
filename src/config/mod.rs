//! Declarative configuration: record types, resources and runtime settings.

pub mod loader;
pub mod settings;
pub mod types;
pub mod validator;

pub use loader::{build_resources, load_from_dir, record_types, RECORD_TYPES_FILE, RESOURCES_FILE};
pub use settings::Settings;
pub use types::*;
pub use validator::{is_path_safe, validate};
