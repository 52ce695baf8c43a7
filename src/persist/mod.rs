//! Persistence mediator between validated records and storage.

mod mediator;

pub use mediator::{Mediator, NestedStrategies, NestedWrite, SaveError};
