//! Bidirectional transform: payload -> internal map (ingest) and record -> representation (egress).

mod bound;
pub mod coerce;
mod egress;
mod ingest;

pub use bound::BoundInstance;
pub use coerce::{coerce_key, coerce_scalar, key_from_str};
pub use egress::{to_representation, to_representation_many};
pub use ingest::{to_internal, IngestMode, Ingested};
