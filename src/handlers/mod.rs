//! HTTP handlers.

pub mod resource;
