//! Shared application state for all routes. Everything here is built at startup and read-only afterwards.

use crate::dispatch::Dispatcher;
use crate::store::Storage;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    /// Pinged by `/ready`.
    pub storage: Arc<dyn Storage>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, storage: Arc<dyn Storage>) -> Self {
        AppState { dispatcher, storage }
    }
}
