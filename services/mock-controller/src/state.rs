//! Application state shared across request handlers.

use std::sync::Arc;

use crate::control::ControlHub;
use crate::store::Store;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<Store>,
    hub: Arc<ControlHub>,
}

impl AppState {
    pub fn new(store: Arc<Store>, hub: Arc<ControlHub>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { store, hub }),
        }
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Path to connected agents.
    pub fn hub(&self) -> &ControlHub {
        &self.inner.hub
    }
}
