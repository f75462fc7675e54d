//! Application state.

use std::sync::Arc;

use convoy_core::artifact::ObjectStore;
use convoy_store::Store;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub objects: Arc<dyn ObjectStore>,
    /// Lease granted to a successful booking.
    pub lease: chrono::Duration,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            objects,
            lease: chrono::Duration::minutes(2),
        }
    }

    pub fn with_lease(mut self, lease: chrono::Duration) -> Self {
        self.lease = lease;
        self
    }
}
