use std::sync::Arc;

use crate::engine::NegotiationEngine;
use crate::observability::metrics::Metrics;
use crate::store::ServiceStore;

pub struct AppState {
    pub store: Arc<ServiceStore>,
    pub engine: NegotiationEngine,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(event_buffer_size: usize) -> Self {
        let store = Arc::new(ServiceStore::new(event_buffer_size));
        let metrics = Metrics::new();
        let engine = NegotiationEngine::new(store.clone(), metrics.clone());

        Self {
            store,
            engine,
            metrics,
        }
    }
}
