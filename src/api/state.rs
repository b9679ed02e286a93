//! API server state

use std::sync::Arc;

use crate::aggregator::MetricsAggregator;
use crate::discovery::DiscoverySnapshot;

/// API server state
#[derive(Clone)]
pub struct AppState {
    /// Query pipeline shared by every request
    pub aggregator: Arc<MetricsAggregator>,
}

impl AppState {
    pub fn new(aggregator: Arc<MetricsAggregator>) -> Self {
        Self { aggregator }
    }

    /// Snapshot currently published by discovery
    pub fn snapshot(&self) -> Arc<DiscoverySnapshot> {
        self.aggregator.cache().current()
    }
}
