use std::sync::Arc;

use crate::config::ServerConfig;
use crate::metrics::RelayMetrics;
use crate::registry::ConnectionRegistry;
use crate::transfer::{Orchestrator, TransferStore};

/// Process-wide state, built once at startup and cloned into every handler.
#[derive(Debug, Clone)]
pub struct RelayService {
    inner: Arc<ServiceInner>,
}

#[derive(Debug)]
struct ServiceInner {
    config: ServerConfig,
    registry: ConnectionRegistry,
    store: TransferStore,
    metrics: Arc<RelayMetrics>,
    orchestrator: Orchestrator,
}

impl RelayService {
    pub fn new(config: ServerConfig) -> Self {
        let registry = ConnectionRegistry::new();
        let store = TransferStore::new();
        let metrics = Arc::new(RelayMetrics::default());
        let orchestrator = Orchestrator::new(
            registry.clone(),
            store.clone(),
            metrics.clone(),
            config.chunk_size,
            config.chunk_pause(),
        );
        Self {
            inner: Arc::new(ServiceInner {
                config,
                registry,
                store,
                metrics,
                orchestrator,
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn store(&self) -> &TransferStore {
        &self.inner.store
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.inner.metrics
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.inner.orchestrator
    }
}

impl Default for RelayService {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}
