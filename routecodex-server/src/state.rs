use routecodex_core::config::GatewayConfig;
use routecodex_core::matcher::RouteTable;
use routecodex_observability::MetricsCollector;
use routecodex_pipeline::Connector;
use routecodex_pipeline::memory::MemoryManager;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared state behind the ingress endpoints.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub table: Arc<RouteTable>,
    pub connector: Arc<Connector>,
    pub metrics: Arc<MetricsCollector>,
    pub memory: Arc<MemoryManager>,
    ready: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(
        config: Arc<GatewayConfig>,
        table: Arc<RouteTable>,
        connector: Arc<Connector>,
        metrics: Arc<MetricsCollector>,
        memory: Arc<MemoryManager>,
    ) -> Self {
        Self {
            config,
            table,
            connector,
            metrics,
            memory,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flipped exactly once, after pool preload and route validation
    /// both succeeded.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}
