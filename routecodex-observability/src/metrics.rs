use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Metrics collector for the gateway.
///
/// Prometheus pull only: the `/metrics` endpoint encodes the registry on
/// demand; nothing is pushed or persisted.
pub struct MetricsCollector {
    registry: Registry,

    /// Total ingress requests by route, ingress protocol, status
    pub requests_total: IntCounterVec,

    /// End-to-end request latency histogram by route
    pub request_duration: HistogramVec,

    /// Upstream response time histogram by provider
    pub upstream_latency: HistogramVec,

    /// Kernel retry attempts by provider and strategy
    pub upstream_retries: IntCounterVec,

    /// Circuit breaker transitions by provider and new state
    pub breaker_transitions: IntCounterVec,

    /// Preloaded pool instances
    pub pool_instances: IntGauge,

    /// In-flight streaming responses
    pub active_streams: IntGauge,
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("routecodex_requests_total", "Total ingress requests"),
            &["route", "protocol", "status"],
        )?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new("routecodex_request_duration_seconds", "Request latency")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["route"],
        )?;

        let upstream_latency = HistogramVec::new(
            HistogramOpts::new(
                "routecodex_upstream_latency_seconds",
                "Upstream response time",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["provider"],
        )?;

        let upstream_retries = IntCounterVec::new(
            Opts::new("routecodex_upstream_retries_total", "Kernel retry attempts"),
            &["provider", "strategy"],
        )?;

        let breaker_transitions = IntCounterVec::new(
            Opts::new(
                "routecodex_breaker_transitions_total",
                "Circuit breaker transitions",
            ),
            &["provider", "state"],
        )?;

        let pool_instances =
            IntGauge::new("routecodex_pool_instances", "Preloaded pool instances")?;

        let active_streams =
            IntGauge::new("routecodex_active_streams", "In-flight streaming responses")?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(upstream_latency.clone()))?;
        registry.register(Box::new(upstream_retries.clone()))?;
        registry.register(Box::new(breaker_transitions.clone()))?;
        registry.register(Box::new(pool_instances.clone()))?;
        registry.register(Box::new(active_streams.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration,
            upstream_latency,
            upstream_retries,
            breaker_transitions,
            pool_instances,
            active_streams,
        })
    }

    /// Prometheus text exposition of the current registry state.
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_builds_and_encodes() {
        let metrics = MetricsCollector::new().unwrap();
        metrics
            .requests_total
            .with_label_values(&["r1", "openai-chat", "200"])
            .inc();
        metrics.pool_instances.set(3);
        let text = metrics.gather_text();
        assert!(text.contains("routecodex_requests_total"));
        assert!(text.contains("routecodex_pool_instances 3"));
    }

    #[test]
    fn test_duplicate_registration_is_impossible() {
        // Two collectors own two registries; no global state collides.
        let a = MetricsCollector::new().unwrap();
        let b = MetricsCollector::new().unwrap();
        a.requests_total.with_label_values(&["r", "p", "200"]).inc();
        assert!(!b.gather_text().contains(r#"route="r""#));
    }
}
