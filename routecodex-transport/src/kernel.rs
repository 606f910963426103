use crate::auth::ResolvedAuth;
use crate::sse;
use dashmap::DashMap;
use routecodex_core::RouterError;
use routecodex_core::config::{RetryConfig, RetryStrategy, UpstreamConfig};
use routecodex_core::error::UpstreamFailure;
use routecodex_observability::MetricsCollector;
use routecodex_observability::snapshot::{Snapshot, SnapshotKind, SnapshotSink};
use routecodex_pipeline::module::EventStream;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A fully assembled upstream request. The kernel executes it without
/// looking inside: brand policy has already been applied by the profile
/// layer.
#[derive(Debug)]
pub struct KernelRequest {
    pub base_url: String,
    pub endpoint: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
    pub stream: bool,
}

pub enum KernelOutput {
    Json { status: u16, body: Value },
    Stream(EventStream),
}

/// Brand-agnostic HTTP execution: per-host connection pooling, timeout,
/// retry, error normalization, snapshot emission. The kernel never
/// examines payloads for brand fields, never rewrites headers for
/// specific providers, and never signs.
pub struct HttpKernel {
    /// One client per host. Connections are pooled per host and never
    /// shared across hosts.
    clients: DashMap<String, reqwest::Client>,
    config: UpstreamConfig,
    snapshots: Arc<dyn SnapshotSink>,
    snapshots_enabled: bool,
    metrics: Option<Arc<MetricsCollector>>,
}

impl HttpKernel {
    pub fn new(
        config: UpstreamConfig,
        snapshots: Arc<dyn SnapshotSink>,
        snapshots_enabled: bool,
    ) -> Self {
        Self {
            clients: DashMap::new(),
            config,
            snapshots,
            snapshots_enabled,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn client_for(&self, host: &str) -> Result<reqwest::Client, RouterError> {
        if let Some(client) = self.clients.get(host) {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(self.config.connect_timeout_ms))
            .pool_idle_timeout(Duration::from_secs(self.config.idle_timeout_secs))
            .pool_max_idle_per_host(self.config.max_idle_per_host)
            .build()
            .map_err(|e| RouterError::Internal(format!("http client: {e}")))?;
        self.clients.insert(host.to_string(), client.clone());
        Ok(client)
    }

    /// Execute with the configured retry policy. Connection errors and
    /// 5xx responses retry; the overall deadline is never extended by
    /// retries.
    pub async fn execute(
        &self,
        request: KernelRequest,
        auth: &ResolvedAuth,
        retry: &RetryConfig,
        deadline_ms: u64,
        request_id: &str,
    ) -> Result<KernelOutput, RouterError> {
        let url = join_url(&request.base_url, &request.endpoint);
        let parsed = reqwest::Url::parse(&url)
            .map_err(|e| RouterError::ConfigError(format!("invalid upstream url '{url}': {e}")))?;
        let host = parsed.host_str().unwrap_or("unknown").to_string();
        let client = self.client_for(&host)?;
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);

        if self.snapshots_enabled {
            self.snapshots.emit(Snapshot::new(
                SnapshotKind::UpstreamRequest,
                request_id,
                &auth.provider_key,
                &request.endpoint,
                None,
                request.headers.clone(),
                request.body.clone(),
            ));
        }

        let mut last_failure: Option<UpstreamFailure> = None;
        let max_attempts = retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero())
            else {
                return Err(RouterError::Timeout(deadline_ms));
            };

            let mut builder = client
                .post(parsed.clone())
                .timeout(remaining)
                .header(auth.header_name.as_str(), auth.header_value.as_str())
                .json(&request.body);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            match builder.send().await {
                Err(e) if e.is_timeout() => {
                    // The per-attempt timeout is the remaining overall
                    // deadline, so a timeout here ends the request.
                    return Err(RouterError::Timeout(deadline_ms));
                }
                Err(e) => {
                    let failure = UpstreamFailure {
                        status_code: 502,
                        code: "network_error".into(),
                        upstream_code: None,
                        provider_key: auth.provider_key.clone(),
                        request_id: request_id.to_string(),
                        body: Some(json!({"error": e.to_string()})),
                    };
                    warn!(
                        request_id,
                        attempt,
                        error = %e,
                        "Upstream connection error"
                    );
                    last_failure = Some(failure);
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    if response.status().is_server_error() {
                        let body = response.json::<Value>().await.ok();
                        warn!(request_id, attempt, status, "Upstream 5xx");
                        last_failure = Some(UpstreamFailure {
                            status_code: status,
                            code: format!("HTTP_{status}"),
                            upstream_code: None,
                            provider_key: auth.provider_key.clone(),
                            request_id: request_id.to_string(),
                            body,
                        });
                    } else if !response.status().is_success() {
                        let body = response.json::<Value>().await.ok();
                        return Err(RouterError::Upstream(UpstreamFailure {
                            status_code: status,
                            code: format!("HTTP_{status}"),
                            upstream_code: None,
                            provider_key: auth.provider_key.clone(),
                            request_id: request_id.to_string(),
                            body,
                        }));
                    } else if request.stream && is_event_stream(&response) {
                        debug!(request_id, status, "Upstream stream opened");
                        return Ok(KernelOutput::Stream(sse::parse_sse(
                            response.bytes_stream(),
                            auth.provider_key.clone(),
                            request_id.to_string(),
                        )));
                    } else {
                        let body = response
                            .json::<Value>()
                            .await
                            .unwrap_or_else(|e| json!({"error": format!("invalid json: {e}")}));
                        if self.snapshots_enabled {
                            self.snapshots.emit(Snapshot::new(
                                SnapshotKind::UpstreamResponse,
                                request_id,
                                &auth.provider_key,
                                &request.endpoint,
                                Some(status),
                                Vec::new(),
                                body.clone(),
                            ));
                        }
                        return Ok(KernelOutput::Json { status, body });
                    }
                }
            }

            // Retryable failure. Delay per strategy if budget remains.
            if attempt < max_attempts {
                if let Some(metrics) = &self.metrics {
                    metrics
                        .upstream_retries
                        .with_label_values(&[auth.provider_key.as_str(), retry.strategy.as_str()])
                        .inc();
                }
                let delay = retry_delay(retry, attempt);
                if Instant::now() + delay >= deadline {
                    break;
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(RouterError::Upstream(last_failure.unwrap_or_else(|| {
            UpstreamFailure {
                status_code: 502,
                code: "upstream_exhausted".into(),
                upstream_code: None,
                provider_key: auth.provider_key.clone(),
                request_id: request_id.to_string(),
                body: None,
            }
        })))
    }
}

fn retry_delay(retry: &RetryConfig, attempt: u32) -> Duration {
    match retry.strategy {
        RetryStrategy::RetryImmediate => Duration::ZERO,
        RetryStrategy::RetryDelayed => Duration::from_millis(retry.base_delay_ms),
        RetryStrategy::RetryExponential => {
            Duration::from_millis(retry.base_delay_ms.saturating_mul(1 << (attempt - 1).min(16)))
        }
    }
}

fn is_event_stream(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("text/event-stream"))
        .unwrap_or(false)
}

fn join_url(base: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}
