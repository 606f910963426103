use crate::auth::AuthAssembler;
use crate::kernel::{HttpKernel, KernelOutput, KernelRequest};
use crate::profile::{FamilyProfile, PolicyContext};
use crate::protocol::{ProtocolAdapter, ProtocolInput, ResponseContext, adapter_for};
use crate::registry::ProfileRegistry;
use async_trait::async_trait;
use routecodex_core::RouterError;
use routecodex_core::binding::{ModuleKind, ProviderBinding};
use routecodex_core::config::{GatewayConfig, RetryConfig};
use routecodex_core::context::RequestContext;
use routecodex_core::error::UpstreamFailure;
use routecodex_observability::MetricsCollector;
use routecodex_pipeline::breaker::CircuitBreaker;
use routecodex_pipeline::module::{Module, Payload};
use routecodex_pipeline::registry::ModuleFactory;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProviderModuleConfig {
    /// Provider id from the gateway configuration.
    provider: String,

    /// Force a specific upstream model regardless of the client's ask.
    #[serde(default)]
    model: Option<String>,
}

/// The provider module: composes kernel, protocol adapter, and family
/// profile for one configured provider. The composition order per
/// request is fixed: kernel context → protocol endpoint/body → profile
/// increments → kernel send → protocol parse → profile post-process.
pub struct ProviderModule {
    id: String,
    binding: ProviderBinding,
    base_url: String,
    model_override: Option<String>,
    kernel: Arc<HttpKernel>,
    adapter: &'static dyn ProtocolAdapter,
    profile: Arc<dyn FamilyProfile>,
    auth: AuthAssembler,
    retry: RetryConfig,
    timeout_ms: u64,
    breaker: CircuitBreaker,
    metrics: Option<Arc<MetricsCollector>>,
}

#[async_trait]
impl Module for ProviderModule {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Provider
    }

    async fn process(
        &self,
        payload: Payload,
        ctx: &mut RequestContext,
    ) -> Result<Payload, RouterError> {
        let Payload::Request(chat) = payload else {
            // A provider mid-chain only ever sees the request side.
            return Err(RouterError::Internal(
                "provider module received a non-request payload".into(),
            ));
        };
        self.execute(chat, ctx).await
    }
}

impl ProviderModule {
    async fn execute(&self, chat: Value, ctx: &mut RequestContext) -> Result<Payload, RouterError> {
        let mut binding = self.binding.clone();

        if !self.breaker.allow() {
            return Err(RouterError::Upstream(UpstreamFailure {
                status_code: 503,
                code: "circuit_open".into(),
                upstream_code: None,
                provider_key: binding.provider_key.clone(),
                request_id: ctx.request_id.clone(),
                body: None,
            }));
        }

        let model = self
            .model_override
            .as_deref()
            .or_else(|| chat["model"].as_str())
            .unwrap_or_default()
            .to_string();
        if model.is_empty() {
            return Err(RouterError::InvalidPayload("request has no model".into()));
        }

        let auth = match self.auth.resolve().await {
            Ok(auth) => auth,
            Err(e) => {
                self.breaker.on_failure();
                return Err(e);
            }
        };
        binding.provider_key = format!("{}.{}", binding.provider_id, auth.provider_key);
        ctx.runtime.binding = Some(binding.clone());

        // Protocol layer: wire endpoint and body.
        let input = ProtocolInput {
            body: &chat,
            model: &model,
            stream: ctx.stream,
        };
        let mut endpoint = self.adapter.resolve_endpoint(&input);
        let mut body = self.adapter.build_body(&input)?;
        // Content-Type is set by the kernel's JSON encoding; only the
        // negotiated extras ride along here.
        let mut headers: Vec<(String, String)> = Vec::new();
        if ctx.stream {
            headers.push(("Accept".to_string(), "text/event-stream".to_string()));
        }
        if let Some(ua) = ctx.runtime.hints.get("user_agent").and_then(|v| v.as_str()) {
            headers.push(("User-Agent".to_string(), ua.to_string()));
        }

        // Profile layer: brand increments, in declared hook order.
        let policy_ctx = PolicyContext {
            provider_key: &binding.provider_key,
            request_id: &ctx.request_id,
            hints: &ctx.runtime.hints,
        };
        self.profile
            .apply_request_policy(&mut endpoint, &mut headers, &mut body, &policy_ctx)?;
        self.profile.apply_header_policy(&mut headers, &policy_ctx);
        self.profile
            .apply_signing_policy(&mut headers, &body, &policy_ctx)?;

        // Protocol-standardized auth header (gemini's x-goog-api-key)
        // replaces the scheme-style header.
        let auth_for_kernel = match self.adapter.auth_header() {
            Some(header_name) => crate::auth::ResolvedAuth {
                header_name: header_name.to_string(),
                header_value: auth.bare_value().to_string(),
                provider_key: auth.provider_key.clone(),
            },
            None => auth.clone(),
        };

        debug!(
            request_id = %ctx.request_id,
            provider = %binding.provider_id,
            endpoint = %endpoint,
            stream = ctx.stream,
            "Dispatching upstream request"
        );

        let upstream_start = std::time::Instant::now();
        let result = self
            .kernel
            .execute(
                KernelRequest {
                    base_url: self.base_url.clone(),
                    endpoint: endpoint.clone(),
                    headers,
                    body,
                    stream: ctx.stream,
                },
                &auth_for_kernel,
                &self.retry,
                self.timeout_ms,
                &ctx.request_id,
            )
            .await;
        if let Some(metrics) = &self.metrics {
            metrics
                .upstream_latency
                .with_label_values(&[binding.provider_id.as_str()])
                .observe(upstream_start.elapsed().as_secs_f64());
        }

        let breaker_state_before = self.breaker.state();
        let outcome = match result {
            Ok(KernelOutput::Stream(events)) => {
                self.breaker.on_success();
                Ok(Payload::Stream(events))
            }
            Ok(KernelOutput::Json { status, mut body }) => {
                // Profile post-processing classifies business-error
                // envelopes hiding behind HTTP 200.
                match self
                    .profile
                    .apply_response_policy(status, &mut body, &policy_ctx)
                {
                    Err(e) => {
                        self.breaker.on_failure();
                        Err(e)
                    }
                    Ok(()) => {
                        let parsed = self.adapter.parse_response(
                            body,
                            &ResponseContext {
                                request_id: &ctx.request_id,
                                model: &model,
                            },
                        );
                        match parsed {
                            Ok(parsed) => {
                                self.breaker.on_success();
                                Ok(Payload::Response(parsed))
                            }
                            Err(e) => {
                                self.breaker.on_failure();
                                Err(e)
                            }
                        }
                    }
                }
            }
            Err(RouterError::Upstream(failure)) => {
                self.breaker.on_failure();
                Err(self.profile.map_error(failure, &policy_ctx))
            }
            Err(other) => {
                self.breaker.on_failure();
                Err(other)
            }
        };

        let breaker_state_after = self.breaker.state();
        if breaker_state_after != breaker_state_before {
            if let Some(metrics) = &self.metrics {
                metrics
                    .breaker_transitions
                    .with_label_values(&[binding.provider_id.as_str(), breaker_state_after.as_str()])
                    .inc();
            }
        }
        outcome
    }
}

/// Builds provider modules from the gateway configuration. One factory
/// serves every provider id; the pool dedups instances by config hash.
pub struct ProviderFactory {
    config: Arc<GatewayConfig>,
    registry: Arc<ProfileRegistry>,
    kernel: Arc<HttpKernel>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ProviderFactory {
    pub fn new(
        config: Arc<GatewayConfig>,
        registry: Arc<ProfileRegistry>,
        kernel: Arc<HttpKernel>,
    ) -> Self {
        Self {
            config,
            registry,
            kernel,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl ModuleFactory for ProviderFactory {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Provider
    }

    fn build(&self, config: &Value) -> Result<Arc<dyn Module>, RouterError> {
        let module_config: ProviderModuleConfig = serde_json::from_value(config.clone())
            .map_err(|e| RouterError::ConfigError(format!("provider module config: {e}")))?;

        let provider_config = self
            .config
            .providers
            .get(&module_config.provider)
            .ok_or_else(|| {
                RouterError::ConfigError(format!(
                    "route references unknown provider '{}'",
                    module_config.provider
                ))
            })?;

        let (binding, profile) = self
            .registry
            .resolve(&module_config.provider, provider_config)?;
        let adapter = adapter_for(binding.provider_protocol);
        let retry = provider_config
            .retry
            .clone()
            .unwrap_or_else(|| self.config.upstream.retry.clone());

        Ok(Arc::new(ProviderModule {
            id: format!("provider-{}", module_config.provider),
            binding,
            base_url: provider_config.base_url.clone(),
            model_override: module_config.model,
            kernel: Arc::clone(&self.kernel),
            adapter,
            profile,
            auth: AuthAssembler::new(provider_config.auth.clone()),
            retry,
            timeout_ms: self.config.server.request_timeout_ms,
            breaker: CircuitBreaker::new(&self.config.breaker),
            metrics: self.metrics.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routecodex_core::config::{AuthConfig, ProviderConfig, ResponsesConfig};
    use routecodex_observability::snapshot::NullSnapshotSink;
    use serde_json::json;

    fn factory() -> ProviderFactory {
        let mut config = GatewayConfig::default();
        config.providers.insert(
            "glm".to_string(),
            ProviderConfig {
                provider_protocol: routecodex_core::ProviderProtocol::OpenaiChat,
                compatibility_profile: "glm".to_string(),
                base_url: "https://open.bigmodel.cn/api/paas/v4".to_string(),
                auth: AuthConfig::Bearer {
                    keys: vec!["sk-test".into()],
                },
                models: vec!["glm-4.7".into()],
                responses: ResponsesConfig::default(),
                retry: None,
            },
        );
        let config = Arc::new(config);
        let kernel = Arc::new(HttpKernel::new(
            config.upstream.clone(),
            Arc::new(NullSnapshotSink),
            false,
        ));
        ProviderFactory::new(config, Arc::new(ProfileRegistry::builtin()), kernel)
    }

    #[test]
    fn test_build_resolves_binding() {
        let module = factory().build(&json!({"provider": "glm"})).unwrap();
        assert_eq!(module.kind(), ModuleKind::Provider);
        assert_eq!(module.id(), "provider-glm");
    }

    #[test]
    fn test_unknown_provider_rejected_at_build() {
        let err = factory().build(&json!({"provider": "ghost"})).unwrap_err();
        assert_eq!(err.code(), "config_invalid");
    }

    #[test]
    fn test_unknown_config_key_rejected() {
        let err = factory()
            .build(&json!({"provider": "glm", "providerType": "openai"}))
            .unwrap_err();
        assert_eq!(err.code(), "config_invalid");
    }

    #[tokio::test]
    async fn test_non_request_payload_is_internal_error() {
        let module = factory().build(&json!({"provider": "glm"})).unwrap();
        let mut ctx = RequestContext::new("r1", routecodex_core::ProviderProtocol::OpenaiChat);
        let err = module
            .process(Payload::Response(json!({})), &mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), routecodex_core::error::ErrorKind::Internal);
    }
}
