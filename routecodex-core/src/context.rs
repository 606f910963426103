use crate::binding::{ProviderBinding, ProviderProtocol};
use crate::route::RouteCategory;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

/// Metadata resolved at chain assembly and consumed by every module.
#[derive(Debug, Clone)]
pub struct RuntimeMetadata {
    /// The resolved provider binding for this request's route.
    pub binding: Option<ProviderBinding>,

    /// Upstream hints (web-search flags, session ids, model overrides)
    /// accumulated along the chain.
    pub hints: HashMap<String, Value>,
}

impl RuntimeMetadata {
    pub fn empty() -> Self {
        Self {
            binding: None,
            hints: HashMap::new(),
        }
    }
}

/// Per-request context. Created at route match, moved through the chain,
/// destroyed at response emit or error surface.
pub struct RequestContext {
    pub request_id: String,
    pub route_id: String,
    pub category: RouteCategory,

    /// Protocol the client spoke on ingress. The llmswitch denormalizes
    /// back into this.
    pub ingress_protocol: ProviderProtocol,

    pub start: Instant,
    pub start_time: chrono::DateTime<chrono::Utc>,

    pub runtime: RuntimeMetadata,

    /// Whether the client requested a streaming response.
    pub stream: bool,

    /// Scratch space shared between chain stages (tool schemas captured on
    /// the request pass, MCP servers discovered from dotted tool names).
    pub vars: HashMap<String, Value>,
}

impl RequestContext {
    pub fn new(route_id: &str, ingress_protocol: ProviderProtocol) -> Self {
        Self {
            request_id: format!("req_{}", uuid::Uuid::new_v4().simple()),
            route_id: route_id.to_string(),
            category: RouteCategory::Default,
            ingress_protocol,
            start: Instant::now(),
            start_time: chrono::Utc::now(),
            runtime: RuntimeMetadata::empty(),
            stream: false,
            vars: HashMap::new(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    pub fn set_var(&mut self, key: &str, value: Value) {
        self.vars.insert(key.to_string(), value);
    }

    pub fn get_var(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    /// The upstream protocol, once a binding has been resolved.
    pub fn upstream_protocol(&self) -> Option<ProviderProtocol> {
        self.runtime.binding.as_ref().map(|b| b.provider_protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_id_shape() {
        let ctx = RequestContext::new("r1", ProviderProtocol::OpenaiChat);
        assert!(ctx.request_id.starts_with("req_"));
        assert!(ctx.request_id.len() > 10);
    }

    #[test]
    fn test_vars_round_trip() {
        let mut ctx = RequestContext::new("r1", ProviderProtocol::OpenaiChat);
        ctx.set_var("tools", json!([{"name": "shell"}]));
        assert_eq!(ctx.get_var("tools").unwrap()[0]["name"], "shell");
        assert!(ctx.get_var("missing").is_none());
    }
}
