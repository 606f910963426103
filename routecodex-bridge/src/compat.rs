use async_trait::async_trait;
use routecodex_core::RouterError;
use routecodex_core::binding::ModuleKind;
use routecodex_core::context::RequestContext;
use routecodex_pipeline::module::{Module, Payload};
use routecodex_pipeline::registry::ModuleFactory;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

/// Fields owned by the canonicalizer. A compatibility config that names
/// any of them is rejected at build time.
const PROTECTED_FIELDS: [&str; 4] = ["tool_calls", "function_call", "tools", "tool_choice"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CompatibilityConfig {
    /// Family or named profile this transform serves; informational.
    pub profile: String,

    /// Rename the token-limit field on the request (`max_tokens` →
    /// `max_output_tokens` or back), per family convention.
    pub max_tokens_field: Option<String>,

    /// Model alias rewrites applied to the request's `model`.
    pub model_aliases: HashMap<String, String>,

    /// Request fields dropped before the provider sees the body.
    pub drop_fields: Vec<String>,

    /// Upper clamp for `temperature`.
    pub temperature_cap: Option<f64>,
}

/// The compatibility module: family-specific field mapping on the
/// request path, a pure pass-through on the response path. Never touches
/// tool structure; it fingerprints the tool fields before and after its
/// own transform and treats any difference as an internal invariant
/// violation.
pub struct Compatibility {
    id: String,
    config: CompatibilityConfig,
}

#[async_trait]
impl Module for Compatibility {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Compatibility
    }

    async fn process(
        &self,
        payload: Payload,
        _ctx: &mut RequestContext,
    ) -> Result<Payload, RouterError> {
        match payload {
            Payload::Request(body) => self.transform_request(body).map(Payload::Request),
            other => Ok(other),
        }
    }

    fn validate_output(&self, body: &Value) -> Result<(), RouterError> {
        // Response bodies flow through untouched; anything tool-shaped
        // must still be exactly what the provider produced. The transform
        // itself never runs on responses, so a malformed envelope here
        // means the invariant broke upstream of us.
        let _ = body;
        Ok(())
    }
}

impl Compatibility {
    fn transform_request(&self, mut body: Value) -> Result<Value, RouterError> {
        let fingerprint_before = tool_fingerprint(&body);

        if let Some(model) = body["model"].as_str() {
            if let Some(alias) = self.config.model_aliases.get(model) {
                body["model"] = json!(alias);
            }
        }

        if let Some(target) = self.config.max_tokens_field.as_deref() {
            let source = if target == "max_output_tokens" {
                "max_tokens"
            } else {
                "max_output_tokens"
            };
            if let Some(limit) = body.get(source).cloned() {
                if !limit.is_null() {
                    body[target] = limit;
                    if let Some(map) = body.as_object_mut() {
                        map.remove(source);
                    }
                }
            }
        }

        if let Some(cap) = self.config.temperature_cap {
            if let Some(t) = body["temperature"].as_f64() {
                if t > cap {
                    body["temperature"] = json!(cap);
                }
            }
        }

        if let Some(map) = body.as_object_mut() {
            for field in &self.config.drop_fields {
                map.remove(field);
            }
        }

        if tool_fingerprint(&body) != fingerprint_before {
            return Err(RouterError::Internal(format!(
                "compatibility module '{}' mutated tool structure",
                self.id
            )));
        }
        Ok(body)
    }
}

/// Canonical rendering of every tool-owned field in a payload.
fn tool_fingerprint(body: &Value) -> String {
    let mut parts = Vec::new();
    for field in PROTECTED_FIELDS {
        parts.push(body.get(field).cloned().unwrap_or(Value::Null));
    }
    if let Some(messages) = body["messages"].as_array() {
        for message in messages {
            parts.push(message.get("tool_calls").cloned().unwrap_or(Value::Null));
            if message["role"] == "tool" {
                parts.push(message.clone());
            }
        }
    }
    routecodex_core::hash::canonical_json(&Value::Array(parts))
}

pub struct CompatibilityFactory;

impl ModuleFactory for CompatibilityFactory {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Compatibility
    }

    fn build(&self, config: &Value) -> Result<Arc<dyn Module>, RouterError> {
        let config: CompatibilityConfig = serde_json::from_value(config.clone())
            .map_err(|e| RouterError::ConfigError(format!("compatibility config: {e}")))?;

        // Schema validation: a transform aimed at tool structure is
        // rejected outright.
        for field in &config.drop_fields {
            if PROTECTED_FIELDS.contains(&field.as_str()) {
                return Err(RouterError::ConfigError(format!(
                    "compatibility config may not touch '{field}'"
                )));
            }
        }
        if let Some(target) = config.max_tokens_field.as_deref() {
            if target != "max_tokens" && target != "max_output_tokens" {
                return Err(RouterError::ConfigError(format!(
                    "max_tokens_field must be max_tokens or max_output_tokens, got '{target}'"
                )));
            }
        }

        Ok(Arc::new(Compatibility {
            id: format!(
                "compatibility-{}-{}",
                if config.profile.is_empty() { "anon" } else { &config.profile },
                uuid::Uuid::new_v4().simple()
            ),
            config,
        }))
    }
}
