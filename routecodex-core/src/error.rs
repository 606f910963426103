use crate::binding::ProviderProtocol;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Error classification. No silent fallback exists for any of these;
/// recovery is limited to the kernel's retry policy for transient
/// `Upstream` errors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Validation,
    Routing,
    Binding,
    Instance,
    Upstream,
    Auth,
    Tool,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Routing => "routing",
            ErrorKind::Binding => "binding",
            ErrorKind::Instance => "instance",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Auth => "auth",
            ErrorKind::Tool => "tool",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Normalized upstream failure produced by the provider kernel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpstreamFailure {
    pub status_code: u16,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_code: Option<i64>,
    pub provider_key: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Unified error type for RouteCodex.
#[derive(Error, Debug)]
pub enum RouterError {
    // ── validation ──
    #[error("Malformed payload: {0}")]
    InvalidPayload(String),

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("No messages in request")]
    NoMessages,

    // ── routing ──
    #[error("No route matched model '{0}'")]
    NoRoute(String),

    #[error("Route condition failed: {0}")]
    ConditionFailed(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    // ── binding ──
    #[error("Binding rejected: {0}")]
    BindingRejected(String),

    #[error("Profile not found: {0}")]
    ProfileMissing(String),

    #[error("Protocol '{protocol}' not allowed for provider '{provider_id}'")]
    ProtocolNotAllowed {
        protocol: String,
        provider_id: String,
    },

    // ── instance ──
    #[error("Instance not found: {kind}/{config_hash}")]
    InstanceNotFound { kind: String, config_hash: String },

    #[error("Instance unhealthy: {id} is {state}")]
    InstanceUnhealthy { id: String, state: String },

    // ── upstream ──
    #[error("Upstream error {}: {}", .0.status_code, .0.code)]
    Upstream(UpstreamFailure),

    #[error("Upstream timeout after {0}ms")]
    Timeout(u64),

    #[error("Request cancelled")]
    Cancelled,

    // ── auth ──
    #[error("Credential missing: {0}")]
    AuthMissing(String),

    #[error("Credential expired: {0}")]
    AuthExpired(String),

    #[error("Credential invalid: {0}")]
    AuthInvalid(String),

    // ── tool ──
    #[error("Invalid tool call: {0}")]
    ToolCallInvalid(String),

    #[error("Canonicalization failed: {0}")]
    Canonicalization(String),

    // ── other ──
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Internal: {0}")]
    Internal(String),
}

impl RouterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RouterError::InvalidPayload(_)
            | RouterError::SchemaViolation(_)
            | RouterError::NoMessages
            | RouterError::Serde(_) => ErrorKind::Validation,
            RouterError::NoRoute(_)
            | RouterError::ConditionFailed(_)
            | RouterError::UnknownModel(_) => ErrorKind::Routing,
            RouterError::BindingRejected(_)
            | RouterError::ProfileMissing(_)
            | RouterError::ProtocolNotAllowed { .. }
            | RouterError::ConfigError(_) => ErrorKind::Binding,
            RouterError::InstanceNotFound { .. } | RouterError::InstanceUnhealthy { .. } => {
                ErrorKind::Instance
            }
            RouterError::Upstream(_) | RouterError::Timeout(_) | RouterError::Cancelled => {
                ErrorKind::Upstream
            }
            RouterError::AuthMissing(_)
            | RouterError::AuthExpired(_)
            | RouterError::AuthInvalid(_) => ErrorKind::Auth,
            RouterError::ToolCallInvalid(_) | RouterError::Canonicalization(_) => ErrorKind::Tool,
            RouterError::Io(_) | RouterError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code for clients and tests.
    pub fn code(&self) -> &'static str {
        match self {
            RouterError::InvalidPayload(_) => "invalid_payload",
            RouterError::SchemaViolation(_) => "schema_violation",
            RouterError::NoMessages => "no_messages",
            RouterError::NoRoute(_) => "no_route",
            RouterError::ConditionFailed(_) => "condition_failed",
            RouterError::UnknownModel(_) => "unknown_model",
            RouterError::BindingRejected(_) => "binding_rejected",
            RouterError::ProfileMissing(_) => "profile_missing",
            RouterError::ProtocolNotAllowed { .. } => "protocol_not_allowed",
            RouterError::InstanceNotFound { .. } => "instance_not_found",
            RouterError::InstanceUnhealthy { .. } => "instance_unhealthy",
            RouterError::Upstream(f) => match f.status_code {
                401 | 403 => "upstream_auth",
                _ => "upstream_error",
            },
            RouterError::Timeout(_) => "timeout",
            RouterError::Cancelled => "cancelled",
            RouterError::AuthMissing(_) => "auth_missing",
            RouterError::AuthExpired(_) => "auth_expired",
            RouterError::AuthInvalid(_) => "auth_invalid",
            RouterError::ToolCallInvalid(_) => "tool_call_invalid",
            RouterError::Canonicalization(_) => "canonicalization_failed",
            RouterError::ConfigError(_) => "config_invalid",
            RouterError::Io(_) => "io_error",
            RouterError::Serde(_) => "serde_error",
            RouterError::Internal(_) => "internal",
        }
    }

    /// Map to the client-visible HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            RouterError::InvalidPayload(_)
            | RouterError::SchemaViolation(_)
            | RouterError::NoMessages => 400,
            RouterError::NoRoute(_) | RouterError::UnknownModel(_) => 404,
            RouterError::ConditionFailed(_) => 422,
            RouterError::BindingRejected(_)
            | RouterError::ProfileMissing(_)
            | RouterError::ProtocolNotAllowed { .. }
            | RouterError::ConfigError(_) => 500,
            RouterError::InstanceNotFound { .. } => 503,
            RouterError::InstanceUnhealthy { .. } => 503,
            RouterError::Upstream(f) => match f.status_code {
                // Business-envelope reclassifications keep their mapped code.
                s @ 400..=599 => s,
                _ => 502,
            },
            RouterError::Timeout(_) => 504,
            RouterError::Cancelled => 499,
            RouterError::AuthMissing(_)
            | RouterError::AuthExpired(_)
            | RouterError::AuthInvalid(_) => 401,
            RouterError::ToolCallInvalid(_) | RouterError::Canonicalization(_) => 502,
            RouterError::Io(_) | RouterError::Serde(_) | RouterError::Internal(_) => 500,
        }
    }

    pub fn provider_key(&self) -> Option<&str> {
        match self {
            RouterError::Upstream(f) => Some(f.provider_key.as_str()),
            _ => None,
        }
    }
}

/// Structured error context attached to every surfaced failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub kind: ErrorKind,
    pub message: String,
    pub code: String,
    #[serde(default)]
    pub details: Value,
    pub location: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub request_id: String,
}

impl ErrorContext {
    pub fn new(err: &RouterError, location: &str, request_id: &str) -> Self {
        let mut details = json!({ "requestId": request_id });
        if let Some(key) = err.provider_key() {
            details["providerKey"] = json!(key);
        }
        if let RouterError::Upstream(f) = err {
            if let Some(code) = f.upstream_code {
                details["upstreamCode"] = json!(code);
            }
        }
        Self {
            kind: err.kind(),
            message: err.to_string(),
            code: err.code().to_string(),
            details,
            location: location.to_string(),
            timestamp: chrono::Utc::now(),
            request_id: request_id.to_string(),
        }
    }

    /// Render into the client-facing protocol's conventional error envelope.
    pub fn to_client_body(&self, protocol: ProviderProtocol) -> Value {
        match protocol {
            ProviderProtocol::AnthropicMessages => json!({
                "type": "error",
                "error": {
                    "type": self.code,
                    "message": self.message,
                    "details": self.details,
                },
            }),
            ProviderProtocol::GeminiChat => json!({
                "error": {
                    "code": self.code,
                    "message": self.message,
                    "status": self.kind.as_str(),
                    "details": self.details,
                },
            }),
            // OpenAI Chat and Responses share the envelope shape.
            _ => json!({
                "error": {
                    "message": self.message,
                    "type": self.kind.as_str(),
                    "code": self.code,
                    "details": self.details,
                },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(status: u16, upstream_code: Option<i64>) -> RouterError {
        RouterError::Upstream(UpstreamFailure {
            status_code: status,
            code: "upstream_error".into(),
            upstream_code,
            provider_key: "glm.key1".into(),
            request_id: "req-1".into(),
            body: None,
        })
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(RouterError::NoRoute("m".into()).status_code(), 404);
        assert_eq!(RouterError::ConditionFailed("c".into()).status_code(), 422);
        assert_eq!(
            RouterError::InstanceNotFound {
                kind: "provider".into(),
                config_hash: "abc".into()
            }
            .status_code(),
            503
        );
        assert_eq!(RouterError::Timeout(30000).status_code(), 504);
        assert_eq!(RouterError::AuthExpired("k".into()).status_code(), 401);
        assert_eq!(upstream(502, None).status_code(), 502);
        assert_eq!(upstream(403, Some(439)).status_code(), 403);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(RouterError::NoRoute("m".into()).kind(), ErrorKind::Routing);
        assert_eq!(
            RouterError::ToolCallInvalid("x".into()).kind(),
            ErrorKind::Tool
        );
        assert_eq!(upstream(500, None).kind(), ErrorKind::Upstream);
        assert_eq!(
            RouterError::Internal("bug".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(RouterError::ConditionFailed("c".into()).code(), "condition_failed");
        assert_eq!(RouterError::NoRoute("m".into()).code(), "no_route");
        assert_eq!(
            RouterError::ToolCallInvalid("bad".into()).code(),
            "tool_call_invalid"
        );
        assert_eq!(upstream(403, Some(439)).code(), "upstream_auth");
    }

    #[test]
    fn test_context_carries_correlation_fields() {
        let err = upstream(403, Some(439));
        let ctx = ErrorContext::new(&err, "transport::kernel", "req-42");
        assert_eq!(ctx.details["requestId"], "req-42");
        assert_eq!(ctx.details["providerKey"], "glm.key1");
        assert_eq!(ctx.details["upstreamCode"], 439);
    }

    #[test]
    fn test_client_body_openai_envelope() {
        let err = RouterError::ConditionFailed("category mismatch".into());
        let ctx = ErrorContext::new(&err, "pipeline::chain", "req-7");
        let body = ctx.to_client_body(ProviderProtocol::OpenaiChat);
        assert_eq!(body["error"]["code"], "condition_failed");
        assert_eq!(body["error"]["type"], "routing");
        assert_eq!(body["error"]["details"]["requestId"], "req-7");
    }

    #[test]
    fn test_client_body_anthropic_envelope() {
        let err = RouterError::InvalidPayload("missing messages".into());
        let ctx = ErrorContext::new(&err, "server::handlers", "req-9");
        let body = ctx.to_client_body(ProviderProtocol::AnthropicMessages);
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "invalid_payload");
    }
}
