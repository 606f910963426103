//! Family profiles: the brand-specific policy layer above the protocol
//! adapters. Each profile owns header/auth/request/response/signing
//! customization for one provider family, expressed as declarative
//! policy hooks registered once at startup.

mod anthropic;
mod antigravity;
mod gemini;
mod gemini_cli;
mod glm;
mod iflow;
mod openai;
mod qwen;

pub use anthropic::AnthropicProfile;
pub use antigravity::AntigravityProfile;
pub use gemini::GeminiProfile;
pub use gemini_cli::GeminiCliProfile;
pub use glm::GlmProfile;
pub use iflow::IflowProfile;
pub use openai::OpenaiProfile;
pub use qwen::QwenProfile;

use routecodex_core::RouterError;
use routecodex_core::binding::ProviderFamily;
use routecodex_core::error::UpstreamFailure;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Request-scoped context handed to policy hooks.
pub struct PolicyContext<'a> {
    pub provider_key: &'a str,
    pub request_id: &'a str,
    /// Upstream hints accumulated along the chain (web-search flags,
    /// session ids, signing material).
    pub hints: &'a HashMap<String, Value>,
}

/// Declarative policy hooks for one provider family. Every hook defaults
/// to a no-op; profiles override only what their brand demands.
pub trait FamilyProfile: Send + Sync {
    fn family(&self) -> ProviderFamily;

    fn id(&self) -> &'static str;

    /// Field injection/removal and per-family endpoint overrides.
    fn apply_request_policy(
        &self,
        endpoint: &mut String,
        headers: &mut Vec<(String, String)>,
        body: &mut Value,
        ctx: &PolicyContext<'_>,
    ) -> Result<(), RouterError> {
        let _ = (endpoint, headers, body, ctx);
        Ok(())
    }

    /// Header precedence rules (forced UA strings, brand telemetry
    /// headers, stripped fields).
    fn apply_header_policy(&self, headers: &mut Vec<(String, String)>, ctx: &PolicyContext<'_>) {
        let _ = (headers, ctx);
    }

    /// Optional request signing, applied after headers are final.
    fn apply_signing_policy(
        &self,
        headers: &mut Vec<(String, String)>,
        body: &Value,
        ctx: &PolicyContext<'_>,
    ) -> Result<(), RouterError> {
        let _ = (headers, body, ctx);
        Ok(())
    }

    /// Classify HTTP-200 business-error envelopes. May rewrite the body
    /// (in-band error items) or reject it outright.
    fn apply_response_policy(
        &self,
        status: u16,
        body: &mut Value,
        ctx: &PolicyContext<'_>,
    ) -> Result<(), RouterError> {
        let _ = (status, body, ctx);
        Ok(())
    }

    /// Upstream failure classification into the kernel's standard shape.
    fn map_error(&self, failure: UpstreamFailure, ctx: &PolicyContext<'_>) -> RouterError {
        let _ = ctx;
        RouterError::Upstream(failure)
    }
}

impl std::fmt::Debug for dyn FamilyProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FamilyProfile").field("id", &self.id()).finish()
    }
}

/// Replace-or-insert a header, case-insensitively.
pub fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value.to_string()));
}

pub fn remove_header(headers: &mut Vec<(String, String)>, name: &str) {
    headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
}

pub fn get_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// All built-in profiles, for registry construction at startup.
pub fn builtin_profiles() -> Vec<Arc<dyn FamilyProfile>> {
    vec![
        Arc::new(IflowProfile),
        Arc::new(AntigravityProfile),
        Arc::new(QwenProfile),
        Arc::new(GlmProfile),
        Arc::new(GeminiProfile),
        Arc::new(GeminiCliProfile),
        Arc::new(OpenaiProfile),
        Arc::new(AnthropicProfile),
    ]
}
