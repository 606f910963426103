use super::{FamilyProfile, PolicyContext};
use routecodex_core::RouterError;
use routecodex_core::binding::ProviderFamily;
use routecodex_core::error::UpstreamFailure;

/// OpenAI (and OpenAI-compatible hosts like lmstudio) brand policy.
/// The wire contract is the native one, so the only brand behavior is
/// error classification.
pub struct OpenaiProfile;

impl FamilyProfile for OpenaiProfile {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Openai
    }

    fn id(&self) -> &'static str {
        "openai"
    }

    fn map_error(&self, mut failure: UpstreamFailure, _ctx: &PolicyContext<'_>) -> RouterError {
        // Surface the upstream's own error code when it carries one.
        if let Some(code) = failure
            .body
            .as_ref()
            .and_then(|b| b["error"]["code"].as_str())
        {
            failure.code = code.to_string();
        }
        RouterError::Upstream(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_upstream_error_code_surfaced() {
        let hints = HashMap::new();
        let ctx = PolicyContext {
            provider_key: "openai.key0",
            request_id: "req-1",
            hints: &hints,
        };
        let failure = UpstreamFailure {
            status_code: 429,
            code: "HTTP_429".into(),
            upstream_code: None,
            provider_key: "openai.key0".into(),
            request_id: "req-1".into(),
            body: Some(json!({"error": {"code": "rate_limit_exceeded", "message": "slow down"}})),
        };
        match OpenaiProfile.map_error(failure, &ctx) {
            RouterError::Upstream(mapped) => assert_eq!(mapped.code, "rate_limit_exceeded"),
            other => panic!("unexpected: {other}"),
        }
    }
}
