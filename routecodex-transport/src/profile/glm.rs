use super::{FamilyProfile, PolicyContext};
use routecodex_core::RouterError;
use routecodex_core::binding::ProviderFamily;
use routecodex_core::error::UpstreamFailure;
use serde_json::Value;

/// GLM brand policy. The upstream is OpenAI-compatible; the one sharp
/// edge is the token-limit field: GLM only understands `max_tokens`, so
/// any `max_output_tokens` a caller left behind is folded back here.
pub struct GlmProfile;

impl FamilyProfile for GlmProfile {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Glm
    }

    fn id(&self) -> &'static str {
        "glm"
    }

    fn apply_request_policy(
        &self,
        _endpoint: &mut String,
        _headers: &mut Vec<(String, String)>,
        body: &mut Value,
        _ctx: &PolicyContext<'_>,
    ) -> Result<(), RouterError> {
        if let Some(limit) = body.get("max_output_tokens").cloned() {
            if !limit.is_null() && body.get("max_tokens").map(|v| v.is_null()).unwrap_or(true) {
                body["max_tokens"] = limit;
            }
            if let Some(map) = body.as_object_mut() {
                map.remove("max_output_tokens");
            }
        }
        Ok(())
    }

    fn apply_response_policy(
        &self,
        status: u16,
        body: &mut Value,
        ctx: &PolicyContext<'_>,
    ) -> Result<(), RouterError> {
        // GLM business errors ride on HTTP 200 with an error envelope.
        if status == 200 {
            if let Some(error) = body.get("error") {
                if error.is_object() {
                    return Err(RouterError::Upstream(UpstreamFailure {
                        status_code: 400,
                        code: "HTTP_400".into(),
                        upstream_code: error["code"]
                            .as_str()
                            .and_then(|c| c.parse().ok())
                            .or_else(|| error["code"].as_i64()),
                        provider_key: ctx.provider_key.to_string(),
                        request_id: ctx.request_id.to_string(),
                        body: Some(error.clone()),
                    }));
                }
            }
        }
        Ok(())
    }
}
