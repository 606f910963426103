use super::{FamilyProfile, PolicyContext};
use routecodex_core::RouterError;
use routecodex_core::binding::ProviderFamily;
use serde_json::Value;

/// Qwen brand policy. The DashScope compatible-mode endpoint is close
/// enough to stock OpenAI that only one adjustment is needed: it rejects
/// unknown sampling fields, so the OpenAI-only knobs are dropped.
pub struct QwenProfile;

const UNSUPPORTED_FIELDS: [&str; 3] = ["logit_bias", "logprobs", "top_logprobs"];

impl FamilyProfile for QwenProfile {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Qwen
    }

    fn id(&self) -> &'static str {
        "qwen"
    }

    fn apply_request_policy(
        &self,
        _endpoint: &mut String,
        _headers: &mut Vec<(String, String)>,
        body: &mut Value,
        _ctx: &PolicyContext<'_>,
    ) -> Result<(), RouterError> {
        if let Some(map) = body.as_object_mut() {
            for field in UNSUPPORTED_FIELDS {
                map.remove(field);
            }
        }
        Ok(())
    }
}
