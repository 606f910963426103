use super::{FamilyProfile, PolicyContext, remove_header};
use routecodex_core::RouterError;
use routecodex_core::binding::ProviderFamily;
use serde_json::{Value, json};

/// Antigravity brand policy: outbound `session_id`/`conversation_id`
/// headers are stripped, and specific upstream failures are wrapped into
/// in-band response error items instead of failing the exchange.
pub struct AntigravityProfile;

/// Upstream error statuses that become in-band items; everything else
/// surfaces as a normal upstream failure.
const IN_BAND_STATUSES: [&str; 2] = ["RESOURCE_EXHAUSTED", "UNAVAILABLE"];

impl FamilyProfile for AntigravityProfile {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Antigravity
    }

    fn id(&self) -> &'static str {
        "antigravity"
    }

    fn apply_header_policy(&self, headers: &mut Vec<(String, String)>, _ctx: &PolicyContext<'_>) {
        remove_header(headers, "session_id");
        remove_header(headers, "conversation_id");
    }

    fn apply_response_policy(
        &self,
        status: u16,
        body: &mut Value,
        _ctx: &PolicyContext<'_>,
    ) -> Result<(), RouterError> {
        if status != 200 {
            return Ok(());
        }
        let Some(error) = body.get("error").cloned() else {
            return Ok(());
        };
        let upstream_status = error["status"].as_str().unwrap_or_default();
        if IN_BAND_STATUSES.contains(&upstream_status) {
            let message = error["message"].as_str().unwrap_or("upstream unavailable");
            *body = json!({
                "candidates": [{
                    "content": {"parts": [{"text": format!("[upstream error] {message}")}],
                                "role": "model"},
                    "finishReason": "STOP",
                }],
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ctx(hints: &HashMap<String, Value>) -> PolicyContext<'_> {
        PolicyContext {
            provider_key: "antigravity.key0",
            request_id: "req-1",
            hints,
        }
    }

    #[test]
    fn test_session_headers_stripped() {
        let hints = HashMap::new();
        let mut headers = vec![
            ("session_id".to_string(), "s-1".to_string()),
            ("conversation_id".to_string(), "c-1".to_string()),
            ("content-type".to_string(), "application/json".to_string()),
        ];
        AntigravityProfile.apply_header_policy(&mut headers, &ctx(&hints));
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].0, "content-type");
    }

    #[test]
    fn test_resource_exhausted_wrapped_in_band() {
        let hints = HashMap::new();
        let mut body = json!({"error": {"status": "RESOURCE_EXHAUSTED", "message": "quota"}});
        AntigravityProfile
            .apply_response_policy(200, &mut body, &ctx(&hints))
            .unwrap();
        let text = body["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap();
        assert!(text.contains("quota"));
    }

    #[test]
    fn test_other_errors_untouched() {
        let hints = HashMap::new();
        let original = json!({"error": {"status": "INVALID_ARGUMENT", "message": "bad"}});
        let mut body = original.clone();
        AntigravityProfile
            .apply_response_policy(200, &mut body, &ctx(&hints))
            .unwrap();
        assert_eq!(body, original);
    }
}
