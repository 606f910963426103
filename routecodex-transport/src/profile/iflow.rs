use super::{FamilyProfile, PolicyContext, set_header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use routecodex_core::RouterError;
use routecodex_core::binding::ProviderFamily;
use routecodex_core::error::UpstreamFailure;
use serde_json::{Value, json};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// iFlow brand policy.
///
/// The upstream contract is strict: the UA must be exactly `iFlow-Cli`
/// regardless of what the client sent, `session-id`/`conversation-id`
/// are covered by an HMAC signature, and HTTP-200 bodies carrying
/// `{status: 439}` are really expired-token failures.
pub struct IflowProfile;

impl FamilyProfile for IflowProfile {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Iflow
    }

    fn id(&self) -> &'static str {
        "iflow"
    }

    fn apply_request_policy(
        &self,
        endpoint: &mut String,
        _headers: &mut Vec<(String, String)>,
        _body: &mut Value,
        ctx: &PolicyContext<'_>,
    ) -> Result<(), RouterError> {
        // Web-search requests take a dedicated path on the same host.
        let web_search = ctx
            .hints
            .get("iflowWebSearch")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if web_search {
            *endpoint = "/chat/retrieve".to_string();
        }
        Ok(())
    }

    fn apply_header_policy(&self, headers: &mut Vec<(String, String)>, _ctx: &PolicyContext<'_>) {
        // UA precedence: the brand value wins over whatever came in.
        set_header(headers, "User-Agent", "iFlow-Cli");
    }

    fn apply_signing_policy(
        &self,
        headers: &mut Vec<(String, String)>,
        _body: &Value,
        ctx: &PolicyContext<'_>,
    ) -> Result<(), RouterError> {
        let session_id = ctx.hints.get("session_id").and_then(|v| v.as_str());
        let conversation_id = ctx.hints.get("conversation_id").and_then(|v| v.as_str());
        let signing_key = ctx.hints.get("iflow_signing_key").and_then(|v| v.as_str());

        let (Some(session_id), Some(conversation_id)) = (session_id, conversation_id) else {
            return Ok(());
        };
        set_header(headers, "session-id", session_id);
        set_header(headers, "conversation-id", conversation_id);

        let Some(key) = signing_key else {
            return Ok(());
        };
        let ts = chrono::Utc::now().timestamp_millis();
        // Field ordering is part of the contract; the upstream verifies
        // the exact concatenation below.
        let payload = format!("session-id={session_id};conversation-id={conversation_id};ts={ts}");
        let mut mac = HmacSha256::new_from_slice(key.as_bytes())
            .map_err(|e| RouterError::Internal(format!("hmac key: {e}")))?;
        mac.update(payload.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());
        set_header(headers, "x-iflow-timestamp", &ts.to_string());
        set_header(headers, "x-iflow-signature", &signature);
        Ok(())
    }

    fn apply_response_policy(
        &self,
        status: u16,
        body: &mut Value,
        ctx: &PolicyContext<'_>,
    ) -> Result<(), RouterError> {
        if status != 200 {
            return Ok(());
        }
        // Token expiry arrives as a successful HTTP exchange with a
        // business-error body.
        if body["status"].as_i64() == Some(439) {
            return Err(RouterError::Upstream(UpstreamFailure {
                status_code: 403,
                code: "token_expired".into(),
                upstream_code: Some(439),
                provider_key: ctx.provider_key.to_string(),
                request_id: ctx.request_id.to_string(),
                body: Some(body.clone()),
            }));
        }
        if let (Some(error_code), Some(msg)) = (body.get("error_code"), body["msg"].as_str()) {
            return Err(RouterError::Upstream(UpstreamFailure {
                status_code: 400,
                code: "HTTP_400".into(),
                upstream_code: error_code.as_i64(),
                provider_key: ctx.provider_key.to_string(),
                request_id: ctx.request_id.to_string(),
                body: Some(json!({"error_code": error_code, "msg": msg})),
            }));
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
            provider_key: "iflow.key0",
            request_id: "req-1",
            hints,
        }
    }

    #[test]
    fn test_ua_forced_over_client_value() {
        let hints = HashMap::new();
        let mut headers = vec![("User-Agent".to_string(), "curl/8.7.1".to_string())];
        IflowProfile.apply_header_policy(&mut headers, &ctx(&hints));
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].1, "iFlow-Cli");
    }

    #[test]
    fn test_web_search_endpoint_override() {
        let mut hints = HashMap::new();
        hints.insert("iflowWebSearch".to_string(), json!(true));
        let mut endpoint = "/chat/completions".to_string();
        IflowProfile
            .apply_request_policy(&mut endpoint, &mut vec![], &mut json!({}), &ctx(&hints))
            .unwrap();
        assert_eq!(endpoint, "/chat/retrieve");
    }

    #[test]
    fn test_no_override_without_hint() {
        let hints = HashMap::new();
        let mut endpoint = "/chat/completions".to_string();
        IflowProfile
            .apply_request_policy(&mut endpoint, &mut vec![], &mut json!({}), &ctx(&hints))
            .unwrap();
        assert_eq!(endpoint, "/chat/completions");
    }

    #[test]
    fn test_status_439_reclassified_as_token_expired() {
        let hints = HashMap::new();
        let mut body = json!({"status": 439, "msg": "token expired"});
        let err = IflowProfile
            .apply_response_policy(200, &mut body, &ctx(&hints))
            .unwrap_err();
        match err {
            RouterError::Upstream(failure) => {
                assert_eq!(failure.status_code, 403);
                assert_eq!(failure.code, "token_expired");
                assert_eq!(failure.upstream_code, Some(439));
                assert_eq!(failure.provider_key, "iflow.key0");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_error_code_msg_is_http_400() {
        let hints = HashMap::new();
        let mut body = json!({"error_code": 1102, "msg": "invalid param"});
        let err = IflowProfile
            .apply_response_policy(200, &mut body, &ctx(&hints))
            .unwrap_err();
        match err {
            RouterError::Upstream(failure) => {
                assert_eq!(failure.code, "HTTP_400");
                assert_eq!(failure.upstream_code, Some(1102));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_clean_200_passes() {
        let hints = HashMap::new();
        let mut body = json!({"choices": [{"message": {"content": "hi"}}]});
        assert!(
            IflowProfile
                .apply_response_policy(200, &mut body, &ctx(&hints))
                .is_ok()
        );
    }

    #[test]
    fn test_signing_covers_session_headers() {
        let mut hints = HashMap::new();
        hints.insert("session_id".to_string(), json!("s-1"));
        hints.insert("conversation_id".to_string(), json!("c-1"));
        hints.insert("iflow_signing_key".to_string(), json!("secret"));
        let mut headers = vec![];
        IflowProfile
            .apply_signing_policy(&mut headers, &json!({}), &ctx(&hints))
            .unwrap();
        let names: Vec<&str> = headers.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"session-id"));
        assert!(names.contains(&"conversation-id"));
        assert!(names.contains(&"x-iflow-signature"));
        assert!(names.contains(&"x-iflow-timestamp"));
    }

    #[test]
    fn test_no_signature_without_key() {
        let mut hints = HashMap::new();
        hints.insert("session_id".to_string(), json!("s-1"));
        hints.insert("conversation_id".to_string(), json!("c-1"));
        let mut headers = vec![];
        IflowProfile
            .apply_signing_policy(&mut headers, &json!({}), &ctx(&hints))
            .unwrap();
        assert!(!headers.iter().any(|(n, _)| n == "x-iflow-signature"));
    }
}
