use super::gemini::API_CLIENT;
use super::{FamilyProfile, PolicyContext, set_header};
use routecodex_core::binding::ProviderFamily;
use serde_json::json;

/// Gemini CLI brand policy: the Gemini telemetry headers plus the CLI
/// user agent the cloud endpoint expects.
pub struct GeminiCliProfile;

impl FamilyProfile for GeminiCliProfile {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::GeminiCli
    }

    fn id(&self) -> &'static str {
        "gemini-cli"
    }

    fn apply_header_policy(&self, headers: &mut Vec<(String, String)>, _ctx: &PolicyContext<'_>) {
        set_header(headers, "User-Agent", "GeminiCLI/routecodex");
        set_header(headers, "X-Goog-Api-Client", API_CLIENT);
        set_header(
            headers,
            "Client-Metadata",
            &json!({"platform": "cli", "pluginType": "gemini-cli"}).to_string(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::get_header;
    use std::collections::HashMap;

    #[test]
    fn test_cli_ua_and_brand_headers() {
        let hints = HashMap::new();
        let ctx = PolicyContext {
            provider_key: "gemini-cli.key0",
            request_id: "req-1",
            hints: &hints,
        };
        let mut headers = vec![("user-agent".to_string(), "curl".to_string())];
        GeminiCliProfile.apply_header_policy(&mut headers, &ctx);
        assert_eq!(get_header(&headers, "User-Agent"), Some("GeminiCLI/routecodex"));
        assert!(get_header(&headers, "X-Goog-Api-Client").is_some());
    }
}
