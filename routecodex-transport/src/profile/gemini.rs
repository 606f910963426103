use super::{FamilyProfile, PolicyContext, set_header};
use routecodex_core::binding::ProviderFamily;
use serde_json::json;

/// Gemini API brand policy: brand telemetry headers are injected on
/// every request. Authentication is already standardized to
/// `x-goog-api-key` by the protocol adapter.
pub struct GeminiProfile;

pub(super) const API_CLIENT: &str = concat!("routecodex/", env!("CARGO_PKG_VERSION"), " gl-rust");

impl FamilyProfile for GeminiProfile {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Gemini
    }

    fn id(&self) -> &'static str {
        "gemini"
    }

    fn apply_header_policy(&self, headers: &mut Vec<(String, String)>, _ctx: &PolicyContext<'_>) {
        set_header(headers, "X-Goog-Api-Client", API_CLIENT);
        set_header(
            headers,
            "Client-Metadata",
            &json!({"platform": "cli", "pluginType": "routecodex"}).to_string(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::get_header;
    use std::collections::HashMap;

    #[test]
    fn test_brand_headers_injected() {
        let hints = HashMap::new();
        let ctx = PolicyContext {
            provider_key: "gemini.key0",
            request_id: "req-1",
            hints: &hints,
        };
        let mut headers = vec![];
        GeminiProfile.apply_header_policy(&mut headers, &ctx);
        assert!(get_header(&headers, "X-Goog-Api-Client").unwrap().starts_with("routecodex/"));
        assert!(get_header(&headers, "Client-Metadata").unwrap().contains("routecodex"));
    }
}
