use super::{FamilyProfile, PolicyContext, set_header};
use routecodex_core::binding::ProviderFamily;

/// Anthropic brand policy: the versioned API header is mandatory on
/// every request.
pub struct AnthropicProfile;

const API_VERSION: &str = "2023-06-01";

impl FamilyProfile for AnthropicProfile {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Anthropic
    }

    fn id(&self) -> &'static str {
        "anthropic"
    }

    fn apply_header_policy(&self, headers: &mut Vec<(String, String)>, _ctx: &PolicyContext<'_>) {
        set_header(headers, "anthropic-version", API_VERSION);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::get_header;
    use std::collections::HashMap;

    #[test]
    fn test_version_header_injected() {
        let hints = HashMap::new();
        let ctx = PolicyContext {
            provider_key: "anthropic.key0",
            request_id: "req-1",
            hints: &hints,
        };
        let mut headers = vec![];
        AnthropicProfile.apply_header_policy(&mut headers, &ctx);
        assert_eq!(get_header(&headers, "anthropic-version"), Some("2023-06-01"));
    }
}
