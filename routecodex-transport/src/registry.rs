use crate::profile::{FamilyProfile, builtin_profiles};
use routecodex_core::RouterError;
use routecodex_core::binding::{ProviderBinding, ProviderFamily, ProviderProtocol};
use routecodex_core::config::ProviderConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// What the registry knows about one provider id.
#[derive(Debug, Clone)]
pub struct ProviderEntry {
    pub family: ProviderFamily,
    pub allowed_protocols: Vec<ProviderProtocol>,
    pub default_profile_id: &'static str,
}

/// Resolves `(protocol, provider_id, compatibility_profile)` triples to
/// executable bindings. Built once at load; never instantiates anything,
/// only resolves identifiers to bound objects.
pub struct ProfileRegistry {
    providers: HashMap<String, ProviderEntry>,
    profiles: HashMap<&'static str, Arc<dyn FamilyProfile>>,
}

impl ProfileRegistry {
    /// The built-in provider table. Every known provider id maps to its
    /// family, the protocols it may legally speak, and its default
    /// profile.
    pub fn builtin() -> Self {
        use ProviderProtocol::*;
        let mut providers = HashMap::new();
        let mut insert = |id: &str, family, allowed: Vec<ProviderProtocol>, profile| {
            providers.insert(
                id.to_string(),
                ProviderEntry {
                    family,
                    allowed_protocols: allowed,
                    default_profile_id: profile,
                },
            );
        };
        insert("iflow", ProviderFamily::Iflow, vec![OpenaiChat], "iflow");
        insert(
            "antigravity",
            ProviderFamily::Antigravity,
            vec![GeminiChat],
            "antigravity",
        );
        insert("qwen", ProviderFamily::Qwen, vec![OpenaiChat], "qwen");
        insert("glm", ProviderFamily::Glm, vec![OpenaiChat], "glm");
        insert("gemini", ProviderFamily::Gemini, vec![GeminiChat], "gemini");
        insert(
            "gemini-cli",
            ProviderFamily::GeminiCli,
            vec![GeminiChat],
            "gemini-cli",
        );
        insert(
            "openai",
            ProviderFamily::Openai,
            vec![OpenaiChat, OpenaiResponses],
            "openai",
        );
        insert(
            "anthropic",
            ProviderFamily::Anthropic,
            vec![AnthropicMessages],
            "anthropic",
        );
        // OpenAI-compatible local hosts share the openai family.
        insert("lmstudio", ProviderFamily::Openai, vec![OpenaiChat], "openai");

        let mut profiles: HashMap<&'static str, Arc<dyn FamilyProfile>> = HashMap::new();
        for profile in builtin_profiles() {
            profiles.insert(profile.id(), profile);
        }

        info!(
            providers = providers.len(),
            profiles = profiles.len(),
            "Profile registry built"
        );
        Self {
            providers,
            profiles,
        }
    }

    pub fn entry(&self, provider_id: &str) -> Option<&ProviderEntry> {
        self.providers.get(provider_id)
    }

    pub fn profile(&self, profile_id: &str) -> Option<&Arc<dyn FamilyProfile>> {
        self.profiles.get(profile_id)
    }

    /// Validate a configured provider and produce its binding. Any
    /// inconsistency (unknown provider, disallowed protocol, missing
    /// profile) is fatal at load time.
    pub fn resolve(
        &self,
        provider_id: &str,
        config: &ProviderConfig,
    ) -> Result<(ProviderBinding, Arc<dyn FamilyProfile>), RouterError> {
        let entry = self.providers.get(provider_id).ok_or_else(|| {
            RouterError::BindingRejected(format!("unknown provider '{provider_id}'"))
        })?;

        if !entry.allowed_protocols.contains(&config.provider_protocol) {
            return Err(RouterError::ProtocolNotAllowed {
                protocol: config.provider_protocol.as_str().to_string(),
                provider_id: provider_id.to_string(),
            });
        }

        let profile_id = if config.compatibility_profile.is_empty() {
            entry.default_profile_id
        } else {
            config.compatibility_profile.as_str()
        };
        let Some(profile) = self.profiles.get(profile_id) else {
            return Err(RouterError::ProfileMissing(format!(
                "provider '{provider_id}' references profile '{profile_id}'"
            )));
        };

        let binding = ProviderBinding {
            provider_protocol: config.provider_protocol,
            provider_id: provider_id.to_string(),
            compatibility_profile: profile_id.to_string(),
            provider_family: entry.family,
            module_kind: routecodex_core::binding::ModuleKind::Provider,
            provider_key: format!("{provider_id}.default"),
            tool_call_id_style: config.responses.tool_call_id_style,
        };
        Ok((binding, Arc::clone(profile)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routecodex_core::config::{AuthConfig, ResponsesConfig};

    fn provider_config(protocol: ProviderProtocol, profile: &str) -> ProviderConfig {
        ProviderConfig {
            provider_protocol: protocol,
            compatibility_profile: profile.to_string(),
            base_url: "https://example.com/v1".to_string(),
            auth: AuthConfig::Bearer {
                keys: vec!["k".into()],
            },
            models: vec![],
            responses: ResponsesConfig::default(),
            retry: None,
        }
    }

    #[test]
    fn test_resolve_valid_binding() {
        let registry = ProfileRegistry::builtin();
        let (binding, profile) = registry
            .resolve("glm", &provider_config(ProviderProtocol::OpenaiChat, "glm"))
            .unwrap();
        assert_eq!(binding.provider_family, ProviderFamily::Glm);
        assert_eq!(profile.id(), "glm");
    }

    #[test]
    fn test_unknown_provider_fatal() {
        let registry = ProfileRegistry::builtin();
        let err = registry
            .resolve("mystery", &provider_config(ProviderProtocol::OpenaiChat, "glm"))
            .unwrap_err();
        assert_eq!(err.code(), "binding_rejected");
    }

    #[test]
    fn test_disallowed_protocol_fatal() {
        let registry = ProfileRegistry::builtin();
        let err = registry
            .resolve(
                "glm",
                &provider_config(ProviderProtocol::AnthropicMessages, "glm"),
            )
            .unwrap_err();
        assert_eq!(err.code(), "protocol_not_allowed");
    }

    #[test]
    fn test_missing_profile_fatal() {
        let registry = ProfileRegistry::builtin();
        let err = registry
            .resolve(
                "glm",
                &provider_config(ProviderProtocol::OpenaiChat, "no-such-profile"),
            )
            .unwrap_err();
        assert_eq!(err.code(), "profile_missing");
    }

    #[test]
    fn test_lmstudio_shares_openai_family() {
        let registry = ProfileRegistry::builtin();
        let (binding, profile) = registry
            .resolve(
                "lmstudio",
                &provider_config(ProviderProtocol::OpenaiChat, "openai"),
            )
            .unwrap();
        assert_eq!(binding.provider_family, ProviderFamily::Openai);
        assert_eq!(profile.id(), "openai");
    }

    #[test]
    fn test_openai_allows_responses_protocol() {
        let registry = ProfileRegistry::builtin();
        assert!(
            registry
                .resolve(
                    "openai",
                    &provider_config(ProviderProtocol::OpenaiResponses, "openai"),
                )
                .is_ok()
        );
    }
}
