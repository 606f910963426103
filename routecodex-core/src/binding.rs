use serde::{Deserialize, Serialize};

/// Wire protocol spoken to an upstream provider.
///
/// Exactly four protocols exist; anything else is rejected at
/// configuration load.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderProtocol {
    OpenaiChat,
    OpenaiResponses,
    AnthropicMessages,
    GeminiChat,
}

impl ProviderProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderProtocol::OpenaiChat => "openai-chat",
            ProviderProtocol::OpenaiResponses => "openai-responses",
            ProviderProtocol::AnthropicMessages => "anthropic-messages",
            ProviderProtocol::GeminiChat => "gemini-chat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "openai-chat" => Some(ProviderProtocol::OpenaiChat),
            "openai-responses" => Some(ProviderProtocol::OpenaiResponses),
            "anthropic-messages" => Some(ProviderProtocol::AnthropicMessages),
            "gemini-chat" => Some(ProviderProtocol::GeminiChat),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provider brand family. Owns header/auth/request/response/signing policy
/// through its family profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderFamily {
    Iflow,
    Antigravity,
    Qwen,
    Glm,
    Gemini,
    GeminiCli,
    Openai,
    Anthropic,
}

impl ProviderFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFamily::Iflow => "iflow",
            ProviderFamily::Antigravity => "antigravity",
            ProviderFamily::Qwen => "qwen",
            ProviderFamily::Glm => "glm",
            ProviderFamily::Gemini => "gemini",
            ProviderFamily::GeminiCli => "gemini-cli",
            ProviderFamily::Openai => "openai",
            ProviderFamily::Anthropic => "anthropic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "iflow" => Some(ProviderFamily::Iflow),
            "antigravity" => Some(ProviderFamily::Antigravity),
            "qwen" => Some(ProviderFamily::Qwen),
            "glm" => Some(ProviderFamily::Glm),
            "gemini" => Some(ProviderFamily::Gemini),
            "gemini-cli" => Some(ProviderFamily::GeminiCli),
            "openai" => Some(ProviderFamily::Openai),
            "anthropic" => Some(ProviderFamily::Anthropic),
            _ => None,
        }
    }

    pub fn all() -> &'static [ProviderFamily] {
        &[
            ProviderFamily::Iflow,
            ProviderFamily::Antigravity,
            ProviderFamily::Qwen,
            ProviderFamily::Glm,
            ProviderFamily::Gemini,
            ProviderFamily::GeminiCli,
            ProviderFamily::Openai,
            ProviderFamily::Anthropic,
        ]
    }
}

impl std::fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Module variant tag. The chain dispatches by tag, not by inheritance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Provider,
    Compatibility,
    Llmswitch,
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Provider => "provider",
            ModuleKind::Compatibility => "compatibility",
            ModuleKind::Llmswitch => "llmswitch",
        }
    }

    /// Critical kinds make preload failures fatal. Optional kinds (none in
    /// the current closed set, reserved for workflow/monitoring) are logged
    /// and skipped.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            ModuleKind::Provider | ModuleKind::Compatibility | ModuleKind::Llmswitch
        )
    }
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Style of tool-call ids required by a provider's Responses surface.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallIdStyle {
    /// Require `call_`/`fc_`/`fc-` prefixed ids; rewrite anything else.
    Fc,
    /// Pass ids through untouched; only enforce non-emptiness/uniqueness.
    #[default]
    Preserve,
}

/// The resolved, immutable provider binding.
///
/// Produced once at configuration load and consumed by every request.
/// Invalid triples never survive startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderBinding {
    pub provider_protocol: ProviderProtocol,
    pub provider_id: String,
    pub compatibility_profile: String,

    /// Resolved from `provider_id` by the profile registry.
    pub provider_family: ProviderFamily,

    /// Which module implementation serves this binding.
    pub module_kind: ModuleKind,

    /// Key identifying the credential in use, for error correlation.
    pub provider_key: String,

    #[serde(default)]
    pub tool_call_id_style: ToolCallIdStyle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_round_trip() {
        for s in [
            "openai-chat",
            "openai-responses",
            "anthropic-messages",
            "gemini-chat",
        ] {
            let p = ProviderProtocol::parse(s).unwrap();
            assert_eq!(p.as_str(), s);
        }
        assert!(ProviderProtocol::parse("grpc").is_none());
    }

    #[test]
    fn test_family_round_trip() {
        for f in ProviderFamily::all() {
            assert_eq!(ProviderFamily::parse(f.as_str()), Some(*f));
        }
        assert!(ProviderFamily::parse("mistral").is_none());
    }

    #[test]
    fn test_serde_kebab_case() {
        let p: ProviderProtocol = serde_json::from_str("\"anthropic-messages\"").unwrap();
        assert_eq!(p, ProviderProtocol::AnthropicMessages);
        let f: ProviderFamily = serde_json::from_str("\"gemini-cli\"").unwrap();
        assert_eq!(f, ProviderFamily::GeminiCli);
    }

    #[test]
    fn test_all_module_kinds_critical() {
        assert!(ModuleKind::Provider.is_critical());
        assert!(ModuleKind::Compatibility.is_critical());
        assert!(ModuleKind::Llmswitch.is_critical());
    }
}
