//! Protocol adapters: one per upstream wire contract.
//!
//! Adapters own wire-shape concerns only (path, body structure, tools
//! field location, response parsing) and never branch on provider id or
//! family; brand policy lives in the profile layer above.

mod anthropic_messages;
mod gemini_chat;
mod openai_chat;
mod openai_responses;

pub use anthropic_messages::AnthropicMessagesAdapter;
pub use gemini_chat::GeminiChatAdapter;
pub use openai_chat::OpenaiChatAdapter;
pub use openai_responses::OpenaiResponsesAdapter;

use routecodex_core::RouterError;
use routecodex_core::binding::ProviderProtocol;
use serde_json::Value;

/// Canonical-chat input handed to an adapter.
pub struct ProtocolInput<'a> {
    pub body: &'a Value,
    pub model: &'a str,
    pub stream: bool,
}

pub struct ResponseContext<'a> {
    pub request_id: &'a str,
    pub model: &'a str,
}

pub trait ProtocolAdapter: Send + Sync {
    fn protocol(&self) -> ProviderProtocol;

    /// Path relative to the provider's base URL.
    fn resolve_endpoint(&self, input: &ProtocolInput<'_>) -> String;

    /// Canonical chat payload → wire body.
    fn build_body(&self, input: &ProtocolInput<'_>) -> Result<Value, RouterError>;

    /// Wire response → canonical chat response.
    fn parse_response(&self, raw: Value, ctx: &ResponseContext<'_>) -> Result<Value, RouterError>;

    /// Header carrying the credential, when the protocol standardizes a
    /// non-Authorization header (gemini-chat uses `x-goog-api-key`).
    fn auth_header(&self) -> Option<&'static str> {
        None
    }
}

static OPENAI_CHAT: OpenaiChatAdapter = OpenaiChatAdapter;
static OPENAI_RESPONSES: OpenaiResponsesAdapter = OpenaiResponsesAdapter;
static ANTHROPIC_MESSAGES: AnthropicMessagesAdapter = AnthropicMessagesAdapter;
static GEMINI_CHAT: GeminiChatAdapter = GeminiChatAdapter;

/// Exactly four adapters exist; resolution is total over the protocol
/// enum so an unknown combination cannot reach request time.
pub fn adapter_for(protocol: ProviderProtocol) -> &'static dyn ProtocolAdapter {
    match protocol {
        ProviderProtocol::OpenaiChat => &OPENAI_CHAT,
        ProviderProtocol::OpenaiResponses => &OPENAI_RESPONSES,
        ProviderProtocol::AnthropicMessages => &ANTHROPIC_MESSAGES,
        ProviderProtocol::GeminiChat => &GEMINI_CHAT,
    }
}
