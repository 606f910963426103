use super::{ProtocolAdapter, ProtocolInput, ResponseContext};
use routecodex_core::RouterError;
use routecodex_core::binding::ProviderProtocol;
use serde_json::Value;

/// The canonical wire contract. The internal chat shape IS this wire
/// shape, so both directions are pass-through.
pub struct OpenaiChatAdapter;

impl ProtocolAdapter for OpenaiChatAdapter {
    fn protocol(&self) -> ProviderProtocol {
        ProviderProtocol::OpenaiChat
    }

    fn resolve_endpoint(&self, _input: &ProtocolInput<'_>) -> String {
        "/chat/completions".to_string()
    }

    fn build_body(&self, input: &ProtocolInput<'_>) -> Result<Value, RouterError> {
        Ok(input.body.clone())
    }

    fn parse_response(
        &self,
        raw: Value,
        _ctx: &ResponseContext<'_>,
    ) -> Result<Value, RouterError> {
        if raw["choices"].is_null() {
            return Err(RouterError::InvalidPayload(
                "upstream chat response has no choices".into(),
            ));
        }
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pass_through() {
        let adapter = OpenaiChatAdapter;
        let body = json!({"model": "glm-4.7", "messages": [{"role": "user", "content": "hi"}]});
        let input = ProtocolInput {
            body: &body,
            model: "glm-4.7",
            stream: false,
        };
        assert_eq!(adapter.resolve_endpoint(&input), "/chat/completions");
        assert_eq!(adapter.build_body(&input).unwrap(), body);
    }

    #[test]
    fn test_parse_rejects_shapeless_response() {
        let adapter = OpenaiChatAdapter;
        let ctx = ResponseContext {
            request_id: "r",
            model: "m",
        };
        assert!(adapter.parse_response(json!({"ok": true}), &ctx).is_err());
        assert!(
            adapter
                .parse_response(json!({"choices": [{"message": {"content": "x"}}]}), &ctx)
                .is_ok()
        );
    }
}
