use super::{ProtocolAdapter, ProtocolInput, ResponseContext};
use routecodex_core::RouterError;
use routecodex_core::binding::ProviderProtocol;
use serde_json::{Map, Value, json};

/// Gemini wire contract: `contents[]` + `systemInstruction`, camelCase
/// generation config, function declarations grouped under one tools
/// entry. Authentication standardizes to `x-goog-api-key`.
pub struct GeminiChatAdapter;

impl ProtocolAdapter for GeminiChatAdapter {
    fn protocol(&self) -> ProviderProtocol {
        ProviderProtocol::GeminiChat
    }

    fn resolve_endpoint(&self, input: &ProtocolInput<'_>) -> String {
        if input.stream {
            format!("/models/{}:streamGenerateContent?alt=sse", input.model)
        } else {
            format!("/models/{}:generateContent", input.model)
        }
    }

    fn build_body(&self, input: &ProtocolInput<'_>) -> Result<Value, RouterError> {
        let chat = input.body;
        let mut system_parts: Vec<Value> = Vec::new();
        let mut contents: Vec<Value> = Vec::new();

        for message in chat["messages"].as_array().unwrap_or(&Vec::new()) {
            match message["role"].as_str().unwrap_or("user") {
                "system" => {
                    if let Some(text) = message["content"].as_str() {
                        system_parts.push(json!({"text": text}));
                    }
                }
                "assistant" => {
                    let mut parts: Vec<Value> = Vec::new();
                    if let Some(text) = message["content"].as_str() {
                        if !text.is_empty() {
                            parts.push(json!({"text": text}));
                        }
                    }
                    if let Some(calls) = message["tool_calls"].as_array() {
                        for call in calls {
                            let arguments =
                                call["function"]["arguments"].as_str().unwrap_or("{}");
                            let args: Value = serde_json::from_str(arguments)
                                .unwrap_or_else(|_| json!({"_raw": arguments}));
                            parts.push(json!({"functionCall": {
                                "name": call["function"]["name"].clone(),
                                "args": args,
                            }}));
                        }
                    }
                    if !parts.is_empty() {
                        contents.push(json!({"role": "model", "parts": parts}));
                    }
                }
                "tool" => {
                    // Gemini addresses function responses by name, not id.
                    let name = message["name"].as_str().unwrap_or("tool");
                    let response = match message["content"].as_str() {
                        Some(text) => serde_json::from_str::<Value>(text)
                            .unwrap_or_else(|_| json!({"output": text})),
                        None => message["content"].clone(),
                    };
                    contents.push(json!({"role": "user", "parts": [{
                        "functionResponse": {"name": name, "response": response},
                    }]}));
                }
                _ => {
                    if let Some(text) = message["content"].as_str() {
                        contents.push(json!({"role": "user", "parts": [{"text": text}]}));
                    }
                }
            }
        }

        let mut body = Map::new();
        if !system_parts.is_empty() {
            body.insert(
                "systemInstruction".into(),
                json!({"parts": system_parts}),
            );
        }
        body.insert("contents".into(), Value::Array(contents));

        let mut generation = Map::new();
        if let Some(v) = chat.get("max_tokens").and_then(|v| v.as_u64()) {
            generation.insert("maxOutputTokens".into(), json!(v));
        }
        if let Some(v) = chat.get("temperature").and_then(|v| v.as_f64()) {
            generation.insert("temperature".into(), json!(v));
        }
        if let Some(v) = chat.get("top_p").and_then(|v| v.as_f64()) {
            generation.insert("topP".into(), json!(v));
        }
        if !generation.is_empty() {
            body.insert("generationConfig".into(), Value::Object(generation));
        }

        if let Some(tools) = chat["tools"].as_array() {
            let declarations: Vec<Value> = tools
                .iter()
                .filter_map(|tool| {
                    let function = tool.get("function")?;
                    Some(json!({
                        "name": function["name"].clone(),
                        "description": function["description"].clone(),
                        "parameters": function["parameters"].clone(),
                    }))
                })
                .collect();
            if !declarations.is_empty() {
                body.insert(
                    "tools".into(),
                    json!([{"functionDeclarations": declarations}]),
                );
            }
        }
        Ok(Value::Object(body))
    }

    fn parse_response(&self, raw: Value, ctx: &ResponseContext<'_>) -> Result<Value, RouterError> {
        let Some(parts) = raw["candidates"][0]["content"]["parts"].as_array() else {
            return Err(RouterError::InvalidPayload(
                "gemini payload has no candidates[0].content.parts".into(),
            ));
        };

        let mut text_parts: Vec<&str> = Vec::new();
        let mut tool_calls: Vec<Value> = Vec::new();
        for part in parts {
            if let Some(t) = part["text"].as_str() {
                text_parts.push(t);
            }
            if let Some(call) = part.get("functionCall") {
                tool_calls.push(json!({
                    "id": format!("call_{}", uuid::Uuid::new_v4().simple()),
                    "type": "function",
                    "function": {
                        "name": call["name"].clone(),
                        "arguments": serde_json::to_string(&call["args"])?,
                    },
                }));
            }
        }

        let finish_reason = if !tool_calls.is_empty() {
            "tool_calls"
        } else {
            match raw["candidates"][0]["finishReason"].as_str() {
                Some("MAX_TOKENS") => "length",
                _ => "stop",
            }
        };

        let mut message = Map::new();
        message.insert("role".into(), json!("assistant"));
        message.insert(
            "content".into(),
            if text_parts.is_empty() {
                Value::Null
            } else {
                json!(text_parts.join(""))
            },
        );
        if !tool_calls.is_empty() {
            message.insert("tool_calls".into(), Value::Array(tool_calls));
        }

        let mut chat = json!({
            "id": ctx.request_id,
            "object": "chat.completion",
            "created": chrono::Utc::now().timestamp(),
            "model": raw["modelVersion"].as_str().unwrap_or(ctx.model),
            "choices": [{
                "index": 0,
                "message": Value::Object(message),
                "finish_reason": finish_reason,
            }],
        });
        if let Some(usage) = raw.get("usageMetadata") {
            if !usage.is_null() {
                chat["usage"] = json!({
                    "prompt_tokens": usage["promptTokenCount"].clone(),
                    "completion_tokens": usage["candidatesTokenCount"].clone(),
                    "total_tokens": usage["totalTokenCount"].clone(),
                });
            }
        }
        Ok(chat)
    }

    fn auth_header(&self) -> Option<&'static str> {
        Some("x-goog-api-key")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_includes_model_and_stream_variant() {
        let body = json!({});
        let plain = ProtocolInput { body: &body, model: "gemini-2.5-pro", stream: false };
        let streaming = ProtocolInput { body: &body, model: "gemini-2.5-pro", stream: true };
        assert_eq!(
            GeminiChatAdapter.resolve_endpoint(&plain),
            "/models/gemini-2.5-pro:generateContent"
        );
        assert_eq!(
            GeminiChatAdapter.resolve_endpoint(&streaming),
            "/models/gemini-2.5-pro:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn test_build_body_contents_and_system() {
        let chat = json!({
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
            ],
            "max_tokens": 512,
            "temperature": 0.3,
        });
        let input = ProtocolInput { body: &chat, model: "gemini-2.5-pro", stream: false };
        let body = GeminiChatAdapter.build_body(&input).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 512);
        assert_eq!(body["generationConfig"]["temperature"], 0.3);
    }

    #[test]
    fn test_tools_become_function_declarations() {
        let chat = json!({
            "messages": [{"role": "user", "content": "x"}],
            "tools": [{"type": "function", "function": {
                "name": "shell", "description": "run", "parameters": {"type": "object"}}}],
        });
        let input = ProtocolInput { body: &chat, model: "g", stream: false };
        let body = GeminiChatAdapter.build_body(&input).unwrap();
        assert_eq!(body["tools"][0]["functionDeclarations"][0]["name"], "shell");
    }

    #[test]
    fn test_parse_function_call_response() {
        let raw = json!({
            "candidates": [{"content": {"parts": [
                {"functionCall": {"name": "shell", "args": {"command": ["ls"]}}},
            ]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2,
                              "totalTokenCount": 6},
        });
        let ctx = ResponseContext { request_id: "req_1", model: "gemini-2.5-pro" };
        let chat = GeminiChatAdapter.parse_response(raw, &ctx).unwrap();
        let call = &chat["choices"][0]["message"]["tool_calls"][0];
        assert_eq!(call["function"]["name"], "shell");
        assert!(call["id"].as_str().unwrap().starts_with("call_"));
        assert_eq!(chat["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(chat["usage"]["total_tokens"], 6);
    }

    #[test]
    fn test_auth_header_standardized() {
        assert_eq!(GeminiChatAdapter.auth_header(), Some("x-goog-api-key"));
    }
}
