use super::{ProtocolAdapter, ProtocolInput, ResponseContext};
use routecodex_core::RouterError;
use routecodex_core::binding::ProviderProtocol;
use serde_json::{Map, Value, json};

/// Anthropic Messages wire contract: `system` outside the message list,
/// content block arrays, `tool_use`/`tool_result` blocks, required
/// `max_tokens`.
pub struct AnthropicMessagesAdapter;

const DEFAULT_MAX_TOKENS: u64 = 4096;

impl ProtocolAdapter for AnthropicMessagesAdapter {
    fn protocol(&self) -> ProviderProtocol {
        ProviderProtocol::AnthropicMessages
    }

    fn resolve_endpoint(&self, _input: &ProtocolInput<'_>) -> String {
        "/messages".to_string()
    }

    fn build_body(&self, input: &ProtocolInput<'_>) -> Result<Value, RouterError> {
        let chat = input.body;
        let mut system_parts: Vec<&str> = Vec::new();
        let mut messages: Vec<Value> = Vec::new();

        let empty_messages = Vec::new();
        for message in chat["messages"].as_array().unwrap_or(&empty_messages) {
            match message["role"].as_str().unwrap_or("user") {
                "system" => {
                    if let Some(text) = message["content"].as_str() {
                        system_parts.push(text);
                    }
                }
                "assistant" => {
                    let mut blocks: Vec<Value> = Vec::new();
                    if let Some(text) = message["content"].as_str() {
                        if !text.is_empty() {
                            blocks.push(json!({"type": "text", "text": text}));
                        }
                    }
                    if let Some(calls) = message["tool_calls"].as_array() {
                        for call in calls {
                            let arguments = call["function"]["arguments"]
                                .as_str()
                                .unwrap_or("{}");
                            let parsed: Value = serde_json::from_str(arguments)
                                .unwrap_or_else(|_| json!({"_raw": arguments}));
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": call["id"].clone(),
                                "name": call["function"]["name"].clone(),
                                "input": parsed,
                            }));
                        }
                    }
                    if !blocks.is_empty() {
                        messages.push(json!({"role": "assistant", "content": blocks}));
                    }
                }
                "tool" => {
                    messages.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": message["tool_call_id"].clone(),
                            "content": message["content"].clone(),
                        }],
                    }));
                }
                role => {
                    if let Some(text) = message["content"].as_str() {
                        messages.push(json!({"role": role, "content": text}));
                    }
                }
            }
        }

        let mut body = Map::new();
        body.insert("model".into(), json!(input.model));
        if !system_parts.is_empty() {
            body.insert("system".into(), json!(system_parts.join("\n\n")));
        }
        body.insert("messages".into(), Value::Array(messages));
        body.insert(
            "max_tokens".into(),
            json!(
                chat.get("max_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(DEFAULT_MAX_TOKENS)
            ),
        );

        if let Some(tools) = chat["tools"].as_array() {
            let mapped: Vec<Value> = tools
                .iter()
                .filter_map(|tool| {
                    let function = tool.get("function")?;
                    Some(json!({
                        "name": function["name"].clone(),
                        "description": function["description"].clone(),
                        "input_schema": function["parameters"].clone(),
                    }))
                })
                .collect();
            if !mapped.is_empty() {
                body.insert("tools".into(), Value::Array(mapped));
            }
        }
        for field in ["temperature", "top_p"] {
            if let Some(v) = chat.get(field) {
                if !v.is_null() {
                    body.insert(field.into(), v.clone());
                }
            }
        }
        if input.stream {
            body.insert("stream".into(), json!(true));
        }
        Ok(Value::Object(body))
    }

    fn parse_response(&self, raw: Value, ctx: &ResponseContext<'_>) -> Result<Value, RouterError> {
        let Some(blocks) = raw["content"].as_array() else {
            return Err(RouterError::InvalidPayload(
                "messages payload has no content array".into(),
            ));
        };

        let mut text_parts: Vec<&str> = Vec::new();
        let mut reasoning_parts: Vec<&str> = Vec::new();
        let mut tool_calls: Vec<Value> = Vec::new();
        for block in blocks {
            match block["type"].as_str().unwrap_or("text") {
                "text" => {
                    if let Some(t) = block["text"].as_str() {
                        text_parts.push(t);
                    }
                }
                "thinking" => {
                    if let Some(t) = block["thinking"].as_str() {
                        reasoning_parts.push(t);
                    }
                }
                "tool_use" => {
                    tool_calls.push(json!({
                        "id": block["id"].clone(),
                        "type": "function",
                        "function": {
                            "name": block["name"].clone(),
                            "arguments": serde_json::to_string(&block["input"])?,
                        },
                    }));
                }
                _ => {}
            }
        }

        let finish_reason = match raw["stop_reason"].as_str() {
            Some("tool_use") => "tool_calls",
            Some("max_tokens") => "length",
            _ => "stop",
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
        if !reasoning_parts.is_empty() {
            message.insert("reasoning_content".into(), json!(reasoning_parts.join("\n")));
        }
        if !tool_calls.is_empty() {
            message.insert("tool_calls".into(), Value::Array(tool_calls));
        }

        let mut chat = json!({
            "id": raw["id"].as_str().unwrap_or(ctx.request_id),
            "object": "chat.completion",
            "created": chrono::Utc::now().timestamp(),
            "model": raw["model"].as_str().unwrap_or(ctx.model),
            "choices": [{
                "index": 0,
                "message": Value::Object(message),
                "finish_reason": finish_reason,
            }],
        });
        if let Some(usage) = raw.get("usage") {
            if !usage.is_null() {
                let input_tokens = usage["input_tokens"].as_i64().unwrap_or(0);
                let output_tokens = usage["output_tokens"].as_i64().unwrap_or(0);
                chat["usage"] = json!({
                    "prompt_tokens": input_tokens,
                    "completion_tokens": output_tokens,
                    "total_tokens": input_tokens + output_tokens,
                });
            }
        }
        Ok(chat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_body_system_and_tools() {
        let chat = json!({
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"},
            ],
            "tools": [{"type": "function", "function": {
                "name": "shell", "description": "run",
                "parameters": {"type": "object"}}}],
            "max_tokens": 2000,
        });
        let input = ProtocolInput { body: &chat, model: "claude-sonnet-4", stream: false };
        let body = AnthropicMessagesAdapter.build_body(&input).unwrap();
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["max_tokens"], 2000);
    }

    #[test]
    fn test_max_tokens_defaulted() {
        let chat = json!({"messages": [{"role": "user", "content": "hi"}]});
        let input = ProtocolInput { body: &chat, model: "m", stream: false };
        let body = AnthropicMessagesAdapter.build_body(&input).unwrap();
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_tool_call_becomes_tool_use_block() {
        let chat = json!({
            "messages": [{"role": "assistant", "content": null, "tool_calls": [{
                "id": "call_1", "type": "function",
                "function": {"name": "shell", "arguments": "{\"command\":[\"ls\"]}"}}]}],
        });
        let input = ProtocolInput { body: &chat, model: "m", stream: false };
        let body = AnthropicMessagesAdapter.build_body(&input).unwrap();
        let block = &body["messages"][0]["content"][0];
        assert_eq!(block["type"], "tool_use");
        assert_eq!(block["input"]["command"][0], "ls");
    }

    #[test]
    fn test_parse_tool_use_response() {
        let raw = json!({
            "id": "msg_1", "type": "message", "role": "assistant", "model": "claude",
            "content": [
                {"type": "text", "text": "running"},
                {"type": "tool_use", "id": "toolu_1", "name": "shell",
                 "input": {"command": ["ls"]}},
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 5, "output_tokens": 2},
        });
        let ctx = ResponseContext { request_id: "r", model: "m" };
        let chat = AnthropicMessagesAdapter.parse_response(raw, &ctx).unwrap();
        let message = &chat["choices"][0]["message"];
        assert_eq!(message["content"], "running");
        assert_eq!(message["tool_calls"][0]["function"]["arguments"], "{\"command\":[\"ls\"]}");
        assert_eq!(chat["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(chat["usage"]["total_tokens"], 7);
    }
}
