use super::{ProtocolAdapter, ProtocolInput, ResponseContext};
use routecodex_core::RouterError;
use routecodex_core::binding::ProviderProtocol;
use serde_json::{Map, Value, json};

/// OpenAI Responses wire contract: flat tool definitions, `input[]`
/// items instead of messages, `max_output_tokens`.
pub struct OpenaiResponsesAdapter;

impl ProtocolAdapter for OpenaiResponsesAdapter {
    fn protocol(&self) -> ProviderProtocol {
        ProviderProtocol::OpenaiResponses
    }

    fn resolve_endpoint(&self, _input: &ProtocolInput<'_>) -> String {
        "/responses".to_string()
    }

    fn build_body(&self, input: &ProtocolInput<'_>) -> Result<Value, RouterError> {
        let chat = input.body;
        let mut body = Map::new();
        body.insert("model".into(), json!(input.model));

        let mut instructions: Vec<&str> = Vec::new();
        let mut items: Vec<Value> = Vec::new();
        let empty_messages = Vec::new();
        for message in chat["messages"].as_array().unwrap_or(&empty_messages) {
            match message["role"].as_str().unwrap_or("user") {
                "system" => {
                    if let Some(text) = message["content"].as_str() {
                        instructions.push(text);
                    }
                }
                "assistant" => {
                    if let Some(calls) = message["tool_calls"].as_array() {
                        for call in calls {
                            items.push(json!({
                                "type": "function_call",
                                "call_id": call["id"].clone(),
                                "name": call["function"]["name"].clone(),
                                "arguments": call["function"]["arguments"].clone(),
                            }));
                        }
                    }
                    if let Some(text) = message["content"].as_str() {
                        if !text.is_empty() {
                            items.push(json!({
                                "role": "assistant",
                                "content": [{"type": "output_text", "text": text}],
                            }));
                        }
                    }
                }
                "tool" => {
                    items.push(json!({
                        "type": "function_call_output",
                        "call_id": message["tool_call_id"].clone(),
                        "output": message["content"].clone(),
                    }));
                }
                role => {
                    if let Some(text) = message["content"].as_str() {
                        items.push(json!({
                            "role": role,
                            "content": [{"type": "input_text", "text": text}],
                        }));
                    }
                }
            }
        }
        if !instructions.is_empty() {
            body.insert("instructions".into(), json!(instructions.join("\n\n")));
        }
        body.insert("input".into(), Value::Array(items));

        if let Some(tools) = chat["tools"].as_array() {
            let flat: Vec<Value> = tools
                .iter()
                .filter_map(|tool| {
                    let function = tool.get("function")?;
                    Some(json!({
                        "type": "function",
                        "name": function["name"].clone(),
                        "description": function["description"].clone(),
                        "parameters": function["parameters"].clone(),
                    }))
                })
                .collect();
            if !flat.is_empty() {
                body.insert("tools".into(), Value::Array(flat));
            }
        }

        if let Some(v) = chat.get("max_tokens").and_then(|v| v.as_u64()) {
            body.insert("max_output_tokens".into(), json!(v));
        }
        for field in ["temperature", "top_p", "tool_choice"] {
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
        let Some(output) = raw["output"].as_array() else {
            return Err(RouterError::InvalidPayload(
                "responses payload has no output array".into(),
            ));
        };

        let mut text_parts: Vec<&str> = Vec::new();
        let mut reasoning_parts: Vec<&str> = Vec::new();
        let mut tool_calls: Vec<Value> = Vec::new();
        for item in output {
            match item["type"].as_str().unwrap_or_default() {
                "message" => {
                    if let Some(blocks) = item["content"].as_array() {
                        for block in blocks {
                            if block["type"] == "output_text" {
                                if let Some(t) = block["text"].as_str() {
                                    text_parts.push(t);
                                }
                            }
                        }
                    }
                }
                "reasoning" => {
                    if let Some(summaries) = item["summary"].as_array() {
                        for summary in summaries {
                            if let Some(t) = summary["text"].as_str() {
                                reasoning_parts.push(t);
                            }
                        }
                    }
                }
                "function_call" => {
                    let id = item["call_id"]
                        .as_str()
                        .or_else(|| item["id"].as_str())
                        .unwrap_or_default();
                    tool_calls.push(json!({
                        "id": id,
                        "type": "function",
                        "function": {
                            "name": item["name"].clone(),
                            "arguments": item["arguments"].clone(),
                        },
                    }));
                }
                _ => {}
            }
        }

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
        let finish_reason = if tool_calls.is_empty() { "stop" } else { "tool_calls" };
        if !tool_calls.is_empty() {
            message.insert("tool_calls".into(), Value::Array(tool_calls));
        }

        let mut chat = json!({
            "id": raw["id"].as_str().unwrap_or(ctx.request_id),
            "object": "chat.completion",
            "created": raw["created_at"].as_i64().unwrap_or_else(|| chrono::Utc::now().timestamp()),
            "model": raw["model"].as_str().unwrap_or(ctx.model),
            "choices": [{
                "index": 0,
                "message": Value::Object(message),
                "finish_reason": finish_reason,
            }],
        });
        if let Some(usage) = raw.get("usage") {
            if !usage.is_null() {
                chat["usage"] = json!({
                    "prompt_tokens": usage["input_tokens"].clone(),
                    "completion_tokens": usage["output_tokens"].clone(),
                    "total_tokens": usage["total_tokens"].clone(),
                });
            }
        }
        Ok(chat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(body: &Value) -> ProtocolInput<'_> {
        ProtocolInput {
            body,
            model: "gpt-5",
            stream: false,
        }
    }

    #[test]
    fn test_build_body_shapes() {
        let chat = json!({
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": null, "tool_calls": [{
                    "id": "call_1", "type": "function",
                    "function": {"name": "shell", "arguments": "{}"}}]},
                {"role": "tool", "tool_call_id": "call_1", "content": "{\"version\":\"rcc.tool.v1\"}"},
            ],
            "tools": [{"type": "function", "function": {
                "name": "shell", "description": "run", "parameters": {"type": "object"}}}],
            "max_tokens": 1024,
        });
        let body = OpenaiResponsesAdapter.build_body(&input(&chat)).unwrap();
        assert_eq!(body["instructions"], "be brief");
        assert_eq!(body["input"][0]["content"][0]["type"], "input_text");
        assert_eq!(body["input"][1]["type"], "function_call");
        assert_eq!(body["input"][1]["call_id"], "call_1");
        assert_eq!(body["input"][2]["type"], "function_call_output");
        assert_eq!(body["tools"][0]["name"], "shell");
        assert_eq!(body["max_output_tokens"], 1024);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_parse_response_to_chat() {
        let raw = json!({
            "id": "resp_1",
            "model": "gpt-5",
            "created_at": 1714000000,
            "status": "completed",
            "output": [
                {"type": "reasoning", "id": "rs_1",
                 "summary": [{"type": "summary_text", "text": "hmm"}]},
                {"type": "message", "id": "msg_1", "status": "completed", "role": "assistant",
                 "content": [{"type": "output_text", "text": "hello"}]},
                {"type": "function_call", "id": "fc_1", "call_id": "call_9",
                 "name": "shell", "arguments": "{}", "status": "completed"},
            ],
            "usage": {"input_tokens": 7, "output_tokens": 3, "total_tokens": 10},
        });
        let ctx = ResponseContext { request_id: "r", model: "gpt-5" };
        let chat = OpenaiResponsesAdapter.parse_response(raw, &ctx).unwrap();
        let message = &chat["choices"][0]["message"];
        assert_eq!(message["content"], "hello");
        assert_eq!(message["reasoning_content"], "hmm");
        assert_eq!(message["tool_calls"][0]["id"], "call_9");
        assert_eq!(chat["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(chat["usage"]["prompt_tokens"], 7);
    }
}
