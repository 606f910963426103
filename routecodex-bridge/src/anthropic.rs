use crate::canonical::{ToolCallEnvelope, fresh_call_id};
use routecodex_core::RouterError;
use serde_json::{Map, Value, json};

/// Lower an Anthropic Messages request into canonical chat form.
///
/// `system` (string or block array) becomes a leading system message;
/// `tool_use` blocks become `tool_calls`; `tool_result` blocks become
/// tool-role messages; tool definitions move from `input_schema` to
/// `function.parameters`.
pub fn lower_request(payload: &Value) -> Result<(Value, Map<String, Value>), RouterError> {
    let mut messages: Vec<Value> = Vec::new();
    let mut tool_schemas = Map::new();

    match &payload["system"] {
        Value::String(s) if !s.is_empty() => {
            messages.push(json!({"role": "system", "content": s}));
        }
        Value::Array(blocks) => {
            let text = collect_block_text(blocks);
            if !text.is_empty() {
                messages.push(json!({"role": "system", "content": text}));
            }
        }
        _ => {}
    }

    let Some(input_messages) = payload["messages"].as_array() else {
        return Err(RouterError::InvalidPayload("messages must be an array".into()));
    };

    for message in input_messages {
        let role = message["role"].as_str().unwrap_or("user");
        match &message["content"] {
            Value::String(text) => {
                messages.push(json!({"role": role, "content": text}));
            }
            Value::Array(blocks) => {
                lower_blocks(role, blocks, &mut messages)?;
            }
            other => {
                return Err(RouterError::InvalidPayload(format!(
                    "message content must be string or array, got {other}"
                )));
            }
        }
    }

    if messages.is_empty() {
        return Err(RouterError::NoMessages);
    }

    let mut chat = Map::new();
    if let Some(model) = payload["model"].as_str() {
        chat.insert("model".into(), json!(model));
    }
    chat.insert("messages".into(), Value::Array(messages));

    if let Some(tools) = payload["tools"].as_array() {
        let lowered: Vec<Value> = tools
            .iter()
            .filter_map(|tool| {
                let name = tool["name"].as_str()?;
                if let Some(schema) = tool.get("input_schema") {
                    tool_schemas.insert(name.to_string(), schema.clone());
                }
                Some(json!({
                    "type": "function",
                    "function": {
                        "name": name,
                        "description": tool["description"].clone(),
                        "parameters": tool["input_schema"].clone(),
                    },
                }))
            })
            .collect();
        if !lowered.is_empty() {
            chat.insert("tools".into(), Value::Array(lowered));
        }
    }

    for (theirs, ours) in [
        ("max_tokens", "max_tokens"),
        ("temperature", "temperature"),
        ("top_p", "top_p"),
        ("stream", "stream"),
    ] {
        if let Some(v) = payload.get(theirs) {
            if !v.is_null() {
                chat.insert(ours.into(), v.clone());
            }
        }
    }

    Ok((Value::Object(chat), tool_schemas))
}

fn lower_blocks(
    role: &str,
    blocks: &[Value],
    messages: &mut Vec<Value>,
) -> Result<(), RouterError> {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    for block in blocks {
        match block["type"].as_str().unwrap_or("text") {
            "text" => {
                if let Some(t) = block["text"].as_str() {
                    text_parts.push(t);
                }
            }
            "tool_use" => {
                let name = block["name"].as_str().ok_or_else(|| {
                    RouterError::ToolCallInvalid("tool_use without name".into())
                })?;
                let id = block["id"].as_str().unwrap_or_default();
                // `input` is an object on the wire; encoded exactly once here.
                let arguments = serde_json::to_string(&block["input"])?;
                let call = ToolCallEnvelope {
                    id: if id.is_empty() { fresh_call_id() } else { id.to_string() },
                    name: name.to_string(),
                    arguments,
                };
                tool_calls.push(call.to_chat_value());
            }
            "tool_result" => {
                let call_id = block["tool_use_id"].as_str().unwrap_or_default();
                if call_id.is_empty() {
                    return Err(RouterError::ToolCallInvalid(
                        "tool_result without tool_use_id".into(),
                    ));
                }
                let content = match &block["content"] {
                    Value::String(s) => s.clone(),
                    Value::Array(blocks) => collect_block_text(blocks),
                    other => serde_json::to_string(other)?,
                };
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "content": content,
                }));
            }
            // Extended-thinking blocks have no chat slot.
            "thinking" | "redacted_thinking" => {}
            other => {
                return Err(RouterError::InvalidPayload(format!(
                    "unsupported content block type '{other}'"
                )));
            }
        }
    }

    if !text_parts.is_empty() || !tool_calls.is_empty() {
        let mut message = Map::new();
        message.insert("role".into(), json!(role));
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
        messages.push(Value::Object(message));
    }
    Ok(())
}

fn collect_block_text(blocks: &[Value]) -> String {
    blocks
        .iter()
        .filter_map(|b| b["text"].as_str())
        .collect::<Vec<_>>()
        .join("")
}

/// Lift a chat completion response into the Anthropic Messages shape.
pub fn lift_response(chat: &Value) -> Result<Value, RouterError> {
    let message = &chat["choices"][0]["message"];
    if message.is_null() {
        return Err(RouterError::InvalidPayload(
            "chat response has no choices[0].message".into(),
        ));
    }

    let mut content = Vec::new();
    if let Some(text) = message["content"].as_str() {
        if !text.is_empty() {
            content.push(json!({"type": "text", "text": text}));
        }
    }

    let mut has_tool_use = false;
    if let Some(calls) = message["tool_calls"].as_array() {
        for raw_call in calls {
            let call = ToolCallEnvelope::from_chat_value(raw_call)?;
            // `input` must go back to an object; strings that fail to
            // parse are surfaced rather than silently wrapped.
            let input: Value = serde_json::from_str(&call.arguments).map_err(|e| {
                RouterError::ToolCallInvalid(format!(
                    "tool call '{}' arguments are not valid JSON: {e}",
                    call.name
                ))
            })?;
            has_tool_use = true;
            content.push(json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": input,
            }));
        }
    }

    let stop_reason = if has_tool_use {
        "tool_use"
    } else {
        match chat["choices"][0]["finish_reason"].as_str() {
            Some("length") => "max_tokens",
            _ => "end_turn",
        }
    };

    let mut response = json!({
        "id": chat["id"].as_str().map(|id| format!("msg_{id}"))
            .unwrap_or_else(|| format!("msg_{}", uuid::Uuid::new_v4().simple())),
        "type": "message",
        "role": "assistant",
        "model": chat["model"].clone(),
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": Value::Null,
    });
    if let Some(usage) = chat.get("usage") {
        if !usage.is_null() {
            response["usage"] = json!({
                "input_tokens": usage["prompt_tokens"].clone(),
                "output_tokens": usage["completion_tokens"].clone(),
            });
        }
    }
    Ok(response)
}
