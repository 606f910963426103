use crate::canonical::{ToolCallEnvelope, normalize_call_id, split_tool_name};
use routecodex_core::RouterError;
use routecodex_core::binding::ToolCallIdStyle;
use serde_json::{Value, json};

/// Lift a chat completion response into the OpenAI Responses shape.
///
/// Output items appear in fixed order: one `reasoning` item when the
/// model produced reasoning content, one `message` item when it produced
/// text, and one `function_call` item per tool call.
pub fn lift_response(chat: &Value, id_style: ToolCallIdStyle) -> Result<Value, RouterError> {
    let message = &chat["choices"][0]["message"];
    if message.is_null() {
        return Err(RouterError::InvalidPayload(
            "chat response has no choices[0].message".into(),
        ));
    }

    let response_id = chat["id"]
        .as_str()
        .map(|id| format!("resp_{id}"))
        .unwrap_or_else(|| format!("resp_{}", uuid::Uuid::new_v4().simple()));

    let mut output = Vec::new();

    let reasoning = message["reasoning_content"].as_str().unwrap_or_default();
    if !reasoning.is_empty() {
        output.push(json!({
            "type": "reasoning",
            "id": format!("rs_{}", uuid::Uuid::new_v4().simple()),
            "summary": [{"type": "summary_text", "text": reasoning}],
        }));
    }

    let text = message["content"].as_str().unwrap_or_default();
    let has_text = !text.is_empty();
    if has_text {
        output.push(json!({
            "type": "message",
            "id": format!("msg_{}", uuid::Uuid::new_v4().simple()),
            "status": "completed",
            "role": "assistant",
            "content": [{"type": "output_text", "text": text, "annotations": []}],
        }));
    }

    let mut has_tool_calls = false;
    if let Some(calls) = message["tool_calls"].as_array() {
        for raw_call in calls {
            let call = ToolCallEnvelope::from_chat_value(raw_call)?;
            let (name, _) = split_tool_name(&call.name);
            let call_id = normalize_call_id(&call.id, id_style);
            has_tool_calls = true;
            output.push(json!({
                "type": "function_call",
                "id": call_id,
                "call_id": call_id,
                "name": name,
                "arguments": call.arguments,
                "status": "in_progress",
            }));
        }
    }

    let status = if has_tool_calls && !has_text {
        "in_progress"
    } else {
        "completed"
    };

    let mut response = json!({
        "id": response_id,
        "object": "response",
        "created_at": chat["created"].as_i64().unwrap_or_else(|| chrono::Utc::now().timestamp()),
        "status": status,
        "model": chat["model"].clone(),
        "output": output,
    });
    if let Some(usage) = chat.get("usage") {
        if !usage.is_null() {
            response["usage"] = json!({
                "input_tokens": usage["prompt_tokens"].clone(),
                "output_tokens": usage["completion_tokens"].clone(),
                "total_tokens": usage["total_tokens"].clone(),
            });
        }
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_response(message: Value) -> Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1714000000,
            "model": "glm-4.7",
            "choices": [{"index": 0, "message": message, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15},
        })
    }

    #[test]
    fn test_text_only_response() {
        let lifted = lift_response(
            &chat_response(json!({"role": "assistant", "content": "hello"})),
            ToolCallIdStyle::Preserve,
        )
        .unwrap();
        assert_eq!(lifted["status"], "completed");
        assert_eq!(lifted["output"][0]["type"], "message");
        assert_eq!(
            lifted["output"][0]["content"][0]["text"],
            "hello"
        );
        assert_eq!(lifted["usage"]["input_tokens"], 10);
    }

    #[test]
    fn test_reasoning_item_emitted_first() {
        let lifted = lift_response(
            &chat_response(json!({
                "role": "assistant",
                "content": "answer",
                "reasoning_content": "thinking...",
            })),
            ToolCallIdStyle::Preserve,
        )
        .unwrap();
        assert_eq!(lifted["output"][0]["type"], "reasoning");
        assert_eq!(
            lifted["output"][0]["summary"][0]["text"],
            "thinking..."
        );
        assert_eq!(lifted["output"][1]["type"], "message");
    }

    #[test]
    fn test_tool_calls_without_text_are_in_progress() {
        let lifted = lift_response(
            &chat_response(json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_abc",
                    "type": "function",
                    "function": {"name": "shell", "arguments": "{\"command\":[\"ls\"]}"},
                }],
            })),
            ToolCallIdStyle::Preserve,
        )
        .unwrap();
        assert_eq!(lifted["status"], "in_progress");
        let call = &lifted["output"][0];
        assert_eq!(call["type"], "function_call");
        assert_eq!(call["id"], "call_abc");
        assert_eq!(call["call_id"], "call_abc");
        assert_eq!(call["status"], "in_progress");
    }

    #[test]
    fn test_tool_calls_with_text_completed() {
        let lifted = lift_response(
            &chat_response(json!({
                "role": "assistant",
                "content": "running it",
                "tool_calls": [{
                    "id": "call_abc",
                    "type": "function",
                    "function": {"name": "shell", "arguments": "{}"},
                }],
            })),
            ToolCallIdStyle::Preserve,
        )
        .unwrap();
        assert_eq!(lifted["status"], "completed");
    }

    #[test]
    fn test_fc_style_rewrites_foreign_id() {
        let lifted = lift_response(
            &chat_response(json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "toolu_xyz",
                    "type": "function",
                    "function": {"name": "shell", "arguments": "{}"},
                }],
            })),
            ToolCallIdStyle::Fc,
        )
        .unwrap();
        let id = lifted["output"][0]["id"].as_str().unwrap();
        assert!(id.starts_with("fc_"), "got {id}");
        assert_eq!(lifted["output"][0]["call_id"], id);
    }

    #[test]
    fn test_dotted_name_rewritten() {
        let lifted = lift_response(
            &chat_response(json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "my.fn", "arguments": "{}"},
                }],
            })),
            ToolCallIdStyle::Preserve,
        )
        .unwrap();
        assert_eq!(lifted["output"][0]["name"], "fn");
    }

    #[test]
    fn test_missing_message_rejected() {
        let err = lift_response(&json!({"choices": []}), ToolCallIdStyle::Preserve).unwrap_err();
        assert_eq!(err.kind(), routecodex_core::error::ErrorKind::Validation);
    }
}
