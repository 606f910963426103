use crate::canonical::{
    ToolCallEnvelope, ToolResultEnvelope, fresh_call_id, split_tool_name,
};
use routecodex_core::RouterError;
use serde_json::{Map, Value, json};

/// Result of lowering a Responses request to canonical chat form.
#[derive(Debug)]
pub struct LoweredRequest {
    pub chat: Value,
    /// Servers discovered from dotted tool names, for MCP discovery.
    pub servers: Vec<String>,
    /// Function parameter schemas by (rewritten) tool name, captured for
    /// response-side argument normalization.
    pub tool_schemas: Map<String, Value>,
}

/// Lower an OpenAI Responses request payload into chat form.
///
/// `instructions` becomes a leading system message; `input[]` items map
/// onto chat messages; tool definitions move from the Responses flat
/// shape into `function` wrappers.
pub fn lower_request(payload: &Value) -> Result<LoweredRequest, RouterError> {
    let mut messages: Vec<Value> = Vec::new();
    let mut servers: Vec<String> = Vec::new();
    let mut tool_schemas = Map::new();

    if let Some(instructions) = payload["instructions"].as_str() {
        if !instructions.is_empty() {
            messages.push(json!({"role": "system", "content": instructions}));
        }
    }

    // `input` may be a bare string (shorthand for one user message) or
    // the item array.
    match &payload["input"] {
        Value::String(text) => {
            messages.push(json!({"role": "user", "content": text}));
        }
        Value::Array(items) => {
            let mut last_call_id: Option<String> = None;
            for item in items {
                lower_item(item, &mut messages, &mut servers, &mut last_call_id)?;
            }
        }
        Value::Null => {}
        other => {
            return Err(RouterError::InvalidPayload(format!(
                "input must be a string or array, got {}",
                type_name(other)
            )));
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
            .filter_map(|t| lower_tool(t, &mut servers, &mut tool_schemas))
            .collect();
        if !lowered.is_empty() {
            chat.insert("tools".into(), Value::Array(lowered));
        }
    }
    if let Some(choice) = payload.get("tool_choice") {
        if !choice.is_null() {
            chat.insert("tool_choice".into(), choice.clone());
        }
    }

    // Responses-side names for shared sampling fields.
    if let Some(v) = payload.get("max_output_tokens").and_then(|v| v.as_u64()) {
        chat.insert("max_tokens".into(), json!(v));
    }
    for field in ["temperature", "top_p", "stream"] {
        if let Some(v) = payload.get(field) {
            if !v.is_null() {
                chat.insert(field.into(), v.clone());
            }
        }
    }

    servers.sort();
    servers.dedup();
    Ok(LoweredRequest {
        chat: Value::Object(chat),
        servers,
        tool_schemas,
    })
}

fn lower_item(
    item: &Value,
    messages: &mut Vec<Value>,
    servers: &mut Vec<String>,
    last_call_id: &mut Option<String>,
) -> Result<(), RouterError> {
    // Items without a type are plain messages.
    let item_type = item["type"].as_str().unwrap_or("message");
    match item_type {
        "message" => {
            let role = item["role"].as_str().unwrap_or("user");
            let text = collect_text(&item["content"]);
            if !text.is_empty() {
                messages.push(json!({"role": role, "content": text}));
            }
        }
        "function_call" | "tool_call" => {
            let raw_name = item["name"]
                .as_str()
                .ok_or_else(|| RouterError::ToolCallInvalid("function_call without name".into()))?;
            let (name, server) = split_tool_name(raw_name);
            if let Some(server) = server {
                servers.push(server);
            }
            // A call's own id only; the last-seen fallback is for
            // outputs, never for new calls.
            let call_id = resolve_call_id(item, &None).unwrap_or_else(fresh_call_id);
            *last_call_id = Some(call_id.clone());
            let arguments = match &item["arguments"] {
                Value::String(s) => s.clone(),
                Value::Null => "{}".to_string(),
                other => serde_json::to_string(other)?,
            };
            let call = ToolCallEnvelope {
                id: call_id,
                name,
                arguments,
            };
            call.validate()?;
            messages.push(json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": [call.to_chat_value()],
            }));
        }
        "function_call_output" | "tool_result" | "tool_message" => {
            let call_id = resolve_call_id(item, last_call_id).ok_or_else(|| {
                RouterError::ToolCallInvalid(
                    "tool output without a resolvable call id".into(),
                )
            })?;
            let name = item["name"].as_str().unwrap_or("tool");
            let output = match &item["output"] {
                Value::Null => item.get("content").cloned().unwrap_or(Value::Null),
                other => other.clone(),
            };
            let envelope = ToolResultEnvelope::from_output(
                name,
                &call_id,
                item.get("arguments").cloned().unwrap_or(json!({})),
                output,
            );
            messages.push(json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": envelope.to_json_string(),
            }));
        }
        "reasoning" => {
            // Reasoning items are provider output replayed into history;
            // chat form has no slot for them, so they are dropped.
        }
        other => {
            return Err(RouterError::InvalidPayload(format!(
                "unsupported input item type '{other}'"
            )));
        }
    }
    Ok(())
}

/// Tool-call id resolution order: explicit `tool_call_id`, `call_id`,
/// `tool_use_id`, `id`, then the last-seen assistant tool call id.
fn resolve_call_id(item: &Value, last_call_id: &Option<String>) -> Option<String> {
    for key in ["tool_call_id", "call_id", "tool_use_id", "id"] {
        if let Some(id) = item[key].as_str() {
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    last_call_id.clone()
}

/// Concatenate text-ish content blocks. A bare string passes through.
fn collect_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => {
            let mut parts = Vec::new();
            for block in blocks {
                let block_type = block["type"].as_str().unwrap_or("text");
                if matches!(
                    block_type,
                    "input_text" | "output_text" | "text" | "commentary"
                ) {
                    if let Some(text) = block["text"].as_str() {
                        parts.push(text);
                    }
                }
            }
            parts.join("")
        }
        _ => String::new(),
    }
}

/// Responses declares tools flat; chat nests them under `function`.
fn lower_tool(
    tool: &Value,
    servers: &mut Vec<String>,
    tool_schemas: &mut Map<String, Value>,
) -> Option<Value> {
    // Already chat-shaped tools pass through (some clients mix shapes).
    if let Some(function) = tool.get("function") {
        if let Some(name) = function["name"].as_str() {
            if let Some(params) = function.get("parameters") {
                tool_schemas.insert(name.to_string(), params.clone());
            }
            return Some(tool.clone());
        }
        return None;
    }
    let raw_name = tool["name"].as_str()?;
    let (name, server) = split_tool_name(raw_name);
    if let Some(server) = server {
        servers.push(server);
    }
    let mut function = Map::new();
    function.insert("name".into(), json!(name));
    if let Some(desc) = tool["description"].as_str() {
        function.insert("description".into(), json!(desc));
    }
    if let Some(params) = tool.get("parameters") {
        if !params.is_null() {
            function.insert("parameters".into(), params.clone());
            tool_schemas.insert(name.clone(), params.clone());
        }
    }
    Some(json!({"type": "function", "function": function}))
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instructions_become_system_message() {
        let lowered = lower_request(&json!({
            "model": "glm-4.7",
            "instructions": "Be terse.",
            "input": [{"type": "message", "role": "user", "content": [
                {"type": "input_text", "text": "hi"},
            ]}],
        }))
        .unwrap();
        let messages = lowered.chat["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "Be terse.");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "hi");
    }

    #[test]
    fn test_bare_string_input() {
        let lowered = lower_request(&json!({"model": "m", "input": "hello"})).unwrap();
        let messages = lowered.chat["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "hello");
    }

    #[test]
    fn test_empty_input_fails_no_messages() {
        let err = lower_request(&json!({"model": "m", "input": []})).unwrap_err();
        assert_eq!(err.code(), "no_messages");
    }

    #[test]
    fn test_empty_input_with_instructions_keeps_system() {
        let lowered =
            lower_request(&json!({"model": "m", "instructions": "sys", "input": []})).unwrap();
        let messages = lowered.chat["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "system");
    }

    #[test]
    fn test_function_call_becomes_assistant_tool_call() {
        let lowered = lower_request(&json!({
            "model": "m",
            "input": [
                {"type": "function_call", "call_id": "call_7", "name": "shell",
                 "arguments": "{\"command\":\"ls\"}"},
            ],
        }))
        .unwrap();
        let messages = lowered.chat["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "assistant");
        let call = &messages[0]["tool_calls"][0];
        assert_eq!(call["id"], "call_7");
        assert_eq!(call["function"]["name"], "shell");
        assert_eq!(call["function"]["arguments"], "{\"command\":\"ls\"}");
    }

    #[test]
    fn test_output_inherits_last_call_id() {
        let lowered = lower_request(&json!({
            "model": "m",
            "input": [
                {"type": "function_call", "call_id": "call_9", "name": "shell",
                 "arguments": "{}"},
                {"type": "function_call_output", "output": "done"},
            ],
        }))
        .unwrap();
        let messages = lowered.chat["messages"].as_array().unwrap();
        assert_eq!(messages[1]["role"], "tool");
        assert_eq!(messages[1]["tool_call_id"], "call_9");
    }

    #[test]
    fn test_call_id_resolution_order() {
        let item = json!({"tool_use_id": "toolu_1", "id": "item_1"});
        assert_eq!(
            resolve_call_id(&item, &Some("call_last".into())),
            Some("toolu_1".into())
        );
        let item = json!({"id": "item_1"});
        assert_eq!(resolve_call_id(&item, &None), Some("item_1".into()));
        let item = json!({});
        assert_eq!(
            resolve_call_id(&item, &Some("call_last".into())),
            Some("call_last".into())
        );
    }

    #[test]
    fn test_tool_output_wrapped_in_envelope() {
        let lowered = lower_request(&json!({
            "model": "m",
            "input": [
                {"type": "function_call_output", "call_id": "call_1", "name": "shell",
                 "output": {"exit_code": 0, "stdout": "ok\n"}},
            ],
        }))
        .unwrap();
        let messages = lowered.chat["messages"].as_array().unwrap();
        let envelope: Value =
            serde_json::from_str(messages[0]["content"].as_str().unwrap()).unwrap();
        assert_eq!(envelope["version"], "rcc.tool.v1");
        assert_eq!(envelope["tool"]["call_id"], "call_1");
        assert_eq!(envelope["result"]["stdout"], "ok\n");
    }

    #[test]
    fn test_dotted_tool_name_rewritten_and_recorded() {
        let lowered = lower_request(&json!({
            "model": "m",
            "input": [
                {"type": "function_call", "call_id": "call_1", "name": "search.query",
                 "arguments": "{}"},
            ],
            "tools": [
                {"type": "function", "name": "files.read", "parameters": {"type": "object"}},
            ],
        }))
        .unwrap();
        let messages = lowered.chat["messages"].as_array().unwrap();
        assert_eq!(messages[0]["tool_calls"][0]["function"]["name"], "query");
        assert_eq!(lowered.chat["tools"][0]["function"]["name"], "read");
        assert_eq!(lowered.servers, vec!["files".to_string(), "search".to_string()]);
    }

    #[test]
    fn test_tool_schemas_captured() {
        let lowered = lower_request(&json!({
            "model": "m",
            "input": "hi",
            "tools": [
                {"type": "function", "name": "shell",
                 "parameters": {"type": "object", "properties": {"command": {"type": "array"}}}},
            ],
        }))
        .unwrap();
        assert!(lowered.tool_schemas.contains_key("shell"));
    }

    #[test]
    fn test_max_output_tokens_mapped() {
        let lowered =
            lower_request(&json!({"model": "m", "input": "hi", "max_output_tokens": 2048}))
                .unwrap();
        assert_eq!(lowered.chat["max_tokens"], 2048);
        assert!(lowered.chat.get("max_output_tokens").is_none());
    }

    #[test]
    fn test_commentary_blocks_concatenate() {
        let lowered = lower_request(&json!({
            "model": "m",
            "input": [{"type": "message", "role": "assistant", "content": [
                {"type": "output_text", "text": "a"},
                {"type": "commentary", "text": "b"},
                {"type": "refusal", "text": "never"},
            ]}],
        }))
        .unwrap();
        assert_eq!(lowered.chat["messages"][0]["content"], "ab");
    }

    #[test]
    fn test_unsupported_item_type_rejected() {
        let err = lower_request(&json!({
            "model": "m",
            "input": [{"type": "image_generation_call"}],
        }))
        .unwrap_err();
        assert_eq!(err.kind(), routecodex_core::error::ErrorKind::Validation);
    }
}
