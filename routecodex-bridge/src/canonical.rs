use regex::Regex;
use routecodex_core::RouterError;
use routecodex_core::binding::ToolCallIdStyle;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::LazyLock;

pub const ENVELOPE_VERSION: &str = "rcc.tool.v1";

static TOOL_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));
static CALL_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^call_[A-Za-z0-9]+$").expect("valid regex"));
static FC_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^fc[_-][A-Za-z0-9-]+$").expect("valid regex"));

pub fn is_valid_tool_name(name: &str) -> bool {
    TOOL_NAME_RE.is_match(name)
}

/// Whether an id satisfies the fc-style allowance set (`call_`, `fc_`,
/// `fc-` prefixes).
pub fn is_fc_style_id(id: &str) -> bool {
    CALL_ID_RE.is_match(id) || FC_ID_RE.is_match(id)
}

/// Rewrite a dotted tool name (`server.fn`) to the segment after the last
/// dot, returning the server prefix for MCP discovery. Undotted names pass
/// through unchanged.
pub fn split_tool_name(name: &str) -> (String, Option<String>) {
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => (
            name[pos + 1..].to_string(),
            Some(name[..pos].to_string()),
        ),
        _ => (name.to_string(), None),
    }
}

/// Enforce the per-profile id style. `Preserve` passes non-empty ids
/// through untouched; `Fc` accepts the fc allowance set and rewrites
/// everything else.
pub fn normalize_call_id(id: &str, style: ToolCallIdStyle) -> String {
    match style {
        ToolCallIdStyle::Preserve => {
            if id.is_empty() {
                fresh_call_id()
            } else {
                id.to_string()
            }
        }
        ToolCallIdStyle::Fc => {
            if is_fc_style_id(id) {
                id.to_string()
            } else {
                format!("fc_{}", uuid::Uuid::new_v4().simple())
            }
        }
    }
}

pub fn fresh_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// The canonical tool call: `arguments` is always a single JSON-encoded
/// string, even when the underlying value is an object.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallEnvelope {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCallEnvelope {
    /// Parse one entry of a chat-style `tool_calls[]` array. Object
    /// arguments are stringified exactly once; string arguments are kept
    /// as-is (they are already encoded).
    pub fn from_chat_value(value: &Value) -> Result<Self, RouterError> {
        let name = value["function"]["name"]
            .as_str()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| RouterError::ToolCallInvalid("missing function name".into()))?;
        let id = value["id"].as_str().unwrap_or_default();
        let arguments = match &value["function"]["arguments"] {
            Value::String(s) => s.clone(),
            Value::Null => "{}".to_string(),
            other => serde_json::to_string(other)?,
        };
        Ok(Self {
            id: if id.is_empty() {
                fresh_call_id()
            } else {
                id.to_string()
            },
            name: name.to_string(),
            arguments,
        })
    }

    pub fn validate(&self) -> Result<(), RouterError> {
        if self.id.is_empty() {
            return Err(RouterError::ToolCallInvalid("empty tool call id".into()));
        }
        if !is_valid_tool_name(&self.name) {
            return Err(RouterError::ToolCallInvalid(format!(
                "function name '{}' must match [A-Za-z0-9_-]+",
                self.name
            )));
        }
        Ok(())
    }

    pub fn to_chat_value(&self) -> Value {
        json!({
            "id": self.id,
            "type": "function",
            "function": {
                "name": self.name,
                "arguments": self.arguments,
            },
        })
    }
}

/// The canonical tool result envelope, produced when translating
/// Responses-style `function_call_output` into chat-style `tool`
/// messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultEnvelope {
    pub version: String,
    pub tool: EnvelopeTool,
    pub arguments: Value,
    pub executed: EnvelopeExecuted,
    pub result: EnvelopeResult,
    pub meta: EnvelopeMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvelopeTool {
    pub name: String,
    pub call_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvelopeExecuted {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvelopeResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    pub output: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvelopeMeta {
    pub call_id: String,
    pub ts: i64,
}

impl ToolResultEnvelope {
    /// Wrap a raw tool output. Structured outputs that already carry
    /// exit_code/stdout/stderr fields are lifted into the result block;
    /// anything else lands in `result.output` verbatim.
    pub fn from_output(name: &str, call_id: &str, arguments: Value, output: Value) -> Self {
        let (success, exit_code, stdout, stderr) = match &output {
            Value::Object(map) => {
                let exit_code = map.get("exit_code").and_then(|v| v.as_i64());
                let success = map
                    .get("success")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(exit_code.map(|c| c == 0).unwrap_or(true));
                (
                    success,
                    exit_code,
                    map.get("stdout").and_then(|v| v.as_str()).map(String::from),
                    map.get("stderr").and_then(|v| v.as_str()).map(String::from),
                )
            }
            _ => (true, None, None, None),
        };
        let command = match arguments.get("command") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(argv)) => argv
                .iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            _ => String::new(),
        };
        Self {
            version: ENVELOPE_VERSION.to_string(),
            tool: EnvelopeTool {
                name: name.to_string(),
                call_id: call_id.to_string(),
            },
            arguments,
            executed: EnvelopeExecuted {
                command,
                workdir: None,
            },
            result: EnvelopeResult {
                success,
                exit_code,
                duration_seconds: output
                    .get("duration_seconds")
                    .and_then(|v| v.as_f64()),
                stdout,
                stderr,
                output,
            },
            meta: EnvelopeMeta {
                call_id: call_id.to_string(),
                ts: chrono::Utc::now().timestamp(),
            },
        }
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_name_charset() {
        assert!(is_valid_tool_name("shell"));
        assert!(is_valid_tool_name("read_file-v2"));
        assert!(!is_valid_tool_name("my.fn"));
        assert!(!is_valid_tool_name(""));
        assert!(!is_valid_tool_name("weird space"));
    }

    #[test]
    fn test_dot_name_rewrite() {
        assert_eq!(
            split_tool_name("server.fn"),
            ("fn".to_string(), Some("server".to_string()))
        );
        assert_eq!(
            split_tool_name("org.mcp.search"),
            ("search".to_string(), Some("org.mcp".to_string()))
        );
        assert_eq!(split_tool_name("plain"), ("plain".to_string(), None));
        // Degenerate dots are not treated as server prefixes.
        assert_eq!(split_tool_name(".hidden"), (".hidden".to_string(), None));
        assert_eq!(split_tool_name("trailing."), ("trailing.".to_string(), None));
    }

    #[test]
    fn test_fc_id_allowance_set() {
        assert!(is_fc_style_id("call_abc123"));
        assert!(is_fc_style_id("fc_9f8e7d"));
        assert!(is_fc_style_id("fc-9f8e-7d"));
        assert!(!is_fc_style_id("toolu_01abc"));
        assert!(!is_fc_style_id("call_"));
    }

    #[test]
    fn test_id_style_preserve() {
        assert_eq!(
            normalize_call_id("toolu_01abc", ToolCallIdStyle::Preserve),
            "toolu_01abc"
        );
        assert!(normalize_call_id("", ToolCallIdStyle::Preserve).starts_with("call_"));
    }

    #[test]
    fn test_id_style_fc_rewrites_foreign_ids() {
        assert_eq!(
            normalize_call_id("call_abc", ToolCallIdStyle::Fc),
            "call_abc"
        );
        let rewritten = normalize_call_id("toolu_01abc", ToolCallIdStyle::Fc);
        assert!(rewritten.starts_with("fc_"));
        assert!(is_fc_style_id(&rewritten));
    }

    #[test]
    fn test_from_chat_value_stringifies_object_arguments_once() {
        let call = ToolCallEnvelope::from_chat_value(&serde_json::json!({
            "id": "call_1",
            "type": "function",
            "function": {"name": "shell", "arguments": {"command": "ls"}},
        }))
        .unwrap();
        assert_eq!(call.arguments, r#"{"command":"ls"}"#);
        // Already-encoded string arguments are not double-encoded.
        let call2 = ToolCallEnvelope::from_chat_value(&serde_json::json!({
            "id": "call_2",
            "type": "function",
            "function": {"name": "shell", "arguments": "{\"command\":\"ls\"}"},
        }))
        .unwrap();
        assert_eq!(call2.arguments, "{\"command\":\"ls\"}");
    }

    #[test]
    fn test_missing_name_rejected() {
        let err = ToolCallEnvelope::from_chat_value(&serde_json::json!({
            "id": "call_1",
            "function": {"arguments": "{}"},
        }))
        .unwrap_err();
        assert_eq!(err.code(), "tool_call_invalid");
    }

    #[test]
    fn test_envelope_shape() {
        let env = ToolResultEnvelope::from_output(
            "shell",
            "call_1",
            serde_json::json!({"command": ["ls", "-la"]}),
            serde_json::json!({"exit_code": 0, "stdout": "file\n"}),
        );
        let v: Value = serde_json::from_str(&env.to_json_string()).unwrap();
        assert_eq!(v["version"], "rcc.tool.v1");
        assert_eq!(v["tool"]["name"], "shell");
        assert_eq!(v["tool"]["call_id"], "call_1");
        assert_eq!(v["executed"]["command"], "ls -la");
        assert_eq!(v["result"]["success"], true);
        assert_eq!(v["result"]["stdout"], "file\n");
        assert_eq!(v["meta"]["call_id"], "call_1");
    }

    #[test]
    fn test_envelope_failure_detection() {
        let env = ToolResultEnvelope::from_output(
            "shell",
            "call_2",
            serde_json::json!({"command": "false"}),
            serde_json::json!({"exit_code": 1, "stderr": "boom"}),
        );
        assert!(!env.result.success);
        assert_eq!(env.result.exit_code, Some(1));
    }
}
