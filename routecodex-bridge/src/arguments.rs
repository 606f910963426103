use regex::Regex;
use serde_json::{Map, Value, json};
use std::sync::LazyLock;

/// Shell meta-operators that force a `bash -lc` rewrite so downstream
/// executors that do not spawn a shell still honor the intent.
const SHELL_META: [&str; 8] = ["|", ">", ">>", "<", "<<", ";", "&&", "||"];

/// Keys the shell tool understands natively; anything else gets folded
/// into the argv.
const SHELL_KNOWN_KEYS: [&str; 3] = ["command", "workdir", "timeout_ms"];

static FENCED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("valid regex")
});
static UNQUOTED_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:"#).expect("valid regex")
});

/// Which rung of the lenient parse ladder produced the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStep {
    Structured,
    Strict,
    Fenced,
    ObjectSubstring,
    ArraySubstring,
    QuoteRepair,
    KeyValueLines,
    RawFallback,
}

#[derive(Debug)]
pub struct NormalizedArguments {
    /// The arguments as a single JSON-encoded string.
    pub arguments: String,
    pub step: ParseStep,
}

impl NormalizedArguments {
    /// A raw fallback means no rung could extract structure; with a
    /// declared schema this counts as a parse failure for self-repair.
    pub fn is_raw_fallback(&self) -> bool {
        self.step == ParseStep::RawFallback
    }
}

/// Lenient parse ladder: strict JSON, fenced block, object substring,
/// array substring, quote/key repair, key=value lines, raw fallback.
/// Total: every input produces a value.
pub fn parse_lenient(input: &str) -> (Value, ParseStep) {
    if let Ok(v) = serde_json::from_str::<Value>(input) {
        if v.is_object() || v.is_array() {
            return (v, ParseStep::Strict);
        }
    }

    if let Some(caps) = FENCED_RE.captures(input) {
        if let Ok(v) = serde_json::from_str::<Value>(caps[1].trim()) {
            if v.is_object() || v.is_array() {
                return (v, ParseStep::Fenced);
            }
        }
    }

    if let (Some(start), Some(end)) = (input.find('{'), input.rfind('}')) {
        if start < end {
            if let Ok(v) = serde_json::from_str::<Value>(&input[start..=end]) {
                if v.is_object() {
                    return (v, ParseStep::ObjectSubstring);
                }
            }
        }
    }

    if let (Some(start), Some(end)) = (input.find('['), input.rfind(']')) {
        if start < end {
            if let Ok(v) = serde_json::from_str::<Value>(&input[start..=end]) {
                if v.is_array() {
                    return (v, ParseStep::ArraySubstring);
                }
            }
        }
    }

    let repaired = UNQUOTED_KEY_RE
        .replace_all(&input.replace('\'', "\""), "${1}\"${2}\":")
        .into_owned();
    if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
        if v.is_object() || v.is_array() {
            return (v, ParseStep::QuoteRepair);
        }
    }

    let mut kv = Map::new();
    for line in input.lines() {
        if let Some(eq) = line.find('=') {
            let key = line[..eq].trim();
            let value = line[eq + 1..].trim();
            if !key.is_empty() && key.chars().all(|c| c.is_alphanumeric() || c == '_') {
                kv.insert(key.to_string(), json!(value));
            }
        }
    }
    if !kv.is_empty() {
        return (Value::Object(kv), ParseStep::KeyValueLines);
    }

    (json!({ "_raw": input }), ParseStep::RawFallback)
}

/// Normalize a tool call's arguments against the function's parameter
/// schema. Input may be an already-structured value or an encoded
/// string; output is always a single JSON-encoded string. Idempotent:
/// normalizing the output again yields the output.
pub fn normalize_arguments(
    input: &Value,
    schema: Option<&Value>,
    tool_name: &str,
) -> NormalizedArguments {
    let (mut value, step) = match input {
        Value::String(s) => parse_lenient(s),
        other => (other.clone(), ParseStep::Structured),
    };

    if let Some(schema) = schema {
        value = coerce_to_schema(value, schema, tool_name);
    }
    if tool_name == "shell" {
        value = normalize_shell(value);
    }

    NormalizedArguments {
        arguments: serde_json::to_string(&value).unwrap_or_else(|_| "{}".to_string()),
        step,
    }
}

/// Coerce each declared property to its schema type. Unknown properties
/// and unknown types pass through untouched.
fn coerce_to_schema(value: Value, schema: &Value, tool_name: &str) -> Value {
    let Value::Object(mut map) = value else {
        return value;
    };
    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Value::Object(map);
    };

    for (prop, prop_schema) in properties {
        let Some(current) = map.remove(prop) else {
            continue;
        };
        let declared = prop_schema.get("type").and_then(|t| t.as_str());
        let coerced = match declared {
            Some("string") => coerce_string(current),
            Some("array") => {
                let item_type = prop_schema
                    .get("items")
                    .and_then(|i| i.get("type"))
                    .and_then(|t| t.as_str());
                if item_type == Some("string") {
                    coerce_string_array(current, tool_name == "shell" && prop == "command")
                } else {
                    current
                }
            }
            Some("object") => coerce_object(current),
            Some("number") | Some("integer") => coerce_number(current),
            Some("boolean") => coerce_boolean(current),
            _ => current,
        };
        map.insert(prop.clone(), coerced);
    }
    Value::Object(map)
}

fn coerce_string(value: Value) -> Value {
    match value {
        Value::String(_) => value,
        Value::Null => value,
        other => json!(stringify_scalar(&other)),
    }
}

fn stringify_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn coerce_string_array(value: Value, shell_command: bool) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| json!(stringify_scalar(v)))
                .collect(),
        ),
        Value::String(s) => {
            let tokens = if shell_command {
                tokenize_shell_command(&s)
            } else {
                tokenize(&s)
            };
            json!(tokens)
        }
        other => json!([stringify_scalar(&other)]),
    }
}

fn coerce_object(value: Value) -> Value {
    match value {
        Value::String(s) => {
            let (parsed, step) = parse_lenient(&s);
            if step == ParseStep::RawFallback {
                json!(s)
            } else {
                parsed
            }
        }
        other => other,
    }
}

fn coerce_number(value: Value) -> Value {
    match &value {
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(|n| serde_json::Number::from_f64(n))
            .map(Value::Number)
            .unwrap_or(value),
        _ => value,
    }
}

fn coerce_boolean(value: Value) -> Value {
    match &value {
        Value::String(s) => match s.trim() {
            "true" | "True" | "1" => json!(true),
            "false" | "False" | "0" => json!(false),
            _ => value,
        },
        _ => value,
    }
}

/// Generic whitespace tokenization; JSON-array strings parse as arrays.
fn tokenize(s: &str) -> Vec<String> {
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(s) {
        return items.iter().map(stringify_scalar).collect();
    }
    s.split_whitespace().map(String::from).collect()
}

/// Shell command tokenization with bracket/comma stripping:
/// `[ls, -la]` and `ls -la` both become `["ls", "-la"]`.
fn tokenize_shell_command(s: &str) -> Vec<String> {
    let trimmed = s.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);
    let parts: Vec<String> = if inner.contains(',') && trimmed.starts_with('[') {
        inner
            .split(',')
            .map(|p| p.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
            .filter(|p| !p.is_empty())
            .collect()
    } else {
        inner.split_whitespace().map(String::from).collect()
    };
    parts
}

/// Shell-tool post-pass: fold extra keys into the argv, then rewrite any
/// argv containing a shell meta-operator to `["bash", "-lc", joined]`.
fn normalize_shell(value: Value) -> Value {
    let Value::Object(mut map) = value else {
        return value;
    };

    let mut argv: Vec<String> = match map.remove("command") {
        Some(Value::Array(items)) => items.iter().map(stringify_scalar).collect(),
        Some(Value::String(s)) => tokenize_shell_command(&s),
        Some(other) => vec![stringify_scalar(&other)],
        None => Vec::new(),
    };

    // Extra keys (a model hallucinating {"command": ["rg"], "pattern":
    // "foo"}) are folded into the argv in sorted key order.
    let extra_keys: Vec<String> = map
        .keys()
        .filter(|k| !SHELL_KNOWN_KEYS.contains(&k.as_str()) && !k.starts_with('_'))
        .cloned()
        .collect();
    for key in extra_keys {
        if let Some(extra) = map.remove(&key) {
            match extra {
                Value::Array(items) => argv.extend(items.iter().map(stringify_scalar)),
                other => argv.push(stringify_scalar(&other)),
            }
        }
    }

    let argv = rewrite_shell_argv(argv);
    if !argv.is_empty() {
        map.insert("command".to_string(), json!(argv));
    }
    Value::Object(map)
}

fn rewrite_shell_argv(argv: Vec<String>) -> Vec<String> {
    // Already lowered: leave alone (keeps the rewrite idempotent).
    if argv.len() >= 2 && argv[0] == "bash" && argv[1] == "-lc" {
        return argv;
    }
    if argv.iter().any(|t| SHELL_META.contains(&t.as_str())) {
        return vec!["bash".to_string(), "-lc".to_string(), argv.join(" ")];
    }
    argv
}
