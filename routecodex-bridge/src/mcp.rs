use serde_json::{Value, json};

/// Marker dropped into the message list exactly once per request.
pub const GUIDANCE_VAR: &str = "mcp_guidance_injected";

const GUIDANCE_TEXT: &str = "MCP resources are available. Use list_mcp_resources to \
enumerate them; when a server set is known, read_mcp_resource fetches a resource by \
server and URI, and list_mcp_resource_templates lists parameterized templates. \
Resource URIs are opaque; pass them back exactly as listed.";

fn list_resources_tool() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": "list_mcp_resources",
            "description": "List resources available from connected MCP servers.",
            "parameters": {
                "type": "object",
                "properties": {
                    "server": {"type": "string", "description": "Optional server filter."},
                },
            },
        },
    })
}

fn read_resource_tool(servers: &[String]) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": "read_mcp_resource",
            "description": "Read one resource from an MCP server.",
            "parameters": {
                "type": "object",
                "properties": {
                    "server": {"type": "string", "enum": servers},
                    "uri": {"type": "string"},
                },
                "required": ["server", "uri"],
            },
        },
    })
}

fn list_templates_tool(servers: &[String]) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": "list_mcp_resource_templates",
            "description": "List resource templates exposed by an MCP server.",
            "parameters": {
                "type": "object",
                "properties": {
                    "server": {"type": "string", "enum": servers},
                },
            },
        },
    })
}

/// Augment a chat tool list with the MCP resource tools.
/// `list_mcp_resources` is always added; the read/template tools only
/// when a non-empty server set has been discovered.
pub fn inject_tools(tools: &mut Vec<Value>, servers: &[String]) {
    let present: Vec<String> = tools
        .iter()
        .filter_map(|t| t["function"]["name"].as_str().map(String::from))
        .collect();

    if !present.iter().any(|n| n == "list_mcp_resources") {
        tools.push(list_resources_tool());
    }
    if !servers.is_empty() {
        if !present.iter().any(|n| n == "read_mcp_resource") {
            tools.push(read_resource_tool(servers));
        }
        if !present.iter().any(|n| n == "list_mcp_resource_templates") {
            tools.push(list_templates_tool(servers));
        }
    }
}

/// Append the guidance system message. Returns false when it was already
/// injected (the caller tracks the flag per request).
pub fn append_guidance(messages: &mut Vec<Value>, already_injected: bool) -> bool {
    if already_injected {
        return false;
    }
    messages.push(json!({"role": "system", "content": GUIDANCE_TEXT}));
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_tool_always_injected() {
        let mut tools = vec![];
        inject_tools(&mut tools, &[]);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["function"]["name"], "list_mcp_resources");
    }

    #[test]
    fn test_server_tools_require_discovered_servers() {
        let mut tools = vec![];
        inject_tools(&mut tools, &["files".to_string()]);
        let names: Vec<&str> = tools
            .iter()
            .map(|t| t["function"]["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "list_mcp_resources",
                "read_mcp_resource",
                "list_mcp_resource_templates"
            ]
        );
        assert_eq!(
            tools[1]["function"]["parameters"]["properties"]["server"]["enum"][0],
            "files"
        );
    }

    #[test]
    fn test_injection_is_idempotent() {
        let mut tools = vec![];
        inject_tools(&mut tools, &["files".to_string()]);
        inject_tools(&mut tools, &["files".to_string()]);
        assert_eq!(tools.len(), 3);
    }

    #[test]
    fn test_guidance_appended_exactly_once() {
        let mut messages = vec![];
        assert!(append_guidance(&mut messages, false));
        assert!(!append_guidance(&mut messages, true));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "system");
    }
}
