use crate::canonical::{ToolCallEnvelope, ToolResultEnvelope, normalize_call_id, split_tool_name};
use crate::repair::{RepairKind, repair_envelope};
use crate::{anthropic, arguments, chat as chat_lift, mcp, responses};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use routecodex_core::RouterError;
use routecodex_core::binding::{ModuleKind, ProviderProtocol, ToolCallIdStyle};
use routecodex_core::context::RequestContext;
use routecodex_pipeline::module::{EventStream, Module, Payload, SseEvent};
use routecodex_pipeline::registry::ModuleFactory;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;

const IMAGE_EXTENSIONS: [&str; 6] = [".png", ".jpg", ".jpeg", ".gif", ".webp", ".bmp"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LlmSwitchConfig {
    pub mcp_enabled: bool,
    pub mcp_servers: Vec<String>,
}

/// The llmswitch: ingress-protocol normalization on the way in, tool
/// canonicalization plus denormalization on the way out. The only module
/// allowed to write `tool_calls` or emit `tool` messages.
pub struct LlmSwitch {
    id: String,
    config: LlmSwitchConfig,
}

#[async_trait]
impl Module for LlmSwitch {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Llmswitch
    }

    async fn process(
        &self,
        payload: Payload,
        ctx: &mut RequestContext,
    ) -> Result<Payload, RouterError> {
        match payload {
            Payload::Request(body) => self.normalize_input(body, ctx).map(Payload::Request),
            Payload::Response(body) => self
                .denormalize_output(body, ctx)
                .map(Payload::Response),
            Payload::Stream(events) => Ok(Payload::Stream(self.reframe_stream(events, ctx))),
        }
    }
}

impl LlmSwitch {
    /// Ingress payload → canonical chat shape.
    fn normalize_input(&self, body: Value, ctx: &mut RequestContext) -> Result<Value, RouterError> {
        let (mut chat, mut servers, schemas) = match ctx.ingress_protocol {
            ProviderProtocol::OpenaiChat => {
                let (chat, schemas) = normalize_chat_request(body)?;
                (chat, Vec::new(), schemas)
            }
            ProviderProtocol::OpenaiResponses => {
                let lowered = responses::lower_request(&body)?;
                (lowered.chat, lowered.servers, lowered.tool_schemas)
            }
            ProviderProtocol::AnthropicMessages => {
                let (chat, schemas) = anthropic::lower_request(&body)?;
                (chat, Vec::new(), schemas)
            }
            ProviderProtocol::GeminiChat => {
                return Err(RouterError::BindingRejected(
                    "gemini-chat is an upstream protocol, not an ingress".into(),
                ));
            }
        };

        ctx.stream = chat["stream"].as_bool().unwrap_or(false);
        ctx.set_var("tool_schemas", Value::Object(schemas.clone()));

        let allowed: Vec<String> = schemas.keys().cloned().collect();
        repair_tool_results(&mut chat, &allowed, &schemas);
        normalize_request_tool_calls(&mut chat, &schemas);
        tracing::debug!(
            ingress = %ctx.ingress_protocol,
            stream = ctx.stream,
            "Normalized ingress request"
        );

        servers.extend(self.config.mcp_servers.iter().cloned());
        servers.sort();
        servers.dedup();
        ctx.set_var("mcp_servers", json!(servers));

        if self.config.mcp_enabled {
            let has_tools = chat["tools"].as_array().map(|t| !t.is_empty()).unwrap_or(false);
            if has_tools {
                if let Some(tools) = chat["tools"].as_array_mut() {
                    mcp::inject_tools(tools, &servers);
                }
                let already = ctx.get_var(mcp::GUIDANCE_VAR).is_some();
                if let Some(messages) = chat["messages"].as_array_mut() {
                    if mcp::append_guidance(messages, already) {
                        ctx.set_var(mcp::GUIDANCE_VAR, json!(true));
                    }
                }
            }
        }

        Ok(chat)
    }

    /// Canonical chat response → ingress format, canonicalizing every
    /// tool call on the way.
    fn denormalize_output(
        &self,
        mut body: Value,
        ctx: &mut RequestContext,
    ) -> Result<Value, RouterError> {
        let id_style = ctx
            .runtime
            .binding
            .as_ref()
            .map(|b| b.tool_call_id_style)
            .unwrap_or_default();
        let schemas = ctx
            .get_var("tool_schemas")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        canonicalize_tool_calls(&mut body, id_style, &schemas)?;

        match ctx.ingress_protocol {
            ProviderProtocol::OpenaiChat => Ok(body),
            ProviderProtocol::OpenaiResponses => chat_lift::lift_response(&body, id_style),
            ProviderProtocol::AnthropicMessages => anthropic::lift_response(&body),
            ProviderProtocol::GeminiChat => Err(RouterError::BindingRejected(
                "gemini-chat is an upstream protocol, not an ingress".into(),
            )),
        }
    }

    /// Re-frame an upstream SSE sequence into the ingress protocol's
    /// event dialect. Chat ingress passes events through untouched, in
    /// upstream order.
    fn reframe_stream(&self, events: EventStream, ctx: &RequestContext) -> EventStream {
        match ctx.ingress_protocol {
            ProviderProtocol::OpenaiChat => events,
            ProviderProtocol::OpenaiResponses => lift_stream_to_responses(events),
            ProviderProtocol::AnthropicMessages => lift_stream_to_anthropic(events),
            ProviderProtocol::GeminiChat => events,
        }
    }
}

/// Normalize an already-chat-shaped ingress request: arguments become
/// strings exactly once, assistant tool calls are validated, and tool
/// parameter schemas are captured for the response pass.
fn normalize_chat_request(mut body: Value) -> Result<(Value, Map<String, Value>), RouterError> {
    let mut schemas = Map::new();
    if let Some(tools) = body["tools"].as_array() {
        for tool in tools {
            if let Some(name) = tool["function"]["name"].as_str() {
                if let Some(params) = tool["function"].get("parameters") {
                    schemas.insert(name.to_string(), params.clone());
                }
            }
        }
    }

    let Some(messages) = body["messages"].as_array_mut() else {
        return Err(RouterError::NoMessages);
    };
    if messages.is_empty() {
        return Err(RouterError::NoMessages);
    }

    for message in messages.iter_mut() {
        if let Some(calls) = message["tool_calls"].as_array_mut() {
            for raw_call in calls.iter_mut() {
                let mut call = ToolCallEnvelope::from_chat_value(raw_call)?;
                let (name, _) = split_tool_name(&call.name);
                call.name = name;
                call.validate()?;
                *raw_call = call.to_chat_value();
            }
        }
    }
    Ok((body, schemas))
}

/// Schema-driven normalization of replayed tool-call arguments on the
/// request path. Calls without a declared schema (other than the shell
/// tool, whose argv rewrite is unconditional) pass through verbatim.
fn normalize_request_tool_calls(chat: &mut Value, schemas: &Map<String, Value>) {
    let Some(messages) = chat["messages"].as_array_mut() else {
        return;
    };
    for message in messages {
        let Some(calls) = message["tool_calls"].as_array_mut() else {
            continue;
        };
        for call in calls {
            let name = call["function"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            if !schemas.contains_key(&name) && name != "shell" {
                continue;
            }
            let args = call["function"]["arguments"].clone();
            let normalized =
                arguments::normalize_arguments(&args, schemas.get(&name), &name);
            call["function"]["arguments"] = json!(normalized.arguments);
        }
    }
}

/// Canonicalize `tool_calls` in a chat response: dot names rewritten,
/// ids normalized to the profile's style, arguments normalized against
/// the captured schema. Unrepairable calls reject the response.
fn canonicalize_tool_calls(
    body: &mut Value,
    id_style: ToolCallIdStyle,
    schemas: &Map<String, Value>,
) -> Result<(), RouterError> {
    let Some(choices) = body["choices"].as_array_mut() else {
        return Ok(());
    };
    for choice in choices {
        let message = &mut choice["message"];
        let Some(calls) = message["tool_calls"].as_array_mut() else {
            continue;
        };
        let mut seen_ids: Vec<String> = Vec::new();
        for raw_call in calls.iter_mut() {
            let call = ToolCallEnvelope::from_chat_value(raw_call)?;
            let (name, _server) = split_tool_name(&call.name);
            let mut id = normalize_call_id(&call.id, id_style);
            // Ids must be unique within a response.
            if seen_ids.contains(&id) {
                id = crate::canonical::fresh_call_id();
            }
            seen_ids.push(id.clone());

            let arguments = if schemas.contains_key(&name) || name == "shell" {
                arguments::normalize_arguments(&json!(call.arguments), schemas.get(&name), &name)
                    .arguments
            } else {
                call.arguments
            };
            let repaired = ToolCallEnvelope {
                id,
                name,
                arguments,
            };
            repaired.validate()?;
            *raw_call = repaired.to_chat_value();
        }
    }
    Ok(())
}

/// Self-repair pass over lowered tool results: a result whose paired
/// call named an unsupported tool, failed argument parsing, or pointed
/// `view_image` at a non-image path gets a diagnostic stderr hint while
/// keeping the upstream body in `result.output`.
fn repair_tool_results(chat: &mut Value, allowed: &[String], schemas: &Map<String, Value>) {
    let Some(messages) = chat["messages"].as_array_mut() else {
        return;
    };

    // First pass: inspect assistant tool calls, collecting what needs a
    // repair hint keyed by call id.
    let mut repairs: Vec<(String, RepairKind)> = Vec::new();
    for message in messages.iter() {
        let Some(calls) = message["tool_calls"].as_array() else {
            continue;
        };
        for call in calls {
            let Some(id) = call["id"].as_str() else { continue };
            let name = call["function"]["name"].as_str().unwrap_or_default();
            if name.is_empty() {
                repairs.push((id.to_string(), RepairKind::MissingFunctionName));
                continue;
            }
            if !allowed.is_empty() && !allowed.iter().any(|a| a == name) {
                repairs.push((id.to_string(), RepairKind::UnsupportedCall(name.to_string())));
                continue;
            }
            let args_raw = call["function"]["arguments"].as_str().unwrap_or("{}");
            let normalized =
                arguments::normalize_arguments(&json!(args_raw), schemas.get(name), name);
            if normalized.is_raw_fallback() {
                repairs.push((
                    id.to_string(),
                    RepairKind::ArgumentParse("no JSON object could be extracted".into()),
                ));
                continue;
            }
            if name == "view_image" {
                let parsed: Value =
                    serde_json::from_str(&normalized.arguments).unwrap_or(json!({}));
                if let Some(path) = parsed["path"].as_str() {
                    let lower = path.to_ascii_lowercase();
                    if !IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
                        repairs.push((
                            id.to_string(),
                            RepairKind::NonImagePath(path.to_string()),
                        ));
                    }
                }
            }
        }
    }

    if repairs.is_empty() {
        return;
    }

    // Second pass: rewrite the matching tool-result envelopes.
    for message in messages.iter_mut() {
        if message["role"] != "tool" {
            continue;
        }
        let Some(call_id) = message["tool_call_id"].as_str() else {
            continue;
        };
        let Some((_, kind)) = repairs.iter().find(|(id, _)| id == call_id) else {
            continue;
        };
        let Some(content) = message["content"].as_str() else {
            continue;
        };
        if let Ok(mut envelope) = serde_json::from_str::<ToolResultEnvelope>(content) {
            repair_envelope(&mut envelope, kind, allowed);
            message["content"] = json!(envelope.to_json_string());
        }
    }
}

/// Map chat completion chunks onto Responses stream events, preserving
/// upstream order.
fn lift_stream_to_responses(mut events: EventStream) -> EventStream {
    Box::pin(stream! {
        let mut sequence: i64 = 0;
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    yield Err(e);
                    break;
                }
            };
            if event.is_done() {
                sequence += 1;
                yield Ok(SseEvent::named(
                    "response.completed",
                    json!({"type": "response.completed", "sequence_number": sequence})
                        .to_string(),
                ));
                break;
            }
            let Ok(chunk) = serde_json::from_str::<Value>(&event.data) else {
                continue;
            };
            let delta = &chunk["choices"][0]["delta"];
            if let Some(text) = delta["content"].as_str() {
                if !text.is_empty() {
                    sequence += 1;
                    yield Ok(SseEvent::named(
                        "response.output_text.delta",
                        json!({
                            "type": "response.output_text.delta",
                            "sequence_number": sequence,
                            "delta": text,
                        })
                        .to_string(),
                    ));
                }
            }
            if let Some(calls) = delta["tool_calls"].as_array() {
                for call in calls {
                    if let Some(args) = call["function"]["arguments"].as_str() {
                        sequence += 1;
                        yield Ok(SseEvent::named(
                            "response.function_call_arguments.delta",
                            json!({
                                "type": "response.function_call_arguments.delta",
                                "sequence_number": sequence,
                                "delta": args,
                            })
                            .to_string(),
                        ));
                    }
                }
            }
        }
    })
}

/// Map chat completion chunks onto Anthropic Messages stream events.
fn lift_stream_to_anthropic(mut events: EventStream) -> EventStream {
    Box::pin(stream! {
        let mut started = false;
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    yield Err(e);
                    break;
                }
            };
            if event.is_done() {
                yield Ok(SseEvent::named(
                    "message_stop",
                    json!({"type": "message_stop"}).to_string(),
                ));
                break;
            }
            let Ok(chunk) = serde_json::from_str::<Value>(&event.data) else {
                continue;
            };
            if !started {
                started = true;
                yield Ok(SseEvent::named(
                    "message_start",
                    json!({"type": "message_start", "message": {
                        "id": chunk["id"].clone(),
                        "type": "message",
                        "role": "assistant",
                        "model": chunk["model"].clone(),
                        "content": [],
                    }})
                    .to_string(),
                ));
            }
            if let Some(text) = chunk["choices"][0]["delta"]["content"].as_str() {
                if !text.is_empty() {
                    yield Ok(SseEvent::named(
                        "content_block_delta",
                        json!({
                            "type": "content_block_delta",
                            "index": 0,
                            "delta": {"type": "text_delta", "text": text},
                        })
                        .to_string(),
                    ));
                }
            }
        }
    })
}

pub struct LlmSwitchFactory;

impl ModuleFactory for LlmSwitchFactory {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Llmswitch
    }

    fn build(&self, config: &Value) -> Result<Arc<dyn Module>, RouterError> {
        let config: LlmSwitchConfig = serde_json::from_value(config.clone())
            .map_err(|e| RouterError::ConfigError(format!("llmswitch config: {e}")))?;
        Ok(Arc::new(LlmSwitch {
            id: format!("llmswitch-{}", uuid::Uuid::new_v4().simple()),
            config,
        }))
    }
}
