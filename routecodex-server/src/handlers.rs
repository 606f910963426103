use crate::state::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use routecodex_core::RouterError;
use routecodex_core::binding::ProviderProtocol;
use routecodex_core::context::RequestContext;
use routecodex_core::error::ErrorContext;
use routecodex_core::matcher::MatchInput;
use routecodex_core::route::RouteCategory;
use routecodex_pipeline::module::{Payload, SseEvent};
use routecodex_transport::sse::encode_event;
use serde_json::{Value, json};

/// Readiness: true only after pool preload and route validation.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.is_ready();
    let body = json!({
        "ready": ready,
        "pipelineReady": ready,
        "status": if ready { "ok" } else { "starting" },
        "routes": state.table.route_count(),
        "poolInstances": state.connector.pool().len(),
        "routeTableVersion": state.table.version(),
    });
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.gather_text()
}

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    handle(state, ProviderProtocol::OpenaiChat, headers, body).await
}

pub async fn responses(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    handle(state, ProviderProtocol::OpenaiResponses, headers, body).await
}

pub async fn messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    handle(state, ProviderProtocol::AnthropicMessages, headers, body).await
}

/// The shared request path: route match → chain assembly → execution →
/// response emit. Teardown is Drop-backed on the chain, so client
/// disconnects mid-stream still release connections exactly once.
async fn handle(
    state: AppState,
    protocol: ProviderProtocol,
    headers: HeaderMap,
    body: Value,
) -> Response {
    let mut ctx = RequestContext::new("", protocol);

    if !state.is_ready() {
        let body = json!({"error": {
            "message": "gateway not ready",
            "type": "internal",
            "code": "not_ready",
        }});
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    }

    let Some(model) = body["model"].as_str().map(String::from) else {
        let err = RouterError::InvalidPayload("missing model".into());
        return error_response(&err, &ctx, protocol, None);
    };

    let accept_stream = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false);
    let stream = body["stream"].as_bool().unwrap_or(false) || accept_stream;

    // Category selection is explicit tagging only.
    let category = headers
        .get("x-routecodex-category")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_category);

    let meta = json!({
        "model": model,
        "stream": stream,
        "category": category.map(|c| c.as_str()),
        "max_tokens": body.get("max_tokens").cloned()
            .or_else(|| body.get("max_output_tokens").cloned()),
        "tools": body.get("tools").cloned(),
    });

    let matched = {
        let input = MatchInput {
            model: &model,
            provider_hint: headers
                .get("x-routecodex-provider")
                .and_then(|v| v.to_str().ok()),
            category,
            meta: &meta,
        };
        match state.table.match_route(&input) {
            Ok(route) => route,
            Err(err) => return error_response(&err, &ctx, protocol, Some(&state)),
        }
    };

    ctx.route_id = matched.id.clone();
    ctx.category = category.unwrap_or_default();
    ctx.stream = stream;
    copy_hints(&headers, &mut ctx);

    let mut chain = match state.connector.assemble(&matched, &meta) {
        Ok(chain) => chain,
        Err(err) => return error_response(&err, &ctx, protocol, Some(&state)),
    };

    let result = chain.execute(Payload::Request(body), &mut ctx).await;
    chain.teardown();

    let route_label = ctx.route_id.clone();
    state
        .metrics
        .request_duration
        .with_label_values(&[route_label.as_str()])
        .observe(ctx.elapsed_ms() / 1000.0);
    state.memory.maybe_cleanup();

    match result {
        Ok(Payload::Response(response_body)) => {
            state
                .metrics
                .requests_total
                .with_label_values(&[route_label.as_str(), protocol.as_str(), "200"])
                .inc();
            (StatusCode::OK, Json(response_body)).into_response()
        }
        Ok(Payload::Stream(events)) => {
            state
                .metrics
                .requests_total
                .with_label_values(&[route_label.as_str(), protocol.as_str(), "200"])
                .inc();
            stream_response(events, ctx, protocol, state)
        }
        Ok(Payload::Request(_)) => {
            let err = RouterError::Internal("chain ended on the request side".into());
            error_response(&err, &ctx, protocol, Some(&state))
        }
        Err(stage_error) => {
            let details = stage_error.details();
            let err = stage_error.into_inner();
            tracing::error!(
                request_id = %ctx.request_id,
                route_id = %ctx.route_id,
                stage = %details,
                error = %err,
                "Chain execution failed"
            );
            let mut context = ErrorContext::new(&err, "pipeline::chain", &ctx.request_id);
            context.details["stage"] = details;
            let status_label = err.status_code().to_string();
            state
                .metrics
                .requests_total
                .with_label_values(&[
                    route_label.as_str(),
                    protocol.as_str(),
                    status_label.as_str(),
                ])
                .inc();
            render_error(context, err.status_code(), protocol)
        }
    }
}

/// Forward an event stream as SSE. Mid-stream failures become one
/// `event: error` frame with the standard payload, then the stream
/// closes; already-emitted events are never retracted.
fn stream_response(
    events: routecodex_pipeline::module::EventStream,
    ctx: RequestContext,
    protocol: ProviderProtocol,
    state: AppState,
) -> Response {
    state.metrics.active_streams.inc();
    let request_id = ctx.request_id.clone();

    let body_stream = async_stream::stream! {
        let mut events = events;
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    yield Ok::<_, std::convert::Infallible>(encode_event(&event));
                }
                Err(err) => {
                    let context = ErrorContext::new(&err, "transport::stream", &request_id);
                    let frame = SseEvent::named(
                        "error",
                        context.to_client_body(protocol).to_string(),
                    );
                    yield Ok(encode_event(&frame));
                    break;
                }
            }
        }
        state.metrics.active_streams.dec();
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn error_response(
    err: &RouterError,
    ctx: &RequestContext,
    protocol: ProviderProtocol,
    state: Option<&AppState>,
) -> Response {
    let context = ErrorContext::new(err, "server::handlers", &ctx.request_id);
    if let Some(state) = state {
        let status_label = err.status_code().to_string();
        state
            .metrics
            .requests_total
            .with_label_values(&[
                ctx.route_id.as_str(),
                protocol.as_str(),
                status_label.as_str(),
            ])
            .inc();
    }
    render_error(context, err.status_code(), protocol)
}

fn render_error(context: ErrorContext, status: u16, protocol: ProviderProtocol) -> Response {
    let status =
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(context.to_client_body(protocol))).into_response()
}

fn parse_category(value: &str) -> Option<RouteCategory> {
    match value {
        "default" => Some(RouteCategory::Default),
        "longcontext" => Some(RouteCategory::Longcontext),
        "thinking" => Some(RouteCategory::Thinking),
        "background" => Some(RouteCategory::Background),
        _ => None,
    }
}

/// Select client headers become runtime hints for the profile layer.
fn copy_hints(headers: &HeaderMap, ctx: &mut RequestContext) {
    let pairs = [
        ("user-agent", "user_agent"),
        ("session_id", "session_id"),
        ("conversation_id", "conversation_id"),
        ("x-iflow-signing-key", "iflow_signing_key"),
    ];
    for (header_name, hint) in pairs {
        if let Some(value) = headers.get(header_name).and_then(|v| v.to_str().ok()) {
            ctx.runtime
                .hints
                .insert(hint.to_string(), json!(value));
        }
    }
    if let Some(value) = headers.get("x-web-search").and_then(|v| v.to_str().ok()) {
        ctx.runtime
            .hints
            .insert("iflowWebSearch".to_string(), json!(value == "true" || value == "1"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_category() {
        assert_eq!(parse_category("thinking"), Some(RouteCategory::Thinking));
        assert_eq!(parse_category("background"), Some(RouteCategory::Background));
        assert_eq!(parse_category("nope"), None);
    }

    #[test]
    fn test_copy_hints() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", "curl/8.7.1".parse().unwrap());
        headers.insert("session_id", "s-1".parse().unwrap());
        headers.insert("x-web-search", "true".parse().unwrap());
        let mut ctx = RequestContext::new("r", ProviderProtocol::OpenaiChat);
        copy_hints(&headers, &mut ctx);
        assert_eq!(ctx.runtime.hints["user_agent"], "curl/8.7.1");
        assert_eq!(ctx.runtime.hints["session_id"], "s-1");
        assert_eq!(ctx.runtime.hints["iflowWebSearch"], true);
    }
}
