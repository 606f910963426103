use async_stream::stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use routecodex_core::RouterError;
use routecodex_core::error::UpstreamFailure;
use routecodex_pipeline::module::{EventStream, SseEvent};

/// Parse a raw byte stream into SSE events, preserving upstream order.
///
/// Handles frames split across chunk boundaries and multi-line `data:`
/// fields (joined with newlines, per the SSE spec). Comment lines and
/// `id:`/`retry:` fields are dropped.
pub fn parse_sse<S>(bytes: S, provider_key: String, request_id: String) -> EventStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    Box::pin(stream! {
        let mut bytes = std::pin::pin!(bytes);
        let mut buffer = String::new();
        let mut event_name: Option<String> = None;
        let mut data_lines: Vec<String> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(RouterError::Upstream(UpstreamFailure {
                        status_code: 502,
                        code: "stream_interrupted".into(),
                        upstream_code: None,
                        provider_key: provider_key.clone(),
                        request_id: request_id.clone(),
                        body: Some(serde_json::json!({"error": e.to_string()})),
                    }));
                    return;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                let line = line.trim_end_matches(['\n', '\r']);

                if line.is_empty() {
                    if !data_lines.is_empty() {
                        yield Ok(SseEvent {
                            event: event_name.take(),
                            data: data_lines.join("\n"),
                        });
                        data_lines = Vec::new();
                    } else {
                        event_name = None;
                    }
                    continue;
                }
                if let Some(rest) = line.strip_prefix("data:") {
                    data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
                } else if let Some(rest) = line.strip_prefix("event:") {
                    event_name = Some(rest.trim().to_string());
                }
                // Comments (`:keepalive`) and other fields are ignored.
            }
        }

        // Flush a final frame that was not newline-terminated.
        if !data_lines.is_empty() {
            yield Ok(SseEvent {
                event: event_name.take(),
                data: data_lines.join("\n"),
            });
        }
    })
}

/// Render one event back into wire form for the client.
pub fn encode_event(event: &SseEvent) -> String {
    let mut out = String::new();
    if let Some(name) = &event.event {
        out.push_str("event: ");
        out.push_str(name);
        out.push('\n');
    }
    for line in event.data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}
