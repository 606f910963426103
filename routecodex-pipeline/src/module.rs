use async_trait::async_trait;
use futures::Stream;
use routecodex_core::RouterError;
use routecodex_core::binding::ModuleKind;
use routecodex_core::context::RequestContext;
use serde_json::Value;
use std::pin::Pin;

/// One server-sent event, as relayed from an upstream stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// `event:` field, when the upstream names its frames.
    pub event: Option<String>,
    /// `data:` field, raw (usually a JSON document or `[DONE]`).
    pub data: String,
}

impl SseEvent {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Pull sequence of SSE events. Dropping the stream cancels the upstream
/// request; events already emitted are not retracted.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SseEvent, RouterError>> + Send>>;

/// The payload moving through a module chain.
///
/// A single front-to-back walk carries the request toward the provider;
/// the provider swaps `Request` for `Response` (or `Stream`), and the
/// modules after it operate on the response. Modules dispatch on the
/// variant to know which side of the exchange they are seeing.
pub enum Payload {
    Request(Value),
    Response(Value),
    Stream(EventStream),
}

impl Payload {
    pub fn is_request(&self) -> bool {
        matches!(self, Payload::Request(_))
    }

    /// Borrow the JSON body, if this payload has one.
    pub fn body(&self) -> Option<&Value> {
        match self {
            Payload::Request(v) | Payload::Response(v) => Some(v),
            Payload::Stream(_) => None,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Payload::Request(_) => "request",
            Payload::Response(_) => "response",
            Payload::Stream(_) => "stream",
        }
    }
}

/// Instance health. Transitions are atomic; readers never lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HealthState {
    Healthy = 0,
    Degraded = 1,
    Failed = 2,
}

impl HealthState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => HealthState::Healthy,
            1 => HealthState::Degraded,
            _ => HealthState::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Failed => "failed",
        }
    }
}

/// A pipeline module. Capability-set style: anything providing `process`
/// is a module; `validate_output` and `estimate_performance` are optional
/// refinements. Variants are tagged with [`ModuleKind`]; the chain
/// dispatches by tag.
#[async_trait]
pub trait Module: Send + Sync {
    /// Stable instance id (unique within the pool).
    fn id(&self) -> &str;

    fn kind(&self) -> ModuleKind;

    /// Process the current payload and yield the next one. Called exactly
    /// once per chain position per request.
    async fn process(
        &self,
        payload: Payload,
        ctx: &mut RequestContext,
    ) -> Result<Payload, RouterError>;

    /// Validate a response body this module is about to emit. The chain
    /// runs this on every non-llmswitch module to enforce the
    /// tool-structure ownership rule.
    fn validate_output(&self, body: &Value) -> Result<(), RouterError> {
        let _ = body;
        Ok(())
    }

    /// Rough cost estimate in milliseconds, for diagnostics only.
    fn estimate_performance(&self) -> Option<f64> {
        None
    }

    /// Background health probe. Default: trivially healthy.
    async fn probe(&self) -> Result<(), RouterError> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Request(v) => f.debug_tuple("Request").field(v).finish(),
            Payload::Response(v) => f.debug_tuple("Response").field(v).finish(),
            Payload::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_state_round_trip() {
        for s in [HealthState::Healthy, HealthState::Degraded, HealthState::Failed] {
            assert_eq!(HealthState::from_u8(s as u8), s);
        }
    }

    #[test]
    fn test_done_frame() {
        assert!(SseEvent::data("[DONE]").is_done());
        assert!(SseEvent::data(" [DONE]\n").is_done());
        assert!(!SseEvent::data("{\"id\":1}").is_done());
    }

    #[test]
    fn test_payload_body() {
        let p = Payload::Request(serde_json::json!({"model": "glm-4"}));
        assert!(p.is_request());
        assert_eq!(p.body().unwrap()["model"], "glm-4");
    }
}
