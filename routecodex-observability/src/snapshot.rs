use crate::scrub;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    UpstreamRequest,
    UpstreamResponse,
}

/// One audit snapshot of an upstream exchange. Headers and body are
/// scrubbed before the snapshot is constructed; sinks never see
/// credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub kind: SnapshotKind,
    pub request_id: String,
    pub provider_key: String,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub body: Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Snapshot {
    pub fn new(
        kind: SnapshotKind,
        request_id: &str,
        provider_key: &str,
        endpoint: &str,
        status: Option<u16>,
        mut headers: Vec<(String, String)>,
        mut body: Value,
    ) -> Self {
        scrub::scrub_headers(&mut headers, &[]);
        scrub::scrub_body(&mut body);
        Self {
            kind,
            request_id: request_id.to_string(),
            provider_key: provider_key.to_string(),
            endpoint: endpoint.to_string(),
            status,
            headers,
            body,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Where snapshots go. The core persists nothing itself; sinks are
/// external collaborators registered by the embedding binary.
pub trait SnapshotSink: Send + Sync {
    fn emit(&self, snapshot: Snapshot);
}

/// Built-in sink: structured tracing events at debug level.
pub struct LogSnapshotSink;

impl SnapshotSink for LogSnapshotSink {
    fn emit(&self, snapshot: Snapshot) {
        tracing::debug!(
            kind = ?snapshot.kind,
            request_id = %snapshot.request_id,
            provider_key = %snapshot.provider_key,
            endpoint = %snapshot.endpoint,
            status = snapshot.status,
            body = %snapshot.body,
            "snapshot"
        );
    }
}

/// Sink for configurations with snapshots disabled.
pub struct NullSnapshotSink;

impl SnapshotSink for NullSnapshotSink {
    fn emit(&self, _snapshot: Snapshot) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_is_scrubbed_on_construction() {
        let snapshot = Snapshot::new(
            SnapshotKind::UpstreamRequest,
            "req-1",
            "glm.key0",
            "/chat/completions",
            None,
            vec![("authorization".into(), "Bearer sk".into())],
            json!({"api_key": "sk-live", "model": "glm-4"}),
        );
        assert_eq!(snapshot.headers[0].1, scrub::REDACTED);
        assert_eq!(snapshot.body["api_key"], scrub::REDACTED);
        assert_eq!(snapshot.body["model"], "glm-4");
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = Snapshot::new(
            SnapshotKind::UpstreamResponse,
            "req-1",
            "glm.key0",
            "/chat/completions",
            Some(200),
            vec![],
            json!({"ok": true}),
        );
        let text = serde_json::to_string(&snapshot).unwrap();
        assert!(text.contains("upstream_response"));
        assert!(text.contains("req-1"));
    }
}
