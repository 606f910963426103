use crate::canonical::ToolResultEnvelope;

/// Failure classes the canonicalizer can turn into a structured hint
/// instead of a hard error.
#[derive(Debug, Clone, PartialEq)]
pub enum RepairKind {
    UnsupportedCall(String),
    MissingFunctionName,
    ArgumentParse(String),
    NonImagePath(String),
}

const HINT_HEADER: &str = "[routecodex] The previous tool call could not be executed.";

const SHAPE_EXAMPLE: &str = r#"{"id":"call_abc123","type":"function","function":{"name":"shell","arguments":"{\"command\":[\"ls\",\"-la\"]}"}}"#;

/// Build the diagnostic hint injected into the canonical envelope's
/// stderr. Data-driven: one constant skeleton, assembled per failure.
pub fn diagnostic_hint(kind: &RepairKind, allowed_tools: &[String]) -> String {
    let reason = match kind {
        RepairKind::UnsupportedCall(name) => {
            format!("The tool '{name}' is not available.")
        }
        RepairKind::MissingFunctionName => {
            "The tool call did not include a function name.".to_string()
        }
        RepairKind::ArgumentParse(detail) => {
            format!("The tool arguments could not be parsed: {detail}.")
        }
        RepairKind::NonImagePath(path) => {
            format!("view_image requires an image file, got '{path}'.")
        }
    };
    let tools = if allowed_tools.is_empty() {
        "none".to_string()
    } else {
        allowed_tools.join(", ")
    };
    format!(
        "{HINT_HEADER} {reason} Allowed tools: {tools}. \
         A correct call looks like: {SHAPE_EXAMPLE}"
    )
}

/// Apply self-repair to an envelope: force failure, replace stderr with
/// the hint, keep the original upstream body in `result.output`.
pub fn repair_envelope(
    envelope: &mut ToolResultEnvelope,
    kind: &RepairKind,
    allowed_tools: &[String],
) {
    envelope.result.success = false;
    envelope.result.stderr = Some(diagnostic_hint(kind, allowed_tools));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hint_lists_allowed_tools() {
        let hint = diagnostic_hint(
            &RepairKind::UnsupportedCall("teleport".into()),
            &["shell".into(), "read_file".into()],
        );
        assert!(hint.contains("'teleport' is not available"));
        assert!(hint.contains("shell, read_file"));
        assert!(hint.contains("call_abc123"));
    }

    #[test]
    fn test_hint_with_no_tools() {
        let hint = diagnostic_hint(&RepairKind::MissingFunctionName, &[]);
        assert!(hint.contains("Allowed tools: none"));
    }

    #[test]
    fn test_repair_preserves_output() {
        let mut envelope = ToolResultEnvelope::from_output(
            "view_image",
            "call_1",
            json!({"path": "notes.txt"}),
            json!({"body": "original upstream body"}),
        );
        repair_envelope(
            &mut envelope,
            &RepairKind::NonImagePath("notes.txt".into()),
            &["view_image".into()],
        );
        assert!(!envelope.result.success);
        assert!(envelope.result.stderr.as_ref().unwrap().contains("notes.txt"));
        assert_eq!(envelope.result.output["body"], "original upstream body");
    }
}
