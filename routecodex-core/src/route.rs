use crate::binding::ModuleKind;
use crate::error::RouterError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A Route defines how incoming requests are matched and which module
/// chain serves them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteDef {
    /// Unique route identifier
    pub id: String,

    /// Match pattern
    pub pattern: RoutePattern,

    /// Ordered module specifications. The last entry must be `llmswitch`.
    pub modules: Vec<ModuleSpec>,

    /// Priority (higher = matched first, ties break on declaration order)
    #[serde(default)]
    pub priority: i32,

    /// Route category metadata. Selection is by explicit request tagging,
    /// never inferred.
    #[serde(default)]
    pub category: RouteCategory,

    /// Whether this route is enabled
    #[serde(default = "default_enabled")]
    pub enable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutePattern {
    /// Model regex (anchored by the matcher)
    pub model: String,

    /// Exact provider constraint
    #[serde(default)]
    pub provider: Option<String>,

    /// Structured predicate over request metadata
    #[serde(default)]
    pub condition: Option<Condition>,
}

/// Route category resolution is metadata only.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RouteCategory {
    #[default]
    Default,
    Longcontext,
    Thinking,
    Background,
}

impl RouteCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteCategory::Default => "default",
            RouteCategory::Longcontext => "longcontext",
            RouteCategory::Thinking => "thinking",
            RouteCategory::Background => "background",
        }
    }
}

/// One module slot in a route's chain.
///
/// `deny_unknown_fields` is incompatible with the flattened config field;
/// unknown keys here are caught by the top-level config validation instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Module variant tag
    pub kind: ModuleKind,

    /// Inline config or a reference into the configuration library
    #[serde(flatten)]
    pub config: ConfigRef,

    /// Optional predicate; a declared condition that does not match fails
    /// the whole chain with `condition_failed`; there is no fallback.
    #[serde(default)]
    pub condition: Option<Condition>,
}

/// Inline config object or a named reference resolved at assembly time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigRef {
    Config(Value),
    ConfigRef(String),
}

/// Structured predicate over request metadata: field equality, field
/// presence, or numeric range.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Eq {
        field: String,
        value: Value,
    },
    Present {
        field: String,
    },
    Range {
        field: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
}

impl Condition {
    /// Evaluate against a flat request-metadata object. Pure.
    pub fn matches(&self, meta: &Value) -> bool {
        match self {
            Condition::Eq { field, value } => meta.get(field) == Some(value),
            Condition::Present { field } => {
                meta.get(field).map(|v| !v.is_null()).unwrap_or(false)
            }
            Condition::Range { field, min, max } => {
                let Some(n) = meta.get(field).and_then(|v| v.as_f64()) else {
                    return false;
                };
                min.map(|m| n >= m).unwrap_or(true) && max.map(|m| n <= m).unwrap_or(true)
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Condition::Eq { field, value } => format!("{field} == {value}"),
            Condition::Present { field } => format!("{field} present"),
            Condition::Range { field, min, max } => {
                format!("{field} in [{:?}, {:?}]", min, max)
            }
        }
    }
}

impl RouteDef {
    /// Load-time validation. Rejects routes that could misbehave at
    /// request time: empty chains, non-llmswitch tail (the tool-handling
    /// ownership rule), or an uncompilable model regex.
    pub fn validate(&self) -> Result<(), RouterError> {
        if self.modules.is_empty() {
            return Err(RouterError::ConfigError(format!(
                "route '{}' has no modules",
                self.id
            )));
        }
        let last = self.modules.last().expect("non-empty");
        if last.kind != ModuleKind::Llmswitch {
            return Err(RouterError::ConfigError(format!(
                "route '{}': last module must be llmswitch, found {}",
                self.id, last.kind
            )));
        }
        if !self.modules.iter().any(|m| m.kind == ModuleKind::Provider) {
            return Err(RouterError::ConfigError(format!(
                "route '{}' has no provider module",
                self.id
            )));
        }
        regex::Regex::new(&self.pattern.model).map_err(|e| {
            RouterError::ConfigError(format!(
                "route '{}': invalid model pattern: {e}",
                self.id
            ))
        })?;
        Ok(())
    }
}

fn default_enabled() -> bool {
    true
}
