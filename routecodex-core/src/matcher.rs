use crate::error::RouterError;
use crate::route::{RouteCategory, RouteDef};
use arc_swap::ArcSwap;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Pre-compiled route entry. The model regex is anchored so `glm-4` does
/// not match `xglm-4x`.
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    pub route: Arc<RouteDef>,
    model: Regex,
    declaration_index: usize,
}

struct CompiledTable {
    /// Sorted by (priority desc, declaration order asc).
    entries: Vec<CompiledRoute>,
}

/// What the matcher evaluates a request against. Built by the ingress
/// handler; the matcher itself never reads the raw payload.
#[derive(Debug, Clone)]
pub struct MatchInput<'a> {
    pub model: &'a str,
    pub provider_hint: Option<&'a str>,
    /// Explicit category tag from the request, if any. Never inferred.
    pub category: Option<RouteCategory>,
    /// Flat request metadata for structured conditions.
    pub meta: &'a Value,
}

/// Priority route matcher.
///
/// Pure and side-effect-free on the match path; the compiled table is
/// swapped atomically on rebuild.
pub struct RouteTable {
    inner: ArcSwap<CompiledTable>,
    version: AtomicU64,
}

impl RouteTable {
    /// Compile a route set. Every route is validated; any invalid route
    /// rejects the whole table (fail fast at load, not at request time).
    pub fn build(routes: Vec<RouteDef>) -> Result<Self, RouterError> {
        let table = Self {
            inner: ArcSwap::new(Arc::new(CompiledTable { entries: vec![] })),
            version: AtomicU64::new(0),
        };
        table.replace_all(routes)?;
        Ok(table)
    }

    /// Replace the route set atomically.
    pub fn replace_all(&self, routes: Vec<RouteDef>) -> Result<(), RouterError> {
        let mut entries = Vec::with_capacity(routes.len());
        for (declaration_index, route) in routes.into_iter().enumerate() {
            route.validate()?;
            if !route.enable {
                continue;
            }
            let model = Regex::new(&format!("^(?:{})$", route.pattern.model))
                .map_err(|e| RouterError::ConfigError(format!("route '{}': {e}", route.id)))?;
            entries.push(CompiledRoute {
                route: Arc::new(route),
                model,
                declaration_index,
            });
        }

        // Stable sort keeps declaration order inside a priority tier.
        entries.sort_by(|a, b| {
            b.route
                .priority
                .cmp(&a.route.priority)
                .then(a.declaration_index.cmp(&b.declaration_index))
        });

        let count = entries.len();
        self.inner.store(Arc::new(CompiledTable { entries }));
        self.version.fetch_add(1, Ordering::Release);
        info!(count, "Route table rebuilt");
        Ok(())
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    pub fn route_count(&self) -> usize {
        self.inner.load().entries.len()
    }

    pub fn all_routes(&self) -> Vec<Arc<RouteDef>> {
        self.inner
            .load()
            .entries
            .iter()
            .map(|e| Arc::clone(&e.route))
            .collect()
    }

    /// First match wins. No match is an error; there is never an implicit
    /// default; a default route is just a route whose pattern matches
    /// everything.
    pub fn match_route(&self, input: &MatchInput<'_>) -> Result<Arc<RouteDef>, RouterError> {
        let table = self.inner.load();
        for entry in &table.entries {
            if !entry.model.is_match(input.model) {
                continue;
            }
            if let Some(required) = entry.route.pattern.provider.as_deref() {
                if input.provider_hint != Some(required) {
                    continue;
                }
            }
            // Untagged requests only ever see default-category routes;
            // categorized routes require the explicit tag.
            let wanted = input.category.unwrap_or(RouteCategory::Default);
            if entry.route.category != wanted {
                continue;
            }
            if let Some(cond) = &entry.route.pattern.condition {
                if !cond.matches(input.meta) {
                    continue;
                }
            }
            return Ok(Arc::clone(&entry.route));
        }
        Err(RouterError::NoRoute(input.model.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::ModuleKind;
    use crate::route::{Condition, ConfigRef, ModuleSpec, RoutePattern};
    use serde_json::json;

    fn test_route(id: &str, model: &str, priority: i32) -> RouteDef {
        RouteDef {
            id: id.to_string(),
            pattern: RoutePattern {
                model: model.to_string(),
                provider: None,
                condition: None,
            },
            modules: vec![
                ModuleSpec {
                    kind: ModuleKind::Provider,
                    config: ConfigRef::Config(json!({"provider": "glm"})),
                    condition: None,
                },
                ModuleSpec {
                    kind: ModuleKind::Llmswitch,
                    config: ConfigRef::Config(json!({})),
                    condition: None,
                },
            ],
            priority,
            category: RouteCategory::Default,
            enable: true,
        }
    }

    fn input<'a>(model: &'a str, meta: &'a Value) -> MatchInput<'a> {
        MatchInput {
            model,
            provider_hint: None,
            category: None,
            meta,
        }
    }

    #[test]
    fn test_priority_order() {
        let table = RouteTable::build(vec![
            test_route("low", "glm-.*", 0),
            test_route("high", "glm-.*", 10),
        ])
        .unwrap();
        let meta = json!({});
        let matched = table.match_route(&input("glm-4.7", &meta)).unwrap();
        assert_eq!(matched.id, "high");
    }

    #[test]
    fn test_stable_tie_break() {
        let table = RouteTable::build(vec![
            test_route("first", "glm-.*", 5),
            test_route("second", "glm-.*", 5),
        ])
        .unwrap();
        let meta = json!({});
        assert_eq!(table.match_route(&input("glm-4", &meta)).unwrap().id, "first");
    }

    #[test]
    fn test_no_route_is_explicit_error() {
        let table = RouteTable::build(vec![test_route("r1", "glm-.*", 0)]).unwrap();
        let meta = json!({});
        let err = table.match_route(&input("qwen-max", &meta)).unwrap_err();
        assert_eq!(err.code(), "no_route");
    }

    #[test]
    fn test_model_regex_is_anchored() {
        let table = RouteTable::build(vec![test_route("r1", "glm-4", 0)]).unwrap();
        let meta = json!({});
        assert!(table.match_route(&input("xglm-4x", &meta)).is_err());
        assert!(table.match_route(&input("glm-4", &meta)).is_ok());
    }

    #[test]
    fn test_provider_constraint() {
        let mut route = test_route("r1", ".*", 0);
        route.pattern.provider = Some("glm".into());
        let table = RouteTable::build(vec![route]).unwrap();
        let meta = json!({});
        assert!(table.match_route(&input("glm-4", &meta)).is_err());

        let ok = MatchInput {
            model: "glm-4",
            provider_hint: Some("glm"),
            category: None,
            meta: &meta,
        };
        assert!(table.match_route(&ok).is_ok());
    }

    #[test]
    fn test_explicit_category_tag() {
        let mut thinking = test_route("thinking", ".*", 0);
        thinking.category = RouteCategory::Thinking;
        let fallback = test_route("default", ".*", -1);
        let table = RouteTable::build(vec![thinking, fallback]).unwrap();
        let meta = json!({});

        let tagged = MatchInput {
            model: "glm-4",
            provider_hint: None,
            category: Some(RouteCategory::Thinking),
            meta: &meta,
        };
        assert_eq!(table.match_route(&tagged).unwrap().id, "thinking");

        // Untagged requests never land on a categorized route.
        assert_eq!(table.match_route(&input("glm-4", &meta)).unwrap().id, "default");
    }

    #[test]
    fn test_pattern_condition() {
        let mut route = test_route("big", ".*", 0);
        route.pattern.condition = Some(Condition::Range {
            field: "max_tokens".into(),
            min: Some(100_000.0),
            max: None,
        });
        let table = RouteTable::build(vec![route]).unwrap();
        let big = json!({"max_tokens": 200_000});
        let small = json!({"max_tokens": 1_000});
        assert!(table.match_route(&input("glm-4", &big)).is_ok());
        assert!(table.match_route(&input("glm-4", &small)).is_err());
    }

    #[test]
    fn test_disabled_route_skipped() {
        let mut route = test_route("r1", ".*", 0);
        route.enable = false;
        let table = RouteTable::build(vec![route]).unwrap();
        let meta = json!({});
        assert!(table.match_route(&input("glm-4", &meta)).is_err());
    }

    #[test]
    fn test_rebuild_bumps_version() {
        let table = RouteTable::build(vec![test_route("r1", ".*", 0)]).unwrap();
        let v = table.version();
        table.replace_all(vec![test_route("r2", ".*", 0)]).unwrap();
        assert!(table.version() > v);
    }
}
