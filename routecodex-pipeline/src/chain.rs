use crate::module::{HealthState, Payload};
use crate::pool::{PoolEntry, StaticInstancePool};
use routecodex_core::RouterError;
use routecodex_core::context::RequestContext;
use routecodex_core::route::RouteDef;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Transient pairing of two consecutive chain positions. Connections are
/// created at assembly and broken in reverse order at teardown; they
/// allocate no module instances.
#[derive(Debug)]
pub struct Connection {
    pub id: String,
    pub position: usize,
    /// Optional payload transform applied after the upstream module's
    /// processing operation.
    pub transform: Option<fn(Payload) -> Payload>,
    open: bool,
}

impl Connection {
    fn new(position: usize) -> Self {
        Self {
            id: format!("conn_{}_{}", position, uuid::Uuid::new_v4().simple()),
            position,
            transform: None,
            open: true,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

/// Error surfaced from a chain stage, wrapping the module's own failure
/// with enough context to locate it.
#[derive(Debug)]
pub struct StageError {
    pub connection_id: String,
    pub position: usize,
    pub module_kind: String,
    pub module_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub source: RouterError,
}

impl StageError {
    pub fn details(&self) -> Value {
        json!({
            "connectionId": self.connection_id,
            "position": self.position,
            "moduleType": self.module_kind,
            "moduleId": self.module_id,
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }

    pub fn into_inner(self) -> RouterError {
        self.source
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "stage {} ({}/{}) failed: {}",
            self.position, self.module_kind, self.module_id, self.source
        )
    }
}

#[derive(Debug)]
struct ChainLink {
    entry: Arc<PoolEntry>,
    /// Connection to the next link; the last link has none.
    connection: Option<Connection>,
}

/// A transient, borrowing assembly of pool instances. Exists only for one
/// request; teardown runs exactly once, on explicit call or on drop.
#[derive(Debug)]
pub struct ModuleChain {
    links: Vec<ChainLink>,
    degraded_after: u32,
    torn_down: bool,
}

impl ModuleChain {
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn connection_ids(&self) -> Vec<&str> {
        self.links
            .iter()
            .filter_map(|l| l.connection.as_ref().map(|c| c.id.as_str()))
            .collect()
    }

    /// Walk the chain front-to-back, feeding each instance's processing
    /// operation and then the connection transform (if any).
    pub async fn execute(
        &mut self,
        mut payload: Payload,
        ctx: &mut RequestContext,
    ) -> Result<Payload, StageError> {
        for position in 0..self.links.len() {
            let link = &self.links[position];
            let module = &link.entry.instance;
            debug!(
                request_id = %ctx.request_id,
                position,
                module_kind = %module.kind(),
                module_id = module.id(),
                stage = payload.describe(),
                "Executing chain stage"
            );

            let connection_id = link
                .connection
                .as_ref()
                .map(|c| c.id.clone())
                .unwrap_or_else(|| "terminal".to_string());

            payload = match module.process(payload, ctx).await {
                Ok(next) => next,
                Err(source) => {
                    link.entry.record_failure(self.degraded_after, false);
                    return Err(StageError {
                        connection_id,
                        position,
                        module_kind: module.kind().as_str().to_string(),
                        module_id: module.id().to_string(),
                        timestamp: chrono::Utc::now(),
                        source,
                    });
                }
            };
            link.entry.record_success();

            // Tool-structure ownership: only the llmswitch may emit or
            // mutate tool_calls; every other module's response output is
            // checked before it moves on.
            if let Payload::Response(body) = &payload {
                if let Err(source) = module.validate_output(body) {
                    return Err(StageError {
                        connection_id,
                        position,
                        module_kind: module.kind().as_str().to_string(),
                        module_id: module.id().to_string(),
                        timestamp: chrono::Utc::now(),
                        source,
                    });
                }
            }

            if let Some(conn) = &link.connection {
                if let Some(transform) = conn.transform {
                    payload = transform(payload);
                }
            }
        }
        Ok(payload)
    }

    /// Break every connection in reverse order. Pooled instances survive.
    /// Safe to call more than once; only the first call does work.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        for link in self.links.iter_mut().rev() {
            if let Some(conn) = &mut link.connection {
                conn.open = false;
                debug!(connection_id = %conn.id, "Connection closed");
            }
        }
    }
}

impl Drop for ModuleChain {
    fn drop(&mut self) {
        // Guarantees the teardown path even when the request future is
        // dropped mid-flight (client disconnect / cancellation).
        self.teardown();
    }
}

/// Per-request chain assembler.
pub struct Connector {
    pool: Arc<StaticInstancePool>,
    library: HashMap<String, Value>,
}

impl Connector {
    pub fn new(pool: Arc<StaticInstancePool>, library: HashMap<String, Value>) -> Self {
        Self { pool, library }
    }

    pub fn pool(&self) -> &Arc<StaticInstancePool> {
        &self.pool
    }

    /// Assemble a chain for a matched route. All-or-nothing: any condition
    /// mismatch, pool miss, or unhealthy instance fails the whole chain
    /// before anything is borrowed.
    pub fn assemble(
        &self,
        route: &RouteDef,
        request_meta: &Value,
    ) -> Result<ModuleChain, RouterError> {
        let mut entries = Vec::with_capacity(route.modules.len());
        for spec in &route.modules {
            if let Some(condition) = &spec.condition {
                if !condition.matches(request_meta) {
                    return Err(RouterError::ConditionFailed(condition.describe()));
                }
            }
            let config = StaticInstancePool::resolve_config(&spec.config, &self.library)?;
            let entry = self.pool.get(spec.kind, &config)?;
            if entry.health() != HealthState::Healthy {
                warn!(
                    route_id = %route.id,
                    module_id = entry.instance.id(),
                    state = entry.health().as_str(),
                    "Refusing to assemble chain with unhealthy instance"
                );
                return Err(RouterError::InstanceUnhealthy {
                    id: entry.instance.id().to_string(),
                    state: entry.health().as_str().to_string(),
                });
            }
            entries.push(entry);
        }

        let last = entries.len().saturating_sub(1);
        let links = entries
            .into_iter()
            .enumerate()
            .map(|(position, entry)| ChainLink {
                entry,
                connection: (position < last).then(|| Connection::new(position)),
            })
            .collect();

        Ok(ModuleChain {
            links,
            degraded_after: self.pool.degraded_after(),
            torn_down: false,
        })
    }
}
