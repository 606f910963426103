use crate::module::{HealthState, Module};
use crate::registry::ModuleRegistry;
use dashmap::DashMap;
use routecodex_core::RouterError;
use routecodex_core::binding::ModuleKind;
use routecodex_core::config::PoolConfig;
use routecodex_core::hash::config_hash;
use routecodex_core::route::{ConfigRef, RouteDef};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use tracing::{error, info, warn};

/// A pooled instance plus its health/accounting state.
#[derive(Debug)]
pub struct PoolEntry {
    pub instance: Arc<dyn Module>,
    pub kind: ModuleKind,
    pub config_hash: String,

    health: AtomicU8,
    consecutive_failures: AtomicU32,
    last_accessed_ms: AtomicU64,
    access_count: AtomicU64,
}

impl PoolEntry {
    fn new(instance: Arc<dyn Module>, kind: ModuleKind, config_hash: String) -> Self {
        Self {
            instance,
            kind,
            config_hash,
            health: AtomicU8::new(HealthState::Healthy as u8),
            consecutive_failures: AtomicU32::new(0),
            last_accessed_ms: AtomicU64::new(now_ms()),
            access_count: AtomicU64::new(0),
        }
    }

    pub fn health(&self) -> HealthState {
        HealthState::from_u8(self.health.load(Ordering::Acquire))
    }

    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    pub fn last_accessed_ms(&self) -> u64 {
        self.last_accessed_ms.load(Ordering::Relaxed)
    }

    pub fn touch(&self) {
        self.last_accessed_ms.store(now_ms(), Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        // A degraded instance recovers on success; a failed one does not.
        let _ = self.health.compare_exchange(
            HealthState::Degraded as u8,
            HealthState::Healthy as u8,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    pub fn record_failure(&self, degraded_after: u32, fatal: bool) {
        if fatal {
            self.health.store(HealthState::Failed as u8, Ordering::Release);
            return;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= degraded_after {
            let _ = self.health.compare_exchange(
                HealthState::Healthy as u8,
                HealthState::Degraded as u8,
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
        }
    }
}

/// Static instance pool. All instances are created during `preload`;
/// `get` never creates. Entries are keyed by `(kind, config_hash)` and
/// shared across every route whose module spec hashes identically.
pub struct StaticInstancePool {
    entries: DashMap<(ModuleKind, String), Arc<PoolEntry>>,
    registry: Arc<ModuleRegistry>,
    config: PoolConfig,
}

impl StaticInstancePool {
    pub fn new(registry: Arc<ModuleRegistry>, config: PoolConfig) -> Self {
        Self {
            entries: DashMap::new(),
            registry,
            config,
        }
    }

    /// Resolve a module spec's config against the configuration library.
    pub fn resolve_config(
        spec_config: &ConfigRef,
        library: &HashMap<String, Value>,
    ) -> Result<Value, RouterError> {
        match spec_config {
            ConfigRef::Config(v) => Ok(v.clone()),
            ConfigRef::ConfigRef(name) => library.get(name).cloned().ok_or_else(|| {
                RouterError::ConfigError(format!("unknown config_ref '{name}'"))
            }),
        }
    }

    /// Walk the route table, collect every distinct `(kind, config_hash)`
    /// pair, and instantiate each exactly once. Idempotent: pairs already
    /// present are left untouched, so running preload twice produces the
    /// identical entry set.
    pub fn preload(
        &self,
        routes: &[Arc<RouteDef>],
        library: &HashMap<String, Value>,
    ) -> Result<(), RouterError> {
        let mut created = 0usize;
        for route in routes {
            for spec in &route.modules {
                let config = Self::resolve_config(&spec.config, library)?;
                let hash = config_hash(&config);
                let key = (spec.kind, hash.clone());
                if self.entries.contains_key(&key) {
                    continue;
                }

                let Some(factory) = self.registry.get(spec.kind) else {
                    return Err(RouterError::ConfigError(format!(
                        "no factory registered for module kind '{}'",
                        spec.kind
                    )));
                };

                match factory.build(&config) {
                    Ok(instance) => {
                        info!(
                            module_kind = %spec.kind,
                            config_hash = %hash,
                            id = instance.id(),
                            "Preloaded module instance"
                        );
                        self.entries
                            .insert(key, Arc::new(PoolEntry::new(instance, spec.kind, hash)));
                        created += 1;
                    }
                    Err(e) if spec.kind.is_critical() => {
                        error!(
                            module_kind = %spec.kind,
                            route_id = %route.id,
                            error = %e,
                            "Critical module failed to preload"
                        );
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(
                            module_kind = %spec.kind,
                            route_id = %route.id,
                            error = %e,
                            "Optional module failed to preload, skipping"
                        );
                    }
                }
            }
        }
        info!(created, total = self.entries.len(), "Instance pool preloaded");
        Ok(())
    }

    /// Fetch the preloaded instance for a config. Never creates.
    pub fn get(&self, kind: ModuleKind, config: &Value) -> Result<Arc<PoolEntry>, RouterError> {
        let hash = config_hash(config);
        match self.entries.get(&(kind, hash.clone())) {
            Some(entry) => {
                entry.touch();
                Ok(Arc::clone(entry.value()))
            }
            None => Err(RouterError::InstanceNotFound {
                kind: kind.as_str().to_string(),
                config_hash: hash,
            }),
        }
    }

    /// Health state by instance id.
    pub fn health(&self, id: &str) -> Option<HealthState> {
        self.entries
            .iter()
            .find(|e| e.instance.id() == id)
            .map(|e| e.health())
    }

    /// Remove entries matching the predicate. Chains already holding the
    /// Arc keep it alive until teardown.
    pub fn evict<F>(&self, predicate: F) -> usize
    where
        F: Fn(&PoolEntry) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !predicate(entry));
        before - self.entries.len()
    }

    pub fn degraded_after(&self) -> u32 {
        self.config.degraded_after
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All `(kind, config_hash)` keys, sorted (for determinism checks).
    pub fn keys(&self) -> Vec<(ModuleKind, String)> {
        let mut keys: Vec<_> = self
            .entries
            .iter()
            .map(|e| (e.key().0, e.key().1.clone()))
            .collect();
        keys.sort();
        keys
    }

    /// Spawn the background health probe. Marks instances degraded after
    /// the configured consecutive-failure count; internal errors mark
    /// them failed.
    pub fn spawn_probe(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        let interval = std::time::Duration::from_secs(pool.config.probe_interval_secs.max(1));
        let degraded_after = pool.config.degraded_after;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                let entries: Vec<Arc<PoolEntry>> =
                    pool.entries.iter().map(|e| Arc::clone(e.value())).collect();
                for entry in entries {
                    match entry.instance.probe().await {
                        Ok(()) => entry.record_success(),
                        Err(e) => {
                            let fatal =
                                e.kind() == routecodex_core::error::ErrorKind::Internal;
                            warn!(
                                id = entry.instance.id(),
                                error = %e,
                                fatal,
                                "Instance probe failed"
                            );
                            entry.record_failure(degraded_after, fatal);
                        }
                    }
                }
            }
        })
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
