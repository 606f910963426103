use crate::module::Module;
use routecodex_core::RouterError;
use routecodex_core::binding::ModuleKind;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds module instances from normalized config values.
///
/// Factories are registered once at startup, before preload; the registry
/// is immutable thereafter.
pub trait ModuleFactory: Send + Sync {
    fn kind(&self) -> ModuleKind;

    fn build(&self, config: &Value) -> Result<Arc<dyn Module>, RouterError>;
}

pub struct ModuleRegistry {
    factories: HashMap<ModuleKind, Arc<dyn ModuleFactory>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, factory: Arc<dyn ModuleFactory>) {
        let kind = factory.kind();
        tracing::info!(module_kind = %kind, "Registered module factory");
        self.factories.insert(kind, factory);
    }

    pub fn get(&self, kind: ModuleKind) -> Option<&Arc<dyn ModuleFactory>> {
        self.factories.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
