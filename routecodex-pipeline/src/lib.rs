//! The virtual pipeline runtime: a static pool of preloaded module
//! instances plus a dynamic per-request connector that borrows them.

pub mod breaker;
pub mod chain;
pub mod memory;
pub mod module;
pub mod pool;
pub mod registry;

pub use chain::{Connector, ModuleChain, StageError};
pub use module::{EventStream, HealthState, Module, Payload, SseEvent};
pub use pool::StaticInstancePool;
pub use registry::{ModuleFactory, ModuleRegistry};
