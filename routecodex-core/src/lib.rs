//! Core types for RouteCodex: provider bindings, configuration surface,
//! route table and matcher, stable config hashing, and the error taxonomy.

pub mod binding;
pub mod config;
pub mod context;
pub mod error;
pub mod hash;
pub mod matcher;
pub mod route;

pub use binding::{ModuleKind, ProviderBinding, ProviderFamily, ProviderProtocol};
pub use error::RouterError;
