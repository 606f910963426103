//! The provider transport layer, in three tiers: the brand-agnostic
//! kernel at the bottom, one protocol adapter per wire contract in the
//! middle, and a family profile per provider brand on top.

pub mod auth;
pub mod kernel;
pub mod profile;
pub mod protocol;
pub mod provider;
pub mod registry;
pub mod sse;

pub use kernel::HttpKernel;
pub use provider::ProviderFactory;
pub use registry::ProfileRegistry;
