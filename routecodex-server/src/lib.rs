//! Ingress server for RouteCodex: axum router, request handlers, and
//! shared application state. The binary in `main.rs` wires this to the
//! configuration and the pipeline runtime.

pub mod handlers;
pub mod server;
pub mod state;
