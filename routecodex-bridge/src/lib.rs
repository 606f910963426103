//! The tool canonicalizer and protocol bridge.
//!
//! This crate is the only place allowed to touch tool-call structure:
//! the `llmswitch` module normalizes every ingress protocol into the
//! canonical chat shape on the way in and denormalizes on the way out,
//! repairing or rejecting malformed tool calls along the way. The
//! `compatibility` module applies family field mappings and is verified
//! never to touch tools.

pub mod anthropic;
pub mod arguments;
pub mod canonical;
pub mod chat;
pub mod compat;
pub mod mcp;
pub mod repair;
pub mod responses;
pub mod switch;

pub use compat::CompatibilityFactory;
pub use switch::LlmSwitchFactory;
