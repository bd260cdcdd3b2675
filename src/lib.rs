#![allow(clippy::too_many_arguments)]

//! toolwarden — a sandboxed tool-execution runtime.
//!
//! Callers register tool factories with a [`registry::ToolRegistry`], then
//! drive invocations through an [`executor::Executor`], which wraps each
//! call in validation, security gating, resource monitoring, output
//! limiting, and observability. See `DESIGN.md` for how each module maps
//! onto the spec's components (C1-C9).

pub mod cache;
pub mod error;
pub mod events;
pub mod executor;
pub mod fixtures;
pub mod lifecycle;
pub mod model;
pub mod observability;
pub mod output_limiter;
pub mod registry;
pub mod resource_monitor;
pub mod security_manager;
pub mod settings;
pub mod tool;
pub mod validator;

pub use error::ToolWardenError;
pub use executor::Executor;
pub use model::*;
pub use registry::ToolRegistry;
pub use tool::Tool;

/// Generates a short, opaque correlation id: 8 lowercase hex characters.
///
/// Not a UUID -- the spec calls for a short opaque token, and the rest of
/// this crate's lineage leans on `fastrand` for exactly this kind of
/// non-cryptographic id rather than pulling in a heavier generator.
pub fn new_correlation_id() -> String {
    format!("{:08x}", fastrand::u32(..))
}
