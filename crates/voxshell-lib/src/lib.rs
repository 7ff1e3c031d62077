//! voxshell-lib — Voice gateway engine.
//!
//! Session negotiation relay, shell tool runner, client diagnostics sink, and
//! the HTTP API that fronts them. Depends on voxshell-core for wire types,
//! the credential and the capability manifest.

pub mod relay;
pub mod server;
pub mod shell;
pub mod sink;

// Re-export voxshell-core for convenience
pub use voxshell_core;
