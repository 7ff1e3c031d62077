//! voxshell-core — Pure types, credential handling, and the capability manifest.
//!
//! No async runtime, no network, no process spawning.

pub mod credential;
pub mod error;
pub mod manifest;
pub mod types;

pub use error::ConfigError;
