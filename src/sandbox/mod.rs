//! Sandbox module containing all execution-context components.

pub mod config;
pub mod console;
pub mod context;
pub mod loader;
