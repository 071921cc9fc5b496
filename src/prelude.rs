//! Prelude module for convenient imports.

pub use crate::error::{ConsoleError, Result};
pub use crate::host::{ConsoleEvent, ConsoleHost};
pub use crate::sandbox::{
    config::SandboxConfig,
    loader::{ModuleFetcher, StaticFetcher},
};
