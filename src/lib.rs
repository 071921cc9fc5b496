//! # Script Console
//!
//! An interactive console that evaluates user-typed script code inside an
//! isolated execution context and streams structured output back to the
//! host over an asynchronous message channel.
//!
//! The sandbox protects the host from misbehaving code (infinite loops,
//! thrown faults, clobbered globals), not the reverse; it is an isolation
//! convenience, not a hardened security boundary. The pieces:
//!
//! - **Value formatter**: bounded, cycle-safe rendering of arbitrary runtime
//!   values into transmissible text (50-element, depth-3 caps).
//! - **Console/table encoder**: an explicit diagnostics-sink capability the
//!   context is constructed with; no global patching.
//! - **Module loader**: alias-table resolution plus an `@latest` CDN
//!   fallback, fetched through a pluggable [`ModuleFetcher`].
//! - **Execution context**: a spawned task owning the interpreter, with an
//!   expression-first/block-fallback evaluation policy and exactly one
//!   terminal event per submission.
//! - **Host orchestrator**: non-blocking submissions correlated by id, with
//!   unconditional instance reset as the only cancellation primitive.
//!
//! ## Example
//!
//! ```rust,ignore
//! use script_console_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut host = ConsoleHost::start(SandboxConfig::default()).await?;
//!
//!     let id = host.submit("2 ** 10")?;
//!     while let Some(event) = host.recv().await {
//!         if let ConsoleEvent::Result { id: got, value, elapsed, .. } = event {
//!             assert_eq!(got, id);
//!             assert_eq!(value, "1024");
//!             println!("=> {} ({:?})", value, elapsed);
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod format;
pub mod host;
pub mod interp;
pub mod prelude;
pub mod protocol;
pub mod sandbox;

// Re-export main types at crate root for convenience
pub use error::{ConsoleError, Result};
pub use host::command::Command;
pub use host::history::History;
pub use host::{ConsoleEvent, ConsoleHost};
pub use protocol::{ContextMessage, DiagnosticMethod, HostMessage, SubmissionId};
pub use sandbox::config::{SandboxConfig, SandboxConfigBuilder};
pub use sandbox::loader::{resolve, HttpFetcher, ModuleFetcher, StaticFetcher};
