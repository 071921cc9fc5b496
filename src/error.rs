//! Host-side error types.
//!
//! These cover the orchestrator's own failures. Faults raised by script code
//! are not errors here; they travel the channel as `Fault` events and reach
//! the display like any other output.

use thiserror::Error;

/// Errors that can occur on the host side of the console.
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// The channel to the execution context is gone: the instance was
    /// destroyed or its task died. Only a reset recovers from this.
    #[error("execution context channel is closed")]
    ChannelClosed,

    /// A fresh instance failed to reach its ready signal.
    #[error("execution context failed to start: {0}")]
    Startup(String),

    /// History persistence failed to encode or decode.
    #[error("history storage error: {0}")]
    Storage(String),

    /// I/O error (history file access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ConsoleError {
    /// Check if this error means the instance is dead and a reset is needed.
    pub fn is_channel_closed(&self) -> bool {
        matches!(self, ConsoleError::ChannelClosed)
    }

    /// Check if this error occurred during instance startup.
    pub fn is_startup(&self) -> bool {
        matches!(self, ConsoleError::Startup(_))
    }
}

/// Result type alias for host operations.
pub type Result<T> = std::result::Result<T, ConsoleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_helpers() {
        assert!(ConsoleError::ChannelClosed.is_channel_closed());
        assert!(!ConsoleError::ChannelClosed.is_startup());
        assert!(ConsoleError::Startup("no ready".into()).is_startup());
    }

    #[test]
    fn test_io_conversion() {
        let err: ConsoleError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, ConsoleError::Io(_)));
    }
}
