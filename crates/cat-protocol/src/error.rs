//! Error types for CAT definition handling and transports

use thiserror::Error;

/// Errors raised while building lookup tables or formatting commands
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A state definition's prefix is blank once trimmed
    #[error("state definition #{index} has an empty prefix")]
    EmptyStatePrefix { index: usize },

    /// A command template contains something other than `%s` or `%%`
    #[error("invalid template for command {command}: {reason}")]
    InvalidTemplate { command: String, reason: String },

    /// No command with the given name is configured
    #[error("command not found: {0}")]
    CommandNotFound(String),

    /// The caller supplied the wrong number of template parameters
    #[error("command {command} expects {expected} parameters, got {provided}")]
    ArityMismatch {
        command: String,
        expected: usize,
        provided: usize,
    },
}

/// Errors produced by a [`Transport`](crate::transport::Transport)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No complete response arrived before the read deadline
    #[error("read timed out after {0}ms")]
    Timeout(u64),

    /// The port could not be opened
    #[error("failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    /// The transport has been closed
    #[error("transport closed")]
    Closed,

    /// Any other I/O failure
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether this error only means "nothing arrived in time"
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::Timeout(0),
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::NotConnected => Self::Closed,
            _ => Self::Io(err.to_string()),
        }
    }
}
