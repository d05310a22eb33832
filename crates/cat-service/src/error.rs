//! Error types for the CAT service

use cat_protocol::{ProtocolError, TransportError};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by [`CatService`](crate::CatService) operations
///
/// Failures inside the running workers (read/write errors, dropped lines)
/// are logged and never reach a caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// A required collaborator was not supplied to the builder
    #[error("missing dependency: {0}")]
    MissingDependency(&'static str),

    /// No usable default rig is configured
    #[error("invalid rig id: {0}")]
    InvalidRigId(String),

    /// The rig configuration failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A state definition's prefix is blank
    #[error("state definition #{index} has an empty prefix")]
    EmptyStatePrefix { index: usize },

    /// The service has not been initialized
    #[error("service not initialized")]
    NotInitialized,

    /// The service is not running
    #[error("service not started")]
    NotStarted,

    /// The transport could not be opened
    #[error("failed to open transport: {0}")]
    TransportOpenFailed(TransportError),

    /// The transport failed to close cleanly
    #[error("failed to close transport: {0}")]
    TransportCloseFailed(TransportError),

    /// No command with this name is configured
    #[error("command not found: {0}")]
    CommandNotFound(String),

    /// Wrong number of parameters for the command template
    #[error("command {command} expects {expected} parameters, got {provided}")]
    ArityMismatch {
        command: String,
        expected: usize,
        provided: usize,
    },

    /// The send queue has no free slot
    #[error("send queue is full")]
    QueueFull,

    /// There is no active send queue
    #[error("send queue is closed")]
    QueueClosed,
}

impl From<ProtocolError> for ServiceError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::EmptyStatePrefix { index } => Self::EmptyStatePrefix { index },
            ProtocolError::CommandNotFound(name) => Self::CommandNotFound(name),
            ProtocolError::ArityMismatch {
                command,
                expected,
                provided,
            } => Self::ArityMismatch {
                command,
                expected,
                provided,
            },
            ProtocolError::InvalidTemplate { .. } => Self::InvalidConfig(err.to_string()),
        }
    }
}

impl From<ConfigError> for ServiceError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::RigNotFound(id) => Self::InvalidRigId(id.to_string()),
            other => Self::InvalidConfig(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_mapping() {
        let err: ServiceError = ProtocolError::ArityMismatch {
            command: "INIT".into(),
            expected: 2,
            provided: 1,
        }
        .into();
        assert!(matches!(err, ServiceError::ArityMismatch { expected: 2, .. }));

        let err: ServiceError = ProtocolError::EmptyStatePrefix { index: 3 }.into();
        assert_eq!(err, ServiceError::EmptyStatePrefix { index: 3 });
    }

    #[test]
    fn test_config_error_mapping() {
        let err: ServiceError = ConfigError::RigNotFound(7).into();
        assert_eq!(err, ServiceError::InvalidRigId("7".into()));

        let err: ServiceError = ConfigError::Invalid("bad".into()).into();
        assert!(matches!(err, ServiceError::InvalidConfig(_)));
    }
}
