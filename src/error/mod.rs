//! Unified error handling for the command queue
//!
//! Consolidates the error types shared by the store, the handler registry and
//! the orchestration layer, plus the failure type handlers report back.

use thiserror::Error;

/// Errors produced by queue, store and configuration operations.
#[derive(Error, Debug)]
pub enum SledboxError {
    /// Underlying sled failure
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// IO failure while reading configuration
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A record or payload could not be encoded or decoded
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Dispatch found no handler matching the command name
    #[error("No handler registered for command '{command}'")]
    HandlerNotFound { command: String },

    /// Two handlers were registered under the same command name
    #[error("Handler for command '{command}' is already registered")]
    DuplicateHandler { command: String },

    /// A handler reported failure while executing a command
    #[error("Handler failed: {0}")]
    Handler(#[from] HandlerError),

    /// Configuration failed validation or could not be parsed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The queue drivers were started a second time
    #[error("Command queue drivers already started")]
    AlreadyStarted,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for queue operations
pub type SledboxResult<T> = Result<T, SledboxError>;

/// Failure reported by a [`crate::registry::CommandHandler`].
///
/// Any error a handler returns is treated the same way: the attempt failed and
/// the command becomes eligible for retry until its attempt budget runs out.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
