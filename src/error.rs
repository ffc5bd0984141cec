//! Error types for the AtlasKV client
//!
//! Provides a unified error type for all client operations. Errors are
//! `Clone` because a single failure (a dropped transport, a close) is
//! delivered to every outstanding completion handle.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using ClientError
pub type Result<T> = std::result::Result<T, ClientError>;

/// Unified error type for client operations
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    // -------------------------------------------------------------------------
    // Encoding Errors (raised synchronously, never queued)
    // -------------------------------------------------------------------------
    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    // -------------------------------------------------------------------------
    // Reply Errors
    // -------------------------------------------------------------------------
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error: {0}")]
    Server(String),

    // -------------------------------------------------------------------------
    // Connection Errors
    // -------------------------------------------------------------------------
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request queue size {0} exceeded")]
    QueueFull(usize),

    // -------------------------------------------------------------------------
    // Command Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Command cancelled")]
    Cancelled,

    #[error("Transaction error: {0}")]
    Transaction(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(Arc::new(err))
    }
}

/// Coarse classification of a [`ClientError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Encode,
    Decode,
    Protocol,
    Server,
    Connection,
    Timeout,
    Cancelled,
    Transaction,
    Config,
}

impl ClientError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Encode(_) | ClientError::InvalidCommand(_) => ErrorKind::Encode,
            ClientError::Decode(_) | ClientError::UnexpectedReply(_) => ErrorKind::Decode,
            ClientError::Protocol(_) => ErrorKind::Protocol,
            ClientError::Server(_) => ErrorKind::Server,
            ClientError::Io(_)
            | ClientError::Connection(_)
            | ClientError::ConnectionClosed
            | ClientError::QueueFull(_) => ErrorKind::Connection,
            ClientError::Timeout(_) => ErrorKind::Timeout,
            ClientError::Cancelled => ErrorKind::Cancelled,
            ClientError::Transaction(_) => ErrorKind::Transaction,
            ClientError::Config(_) => ErrorKind::Config,
        }
    }

    /// True for transport failures, drops, closes and backpressure rejections
    pub fn is_connection_error(&self) -> bool {
        self.kind() == ErrorKind::Connection
    }

    /// True if the command did not get a reply in time
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout(_))
    }
}
