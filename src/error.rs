//! Error types for the connector.

use crate::db::ConnectionHandle;
use std::fmt::Display;
use thiserror::Error;

/// Every failure a request can report.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The request is missing a required field or carries an invalid one.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Open failed, timed out, or the driver failed to close.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Unknown, closed, or wrong-driver handle.
    #[error("Handle error: {message} (handle {handle})")]
    Handle {
        handle: ConnectionHandle,
        message: String,
    },

    /// Malformed SQL or backend execution failure.
    #[error("Query error: {0}")]
    Query(String),

    /// The consumer callback failed to complete a chunk.
    #[error("Callback error: {0}")]
    Callback(String),
}

impl ConnectorError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Wrap a driver failure; `{:#}` keeps the whole anyhow context chain.
    pub fn connection(err: impl Display) -> Self {
        Self::Connection(format!("{:#}", err))
    }

    pub fn query(err: impl Display) -> Self {
        Self::Query(format!("{:#}", err))
    }

    pub fn callback(err: impl Display) -> Self {
        Self::Callback(format!("{:#}", err))
    }

    pub fn handle(handle: ConnectionHandle, message: impl Into<String>) -> Self {
        Self::Handle {
            handle,
            message: message.into(),
        }
    }

    /// Stable machine-readable name, used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Connection(_) => "ConnectionError",
            Self::Handle { .. } => "HandleError",
            Self::Query(_) => "QueryError",
            Self::Callback(_) => "CallbackError",
        }
    }
}

/// Result type alias for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
