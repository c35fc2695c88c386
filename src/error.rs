//! Error types for evented-postgres.
//!
//! Two layers are kept apart:
//!
//! - [`ClientError`] is raised by the wire-protocol client (server errors,
//!   malformed messages, socket failures).
//! - [`Error`] is what callers observe through a [`Deferred`](crate::Deferred):
//!   connection-level outcomes of the driver plus [`Error::Query`], which wraps
//!   a `ClientError` for the one query it affected.
//!
//! Both are `Clone`, since a single disconnect is delivered to every
//! outstanding query.

use std::sync::Arc;

use thiserror::Error;

use crate::client::{ConnStatus, PollingStatus};
use crate::driver::State;

/// Result type for driver-level operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Result type for protocol client operations.
pub type ClientResult<T> = core::result::Result<T, ClientError>;

/// PostgreSQL error/notice field types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// Non-localized severity (same as severity but never translated)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    /// Context/stack trace
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{}: ", severity)?;
        }
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// Error raised by the wire-protocol client.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Server error response
    #[error("PostgreSQL error: {0}")]
    Server(ErrorFields),

    /// Protocol error (malformed message, unexpected response, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The server closed the connection
    #[error("Server closed the connection unexpectedly")]
    ConnectionClosed,

    /// Invalid usage (e.g. sending while another command is in progress)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl ClientError {
    /// Returns true if the error indicates the connection is broken and cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            ClientError::Io(_) | ClientError::ConnectionClosed => true,
            ClientError::Server(fields) => {
                matches!(fields.severity.as_deref(), Some("FATAL") | Some("PANIC"))
            }
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            ClientError::Server(fields) => fields.code.as_deref(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(Arc::new(err))
    }
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized>
    From<zerocopy::error::CastError<Src, Dst>> for ClientError
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        ClientError::Protocol(format!("zerocopy cast error: {err:?}"))
    }
}

/// Internal invariant violations.
///
/// These are states the protocol client is not documented to produce, or
/// driver states that cannot be reached through its public operations. The
/// driver does not try to recover from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UnexpectedState {
    /// Handshake finished but the connection status is neither ok nor bad.
    #[error("bad connection status after handshake: {0:?}")]
    BadConnectionStatus(ConnStatus),

    /// The handshake poll returned a status the driver does not handle.
    #[error("bad handshake poll status: {0:?}")]
    BadPollStatus(PollingStatus),

    /// A result arrived while no query was in flight.
    #[error("result in unexpected state {state}")]
    UnexpectedResult { state: State },

    /// A readiness event arrived in a state that does not expect it.
    #[error("{event} event in unexpected state {state}")]
    UnexpectedEvent {
        state: State,
        event: crate::watcher::Event,
    },

    /// A deferred was resolved twice.
    #[error("deferred already resolved")]
    AlreadyResolved,
}

/// Error delivered to callers of the driver.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The handshake completed but the server rejected the connection.
    #[error("connection refused: {message}")]
    ConnectionRefused { message: String },

    /// The connection was lost after it had been established.
    #[error("disconnected")]
    Disconnect,

    /// The connection was closed by the caller.
    #[error("connection closed")]
    Closed,

    /// A query was submitted while the connection could not accept work.
    #[error("cannot submit query in state {state}")]
    BadState { state: State },

    /// The protocol client failed while sending a statement or reading its result.
    #[error(transparent)]
    Query(#[from] ClientError),

    /// Internal invariant violation.
    #[error("unexpected state: {0}")]
    Unexpected(#[from] UnexpectedState),

    /// Invalid connection options.
    #[error("invalid options: {0}")]
    Options(String),

    /// Registering the socket with the reactor failed.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl Error {
    /// Get the SQLSTATE code if this wraps a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(err) => err.sqlstate(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}
