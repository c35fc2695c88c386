//! The wire-protocol client seen by the driver.
//!
//! [`ProtocolClient`] is the libpq-style non-blocking interface the driver is
//! written against. [`PgConnection`] implements it over a plain socket.

mod pg;
mod stream;

use std::os::fd::BorrowedFd;

use crate::error::ClientResult;
use crate::protocol::types::Oid;
use crate::result::QueryResult;

pub use pg::PgConnection;

/// Outcome of one non-blocking handshake step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingStatus {
    /// Wait until the socket is readable, then poll again.
    Reading,
    /// Wait until the socket is writable, then poll again.
    Writing,
    /// Handshake finished; check [`ProtocolClient::status`].
    Ok,
    /// Handshake failed; see [`ProtocolClient::error_message`].
    Failed,
    /// Legacy status that well-behaved clients never return.
    Active,
}

/// Connection status as reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    Ok,
    Bad,
    /// Waiting for the socket connect to complete.
    Started,
    /// Connected; startup packet not yet sent.
    Made,
    AwaitingResponse,
    AuthOk,
}

/// Non-blocking PostgreSQL client.
///
/// None of the methods block. Send primitives queue the request and push as
/// much as the socket accepts; [`flush`](Self::flush) pushes the rest.
pub trait ProtocolClient {
    /// Advance the handshake.
    fn connect_poll(&mut self) -> PollingStatus;

    fn status(&self) -> ConnStatus;

    /// Last connection-level error, empty if none.
    fn error_message(&self) -> String;

    /// Read whatever the socket has and process complete messages.
    fn consume_input(&mut self) -> ClientResult<()>;

    /// True while the in-flight request has not produced its final result.
    fn is_busy(&self) -> bool;

    /// Take the result of the finished request.
    ///
    /// `Ok(None)` when no request finished since the last call. A server
    /// error for the statement comes back as `Err`.
    fn get_last_result(&mut self) -> ClientResult<Option<QueryResult>>;

    fn send_query(&mut self, sql: &str) -> ClientResult<()>;

    fn send_query_params(&mut self, sql: &str, params: &[Option<String>]) -> ClientResult<()>;

    fn send_prepare(&mut self, name: &str, sql: &str, param_types: &[Oid]) -> ClientResult<()>;

    fn send_query_prepared(&mut self, name: &str, params: &[Option<String>]) -> ClientResult<()>;

    fn send_describe_prepared(&mut self, name: &str) -> ClientResult<()>;

    fn send_describe_portal(&mut self, name: &str) -> ClientResult<()>;

    /// Write queued bytes. `Ok(true)` once nothing is left.
    fn flush(&mut self) -> ClientResult<bool>;

    /// Close the connection and release the socket.
    fn finish(&mut self);

    fn socket(&self) -> Option<BorrowedFd<'_>>;
}
