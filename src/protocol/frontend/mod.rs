//! Client to server messages.
//!
//! Every writer appends one complete message to the caller's buffer.

pub mod auth;
pub mod extended;
pub mod session;

pub use auth::{write_password, write_sasl_initial_response, write_sasl_response};
pub use extended::{
    write_bind, write_describe_portal, write_describe_statement, write_execute, write_parse,
    write_sync,
};
pub use session::{write_query, write_startup, write_terminate};

/// Type bytes of the messages this crate sends.
pub mod msg_type {
    /// Every authentication response, SASL included.
    pub const PASSWORD: u8 = b'p';
    pub const QUERY: u8 = b'Q';
    pub const PARSE: u8 = b'P';
    pub const BIND: u8 = b'B';
    pub const EXECUTE: u8 = b'E';
    pub const DESCRIBE: u8 = b'D';
    pub const SYNC: u8 = b'S';
    pub const TERMINATE: u8 = b'X';
}
