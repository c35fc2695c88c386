//! PostgreSQL v3 wire protocol, without I/O.
//!
//! [`frontend`] writers append messages to a byte buffer; [`backend`] parsers
//! read message payloads in place. [`codec`] holds the framing and primitive
//! readers both sides share.

pub mod backend;
pub mod codec;
pub mod frontend;
pub mod types;

pub use backend::RawMessage;
pub use types::{FormatCode, Oid, TransactionStatus};
