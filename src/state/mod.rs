//! Sans-I/O state machines for the PostgreSQL protocol.
//!
//! Machines consume framed backend messages and append frontend messages to a
//! caller-owned buffer. They never touch the socket; each `step` returns an
//! [`Action`] telling the caller what to do next.

pub mod action;
pub mod connection;
pub mod response;

pub use action::{Action, AsyncMessage};
pub use connection::{StartupState, StartupStateMachine};
pub use response::ResponseStateMachine;
