//! A non-blocking PostgreSQL driver for single-threaded event loops.
//!
//! # Features
//!
//! - **Reactor-agnostic core**: [`ConnectionDriver`] reacts to readiness
//!   events and never blocks; any reactor can drive it through [`Watcher`]
//! - **Deferred results**: every operation returns a [`Deferred`] that is
//!   settled exactly once, observable with callbacks or `.await`
//! - **Serialized queries**: one query in flight, the rest queued in order
//! - **Sans-I/O protocol**: the wire protocol lives in state machines that
//!   never touch the socket
//!
//! # Example
//!
//! ```no_run
//! use evented_postgres::tokio::Conn;
//!
//! fn main() -> evented_postgres::Result<()> {
//!     let rt = tokio::runtime::Builder::new_current_thread()
//!         .enable_io()
//!         .build()?;
//!     let local = tokio::task::LocalSet::new();
//!
//!     local.block_on(&rt, async {
//!         let conn = Conn::connect("postgres://postgres@localhost/postgres?sslmode=disable")?;
//!         conn.connection().await?;
//!
//!         let result = conn.send_query("SELECT 1 AS num").await?;
//!         assert_eq!(result.first().and_then(|row| row.get("num")), Some("1"));
//!
//!         conn.close();
//!         Ok::<_, evented_postgres::Error>(())
//!     })
//! }
//! ```

pub mod buffer_set;
pub mod client;
pub mod driver;
pub mod error;
pub mod future;
pub mod logger;
pub mod opts;
pub mod protocol;
pub mod query;
pub mod queue;
pub mod result;
pub mod state;
pub mod watcher;

#[cfg(feature = "tokio")]
pub mod tokio;

pub use client::{ConnStatus, PgConnection, PollingStatus, ProtocolClient};
pub use driver::{ConnectionDriver, DriverConfig, Settlements, State};
pub use error::{ClientError, Error, ErrorFields, Result, UnexpectedState};
pub use future::Deferred;
pub use logger::Logger;
pub use opts::Opts;
pub use protocol::types::{FormatCode, Oid, TransactionStatus};
pub use query::Operation;
pub use queue::QueryQueue;
pub use result::{Column, QueryResult, Row};
pub use watcher::{Event, Watcher};
