//! Tokio reactor integration.
//!
//! [`Conn`] wires a [`ConnectionDriver`](crate::ConnectionDriver) to tokio's
//! I/O driver. It is `!Send` and must live on a
//! [`LocalSet`](tokio::task::LocalSet) of a current-thread runtime.

mod conn;
mod watcher;

pub use conn::{Conn, ConnBuilder};
pub use watcher::FdWatcher;
