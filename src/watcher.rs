//! The reactor seam.

use std::fmt;

/// Socket readiness delivered by the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Readable,
    Writable,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Event::Readable => "readable",
            Event::Writable => "writable",
        })
    }
}

/// A socket registration with the reactor.
///
/// The reactor reports readiness by calling
/// [`ConnectionDriver::handle`](crate::ConnectionDriver::handle) and teardown
/// by calling [`ConnectionDriver::unbind`](crate::ConnectionDriver::unbind).
/// The driver uses this trait to choose which readiness it wants to hear
/// about.
pub trait Watcher {
    fn set_notify_readable(&mut self, enabled: bool);

    fn set_notify_writable(&mut self, enabled: bool);

    /// Stop delivering events. Called once, on the driver's terminal
    /// transition.
    fn detach(&mut self);
}
