//! Per-connection logging.

use std::fmt;

use tracing::{Dispatch, Span};

/// Where a connection's log events go.
///
/// Without a dispatch, events go to whatever subscriber is current when they
/// are emitted. With one, they go to that subscriber only. Either way they
/// are emitted inside the connection's span.
#[derive(Clone)]
pub struct Logger {
    dispatch: Option<Dispatch>,
    span: Span,
}

impl Logger {
    /// Log to the current subscriber.
    pub fn ambient() -> Self {
        Self {
            dispatch: None,
            span: Span::none(),
        }
    }

    /// Log to `dispatch`.
    pub fn new(dispatch: Dispatch) -> Self {
        Self {
            dispatch: Some(dispatch),
            span: Span::none(),
        }
    }

    /// Attach a span created under this logger's subscriber.
    pub fn with_span(mut self, make: impl FnOnce() -> Span) -> Self {
        self.span = match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, make),
            None => make(),
        };
        self
    }

    /// Run `f` with this logger's subscriber and span in effect.
    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, || self.span.in_scope(f)),
            None => self.span.in_scope(f),
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::ambient()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("dispatch", &self.dispatch.is_some())
            .field("span", &self.span)
            .finish()
    }
}
