//! Single-assignment result container.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::error::{Error, Result, UnexpectedState};

type Callbacks<A> = Vec<Box<dyn FnOnce(&A)>>;

struct Inner<T> {
    outcome: Option<Rc<Result<T>>>,
    callbacks: Callbacks<T>,
    errbacks: Callbacks<Error>,
    wakers: Vec<Waker>,
}

/// The eventual outcome of a connection attempt or a query.
///
/// A `Deferred` is settled exactly once, with either a value or an [`Error`].
/// Observers attach with [`callback`](Self::callback) and
/// [`errback`](Self::errback), or `.await` it. Observers attached after
/// settlement run immediately.
///
/// Clones share the same outcome. Not `Send`: everything runs on the
/// reactor thread.
pub struct Deferred<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.borrow().outcome.as_deref() {
            None => "pending",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "rejected",
        };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}

impl<T> Deferred<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                outcome: None,
                callbacks: Vec::new(),
                errbacks: Vec::new(),
                wakers: Vec::new(),
            })),
        }
    }

    /// Settle with a value.
    pub fn resolve(&self, value: T) -> Result<()> {
        self.settle(Ok(value))
    }

    /// Settle with an error.
    pub fn reject(&self, error: Error) -> Result<()> {
        self.settle(Err(error))
    }

    fn settle(&self, outcome: Result<T>) -> Result<()> {
        let (outcome, callbacks, errbacks, wakers) = {
            let mut inner = self.inner.borrow_mut();
            if inner.outcome.is_some() {
                return Err(UnexpectedState::AlreadyResolved.into());
            }
            let outcome = Rc::new(outcome);
            inner.outcome = Some(Rc::clone(&outcome));
            (
                outcome,
                std::mem::take(&mut inner.callbacks),
                std::mem::take(&mut inner.errbacks),
                std::mem::take(&mut inner.wakers),
            )
        };

        // The borrow is released: observers may attach more observers.
        match &*outcome {
            Ok(value) => callbacks.into_iter().for_each(|f| f(value)),
            Err(error) => errbacks.into_iter().for_each(|f| f(error)),
        }
        wakers.into_iter().for_each(Waker::wake);
        Ok(())
    }

    /// Run `f` with the value once resolved. Never runs on rejection.
    pub fn callback(&self, f: impl FnOnce(&T) + 'static) -> &Self {
        let outcome = {
            let mut inner = self.inner.borrow_mut();
            match &inner.outcome {
                Some(outcome) => Rc::clone(outcome),
                None => {
                    inner.callbacks.push(Box::new(f));
                    return self;
                }
            }
        };
        if let Ok(value) = &*outcome {
            f(value);
        }
        self
    }

    /// Run `f` with the error once rejected. Never runs on resolution.
    pub fn errback(&self, f: impl FnOnce(&Error) + 'static) -> &Self {
        let outcome = {
            let mut inner = self.inner.borrow_mut();
            match &inner.outcome {
                Some(outcome) => Rc::clone(outcome),
                None => {
                    inner.errbacks.push(Box::new(f));
                    return self;
                }
            }
        };
        if let Err(error) = &*outcome {
            f(error);
        }
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.borrow().outcome.is_some()
    }

    /// The outcome, if settled.
    pub fn outcome(&self) -> Option<Rc<Result<T>>> {
        self.inner.borrow().outcome.clone()
    }
}

impl<T: Clone> Future for Deferred<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.borrow_mut();
        if let Some(outcome) = &inner.outcome {
            return Poll::Ready(Result::clone(outcome));
        }
        if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            inner.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn callbacks_fire_once_on_resolve() {
        let deferred = Deferred::new();
        let seen = Rc::new(Cell::new(0));
        let failed = Rc::new(Cell::new(false));

        let s = Rc::clone(&seen);
        let f = Rc::clone(&failed);
        deferred
            .callback(move |v: &i32| s.set(s.get() + *v))
            .errback(move |_| f.set(true));

        deferred.resolve(5).unwrap();
        assert_eq!(seen.get(), 5);
        assert!(!failed.get());

        assert!(matches!(
            deferred.resolve(7),
            Err(Error::Unexpected(UnexpectedState::AlreadyResolved))
        ));
        assert!(matches!(
            deferred.reject(Error::Closed),
            Err(Error::Unexpected(UnexpectedState::AlreadyResolved))
        ));
        assert_eq!(seen.get(), 5);
    }

    #[test]
    fn late_observer_runs_immediately() {
        let deferred: Deferred<()> = Deferred::new();
        deferred.reject(Error::Disconnect).unwrap();

        let hit = Rc::new(Cell::new(false));
        let h = Rc::clone(&hit);
        deferred.errback(move |e| h.set(matches!(e, Error::Disconnect)));
        assert!(hit.get());
        assert!(matches!(
            deferred.outcome().as_deref(),
            Some(Err(Error::Disconnect))
        ));
    }

    #[test]
    fn observer_may_attach_from_callback() {
        let deferred = Deferred::new();
        let hit = Rc::new(Cell::new(false));

        let inner = deferred.clone();
        let h = Rc::clone(&hit);
        deferred.callback(move |_: &u8| {
            inner.callback(move |_| h.set(true));
        });
        deferred.resolve(1).unwrap();
        assert!(hit.get());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn await_outcome() {
        let deferred = Deferred::new();
        let settle = deferred.clone();
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async move {
                tokio::task::spawn_local(async move {
                    settle.resolve("done".to_string()).unwrap();
                });
                assert_eq!(deferred.await.unwrap(), "done");
            })
            .await;
    }
}
