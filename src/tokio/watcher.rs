//! Readiness for the driver's socket, from tokio's reactor.

use std::cell::Cell;
use std::os::fd::OwnedFd;
use std::rc::{Rc, Weak};

use tokio::io::unix::AsyncFd;
use tokio::sync::Notify;
use tracing::debug;

use crate::watcher::{Event, Watcher};

use super::conn::{SharedDriver, dispatch};

/// Interest shared between the driver and its watch task.
#[derive(Default)]
pub(crate) struct Interest {
    readable: Cell<bool>,
    writable: Cell<bool>,
    detached: Cell<bool>,
    changed: Notify,
}

/// [`Watcher`] backed by a task on the current [`LocalSet`](tokio::task::LocalSet).
///
/// The driver only flips flags here. The task spawned by [`watch`] waits on
/// whichever readiness is wanted and feeds it back to the driver.
pub struct FdWatcher {
    interest: Rc<Interest>,
}

impl FdWatcher {
    pub(crate) fn new() -> (Self, Rc<Interest>) {
        let interest = Rc::new(Interest::default());
        (
            Self {
                interest: Rc::clone(&interest),
            },
            interest,
        )
    }
}

impl Watcher for FdWatcher {
    fn set_notify_readable(&mut self, enabled: bool) {
        if self.interest.readable.replace(enabled) != enabled {
            self.interest.changed.notify_one();
        }
    }

    fn set_notify_writable(&mut self, enabled: bool) {
        if self.interest.writable.replace(enabled) != enabled {
            self.interest.changed.notify_one();
        }
    }

    fn detach(&mut self) {
        self.interest.detached.set(true);
        self.interest.changed.notify_one();
    }
}

/// Deliver readiness on `fd` to the driver until it detaches or is dropped.
///
/// Readiness is cleared before the driver runs. The protocol client always
/// reads and writes until the socket would block, so no edge is lost.
pub(crate) async fn watch(fd: AsyncFd<OwnedFd>, interest: Rc<Interest>, driver: Weak<SharedDriver>) {
    loop {
        if interest.detached.get() {
            break;
        }

        let ready = tokio::select! {
            () = interest.changed.notified() => None,
            guard = fd.readable(), if interest.readable.get() => {
                Some(guard.map(|mut guard| {
                    guard.clear_ready();
                    Event::Readable
                }))
            }
            guard = fd.writable(), if interest.writable.get() => {
                Some(guard.map(|mut guard| {
                    guard.clear_ready();
                    Event::Writable
                }))
            }
        };

        let Some(ready) = ready else {
            continue;
        };
        let Some(driver) = driver.upgrade() else {
            break;
        };
        match ready {
            Ok(event) => dispatch(&driver, event),
            Err(err) => {
                let settlements = {
                    let mut driver = driver.borrow_mut();
                    driver.unbind(err);
                    driver.take_settlements()
                };
                settlements.run();
            }
        }
    }
    debug!("socket watch finished");
}
