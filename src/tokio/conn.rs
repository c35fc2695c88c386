//! PostgreSQL connection on a tokio [`LocalSet`](tokio::task::LocalSet).

use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use tokio::io::Interest as Readiness;
use tokio::io::unix::AsyncFd;
use tracing::{error, info_span};

use crate::client::{PgConnection, ProtocolClient};
use crate::driver::{ConnectionDriver, DriverConfig, State};
use crate::error::{Error, Result};
use crate::future::Deferred;
use crate::logger::Logger;
use crate::opts::Opts;
use crate::protocol::types::{Oid, TransactionStatus};
use crate::query::Operation;
use crate::result::QueryResult;
use crate::watcher::Event;

use super::watcher::{FdWatcher, watch};

pub(crate) type Driver = ConnectionDriver<PgConnection, FdWatcher>;

/// The driver as shared by [`Conn`] handles and the watch task.
///
/// Closed when the last strong reference goes, whichever side holds it.
pub(crate) struct SharedDriver(RefCell<Driver>);

impl Deref for SharedDriver {
    type Target = RefCell<Driver>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for SharedDriver {
    fn drop(&mut self) {
        let driver = self.0.get_mut();
        driver.close();
        driver.take_settlements().run();
    }
}

/// Run one event through the driver, then settle what it produced.
///
/// The driver is released before any callback runs.
pub(crate) fn dispatch(driver: &RefCell<Driver>, event: Event) {
    let settlements = {
        let mut driver = driver.borrow_mut();
        if let Err(err) = driver.handle(event) {
            driver
                .logger()
                .in_scope(|| error!(error = %err, %event, "event handling failed"));
            driver.unbind(err);
        }
        driver.take_settlements()
    };
    settlements.run();
}

/// Options for [`Conn`] beyond the connection target.
#[derive(Default)]
pub struct ConnBuilder {
    config: DriverConfig,
}

impl ConnBuilder {
    /// Send this connection's log events to `logger`.
    pub fn logger(mut self, logger: Logger) -> Self {
        self.config.logger = logger;
        self
    }

    /// Run `hook` once if the connection is lost. Not run on [`Conn::close`].
    pub fn on_disconnect(mut self, hook: impl FnOnce() + 'static) -> Self {
        self.config.on_disconnect = Some(Box::new(hook));
        self
    }

    /// Start connecting.
    ///
    /// Returns as soon as the socket connect is under way; the handshake
    /// outcome arrives through [`Conn::connection`]. Must be called from
    /// inside a [`LocalSet`](tokio::task::LocalSet).
    pub fn connect<O: TryInto<Opts>>(self, opts: O) -> Result<Conn>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;
        let mut config = self.config;
        let target = opts.target();
        let user = opts.user.clone();
        config.logger = config
            .logger
            .with_span(|| info_span!("postgres", %target, %user));

        let client = PgConnection::connect_start(opts);
        let (watcher, interest) = FdWatcher::new();
        let mut driver = ConnectionDriver::new(client, watcher, config);
        let settlements = driver.take_settlements();

        let fd = match (driver.state().is_terminal(), driver.client().socket()) {
            (false, Some(socket)) => Some(socket.try_clone_to_owned()?),
            _ => None,
        };
        let driver = Rc::new(SharedDriver(RefCell::new(driver)));

        if let Some(fd) = fd {
            let fd = AsyncFd::with_interest(fd, Readiness::READABLE | Readiness::WRITABLE)?;
            tokio::task::spawn_local(watch(fd, interest, Rc::downgrade(&driver)));
        }
        settlements.run();

        Ok(Conn { driver })
    }
}

/// A PostgreSQL connection driven by the tokio reactor.
///
/// Every operation returns at once with a [`Deferred`]. Queries run one at a
/// time in submission order. Clones share the connection; it is closed when
/// the last clone is dropped.
#[derive(Clone)]
pub struct Conn {
    driver: Rc<SharedDriver>,
}

impl Conn {
    /// Start connecting with default settings.
    ///
    /// See [`ConnBuilder::connect`].
    pub fn connect<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        Self::builder().connect(opts)
    }

    pub fn builder() -> ConnBuilder {
        ConnBuilder::default()
    }

    /// Settles when the handshake completes or fails.
    pub fn connection(&self) -> Deferred<()> {
        self.driver.borrow().connection()
    }

    pub fn state(&self) -> State {
        self.driver.borrow().state()
    }

    /// Submit an operation.
    pub fn submit(&self, operation: Operation) -> Deferred<QueryResult> {
        self.with_driver(|driver| driver.submit(operation))
    }

    /// Run one or more statements with the simple query protocol.
    ///
    /// The result is that of the last statement.
    pub fn send_query(&self, sql: impl Into<String>) -> Deferred<QueryResult> {
        self.submit(Operation::Query { sql: sql.into() })
    }

    /// Run one statement with text parameters.
    pub fn send_query_params(
        &self,
        sql: impl Into<String>,
        params: Vec<Option<String>>,
    ) -> Deferred<QueryResult> {
        self.submit(Operation::QueryParams {
            sql: sql.into(),
            params,
        })
    }

    /// Create a named prepared statement.
    pub fn send_prepare(
        &self,
        name: impl Into<String>,
        sql: impl Into<String>,
        param_types: Vec<Oid>,
    ) -> Deferred<QueryResult> {
        self.submit(Operation::Prepare {
            name: name.into(),
            sql: sql.into(),
            param_types,
        })
    }

    pub fn send_query_prepared(
        &self,
        name: impl Into<String>,
        params: Vec<Option<String>>,
    ) -> Deferred<QueryResult> {
        self.submit(Operation::QueryPrepared {
            name: name.into(),
            params,
        })
    }

    pub fn send_describe_prepared(&self, name: impl Into<String>) -> Deferred<QueryResult> {
        self.submit(Operation::DescribePrepared { name: name.into() })
    }

    pub fn send_describe_portal(&self, name: impl Into<String>) -> Deferred<QueryResult> {
        self.submit(Operation::DescribePortal { name: name.into() })
    }

    /// Treat the connection as lost. See [`ConnectionDriver::unbind`].
    pub fn unbind(&self, reason: impl fmt::Display) {
        self.with_driver(|driver| driver.unbind(reason));
    }

    /// Close the connection. See [`ConnectionDriver::close`].
    pub fn close(&self) {
        self.with_driver(ConnectionDriver::close);
    }

    /// Server parameters reported during startup and since.
    pub fn server_params(&self) -> Vec<(String, String)> {
        self.driver.borrow().client().server_params().to_vec()
    }

    pub fn server_param(&self, name: &str) -> Option<String> {
        self.driver
            .borrow()
            .client()
            .server_param(name)
            .map(str::to_string)
    }

    /// Process id of the server backend.
    pub fn backend_pid(&self) -> Option<u32> {
        self.driver.borrow().client().backend_pid()
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.driver.borrow().client().transaction_status()
    }

    fn with_driver<R>(&self, f: impl FnOnce(&mut Driver) -> R) -> R {
        let (value, settlements) = {
            let mut driver = self.driver.borrow_mut();
            let value = f(&mut driver);
            (value, driver.take_settlements())
        };
        settlements.run();
        value
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let driver = self.driver.borrow();
        f.debug_struct("Conn")
            .field("state", &driver.state())
            .field("queued", &driver.queued())
            .finish()
    }
}
