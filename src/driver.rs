//! The connection state machine.
//!
//! [`ConnectionDriver`] sits between a reactor ([`Watcher`]) and a
//! non-blocking protocol client ([`ProtocolClient`]). The reactor calls
//! [`handle`](ConnectionDriver::handle) on every readiness event; the driver
//! advances the handshake, runs one query at a time and queues the rest.
//!
//! The driver never settles a [`Deferred`] itself. Each operation records
//! [`Settlement`]s, which the owner runs with
//! [`take_settlements`](ConnectionDriver::take_settlements) once it no longer
//! holds the driver. Callbacks are then free to submit more work on the same
//! connection.

use std::fmt;

use tracing::{debug, error, info, trace};

use crate::client::{ConnStatus, PollingStatus, ProtocolClient};
use crate::error::{ClientError, ClientResult, Error, Result, UnexpectedState};
use crate::future::Deferred;
use crate::logger::Logger;
use crate::query::{Operation, Query};
use crate::queue::QueryQueue;
use crate::result::QueryResult;
use crate::watcher::{Event, Watcher};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Handshake in progress.
    Connecting,
    /// Ready; no query in flight.
    Connected,
    /// One query in flight.
    Waiting,
    /// The handshake failed. Terminal.
    ConnectionRefused,
    /// The connection was lost. Terminal.
    Disconnected,
    /// Closed by the owner. Terminal.
    Closed,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            State::ConnectionRefused | State::Disconnected | State::Closed
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Connecting => "connecting",
            State::Connected => "connected",
            State::Waiting => "waiting",
            State::ConnectionRefused => "connection_refused",
            State::Disconnected => "disconnected",
            State::Closed => "closed",
        })
    }
}

/// Construction-time settings.
#[derive(Default)]
pub struct DriverConfig {
    pub logger: Logger,
    /// Run once when the connection is lost.
    pub on_disconnect: Option<Box<dyn FnOnce()>>,
}

/// A recorded outcome, applied after the driver is released.
pub enum Settlement {
    Connection(Deferred<()>, Result<()>),
    Query(Deferred<QueryResult>, Result<QueryResult>),
    Disconnected(Box<dyn FnOnce()>),
}

/// Outcomes produced by one driver operation.
#[must_use = "settlements must be run for callers to see their results"]
pub struct Settlements {
    items: Vec<Settlement>,
    logger: Logger,
}

impl Settlements {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Settle deferreds and run hooks, in the order they were recorded.
    pub fn run(self) {
        let Settlements { items, logger } = self;
        for item in items {
            let settled = match item {
                Settlement::Connection(deferred, Ok(())) => deferred.resolve(()),
                Settlement::Connection(deferred, Err(err)) => deferred.reject(err),
                Settlement::Query(deferred, Ok(result)) => deferred.resolve(result),
                Settlement::Query(deferred, Err(err)) => deferred.reject(err),
                Settlement::Disconnected(hook) => {
                    hook();
                    Ok(())
                }
            };
            if let Err(err) = settled {
                logger.in_scope(|| error!(error = %err, "could not settle"));
            }
        }
    }
}

/// Drives one PostgreSQL connection from inside a reactor.
pub struct ConnectionDriver<C, W> {
    client: C,
    watcher: W,
    state: State,
    current: Option<Query>,
    queue: QueryQueue,
    connection: Deferred<()>,
    on_disconnect: Option<Box<dyn FnOnce()>>,
    logger: Logger,
    settlements: Vec<Settlement>,
}

impl<C: ProtocolClient, W: Watcher> ConnectionDriver<C, W> {
    /// Take over a client whose connect has been started and poll the
    /// handshake once.
    ///
    /// The watcher starts with readable interest. A handshake that fails
    /// right away leaves the driver in [`State::ConnectionRefused`] with the
    /// connection deferred rejected.
    pub fn new(client: C, mut watcher: W, config: DriverConfig) -> Self {
        watcher.set_notify_readable(true);
        let mut driver = Self {
            client,
            watcher,
            state: State::Connecting,
            current: None,
            queue: QueryQueue::new(),
            connection: Deferred::new(),
            on_disconnect: config.on_disconnect,
            logger: config.logger,
            settlements: Vec::new(),
        };

        let logger = driver.logger.clone();
        logger.in_scope(|| {
            if let Err(err) = driver.check_connect() {
                error!(error = %err, "handshake failed");
            }
        });
        driver
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Settles when the handshake completes or fails.
    pub fn connection(&self) -> Deferred<()> {
        self.connection.clone()
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Number of queries waiting behind the one in flight.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Outcomes recorded since the last call.
    pub fn take_settlements(&mut self) -> Settlements {
        Settlements {
            items: std::mem::take(&mut self.settlements),
            logger: self.logger.clone(),
        }
    }

    /// React to socket readiness.
    ///
    /// An `Err` is an internal inconsistency; the caller should log it and
    /// [`unbind`](Self::unbind).
    pub fn handle(&mut self, event: Event) -> Result<()> {
        let logger = self.logger.clone();
        logger.in_scope(|| {
            trace!(%event, state = %self.state, "socket event");
            match (self.state, event) {
                (State::Connecting, Event::Readable) => self.check_connect(),
                (State::Connecting, Event::Writable) => {
                    self.watcher.set_notify_writable(false);
                    self.check_connect()
                }
                (State::Waiting, Event::Readable) => {
                    self.read_result();
                    Ok(())
                }
                (State::Waiting, Event::Writable) => {
                    self.watcher.set_notify_writable(false);
                    self.flush_request();
                    Ok(())
                }
                (State::Connected, Event::Readable) => self.read_unsolicited(),
                (state, event) => Err(UnexpectedState::UnexpectedEvent { state, event }.into()),
            }
        })
    }

    /// Submit an operation.
    ///
    /// Runs now if the connection is idle, queues if a query is in flight,
    /// and is rejected with [`Error::BadState`] otherwise.
    pub fn submit(&mut self, operation: Operation) -> Deferred<QueryResult> {
        let query = Query::new(operation);
        let deferred = query.deferred.clone();

        let logger = self.logger.clone();
        logger.in_scope(|| match self.state {
            State::Connected => self.start(query),
            State::Waiting => self.queue.enqueue(query),
            state => self.settle_query(query.deferred, Err(Error::BadState { state })),
        });
        deferred
    }

    pub fn send_query(&mut self, sql: impl Into<String>) -> Deferred<QueryResult> {
        self.submit(Operation::Query { sql: sql.into() })
    }

    pub fn send_query_prepared(
        &mut self,
        name: impl Into<String>,
        params: Vec<Option<String>>,
    ) -> Deferred<QueryResult> {
        self.submit(Operation::QueryPrepared {
            name: name.into(),
            params,
        })
    }

    pub fn send_describe_prepared(&mut self, name: impl Into<String>) -> Deferred<QueryResult> {
        self.submit(Operation::DescribePrepared { name: name.into() })
    }

    pub fn send_describe_portal(&mut self, name: impl Into<String>) -> Deferred<QueryResult> {
        self.submit(Operation::DescribePortal { name: name.into() })
    }

    /// The connection was torn down underneath us.
    ///
    /// Fails the in-flight query and every queued one with
    /// [`Error::Disconnect`] and runs the disconnect hook. Does nothing once
    /// the driver is in a terminal state.
    pub fn unbind(&mut self, reason: impl fmt::Display) {
        if self.state.is_terminal() {
            return;
        }
        let logger = self.logger.clone();
        logger.in_scope(|| {
            error!(%reason, "disconnected");
            let previous = self.state;
            self.state = State::Disconnected;
            self.watcher.detach();
            if let Some(hook) = self.on_disconnect.take() {
                self.settlements.push(Settlement::Disconnected(hook));
            }
            if previous == State::Connecting {
                self.settle_connection(Err(Error::Disconnect));
            }
            self.fail_all(&Error::Disconnect);
        });
    }

    /// Shut the connection down.
    ///
    /// Fails the in-flight query and every queued one with [`Error::Closed`].
    /// In a terminal state this only releases the client.
    pub fn close(&mut self) {
        if self.state.is_terminal() {
            self.client.finish();
            return;
        }
        let logger = self.logger.clone();
        logger.in_scope(|| {
            info!(state = %self.state, "closing connection");
            let previous = self.state;
            self.state = State::Closed;
            self.watcher.detach();
            self.client.finish();
            if previous == State::Connecting {
                self.settle_connection(Err(Error::Closed));
            }
            self.fail_all(&Error::Closed);
        });
    }

    fn check_connect(&mut self) -> Result<()> {
        match self.client.connect_poll() {
            PollingStatus::Ok => match self.client.status() {
                ConnStatus::Ok => {
                    self.watcher.set_notify_writable(false);
                    self.state = State::Connected;
                    info!("connected");
                    self.settle_connection(Ok(()));
                    Ok(())
                }
                ConnStatus::Bad => {
                    let message = self.client.error_message();
                    self.refuse(message);
                    Ok(())
                }
                status => self.abort_handshake(UnexpectedState::BadConnectionStatus(status)),
            },
            PollingStatus::Reading => {
                self.watcher.set_notify_writable(false);
                Ok(())
            }
            PollingStatus::Writing => {
                self.watcher.set_notify_writable(true);
                Ok(())
            }
            PollingStatus::Failed => {
                let message = self.client.error_message();
                self.refuse(message);
                Ok(())
            }
            status @ PollingStatus::Active => {
                self.abort_handshake(UnexpectedState::BadPollStatus(status))
            }
        }
    }

    fn abort_handshake(&mut self, unexpected: UnexpectedState) -> Result<()> {
        self.refuse(unexpected.to_string());
        Err(unexpected.into())
    }

    fn refuse(&mut self, message: String) {
        error!(%message, "connection refused");
        self.state = State::ConnectionRefused;
        self.watcher.set_notify_writable(false);
        self.watcher.detach();
        self.settle_connection(Err(Error::ConnectionRefused { message }));
    }

    /// Send `query`, and keep going down the queue while sends fail.
    fn start(&mut self, query: Query) {
        let mut next = Some(query);
        while let Some(query) = next.take() {
            debug!(operation = query.operation.name(), "starting query");
            let sent = query
                .operation
                .send(&mut self.client)
                .and_then(|()| self.client.flush());

            match sent {
                Ok(flushed) => {
                    if !flushed {
                        self.watcher.set_notify_writable(true);
                    }
                    self.current = Some(query);
                    self.state = State::Waiting;
                }
                Err(err) => {
                    self.state = State::Connected;
                    if self.finish_query(query, Err(err)) {
                        next = self.queue.dequeue_next();
                    }
                }
            }
        }
    }

    /// Settle a finished query. Returns false if the connection broke and
    /// the driver has been unbound.
    fn finish_query(&mut self, query: Query, outcome: ClientResult<QueryResult>) -> bool {
        let broken = match &outcome {
            Err(err) if err.is_connection_broken() => Some(err.to_string()),
            _ => None,
        };
        self.settle_query(query.deferred, outcome.map_err(Error::Query));
        match broken {
            Some(reason) => {
                self.unbind(reason);
                false
            }
            None => true,
        }
    }

    /// The in-flight query is done: settle it and start the next one.
    fn complete(&mut self, outcome: ClientResult<QueryResult>) {
        self.state = State::Connected;
        let Some(query) = self.current.take() else {
            return;
        };
        if self.finish_query(query, outcome) {
            if let Some(next) = self.queue.dequeue_next() {
                self.start(next);
            }
        }
    }

    /// `None` while the client is still busy.
    fn poll_result(&mut self) -> Option<ClientResult<Option<QueryResult>>> {
        if let Err(err) = self.client.consume_input() {
            return Some(Err(err));
        }
        if self.client.is_busy() {
            return None;
        }
        Some(self.client.get_last_result())
    }

    fn read_result(&mut self) {
        match self.poll_result() {
            None => {}
            Some(Ok(Some(result))) => self.complete(Ok(result)),
            Some(Ok(None)) => self.complete(Err(ClientError::Protocol(
                "no result for the query in flight".into(),
            ))),
            Some(Err(err)) => self.complete(Err(err)),
        }
    }

    fn read_unsolicited(&mut self) -> Result<()> {
        match self.poll_result() {
            None | Some(Ok(None)) => Ok(()),
            Some(Err(err)) => {
                self.unbind(err);
                Ok(())
            }
            Some(Ok(Some(_))) => Err(UnexpectedState::UnexpectedResult { state: self.state }.into()),
        }
    }

    fn flush_request(&mut self) {
        match self.client.flush() {
            Ok(true) => {}
            Ok(false) => self.watcher.set_notify_writable(true),
            Err(err) => self.complete(Err(err)),
        }
    }

    fn fail_all(&mut self, error: &Error) {
        let pending: Vec<Query> = self.current.take().into_iter().chain(self.queue.drain()).collect();
        for query in pending {
            self.settle_query(query.deferred, Err(error.clone()));
        }
    }

    fn settle_connection(&mut self, outcome: Result<()>) {
        self.settlements
            .push(Settlement::Connection(self.connection.clone(), outcome));
    }

    fn settle_query(&mut self, deferred: Deferred<QueryResult>, outcome: Result<QueryResult>) {
        self.settlements.push(Settlement::Query(deferred, outcome));
    }
}
