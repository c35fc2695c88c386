//! Non-blocking PostgreSQL connection.

use std::io;
use std::os::fd::{AsFd, BorrowedFd};

use crate::buffer_set::BufferSet;
use crate::error::{ClientError, ClientResult};
use crate::opts::Opts;
use crate::protocol::backend::{ErrorResponse, RawMessage, msg_type};
use crate::protocol::frontend::{
    write_bind, write_describe_portal, write_describe_statement, write_execute, write_parse,
    write_query, write_sync, write_terminate,
};
use crate::protocol::types::{Oid, TransactionStatus};
use crate::result::QueryResult;
use crate::state::{Action, AsyncMessage, ResponseStateMachine, StartupState, StartupStateMachine};

use super::stream::Stream;
use super::{ConnStatus, PollingStatus, ProtocolClient};

enum Phase {
    /// Socket connect in progress.
    Connecting,
    Startup(StartupStateMachine),
    Idle,
    Busy(ResponseStateMachine),
    /// Failed; `error_message` says why.
    Bad,
    Closed,
}

/// What the server told us about the session.
#[derive(Default)]
struct Session {
    params: Vec<(String, String)>,
    backend_key: Option<(u32, u32)>,
    transaction_status: TransactionStatus,
}

impl Session {
    fn apply(&mut self, message: AsyncMessage) {
        match message {
            AsyncMessage::ParameterChanged { name, value } => {
                tracing::debug!(%name, %value, "server parameter");
                match self.params.iter_mut().find(|(n, _)| *n == name) {
                    Some(entry) => entry.1 = value,
                    None => self.params.push((name, value)),
                }
            }
            AsyncMessage::Notice(fields) => {
                tracing::debug!(notice = %fields, "server notice");
            }
            AsyncMessage::Notification {
                pid,
                channel,
                payload,
            } => {
                tracing::debug!(pid, %channel, %payload, "ignoring notification");
            }
        }
    }
}

/// A PostgreSQL connection driven one non-blocking step at a time.
///
/// Created with [`connect_start`](Self::connect_start), then advanced with
/// [`ProtocolClient::connect_poll`] whenever the socket is ready in the
/// direction the previous poll asked for.
pub struct PgConnection {
    opts: Opts,
    stream: Option<Stream>,
    buffers: BufferSet,
    phase: Phase,
    ready: Option<ClientResult<QueryResult>>,
    session: Session,
    error_message: String,
}

impl PgConnection {
    /// Start connecting. Never blocks on the socket and never fails: a
    /// connect error is reported by the first `connect_poll`.
    pub fn connect_start(opts: Opts) -> Self {
        let connected = Stream::connect(&opts);
        let mut conn = Self {
            opts,
            stream: None,
            buffers: BufferSet::new(),
            phase: Phase::Connecting,
            ready: None,
            session: Session::default(),
            error_message: String::new(),
        };

        match connected {
            Ok((stream, done)) => {
                conn.stream = Some(stream);
                if done {
                    conn.begin_startup();
                }
            }
            Err(e) => {
                let message = format!("could not connect to {}: {e}", conn.opts.target());
                conn.fail(message);
            }
        }
        conn
    }

    /// Server parameters reported so far (`server_version`, `TimeZone`, ...).
    pub fn server_params(&self) -> &[(String, String)] {
        &self.session.params
    }

    pub fn server_param(&self, name: &str) -> Option<&str> {
        self.session
            .params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Process id of the server backend.
    pub fn backend_pid(&self) -> Option<u32> {
        self.session.backend_key.map(|(pid, _)| pid)
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.session.transaction_status
    }

    fn begin_startup(&mut self) {
        let mut startup = StartupStateMachine::new(self.opts.clone());
        startup.start(&mut self.buffers.write_buffer);
        self.phase = Phase::Startup(startup);
    }

    fn fail(&mut self, message: String) {
        self.error_message = message;
        self.phase = Phase::Bad;
    }

    fn fail_with(&mut self, err: &ClientError) {
        let message = match err {
            ClientError::Server(fields) => fields.to_string(),
            other => other.to_string(),
        };
        self.fail(message);
    }

    /// Read until the socket would block. `Ok(true)` on end of stream.
    fn fill(&mut self) -> ClientResult<bool> {
        let stream = self.stream.as_mut().ok_or(ClientError::ConnectionClosed)?;
        let mut chunk = [0u8; 8192];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => return Ok(true),
                Ok(n) => self.buffers.extend_read(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Write until done or the socket would block. `Ok(true)` when done.
    fn write_pending(&mut self) -> ClientResult<bool> {
        while self.buffers.has_unwritten() {
            let stream = self.stream.as_mut().ok_or(ClientError::ConnectionClosed)?;
            match stream.write(self.buffers.unwritten()) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => self.buffers.advance_write(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    fn poll_handshake(&mut self) -> ClientResult<PollingStatus> {
        loop {
            match self.phase {
                Phase::Connecting => {
                    let stream = self.stream.as_ref().ok_or(ClientError::ConnectionClosed)?;
                    if !stream.finish_connect()? {
                        return Ok(PollingStatus::Writing);
                    }
                    self.begin_startup();
                }
                Phase::Startup(_) => {
                    if !self.write_pending()? {
                        return Ok(PollingStatus::Writing);
                    }
                    let eof = self.fill()?;
                    if self.process_startup()? {
                        self.phase = Phase::Idle;
                        return Ok(PollingStatus::Ok);
                    }
                    if eof {
                        return Err(ClientError::ConnectionClosed);
                    }
                    if !self.buffers.has_unwritten() {
                        return Ok(PollingStatus::Reading);
                    }
                }
                Phase::Idle | Phase::Busy(_) => return Ok(PollingStatus::Ok),
                Phase::Bad | Phase::Closed => return Ok(PollingStatus::Failed),
            }
        }
    }

    /// Feed buffered messages to the startup machine. `Ok(true)` once the
    /// server is ready for queries.
    fn process_startup(&mut self) -> ClientResult<bool> {
        let Phase::Startup(startup) = &mut self.phase else {
            return Ok(false);
        };

        while let Some((type_byte, range, len)) = self.buffers.next_message()? {
            let (payload, out) = self.buffers.payload_and_writer(range);
            let action = startup.step(RawMessage::new(type_byte, payload), out)?;
            self.buffers.consume(len);

            match action {
                Action::Async(message) => self.session.apply(message),
                Action::Finished => {
                    self.session.backend_key = startup.backend_key();
                    self.session.transaction_status = startup.transaction_status();
                    return Ok(true);
                }
                Action::Write | Action::ReadMessage => {}
            }
        }
        Ok(false)
    }

    /// Feed buffered messages to the in-flight request, if any.
    fn process_messages(&mut self) -> ClientResult<()> {
        while let Some((type_byte, range, len)) = self.buffers.next_message()? {
            let msg = RawMessage::new(type_byte, self.buffers.payload(range));
            let action = match &mut self.phase {
                Phase::Busy(response) => response.step(msg)?,
                _ => idle_message(msg)?,
            };
            self.buffers.consume(len);

            match action {
                Action::Async(message) => self.session.apply(message),
                Action::Finished => {
                    if let Phase::Busy(response) = std::mem::replace(&mut self.phase, Phase::Idle) {
                        if let Some(status) = response.transaction_status() {
                            self.session.transaction_status = status;
                        }
                        self.ready = Some(response.finish());
                    }
                }
                Action::Write | Action::ReadMessage => {}
            }
        }
        Ok(())
    }

    fn read_input(&mut self) -> ClientResult<()> {
        let eof = self.fill()?;
        self.process_messages()?;
        if eof {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(())
    }

    fn check_established(&self) -> ClientResult<()> {
        match self.phase {
            Phase::Idle | Phase::Busy(_) => Ok(()),
            Phase::Bad | Phase::Closed => Err(ClientError::ConnectionClosed),
            Phase::Connecting | Phase::Startup(_) => Err(ClientError::InvalidUsage(
                "connection is not established".into(),
            )),
        }
    }

    /// Queue one request and start sending it.
    fn send_request(&mut self, write: impl FnOnce(&mut Vec<u8>)) -> ClientResult<()> {
        self.check_established()?;
        if self.is_busy() {
            return Err(ClientError::InvalidUsage(
                "another command is already in progress".into(),
            ));
        }

        self.ready = None;
        write(&mut self.buffers.write_buffer);
        self.phase = Phase::Busy(ResponseStateMachine::new());
        self.write_pending().map(|_| ()).inspect_err(|e| self.fail_with(e))
    }
}

/// A message arriving while no request is in flight.
fn idle_message(msg: RawMessage<'_>) -> ClientResult<Action> {
    if let Some(message) = AsyncMessage::parse(&msg)? {
        return Ok(Action::Async(message));
    }
    match msg.type_byte {
        // Typically FATAL before the server drops the connection.
        msg_type::ERROR_RESPONSE => Err(ErrorResponse::parse(msg.payload)?.into_error()),
        other => Err(ClientError::Protocol(format!(
            "unexpected message '{}' while idle",
            other as char
        ))),
    }
}

impl ProtocolClient for PgConnection {
    fn connect_poll(&mut self) -> PollingStatus {
        self.poll_handshake().unwrap_or_else(|e| {
            self.fail_with(&e);
            PollingStatus::Failed
        })
    }

    fn status(&self) -> ConnStatus {
        match &self.phase {
            Phase::Connecting => ConnStatus::Started,
            Phase::Startup(startup) => match startup.state() {
                StartupState::Initial => ConnStatus::Made,
                StartupState::WaitingAuth
                | StartupState::SaslInProgress
                | StartupState::WaitingAuthResult => ConnStatus::AwaitingResponse,
                StartupState::WaitingReady => ConnStatus::AuthOk,
                StartupState::Ready => ConnStatus::Ok,
                StartupState::Failed => ConnStatus::Bad,
            },
            Phase::Idle | Phase::Busy(_) => ConnStatus::Ok,
            Phase::Bad | Phase::Closed => ConnStatus::Bad,
        }
    }

    fn error_message(&self) -> String {
        self.error_message.clone()
    }

    fn consume_input(&mut self) -> ClientResult<()> {
        self.check_established()?;
        self.read_input().inspect_err(|e| self.fail_with(e))
    }

    fn is_busy(&self) -> bool {
        matches!(self.phase, Phase::Busy(_))
    }

    fn get_last_result(&mut self) -> ClientResult<Option<QueryResult>> {
        self.ready.take().transpose()
    }

    fn send_query(&mut self, sql: &str) -> ClientResult<()> {
        self.send_request(|buf| write_query(buf, sql))
    }

    fn send_query_params(&mut self, sql: &str, params: &[Option<String>]) -> ClientResult<()> {
        self.send_request(|buf| {
            write_parse(buf, "", sql, &[]);
            write_bind(buf, "", "", params);
            write_describe_portal(buf, "");
            write_execute(buf, "", 0);
            write_sync(buf);
        })
    }

    fn send_prepare(&mut self, name: &str, sql: &str, param_types: &[Oid]) -> ClientResult<()> {
        self.send_request(|buf| {
            write_parse(buf, name, sql, param_types);
            write_sync(buf);
        })
    }

    fn send_query_prepared(&mut self, name: &str, params: &[Option<String>]) -> ClientResult<()> {
        self.send_request(|buf| {
            write_bind(buf, "", name, params);
            write_describe_portal(buf, "");
            write_execute(buf, "", 0);
            write_sync(buf);
        })
    }

    fn send_describe_prepared(&mut self, name: &str) -> ClientResult<()> {
        self.send_request(|buf| {
            write_describe_statement(buf, name);
            write_sync(buf);
        })
    }

    fn send_describe_portal(&mut self, name: &str) -> ClientResult<()> {
        self.send_request(|buf| {
            write_describe_portal(buf, name);
            write_sync(buf);
        })
    }

    fn flush(&mut self) -> ClientResult<bool> {
        if matches!(self.phase, Phase::Bad | Phase::Closed) {
            return Err(ClientError::ConnectionClosed);
        }
        self.write_pending().inspect_err(|e| self.fail_with(e))
    }

    fn finish(&mut self) {
        if matches!(self.phase, Phase::Idle | Phase::Busy(_)) {
            write_terminate(&mut self.buffers.write_buffer);
            // Best effort: the server treats a dropped socket the same way.
            let _ = self.write_pending();
        }
        if let Some(stream) = self.stream.take() {
            stream.shutdown();
        }
        self.buffers.clear();
        self.ready = None;
        self.phase = Phase::Closed;
    }

    fn socket(&self) -> Option<BorrowedFd<'_>> {
        self.stream.as_ref().map(AsFd::as_fd)
    }
}

#[cfg(test)]
impl PgConnection {
    /// Wrap one end of a connected socket pair, skipping the socket connect.
    fn from_connected(socket: socket2::Socket, opts: Opts) -> Self {
        let mut conn = Self {
            opts,
            stream: Some(Stream::Unix(socket)),
            buffers: BufferSet::new(),
            phase: Phase::Connecting,
            ready: None,
            session: Session::default(),
            error_message: String::new(),
        };
        conn.begin_startup();
        conn
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    use super::*;

    fn message(type_byte: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![type_byte];
        out.extend_from_slice(&(payload.len() as i32 + 4).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn pair() -> (PgConnection, UnixStream) {
        let (client, server) = UnixStream::pair().unwrap();
        client.set_nonblocking(true).unwrap();
        let opts = Opts {
            user: "postgres".into(),
            ..Opts::default()
        };
        (
            PgConnection::from_connected(socket2::Socket::from(client), opts),
            server,
        )
    }

    fn drain(server: &mut UnixStream) -> Vec<u8> {
        server.set_nonblocking(true).unwrap();
        let mut out = Vec::new();
        let mut chunk = [0u8; 4096];
        while let Ok(n) = server.read(&mut chunk) {
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        out
    }

    fn handshake(conn: &mut PgConnection, server: &mut UnixStream) {
        assert_eq!(conn.connect_poll(), PollingStatus::Reading);
        assert_eq!(conn.status(), ConnStatus::AwaitingResponse);
        let startup = drain(server);
        assert!(startup.windows(9).any(|w| w == &b"postgres\0"[..]));

        let mut reply = message(b'R', &0_i32.to_be_bytes());
        reply.extend(message(b'S', b"server_version\x0016.3\0"));
        reply.extend(message(b'K', &[0, 0, 0, 99, 0, 0, 0, 1]));
        reply.extend(message(b'Z', b"I"));
        server.write_all(&reply).unwrap();

        assert_eq!(conn.connect_poll(), PollingStatus::Ok);
        assert_eq!(conn.status(), ConnStatus::Ok);
    }

    #[test]
    fn handshake_then_query() {
        let (mut conn, mut server) = pair();
        handshake(&mut conn, &mut server);
        assert_eq!(conn.server_param("server_version"), Some("16.3"));
        assert_eq!(conn.backend_pid(), Some(99));

        conn.send_query("select 1").unwrap();
        assert!(conn.is_busy());
        assert_eq!(drain(&mut server), message(b'Q', b"select 1\0"));

        let mut desc = 1_u16.to_be_bytes().to_vec();
        desc.extend_from_slice(b"?column?\0");
        desc.extend_from_slice(&[0; 6]);
        desc.extend_from_slice(&23_u32.to_be_bytes());
        desc.extend_from_slice(&4_i16.to_be_bytes());
        desc.extend_from_slice(&(-1_i32).to_be_bytes());
        desc.extend_from_slice(&[0; 2]);
        let mut reply = message(b'T', &desc);
        reply.extend(message(b'D', &[0, 1, 0, 0, 0, 1, b'1']));
        // Split the response so the first read ends mid-message.
        server.write_all(&reply[..reply.len() - 2]).unwrap();
        conn.consume_input().unwrap();
        assert!(conn.is_busy());
        assert!(conn.get_last_result().unwrap().is_none());

        let mut rest = reply[reply.len() - 2..].to_vec();
        rest.extend(message(b'C', b"SELECT 1\0"));
        rest.extend(message(b'Z', b"I"));
        server.write_all(&rest).unwrap();
        conn.consume_input().unwrap();
        assert!(!conn.is_busy());

        let result = conn.get_last_result().unwrap().unwrap();
        assert_eq!(result.first().unwrap().get(0), Some("1"));
        assert!(conn.get_last_result().unwrap().is_none());
    }

    #[test]
    fn refused_by_server() {
        let (mut conn, mut server) = pair();
        assert_eq!(conn.connect_poll(), PollingStatus::Reading);
        drain(&mut server);

        server
            .write_all(&message(
                b'E',
                b"SFATAL\0C3D000\0Mdatabase \"nope\" does not exist\0\0",
            ))
            .unwrap();
        assert_eq!(conn.connect_poll(), PollingStatus::Failed);
        assert_eq!(conn.status(), ConnStatus::Bad);
        assert!(conn.error_message().contains("database \"nope\" does not exist"));
    }

    #[test]
    fn one_request_at_a_time() {
        let (mut conn, mut server) = pair();
        handshake(&mut conn, &mut server);

        conn.send_query("select pg_sleep(1)").unwrap();
        assert!(matches!(
            conn.send_query("select 2"),
            Err(ClientError::InvalidUsage(_))
        ));
    }

    #[test]
    fn server_hangup_is_reported() {
        let (mut conn, mut server) = pair();
        handshake(&mut conn, &mut server);

        drop(server);
        assert!(matches!(
            conn.consume_input(),
            Err(ClientError::ConnectionClosed)
        ));
        assert_eq!(conn.status(), ConnStatus::Bad);
        assert!(matches!(
            conn.send_query("select 1"),
            Err(ClientError::ConnectionClosed)
        ));
    }

    #[test]
    fn finish_sends_terminate() {
        let (mut conn, mut server) = pair();
        handshake(&mut conn, &mut server);

        conn.finish();
        assert!(conn.socket().is_none());
        assert_eq!(drain(&mut server), message(b'X', &[]));
    }
}
