//! Session startup and authentication.

use crate::error::{ClientError, ClientResult};
use crate::opts::Opts;
use crate::protocol::backend::{
    AuthenticationMessage, BackendKeyData, ErrorResponse, NegotiateProtocolVersion, RawMessage,
    ReadyForQuery, msg_type,
};
use crate::protocol::frontend::auth::{ScramClient, md5_password};
use crate::protocol::frontend::{
    write_password, write_sasl_initial_response, write_sasl_response, write_startup,
};
use crate::protocol::types::TransactionStatus;

use super::action::{Action, AsyncMessage};

const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// Where the startup exchange stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupState {
    /// StartupMessage not yet written.
    Initial,
    /// Waiting for the server's authentication request.
    WaitingAuth,
    /// SCRAM exchange in progress.
    SaslInProgress,
    /// Credentials sent, waiting for AuthenticationOk.
    WaitingAuthResult,
    /// Authenticated; collecting key data until ReadyForQuery.
    WaitingReady,
    Ready,
    Failed,
}

/// Drives the startup exchange up to the first ReadyForQuery.
pub struct StartupStateMachine {
    state: StartupState,
    options: Opts,
    scram: Option<ScramClient>,
    backend_key: Option<(u32, u32)>,
    transaction_status: TransactionStatus,
}

impl StartupStateMachine {
    pub fn new(options: Opts) -> Self {
        Self {
            state: StartupState::Initial,
            options,
            scram: None,
            backend_key: None,
            transaction_status: TransactionStatus::Idle,
        }
    }

    pub fn state(&self) -> StartupState {
        self.state
    }

    /// `(pid, secret)` from BackendKeyData.
    pub fn backend_key(&self) -> Option<(u32, u32)> {
        self.backend_key
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Append the StartupMessage to `out`.
    pub fn start(&mut self, out: &mut Vec<u8>) -> Action {
        let opts = &self.options;
        let mut params: Vec<(&str, &str)> = vec![("user", &opts.user), ("client_encoding", "UTF8")];
        if let Some(db) = &opts.database {
            params.push(("database", db));
        }
        if let Some(app) = &opts.application_name {
            params.push(("application_name", app));
        }
        for (name, value) in &opts.params {
            params.push((name, value));
        }

        write_startup(out, &params);
        self.state = StartupState::WaitingAuth;
        Action::Write
    }

    /// Feed one backend message.
    pub fn step(&mut self, msg: RawMessage<'_>, out: &mut Vec<u8>) -> ClientResult<Action> {
        let result = self.dispatch(msg, out);
        if result.is_err() {
            self.state = StartupState::Failed;
        }
        result
    }

    fn dispatch(&mut self, msg: RawMessage<'_>, out: &mut Vec<u8>) -> ClientResult<Action> {
        if let Some(message) = AsyncMessage::parse(&msg)? {
            return Ok(Action::Async(message));
        }

        match msg.type_byte {
            msg_type::ERROR_RESPONSE => {
                return Err(ErrorResponse::parse(msg.payload)?.into_error());
            }
            msg_type::NEGOTIATE_PROTOCOL_VERSION => {
                let negotiate = NegotiateProtocolVersion::parse(msg.payload)?;
                tracing::debug!(
                    minor = negotiate.newest_minor_version,
                    unrecognized = ?negotiate.unrecognized_options,
                    "server negotiated protocol version"
                );
                return Ok(Action::ReadMessage);
            }
            _ => {}
        }

        match self.state {
            StartupState::WaitingAuth => self.on_auth_request(msg, out),
            StartupState::SaslInProgress => self.on_sasl(msg, out),
            StartupState::WaitingAuthResult => match Self::auth(msg)? {
                AuthenticationMessage::Ok => {
                    self.state = StartupState::WaitingReady;
                    Ok(Action::ReadMessage)
                }
                other => Err(ClientError::Auth(format!(
                    "unexpected authentication result: {other:?}"
                ))),
            },
            StartupState::WaitingReady => self.on_ready(msg),
            state => Err(ClientError::Protocol(format!(
                "unexpected message '{}' in startup state {state:?}",
                msg.type_byte as char
            ))),
        }
    }

    fn auth(msg: RawMessage<'_>) -> ClientResult<AuthenticationMessage<'_>> {
        if msg.type_byte != msg_type::AUTHENTICATION {
            return Err(ClientError::Protocol(format!(
                "expected Authentication, got '{}'",
                msg.type_byte as char
            )));
        }
        AuthenticationMessage::parse(msg.payload)
    }

    fn password(&self) -> ClientResult<&str> {
        self.options
            .password
            .as_deref()
            .ok_or_else(|| ClientError::Auth("password required but not provided".into()))
    }

    fn on_auth_request(&mut self, msg: RawMessage<'_>, out: &mut Vec<u8>) -> ClientResult<Action> {
        match Self::auth(msg)? {
            AuthenticationMessage::Ok => {
                self.state = StartupState::WaitingReady;
                Ok(Action::ReadMessage)
            }
            AuthenticationMessage::CleartextPassword => {
                write_password(out, self.password()?);
                self.state = StartupState::WaitingAuthResult;
                Ok(Action::Write)
            }
            AuthenticationMessage::Md5Password { salt } => {
                let hashed = md5_password(&self.options.user, self.password()?, &salt);
                write_password(out, &hashed);
                self.state = StartupState::WaitingAuthResult;
                Ok(Action::Write)
            }
            AuthenticationMessage::Sasl { mechanisms } => {
                if !mechanisms.contains(&SCRAM_SHA_256) {
                    return Err(ClientError::Auth(format!(
                        "no supported SASL mechanism, server offers {mechanisms:?}"
                    )));
                }
                let scram = ScramClient::new(self.password()?);
                write_sasl_initial_response(
                    out,
                    SCRAM_SHA_256,
                    scram.client_first_message().as_bytes(),
                );
                self.scram = Some(scram);
                self.state = StartupState::SaslInProgress;
                Ok(Action::Write)
            }
            other => Err(ClientError::Unsupported(format!(
                "authentication method {other:?}"
            ))),
        }
    }

    fn on_sasl(&mut self, msg: RawMessage<'_>, out: &mut Vec<u8>) -> ClientResult<Action> {
        let auth = Self::auth(msg)?;
        let scram = self
            .scram
            .as_mut()
            .ok_or_else(|| ClientError::Protocol("SASL message without SCRAM exchange".into()))?;

        match auth {
            AuthenticationMessage::SaslContinue { data } => {
                let server_first = simdutf8::compat::from_utf8(data)
                    .map_err(|e| ClientError::Auth(format!("invalid server-first-message: {e}")))?;
                let client_final = scram
                    .process_server_first(server_first)
                    .map_err(ClientError::Auth)?;
                write_sasl_response(out, client_final.as_bytes());
                Ok(Action::Write)
            }
            AuthenticationMessage::SaslFinal { data } => {
                let server_final = simdutf8::compat::from_utf8(data)
                    .map_err(|e| ClientError::Auth(format!("invalid server-final-message: {e}")))?;
                scram
                    .verify_server_final(server_final)
                    .map_err(ClientError::Auth)?;
                self.scram = None;
                self.state = StartupState::WaitingAuthResult;
                Ok(Action::ReadMessage)
            }
            other => Err(ClientError::Protocol(format!(
                "unexpected SASL message: {other:?}"
            ))),
        }
    }

    fn on_ready(&mut self, msg: RawMessage<'_>) -> ClientResult<Action> {
        match msg.type_byte {
            msg_type::BACKEND_KEY_DATA => {
                let key = BackendKeyData::parse(msg.payload)?;
                self.backend_key = Some((key.pid.get(), key.secret_key.get()));
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                self.transaction_status = ReadyForQuery::parse(msg.payload)?.status;
                self.state = StartupState::Ready;
                Ok(Action::Finished)
            }
            other => Err(ClientError::Protocol(format!(
                "unexpected message '{}' during startup",
                other as char
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(password: Option<&str>) -> Opts {
        Opts {
            user: "alice".into(),
            database: Some("shop".into()),
            password: password.map(Into::into),
            ..Opts::default()
        }
    }

    fn auth_payload(code: i32, extra: &[u8]) -> Vec<u8> {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(extra);
        payload
    }

    #[test]
    fn trust_auth_to_ready() {
        let mut sm = StartupStateMachine::new(opts(None));
        let mut out = Vec::new();
        assert!(matches!(sm.start(&mut out), Action::Write));
        assert!(out.windows(6).any(|w| w == &b"alice\0"[..]));
        out.clear();

        let ok = auth_payload(0, &[]);
        assert!(matches!(
            sm.step(RawMessage::new(b'R', &ok), &mut out).unwrap(),
            Action::ReadMessage
        ));
        match sm
            .step(RawMessage::new(b'S', b"server_version\016.2\0"), &mut out)
            .unwrap()
        {
            Action::Async(AsyncMessage::ParameterChanged { name, value }) => {
                assert_eq!(name, "server_version");
                assert_eq!(value, "16.2");
            }
            other => panic!("unexpected {other:?}"),
        }
        let key = [0, 0, 0, 42, 0, 0, 0, 1];
        sm.step(RawMessage::new(b'K', &key), &mut out).unwrap();
        assert!(matches!(
            sm.step(RawMessage::new(b'Z', b"I"), &mut out).unwrap(),
            Action::Finished
        ));
        assert_eq!(sm.state(), StartupState::Ready);
        assert_eq!(sm.backend_key(), Some((42, 1)));
        assert!(out.is_empty());
    }

    #[test]
    fn md5_auth_writes_hashed_password() {
        let mut sm = StartupStateMachine::new(opts(Some("pw")));
        let mut out = Vec::new();
        sm.start(&mut out);
        out.clear();

        let req = auth_payload(5, &[1, 2, 3, 4]);
        assert!(matches!(
            sm.step(RawMessage::new(b'R', &req), &mut out).unwrap(),
            Action::Write
        ));
        assert_eq!(out[0], b'p');
        let expected = md5_password("alice", "pw", &[1, 2, 3, 4]);
        assert_eq!(&out[5..out.len() - 1], expected.as_bytes());
        assert_eq!(sm.state(), StartupState::WaitingAuthResult);
    }

    #[test]
    fn password_request_without_password_fails() {
        let mut sm = StartupStateMachine::new(opts(None));
        let mut out = Vec::new();
        sm.start(&mut out);

        let req = auth_payload(3, &[]);
        let err = sm.step(RawMessage::new(b'R', &req), &mut out).unwrap_err();
        assert!(matches!(err, ClientError::Auth(_)));
        assert_eq!(sm.state(), StartupState::Failed);
    }

    #[test]
    fn server_error_fails_startup() {
        let mut sm = StartupStateMachine::new(opts(Some("pw")));
        let mut out = Vec::new();
        sm.start(&mut out);

        let payload = b"SFATAL\0C28P01\0Mpassword authentication failed for user \"alice\"\0\0";
        let err = sm
            .step(RawMessage::new(b'E', payload), &mut out)
            .unwrap_err();
        assert_eq!(err.sqlstate(), Some("28P01"));
        assert_eq!(sm.state(), StartupState::Failed);
    }

    #[test]
    fn unsupported_auth_method() {
        let mut sm = StartupStateMachine::new(opts(Some("pw")));
        let mut out = Vec::new();
        sm.start(&mut out);

        let gss = auth_payload(7, &[]);
        assert!(matches!(
            sm.step(RawMessage::new(b'R', &gss), &mut out),
            Err(ClientError::Unsupported(_))
        ));
    }
}
