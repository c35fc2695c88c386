//! Messages seen while establishing a session, plus the ones that can arrive
//! at any time afterwards (parameter changes, notifications).

use zerocopy::byteorder::big_endian::U32 as U32BE;
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{ClientError, ClientResult};
use crate::protocol::codec::{read_cstr, read_i32, read_u32};
use crate::protocol::types::TransactionStatus;

/// Authentication request codes.
pub mod auth_type {
    pub const OK: i32 = 0;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}

/// Authentication request from the server.
#[derive(Debug)]
pub enum AuthenticationMessage<'a> {
    Ok,
    CleartextPassword,
    Md5Password { salt: [u8; 4] },
    /// SASL with the mechanisms the server offers.
    Sasl { mechanisms: Vec<&'a str> },
    SaslContinue { data: &'a [u8] },
    SaslFinal { data: &'a [u8] },
    /// Kerberos, GSSAPI, SSPI and anything newer.
    Other(i32),
}

impl<'a> AuthenticationMessage<'a> {
    pub fn parse(payload: &'a [u8]) -> ClientResult<Self> {
        let (code, rest) = read_i32(payload)?;

        Ok(match code {
            auth_type::OK => Self::Ok,
            auth_type::CLEARTEXT_PASSWORD => Self::CleartextPassword,
            auth_type::MD5_PASSWORD => {
                let salt = rest
                    .first_chunk::<4>()
                    .copied()
                    .ok_or_else(|| ClientError::Protocol("MD5Password: missing salt".into()))?;
                Self::Md5Password { salt }
            }
            auth_type::SASL => {
                let mut mechanisms = Vec::new();
                let mut data = rest;
                while data.first().is_some_and(|&b| b != 0) {
                    let (mechanism, remaining) = read_cstr(data)?;
                    mechanisms.push(mechanism);
                    data = remaining;
                }
                Self::Sasl { mechanisms }
            }
            auth_type::SASL_CONTINUE => Self::SaslContinue { data: rest },
            auth_type::SASL_FINAL => Self::SaslFinal { data: rest },
            other => Self::Other(other),
        })
    }
}

/// BackendKeyData: identifies the backend for cancel requests.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct BackendKeyData {
    pub pid: U32BE,
    pub secret_key: U32BE,
}

impl BackendKeyData {
    pub fn parse(payload: &[u8]) -> ClientResult<Self> {
        let (key, _) = Self::read_from_prefix(payload)
            .map_err(|_| ClientError::Protocol("BackendKeyData: payload too short".into()))?;
        Ok(key)
    }
}

/// ParameterStatus: a run-time parameter the server reports.
#[derive(Debug, Clone, Copy)]
pub struct ParameterStatus<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

impl<'a> ParameterStatus<'a> {
    pub fn parse(payload: &'a [u8]) -> ClientResult<Self> {
        let (name, rest) = read_cstr(payload)?;
        let (value, _) = read_cstr(rest)?;
        Ok(Self { name, value })
    }
}

/// ReadyForQuery: the server finished a command cycle.
#[derive(Debug, Clone, Copy)]
pub struct ReadyForQuery {
    pub status: TransactionStatus,
}

impl ReadyForQuery {
    pub fn parse(payload: &[u8]) -> ClientResult<Self> {
        let status = payload
            .first()
            .and_then(|&b| TransactionStatus::from_byte(b))
            .ok_or_else(|| ClientError::Protocol("ReadyForQuery: bad status byte".into()))?;
        Ok(Self { status })
    }
}

/// NotificationResponse from LISTEN/NOTIFY.
#[derive(Debug, Clone, Copy)]
pub struct NotificationResponse<'a> {
    pub pid: u32,
    pub channel: &'a str,
    pub payload: &'a str,
}

impl<'a> NotificationResponse<'a> {
    pub fn parse(payload: &'a [u8]) -> ClientResult<Self> {
        let (pid, rest) = read_u32(payload)?;
        let (channel, rest) = read_cstr(rest)?;
        let (payload, _) = read_cstr(rest)?;
        Ok(Self {
            pid,
            channel,
            payload,
        })
    }
}

/// NegotiateProtocolVersion: the server only speaks an older minor version.
#[derive(Debug, Clone)]
pub struct NegotiateProtocolVersion<'a> {
    pub newest_minor_version: u32,
    pub unrecognized_options: Vec<&'a str>,
}

impl<'a> NegotiateProtocolVersion<'a> {
    pub fn parse(payload: &'a [u8]) -> ClientResult<Self> {
        let (newest_minor_version, rest) = read_u32(payload)?;
        let (count, mut rest) = read_u32(rest)?;

        let mut unrecognized_options = Vec::new();
        for _ in 0..count {
            let (option, remaining) = read_cstr(rest)?;
            unrecognized_options.push(option);
            rest = remaining;
        }

        Ok(Self {
            newest_minor_version,
            unrecognized_options,
        })
    }
}
