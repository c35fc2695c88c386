//! ErrorResponse and NoticeResponse.
//!
//! Both messages share one body layout: a sequence of `(code byte, cstring)`
//! pairs ended by a zero byte.

use crate::error::{ClientError, ClientResult, ErrorFields};
use crate::protocol::codec::read_cstr;

/// Field codes the client keeps. Others (file, line, routine, ...) are skipped.
pub mod field_type {
    pub const SEVERITY: u8 = b'S';
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    pub const CODE: u8 = b'C';
    pub const MESSAGE: u8 = b'M';
    pub const DETAIL: u8 = b'D';
    pub const HINT: u8 = b'H';
    pub const POSITION: u8 = b'P';
    pub const WHERE: u8 = b'W';
    pub const SCHEMA: u8 = b's';
    pub const TABLE: u8 = b't';
    pub const COLUMN: u8 = b'c';
    pub const CONSTRAINT: u8 = b'n';
}

fn parse_fields(payload: &[u8]) -> ClientResult<ErrorFields> {
    let mut fields = ErrorFields::default();
    let mut data = payload;

    while let Some((&code, rest)) = data.split_first() {
        if code == 0 {
            break;
        }
        let (value, rest) = read_cstr(rest)?;
        data = rest;

        let slot = match code {
            field_type::SEVERITY => &mut fields.severity,
            field_type::SEVERITY_NON_LOCALIZED => &mut fields.severity_non_localized,
            field_type::CODE => &mut fields.code,
            field_type::MESSAGE => &mut fields.message,
            field_type::DETAIL => &mut fields.detail,
            field_type::HINT => &mut fields.hint,
            field_type::WHERE => &mut fields.where_,
            field_type::SCHEMA => &mut fields.schema,
            field_type::TABLE => &mut fields.table,
            field_type::COLUMN => &mut fields.column,
            field_type::CONSTRAINT => &mut fields.constraint,
            field_type::POSITION => {
                fields.position = value.parse().ok();
                continue;
            }
            _ => {
                tracing::trace!(code = %(code as char), "skipping error field");
                continue;
            }
        };
        *slot = Some(value.to_string());
    }

    Ok(fields)
}

/// ErrorResponse: the current command failed.
#[derive(Debug, Clone)]
pub struct ErrorResponse(pub ErrorFields);

impl ErrorResponse {
    pub fn parse(payload: &[u8]) -> ClientResult<Self> {
        parse_fields(payload).map(Self)
    }

    pub fn into_error(self) -> ClientError {
        ClientError::Server(self.0)
    }
}

/// NoticeResponse: informational, never affects the command.
#[derive(Debug, Clone)]
pub struct NoticeResponse(pub ErrorFields);

impl NoticeResponse {
    pub fn parse(payload: &[u8]) -> ClientResult<Self> {
        parse_fields(payload).map(Self)
    }

    /// Severity, preferring the untranslated form.
    pub fn severity(&self) -> &str {
        self.0
            .severity_non_localized
            .as_deref()
            .or(self.0.severity.as_deref())
            .unwrap_or("NOTICE")
    }

    pub fn message(&self) -> &str {
        self.0.message.as_deref().unwrap_or_default()
    }
}
