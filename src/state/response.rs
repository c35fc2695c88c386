//! Collects the server's response to one submitted statement.
//!
//! Every send primitive ends its request with Sync (or is a simple Query), so
//! a response always ends with exactly one ReadyForQuery. Until then the
//! machine accumulates:
//!
//! - the most recent completed result set (a multi-statement simple query
//!   yields the last one),
//! - the first ErrorResponse, which wins over any result.

use crate::error::{ClientError, ClientResult};
use crate::protocol::backend::{
    CommandComplete, DataRow, ErrorResponse, ParameterDescription, RawMessage, ReadyForQuery,
    RowDescription, msg_type,
};
use crate::protocol::types::{Oid, TransactionStatus};
use crate::result::{Column, QueryResult};

use super::action::{Action, AsyncMessage};

#[derive(Default)]
struct Pending {
    columns: Vec<Column>,
    rows: Vec<Vec<Option<Vec<u8>>>>,
    param_oids: Vec<Oid>,
}

impl Pending {
    fn complete(&mut self, tag: Option<String>) -> QueryResult {
        let Pending {
            columns,
            rows,
            param_oids,
        } = std::mem::take(self);
        QueryResult::new(columns, rows, tag, param_oids)
    }
}

/// Response collector for one in-flight statement.
#[derive(Default)]
pub struct ResponseStateMachine {
    pending: Pending,
    last: Option<QueryResult>,
    error: Option<ClientError>,
    ready: Option<TransactionStatus>,
}

impl ResponseStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once ReadyForQuery has been seen.
    pub fn is_finished(&self) -> bool {
        self.ready.is_some()
    }

    /// Transaction status reported by the closing ReadyForQuery.
    pub fn transaction_status(&self) -> Option<TransactionStatus> {
        self.ready
    }

    /// Feed one backend message.
    ///
    /// An `Err` here means the stream itself is unusable (malformed message,
    /// COPY). Server errors for the statement are held until [`finish`].
    ///
    /// [`finish`]: Self::finish
    pub fn step(&mut self, msg: RawMessage<'_>) -> ClientResult<Action> {
        if let Some(message) = AsyncMessage::parse(&msg)? {
            return Ok(Action::Async(message));
        }

        match msg.type_byte {
            msg_type::ROW_DESCRIPTION => {
                self.pending.columns = RowDescription::parse(msg.payload)?.to_columns();
            }
            msg_type::DATA_ROW => {
                let row = DataRow::parse(msg.payload)?;
                if row.len() != self.pending.columns.len() {
                    return Err(ClientError::Protocol(format!(
                        "DataRow has {} values for {} columns",
                        row.len(),
                        self.pending.columns.len()
                    )));
                }
                self.pending.rows.push(row.to_values()?);
            }
            msg_type::COMMAND_COMPLETE => {
                let tag = CommandComplete::parse(msg.payload)?.tag.to_string();
                self.last = Some(self.pending.complete(Some(tag)));
            }
            msg_type::EMPTY_QUERY_RESPONSE | msg_type::PORTAL_SUSPENDED => {
                self.last = Some(self.pending.complete(None));
            }
            msg_type::PARAMETER_DESCRIPTION => {
                self.pending.param_oids = ParameterDescription::parse(msg.payload)?.oids;
            }
            msg_type::PARSE_COMPLETE
            | msg_type::BIND_COMPLETE
            | msg_type::CLOSE_COMPLETE
            | msg_type::NO_DATA => {}
            msg_type::ERROR_RESPONSE => {
                let error = ErrorResponse::parse(msg.payload)?.into_error();
                self.pending = Pending::default();
                self.error.get_or_insert(error);
            }
            msg_type::COPY_IN_RESPONSE | msg_type::COPY_OUT_RESPONSE | msg_type::COPY_BOTH_RESPONSE => {
                return Err(ClientError::Unsupported("COPY protocol".into()));
            }
            msg_type::READY_FOR_QUERY => {
                self.ready = Some(ReadyForQuery::parse(msg.payload)?.status);
                return Ok(Action::Finished);
            }
            other => {
                return Err(ClientError::Protocol(format!(
                    "unexpected message '{}' in query response",
                    other as char
                )));
            }
        }
        Ok(Action::ReadMessage)
    }

    /// Consume the collector once finished.
    ///
    /// A describe or prepare yields no CommandComplete; whatever metadata was
    /// collected becomes the result.
    pub fn finish(mut self) -> ClientResult<QueryResult> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(self.last.unwrap_or_else(|| self.pending.complete(None)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_description(names: &[&str]) -> Vec<u8> {
        let mut payload = (names.len() as u16).to_be_bytes().to_vec();
        for name in names {
            payload.extend_from_slice(name.as_bytes());
            payload.push(0);
            payload.extend_from_slice(&[0; 4]);
            payload.extend_from_slice(&[0; 2]);
            payload.extend_from_slice(&25_u32.to_be_bytes());
            payload.extend_from_slice(&(-1_i16).to_be_bytes());
            payload.extend_from_slice(&(-1_i32).to_be_bytes());
            payload.extend_from_slice(&[0; 2]);
        }
        payload
    }

    fn data_row(values: &[&str]) -> Vec<u8> {
        let mut payload = (values.len() as u16).to_be_bytes().to_vec();
        for value in values {
            payload.extend_from_slice(&(value.len() as i32).to_be_bytes());
            payload.extend_from_slice(value.as_bytes());
        }
        payload
    }

    fn feed(sm: &mut ResponseStateMachine, type_byte: u8, payload: &[u8]) -> Action {
        sm.step(RawMessage::new(type_byte, payload)).unwrap()
    }

    #[test]
    fn simple_select() {
        let mut sm = ResponseStateMachine::new();
        feed(&mut sm, b'T', &row_description(&["?column?"]));
        feed(&mut sm, b'D', &data_row(&["1"]));
        feed(&mut sm, b'C', b"SELECT 1\0");
        assert!(!sm.is_finished());
        assert!(matches!(feed(&mut sm, b'Z', b"I"), Action::Finished));

        let result = sm.finish().unwrap();
        assert_eq!(result.first().unwrap().get(0), Some("1"));
        assert_eq!(result.command_tag(), Some("SELECT 1"));
    }

    #[test]
    fn last_statement_wins() {
        let mut sm = ResponseStateMachine::new();
        feed(&mut sm, b'C', b"CREATE TABLE\0");
        feed(&mut sm, b'T', &row_description(&["a", "b"]));
        feed(&mut sm, b'D', &data_row(&["x", "y"]));
        feed(&mut sm, b'C', b"SELECT 1\0");
        feed(&mut sm, b'Z', b"I");

        let result = sm.finish().unwrap();
        assert_eq!(result.columns().len(), 2);
        assert_eq!(result.first().unwrap().get("b"), Some("y"));
    }

    #[test]
    fn server_error_held_until_ready() {
        let mut sm = ResponseStateMachine::new();
        let action = feed(
            &mut sm,
            b'E',
            b"SERROR\0C42601\0Msyntax error at or near \"selec\"\0\0",
        );
        assert!(matches!(action, Action::ReadMessage));
        feed(&mut sm, b'Z', b"I");
        assert_eq!(sm.transaction_status(), Some(TransactionStatus::Idle));

        let err = sm.finish().unwrap_err();
        assert_eq!(err.sqlstate(), Some("42601"));
    }

    #[test]
    fn describe_statement_metadata() {
        let mut sm = ResponseStateMachine::new();
        feed(&mut sm, b't', &[0, 1, 0, 0, 0, 23]);
        feed(&mut sm, b'T', &row_description(&["total"]));
        feed(&mut sm, b'Z', b"I");

        let result = sm.finish().unwrap();
        assert_eq!(result.param_oids(), &[23]);
        assert_eq!(result.columns()[0].name, "total");
        assert!(result.is_empty());
        assert_eq!(result.command_tag(), None);
    }

    #[test]
    fn notice_is_out_of_band() {
        let mut sm = ResponseStateMachine::new();
        let action = feed(&mut sm, b'N', b"SWARNING\0Mthere is no transaction in progress\0\0");
        assert!(matches!(action, Action::Async(AsyncMessage::Notice(_))));
    }

    #[test]
    fn copy_is_rejected() {
        let mut sm = ResponseStateMachine::new();
        assert!(matches!(
            sm.step(RawMessage::new(b'H', &[0, 0, 0])),
            Err(ClientError::Unsupported(_))
        ));
    }

    #[test]
    fn row_width_mismatch() {
        let mut sm = ResponseStateMachine::new();
        feed(&mut sm, b'T', &row_description(&["a"]));
        assert!(sm.step(RawMessage::new(b'D', &data_row(&["1", "2"]))).is_err());
    }
}
