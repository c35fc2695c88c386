//! Extended-protocol messages: Parse, Bind, Describe, Execute, Sync.
//!
//! Parameters and results always travel in text format.

use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::Oid;

use super::msg_type;

/// Parse `sql` into statement `name` (`""` is the unnamed statement).
///
/// A zero OID, or a missing trailing one, leaves the type to the server.
pub fn write_parse(buf: &mut Vec<u8>, name: &str, sql: &str, param_types: &[Oid]) {
    let mut msg = MessageBuilder::new(buf, msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(sql);
    msg.write_i16(param_types.len() as i16);
    for &oid in param_types {
        msg.write_i32(oid as i32);
    }
    msg.finish();
}

/// Bind `params` to `statement`, creating `portal`. `None` is NULL.
pub fn write_bind(buf: &mut Vec<u8>, portal: &str, statement: &str, params: &[Option<String>]) {
    let mut msg = MessageBuilder::new(buf, msg_type::BIND);
    msg.write_cstr(portal);
    msg.write_cstr(statement);
    // no parameter format codes: text
    msg.write_i16(0);
    msg.write_i16(params.len() as i16);
    for param in params {
        match param {
            Some(text) => {
                msg.write_i32(text.len() as i32);
                msg.write_bytes(text.as_bytes());
            }
            None => msg.write_i32(-1),
        }
    }
    // no result format codes: text
    msg.write_i16(0);
    msg.finish();
}

/// Run `portal`, returning at most `max_rows` rows (0 for all).
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: u32) {
    let mut msg = MessageBuilder::new(buf, msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_i32(max_rows as i32);
    msg.finish();
}

pub fn write_describe_statement(buf: &mut Vec<u8>, name: &str) {
    describe(buf, b'S', name);
}

pub fn write_describe_portal(buf: &mut Vec<u8>, name: &str) {
    describe(buf, b'P', name);
}

fn describe(buf: &mut Vec<u8>, target: u8, name: &str) {
    let mut msg = MessageBuilder::new(buf, msg_type::DESCRIBE);
    msg.write_u8(target);
    msg.write_cstr(name);
    msg.finish();
}

/// End the request. The server answers with ReadyForQuery, after an error too.
pub fn write_sync(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, msg_type::SYNC).finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_inferred_types() {
        let mut buf = Vec::new();
        write_parse(&mut buf, "add_one", "SELECT $1::int + 1", &[0]);

        assert_eq!(buf[0], b'P');
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len as usize, buf.len() - 1);
        assert!(buf.ends_with(&[0, 1, 0, 0, 0, 0]));
    }

    #[test]
    fn bind_sends_text_and_null() {
        let mut buf = Vec::new();
        write_bind(&mut buf, "", "s", &[Some("42".into()), None]);

        assert_eq!(buf[0], b'B');
        let mut expected = vec![0, b's', 0];
        expected.extend_from_slice(&0_i16.to_be_bytes());
        expected.extend_from_slice(&2_i16.to_be_bytes());
        expected.extend_from_slice(&2_i32.to_be_bytes());
        expected.extend_from_slice(b"42");
        expected.extend_from_slice(&(-1_i32).to_be_bytes());
        expected.extend_from_slice(&0_i16.to_be_bytes());
        assert_eq!(&buf[5..], expected.as_slice());
    }

    #[test]
    fn describe_then_sync() {
        let mut buf = Vec::new();
        write_describe_portal(&mut buf, "cur");
        write_sync(&mut buf);

        assert_eq!(buf[0], b'D');
        assert_eq!(&buf[5..10], b"Pcur\0");
        assert_eq!(&buf[10..], [b'S', 0, 0, 0, 4]);
    }
}
