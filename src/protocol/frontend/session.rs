//! Messages that open, use and end a session outside the extended protocol.

use crate::protocol::codec::MessageBuilder;

use super::msg_type;

/// Version 3.0, major in the high 16 bits.
pub const PROTOCOL_VERSION: i32 = 3 << 16;

/// StartupMessage. It has no type byte; `params` must include `user`.
pub fn write_startup(buf: &mut Vec<u8>, params: &[(&str, &str)]) {
    let mut msg = MessageBuilder::new_startup(buf);
    msg.write_i32(PROTOCOL_VERSION);
    for (name, value) in params {
        msg.write_cstr(name);
        msg.write_cstr(value);
    }
    msg.write_u8(0);
    msg.finish();
}

/// Query. `sql` may hold several statements.
pub fn write_query(buf: &mut Vec<u8>, sql: &str) {
    let mut msg = MessageBuilder::new(buf, msg_type::QUERY);
    msg.write_cstr(sql);
    msg.finish();
}

pub fn write_terminate(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, msg_type::TERMINATE).finish();
}
