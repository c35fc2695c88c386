//! What a state machine asks of its caller after each message.

use crate::error::ErrorFields;

/// Next step requested by a state machine.
///
/// Outgoing bytes are appended to the caller's write buffer during `step`, so
/// the caller only has to flush them.
#[derive(Debug)]
pub enum Action {
    /// Frontend messages were appended; flush them, then read on.
    Write,

    /// Read the next message and call `step` again.
    ReadMessage,

    /// An out-of-band message arrived; handle it and read on.
    Async(AsyncMessage),

    /// The machine reached its final state.
    Finished,
}

/// Out-of-band message from the server.
#[derive(Debug, Clone)]
pub enum AsyncMessage {
    /// LISTEN/NOTIFY delivery.
    Notification {
        pid: u32,
        channel: String,
        payload: String,
    },

    /// Non-fatal notice or warning.
    Notice(ErrorFields),

    /// A run-time parameter changed (also sent for every parameter at startup).
    ParameterChanged { name: String, value: String },
}

impl AsyncMessage {
    /// Decode an out-of-band message. `None` if `msg` is not one.
    pub(crate) fn parse(
        msg: &crate::protocol::RawMessage<'_>,
    ) -> crate::error::ClientResult<Option<Self>> {
        use crate::protocol::backend::{
            NoticeResponse, NotificationResponse, ParameterStatus, msg_type,
        };

        if !msg.is_async() {
            return Ok(None);
        }
        Ok(Some(match msg.type_byte {
            msg_type::NOTICE_RESPONSE => Self::Notice(NoticeResponse::parse(msg.payload)?.0),
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(msg.payload)?;
                Self::ParameterChanged {
                    name: param.name.to_string(),
                    value: param.value.to_string(),
                }
            }
            msg_type::NOTIFICATION_RESPONSE => {
                let n = NotificationResponse::parse(msg.payload)?;
                Self::Notification {
                    pid: n.pid,
                    channel: n.channel.to_string(),
                    payload: n.payload.to_string(),
                }
            }
            _ => return Ok(None),
        }))
    }
}
