//! Scalar types shared by the message codecs.

use std::fmt;

/// Object identifier; used on the wire for type ids.
pub type Oid = u32;

/// Encoding of a column or parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatCode {
    #[default]
    Text,
    Binary,
}

impl FormatCode {
    /// Anything but 1 reads as text.
    pub fn from_u16(code: u16) -> Self {
        if code == 1 {
            FormatCode::Binary
        } else {
            FormatCode::Text
        }
    }
}

/// Backend transaction state, from the last ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    #[default]
    Idle,
    InTransaction,
    /// Statements are rejected until the block ends.
    Failed,
}

impl TransactionStatus {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            b'I' => TransactionStatus::Idle,
            b'T' => TransactionStatus::InTransaction,
            b'E' => TransactionStatus::Failed,
            _ => return None,
        })
    }

    pub fn in_transaction(self) -> bool {
        self != TransactionStatus::Idle
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransactionStatus::Idle => "idle",
            TransactionStatus::InTransaction => "in transaction",
            TransactionStatus::Failed => "failed transaction",
        })
    }
}
