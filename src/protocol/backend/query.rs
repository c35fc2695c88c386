//! Result-set messages: RowDescription, DataRow, CommandComplete.

use zerocopy::byteorder::big_endian::{I16 as I16BE, I32 as I32BE, U16 as U16BE, U32 as U32BE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{ClientError, ClientResult};
use crate::protocol::codec::{read_cstr, read_i32, read_u16};
use crate::protocol::types::FormatCode;
use crate::result::Column;

/// Fixed 18-byte part of a field description, following the name.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FieldDescriptionTail {
    pub table_oid: U32BE,
    pub column_id: I16BE,
    pub type_oid: U32BE,
    pub type_size: I16BE,
    pub type_modifier: I32BE,
    pub format: U16BE,
}

/// RowDescription: the columns of the rows that follow.
#[derive(Debug)]
pub struct RowDescription<'a> {
    fields: Vec<(&'a str, FieldDescriptionTail)>,
}

impl<'a> RowDescription<'a> {
    pub fn parse(payload: &'a [u8]) -> ClientResult<Self> {
        let (count, mut data) = read_u16(payload)?;

        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (name, rest) = read_cstr(data)?;
            let (tail, rest) = FieldDescriptionTail::read_from_prefix(rest).map_err(|_| {
                ClientError::Protocol(format!("RowDescription: truncated field {name:?}"))
            })?;
            fields.push((name, tail));
            data = rest;
        }

        Ok(Self { fields })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Owned column metadata.
    pub fn to_columns(&self) -> Vec<Column> {
        self.fields
            .iter()
            .map(|(name, tail)| Column {
                name: (*name).to_string(),
                table_oid: tail.table_oid.get(),
                column_id: tail.column_id.get(),
                type_oid: tail.type_oid.get(),
                type_size: tail.type_size.get(),
                type_modifier: tail.type_modifier.get(),
                format: FormatCode::from_u16(tail.format.get()),
            })
            .collect()
    }
}

/// DataRow: one row, each value length-prefixed (-1 for NULL).
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    count: u16,
    data: &'a [u8],
}

impl<'a> DataRow<'a> {
    pub fn parse(payload: &'a [u8]) -> ClientResult<Self> {
        let (count, data) = read_u16(payload)?;
        Ok(Self { count, data })
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Copy every value out of the message.
    pub fn to_values(&self) -> ClientResult<Vec<Option<Vec<u8>>>> {
        let mut values = Vec::with_capacity(self.len());
        let mut data = self.data;
        for _ in 0..self.count {
            let (len, rest) = read_i32(data)?;
            if len < 0 {
                values.push(None);
                data = rest;
                continue;
            }
            let (value, rest) = rest.split_at_checked(len as usize).ok_or_else(|| {
                ClientError::Protocol(format!("DataRow: value of {len} bytes overruns message"))
            })?;
            values.push(Some(value.to_vec()));
            data = rest;
        }
        Ok(values)
    }
}

/// CommandComplete: the command tag, e.g. `INSERT 0 3`.
#[derive(Debug, Clone, Copy)]
pub struct CommandComplete<'a> {
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    pub fn parse(payload: &'a [u8]) -> ClientResult<Self> {
        let (tag, _) = read_cstr(payload)?;
        Ok(Self { tag })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_description() -> Vec<u8> {
        let mut payload = 1_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"n\0");
        payload.extend_from_slice(&0_u32.to_be_bytes());
        payload.extend_from_slice(&0_i16.to_be_bytes());
        payload.extend_from_slice(&23_u32.to_be_bytes());
        payload.extend_from_slice(&4_i16.to_be_bytes());
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&0_u16.to_be_bytes());
        payload
    }

    #[test]
    fn columns_from_row_description() {
        let payload = row_description();
        let desc = RowDescription::parse(&payload).unwrap();
        let columns = desc.to_columns();
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].name, "n");
        assert_eq!(columns[0].type_oid, 23);
        assert_eq!(columns[0].type_size, 4);
        assert_eq!(columns[0].format, FormatCode::Text);
    }

    #[test]
    fn truncated_row_description() {
        let payload = row_description();
        assert!(RowDescription::parse(&payload[..payload.len() - 1]).is_err());
        assert!(RowDescription::parse(&payload[..1]).is_err());
    }

    #[test]
    fn data_row_values() {
        let mut payload = 2_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&1_i32.to_be_bytes());
        payload.push(b'7');
        payload.extend_from_slice(&(-1_i32).to_be_bytes());

        let row = DataRow::parse(&payload).unwrap();
        assert_eq!(row.to_values().unwrap(), vec![Some(b"7".to_vec()), None]);
    }

    #[test]
    fn data_row_overrun() {
        let mut payload = 1_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&10_i32.to_be_bytes());
        payload.extend_from_slice(b"short");
        assert!(DataRow::parse(&payload).unwrap().to_values().is_err());
    }
}
