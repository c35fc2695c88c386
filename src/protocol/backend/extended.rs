//! Extended-query backend messages that carry a body.
//!
//! ParseComplete, BindComplete, NoData and PortalSuspended are empty and are
//! recognised by type byte alone.

use crate::error::ClientResult;
use crate::protocol::codec::{read_u16, read_u32};
use crate::protocol::types::Oid;

/// ParameterDescription: parameter types of a described statement.
#[derive(Debug, Clone, Default)]
pub struct ParameterDescription {
    pub oids: Vec<Oid>,
}

impl ParameterDescription {
    pub fn parse(payload: &[u8]) -> ClientResult<Self> {
        let (count, mut data) = read_u16(payload)?;

        let mut oids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (oid, rest) = read_u32(data)?;
            oids.push(oid);
            data = rest;
        }

        Ok(Self { oids })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_oids() {
        let payload = [0, 2, 0, 0, 0, 23, 0, 0, 0, 25];
        assert_eq!(ParameterDescription::parse(&payload).unwrap().oids, [23, 25]);
    }

    #[test]
    fn truncated_parameter_list() {
        let payload = [0, 2, 0, 0, 0, 23];
        assert!(ParameterDescription::parse(&payload).is_err());
    }
}
