//! DNS wire format: query construction, response parsing and the name
//! compression scheme shared by both.

pub mod decoder;
pub mod encoder;
pub mod name;

pub use decoder::{parse, parse_message};
pub use encoder::{build_query, build_query_with_id};

use crate::errors::{GatewayError, GatewayResult};

pub(crate) const HEADER_LEN: usize = 12;

pub(crate) fn read_u8(buf: &[u8], offset: usize) -> GatewayResult<u8> {
    buf.get(offset).copied().ok_or(GatewayError::Truncated { offset, needed: 1, len: buf.len() })
}

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> GatewayResult<u16> {
    match buf.get(offset..offset + 2) {
        Some(b) => Ok(u16::from_be_bytes([b[0], b[1]])),
        None => Err(GatewayError::Truncated { offset, needed: 2, len: buf.len() }),
    }
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> GatewayResult<u32> {
    match buf.get(offset..offset + 4) {
        Some(b) => Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
        None => Err(GatewayError::Truncated { offset, needed: 4, len: buf.len() }),
    }
}

pub(crate) fn read_slice(buf: &[u8], offset: usize, len: usize) -> GatewayResult<&[u8]> {
    buf.get(offset..offset + len).ok_or(GatewayError::Truncated { offset, needed: len, len: buf.len() })
}
