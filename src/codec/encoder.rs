use crate::codec::name;
use crate::errors::GatewayResult;
use crate::types::{DnsHeader, HeaderFlags, RecordType, CLASS_IN};

/// Build a single-question, recursion-desired query with a random
/// transaction id.
pub fn build_query(domain: &str, record_type: RecordType) -> GatewayResult<Vec<u8>> {
    build_query_with_id(rand::random::<u16>(), domain, record_type)
}

pub fn build_query_with_id(id: u16, domain: &str, record_type: RecordType) -> GatewayResult<Vec<u8>> {
    let qname = name::encode(domain)?;
    let header = DnsHeader {
        id,
        flags: HeaderFlags::recursive_query(),
        question_count: 1,
        ..DnsHeader::default()
    };

    let mut packet = Vec::with_capacity(super::HEADER_LEN + qname.len() + 4);
    write_header(&header, &mut packet);
    packet.extend_from_slice(&qname);
    packet.extend_from_slice(&record_type.code().to_be_bytes());
    packet.extend_from_slice(&CLASS_IN.to_be_bytes());
    Ok(packet)
}

fn write_header(header: &DnsHeader, out: &mut Vec<u8>) {
    for field in [
        header.id,
        header.flags.to_u16(),
        header.question_count,
        header.answer_count,
        header.authority_count,
        header.additional_count,
    ] {
        out.extend_from_slice(&field.to_be_bytes());
    }
}
