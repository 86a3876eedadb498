use std::net::{Ipv4Addr, Ipv6Addr};

use crate::codec::{name, read_slice, read_u16, read_u32, read_u8, HEADER_LEN};
use crate::errors::{GatewayError, GatewayResult};
use crate::types::{DnsHeader, DnsMessage, DnsQuestion, HeaderFlags, Record, RecordType};

/// Parse a response into its rendered answer lines.
///
/// Never fails: a response that cannot be framed at all becomes a single
/// error line, and a record that cannot be decoded is replaced by an error
/// line while the lines already produced are kept.
pub fn parse(buf: &[u8]) -> Vec<String> {
    match parse_message(buf) {
        Ok(msg) => msg.answers,
        Err(e) => vec![parse_error_line(&e)],
    }
}

pub fn parse_message(buf: &[u8]) -> GatewayResult<DnsMessage> {
    let header = parse_header(buf)?;
    let mut offset = HEADER_LEN;

    let mut questions = Vec::with_capacity(header.question_count as usize);
    for _ in 0..header.question_count {
        let (qname, next) = name::decode(buf, offset)?;
        let qtype = read_u16(buf, next)?;
        let qclass = read_u16(buf, next + 2)?;
        questions.push(DnsQuestion { name: qname, qtype: RecordType::from_code(qtype), qclass });
        offset = next + 4;
    }

    let mut answers = Vec::with_capacity(header.answer_count as usize);
    for _ in 0..header.answer_count {
        match read_answer(buf, offset) {
            Ok((line, next)) => {
                answers.push(line);
                offset = next;
            }
            Err(e) => {
                // Without a trustworthy frame there is no next record to find.
                tracing::debug!("Stopping answer decode at offset {}: {}", offset, e);
                answers.push(parse_error_line(&e));
                break;
            }
        }
    }

    Ok(DnsMessage { header, questions, answers })
}

fn parse_header(buf: &[u8]) -> GatewayResult<DnsHeader> {
    if buf.len() < HEADER_LEN {
        return Err(GatewayError::Truncated { offset: 0, needed: HEADER_LEN, len: buf.len() });
    }
    Ok(DnsHeader {
        id: read_u16(buf, 0)?,
        flags: HeaderFlags::from_u16(read_u16(buf, 2)?),
        question_count: read_u16(buf, 4)?,
        answer_count: read_u16(buf, 6)?,
        authority_count: read_u16(buf, 8)?,
        additional_count: read_u16(buf, 10)?,
    })
}

/// Read one answer record starting at `offset`. Framing errors (owner name,
/// fixed fields, rdata past the buffer) are returned; rdata decode errors
/// are rendered in place since the next record's offset is still known.
fn read_answer(buf: &[u8], offset: usize) -> GatewayResult<(String, usize)> {
    let (_owner, next) = name::decode(buf, offset)?;
    let rtype = read_u16(buf, next)?;
    let _class = read_u16(buf, next + 2)?;
    let _ttl = read_u32(buf, next + 4)?;
    let rdlength = read_u16(buf, next + 8)? as usize;

    let rdata_offset = next + 10;
    let rdata_end = rdata_offset + rdlength;
    if rdata_end > buf.len() {
        return Err(GatewayError::Truncated { offset: rdata_offset, needed: rdlength, len: buf.len() });
    }

    let line = match read_rdata(buf, rtype, rdata_offset, rdlength) {
        Ok(record) => record.to_string(),
        Err(e) => parse_error_line(&e),
    };
    // Advance by the declared length whatever the type decoder consumed.
    Ok((line, rdata_end))
}

fn read_rdata(buf: &[u8], rtype: u16, offset: usize, rdlength: usize) -> GatewayResult<Record> {
    let record = match (RecordType::from_code(rtype), rdlength) {
        (RecordType::A, 4) => {
            let b = read_slice(buf, offset, 4)?;
            Record::A { addr: Ipv4Addr::new(b[0], b[1], b[2], b[3]) }
        }
        (RecordType::AAAA, 16) => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(read_slice(buf, offset, 16)?);
            Record::AAAA { addr: Ipv6Addr::from(octets) }
        }
        (RecordType::CNAME, _) => Record::CNAME { cname: name::decode(buf, offset)?.0 },
        (RecordType::NS, _) => Record::NS { nsdname: name::decode(buf, offset)?.0 },
        (RecordType::MX, _) => Record::MX {
            preference: read_u16(buf, offset)?,
            exchange: name::decode(buf, offset + 2)?.0,
        },
        (RecordType::TXT, _) => Record::TXT { text: read_character_strings(buf, offset, rdlength)? },
        // Address records with an unexpected length fall through with the
        // other unknown types.
        _ => Record::Unhandled { code: rtype },
    };
    Ok(record)
}

fn read_character_strings(buf: &[u8], offset: usize, rdlength: usize) -> GatewayResult<Vec<String>> {
    let rdata = read_slice(buf, offset, rdlength)?;
    let mut strings = Vec::new();
    let mut pos = 0;
    while pos < rdata.len() {
        let len = read_u8(rdata, pos)? as usize;
        let bytes = read_slice(rdata, pos + 1, len)
            .map_err(|_| GatewayError::Truncated { offset: offset + pos + 1, needed: len, len: buf.len() })?;
        strings.push(String::from_utf8_lossy(bytes).into_owned());
        pos += 1 + len;
    }
    Ok(strings)
}

fn parse_error_line(e: &GatewayError) -> String {
    format!("Error parsing response: {}", e)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal response builder: header + question for `example.com` at
    /// offset 12, answers appended with a pointer to the question name.
    struct Response { buf: Vec<u8>, answers: u16 }

    impl Response {
        fn new() -> Self {
            let mut buf = vec![0x12, 0x34, 0x81, 0x80, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
            buf.extend_from_slice(b"\x07example\x03com\x00");
            buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
            Self { buf, answers: 0 }
        }

        fn answer(mut self, rtype: u16, rdata: &[u8]) -> Self {
            self.buf.extend_from_slice(&[0xC0, 0x0C]);
            self.buf.extend_from_slice(&rtype.to_be_bytes());
            self.buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 0x0E, 0x10]);
            self.buf.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
            self.buf.extend_from_slice(rdata);
            self.answers += 1;
            self
        }

        fn build(mut self) -> Vec<u8> {
            self.buf[6..8].copy_from_slice(&self.answers.to_be_bytes());
            self.buf
        }
    }

    #[test]
    fn a_record() {
        let resp = Response::new().answer(1, &[1, 2, 3, 4]).build();
        assert_eq!(parse(&resp), vec!["A Record: 1.2.3.4"]);
    }

    #[test]
    fn mx_record_with_compressed_exchange() {
        // "mail" + pointer to the question name at offset 12
        let resp = Response::new().answer(15, b"\x00\x0A\x04mail\xC0\x0C").build();
        assert_eq!(parse(&resp), vec!["MX Record: mail.example.com (Preference: 10)"]);
    }

    #[test]
    fn txt_with_two_strings() {
        let resp = Response::new().answer(16, b"\x06v=spf1\x04-all").build();
        assert_eq!(parse(&resp), vec!["TXT Record: \"v=spf1 -all\""]);
    }

    #[test]
    fn cname_ns_and_aaaa() {
        let mut v6 = [0u8; 16];
        v6[0] = 0x20;
        v6[1] = 0x01;
        v6[15] = 0x01;
        let resp = Response::new()
            .answer(5, b"\x03www\xC0\x0C")
            .answer(2, b"\x02ns\x01x\x03net\x00")
            .answer(28, &v6)
            .build();
        assert_eq!(
            parse(&resp),
            vec![
                "CNAME Record: www.example.com",
                "NS Record: ns.x.net",
                "AAAA Record: 2001:0000:0000:0000:0000:0000:0000:0001",
            ]
        );
    }

    #[test]
    fn unknown_type_is_rendered_not_raised() {
        let resp = Response::new().answer(6, &[0u8; 22]).answer(1, &[9, 9, 9, 9]).build();
        assert_eq!(parse(&resp), vec!["Unhandled Record Type 6", "A Record: 9.9.9.9"]);
    }

    #[test]
    fn rdata_length_governs_advance() {
        // A record padded with garbage: declared length 6 is not an A record,
        // and the following record must still be found.
        let resp = Response::new().answer(1, &[1, 2, 3, 4, 0xFF, 0xFF]).answer(1, &[5, 6, 7, 8]).build();
        assert_eq!(parse(&resp), vec!["Unhandled Record Type 1", "A Record: 5.6.7.8"]);

        // MX whose name ends early inside a longer rdata.
        let resp = Response::new().answer(15, b"\x00\x05\xC0\x0C\xAA\xBB").answer(1, &[1, 1, 1, 1]).build();
        assert_eq!(
            parse(&resp),
            vec!["MX Record: example.com (Preference: 5)", "A Record: 1.1.1.1"]
        );
    }

    #[test]
    fn bad_rdata_keeps_earlier_and_later_records() {
        let resp = Response::new()
            .answer(1, &[1, 2, 3, 4])
            .answer(5, &[0xC0, 0x7F])
            .answer(1, &[4, 3, 2, 1])
            .build();
        let lines = parse(&resp);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "A Record: 1.2.3.4");
        assert!(lines[1].starts_with("Error parsing response: malformed name"));
        assert_eq!(lines[2], "A Record: 4.3.2.1");
    }

    #[test]
    fn truncated_answer_stops_with_error_line() {
        let mut resp = Response::new().answer(1, &[1, 2, 3, 4]).answer(1, &[5, 6, 7, 8]).build();
        resp.truncate(resp.len() - 2);
        let lines = parse(&resp);
        assert_eq!(lines[0], "A Record: 1.2.3.4");
        assert!(lines[1].starts_with("Error parsing response: truncated"));
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn txt_string_overrunning_rdata_is_an_error_line() {
        let resp = Response::new().answer(16, b"\x09short").build();
        let lines = parse(&resp);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Error parsing response"));
    }

    #[test]
    fn short_header_is_a_single_error_line() {
        let lines = parse(&[0x00, 0x01, 0x02]);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Error parsing response: truncated"));
    }

    #[test]
    fn self_referential_question_name_does_not_hang() {
        let mut resp = vec![0x12, 0x34, 0x81, 0x80, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00];
        resp.extend_from_slice(&[0xC0, 0x0C, 0x00, 0x01, 0x00, 0x01]);
        let lines = parse(&resp);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("compression loop"));
    }

    #[test]
    fn header_and_question_are_exposed() {
        let resp = Response::new().build();
        let msg = parse_message(&resp).unwrap();
        assert_eq!(msg.header.id, 0x1234);
        assert!(msg.header.flags.qr);
        assert_eq!(msg.questions[0].name, "example.com");
        assert_eq!(msg.questions[0].qtype, RecordType::A);
        assert!(msg.answers.is_empty());
    }
}
