//! Domain names in label-length-prefixed wire form.
//!
//! Decoding follows compression pointers (two high bits set on a length
//! byte) as a walk over the flat message buffer. Every offset a length byte
//! is read from is recorded, so a pointer back into already-read territory
//! is rejected instead of looping, and the total number of pointer hops is
//! capped.

use std::collections::HashSet;

use crate::errors::{GatewayError, GatewayResult};

pub const MAX_LABEL_LEN: usize = 63;
pub const MAX_NAME_LEN: usize = 255;
pub const MAX_POINTER_HOPS: usize = 128;

const POINTER_MASK: u8 = 0xC0;

/// Encode `name` as a sequence of length-prefixed labels ending with the
/// zero-length root label. A single trailing dot is accepted.
pub fn encode(name: &str) -> GatewayResult<Vec<u8>> {
    let trimmed = name.strip_suffix('.').unwrap_or(name);
    if trimmed.is_empty() {
        return Err(encoding_error(name, "name is empty"));
    }
    if !trimmed.is_ascii() {
        return Err(encoding_error(name, "name contains non-ASCII characters"));
    }

    let mut out = Vec::with_capacity(trimmed.len() + 2);
    for label in trimmed.split('.') {
        if label.is_empty() {
            return Err(encoding_error(name, "empty label"));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(encoding_error(name, &format!("label '{}' exceeds {} bytes", label, MAX_LABEL_LEN)));
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);

    if out.len() > MAX_NAME_LEN {
        return Err(encoding_error(name, &format!("encoded name exceeds {} bytes", MAX_NAME_LEN)));
    }
    Ok(out)
}

/// Decode the name starting at `offset` in `buf`.
///
/// Returns the dot-joined name and the offset the caller should continue
/// reading from: right after the first compression pointer if one was
/// followed, otherwise right after the terminating zero byte.
pub fn decode(buf: &[u8], offset: usize) -> GatewayResult<(String, usize)> {
    let mut labels: Vec<String> = Vec::new();
    let mut visited: HashSet<usize> = HashSet::new();
    let mut resume: Option<usize> = None;
    let mut hops = 0usize;
    let mut pos = offset;

    loop {
        if !visited.insert(pos) {
            return Err(GatewayError::malformed(pos, "compression loop"));
        }
        let len = *buf.get(pos).ok_or_else(|| GatewayError::malformed(pos, "name runs past end of message"))?;

        match len & POINTER_MASK {
            POINTER_MASK => {
                let low = *buf.get(pos + 1).ok_or_else(|| GatewayError::malformed(pos, "truncated compression pointer"))?;
                let target = (((len & !POINTER_MASK) as usize) << 8) | low as usize;

                hops += 1;
                if hops > MAX_POINTER_HOPS {
                    return Err(GatewayError::malformed(pos, format!("more than {} compression pointers", MAX_POINTER_HOPS)));
                }
                if target >= buf.len() {
                    return Err(GatewayError::malformed(pos, format!("pointer to {} beyond end of message", target)));
                }
                if resume.is_none() {
                    resume = Some(pos + 2);
                }
                pos = target;
            }
            0 => {
                if len == 0 {
                    pos += 1;
                    break;
                }
                let start = pos + 1;
                let end = start + len as usize;
                let bytes = buf.get(start..end).ok_or_else(|| GatewayError::malformed(pos, "label runs past end of message"))?;
                labels.push(String::from_utf8_lossy(bytes).into_owned());
                pos = end;
            }
            _ => return Err(GatewayError::malformed(pos, format!("reserved label type {:#04x}", len))),
        }
    }

    Ok((labels.join("."), resume.unwrap_or(pos)))
}

fn encoding_error(name: &str, reason: &str) -> GatewayError {
    GatewayError::Encoding { name: name.to_string(), reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_emits_length_prefixed_labels() {
        assert_eq!(
            encode("www.example.com").unwrap(),
            b"\x03www\x07example\x03com\x00".to_vec()
        );
    }

    #[test]
    fn encode_accepts_trailing_dot() {
        assert_eq!(encode("example.com.").unwrap(), encode("example.com").unwrap());
    }

    #[test]
    fn encode_rejects_bad_names() {
        assert!(matches!(encode(""), Err(GatewayError::Encoding { .. })));
        assert!(matches!(encode("a..b"), Err(GatewayError::Encoding { .. })));
        let long_label = "a".repeat(64);
        assert!(matches!(encode(&format!("{}.com", long_label)), Err(GatewayError::Encoding { .. })));
        assert!(encode(&format!("{}.com", "a".repeat(63))).is_ok());
    }

    #[test]
    fn round_trip_preserves_case_and_reports_end() {
        for name in ["example.com", "MiXeD.Case.Org", "a.b.c.d.e.f", "x"] {
            let wire = encode(name).unwrap();
            assert_eq!(decode(&wire, 0).unwrap(), (name.to_string(), wire.len()));
        }
    }

    #[test]
    fn decode_follows_pointer_and_resumes_after_it() {
        // 0: example.com, 13: "mail" + pointer to 0, 20: trailing byte
        let mut buf = encode("example.com").unwrap();
        buf.extend_from_slice(b"\x04mail\xC0\x00\xFF");
        let (name, next) = decode(&buf, 13).unwrap();
        assert_eq!(name, "mail.example.com");
        assert_eq!(next, 20);
    }

    #[test]
    fn resume_point_is_fixed_by_first_pointer() {
        // 0: "com" root, 5: "example" + ptr(0), 15: ptr(5)
        let mut buf = b"\x03com\x00".to_vec();
        buf.extend_from_slice(b"\x07example\xC0\x00");
        buf.extend_from_slice(b"\xC0\x05");
        let (name, next) = decode(&buf, 15).unwrap();
        assert_eq!(name, "example.com");
        assert_eq!(next, 17);
    }

    #[test]
    fn self_pointer_is_malformed() {
        let buf = [0xC0, 0x00];
        assert!(matches!(decode(&buf, 0), Err(GatewayError::MalformedName { .. })));
    }

    #[test]
    fn mutual_pointers_are_malformed() {
        let buf = [0xC0, 0x02, 0xC0, 0x00];
        assert!(matches!(decode(&buf, 0), Err(GatewayError::MalformedName { .. })));
    }

    #[test]
    fn pointer_back_into_own_labels_is_malformed() {
        let buf = b"\x03abc\xC0\x00";
        assert!(matches!(decode(buf, 0), Err(GatewayError::MalformedName { .. })));
    }

    #[test]
    fn pointer_past_end_is_malformed() {
        let buf = [0x03, b'a', b'b', b'c', 0xC0, 0x40];
        assert!(matches!(decode(&buf, 0), Err(GatewayError::MalformedName { .. })));
    }

    #[test]
    fn truncated_label_is_malformed() {
        let buf = b"\x05ab";
        assert!(matches!(decode(buf, 0), Err(GatewayError::MalformedName { .. })));
        assert!(matches!(decode(b"", 0), Err(GatewayError::MalformedName { .. })));
    }

    #[test]
    fn long_forward_chain_hits_hop_limit() {
        // Each pointer jumps two bytes forward; the chain is longer than the cap.
        let mut buf = Vec::new();
        for i in 0..(MAX_POINTER_HOPS + 10) {
            let target = (i + 1) * 2;
            buf.push(0xC0 | ((target >> 8) as u8 & 0x3F));
            buf.push(target as u8);
        }
        buf.push(0);
        let err = decode(&buf, 0).unwrap_err();
        assert!(matches!(err, GatewayError::MalformedName { .. }));
    }
}
