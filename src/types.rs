//! Basic types for the gateway

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Record types the gateway asks the upstream for. Anything else seen in a
/// response is carried as `Unhandled` with its raw code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType { A, NS, CNAME, MX, TXT, AAAA, Unhandled(u16) }

impl RecordType {
    /// Fan-out order used when resolving a domain on a cache miss.
    pub const QUERY_ORDER: [RecordType; 6] = [
        RecordType::A, RecordType::AAAA, RecordType::MX,
        RecordType::CNAME, RecordType::NS, RecordType::TXT,
    ];

    pub fn code(&self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::MX => 15,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
            RecordType::Unhandled(code) => *code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            1 => RecordType::A,
            2 => RecordType::NS,
            5 => RecordType::CNAME,
            15 => RecordType::MX,
            16 => RecordType::TXT,
            28 => RecordType::AAAA,
            other => RecordType::Unhandled(other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::NS => "NS",
            RecordType::CNAME => "CNAME",
            RecordType::MX => "MX",
            RecordType::TXT => "TXT",
            RecordType::AAAA => "AAAA",
            RecordType::Unhandled(_) => "OTHER",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::Unhandled(code) => write!(f, "TYPE{}", code),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    A { addr: Ipv4Addr },
    AAAA { addr: Ipv6Addr },
    TXT { text: Vec<String> },
    CNAME { cname: String },
    MX { preference: u16, exchange: String },
    NS { nsdname: String },
    Unhandled { code: u16 },
}

impl Record {
    pub fn record_type(&self) -> RecordType {
        match self {
            Record::A { .. } => RecordType::A,
            Record::AAAA { .. } => RecordType::AAAA,
            Record::TXT { .. } => RecordType::TXT,
            Record::CNAME { .. } => RecordType::CNAME,
            Record::MX { .. } => RecordType::MX,
            Record::NS { .. } => RecordType::NS,
            Record::Unhandled { code } => RecordType::Unhandled(*code),
        }
    }
}

/// The rendering here is the wire format of the client protocol and the
/// cache store; clients do no further parsing.
impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::A { addr } => write!(f, "A Record: {}", addr),
            Record::AAAA { addr } => {
                // Uncompressed groups, zero-padded, unlike Ipv6Addr's Display.
                let groups: Vec<String> = addr.segments().iter().map(|s| format!("{:04x}", s)).collect();
                write!(f, "AAAA Record: {}", groups.join(":"))
            }
            Record::CNAME { cname } => write!(f, "CNAME Record: {}", cname),
            Record::NS { nsdname } => write!(f, "NS Record: {}", nsdname),
            Record::MX { preference, exchange } => write!(f, "MX Record: {} (Preference: {})", exchange, preference),
            Record::TXT { text } => write!(f, "TXT Record: \"{}\"", text.join(" ")),
            Record::Unhandled { code } => write!(f, "Unhandled Record Type {}", code),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16, pub flags: HeaderFlags,
    pub question_count: u16, pub answer_count: u16,
    pub authority_count: u16, pub additional_count: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderFlags {
    pub qr: bool, pub opcode: u8, pub aa: bool, pub tc: bool,
    pub rd: bool, pub ra: bool, pub rcode: u8,
}

impl HeaderFlags {
    /// Standard query with recursion desired (0x0100).
    pub fn recursive_query() -> Self {
        Self { rd: true, ..Self::default() }
    }

    pub fn to_u16(self) -> u16 {
        ((self.qr as u16) << 15)
            | (((self.opcode & 0x0F) as u16) << 11)
            | ((self.aa as u16) << 10)
            | ((self.tc as u16) << 9)
            | ((self.rd as u16) << 8)
            | ((self.ra as u16) << 7)
            | (self.rcode & 0x0F) as u16
    }

    pub fn from_u16(raw: u16) -> Self {
        Self {
            qr: raw & 0x8000 != 0,
            opcode: ((raw >> 11) & 0x0F) as u8,
            aa: raw & 0x0400 != 0,
            tc: raw & 0x0200 != 0,
            rd: raw & 0x0100 != 0,
            ra: raw & 0x0080 != 0,
            rcode: (raw & 0x000F) as u8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion { pub name: String, pub qtype: RecordType, pub qclass: u16 }

/// Class IN.
pub const CLASS_IN: u16 = 1;

/// Transient view of one decoded response. Answers are kept as rendered
/// lines because a single bad record is replaced by an error line rather
/// than dropped.
#[derive(Debug, Clone, Default)]
pub struct DnsMessage {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<String>,
}
