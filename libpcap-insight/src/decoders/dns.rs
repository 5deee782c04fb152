//! DNS messages over UDP or TCP (also mDNS and LLMNR)
//!
//! The header, question section and answer section are decoded. Authority
//! and additional records are only counted.

use super::{ApplicationDecoder, DecodeResult, L4Info, L4Proto};
use crate::layers::ApplicationLayer;
use nom::number::streaming::{be_u16, be_u32};
use nom::IResult;
use serde::Serialize;
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::debug;

/// Maximum number of compression pointers followed while reading one name
pub const MAX_POINTER_HOPS: usize = 16;
/// Maximum length of a domain name, in wire bytes
pub const MAX_NAME_LENGTH: usize = 255;

const DNS_PORTS: &[u16] = &[53, 5353, 5355];
const HEADER_LENGTH: usize = 12;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsRecord {
    pub name: String,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    /// Rendered record data
    pub data: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsLayer {
    pub id: u16,
    pub is_response: bool,
    pub opcode: u8,
    pub authoritative: bool,
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub rcode: u8,
    pub question_count: u16,
    pub answer_count: u16,
    pub authority_count: u16,
    pub additional_count: u16,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    /// A name was cut short by the pointer hop or length bound
    pub name_truncated: bool,
    /// Why the answer section stopped decoding; the header and questions are kept
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_error: Option<String>,
}

impl DnsLayer {
    pub fn rcode_name(&self) -> &'static str {
        rcode_name(self.rcode)
    }

    /// First question name, if any
    pub fn query_name(&self) -> Option<&str> {
        self.questions.first().map(|q| q.name.as_str())
    }

    pub fn summary(&self) -> String {
        let mut s = match (self.opcode, self.is_response) {
            (0, false) => format!("Standard query 0x{:04x}", self.id),
            (0, true) => format!("Standard query response 0x{:04x}", self.id),
            (op, false) => format!("Query opcode {} 0x{:04x}", op, self.id),
            (op, true) => format!("Query opcode {} response 0x{:04x}", op, self.id),
        };
        if self.is_response && self.rcode != 0 {
            s.push(' ');
            s.push_str(rcode_description(self.rcode));
        }
        for q in &self.questions {
            s.push_str(&format!(" {} {}", type_name(q.qtype), q.name));
        }
        for a in &self.answers {
            s.push_str(&format!(" {} {}", type_name(a.rtype), a.data));
        }
        s
    }
}

pub fn rcode_name(rcode: u8) -> &'static str {
    match rcode {
        0 => "NOERROR",
        1 => "FORMERR",
        2 => "SERVFAIL",
        3 => "NXDOMAIN",
        4 => "NOTIMP",
        5 => "REFUSED",
        _ => "RCODE",
    }
}

fn rcode_description(rcode: u8) -> &'static str {
    match rcode {
        1 => "Format error",
        2 => "Server failure",
        3 => "No such name",
        4 => "Not implemented",
        5 => "Refused",
        _ => "Error",
    }
}

pub fn type_name(t: u16) -> String {
    let name = match t {
        1 => "A",
        2 => "NS",
        5 => "CNAME",
        6 => "SOA",
        12 => "PTR",
        15 => "MX",
        16 => "TXT",
        28 => "AAAA",
        33 => "SRV",
        41 => "OPT",
        65 => "HTTPS",
        255 => "ANY",
        _ => return format!("TYPE{}", t),
    };
    name.to_string()
}

pub struct DnsDecoder;

impl ApplicationDecoder for DnsDecoder {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn probe(&self, l4: &L4Info, _payload: &[u8]) -> bool {
        l4.has_port(DNS_PORTS)
    }

    fn decode(&self, l4: &L4Info, payload: &[u8]) -> DecodeResult {
        let msg = match l4.proto {
            L4Proto::Tcp => {
                // 2-byte length prefix
                if payload.len() < 2 {
                    return Err("length prefix truncated".to_string());
                }
                let declared = usize::from(u16::from_be_bytes([payload[0], payload[1]]));
                let end = payload.len().min(2 + declared);
                &payload[2..end]
            }
            L4Proto::Udp => payload,
        };
        parse_dns(msg).map(|dns| Some(ApplicationLayer::Dns(dns)))
    }
}

struct RawHeader {
    id: u16,
    flags: u16,
    qdcount: u16,
    ancount: u16,
    nscount: u16,
    arcount: u16,
}

fn parse_header(i: &[u8]) -> IResult<&[u8], RawHeader> {
    let (i, id) = be_u16(i)?;
    let (i, flags) = be_u16(i)?;
    let (i, qdcount) = be_u16(i)?;
    let (i, ancount) = be_u16(i)?;
    let (i, nscount) = be_u16(i)?;
    let (i, arcount) = be_u16(i)?;
    let header = RawHeader {
        id,
        flags,
        qdcount,
        ancount,
        nscount,
        arcount,
    };
    Ok((i, header))
}

/// Fixed part following a question name
fn parse_question_tail(i: &[u8]) -> IResult<&[u8], (u16, u16)> {
    let (i, qtype) = be_u16(i)?;
    let (i, qclass) = be_u16(i)?;
    Ok((i, (qtype, qclass)))
}

/// Fixed part following a record name
fn parse_record_tail(i: &[u8]) -> IResult<&[u8], (u16, u16, u32, u16)> {
    let (i, rtype) = be_u16(i)?;
    let (i, class) = be_u16(i)?;
    let (i, ttl) = be_u32(i)?;
    let (i, rdlength) = be_u16(i)?;
    Ok((i, (rtype, class, ttl, rdlength)))
}

/// Result of reading one (possibly compressed) name
struct Name {
    name: String,
    /// Offset right after the name at its original position
    next: usize,
    truncated: bool,
}

fn read_name(msg: &[u8], start: usize) -> Result<Name, String> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = start;
    let mut next = None;
    let mut hops = 0;
    let mut length = 0;
    let mut truncated = false;
    loop {
        let len = *msg
            .get(pos)
            .ok_or_else(|| format!("name at offset {} runs past the message", start))?;
        match len & 0xc0 {
            0x00 if len == 0 => {
                if next.is_none() {
                    next = Some(pos + 1);
                }
                break;
            }
            0x00 => {
                let len = usize::from(len);
                let label = msg
                    .get(pos + 1..pos + 1 + len)
                    .ok_or_else(|| format!("label at offset {} runs past the message", pos))?;
                length += len + 1;
                if length > MAX_NAME_LENGTH {
                    truncated = true;
                }
                if !truncated {
                    labels.push(String::from_utf8_lossy(label).into_owned());
                }
                pos += 1 + len;
            }
            0xc0 => {
                let low = *msg
                    .get(pos + 1)
                    .ok_or_else(|| format!("pointer at offset {} runs past the message", pos))?;
                if next.is_none() {
                    next = Some(pos + 2);
                }
                hops += 1;
                if hops > MAX_POINTER_HOPS {
                    debug!("DNS name at offset {}: pointer hop bound reached", start);
                    truncated = true;
                    break;
                }
                pos = (usize::from(len & 0x3f) << 8) | usize::from(low);
            }
            _ => return Err(format!("unsupported label type 0x{:02x}", len & 0xc0)),
        }
    }
    let name = if labels.is_empty() {
        ".".to_string()
    } else {
        labels.join(".")
    };
    Ok(Name {
        name,
        // a pointer was always seen before the hop bound can be reached
        next: next.unwrap_or(pos),
        truncated,
    })
}

fn render_rdata(
    msg: &[u8],
    rtype: u16,
    offset: usize,
    rdata: &[u8],
    truncated: &mut bool,
) -> Result<String, String> {
    let mut name_at = |at: usize| -> Result<String, String> {
        let n = read_name(msg, at)?;
        *truncated |= n.truncated;
        Ok(n.name)
    };
    let s = match (rtype, rdata.len()) {
        (1, 4) => Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]).to_string(),
        (28, 16) => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(rdata);
            Ipv6Addr::from(octets).to_string()
        }
        (2, _) | (5, _) | (12, _) => name_at(offset)?,
        (6, _) => name_at(offset)?,
        (15, n) if n >= 3 => {
            let preference = u16::from_be_bytes([rdata[0], rdata[1]]);
            format!("{} {}", preference, name_at(offset + 2)?)
        }
        (16, _) => {
            let mut strings = Vec::new();
            let mut rest = rdata;
            while let Some((&len, tail)) = rest.split_first() {
                let len = usize::from(len).min(tail.len());
                strings.push(String::from_utf8_lossy(&tail[..len]).into_owned());
                rest = &tail[len..];
            }
            strings.join(" ")
        }
        (33, n) if n >= 7 => {
            let priority = u16::from_be_bytes([rdata[0], rdata[1]]);
            let weight = u16::from_be_bytes([rdata[2], rdata[3]]);
            let port = u16::from_be_bytes([rdata[4], rdata[5]]);
            format!("{} {} {} {}", priority, weight, port, name_at(offset + 6)?)
        }
        (_, n) => format!("<{} bytes>", n),
    };
    Ok(s)
}

/// Decode `count` answer records from `offset` into `dns.answers`
fn parse_answers(msg: &[u8], mut offset: usize, count: u16, dns: &mut DnsLayer) -> Result<(), String> {
    for _ in 0..count {
        let name = read_name(msg, offset)?;
        dns.name_truncated |= name.truncated;
        let tail = msg.get(name.next..).unwrap_or_default();
        let (rest, (rtype, class, ttl, rdlength)) =
            parse_record_tail(tail).map_err(|_| "answer section truncated".to_string())?;
        let rdata_offset = name.next + 10;
        let rdlength = usize::from(rdlength);
        if rest.len() < rdlength {
            return Err("answer record data truncated".to_string());
        }
        let data = render_rdata(
            msg,
            rtype,
            rdata_offset,
            &rest[..rdlength],
            &mut dns.name_truncated,
        )?;
        dns.answers.push(DnsRecord {
            name: name.name,
            rtype,
            class,
            ttl,
            data,
        });
        offset = rdata_offset + rdlength;
    }
    Ok(())
}

/// Parse a complete DNS message
pub fn parse_dns(msg: &[u8]) -> Result<DnsLayer, String> {
    let (_, hdr) = parse_header(msg).map_err(|_| "message shorter than DNS header".to_string())?;
    let mut dns = DnsLayer {
        id: hdr.id,
        is_response: hdr.flags & 0x8000 != 0,
        opcode: ((hdr.flags >> 11) & 0x0f) as u8,
        authoritative: hdr.flags & 0x0400 != 0,
        truncated: hdr.flags & 0x0200 != 0,
        recursion_desired: hdr.flags & 0x0100 != 0,
        recursion_available: hdr.flags & 0x0080 != 0,
        rcode: (hdr.flags & 0x000f) as u8,
        question_count: hdr.qdcount,
        answer_count: hdr.ancount,
        authority_count: hdr.nscount,
        additional_count: hdr.arcount,
        questions: Vec::new(),
        answers: Vec::new(),
        name_truncated: false,
        answer_error: None,
    };

    let mut offset = HEADER_LENGTH;
    for _ in 0..hdr.qdcount {
        let name = read_name(msg, offset)?;
        dns.name_truncated |= name.truncated;
        let tail = msg.get(name.next..).unwrap_or_default();
        let (_, (qtype, qclass)) =
            parse_question_tail(tail).map_err(|_| "question section truncated".to_string())?;
        dns.questions.push(DnsQuestion {
            name: name.name,
            qtype,
            qclass,
        });
        offset = name.next + 4;
    }

    if let Err(reason) = parse_answers(msg, offset, hdr.ancount, &mut dns) {
        debug!("DNS 0x{:04x}: {} ({} answers kept)", dns.id, reason, dns.answers.len());
        dns.answer_error = Some(reason);
    }

    Ok(dns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(id: u16, flags: u16, name: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&id.to_be_bytes());
        v.extend_from_slice(&flags.to_be_bytes());
        v.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 0]);
        v.extend_from_slice(name);
        v.extend_from_slice(&[0, 1, 0, 1]);
        v
    }

    const EXAMPLE_COM: &[u8] = b"\x07example\x03com\x00";

    #[test]
    fn simple_query() {
        let msg = query(0x1a2b, 0x0100, EXAMPLE_COM);
        let dns = parse_dns(&msg).expect("query");
        assert_eq!(dns.id, 0x1a2b);
        assert!(!dns.is_response);
        assert!(dns.recursion_desired);
        assert_eq!(dns.query_name(), Some("example.com"));
        assert_eq!(dns.summary(), "Standard query 0x1a2b A example.com");
    }

    #[test]
    fn compressed_answer() {
        let mut msg = query(7, 0x8180, EXAMPLE_COM);
        msg[7] = 1; // ancount
        // pointer to the question name at offset 12
        msg.extend_from_slice(&[0xc0, 0x0c, 0, 1, 0, 1, 0, 0, 0x0e, 0x10, 0, 4]);
        msg.extend_from_slice(&[93, 184, 216, 34]);
        let dns = parse_dns(&msg).expect("response");
        assert!(dns.is_response);
        assert_eq!(dns.answers.len(), 1);
        assert_eq!(dns.answers[0].name, "example.com");
        assert_eq!(dns.answers[0].ttl, 3600);
        assert_eq!(dns.answers[0].data, "93.184.216.34");
        assert!(!dns.name_truncated);
        assert!(dns.answer_error.is_none());
    }

    #[test]
    fn nxdomain_rcode() {
        let msg = query(9, 0x8183, EXAMPLE_COM);
        let dns = parse_dns(&msg).expect("response");
        assert_eq!(dns.rcode, 3);
        assert_eq!(dns.rcode_name(), "NXDOMAIN");
        assert!(dns.summary().contains("No such name"));
    }

    #[test]
    fn broken_answer_keeps_header() {
        let mut msg = query(9, 0x8183, EXAMPLE_COM);
        msg[7] = 1; // ancount
        // record claims 4 bytes of data but carries 2
        msg.extend_from_slice(&[0xc0, 0x0c, 0, 1, 0, 1, 0, 0, 0x0e, 0x10, 0, 4, 93, 184]);
        let dns = parse_dns(&msg).expect("header and questions");
        assert_eq!(dns.rcode, 3);
        assert_eq!(dns.answer_count, 1);
        assert_eq!(dns.questions.len(), 1);
        assert!(dns.answers.is_empty());
        assert_eq!(dns.answer_error.as_deref(), Some("answer record data truncated"));
        assert!(dns.summary().contains("No such name"));
    }

    #[test]
    fn self_pointer_terminates() {
        // question name is a pointer to itself
        let msg = query(1, 0x0100, &[0xc0, 0x0c]);
        let dns = parse_dns(&msg).expect("bounded");
        assert!(dns.name_truncated);
        assert_eq!(dns.questions.len(), 1);
        assert_eq!(dns.questions[0].qtype, 1);
    }

    #[test]
    fn overlong_name_is_truncated() {
        let mut name = Vec::new();
        for _ in 0..10 {
            name.push(30);
            name.extend_from_slice(&[b'a'; 30]);
        }
        name.push(0);
        let msg = query(2, 0x0100, &name);
        let dns = parse_dns(&msg).expect("bounded");
        assert!(dns.name_truncated);
        assert!(dns.questions[0].name.len() <= MAX_NAME_LENGTH);
    }

    #[test]
    fn truncated_sections_are_errors() {
        assert!(parse_dns(&[0u8; 11]).is_err());
        let msg = query(3, 0x0100, EXAMPLE_COM);
        assert!(parse_dns(&msg[..msg.len() - 2]).is_err());
    }

    #[test]
    fn tcp_length_prefix() {
        let msg = query(4, 0x0100, EXAMPLE_COM);
        let mut payload = (msg.len() as u16).to_be_bytes().to_vec();
        payload.extend_from_slice(&msg);
        let layer = DnsDecoder
            .decode(&L4Info::tcp(50000, 53), &payload)
            .expect("decoded");
        match layer {
            Some(ApplicationLayer::Dns(dns)) => assert_eq!(dns.id, 4),
            other => panic!("unexpected layer {:?}", other),
        }
    }
}
