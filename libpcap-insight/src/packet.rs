use crate::layers::Layers;
use libpcap_tools::{Duration, FiveTuple, ToFiveTuple};
use serde::{Serialize, Serializer};
use std::fmt;

/// Resolved top-level protocol of a packet
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    Ethernet,
    Arp,
    Ipv4,
    Ipv6,
    Icmp,
    Tcp,
    Udp,
    Http,
    Dns,
    Tls,
    Unknown,
}

impl Protocol {
    pub fn label(self) -> &'static str {
        match self {
            Protocol::Ethernet => "Ethernet",
            Protocol::Arp => "ARP",
            Protocol::Ipv4 => "IPv4",
            Protocol::Ipv6 => "IPv6",
            Protocol::Icmp => "ICMP",
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Http => "HTTP",
            Protocol::Dns => "DNS",
            Protocol::Tls => "TLS",
            Protocol::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for Protocol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketFlags {
    pub has_error: bool,
    pub is_retransmission: bool,
    pub is_duplicate_ack: bool,
    pub is_reset: bool,
    pub is_truncated: bool,
}

/// Non-fatal condition recorded while building a packet
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Warning {
    /// Fewer bytes were captured than the record declared
    Truncated { captured: u32, declared: u32 },
    /// A layer did not match its expected shape
    Decode { layer: &'static str, reason: String },
    /// A DNS name hit the compression pointer or length bound
    DnsPointerLoop,
    /// The record timestamp was earlier than its predecessor and was raised
    TimestampOutOfOrder { original: Duration },
}

impl Warning {
    /// true if this warning marks the packet as erroneous
    pub fn is_error(&self) -> bool {
        !matches!(self, Warning::TimestampOutOfOrder { .. })
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Warning::Truncated { captured, declared } => {
                write!(f, "record truncated: {} of {} bytes captured", captured, declared)
            }
            Warning::Decode { layer, reason } => write!(f, "{}: {}", layer, reason),
            Warning::DnsPointerLoop => f.write_str("DNS name compression bound exceeded"),
            Warning::TimestampOutOfOrder { original } => write!(
                f,
                "timestamp {}.{:06} earlier than previous record",
                original.secs, original.micros
            ),
        }
    }
}

/// One decoded frame
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    /// 0-based index in capture order
    pub id: usize,
    pub timestamp: Duration,
    /// UTC wall clock time, `HH:MM:SS.ffffff`
    pub time: String,
    pub source: String,
    pub destination: String,
    pub protocol: Protocol,
    /// On-wire length
    pub length: u32,
    pub info: String,
    pub layers: Layers,
    pub flags: PacketFlags,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
    #[serde(serialize_with = "serialize_hex")]
    raw: Vec<u8>,
}

fn serialize_hex<S: Serializer>(raw: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&base16ct::lower::encode_string(raw))
}

impl Packet {
    pub(crate) fn new(id: usize, timestamp: Duration, length: u32, raw: &[u8]) -> Packet {
        Packet {
            id,
            timestamp,
            time: format_time(timestamp),
            source: String::new(),
            destination: String::new(),
            protocol: Protocol::Unknown,
            length,
            info: String::new(),
            layers: Layers::default(),
            flags: PacketFlags::default(),
            warnings: Vec::new(),
            raw: raw.to_vec(),
        }
    }

    /// Captured bytes of the frame
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn add_warning(&mut self, warning: Warning) {
        if warning.is_error() {
            self.flags.has_error = true;
        }
        self.warnings.push(warning);
    }

    /// Raise the timestamp to `floor` if it is earlier
    pub(crate) fn clamp_timestamp(&mut self, floor: Duration) {
        if self.timestamp < floor {
            let original = self.timestamp;
            self.timestamp = floor;
            self.time = format_time(floor);
            self.add_warning(Warning::TimestampOutOfOrder { original });
        }
    }
}

impl ToFiveTuple for Packet {
    fn get_five_tuple(&self) -> Option<FiveTuple> {
        let (src, dst) = self.layers.network.as_ref()?.addresses()?;
        let (src_port, dst_port) = self.layers.ports()?;
        let proto = match self.layers.ipv4() {
            Some(ip) => ip.protocol,
            None => self.layers.ipv6()?.next_header,
        };
        Some(FiveTuple::new(proto, src, dst, src_port, dst_port))
    }
}

/// Format a capture timestamp as UTC `HH:MM:SS.ffffff`
pub fn format_time(ts: Duration) -> String {
    match time::OffsetDateTime::from_unix_timestamp(i64::from(ts.secs)) {
        Ok(dt) => format!(
            "{:02}:{:02}:{:02}.{:06}",
            dt.hour(),
            dt.minute(),
            dt.second(),
            ts.micros
        ),
        Err(_) => format!("{}.{:06}", ts.secs, ts.micros),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_string() {
        // 2021-01-01T12:34:56Z
        let ts = Duration::new(1_609_504_496, 42);
        assert_eq!(format_time(ts), "12:34:56.000042");
    }

    #[test]
    fn out_of_order_timestamp_is_not_an_error() {
        let mut p = Packet::new(0, Duration::new(10, 0), 60, &[0u8; 60]);
        p.clamp_timestamp(Duration::new(11, 5));
        assert_eq!(p.timestamp, Duration::new(11, 5));
        assert!(!p.flags.has_error);
        assert_eq!(p.warnings.len(), 1);
        p.add_warning(Warning::DnsPointerLoop);
        assert!(p.flags.has_error);
    }
}
