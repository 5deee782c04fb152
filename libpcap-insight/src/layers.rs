//! Per-layer records of a decoded frame
//!
//! Each layer slot of [`Layers`] is a tagged enum: the variant tells which
//! protocol was recognized at that layer, and a slot is `None` only when nothing
//! could be decoded there.

use crate::decoders::dns::DnsLayer;
use crate::decoders::http::HttpLayer;
use crate::decoders::tls::TlsLayer;
use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EthernetLayer {
    pub source: String,
    pub destination: String,
    /// Ethertype of the payload, after VLAN tags
    pub ethertype: u16,
    /// 802.1Q / 802.1ad VLAN identifiers, outermost first
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub vlan_ids: Vec<u16>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LinkLayer {
    Ethernet(EthernetLayer),
    /// BSD loopback encapsulation (address family header)
    Loopback { family: u32 },
    /// Linux cooked capture
    LinuxSll { protocol: u16 },
    /// Raw IP, no link-layer header
    Raw,
    Unknown { link_type: i32 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ipv4Layer {
    pub version: u8,
    /// Header length, in bytes
    pub header_length: u8,
    pub ttl: u8,
    pub protocol: u8,
    pub total_length: u16,
    pub identification: u16,
    pub dont_fragment: bool,
    pub more_fragments: bool,
    /// Fragment offset, in bytes
    pub fragment_offset: u16,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ipv6Layer {
    pub next_header: u8,
    pub payload_length: u16,
    pub hop_limit: u8,
    pub source: Ipv6Addr,
    pub destination: Ipv6Addr,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArpLayer {
    pub operation: u16,
    pub sender_hw: String,
    pub sender_ip: Ipv4Addr,
    pub target_hw: String,
    pub target_ip: Ipv4Addr,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NetworkLayer {
    Ipv4(Ipv4Layer),
    Ipv6(Ipv6Layer),
    Arp(ArpLayer),
    Unknown { ethertype: u16 },
}

impl NetworkLayer {
    /// Source and destination addresses, for IP layers
    pub fn addresses(&self) -> Option<(IpAddr, IpAddr)> {
        match self {
            NetworkLayer::Ipv4(ip) => Some((IpAddr::V4(ip.source), IpAddr::V4(ip.destination))),
            NetworkLayer::Ipv6(ip) => Some((IpAddr::V6(ip.source), IpAddr::V6(ip.destination))),
            _ => None,
        }
    }
}

/// The six standard TCP control flags
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
}

impl TcpFlags {
    pub fn from_bits(bits: u16) -> TcpFlags {
        TcpFlags {
            fin: bits & 0x01 != 0,
            syn: bits & 0x02 != 0,
            rst: bits & 0x04 != 0,
            psh: bits & 0x08 != 0,
            ack: bits & 0x10 != 0,
            urg: bits & 0x20 != 0,
        }
    }

    /// true if ACK is the only flag set
    pub fn is_ack_only(&self) -> bool {
        self.ack && !(self.fin || self.syn || self.rst || self.psh || self.urg)
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names = [
            (self.fin, "FIN"),
            (self.syn, "SYN"),
            (self.rst, "RST"),
            (self.psh, "PSH"),
            (self.ack, "ACK"),
            (self.urg, "URG"),
        ];
        let set: Vec<&str> = names.iter().filter(|(b, _)| *b).map(|(_, n)| *n).collect();
        write!(f, "[{}]", set.join(", "))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpLayer {
    pub source_port: u16,
    pub destination_port: u16,
    pub sequence: u32,
    pub acknowledgment: u32,
    pub flags: TcpFlags,
    pub window: u16,
    /// Header length including options, in bytes
    pub data_offset: u8,
    pub payload_length: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UdpLayer {
    pub source_port: u16,
    pub destination_port: u16,
    /// Length declared in the UDP header
    pub length: u16,
    pub payload_length: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IcmpLayer {
    /// 4 for ICMP, 6 for ICMPv6
    pub version: u8,
    pub icmp_type: u8,
    pub code: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransportLayer {
    Tcp(TcpLayer),
    Udp(UdpLayer),
    Icmp(IcmpLayer),
    Unknown { protocol: u8 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ApplicationLayer {
    Http(HttpLayer),
    Dns(DnsLayer),
    Tls(TlsLayer),
}

/// Layers actually present in a frame
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Layers {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkLayer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkLayer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportLayer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<ApplicationLayer>,
}

impl Layers {
    pub fn ethernet(&self) -> Option<&EthernetLayer> {
        match self.link {
            Some(LinkLayer::Ethernet(ref eth)) => Some(eth),
            _ => None,
        }
    }

    pub fn ipv4(&self) -> Option<&Ipv4Layer> {
        match self.network {
            Some(NetworkLayer::Ipv4(ref ip)) => Some(ip),
            _ => None,
        }
    }

    pub fn ipv6(&self) -> Option<&Ipv6Layer> {
        match self.network {
            Some(NetworkLayer::Ipv6(ref ip)) => Some(ip),
            _ => None,
        }
    }

    pub fn arp(&self) -> Option<&ArpLayer> {
        match self.network {
            Some(NetworkLayer::Arp(ref arp)) => Some(arp),
            _ => None,
        }
    }

    pub fn tcp(&self) -> Option<&TcpLayer> {
        match self.transport {
            Some(TransportLayer::Tcp(ref tcp)) => Some(tcp),
            _ => None,
        }
    }

    pub fn udp(&self) -> Option<&UdpLayer> {
        match self.transport {
            Some(TransportLayer::Udp(ref udp)) => Some(udp),
            _ => None,
        }
    }

    pub fn icmp(&self) -> Option<&IcmpLayer> {
        match self.transport {
            Some(TransportLayer::Icmp(ref icmp)) => Some(icmp),
            _ => None,
        }
    }

    pub fn http(&self) -> Option<&HttpLayer> {
        match self.application {
            Some(ApplicationLayer::Http(ref http)) => Some(http),
            _ => None,
        }
    }

    pub fn dns(&self) -> Option<&DnsLayer> {
        match self.application {
            Some(ApplicationLayer::Dns(ref dns)) => Some(dns),
            _ => None,
        }
    }

    pub fn tls(&self) -> Option<&TlsLayer> {
        match self.application {
            Some(ApplicationLayer::Tls(ref tls)) => Some(tls),
            _ => None,
        }
    }

    /// Source and destination ports, for TCP and UDP
    pub fn ports(&self) -> Option<(u16, u16)> {
        match self.transport {
            Some(TransportLayer::Tcp(ref tcp)) => Some((tcp.source_port, tcp.destination_port)),
            Some(TransportLayer::Udp(ref udp)) => Some((udp.source_port, udp.destination_port)),
            _ => None,
        }
    }
}
