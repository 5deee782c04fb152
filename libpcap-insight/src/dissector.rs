use crate::decoders::{default_decoders, ApplicationDecoder, L4Info};
use crate::layers::*;
use crate::packet::{Packet, Protocol, Warning};
use libpcap_tools::{Config, Frame, Linktype};
use pnet_packet::arp::ArpPacket;
use pnet_packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet_packet::icmp::IcmpPacket;
use pnet_packet::icmpv6::Icmpv6Packet;
use pnet_packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet_packet::ipv4::{Ipv4Flags, Ipv4Packet};
use pnet_packet::ipv6::Ipv6Packet;
use pnet_packet::tcp::TcpPacket;
use pnet_packet::udp::UdpPacket;
use pnet_packet::vlan::VlanPacket;
use tracing::{debug, trace, warn};

const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88a8;
const ETHERTYPE_QINQ_LEGACY: u16 = 0x9100;
/// Nested VLAN tags unwrapped before giving up
const MAX_VLAN_DEPTH: usize = 2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DissectorConfig {
    /// Bytes of HTTP body kept as preview
    pub http_body_preview: usize,
}

impl Default for DissectorConfig {
    fn default() -> Self {
        DissectorConfig {
            http_body_preview: 256,
        }
    }
}

impl DissectorConfig {
    pub fn from_config(config: &Config) -> Self {
        let default = DissectorConfig::default();
        DissectorConfig {
            http_body_preview: config
                .get_usize("dissector.http_body_preview")
                .unwrap_or(default.http_body_preview),
        }
    }
}

/// Decodes frames into packets, layer by layer
///
/// Dissection never fails: anything that does not decode is recorded as a
/// warning on the packet and the layers decoded so far are kept.
pub struct Dissector {
    decoders: Vec<Box<dyn ApplicationDecoder>>,
}

/// Per-frame state while walking down the layers
struct Dissection {
    index: usize,
    layers: Layers,
    warnings: Vec<Warning>,
}

impl Dissection {
    fn decode_warning(&mut self, layer: &'static str, reason: String) {
        warn!("frame {}: {}: {}", self.index, layer, reason);
        self.warnings.push(Warning::Decode { layer, reason });
    }
}

impl Default for Dissector {
    fn default() -> Self {
        Dissector::new(&DissectorConfig::default())
    }
}

impl Dissector {
    pub fn new(config: &DissectorConfig) -> Self {
        Dissector {
            decoders: default_decoders(config.http_body_preview),
        }
    }

    pub fn dissect(&self, frame: &Frame, id: usize) -> Packet {
        let mut packet = Packet::new(id, frame.ts, frame.origlen, frame.data);
        if frame.truncated {
            packet.flags.is_truncated = true;
            packet.add_warning(Warning::Truncated {
                captured: frame.data.len() as u32,
                declared: frame.caplen,
            });
        }
        let mut d = Dissection {
            index: frame.index,
            layers: Layers::default(),
            warnings: Vec::new(),
        };
        self.handle_l2(&mut d, frame.link_type, frame.data);

        let (pointer_loop, answer_error) = match d.layers.dns() {
            Some(dns) => (dns.name_truncated, dns.answer_error.clone()),
            None => (false, None),
        };
        if pointer_loop {
            d.warnings.push(Warning::DnsPointerLoop);
        }
        if let Some(reason) = answer_error {
            d.decode_warning("dns", reason);
        }
        for w in d.warnings {
            packet.add_warning(w);
        }
        let (source, destination) = endpoints(&d.layers);
        packet.source = source;
        packet.destination = destination;
        packet.protocol = top_protocol(&d.layers);
        packet.info = info(&d.layers);
        packet.layers = d.layers;
        packet
    }

    fn handle_l2(&self, d: &mut Dissection, link_type: Linktype, data: &[u8]) {
        trace!("handle_l2 (idx={}, linktype={})", d.index, link_type);
        match link_type {
            Linktype::ETHERNET => self.handle_l2_ethernet(d, data),
            Linktype::NULL | Linktype(108) => {
                if data.len() < 4 {
                    d.layers.link = Some(LinkLayer::Loopback { family: 0 });
                    d.decode_warning("loopback", "header shorter than 4 bytes".to_string());
                    return;
                }
                // the family is written in the byte order of the capturing host
                let mut family = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                if family > 0xffff {
                    family = family.swap_bytes();
                }
                d.layers.link = Some(LinkLayer::Loopback { family });
                let ethertype = match family {
                    2 => EtherTypes::Ipv4,
                    10 | 24 | 28 | 30 => EtherTypes::Ipv6,
                    _ => {
                        warn!("Loopback: unsupported address family {}", family);
                        return;
                    }
                };
                self.handle_l3(d, &data[4..], ethertype);
            }
            Linktype::RAW | Linktype::IPV4 | Linktype::IPV6 => {
                d.layers.link = Some(LinkLayer::Raw);
                match data.first().map(|b| b >> 4) {
                    Some(4) => self.handle_l3(d, data, EtherTypes::Ipv4),
                    Some(6) => self.handle_l3(d, data, EtherTypes::Ipv6),
                    _ => d.decode_warning("raw", "not an IP packet".to_string()),
                }
            }
            Linktype::LINUX_SLL => {
                if data.len() < 16 {
                    d.layers.link = Some(LinkLayer::LinuxSll { protocol: 0 });
                    d.decode_warning("sll", "header shorter than 16 bytes".to_string());
                    return;
                }
                let protocol = u16::from_be_bytes([data[14], data[15]]);
                d.layers.link = Some(LinkLayer::LinuxSll { protocol });
                self.handle_l3(d, &data[16..], EtherType(protocol));
            }
            l => {
                warn!("Unsupported link type {}", l);
                d.layers.link = Some(LinkLayer::Unknown { link_type: l.0 });
            }
        }
    }

    fn handle_l2_ethernet(&self, d: &mut Dissection, data: &[u8]) {
        let eth = match EthernetPacket::new(data) {
            Some(eth) => eth,
            None => {
                d.decode_warning("ethernet", "frame shorter than 14 bytes".to_string());
                return;
            }
        };
        let mut ethertype = eth.get_ethertype();
        let mut payload = &data[EthernetPacket::minimum_packet_size()..];
        let mut vlan_ids = Vec::new();
        while matches!(
            ethertype.0,
            ETHERTYPE_VLAN | ETHERTYPE_QINQ | ETHERTYPE_QINQ_LEGACY
        ) {
            if vlan_ids.len() == MAX_VLAN_DEPTH {
                debug!("frame {}: more than {} VLAN tags", d.index, MAX_VLAN_DEPTH);
                break;
            }
            match VlanPacket::new(payload) {
                Some(vlan) => {
                    vlan_ids.push(vlan.get_vlan_identifier());
                    ethertype = vlan.get_ethertype();
                    payload = &payload[VlanPacket::minimum_packet_size()..];
                }
                None => {
                    d.decode_warning("vlan", "802.1Q tag truncated".to_string());
                    break;
                }
            }
        }
        d.layers.link = Some(LinkLayer::Ethernet(EthernetLayer {
            source: eth.get_source().to_string(),
            destination: eth.get_destination().to_string(),
            ethertype: ethertype.0,
            vlan_ids,
        }));
        self.handle_l3(d, payload, ethertype);
    }

    fn handle_l3(&self, d: &mut Dissection, data: &[u8], ethertype: EtherType) {
        match ethertype {
            EtherTypes::Ipv4 => self.handle_l3_ipv4(d, data),
            EtherTypes::Ipv6 => self.handle_l3_ipv6(d, data),
            EtherTypes::Arp => self.handle_l3_arp(d, data),
            _ => {
                debug!("Unsupported ethertype {} (0x{:x})", ethertype, ethertype.0);
                d.layers.network = Some(NetworkLayer::Unknown {
                    ethertype: ethertype.0,
                });
            }
        }
    }

    fn handle_l3_ipv4(&self, d: &mut Dissection, data: &[u8]) {
        trace!("handle_l3_ipv4 (idx={})", d.index);
        let ipv4 = match Ipv4Packet::new(data) {
            Some(ipv4) => ipv4,
            None => {
                d.decode_warning("ipv4", "header shorter than 20 bytes".to_string());
                return;
            }
        };
        if ipv4.get_version() != 4 {
            d.decode_warning("ipv4", format!("unexpected version {}", ipv4.get_version()));
        }
        let header_length = usize::from(ipv4.get_header_length()) * 4;
        let total_length = usize::from(ipv4.get_total_length());
        let flags = ipv4.get_flags();
        let fragment_offset = ipv4.get_fragment_offset() * 8;
        let l4_proto = ipv4.get_next_level_protocol();
        d.layers.network = Some(NetworkLayer::Ipv4(Ipv4Layer {
            version: ipv4.get_version(),
            header_length: header_length as u8,
            ttl: ipv4.get_ttl(),
            protocol: l4_proto.0,
            total_length: ipv4.get_total_length(),
            identification: ipv4.get_identification(),
            dont_fragment: flags & Ipv4Flags::DontFragment != 0,
            more_fragments: flags & Ipv4Flags::MoreFragments != 0,
            fragment_offset,
            source: ipv4.get_source(),
            destination: ipv4.get_destination(),
        }));

        if header_length < 20 || header_length > data.len() {
            d.decode_warning(
                "ipv4",
                format!(
                    "header length {} invalid for {} bytes",
                    header_length,
                    data.len()
                ),
            );
            return;
        }
        // clamp to the buffer, and remove ethernet padding
        let end = if total_length > data.len() {
            d.decode_warning(
                "ipv4",
                format!(
                    "total length {} exceeds {} captured bytes",
                    total_length,
                    data.len()
                ),
            );
            data.len()
        } else if total_length < header_length {
            d.decode_warning(
                "ipv4",
                format!("total length {} below header length", total_length),
            );
            data.len()
        } else {
            total_length
        };
        if fragment_offset > 0 {
            trace!("frame {}: non-first fragment, not decoded", d.index);
            return;
        }
        self.handle_l4(d, &data[header_length..end], l4_proto);
    }

    fn handle_l3_ipv6(&self, d: &mut Dissection, data: &[u8]) {
        trace!("handle_l3_ipv6 (idx={})", d.index);
        let ipv6 = match Ipv6Packet::new(data) {
            Some(ipv6) => ipv6,
            None => {
                d.decode_warning("ipv6", "header shorter than 40 bytes".to_string());
                return;
            }
        };
        let next_header = ipv6.get_next_header();
        let payload_length = usize::from(ipv6.get_payload_length());
        d.layers.network = Some(NetworkLayer::Ipv6(Ipv6Layer {
            next_header: next_header.0,
            payload_length: ipv6.get_payload_length(),
            hop_limit: ipv6.get_hop_limit(),
            source: ipv6.get_source(),
            destination: ipv6.get_destination(),
        }));
        let payload = &data[Ipv6Packet::minimum_packet_size()..];
        let payload = if payload_length > payload.len() {
            d.decode_warning(
                "ipv6",
                format!(
                    "payload length {} exceeds {} captured bytes",
                    payload_length,
                    payload.len()
                ),
            );
            payload
        } else {
            &payload[..payload_length]
        };
        self.handle_l4(d, payload, next_header);
    }

    fn handle_l3_arp(&self, d: &mut Dissection, data: &[u8]) {
        let arp = match ArpPacket::new(data) {
            Some(arp) => arp,
            None => {
                d.decode_warning("arp", "packet shorter than 28 bytes".to_string());
                return;
            }
        };
        d.layers.network = Some(NetworkLayer::Arp(ArpLayer {
            operation: arp.get_operation().0,
            sender_hw: arp.get_sender_hw_addr().to_string(),
            sender_ip: arp.get_sender_proto_addr(),
            target_hw: arp.get_target_hw_addr().to_string(),
            target_ip: arp.get_target_proto_addr(),
        }));
    }

    fn handle_l4(&self, d: &mut Dissection, data: &[u8], l4_proto: IpNextHeaderProtocol) {
        match l4_proto {
            IpNextHeaderProtocols::Tcp => self.handle_l4_tcp(d, data),
            IpNextHeaderProtocols::Udp => self.handle_l4_udp(d, data),
            IpNextHeaderProtocols::Icmp => self.handle_l4_icmp(d, data),
            IpNextHeaderProtocols::Icmpv6 => self.handle_l4_icmpv6(d, data),
            _ => {
                debug!("Unsupported L4 proto {}", l4_proto);
                d.layers.transport = Some(TransportLayer::Unknown {
                    protocol: l4_proto.0,
                });
            }
        }
    }

    fn handle_l4_tcp(&self, d: &mut Dissection, data: &[u8]) {
        trace!("handle_l4_tcp (idx={})", d.index);
        let tcp = match TcpPacket::new(data) {
            Some(tcp) => tcp,
            None => {
                d.decode_warning("tcp", "segment shorter than 20 bytes".to_string());
                return;
            }
        };
        let data_offset = usize::from(tcp.get_data_offset()) * 4;
        let payload = if data_offset < 20 || data_offset > data.len() {
            d.decode_warning(
                "tcp",
                format!(
                    "data offset {} invalid for {} bytes",
                    data_offset,
                    data.len()
                ),
            );
            &data[data.len()..]
        } else {
            &data[data_offset..]
        };
        let layer = TcpLayer {
            source_port: tcp.get_source(),
            destination_port: tcp.get_destination(),
            sequence: tcp.get_sequence(),
            acknowledgment: tcp.get_acknowledgement(),
            flags: TcpFlags::from_bits(tcp.get_flags() as u16),
            window: tcp.get_window(),
            data_offset: data_offset as u8,
            payload_length: payload.len(),
        };
        let l4 = L4Info::tcp(layer.source_port, layer.destination_port);
        d.layers.transport = Some(TransportLayer::Tcp(layer));
        self.handle_l7(d, &l4, payload);
    }

    fn handle_l4_udp(&self, d: &mut Dissection, data: &[u8]) {
        trace!("handle_l4_udp (idx={})", d.index);
        let udp = match UdpPacket::new(data) {
            Some(udp) => udp,
            None => {
                d.decode_warning("udp", "datagram shorter than 8 bytes".to_string());
                return;
            }
        };
        let declared = usize::from(udp.get_length());
        let end = if declared < 8 {
            d.decode_warning("udp", format!("declared length {} below 8", declared));
            data.len()
        } else if declared > data.len() {
            d.decode_warning(
                "udp",
                format!(
                    "declared length {} exceeds {} captured bytes",
                    declared,
                    data.len()
                ),
            );
            data.len()
        } else {
            declared
        };
        let payload = &data[8..end];
        let layer = UdpLayer {
            source_port: udp.get_source(),
            destination_port: udp.get_destination(),
            length: udp.get_length(),
            payload_length: payload.len(),
        };
        let l4 = L4Info::udp(layer.source_port, layer.destination_port);
        d.layers.transport = Some(TransportLayer::Udp(layer));
        self.handle_l7(d, &l4, payload);
    }

    fn handle_l4_icmp(&self, d: &mut Dissection, data: &[u8]) {
        match IcmpPacket::new(data) {
            Some(icmp) => {
                d.layers.transport = Some(TransportLayer::Icmp(IcmpLayer {
                    version: 4,
                    icmp_type: icmp.get_icmp_type().0,
                    code: icmp.get_icmp_code().0,
                }))
            }
            None => d.decode_warning("icmp", "message shorter than 4 bytes".to_string()),
        }
    }

    fn handle_l4_icmpv6(&self, d: &mut Dissection, data: &[u8]) {
        match Icmpv6Packet::new(data) {
            Some(icmp) => {
                d.layers.transport = Some(TransportLayer::Icmp(IcmpLayer {
                    version: 6,
                    icmp_type: icmp.get_icmpv6_type().0,
                    code: icmp.get_icmpv6_code().0,
                }))
            }
            None => d.decode_warning("icmpv6", "message shorter than 4 bytes".to_string()),
        }
    }

    fn handle_l7(&self, d: &mut Dissection, l4: &L4Info, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }
        for decoder in self.decoders.iter() {
            if !decoder.probe(l4, payload) {
                continue;
            }
            match decoder.decode(l4, payload) {
                Ok(Some(layer)) => {
                    trace!("frame {}: decoded as {}", d.index, decoder.name());
                    d.layers.application = Some(layer);
                    return;
                }
                Ok(None) => (),
                Err(reason) => {
                    d.decode_warning(decoder.name(), reason);
                    return;
                }
            }
        }
    }
}

/// IP addresses if present, else hardware addresses
fn endpoints(layers: &Layers) -> (String, String) {
    if let Some((src, dst)) = layers.network.as_ref().and_then(|n| n.addresses()) {
        return (src.to_string(), dst.to_string());
    }
    if let Some(arp) = layers.arp() {
        return (arp.sender_ip.to_string(), arp.target_ip.to_string());
    }
    match layers.ethernet() {
        Some(eth) => (eth.source.clone(), eth.destination.clone()),
        None => (String::new(), String::new()),
    }
}

fn top_protocol(layers: &Layers) -> Protocol {
    match layers.application {
        Some(ApplicationLayer::Http(_)) => return Protocol::Http,
        Some(ApplicationLayer::Dns(_)) => return Protocol::Dns,
        Some(ApplicationLayer::Tls(_)) => return Protocol::Tls,
        None => (),
    }
    match layers.transport {
        Some(TransportLayer::Tcp(_)) => return Protocol::Tcp,
        Some(TransportLayer::Udp(_)) => return Protocol::Udp,
        Some(TransportLayer::Icmp(_)) => return Protocol::Icmp,
        _ => (),
    }
    match layers.network {
        Some(NetworkLayer::Ipv4(_)) => return Protocol::Ipv4,
        Some(NetworkLayer::Ipv6(_)) => return Protocol::Ipv6,
        Some(NetworkLayer::Arp(_)) => return Protocol::Arp,
        _ => (),
    }
    match layers.link {
        Some(LinkLayer::Ethernet(_)) => Protocol::Ethernet,
        _ => Protocol::Unknown,
    }
}

fn icmp_info(icmp: &IcmpLayer) -> String {
    let name = match (icmp.version, icmp.icmp_type) {
        (4, 0) | (6, 129) => "Echo (ping) reply",
        (4, 8) | (6, 128) => "Echo (ping) request",
        (4, 3) | (6, 1) => "Destination unreachable",
        (4, 11) | (6, 3) => "Time exceeded",
        (6, 135) => "Neighbor Solicitation",
        (6, 136) => "Neighbor Advertisement",
        _ => return format!("type={} code={}", icmp.icmp_type, icmp.code),
    };
    format!("{} (code={})", name, icmp.code)
}

/// One-line description of the top-most layer
fn info(layers: &Layers) -> String {
    match layers.application {
        Some(ApplicationLayer::Http(ref http)) => return http.summary(),
        Some(ApplicationLayer::Dns(ref dns)) => return dns.summary(),
        Some(ApplicationLayer::Tls(ref tls)) => return tls.summary(),
        None => (),
    }
    match layers.transport {
        Some(TransportLayer::Tcp(ref tcp)) => {
            return format!(
                "{} → {} {} Seq={} Ack={} Win={} Len={}",
                tcp.source_port,
                tcp.destination_port,
                tcp.flags,
                tcp.sequence,
                tcp.acknowledgment,
                tcp.window,
                tcp.payload_length
            )
        }
        Some(TransportLayer::Udp(ref udp)) => {
            return format!(
                "{} → {} Len={}",
                udp.source_port, udp.destination_port, udp.payload_length
            )
        }
        Some(TransportLayer::Icmp(ref icmp)) => return icmp_info(icmp),
        Some(TransportLayer::Unknown { protocol }) => return format!("IP protocol {}", protocol),
        None => (),
    }
    match layers.network {
        Some(NetworkLayer::Ipv4(ref ip)) if ip.fragment_offset > 0 => {
            return format!(
                "Fragmented IP protocol (proto={}, off={}, ID={:04x})",
                ip.protocol, ip.fragment_offset, ip.identification
            )
        }
        Some(NetworkLayer::Ipv4(ref ip)) => return format!("IPv4 protocol {}", ip.protocol),
        Some(NetworkLayer::Ipv6(ref ip)) => return format!("IPv6 next header {}", ip.next_header),
        Some(NetworkLayer::Arp(ref arp)) => {
            return match arp.operation {
                1 => format!("Who has {}? Tell {}", arp.target_ip, arp.sender_ip),
                2 => format!("{} is at {}", arp.sender_ip, arp.sender_hw),
                op => format!("ARP operation {}", op),
            }
        }
        Some(NetworkLayer::Unknown { ethertype }) => {
            return format!("Ethertype 0x{:04x}", ethertype)
        }
        None => (),
    }
    match layers.link {
        Some(LinkLayer::Unknown { link_type }) => format!("Link type {}", link_type),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libpcap_tools::Duration;

    fn frame(link_type: Linktype, data: &[u8]) -> Frame {
        Frame {
            index: 0,
            ts: Duration::new(1, 0),
            link_type,
            data,
            caplen: data.len() as u32,
            origlen: data.len() as u32,
            truncated: false,
        }
    }

    fn ipv4_udp(payload: &[u8]) -> Vec<u8> {
        let total = (20 + 8 + payload.len()) as u16;
        let mut v = vec![0x45, 0, 0, 0, 0, 1, 0x40, 0, 64, 17, 0, 0, 10, 0, 0, 1, 10, 0, 0, 2];
        v[2..4].copy_from_slice(&total.to_be_bytes());
        v.extend_from_slice(&5353u16.to_be_bytes());
        v.extend_from_slice(&9999u16.to_be_bytes());
        v.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
        v.extend_from_slice(&[0, 0]);
        v.extend_from_slice(payload);
        v
    }

    #[test]
    fn raw_ip_udp() {
        let data = ipv4_udp(b"hello");
        let p = Dissector::default().dissect(&frame(Linktype::RAW, &data), 3);
        assert_eq!(p.id, 3);
        assert_eq!(p.protocol, Protocol::Udp);
        assert_eq!(p.source, "10.0.0.1");
        assert_eq!(p.destination, "10.0.0.2");
        assert_eq!(p.layers.udp().map(|u| u.payload_length), Some(5));
        assert_eq!(p.info, "5353 → 9999 Len=5");
        assert!(!p.flags.has_error);
    }

    #[test]
    fn unsupported_link_type_is_kept() {
        let p = Dissector::default().dissect(&frame(Linktype(147), &[1, 2, 3]), 0);
        assert_eq!(p.protocol, Protocol::Unknown);
        assert_eq!(p.layers.link, Some(LinkLayer::Unknown { link_type: 147 }));
        assert!(p.layers.network.is_none());
        assert_eq!(p.raw(), &[1, 2, 3]);
    }

    #[test]
    fn ipv4_total_length_clamped() {
        let mut data = ipv4_udp(b"abcd");
        data[2..4].copy_from_slice(&200u16.to_be_bytes());
        let p = Dissector::default().dissect(&frame(Linktype::RAW, &data), 0);
        assert!(p.flags.has_error);
        assert!(p.layers.udp().is_some());
        assert!(matches!(
            p.warnings[0],
            Warning::Decode { layer: "ipv4", .. }
        ));
    }

    #[test]
    fn loopback_family_host_order() {
        let mut data = vec![2, 0, 0, 0];
        data.extend_from_slice(&ipv4_udp(b""));
        let p = Dissector::default().dissect(&frame(Linktype::NULL, &data), 0);
        assert_eq!(p.layers.link, Some(LinkLayer::Loopback { family: 2 }));
        assert!(p.layers.udp().is_some());
        let mut data = vec![0, 0, 0, 2];
        data.extend_from_slice(&ipv4_udp(b""));
        let p = Dissector::default().dissect(&frame(Linktype::NULL, &data), 0);
        assert_eq!(p.layers.link, Some(LinkLayer::Loopback { family: 2 }));
    }

    #[test]
    fn short_ethernet_frame() {
        let p = Dissector::default().dissect(&frame(Linktype::ETHERNET, &[0u8; 10]), 0);
        assert!(p.flags.has_error);
        assert!(p.layers.link.is_none());
        assert_eq!(p.protocol, Protocol::Unknown);
    }
}
