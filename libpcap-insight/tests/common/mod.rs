//! Byte-level builders for synthetic captures
#![allow(dead_code)]

pub const CLIENT: [u8; 4] = [192, 168, 1, 10];
pub const SERVER: [u8; 4] = [93, 184, 216, 34];
pub const RESOLVER: [u8; 4] = [192, 168, 1, 1];

pub const FIN: u8 = 0x01;
pub const SYN: u8 = 0x02;
pub const RST: u8 = 0x04;
pub const PSH: u8 = 0x08;
pub const ACK: u8 = 0x10;

/// Little-endian legacy pcap, microsecond timestamps
pub struct PcapBuilder {
    data: Vec<u8>,
}

impl PcapBuilder {
    pub fn new(linktype: u32) -> Self {
        let mut data = vec![0xd4, 0xc3, 0xb2, 0xa1, 2, 0, 4, 0];
        data.extend_from_slice(&[0; 8]);
        data.extend_from_slice(&65535u32.to_le_bytes());
        data.extend_from_slice(&linktype.to_le_bytes());
        PcapBuilder { data }
    }

    pub fn ethernet() -> Self {
        PcapBuilder::new(1)
    }

    /// Append a record; `millis` is the offset from a fixed start time
    pub fn record(mut self, millis: u64, frame: &[u8]) -> Self {
        let ts = 1_700_000_000_000_000u64 + millis * 1000;
        let secs = (ts / 1_000_000) as u32;
        let micros = (ts % 1_000_000) as u32;
        self.data.extend_from_slice(&secs.to_le_bytes());
        self.data.extend_from_slice(&micros.to_le_bytes());
        self.data.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        self.data.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        self.data.extend_from_slice(frame);
        self
    }

    /// Append raw bytes, to build broken captures
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.data.extend_from_slice(bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

/// Little-endian pcap-ng with one Ethernet interface, microsecond timestamps
pub struct PcapNgBuilder {
    data: Vec<u8>,
}

impl PcapNgBuilder {
    pub fn ethernet() -> Self {
        let mut shb = 0x1a2b_3c4du32.to_le_bytes().to_vec();
        shb.extend_from_slice(&[1, 0, 0, 0]);
        shb.extend_from_slice(&(-1i64).to_le_bytes());
        let mut idb = vec![1, 0, 0, 0];
        idb.extend_from_slice(&65535u32.to_le_bytes());
        let builder = PcapNgBuilder { data: Vec::new() };
        builder.block(0x0a0d_0d0a, &shb).block(1, &idb)
    }

    fn block(mut self, block_type: u32, body: &[u8]) -> Self {
        let padded = (body.len() + 3) & !3;
        let total = (12 + padded) as u32;
        self.data.extend_from_slice(&block_type.to_le_bytes());
        self.data.extend_from_slice(&total.to_le_bytes());
        self.data.extend_from_slice(body);
        self.data.resize(self.data.len() + padded - body.len(), 0);
        self.data.extend_from_slice(&total.to_le_bytes());
        self
    }

    /// Append an Enhanced Packet Block on interface 0
    pub fn record(self, millis: u64, frame: &[u8]) -> Self {
        let ts = 1_700_000_000_000_000u64 + millis * 1000;
        let mut body = 0u32.to_le_bytes().to_vec();
        body.extend_from_slice(&((ts >> 32) as u32).to_le_bytes());
        body.extend_from_slice(&(ts as u32).to_le_bytes());
        body.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        body.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        body.extend_from_slice(frame);
        self.block(6, &body)
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

pub fn ethernet(ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut v = vec![0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb];
    v.extend_from_slice(&ethertype.to_be_bytes());
    v.extend_from_slice(payload);
    v
}

/// Ethernet frame with one 802.1Q tag
pub fn ethernet_vlan(vlan_id: u16, ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut tagged = vlan_id.to_be_bytes().to_vec();
    tagged.extend_from_slice(&ethertype.to_be_bytes());
    tagged.extend_from_slice(payload);
    ethernet(0x8100, &tagged)
}

pub fn ipv4(proto: u8, src: [u8; 4], dst: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let total = (20 + payload.len()) as u16;
    let mut v = vec![0x45, 0];
    v.extend_from_slice(&total.to_be_bytes());
    v.extend_from_slice(&[0x12, 0x34, 0x40, 0x00, 64, proto, 0, 0]);
    v.extend_from_slice(&src);
    v.extend_from_slice(&dst);
    v.extend_from_slice(payload);
    v
}

pub fn tcp(sport: u16, dport: u16, seq: u32, ack: u32, flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(&sport.to_be_bytes());
    v.extend_from_slice(&dport.to_be_bytes());
    v.extend_from_slice(&seq.to_be_bytes());
    v.extend_from_slice(&ack.to_be_bytes());
    v.extend_from_slice(&[0x50, flags, 0xff, 0xff, 0, 0, 0, 0]);
    v.extend_from_slice(payload);
    v
}

pub fn udp(sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(&sport.to_be_bytes());
    v.extend_from_slice(&dport.to_be_bytes());
    v.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    v.extend_from_slice(&[0, 0]);
    v.extend_from_slice(payload);
    v
}

/// Ethernet / IPv4 / TCP frame
#[allow(clippy::too_many_arguments)]
pub fn tcp_frame(
    src: [u8; 4],
    dst: [u8; 4],
    sport: u16,
    dport: u16,
    seq: u32,
    ack: u32,
    flags: u8,
    payload: &[u8],
) -> Vec<u8> {
    ethernet(
        0x0800,
        &ipv4(6, src, dst, &tcp(sport, dport, seq, ack, flags, payload)),
    )
}

/// Ethernet / IPv4 / UDP frame
pub fn udp_frame(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
    ethernet(0x0800, &ipv4(17, src, dst, &udp(sport, dport, payload)))
}

fn dns_name(name: &str) -> Vec<u8> {
    let mut v = Vec::new();
    for label in name.split('.') {
        v.push(label.len() as u8);
        v.extend_from_slice(label.as_bytes());
    }
    v.push(0);
    v
}

pub fn dns_query(id: u16, name: &str) -> Vec<u8> {
    let mut v = id.to_be_bytes().to_vec();
    v.extend_from_slice(&[0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0]);
    v.extend_from_slice(&dns_name(name));
    v.extend_from_slice(&[0, 1, 0, 1]);
    v
}

/// Response with the given RCODE; an A answer is added when `answer` is set
pub fn dns_response(id: u16, name: &str, rcode: u8, answer: Option<[u8; 4]>) -> Vec<u8> {
    let ancount = u8::from(answer.is_some());
    let mut v = id.to_be_bytes().to_vec();
    v.extend_from_slice(&[0x81, 0x80 | rcode, 0, 1, 0, ancount, 0, 0, 0, 0]);
    v.extend_from_slice(&dns_name(name));
    v.extend_from_slice(&[0, 1, 0, 1]);
    if let Some(addr) = answer {
        v.extend_from_slice(&[0xc0, 0x0c, 0, 1, 0, 1, 0, 0, 0x0e, 0x10, 0, 4]);
        v.extend_from_slice(&addr);
    }
    v
}

/// Query whose name is a compression pointer to itself
pub fn dns_pointer_loop(id: u16) -> Vec<u8> {
    let mut v = id.to_be_bytes().to_vec();
    v.extend_from_slice(&[0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0]);
    v.extend_from_slice(&[0xc0, 0x0c, 0, 1, 0, 1]);
    v
}

/// TLS ClientHello record with a server_name extension
pub fn client_hello(sni: &str) -> Vec<u8> {
    let name = sni.as_bytes();
    let mut sni_ext = ((name.len() + 3) as u16).to_be_bytes().to_vec();
    sni_ext.push(0);
    sni_ext.extend_from_slice(&(name.len() as u16).to_be_bytes());
    sni_ext.extend_from_slice(name);
    let mut ext = vec![0, 0];
    ext.extend_from_slice(&(sni_ext.len() as u16).to_be_bytes());
    ext.extend_from_slice(&sni_ext);

    let mut body = vec![3, 3];
    body.extend_from_slice(&[0x42; 32]);
    body.push(0);
    body.extend_from_slice(&[0, 4, 0x13, 0x01, 0x13, 0x02]);
    body.extend_from_slice(&[1, 0]);
    body.extend_from_slice(&(ext.len() as u16).to_be_bytes());
    body.extend_from_slice(&ext);

    let mut hs = vec![1];
    hs.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    hs.extend_from_slice(&body);

    let mut record = vec![22, 3, 1];
    record.extend_from_slice(&(hs.len() as u16).to_be_bytes());
    record.extend_from_slice(&hs);
    record
}

/// A small capture mixing DNS, a TCP handshake, HTTP and ICMP
pub fn mixed_capture() -> Vec<u8> {
    PcapBuilder::ethernet()
        .record(0, &udp_frame(CLIENT, RESOLVER, 53000, 53, &dns_query(0x1a2b, "example.com")))
        .record(
            12,
            &udp_frame(
                RESOLVER,
                CLIENT,
                53,
                53000,
                &dns_response(0x1a2b, "example.com", 0, Some(SERVER)),
            ),
        )
        .record(20, &tcp_frame(CLIENT, SERVER, 40000, 80, 1000, 0, SYN, b""))
        .record(45, &tcp_frame(SERVER, CLIENT, 80, 40000, 5000, 1001, SYN | ACK, b""))
        .record(46, &tcp_frame(CLIENT, SERVER, 40000, 80, 1001, 5001, ACK, b""))
        .record(
            50,
            &tcp_frame(
                CLIENT,
                SERVER,
                40000,
                80,
                1001,
                5001,
                PSH | ACK,
                b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n",
            ),
        )
        .record(
            90,
            &tcp_frame(
                SERVER,
                CLIENT,
                80,
                40000,
                5001,
                1049,
                PSH | ACK,
                b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 5\r\n\r\nhello",
            ),
        )
        .record(95, &tcp_frame(CLIENT, SERVER, 40000, 80, 1049, 5080, FIN | ACK, b""))
        .record(
            100,
            &ethernet(
                0x0800,
                &ipv4(1, CLIENT, SERVER, &[8, 0, 0, 0, 0, 1, 0, 1]),
            ),
        )
        .record(110, &ethernet(0x88cc, &[0u8; 20]))
        .build()
}
