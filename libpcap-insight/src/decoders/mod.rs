//! Application-layer decoders
//!
//! Decoders are probed in a fixed order on each TCP or UDP payload; the first
//! one producing a layer wins. No stream reassembly is done, so only messages
//! fitting in a single segment are decoded.

pub mod dns;
pub mod http;
pub mod tls;

use crate::layers::ApplicationLayer;

/// Transport protocol carrying a payload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum L4Proto {
    Tcp,
    Udp,
}

/// Transport context handed to decoders
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct L4Info {
    pub proto: L4Proto,
    pub src_port: u16,
    pub dst_port: u16,
}

impl L4Info {
    pub fn tcp(src_port: u16, dst_port: u16) -> Self {
        L4Info {
            proto: L4Proto::Tcp,
            src_port,
            dst_port,
        }
    }

    pub fn udp(src_port: u16, dst_port: u16) -> Self {
        L4Info {
            proto: L4Proto::Udp,
            src_port,
            dst_port,
        }
    }

    /// true if either port is in `ports`
    pub fn has_port(&self, ports: &[u16]) -> bool {
        ports.contains(&self.src_port) || ports.contains(&self.dst_port)
    }
}

/// `Ok(None)`: not this protocol. `Err`: claims to be this protocol, but is malformed.
pub type DecodeResult = Result<Option<ApplicationLayer>, String>;

pub trait ApplicationDecoder: Send + Sync {
    /// Name used in decode warnings
    fn name(&self) -> &'static str;

    /// Cheap test on ports and leading bytes
    fn probe(&self, l4: &L4Info, payload: &[u8]) -> bool;

    fn decode(&self, l4: &L4Info, payload: &[u8]) -> DecodeResult;
}

/// DNS, TLS then HTTP
pub fn default_decoders(http_body_preview: usize) -> Vec<Box<dyn ApplicationDecoder>> {
    vec![
        Box::new(dns::DnsDecoder),
        Box::new(tls::TlsDecoder),
        Box::new(http::HttpDecoder::new(http_body_preview)),
    ]
}
