use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// Transport endpoints of a packet: addresses, ports, and the IP protocol number
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FiveTuple {
    pub proto: u8,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
}

pub trait ToFiveTuple {
    fn get_five_tuple(&self) -> Option<FiveTuple>;
}

impl FiveTuple {
    pub fn new(proto: u8, src: IpAddr, dst: IpAddr, src_port: u16, dst_port: u16) -> Self {
        FiveTuple {
            proto,
            src,
            dst,
            src_port,
            dst_port,
        }
    }

    pub fn get_reverse(&self) -> FiveTuple {
        FiveTuple {
            proto: self.proto,
            src: self.dst,
            dst: self.src,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }

    /// Direction-independent key: the smaller of the tuple and its reverse
    pub fn canonical(&self) -> FiveTuple {
        let rev = self.get_reverse();
        if *self <= rev {
            self.clone()
        } else {
            rev
        }
    }

    fn proto_name(&self) -> Option<&'static str> {
        match self.proto {
            1 => Some("ICMP"),
            6 => Some("TCP"),
            17 => Some("UDP"),
            58 => Some("ICMPv6"),
            _ => None,
        }
    }
}

impl Default for FiveTuple {
    fn default() -> Self {
        FiveTuple {
            proto: 0,
            src: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dst: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            src_port: 0,
            dst_port: 0,
        }
    }
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[{}]:{} -> [{}]:{} ",
            self.src, self.src_port, self.dst, self.dst_port
        )?;
        match self.proto_name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "[{}]", self.proto),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_tuple_reverse() {
        let src: IpAddr = "10.0.0.1".parse().unwrap();
        let dst: IpAddr = "10.0.0.2".parse().unwrap();
        let t5 = FiveTuple::new(6, src, dst, 40000, 80);
        let rev = t5.get_reverse();
        assert_eq!(rev.src_port, 80);
        assert_eq!(rev.dst, src);
        assert_eq!(rev.get_reverse(), t5);
        assert_eq!(t5.canonical(), rev.canonical());
        assert_eq!(t5.to_string(), "[10.0.0.1]:40000 -> [10.0.0.2]:80 TCP");
        let other = FiveTuple::new(132, src, dst, 1, 2);
        assert_eq!(other.to_string(), "[10.0.0.1]:1 -> [10.0.0.2]:2 [132]");
    }
}
