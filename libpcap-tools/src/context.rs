use crate::duration::{Duration, MICROS_PER_SEC};
use pcap_parser::Linktype;
use serde::Serialize;

/// Default timestamp resolution: 10^-6 seconds
pub const DEFAULT_TSRESOL: u8 = 6;

/// Capture container format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    Pcap,
    PcapNG,
}

/// Global properties of a capture, taken from its header
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureInfo {
    pub format: CaptureFormat,
    pub big_endian: bool,
    pub version_major: u16,
    pub version_minor: u16,
    /// Maximum captured length of a packet (0 if unknown)
    pub snaplen: u32,
    /// Link type of the first interface, if known
    pub link_type: Option<i32>,
    /// Legacy pcap with nanosecond timestamps
    pub nanosecond: bool,
}

/// Information related to a network interface used for capture
#[derive(Clone, Debug)]
pub struct InterfaceInfo {
    /// The `Linktype` used for data format
    pub link_type: Linktype,
    /// Maximum captured length of a packet
    pub snaplen: u32,
    /// Time resolution, encoded as in the pcapng `if_tsresol` option
    pub if_tsresol: u8,
}

impl Default for InterfaceInfo {
    fn default() -> Self {
        InterfaceInfo {
            link_type: Linktype(0),
            snaplen: 0,
            if_tsresol: DEFAULT_TSRESOL,
        }
    }
}

/// Convert a raw timestamp, counted in units of `if_tsresol`, to a `Duration`.
///
/// If the most significant bit of `if_tsresol` is set, the resolution is a
/// negative power of 2, otherwise a negative power of 10. Unusable resolutions
/// give a null timestamp.
pub fn ts_from_units(raw: u64, if_tsresol: u8) -> Duration {
    let exponent = u32::from(if_tsresol & 0x7f);
    let units_per_sec = if if_tsresol & 0x80 != 0 {
        1u64.checked_shl(exponent)
    } else {
        10u64.checked_pow(exponent)
    };
    let units_per_sec = match units_per_sec {
        Some(u) if u > 0 => u,
        _ => {
            warn!("unusable timestamp resolution 0x{:x}", if_tsresol);
            return Duration::default();
        }
    };
    let secs = raw / units_per_sec;
    let frac = raw % units_per_sec;
    let micros = (u128::from(frac) * u128::from(MICROS_PER_SEC) / u128::from(units_per_sec)) as u32;
    Duration::new(u32::try_from(secs).unwrap_or(u32::MAX), micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ts_resolutions() {
        assert_eq!(ts_from_units(1_500_000, 6), Duration::new(1, 500_000));
        assert_eq!(ts_from_units(2_000_000_123, 9), Duration::new(2, 0));
        // 2^-10 resolution: 1024 units per second
        assert_eq!(ts_from_units(1024 + 512, 0x80 | 10), Duration::new(1, 500_000));
        assert_eq!(ts_from_units(42, 0x7f), Duration::default());
    }
}
