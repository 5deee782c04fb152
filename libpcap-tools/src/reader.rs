use crate::context::*;
use crate::duration::Duration;
use crate::error::{Error, FormatError};
use nom::number::complete::u32 as nom_u32;
use nom::number::Endianness;
use nom::IResult;
use pcap_parser::{parse_block_be, parse_block_le, parse_pcap_header, parse_sectionheaderblock};
use pcap_parser::{Block, Linktype};

const PCAP_MAGIC_MICROS: u32 = 0xa1b2_c3d4;
const PCAP_MAGIC_MICROS_SWAPPED: u32 = 0xd4c3_b2a1;
const PCAP_MAGIC_NANOS: u32 = 0xa1b2_3c4d;
const PCAP_MAGIC_NANOS_SWAPPED: u32 = 0x4d3c_b2a1;
const PCAPNG_MAGIC: u32 = 0x0a0d_0d0a;

const PCAP_HEADER_LEN: usize = 24;
const PCAP_RECORD_HEADER_LEN: usize = 16;
const PCAPNG_SHB_MIN_LEN: usize = 28;
const PCAPNG_EPB_TYPE: u32 = 6;

/// One captured frame, borrowed from the capture buffer
#[derive(Clone, Debug)]
pub struct Frame<'a> {
    /// Index of the frame in the capture (0-based)
    pub index: usize,
    pub ts: Duration,
    pub link_type: Linktype,
    /// Captured bytes (at most `caplen`, less if the capture is truncated)
    pub data: &'a [u8],
    pub caplen: u32,
    /// Length of the packet on the wire
    pub origlen: u32,
    /// true if the record declares more bytes than the buffer holds
    pub truncated: bool,
}

struct RecordHeader {
    ts_sec: u32,
    ts_frac: u32,
    caplen: u32,
    origlen: u32,
}

fn parse_record_header(i: &[u8], endian: Endianness) -> IResult<&[u8], RecordHeader> {
    let (i, ts_sec) = nom_u32(endian)(i)?;
    let (i, ts_frac) = nom_u32(endian)(i)?;
    let (i, caplen) = nom_u32(endian)(i)?;
    let (i, origlen) = nom_u32(endian)(i)?;
    Ok((
        i,
        RecordHeader {
            ts_sec,
            ts_frac,
            caplen,
            origlen,
        },
    ))
}

/// Fixed fields of an Enhanced Packet Block, read without its trailer
struct EpbPrefix {
    block_type: u32,
    block_len: u32,
    if_id: u32,
    ts_high: u32,
    ts_low: u32,
    caplen: u32,
    origlen: u32,
}

fn parse_epb_prefix(i: &[u8], endian: Endianness) -> IResult<&[u8], EpbPrefix> {
    let (i, block_type) = nom_u32(endian)(i)?;
    let (i, block_len) = nom_u32(endian)(i)?;
    let (i, if_id) = nom_u32(endian)(i)?;
    let (i, ts_high) = nom_u32(endian)(i)?;
    let (i, ts_low) = nom_u32(endian)(i)?;
    let (i, caplen) = nom_u32(endian)(i)?;
    let (i, origlen) = nom_u32(endian)(i)?;
    Ok((
        i,
        EpbPrefix {
            block_type,
            block_len,
            if_id,
            ts_high,
            ts_low,
            caplen,
            origlen,
        },
    ))
}

/// Byte order of a pcapng section, from the byte-order magic of its header block
fn section_is_big_endian(block: &[u8]) -> Option<bool> {
    match block.get(8..12)? {
        [0x1a, 0x2b, 0x3c, 0x4d] => Some(true),
        [0x4d, 0x3c, 0x2b, 0x1a] => Some(false),
        _ => None,
    }
}

/// Clamp frame data to the declared captured length
fn clamp_caplen(data: &[u8], caplen: usize) -> (&[u8], bool) {
    if caplen > data.len() {
        (data, true)
    } else {
        (&data[..caplen], false)
    }
}

/// Lazy reader over a pcap or pcap-ng capture held in memory
///
/// The reader is an `Iterator` of `Frame`s. It never fails after construction:
/// a truncated or corrupted tail ends the iteration and sets the `truncated()` flag.
///
/// ## example
///
/// ```
/// use libpcap_tools::CaptureReader;
///
/// // global header of an empty little-endian pcap file
/// let mut capture = vec![0xd4, 0xc3, 0xb2, 0xa1, 2, 0, 4, 0];
/// capture.extend_from_slice(&[0; 8]);
/// capture.extend_from_slice(&[0xff, 0xff, 0, 0, 1, 0, 0, 0]);
///
/// let reader = CaptureReader::new(&capture).expect("valid header");
/// assert_eq!(reader.count(), 0);
/// ```
pub struct CaptureReader<'a> {
    data: &'a [u8],
    offset: usize,
    info: CaptureInfo,
    interfaces: Vec<InterfaceInfo>,
    records: usize,
    truncated: bool,
    done: bool,
}

impl<'a> CaptureReader<'a> {
    /// Identify the capture format and parse its global header
    pub fn new(data: &'a [u8]) -> Result<Self, Error> {
        if data.len() < 4 {
            return Err(FormatError::HeaderTooShort {
                needed: 4,
                available: data.len(),
            }
            .into());
        }
        let magic = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        match magic {
            PCAP_MAGIC_MICROS | PCAP_MAGIC_MICROS_SWAPPED | PCAP_MAGIC_NANOS
            | PCAP_MAGIC_NANOS_SWAPPED => Self::new_legacy(data, magic),
            PCAPNG_MAGIC => Self::new_pcapng(data),
            _ => {
                error!("unrecognized capture magic 0x{:08x}", magic);
                Err(FormatError::UnknownMagic(magic).into())
            }
        }
    }

    fn new_legacy(data: &'a [u8], magic: u32) -> Result<Self, Error> {
        if data.len() < PCAP_HEADER_LEN {
            return Err(FormatError::HeaderTooShort {
                needed: PCAP_HEADER_LEN,
                available: data.len(),
            }
            .into());
        }
        let big_endian = magic == PCAP_MAGIC_MICROS || magic == PCAP_MAGIC_NANOS;
        let nanosecond = magic == PCAP_MAGIC_NANOS || magic == PCAP_MAGIC_NANOS_SWAPPED;
        let (_, hdr) = parse_pcap_header(data).map_err(|_| FormatError::UnknownMagic(magic))?;
        debug!(
            "Legacy pcap v{}.{}, link type: {}, snaplen: {}",
            hdr.version_major, hdr.version_minor, hdr.network, hdr.snaplen
        );
        let info = CaptureInfo {
            format: CaptureFormat::Pcap,
            big_endian,
            version_major: hdr.version_major,
            version_minor: hdr.version_minor,
            snaplen: hdr.snaplen,
            link_type: Some(hdr.network.0),
            nanosecond,
        };
        let if_info = InterfaceInfo {
            link_type: hdr.network,
            snaplen: hdr.snaplen,
            if_tsresol: if nanosecond { 9 } else { DEFAULT_TSRESOL },
        };
        Ok(CaptureReader {
            data,
            offset: PCAP_HEADER_LEN,
            info,
            interfaces: vec![if_info],
            records: 0,
            truncated: false,
            done: false,
        })
    }

    fn new_pcapng(data: &'a [u8]) -> Result<Self, Error> {
        if data.len() < PCAPNG_SHB_MIN_LEN {
            return Err(FormatError::HeaderTooShort {
                needed: PCAPNG_SHB_MIN_LEN,
                available: data.len(),
            }
            .into());
        }
        let big_endian = section_is_big_endian(data).ok_or(FormatError::InvalidSectionHeader)?;
        let (rem, shb) =
            parse_sectionheaderblock(data).map_err(|_| FormatError::InvalidSectionHeader)?;
        debug!(
            "pcap-ng v{}.{} ({} endian)",
            shb.major_version,
            shb.minor_version,
            if big_endian { "big" } else { "little" }
        );
        let info = CaptureInfo {
            format: CaptureFormat::PcapNG,
            big_endian,
            version_major: shb.major_version,
            version_minor: shb.minor_version,
            snaplen: 0,
            link_type: None,
            nanosecond: false,
        };
        Ok(CaptureReader {
            data,
            offset: data.len() - rem.len(),
            info,
            interfaces: Vec::new(),
            records: 0,
            truncated: false,
            done: false,
        })
    }

    /// Global capture properties
    pub fn info(&self) -> &CaptureInfo {
        &self.info
    }

    /// Number of frames read so far
    pub fn records(&self) -> usize {
        self.records
    }

    /// true if the capture ended with an incomplete record or block
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    fn stop(&mut self, truncated: bool) {
        self.done = true;
        self.truncated |= truncated;
    }

    fn endianness(&self) -> Endianness {
        if self.info.big_endian {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }

    fn next_legacy(&mut self) -> Option<Frame<'a>> {
        let data = self.data;
        let rem = &data[self.offset..];
        if rem.is_empty() {
            self.stop(false);
            return None;
        }
        let (payload, hdr) = match parse_record_header(rem, self.endianness()) {
            Ok(r) => r,
            Err(_) => {
                warn!(
                    "Incomplete record header (record {}, {} bytes left)",
                    self.records,
                    rem.len()
                );
                self.stop(true);
                return None;
            }
        };
        let (frame_data, truncated) = clamp_caplen(payload, hdr.caplen as usize);
        if truncated {
            warn!(
                "Truncated record {}: caplen {} but only {} bytes left",
                self.records,
                hdr.caplen,
                payload.len()
            );
            self.stop(true);
        }
        self.offset += PCAP_RECORD_HEADER_LEN + frame_data.len();
        let ts_micros = if self.info.nanosecond {
            hdr.ts_frac / 1000
        } else {
            hdr.ts_frac
        };
        let link_type = self.interfaces[0].link_type;
        Some(self.emit(Duration::new(hdr.ts_sec, ts_micros), link_type, frame_data, hdr.caplen, hdr.origlen, truncated))
    }

    fn next_pcapng(&mut self) -> Option<Frame<'a>> {
        let data = self.data;
        loop {
            let block_start = self.offset;
            let rem = &data[block_start..];
            if rem.is_empty() {
                self.stop(false);
                return None;
            }
            let res = if self.info.big_endian {
                parse_block_be(rem)
            } else {
                parse_block_le(rem)
            };
            let block = match res {
                Ok((rest, block)) => {
                    self.offset += rem.len() - rest.len();
                    block
                }
                Err(e) => {
                    warn!("Could not parse pcapng block at offset {}: {:?}", block_start, e);
                    self.stop(true);
                    return self.partial_epb(rem, block_start);
                }
            };
            match block {
                Block::SectionHeader(_) => {
                    trace!("pcap-ng: new section at offset {}", block_start);
                    match section_is_big_endian(rem) {
                        Some(be) => self.info.big_endian = be,
                        None => {
                            warn!("Invalid byte order in section header (offset {})", block_start);
                            self.stop(true);
                            return None;
                        }
                    }
                    self.interfaces.clear();
                }
                Block::InterfaceDescription(ref idb) => {
                    trace!(
                        "pcap-ng: interface {} link type {}",
                        self.interfaces.len(),
                        idb.linktype
                    );
                    if self.info.link_type.is_none() {
                        self.info.link_type = Some(idb.linktype.0);
                        self.info.snaplen = idb.snaplen;
                    }
                    self.interfaces.push(InterfaceInfo {
                        link_type: idb.linktype,
                        snaplen: idb.snaplen,
                        if_tsresol: idb.if_tsresol,
                    });
                }
                Block::EnhancedPacket(ref epb) => {
                    let (frame_data, truncated) = clamp_caplen(epb.data, epb.caplen as usize);
                    if truncated {
                        warn!("Truncated enhanced packet block at offset {}", block_start);
                    }
                    let hdr = EpbPrefix {
                        block_type: PCAPNG_EPB_TYPE,
                        block_len: epb.block_len1,
                        if_id: epb.if_id,
                        ts_high: epb.ts_high,
                        ts_low: epb.ts_low,
                        caplen: epb.caplen,
                        origlen: epb.origlen,
                    };
                    return Some(self.emit_epb(&hdr, frame_data, truncated));
                }
                Block::SimplePacket(ref spb) => {
                    let if_info = self.interfaces.first().cloned().unwrap_or_default();
                    // simple packet blocks carry no caplen: deduce it from snaplen
                    let mut caplen = spb.origlen as usize;
                    if if_info.snaplen > 0 {
                        caplen = caplen.min(if_info.snaplen as usize);
                    }
                    let (frame_data, truncated) = clamp_caplen(spb.data, caplen);
                    return Some(self.emit(
                        Duration::default(),
                        if_info.link_type,
                        frame_data,
                        frame_data.len() as u32,
                        spb.origlen,
                        truncated,
                    ));
                }
                _ => {
                    trace!("pcap-ng: skipping block at offset {}", block_start);
                }
            }
        }
    }

    /// Recover the last frame of a capture cut inside an Enhanced Packet Block
    fn partial_epb(&mut self, rem: &'a [u8], block_start: usize) -> Option<Frame<'a>> {
        let (data, hdr) = parse_epb_prefix(rem, self.endianness()).ok()?;
        if hdr.block_type != PCAPNG_EPB_TYPE || hdr.block_len as usize <= rem.len() {
            return None;
        }
        warn!(
            "Enhanced packet block at offset {} declares {} bytes, {} left",
            block_start,
            hdr.block_len,
            rem.len()
        );
        let (frame_data, _) = clamp_caplen(data, hdr.caplen as usize);
        self.offset = self.data.len();
        Some(self.emit_epb(&hdr, frame_data, true))
    }

    fn emit_epb(&mut self, hdr: &EpbPrefix, data: &'a [u8], truncated: bool) -> Frame<'a> {
        let if_info = match self.interfaces.get(hdr.if_id as usize) {
            Some(if_info) => if_info.clone(),
            None => {
                warn!("Enhanced packet block references unknown interface {}", hdr.if_id);
                InterfaceInfo::default()
            }
        };
        let raw_ts = (u64::from(hdr.ts_high) << 32) | u64::from(hdr.ts_low);
        let ts = ts_from_units(raw_ts, if_info.if_tsresol);
        self.emit(ts, if_info.link_type, data, hdr.caplen, hdr.origlen, truncated)
    }

    fn emit(
        &mut self,
        ts: Duration,
        link_type: Linktype,
        data: &'a [u8],
        caplen: u32,
        origlen: u32,
        truncated: bool,
    ) -> Frame<'a> {
        let index = self.records;
        self.records += 1;
        trace!("record {}: caplen {} origlen {}", index, caplen, origlen);
        Frame {
            index,
            ts,
            link_type,
            data,
            caplen,
            origlen,
            truncated,
        }
    }
}

impl<'a> Iterator for CaptureReader<'a> {
    type Item = Frame<'a>;

    fn next(&mut self) -> Option<Frame<'a>> {
        if self.done {
            return None;
        }
        match self.info.format {
            CaptureFormat::Pcap => self.next_legacy(),
            CaptureFormat::PcapNG => self.next_pcapng(),
        }
    }
}

/// Best-effort number of records in a capture, walking record headers only
pub fn count_records(data: &[u8]) -> Result<usize, Error> {
    Ok(CaptureReader::new(data)?.count())
}
