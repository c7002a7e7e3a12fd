//! Capture file decoder
//!
//! Opens legacy pcap or pcapng files and yields one `Frame` per captured
//! packet. `CaptureSource::frames()` re-opens the file on every call, so the
//! ingestion pipeline can scan the same immutable file twice (count, then
//! extract) through one code path.

use chrono::{DateTime, Utc};
use etherparse::{IpNumber, NetSlice, SlicedPacket, TransportSlice};
use pcap_parser::traits::{PcapNGPacketBlock, PcapReaderIterator};
use pcap_parser::{create_reader, Block, PcapBlockOwned, PcapError};
use std::fs::File;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Default read buffer for the pcap reader (bytes)
pub const DEFAULT_BUFFER_BYTES: usize = 65536;

/// The read buffer doubles up to this size for oversized records
pub const MAX_BUFFER_BYTES: usize = 16 * 1024 * 1024;

const LINKTYPE_NULL: i32 = 0;
const LINKTYPE_ETHERNET: i32 = 1;
const LINKTYPE_RAW: i32 = 101;
const LINKTYPE_LOOP: i32 = 108;
const LINKTYPE_LINUX_SLL: i32 = 113;
const LINKTYPE_IPV4: i32 = 228;
const LINKTYPE_IPV6: i32 = 229;
const LINKTYPE_LINUX_SLL2: i32 = 276;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;

/// pcapng default timestamp resolution when an interface has no if_tsresol option
const DEFAULT_TSRESOL: u8 = 6;

#[derive(Debug)]
pub enum DecodeError {
    Open { path: PathBuf, source: std::io::Error },
    UnrecognizedFormat(String),
    Truncated { frames_read: u64 },
    Malformed(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Open { path, source } => {
                write!(f, "Failed to open capture file {}: {}", path.display(), source)
            }
            DecodeError::UnrecognizedFormat(msg) => {
                write!(f, "Unrecognized capture format: {}", msg)
            }
            DecodeError::Truncated { frames_read } => {
                write!(f, "Capture file truncated after {} frames", frames_read)
            }
            DecodeError::Malformed(msg) => write!(f, "Malformed capture file: {}", msg),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Open { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Network-layer view of a frame
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkLayer {
    pub source: IpAddr,
    /// "TCP" / "UDP" / "SCTP", None for any other IP payload
    pub transport: Option<&'static str>,
}

/// One captured frame. Ephemeral, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Zero-based position in the capture
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub network: Option<NetworkLayer>,
    /// Headers could not be sliced (truncated/corrupt packet bytes)
    pub malformed: bool,
}

impl Frame {
    pub fn has_network_layer(&self) -> bool {
        self.network.is_some()
    }
}

/// A capture file on disk that can be scanned any number of times
#[derive(Debug, Clone)]
pub struct CaptureSource {
    path: PathBuf,
    buffer_bytes: usize,
}

impl CaptureSource {
    /// Open a capture file, checking it exists and has a recognizable header
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DecodeError> {
        Self::with_buffer(path, DEFAULT_BUFFER_BYTES)
    }

    pub fn with_buffer(path: impl AsRef<Path>, buffer_bytes: usize) -> Result<Self, DecodeError> {
        let source = Self {
            path: path.as_ref().to_path_buf(),
            buffer_bytes,
        };
        // Read the header once so format errors surface before any pass starts
        source.frames()?;
        Ok(source)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a fresh scan from the first frame
    pub fn frames(&self) -> Result<Frames, DecodeError> {
        let file = File::open(&self.path).map_err(|e| DecodeError::Open {
            path: self.path.clone(),
            source: e,
        })?;

        let reader = create_reader(self.buffer_bytes, file).map_err(|e| match e {
            PcapError::HeaderNotRecognized => DecodeError::UnrecognizedFormat(format!(
                "{} is neither pcap nor pcapng",
                self.path.display()
            )),
            other => DecodeError::UnrecognizedFormat(format!(
                "{}: {:?}",
                self.path.display(),
                other
            )),
        })?;

        Ok(Frames {
            reader,
            capacity: self.buffer_bytes,
            links: LinkState::default(),
            frames_read: 0,
            done: false,
        })
    }

    /// Count frames (with or without a network layer) in one full scan
    pub fn count_frames(&self) -> Result<u64, DecodeError> {
        let mut count = 0u64;
        for frame in self.frames()? {
            frame?;
            count += 1;
        }
        Ok(count)
    }
}

/// Per-scan link-layer bookkeeping
#[derive(Debug)]
struct LinkState {
    legacy_linktype: i32,
    legacy_nanos: bool,
    /// (linktype, if_tsresol) per pcapng interface id
    interfaces: Vec<(i32, u8)>,
    last_timestamp: DateTime<Utc>,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            legacy_linktype: LINKTYPE_ETHERNET,
            legacy_nanos: false,
            interfaces: Vec::new(),
            last_timestamp: DateTime::<Utc>::default(),
        }
    }
}

/// Lazy frame sequence over one scan of a capture file
///
/// Yields `Err` at most once; the iterator is fused afterwards.
pub struct Frames {
    reader: Box<dyn PcapReaderIterator>,
    capacity: usize,
    links: LinkState,
    frames_read: u64,
    done: bool,
}

impl Frames {
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    fn fail(&mut self, err: DecodeError) -> Option<Result<Frame, DecodeError>> {
        self.done = true;
        Some(Err(err))
    }

    /// Double the read buffer so the next record fits, then refill
    fn grow_buffer(&mut self) -> Result<(), DecodeError> {
        let wanted = (self.capacity.max(1) * 2).min(MAX_BUFFER_BYTES);
        if wanted <= self.capacity || !self.reader.grow(wanted) {
            return Err(DecodeError::Malformed(format!(
                "record larger than {} bytes",
                self.capacity
            )));
        }
        log::debug!("read buffer grown {} -> {} bytes", self.capacity, wanted);
        self.capacity = wanted;
        self.reader
            .refill()
            .map_err(|e| DecodeError::Malformed(format!("{:?}", e)))
    }
}

impl Iterator for Frames {
    type Item = Result<Frame, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    let decoded = decode_block(&block, &mut self.links, self.frames_read);
                    self.reader.consume(offset);
                    if let Some(frame) = decoded {
                        self.frames_read += 1;
                        return Some(Ok(frame));
                    }
                }
                Err(PcapError::Eof) => {
                    self.done = true;
                    return None;
                }
                Err(PcapError::BufferTooSmall) => {
                    if let Err(e) = self.grow_buffer() {
                        return self.fail(e);
                    }
                }
                Err(PcapError::Incomplete(_)) => {
                    // A full buffer has no room to refill into
                    let refilled = if self.reader.data().len() >= self.capacity {
                        self.grow_buffer()
                    } else {
                        self.reader
                            .refill()
                            .map_err(|e| DecodeError::Malformed(format!("{:?}", e)))
                    };
                    if let Err(e) = refilled {
                        return self.fail(e);
                    }
                }
                Err(PcapError::UnexpectedEof) => {
                    let frames_read = self.frames_read;
                    return self.fail(DecodeError::Truncated { frames_read });
                }
                Err(e) => {
                    let msg = format!("{:?}", e);
                    return self.fail(DecodeError::Malformed(msg));
                }
            }
        }
    }
}

/// Turn one pcap block into a frame; header/interface blocks update `links`
fn decode_block(block: &PcapBlockOwned<'_>, links: &mut LinkState, index: u64) -> Option<Frame> {
    match block {
        PcapBlockOwned::LegacyHeader(header) => {
            links.legacy_linktype = header.network.0;
            links.legacy_nanos = header.is_nanosecond_precision();
            None
        }
        PcapBlockOwned::Legacy(packet) => {
            let nanos = if links.legacy_nanos {
                packet.ts_usec
            } else {
                packet.ts_usec.saturating_mul(1000)
            };
            let timestamp = to_datetime(packet.ts_sec as i64, nanos);
            links.last_timestamp = timestamp;
            let data = clamp(packet.data, packet.caplen);
            Some(slice_frame(index, timestamp, links.legacy_linktype, data))
        }
        PcapBlockOwned::NG(Block::SectionHeader(_)) => {
            // New section: interface ids restart
            links.interfaces.clear();
            None
        }
        PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
            let tsresol = if idb.if_tsresol == 0 {
                DEFAULT_TSRESOL
            } else {
                idb.if_tsresol
            };
            links.interfaces.push((idb.linktype.0, tsresol));
            None
        }
        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
            let (linktype, tsresol) = links
                .interfaces
                .get(epb.if_id as usize)
                .copied()
                .unwrap_or((LINKTYPE_ETHERNET, DEFAULT_TSRESOL));
            let timestamp = ng_timestamp(epb.ts_high, epb.ts_low, tsresol);
            links.last_timestamp = timestamp;
            Some(slice_frame(index, timestamp, linktype, epb.packet_data()))
        }
        PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
            // SPBs carry no timestamp; reuse the last one seen
            let linktype = links
                .interfaces
                .first()
                .map(|(linktype, _)| *linktype)
                .unwrap_or(LINKTYPE_ETHERNET);
            Some(slice_frame(index, links.last_timestamp, linktype, spb.packet_data()))
        }
        // statistics, name resolution, custom blocks
        PcapBlockOwned::NG(_) => None,
    }
}

fn clamp(data: &[u8], caplen: u32) -> &[u8] {
    &data[..data.len().min(caplen as usize)]
}

fn to_datetime(secs: i64, nanos: u32) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, nanos.min(999_999_999)).unwrap_or_default()
}

/// pcapng 64-bit timestamp scaled by the interface resolution
///
/// if_tsresol: MSB clear => 10^-n seconds per unit, MSB set => 2^-n.
fn ng_timestamp(ts_high: u32, ts_low: u32, tsresol: u8) -> DateTime<Utc> {
    let ticks = ((ts_high as u64) << 32) | ts_low as u64;
    let exponent = (tsresol & 0x7f) as u32;

    let (secs, nanos) = if tsresol & 0x80 == 0 {
        match 10u64.checked_pow(exponent) {
            Some(per_sec) => {
                let frac = ticks % per_sec;
                let nanos = if exponent <= 9 {
                    frac * 10u64.pow(9 - exponent)
                } else {
                    frac / 10u64.pow(exponent - 9)
                };
                (ticks / per_sec, nanos)
            }
            None => (0, 0),
        }
    } else if exponent < 64 {
        let per_sec = 1u64 << exponent;
        let frac = ticks & (per_sec - 1);
        let nanos = ((frac as u128 * 1_000_000_000u128) >> exponent) as u64;
        (ticks >> exponent, nanos)
    } else {
        (0, 0)
    };

    to_datetime(secs as i64, nanos as u32)
}

/// What a non-Ethernet link header wraps
enum LinkPayload<'a> {
    Ip(&'a [u8]),
    Other,
    Truncated,
}

fn ethertype_payload(ethertype: u16, payload: &[u8]) -> LinkPayload<'_> {
    match ethertype {
        ETHERTYPE_IPV4 | ETHERTYPE_IPV6 => LinkPayload::Ip(payload),
        _ => LinkPayload::Other,
    }
}

/// Strip BSD loopback and Linux cooked capture headers
///
/// NULL/LOOP carry a 4-byte address family whose byte order varies by
/// writer, so the IP version nibble decides instead.
fn strip_link_header(linktype: i32, data: &[u8]) -> LinkPayload<'_> {
    match linktype {
        LINKTYPE_NULL | LINKTYPE_LOOP => match data.get(4) {
            Some(&first) if matches!(first >> 4, 4 | 6) => LinkPayload::Ip(&data[4..]),
            Some(_) => LinkPayload::Other,
            None => LinkPayload::Truncated,
        },
        LINKTYPE_LINUX_SLL if data.len() >= 16 => {
            ethertype_payload(u16::from_be_bytes([data[14], data[15]]), &data[16..])
        }
        LINKTYPE_LINUX_SLL2 if data.len() >= 20 => {
            ethertype_payload(u16::from_be_bytes([data[0], data[1]]), &data[20..])
        }
        LINKTYPE_LINUX_SLL | LINKTYPE_LINUX_SLL2 => LinkPayload::Truncated,
        _ => LinkPayload::Other,
    }
}

fn frame_without_network(index: u64, timestamp: DateTime<Utc>, malformed: bool) -> Frame {
    Frame {
        index,
        timestamp,
        network: None,
        malformed,
    }
}

/// Slice link/network/transport headers out of the raw packet bytes
fn slice_frame(index: u64, timestamp: DateTime<Utc>, linktype: i32, data: &[u8]) -> Frame {
    let sliced = match linktype {
        LINKTYPE_ETHERNET => SlicedPacket::from_ethernet(data),
        LINKTYPE_RAW | LINKTYPE_IPV4 | LINKTYPE_IPV6 => SlicedPacket::from_ip(data),
        LINKTYPE_NULL | LINKTYPE_LOOP | LINKTYPE_LINUX_SLL | LINKTYPE_LINUX_SLL2 => {
            match strip_link_header(linktype, data) {
                LinkPayload::Ip(payload) => SlicedPacket::from_ip(payload),
                LinkPayload::Other => return frame_without_network(index, timestamp, false),
                LinkPayload::Truncated => {
                    log::debug!("frame {}: link header cut short", index);
                    return frame_without_network(index, timestamp, true);
                }
            }
        }
        _ => {
            log::trace!("frame {}: unsupported linktype {}", index, linktype);
            return frame_without_network(index, timestamp, false);
        }
    };

    match sliced {
        Ok(packet) => {
            let source = match &packet.net {
                Some(NetSlice::Ipv4(ipv4)) => Some(IpAddr::V4(ipv4.header().source_addr())),
                Some(NetSlice::Ipv6(ipv6)) => Some(IpAddr::V6(ipv6.header().source_addr())),
                _ => None,
            };
            let transport = match &packet.transport {
                Some(TransportSlice::Tcp(_)) => Some("TCP"),
                Some(TransportSlice::Udp(_)) => Some("UDP"),
                _ => packet
                    .net
                    .as_ref()
                    .and_then(|net| net.ip_payload_ref())
                    .filter(|payload| payload.ip_number == IpNumber::SCTP)
                    .map(|_| "SCTP"),
            };
            Frame {
                index,
                timestamp,
                network: source.map(|source| NetworkLayer { source, transport }),
                malformed: false,
            }
        }
        Err(e) => {
            log::debug!("frame {}: malformed headers: {}", index, e);
            frame_without_network(index, timestamp, true)
        }
    }
}
