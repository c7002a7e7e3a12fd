//! Hand-built capture files for tests
//!
//! Self-contained (chrono + std only) so integration tests can pull it in
//! with `#[path]`.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;
/// IEEE local experimental ethertype, never sliced as a network layer
const ETHERTYPE_LOCAL: u16 = 0x88b5;
const ETHERNET_HEADER_LEN: usize = 14;

const ARPHRD_LOOPBACK: u16 = 772;

pub const LINKTYPE_NULL: u32 = 0;
pub const LINKTYPE_ETHERNET: u32 = 1;
pub const LINKTYPE_RAW: u32 = 101;
pub const LINKTYPE_LOOP: u32 = 108;
pub const LINKTYPE_LINUX_SLL: u32 = 113;
pub const LINKTYPE_LINUX_SLL2: u32 = 276;

/// One frame, stored as Ethernet and re-framed per link type on write
pub struct FixtureFrame {
    pub timestamp: DateTime<Utc>,
    pub bytes: Vec<u8>,
}

impl FixtureFrame {
    pub fn tcp(src: [u8; 4], timestamp: DateTime<Utc>) -> Self {
        Self::ipv4(src, 6, &tcp_segment(), timestamp)
    }

    pub fn udp(src: [u8; 4], timestamp: DateTime<Utc>) -> Self {
        Self::ipv4(src, 17, &udp_datagram(b"ping"), timestamp)
    }

    pub fn tcp6(src: [u8; 16], timestamp: DateTime<Utc>) -> Self {
        let segment = tcp_segment();
        let mut packet = Vec::with_capacity(40 + segment.len());
        packet.extend_from_slice(&[0x60, 0, 0, 0]);
        packet.extend_from_slice(&(segment.len() as u16).to_be_bytes());
        packet.extend_from_slice(&[6, 64]);
        packet.extend_from_slice(&src);
        packet.extend_from_slice(&[0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        packet.extend_from_slice(&segment);
        Self {
            timestamp,
            bytes: ethernet(ETHERTYPE_IPV6, &packet),
        }
    }

    /// SCTP common header with no chunks
    pub fn sctp(src: [u8; 4], timestamp: DateTime<Utc>) -> Self {
        let mut header = Vec::with_capacity(12);
        header.extend_from_slice(&2905u16.to_be_bytes());
        header.extend_from_slice(&2905u16.to_be_bytes());
        header.extend_from_slice(&[0u8; 8]);
        Self::ipv4(src, 132, &header, timestamp)
    }

    /// IPv4 carrying GRE: network layer present, no transport layer
    pub fn ip_only(src: [u8; 4], timestamp: DateTime<Utc>) -> Self {
        Self::ipv4(src, 47, &[0, 0, 0x08, 0x00], timestamp)
    }

    /// Largest possible IPv4 datagram (65535 bytes) as UDP
    pub fn jumbo_udp(src: [u8; 4], timestamp: DateTime<Utc>) -> Self {
        let payload = vec![0xabu8; 65535 - 20 - 8];
        Self::ipv4(src, 17, &udp_datagram(&payload), timestamp)
    }

    pub fn non_ip(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            bytes: ethernet(ETHERTYPE_LOCAL, &[0u8; 46]),
        }
    }

    /// Ethernet says IPv4 but the header is cut short
    pub fn truncated_ipv4(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            bytes: ethernet(ETHERTYPE_IPV4, &[0x45, 0, 0, 40, 0, 0]),
        }
    }

    fn ipv4(src: [u8; 4], protocol: u8, payload: &[u8], timestamp: DateTime<Utc>) -> Self {
        let total_len = (20 + payload.len()) as u16;
        let mut packet = Vec::with_capacity(20 + payload.len());
        packet.extend_from_slice(&[0x45, 0]);
        packet.extend_from_slice(&total_len.to_be_bytes());
        packet.extend_from_slice(&[0, 0, 0x40, 0, 64, protocol, 0, 0]);
        packet.extend_from_slice(&src);
        packet.extend_from_slice(&[192, 168, 0, 1]);
        packet.extend_from_slice(payload);
        Self {
            timestamp,
            bytes: ethernet(ETHERTYPE_IPV4, &packet),
        }
    }

    fn ethertype(&self) -> u16 {
        u16::from_be_bytes([self.bytes[12], self.bytes[13]])
    }

    /// Frame bytes as captured on `linktype`
    pub fn link_bytes(&self, linktype: u32) -> Vec<u8> {
        let payload = &self.bytes[ETHERNET_HEADER_LEN..];
        let ethertype = self.ethertype();
        let family: u32 = if ethertype == ETHERTYPE_IPV6 { 24 } else { 2 };

        let mut out = Vec::with_capacity(self.bytes.len() + 20);
        match linktype {
            LINKTYPE_ETHERNET => return self.bytes.clone(),
            LINKTYPE_RAW => {}
            // Address family in host (little-endian here) byte order
            LINKTYPE_NULL => out.extend_from_slice(&family.to_le_bytes()),
            LINKTYPE_LOOP => out.extend_from_slice(&family.to_be_bytes()),
            LINKTYPE_LINUX_SLL => {
                out.extend_from_slice(&0u16.to_be_bytes());
                out.extend_from_slice(&ARPHRD_LOOPBACK.to_be_bytes());
                out.extend_from_slice(&6u16.to_be_bytes());
                out.extend_from_slice(&[0u8; 8]);
                out.extend_from_slice(&ethertype.to_be_bytes());
            }
            LINKTYPE_LINUX_SLL2 => {
                out.extend_from_slice(&ethertype.to_be_bytes());
                out.extend_from_slice(&[0, 0]);
                out.extend_from_slice(&1u32.to_be_bytes());
                out.extend_from_slice(&ARPHRD_LOOPBACK.to_be_bytes());
                out.extend_from_slice(&[0, 6]);
                out.extend_from_slice(&[0u8; 8]);
            }
            other => panic!("no fixture framing for linktype {}", other),
        }
        out.extend_from_slice(payload);
        out
    }
}

fn tcp_segment() -> Vec<u8> {
    let mut segment = Vec::with_capacity(20);
    segment.extend_from_slice(&40000u16.to_be_bytes());
    segment.extend_from_slice(&80u16.to_be_bytes());
    segment.extend_from_slice(&1u32.to_be_bytes());
    segment.extend_from_slice(&0u32.to_be_bytes());
    segment.extend_from_slice(&[0x50, 0x02, 0xff, 0xff, 0, 0, 0, 0]);
    segment
}

fn udp_datagram(payload: &[u8]) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(8 + payload.len());
    datagram.extend_from_slice(&5353u16.to_be_bytes());
    datagram.extend_from_slice(&53u16.to_be_bytes());
    datagram.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    datagram.extend_from_slice(&[0, 0]);
    datagram.extend_from_slice(payload);
    datagram
}

fn ethernet(ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ETHERNET_HEADER_LEN + payload.len());
    frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x01]);
    frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x02]);
    frame.extend_from_slice(&ethertype.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Legacy pcap file header options
#[derive(Debug, Clone, Copy)]
pub struct PcapLayout {
    pub linktype: u32,
    pub big_endian: bool,
    pub nanos: bool,
    pub snaplen: u32,
}

impl Default for PcapLayout {
    fn default() -> Self {
        Self {
            linktype: LINKTYPE_ETHERNET,
            big_endian: false,
            nanos: false,
            snaplen: 65535,
        }
    }
}

struct Writer {
    out: Vec<u8>,
    big_endian: bool,
}

impl Writer {
    fn u16(&mut self, v: u16) {
        let bytes = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.out.extend_from_slice(&bytes);
    }

    fn u32(&mut self, v: u32) {
        let bytes = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.out.extend_from_slice(&bytes);
    }
}

/// Little-endian microsecond pcap on Ethernet
pub fn pcap_bytes(frames: &[FixtureFrame]) -> Vec<u8> {
    pcap_bytes_with(PcapLayout::default(), frames)
}

pub fn pcap_bytes_with(layout: PcapLayout, frames: &[FixtureFrame]) -> Vec<u8> {
    let mut w = Writer {
        out: Vec::new(),
        big_endian: layout.big_endian,
    };
    w.u32(if layout.nanos { 0xa1b2_3c4d } else { 0xa1b2_c3d4 });
    w.u16(2);
    w.u16(4);
    w.u32(0);
    w.u32(0);
    w.u32(layout.snaplen);
    w.u32(layout.linktype);

    for frame in frames {
        let data = frame.link_bytes(layout.linktype);
        let fraction = if layout.nanos {
            frame.timestamp.timestamp_subsec_nanos()
        } else {
            frame.timestamp.timestamp_subsec_micros()
        };
        w.u32(frame.timestamp.timestamp() as u32);
        w.u32(fraction);
        w.u32(data.len() as u32);
        w.u32(data.len() as u32);
        w.out.extend_from_slice(&data);
    }
    w.out
}

/// Little-endian pcapng, one Ethernet interface, default microsecond resolution
pub fn pcapng_bytes(frames: &[FixtureFrame]) -> Vec<u8> {
    let mut w = Writer {
        out: Vec::new(),
        big_endian: false,
    };

    // Section header block
    w.u32(0x0a0d_0d0a);
    w.u32(28);
    w.u32(0x1a2b_3c4d);
    w.u16(1);
    w.u16(0);
    w.out.extend_from_slice(&(-1i64).to_le_bytes());
    w.u32(28);

    // Interface description block
    w.u32(1);
    w.u32(20);
    w.u16(LINKTYPE_ETHERNET as u16);
    w.u16(0);
    w.u32(0);
    w.u32(20);

    for frame in frames {
        let padded = (frame.bytes.len() + 3) & !3;
        let block_len = (32 + padded) as u32;
        let micros = frame.timestamp.timestamp() as u64 * 1_000_000
            + frame.timestamp.timestamp_subsec_micros() as u64;

        w.u32(6);
        w.u32(block_len);
        w.u32(0);
        w.u32((micros >> 32) as u32);
        w.u32(micros as u32);
        w.u32(frame.bytes.len() as u32);
        w.u32(frame.bytes.len() as u32);
        w.out.extend_from_slice(&frame.bytes);
        w.out.resize(w.out.len() + padded - frame.bytes.len(), 0);
        w.u32(block_len);
    }
    w.out
}

pub fn write_pcap(dir: &Path, name: &str, frames: &[FixtureFrame]) -> PathBuf {
    write_file(dir, name, pcap_bytes(frames))
}

pub fn write_pcap_with(dir: &Path, name: &str, layout: PcapLayout, frames: &[FixtureFrame]) -> PathBuf {
    write_file(dir, name, pcap_bytes_with(layout, frames))
}

pub fn write_pcapng(dir: &Path, name: &str, frames: &[FixtureFrame]) -> PathBuf {
    write_file(dir, name, pcapng_bytes(frames))
}

fn write_file(dir: &Path, name: &str, bytes: Vec<u8>) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}
