//! Capture file codec
//!
//! Reads and writes legacy pcap, pcapng and rtpdump files, presenting all of them as one
//! record shape: a timestamp, lengths and the bytes starting at the network layer.
//!
//! The container is detected from the first bytes of the file:
//!
//! - `0xA1B2C3D4` (either byte order, or the nanosecond variant `0xA1B23C4D`): legacy pcap
//! - `0x0A0D0D0A`: pcapng; the first block must be a Section Header Block, and an Interface
//!   Description Block following it gives the link type (Ethernet is assumed otherwise)
//! - `#!rtpplay1.0`: rtpdump
//!
//! Non-packet blocks are consumed and reported through `tracing`, never silently dropped.
//! Every read accepts an optional packet number and context string, used only to annotate
//! diagnostic messages so they can be matched against an external viewer.
//!
//! ```rust
//! use capdiag::capture::{CaptureReader, ReadContext, ReadItem, ReaderOptions};
//!
//! # fn run(path: &str) -> Result<(), capdiag::CaptureError> {
//! let mut reader = CaptureReader::open(path, ReaderOptions::default())?;
//! let mut number = 1;
//! while let Some(item) = reader.read_record(&ReadContext::packet(number))? {
//!     if let ReadItem::Packet(record) = item {
//!         let ts = record.header;
//!         println!("{} bytes at {}.{:06}", record.data.len(), ts.ts_sec, ts.ts_usec);
//!         number += 1;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;
use crate::linktype::Linktype;

mod link;
mod pcap;
mod pcapng;
mod reader;
mod rtpdump;
mod writer;

pub use link::*;
pub use pcap::*;
pub use pcapng::*;
pub use reader::*;
pub use rtpdump::*;
pub use writer::*;

/// Capture container format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ContainerKind {
    LegacyPcap,
    PcapNg,
    RtpDump,
}

/// Kind of the container entry a read produced
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockKind {
    LegacyRecord,
    EnhancedPacket,
    SimplePacket,
    RtpDump,
    SectionHeader,
    InterfaceDescription,
    InterfaceStatistics,
    NameResolution,
    DecryptionSecrets,
    Journal,
    /// Custom block (`0x00000BAD` or `0x40000BAD`)
    Custom(u32),
    Unknown(u32),
}

impl BlockKind {
    /// Returns true if entries of this kind carry a network packet
    pub fn is_packet(self) -> bool {
        matches!(
            self,
            BlockKind::LegacyRecord
                | BlockKind::EnhancedPacket
                | BlockKind::SimplePacket
                | BlockKind::RtpDump
        )
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BlockKind::LegacyRecord => f.write_str("pcap record"),
            BlockKind::EnhancedPacket => f.write_str("enhanced packet block"),
            BlockKind::SimplePacket => f.write_str("simple packet block"),
            BlockKind::RtpDump => f.write_str("rtpdump record"),
            BlockKind::SectionHeader => f.write_str("section header block"),
            BlockKind::InterfaceDescription => f.write_str("interface description block"),
            BlockKind::InterfaceStatistics => f.write_str("interface statistics block"),
            BlockKind::NameResolution => f.write_str("name resolution block"),
            BlockKind::DecryptionSecrets => f.write_str("decryption secrets block"),
            BlockKind::Journal => f.write_str("systemd journal export block"),
            BlockKind::Custom(t) => write!(f, "custom block {:#010x}", t),
            BlockKind::Unknown(t) => write!(f, "unknown block type {:#010x}", t),
        }
    }
}

/// Container kind and link properties of an open capture
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub kind: ContainerKind,
    /// Link type of the file, or of the first interface for pcapng
    pub linktype: Linktype,
    /// Nominal link header length of `linktype`, VLAN tags excluded
    pub link_header_len: usize,
    /// Byte order of the file (of the current section, for pcapng)
    pub big_endian: bool,
    /// Legacy pcap with nanosecond timestamps
    pub nanosecond: bool,
    pub snaplen: u32,
    /// File header of rtpdump captures
    pub rtpdump: Option<RtpDumpHeader>,
}

impl FormatDescriptor {
    pub fn new(kind: ContainerKind, linktype: Linktype) -> FormatDescriptor {
        FormatDescriptor {
            kind,
            linktype,
            link_header_len: linktype.link_header_len().unwrap_or(0),
            big_endian: false,
            nanosecond: false,
            snaplen: DEFAULT_SNAPLEN,
            rtpdump: None,
        }
    }

    pub(crate) fn set_linktype(&mut self, linktype: Linktype) {
        self.linktype = linktype;
        self.link_header_len = linktype.link_header_len().unwrap_or(0);
    }
}

pub const DEFAULT_SNAPLEN: u32 = 262_144;

/// Timestamp and lengths of a record
///
/// Lengths count network-layer bytes: the link header is not included.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecordHeader {
    pub ts_sec: u32,
    pub ts_usec: u32,
    pub caplen: u32,
    pub origlen: u32,
}

/// One packet read from a capture
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketRecord {
    pub header: RecordHeader,
    /// Bytes starting at the network layer
    pub data: Vec<u8>,
    /// Link header as captured, empty for raw IP and synthesized packets
    pub link_header: Vec<u8>,
    /// Network protocol announced by the link layer (Ethernet type numbering)
    pub ethertype: u16,
    pub block: BlockKind,
    /// pcapng interface id, 0 for other containers
    pub interface: u32,
}

/// Result of a successful read
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadItem {
    Packet(PacketRecord),
    /// A non-packet entry was consumed (and reported)
    Skipped(BlockKind),
}

/// Diagnostic annotation of a read call
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadContext<'a> {
    /// 1-based number of the next data packet
    pub packet_number: Option<u64>,
    pub context: Option<&'a str>,
}

impl<'a> ReadContext<'a> {
    pub fn packet(packet_number: u64) -> ReadContext<'a> {
        ReadContext {
            packet_number: Some(packet_number),
            context: None,
        }
    }

    pub fn with_context(self, context: &'a str) -> ReadContext<'a> {
        ReadContext {
            context: Some(context),
            ..self
        }
    }
}

/// Prefix of diagnostic messages: file path and packet number
///
/// Entries that are not data packets refer to the last transmitted data packet, one less than
/// the current packet number.
#[derive(Clone, Copy, Debug)]
pub struct Location<'a> {
    pub path: Option<&'a Path>,
    pub packet_number: Option<u64>,
    pub data_packet: bool,
    pub context: Option<&'a str>,
}

impl<'a> fmt::Display for Location<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut sep = "";
        if let Some(path) = self.path {
            write!(f, "{}", path.display())?;
            sep = ", ";
        }
        match self.packet_number {
            Some(n) if self.data_packet => write!(f, "{}packet #{}", sep, n)?,
            Some(n) => write!(
                f,
                "{}after last transmitted data packet #{}",
                sep,
                n.saturating_sub(1)
            )?,
            None => (),
        }
        if let Some(context) = self.context {
            write!(f, " ({})", context)?;
        }
        Ok(())
    }
}

/// Reader settings
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReaderOptions {
    /// Initial size of the circular buffer; it grows when a record does not fit
    pub buffer_capacity: usize,
    /// Rewrite zero IPv4 total lengths of TCP segments (TSO artifacts)
    pub repair_tso: bool,
    /// Report each TSO repair at info level
    pub report_tso_repairs: bool,
    /// Report each consumed non-packet block at info level
    pub report_skipped_blocks: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            buffer_capacity: 65536,
            repair_tso: true,
            report_tso_repairs: true,
            report_skipped_blocks: true,
        }
    }
}

/// Counters of anomalies met while reading
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub packets: u64,
    pub skipped_blocks: u64,
    /// Section headers after the first one
    pub section_headers: u64,
    pub tso_repairs: u64,
    pub rtpdump_length_warnings: u64,
}

/// Writer settings
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct WriterOptions {
    pub snaplen: u32,
    /// File header for rtpdump output; derived from the first record when absent
    #[cfg_attr(feature = "serde", serde(skip))]
    pub rtpdump: Option<RtpDumpHeader>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            snaplen: DEFAULT_SNAPLEN,
            rtpdump: None,
        }
    }
}

/// Identify the container from the first bytes of a file
pub fn detect_format(head: &[u8]) -> Result<ContainerKind, CaptureError> {
    if head.starts_with(&RTPDUMP_MAGIC[..12]) {
        return Ok(ContainerKind::RtpDump);
    }
    if head.len() < 4 {
        return Err(CaptureError::Truncated {
            what: "file header",
            expected: 4,
            got: head.len(),
        });
    }
    let magic = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
    match magic {
        PCAP_MAGIC | PCAP_MAGIC_NSEC | 0xd4c3_b2a1 | 0x4d3c_b2a1 => Ok(ContainerKind::LegacyPcap),
        SHB_MAGIC => Ok(ContainerKind::PcapNg),
        m => Err(CaptureError::UnknownFormat(m)),
    }
}

/// How [`open`] opens a capture
#[derive(Clone, Debug)]
pub enum OpenMode {
    Read(ReaderOptions),
    /// Create or truncate the file
    Write {
        kind: ContainerKind,
        linktype: Linktype,
        options: WriterOptions,
    },
}

/// An open capture file
pub enum CaptureHandle {
    Reader(CaptureReader<File>),
    Writer(CaptureWriter<BufWriter<File>>),
}

impl CaptureHandle {
    pub fn descriptor(&self) -> &FormatDescriptor {
        match self {
            CaptureHandle::Reader(r) => r.descriptor(),
            CaptureHandle::Writer(w) => w.descriptor(),
        }
    }

    /// Flush pending output and release the file
    pub fn close(self) -> Result<(), CaptureError> {
        match self {
            CaptureHandle::Reader(r) => {
                r.close();
                Ok(())
            }
            CaptureHandle::Writer(w) => w.close().map(|_| ()),
        }
    }
}

/// Open a capture file for reading or writing
pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<CaptureHandle, CaptureError> {
    match mode {
        OpenMode::Read(options) => CaptureReader::open(path, options).map(CaptureHandle::Reader),
        OpenMode::Write {
            kind,
            linktype,
            options,
        } => CaptureWriter::create(path, kind, linktype, options).map(CaptureHandle::Writer),
    }
}
