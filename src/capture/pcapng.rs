//! PCAPNG file format
//!
//! See <https://github.com/pcapng/pcapng> for details.
//!
//! A file is a sequence of blocks sharing a generic layout: block type, total length, body,
//! and the total length again. Each Section Header Block starts a new section with its own
//! byte order and set of interfaces. Only the blocks needed to extract packets are decoded;
//! the others are consumed whole.

use cookie_factory::bytes::{le_i64, le_u16, le_u32};
use cookie_factory::combinator::slice;
use cookie_factory::gen;
use cookie_factory::sequence::tuple;
use nom::bytes::streaming::take;
use nom::number::streaming::le_u32 as p_le_u32;
use nom::{Err, IResult};
use rusticata_macros::align32;

use super::BlockKind;
use crate::endianness::{CaptureBE, CaptureEndianness, CaptureLE};
use crate::error::CaptureError;
use crate::linktype::Linktype;

pub const SHB_MAGIC: u32 = 0x0A0D_0D0A;
pub const IDB_MAGIC: u32 = 0x0000_0001;
pub const SPB_MAGIC: u32 = 0x0000_0003;
pub const NRB_MAGIC: u32 = 0x0000_0004;
pub const ISB_MAGIC: u32 = 0x0000_0005;
pub const EPB_MAGIC: u32 = 0x0000_0006;
pub const SJE_MAGIC: u32 = 0x0000_0009;
pub const DSB_MAGIC: u32 = 0x0000_000A;
pub const CB_MAGIC: u32 = 0x0000_0BAD;
pub const DCB_MAGIC: u32 = 0x4000_0BAD;

/// Byte Order magic
pub const BOM_MAGIC: u32 = 0x1A2B_3C4D;

const OPT_ENDOFOPT: u16 = 0;
const OPT_IF_TSRESOL: u16 = 9;
const OPT_IF_TSOFFSET: u16 = 14;

/// Largest block accepted before the input is considered corrupt
pub const MAX_BLOCK_LEN: u32 = 0x0100_0000;

/// Map a block type to its kind
pub fn block_kind(block_type: u32) -> BlockKind {
    match block_type {
        SHB_MAGIC => BlockKind::SectionHeader,
        IDB_MAGIC => BlockKind::InterfaceDescription,
        SPB_MAGIC => BlockKind::SimplePacket,
        NRB_MAGIC => BlockKind::NameResolution,
        ISB_MAGIC => BlockKind::InterfaceStatistics,
        EPB_MAGIC => BlockKind::EnhancedPacket,
        SJE_MAGIC => BlockKind::Journal,
        DSB_MAGIC => BlockKind::DecryptionSecrets,
        CB_MAGIC | DCB_MAGIC => BlockKind::Custom(block_type),
        _ => BlockKind::Unknown(block_type),
    }
}

/// Decoded Section Header Block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectionHeader {
    pub big_endian: bool,
    pub major_version: u16,
    pub minor_version: u16,
    /// Section length in bytes, `-1` if unspecified
    pub section_len: i64,
}

/// Decoded Interface Description Block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceDescription {
    pub linktype: Linktype,
    pub snaplen: u32,
    /// Raw `if_tsresol` option value (6, microseconds, when absent)
    pub ts_resol: u8,
    /// `if_tsoffset` option value, in seconds
    pub ts_offset: i64,
}

impl InterfaceDescription {
    pub fn new(linktype: Linktype, snaplen: u32) -> InterfaceDescription {
        InterfaceDescription {
            linktype,
            snaplen,
            ts_resol: 6,
            ts_offset: 0,
        }
    }

    /// Timestamp units per second, or `None` if the resolution is invalid
    pub fn ts_resolution(&self) -> Option<u64> {
        build_ts_resolution(self.ts_resol)
    }
}

/// Packet data of an Enhanced or Simple Packet Block
#[derive(Debug, PartialEq, Eq)]
pub struct NgPacket<'a> {
    pub kind: BlockKind,
    /// Interface id; always 0 for Simple Packet Blocks
    pub if_id: u32,
    pub ts_high: u32,
    pub ts_low: u32,
    pub origlen: u32,
    /// Captured bytes, padding excluded
    pub data: &'a [u8],
}

/// A block from a PcapNG file
#[derive(Debug, PartialEq, Eq)]
pub enum NgBlock<'a> {
    SectionHeader(SectionHeader),
    InterfaceDescription(InterfaceDescription),
    Packet(NgPacket<'a>),
    /// Any other block, consumed without decoding
    Other(BlockKind),
}

/// Compute the timestamp resolution, in units per second
///
/// Return the resolution, or `None` if the resolution is invalid (for ex. greater than `2^64`)
pub fn build_ts_resolution(ts_resol: u8) -> Option<u64> {
    if ts_resol & 0x80 == 0 {
        // 10^if_tsresol
        if ts_resol > 19 {
            return None;
        }
        Some(10u64.pow(u32::from(ts_resol)))
    } else {
        // 2^if_tsresol
        let exp = ts_resol & 0x7f;
        if exp > 63 {
            return None;
        }
        Some(1 << exp)
    }
}

/// Convert a raw 64-bit timestamp to seconds and microseconds
pub fn build_ts_usec(ts_high: u32, ts_low: u32, ts_offset: i64, resolution: u64) -> (u32, u32) {
    let ts = (u64::from(ts_high) << 32) | u64::from(ts_low);
    let ts_sec = (ts / resolution) as i64 + ts_offset;
    let frac = u128::from(ts % resolution);
    let usec = frac * 1_000_000 / u128::from(resolution);
    (ts_sec as u32, usec as u32)
}

/// Read the generic block layout, returning the block type and body
///
/// The trailing length must repeat the leading one.
fn ng_block_layout<En: CaptureEndianness>(
    i: &[u8],
) -> IResult<&[u8], (u32, &[u8]), CaptureError> {
    if i.len() < 12 {
        return Err(Err::Incomplete(nom::Needed::new(12 - i.len())));
    }
    let (i, block_type) = En::parse_u32(i)?;
    let (i, block_len1) = En::parse_u32(i)?;
    if block_len1 < 12 || block_len1 > MAX_BLOCK_LEN {
        return Err(Err::Failure(CaptureError::LengthMismatch {
            what: "pcapng block",
            declared: block_len1 as usize,
            actual: 12,
        }));
    }
    // 12 is block_type (4) + block_len1 (4) + block_len2 (4)
    let (i, content) = take(block_len1 - 12)(i)?;
    let (i, block_len2) = En::parse_u32(i)?;
    if block_len2 != block_len1 {
        return Err(Err::Failure(CaptureError::LengthMismatch {
            what: "pcapng trailing block length",
            declared: block_len1 as usize,
            actual: block_len2 as usize,
        }));
    }
    // writers are required to pad, tolerate those that did not
    let pad = (align32!(block_len1) - block_len1) as usize;
    let (i, _) = take(pad)(i)?;
    Ok((i, (block_type, content)))
}

fn short_body(what: &'static str, needed: usize, got: usize) -> Err<CaptureError> {
    Err::Failure(CaptureError::Truncated {
        what,
        expected: needed,
        got,
    })
}

fn read_u16<En: CaptureEndianness>(b: &[u8], at: usize) -> u16 {
    En::u16_from_bytes([b[at], b[at + 1]])
}

fn read_u32<En: CaptureEndianness>(b: &[u8], at: usize) -> u32 {
    En::u32_from_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn read_i64<En: CaptureEndianness>(b: &[u8], at: usize) -> i64 {
    let mut v = [0u8; 8];
    v.copy_from_slice(&b[at..at + 8]);
    if En::BIG_ENDIAN {
        i64::from_be_bytes(v)
    } else {
        i64::from_le_bytes(v)
    }
}

/// Parse a SectionHeader block (little or big endian)
///
/// The byte order is given by the byte-order magic following the block length.
pub fn parse_section_header(i: &[u8]) -> IResult<&[u8], SectionHeader, CaptureError> {
    if i.len() < 12 {
        return Err(Err::Incomplete(nom::Needed::new(12 - i.len())));
    }
    let (_, block_type) = p_le_u32(i)?;
    if block_type != SHB_MAGIC {
        return Err(Err::Error(CaptureError::HeaderNotRecognized));
    }
    let bom = u32::from_le_bytes([i[8], i[9], i[10], i[11]]);
    if bom == BOM_MAGIC {
        let (rem, (_, content)) = ng_block_layout::<CaptureLE>(i)?;
        Ok((rem, section_header_body::<CaptureLE>(content)?))
    } else if bom == BOM_MAGIC.swap_bytes() {
        let (rem, (_, content)) = ng_block_layout::<CaptureBE>(i)?;
        Ok((rem, section_header_body::<CaptureBE>(content)?))
    } else {
        Err(Err::Error(CaptureError::HeaderNotRecognized))
    }
}

fn section_header_body<En: CaptureEndianness>(
    content: &[u8],
) -> Result<SectionHeader, Err<CaptureError>> {
    if content.len() < 16 {
        return Err(short_body("section header block", 16, content.len()));
    }
    let major_version = read_u16::<En>(content, 4);
    let minor_version = read_u16::<En>(content, 6);
    let section_len = read_i64::<En>(content, 8);
    Ok(SectionHeader {
        big_endian: En::BIG_ENDIAN,
        major_version,
        minor_version,
        section_len,
    })
}

fn interface_description_body<En: CaptureEndianness>(
    content: &[u8],
) -> Result<InterfaceDescription, Err<CaptureError>> {
    if content.len() < 8 {
        return Err(short_body("interface description block", 8, content.len()));
    }
    let linktype = Linktype(i32::from(read_u16::<En>(content, 0)));
    let snaplen = read_u32::<En>(content, 4);
    let mut idb = InterfaceDescription::new(linktype, snaplen);
    // options: code, length, value padded to 32 bits
    let mut opts = &content[8..];
    while opts.len() >= 4 {
        let code = read_u16::<En>(opts, 0);
        let len = read_u16::<En>(opts, 2) as usize;
        if code == OPT_ENDOFOPT {
            break;
        }
        let padded = align32!(len);
        if opts.len() < 4 + padded {
            break;
        }
        let value = &opts[4..4 + len];
        match code {
            OPT_IF_TSRESOL if !value.is_empty() => idb.ts_resol = value[0],
            OPT_IF_TSOFFSET if value.len() >= 8 => idb.ts_offset = read_i64::<En>(value, 0),
            _ => (),
        }
        opts = &opts[4 + padded..];
    }
    Ok(idb)
}

fn enhanced_packet_body<En: CaptureEndianness>(
    content: &[u8],
) -> Result<NgPacket, Err<CaptureError>> {
    if content.len() < 20 {
        return Err(short_body("enhanced packet block", 20, content.len()));
    }
    let if_id = read_u32::<En>(content, 0);
    let ts_high = read_u32::<En>(content, 4);
    let ts_low = read_u32::<En>(content, 8);
    let caplen = read_u32::<En>(content, 12) as usize;
    let origlen = read_u32::<En>(content, 16);
    if caplen > content.len() - 20 {
        return Err(Err::Failure(CaptureError::LengthMismatch {
            what: "enhanced packet block",
            declared: caplen,
            actual: content.len() - 20,
        }));
    }
    Ok(NgPacket {
        kind: BlockKind::EnhancedPacket,
        if_id,
        ts_high,
        ts_low,
        origlen,
        data: &content[20..20 + caplen],
    })
}

fn simple_packet_body<En: CaptureEndianness>(
    content: &[u8],
) -> Result<NgPacket, Err<CaptureError>> {
    if content.len() < 4 {
        return Err(short_body("simple packet block", 4, content.len()));
    }
    let origlen = read_u32::<En>(content, 0);
    // the captured length is implied by the block length, capped by origlen
    let data = &content[4..];
    let caplen = data.len().min(origlen as usize);
    Ok(NgPacket {
        kind: BlockKind::SimplePacket,
        if_id: 0,
        ts_high: 0,
        ts_low: 0,
        origlen,
        data: &data[..caplen],
    })
}

/// Parse any block of a section with byte order `En`
pub(crate) fn parse_ng_block<En: CaptureEndianness>(
    i: &[u8],
) -> IResult<&[u8], NgBlock, CaptureError> {
    if i.len() >= 4 && i[..4] == SHB_MAGIC.to_le_bytes() {
        let (rem, shb) = parse_section_header(i)?;
        return Ok((rem, NgBlock::SectionHeader(shb)));
    }
    let (rem, (block_type, content)) = ng_block_layout::<En>(i)?;
    let block = match block_type {
        IDB_MAGIC => NgBlock::InterfaceDescription(interface_description_body::<En>(content)?),
        EPB_MAGIC => NgBlock::Packet(enhanced_packet_body::<En>(content)?),
        SPB_MAGIC => NgBlock::Packet(simple_packet_body::<En>(content)?),
        other => NgBlock::Other(block_kind(other)),
    };
    Ok((rem, block))
}

/// Peek at the type of the next block without consuming it
pub(crate) fn peek_block_type<En: CaptureEndianness>(i: &[u8]) -> Option<u32> {
    if i.len() < 4 {
        return None;
    }
    Some(read_u32::<En>(i, 0))
}

/// Serialize a little-endian Section Header Block with unspecified section length
pub fn section_header_to_vec() -> Result<Vec<u8>, CaptureError> {
    let v = Vec::with_capacity(28);
    let (v, _) = gen(
        tuple((
            le_u32(SHB_MAGIC),
            le_u32(28),
            le_u32(BOM_MAGIC),
            le_u16(1),
            le_u16(0),
            le_i64(-1),
            le_u32(28),
        )),
        v,
    )?;
    Ok(v)
}

/// Serialize a little-endian Interface Description Block with no options
///
/// Without `if_tsresol`, timestamps are in microseconds.
pub fn interface_description_to_vec(idb: &InterfaceDescription) -> Result<Vec<u8>, CaptureError> {
    let v = Vec::with_capacity(20);
    let (v, _) = gen(
        tuple((
            le_u32(IDB_MAGIC),
            le_u32(20),
            le_u16(idb.linktype.0 as u16),
            le_u16(0),
            le_u32(idb.snaplen),
            le_u32(20),
        )),
        v,
    )?;
    Ok(v)
}

/// Serialize a little-endian Enhanced Packet Block with a microsecond timestamp
pub fn enhanced_packet_to_vec(
    if_id: u32,
    ts_sec: u32,
    ts_usec: u32,
    origlen: u32,
    data: &[u8],
) -> Result<Vec<u8>, CaptureError> {
    let caplen = data.len() as u32;
    let padded = align32!(caplen);
    let block_len = 32 + padded;
    let ts = u64::from(ts_sec) * 1_000_000 + u64::from(ts_usec);
    let padding = [0u8; 3];
    let v = Vec::with_capacity(block_len as usize);
    let (v, _) = gen(
        tuple((
            le_u32(EPB_MAGIC),
            le_u32(block_len),
            le_u32(if_id),
            le_u32((ts >> 32) as u32),
            le_u32(ts as u32),
            le_u32(caplen),
            le_u32(origlen),
            slice(data),
            slice(&padding[..(padded - caplen) as usize]),
            le_u32(block_len),
        )),
        v,
    )?;
    Ok(v)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hex_literal::hex;

    // block 0 of test001-le.pcapng (section header)
    pub const SHB_LE: &[u8] = &hex!(
        "
0A 0D 0D 0A 1C 00 00 00 4D 3C 2B 1A 01 00 00 00
FF FF FF FF FF FF FF FF 1C 00 00 00"
    );

    pub const SHB_BE: &[u8] = &hex!(
        "
0A 0D 0D 0A 00 00 00 1C 1A 2B 3C 4D 00 01 00 00
FF FF FF FF FF FF FF FF 00 00 00 1C"
    );

    // IDB, linktype RAW, snaplen 0xffff, if_tsresol = 9
    pub const IDB_TSRESOL_LE: &[u8] = &hex!(
        "
01 00 00 00 24 00 00 00 65 00 00 00 FF FF 00 00
09 00 01 00 09 00 00 00 00 00 00 00 00 00 00 00
24 00 00 00"
    );

    #[test]
    fn test_parse_section_header_both_orders() {
        let (rem, shb) = parse_section_header(SHB_LE).expect("le");
        assert!(rem.is_empty());
        assert!(!shb.big_endian);
        assert_eq!(shb.major_version, 1);
        assert_eq!(shb.section_len, -1);
        let (_, shb) = parse_section_header(SHB_BE).expect("be");
        assert!(shb.big_endian);
        assert_eq!(shb.major_version, 1);
        assert_eq!(section_header_to_vec().expect("gen"), SHB_LE);
    }

    #[test]
    fn test_interface_options() {
        let (rem, block) = parse_ng_block::<CaptureLE>(IDB_TSRESOL_LE).expect("idb");
        assert!(rem.is_empty());
        let idb = match block {
            NgBlock::InterfaceDescription(idb) => idb,
            b => panic!("unexpected block {:?}", b),
        };
        assert_eq!(idb.linktype, Linktype::RAW);
        assert_eq!(idb.snaplen, 0xffff);
        assert_eq!(idb.ts_resol, 9);
        assert_eq!(idb.ts_resolution(), Some(1_000_000_000));
    }

    #[test]
    fn test_enhanced_packet_padding() {
        let v = enhanced_packet_to_vec(0, 2, 500, 5, &hex!("01 02 03 04 05")).expect("gen");
        assert_eq!(v.len(), 40);
        let (rem, block) = parse_ng_block::<CaptureLE>(&v).expect("epb");
        assert!(rem.is_empty());
        match block {
            NgBlock::Packet(p) => {
                assert_eq!(p.kind, BlockKind::EnhancedPacket);
                assert_eq!(p.data, &hex!("01 02 03 04 05"));
                assert_eq!(build_ts_usec(p.ts_high, p.ts_low, 0, 1_000_000), (2, 500));
            }
            b => panic!("unexpected block {:?}", b),
        }
        assert!(matches!(
            parse_ng_block::<CaptureLE>(&v[..30]),
            Err(Err::Incomplete(_))
        ));
    }

    #[test]
    fn test_other_blocks_and_bad_lengths() {
        // interface statistics block with a 4-byte body
        let isb = hex!("05 00 00 00 10 00 00 00 00 00 00 00 10 00 00 00");
        let (rem, block) = parse_ng_block::<CaptureLE>(&isb).expect("isb");
        assert!(rem.is_empty());
        assert_eq!(block, NgBlock::Other(BlockKind::InterfaceStatistics));
        let bad = hex!("05 00 00 00 10 00 00 00 00 00 00 00 14 00 00 00");
        assert!(matches!(
            parse_ng_block::<CaptureLE>(&bad),
            Err(Err::Failure(CaptureError::LengthMismatch { .. }))
        ));
    }

    #[test]
    fn test_ts_resolution() {
        assert_eq!(build_ts_resolution(6), Some(1_000_000));
        assert_eq!(build_ts_resolution(0x80 | 10), Some(1024));
        assert_eq!(build_ts_resolution(20), None);
        // nanosecond timestamp, 1.5s
        assert_eq!(build_ts_usec(0, 1_500_000_000, 0, 1_000_000_000), (1, 500_000));
    }
}
