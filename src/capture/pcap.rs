//! Legacy PCAP file format
//!
//! See <https://wiki.wireshark.org/Development/LibpcapFileFormat> for details.
//!
//! A 24-byte global header is followed by records, each made of a 16-byte record header and
//! `caplen` bytes of link-layer data.

use cookie_factory::bytes::{le_i32, le_u16, le_u32};
use cookie_factory::combinator::slice;
use cookie_factory::gen;
use cookie_factory::sequence::tuple;
use nom::bytes::streaming::take;
use nom::number::streaming::{
    be_i32, be_u16, be_u32, le_i32 as p_le_i32, le_u16 as p_le_u16, le_u32 as p_le_u32,
};
use nom::IResult;

use crate::endianness::CaptureEndianness;
use crate::error::CaptureError;
use crate::linktype::Linktype;

pub const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
pub const PCAP_MAGIC_NSEC: u32 = 0xa1b2_3c4d;
pub const PCAP_HEADER_LEN: usize = 24;
pub const PCAP_RECORD_HEADER_LEN: usize = 16;

/// Records larger than this are rejected instead of buffered
pub const MAX_RECORD_LEN: u32 = 0x0010_0000;

/// PCAP global header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PcapHeader {
    /// File format and byte ordering. `0xa1b2c3d4` / `0xa1b23c4d` in native order, or the
    /// swapped values for big-endian files.
    pub magic_number: u32,
    pub version_major: u16,
    pub version_minor: u16,
    /// Correction time in seconds between GMT (UTC) and the local timezone
    pub thiszone: i32,
    pub sigfigs: u32,
    /// Max length of captured packets, in octets
    pub snaplen: u32,
    pub network: Linktype,
}

impl PcapHeader {
    pub fn new(network: Linktype, snaplen: u32) -> PcapHeader {
        PcapHeader {
            magic_number: PCAP_MAGIC,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen,
            network,
        }
    }

    pub fn is_bigendian(&self) -> bool {
        // works for both nanosecond and microsecond resolution timestamps
        (self.magic_number & 0xFFFF) == 0xb2a1
    }

    pub fn is_nanosecond_precision(&self) -> bool {
        self.magic_number == PCAP_MAGIC_NSEC || self.magic_number == 0x4d3c_b2a1
    }

    /// Serialize as little-endian
    pub fn to_vec(&self) -> Result<Vec<u8>, CaptureError> {
        let v = Vec::with_capacity(PCAP_HEADER_LEN);
        let (v, _) = gen(
            tuple((
                le_u32(PCAP_MAGIC),
                le_u16(self.version_major),
                le_u16(self.version_minor),
                le_i32(self.thiszone),
                le_u32(self.sigfigs),
                le_u32(self.snaplen),
                le_u32(self.network.0 as u32),
            )),
            v,
        )?;
        Ok(v)
    }
}

/// Read the PCAP global header
///
/// The magic number is read as little-endian; its swapped forms select big-endian parsing for
/// the rest of the file.
pub fn parse_pcap_header(i: &[u8]) -> IResult<&[u8], PcapHeader, CaptureError> {
    let (i, magic_number) = p_le_u32(i)?;
    match magic_number {
        PCAP_MAGIC | PCAP_MAGIC_NSEC => {
            let (i, version_major) = p_le_u16(i)?;
            let (i, version_minor) = p_le_u16(i)?;
            let (i, thiszone) = p_le_i32(i)?;
            let (i, sigfigs) = p_le_u32(i)?;
            let (i, snaplen) = p_le_u32(i)?;
            let (i, network) = p_le_i32(i)?;
            let header = PcapHeader {
                magic_number,
                version_major,
                version_minor,
                thiszone,
                sigfigs,
                snaplen,
                network: Linktype(network),
            };
            Ok((i, header))
        }
        0xd4c3_b2a1 | 0x4d3c_b2a1 => {
            let (i, version_major) = be_u16(i)?;
            let (i, version_minor) = be_u16(i)?;
            let (i, thiszone) = be_i32(i)?;
            let (i, sigfigs) = be_u32(i)?;
            let (i, snaplen) = be_u32(i)?;
            let (i, network) = be_i32(i)?;
            let header = PcapHeader {
                magic_number,
                version_major,
                version_minor,
                thiszone,
                sigfigs,
                snaplen,
                network: Linktype(network),
            };
            Ok((i, header))
        }
        _ => Err(nom::Err::Error(CaptureError::HeaderNotRecognized)),
    }
}

/// One record of a legacy pcap file
#[derive(Debug, PartialEq, Eq)]
pub struct LegacyPcapRecord<'a> {
    pub ts_sec: u32,
    /// Microseconds, or nanoseconds for nanosecond-precision files
    pub ts_frac: u32,
    pub caplen: u32,
    pub origlen: u32,
    pub data: &'a [u8],
}

impl<'a> LegacyPcapRecord<'a> {
    /// Serialize as little-endian. Pcap records have no alignment constraints.
    pub fn to_vec(&self) -> Result<Vec<u8>, CaptureError> {
        let v = Vec::with_capacity(PCAP_RECORD_HEADER_LEN + self.data.len());
        let (v, _) = gen(
            tuple((
                le_u32(self.ts_sec),
                le_u32(self.ts_frac),
                le_u32(self.caplen),
                le_u32(self.origlen),
                slice(self.data),
            )),
            v,
        )?;
        Ok(v)
    }
}

/// Read a PCAP record header and data
pub(crate) fn parse_pcap_record<En: CaptureEndianness>(
    i: &[u8],
) -> IResult<&[u8], LegacyPcapRecord, CaptureError> {
    if i.len() < PCAP_RECORD_HEADER_LEN {
        return Err(nom::Err::Incomplete(nom::Needed::new(
            PCAP_RECORD_HEADER_LEN - i.len(),
        )));
    }
    let (i, ts_sec) = En::parse_u32(i)?;
    let (i, ts_frac) = En::parse_u32(i)?;
    let (i, caplen) = En::parse_u32(i)?;
    let (i, origlen) = En::parse_u32(i)?;
    if caplen > MAX_RECORD_LEN {
        return Err(nom::Err::Failure(CaptureError::LengthMismatch {
            what: "pcap record",
            declared: caplen as usize,
            actual: MAX_RECORD_LEN as usize,
        }));
    }
    let (i, data) = take(caplen as usize)(i)?;
    let record = LegacyPcapRecord {
        ts_sec,
        ts_frac,
        caplen,
        origlen,
        data,
    };
    Ok((i, record))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::endianness::{CaptureBE, CaptureLE};
    use hex_literal::hex;

    // ntp.pcap header (big-endian)
    pub const PCAP_HDR_BE: &[u8] = &hex!(
        "
A1 B2 C3 D4 00 02 00 04 00 00 00 00 00 00 00 00
00 04 00 00 00 00 00 65"
    );

    pub const PCAP_HDR_NSEC: &[u8] = &hex!(
        "
4D 3C B2 A1 02 00 04 00 00 00 00 00 00 00 00 00
00 00 04 00 01 00 00 00"
    );

    #[test]
    fn test_parse_pcap_header_be() {
        let (rem, hdr) = parse_pcap_header(PCAP_HDR_BE).expect("header parsing failed");
        assert!(rem.is_empty());
        assert!(hdr.is_bigendian());
        assert_eq!(hdr.version_major, 2);
        assert_eq!(hdr.snaplen, 262_144);
        assert_eq!(hdr.network, Linktype::RAW);
    }

    #[test]
    fn test_parse_nanosecond_precision_pcap_header() {
        let (_, hdr) = parse_pcap_header(PCAP_HDR_NSEC).expect("header parsing failed");
        assert_eq!(hdr.magic_number, PCAP_MAGIC_NSEC);
        assert!(hdr.is_nanosecond_precision());
        assert!(!hdr.is_bigendian());
        assert_eq!(hdr.network, Linktype::ETHERNET);
    }

    #[test]
    fn test_header_to_vec() {
        let hdr = PcapHeader::new(Linktype::ETHERNET, 65535);
        let v = hdr.to_vec().expect("serialize");
        assert_eq!(v.len(), PCAP_HEADER_LEN);
        let (_, back) = parse_pcap_header(&v).expect("parse");
        assert_eq!(back, hdr);
    }

    #[test]
    fn test_parse_record_incomplete_and_be() {
        let rec = hex!("00 00 00 01 00 00 00 02 00 00 00 04 00 00 00 08 de ad be ef");
        let (rem, r) = parse_pcap_record::<CaptureBE>(&rec).expect("record");
        assert!(rem.is_empty());
        assert_eq!(r.ts_sec, 1);
        assert_eq!(r.origlen, 8);
        assert_eq!(r.data, &hex!("de ad be ef"));
        assert!(matches!(
            parse_pcap_record::<CaptureBE>(&rec[..18]),
            Err(nom::Err::Incomplete(_))
        ));
        assert!(matches!(
            parse_pcap_record::<CaptureLE>(&rec),
            Err(nom::Err::Failure(CaptureError::LengthMismatch { .. }))
        ));
    }
}
