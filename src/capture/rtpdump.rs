//! rtpdump file format
//!
//! Written by the `rtpdump` tool of rtptools. The file starts with a text line
//! `#!rtpplay1.0 <address>/<port>\n` naming the destination of the recorded stream, followed by
//! a 16-byte binary header (start time, source address and port). Each record is an 8-byte
//! header followed by the bare RTP (or RTCP) packet, without IP or UDP envelope. All binary
//! fields are big-endian.

use std::net::Ipv4Addr;

use cookie_factory::bytes::{be_u16, be_u32};
use cookie_factory::combinator::slice;
use cookie_factory::gen;
use cookie_factory::sequence::tuple;
use nom::bytes::streaming::{tag, take, take_while_m_n};
use nom::number::streaming::{be_u16 as p_be_u16, be_u32 as p_be_u32};
use nom::IResult;

use crate::error::CaptureError;
use crate::wire::{ipv4_checksum, IPPROTO_UDP, IPV4_HEADER_LEN, UDP_HEADER_LEN};

pub const RTPDUMP_MAGIC: &[u8] = b"#!rtpplay1.0 ";
pub const RTPDUMP_BINARY_HEADER_LEN: usize = 16;
pub const RTPDUMP_RECORD_HEADER_LEN: usize = 8;

/// Source address used when the file header does not carry one
pub const PLACEHOLDER_SRC_ADDR: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);
pub const PLACEHOLDER_SRC_PORT: u16 = 10000;
/// Destination used when no file header is available
pub const PLACEHOLDER_DST_ADDR: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 2);
pub const PLACEHOLDER_DST_PORT: u16 = 10002;

/// rtpdump file header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RtpDumpHeader {
    pub dst_addr: Ipv4Addr,
    pub dst_port: u16,
    pub start_sec: u32,
    pub start_usec: u32,
    /// Source address, `0.0.0.0` when the recorder did not know it
    pub src_addr: Ipv4Addr,
    pub src_port: u16,
}

impl RtpDumpHeader {
    pub fn new(dst_addr: Ipv4Addr, dst_port: u16) -> RtpDumpHeader {
        RtpDumpHeader {
            dst_addr,
            dst_port,
            start_sec: 0,
            start_usec: 0,
            src_addr: Ipv4Addr::UNSPECIFIED,
            src_port: 0,
        }
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, CaptureError> {
        let text = format!("#!rtpplay1.0 {}/{}\n", self.dst_addr, self.dst_port);
        let v = Vec::with_capacity(text.len() + RTPDUMP_BINARY_HEADER_LEN);
        let (v, _) = gen(
            tuple((
                slice(text.as_bytes()),
                be_u32(self.start_sec),
                be_u32(self.start_usec),
                be_u32(u32::from(self.src_addr)),
                be_u16(self.src_port),
                be_u16(0),
            )),
            v,
        )?;
        Ok(v)
    }

    /// Source endpoint, substituting placeholders for unknown values
    pub fn source(&self) -> (Ipv4Addr, u16) {
        let addr = if self.src_addr.is_unspecified() {
            PLACEHOLDER_SRC_ADDR
        } else {
            self.src_addr
        };
        let port = if self.src_port == 0 {
            PLACEHOLDER_SRC_PORT
        } else {
            self.src_port
        };
        (addr, port)
    }
}

fn invalid(what: &'static str) -> impl Fn(CaptureError) -> CaptureError {
    move |_| CaptureError::InvalidRtpDumpHeader(what)
}

fn parse_decimal<T: std::str::FromStr>(
    b: &[u8],
    what: &'static str,
) -> Result<T, nom::Err<CaptureError>> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(nom::Err::Failure(CaptureError::InvalidRtpDumpHeader(what)))
}

/// Read the rtpdump text line and binary header
///
/// The address is at most 15 characters (dotted quad) and the port at most 5 digits; longer
/// fields are rejected rather than scanned for.
pub fn parse_rtpdump_header(i: &[u8]) -> IResult<&[u8], RtpDumpHeader, CaptureError> {
    let (i, _) = tag(RTPDUMP_MAGIC)(i).map_err(|e| e.map(invalid("missing shebang")))?;
    let (i, addr) = take_while_m_n(1, 15, |c: u8| c.is_ascii_digit() || c == b'.')(i)
        .map_err(|e| e.map(invalid("destination address")))?;
    let (i, _) = tag(&b"/"[..])(i).map_err(|e| e.map(invalid("missing port separator")))?;
    let (i, port) = take_while_m_n(1, 5, |c: u8| c.is_ascii_digit())(i)
        .map_err(|e| e.map(invalid("destination port")))?;
    let (i, _) = tag(&b"\n"[..])(i).map_err(|e| e.map(invalid("unterminated text line")))?;
    let dst_addr = parse_decimal::<Ipv4Addr>(addr, "destination address")?;
    let dst_port = parse_decimal::<u16>(port, "destination port")?;
    let (i, start_sec) = p_be_u32(i)?;
    let (i, start_usec) = p_be_u32(i)?;
    let (i, src_addr) = p_be_u32(i)?;
    let (i, src_port) = p_be_u16(i)?;
    let (i, _padding) = p_be_u16(i)?;
    let header = RtpDumpHeader {
        dst_addr,
        dst_port,
        start_sec,
        start_usec,
        src_addr: Ipv4Addr::from(src_addr),
        src_port,
    };
    Ok((i, header))
}

/// One rtpdump record
#[derive(Debug, PartialEq, Eq)]
pub struct RtpDumpRecord<'a> {
    /// Record length, header included
    pub length: u16,
    /// Length of the original RTP packet, 0 for RTCP
    pub plen: u16,
    /// Milliseconds since the file start time
    pub offset_ms: u32,
    pub data: &'a [u8],
}

impl<'a> RtpDumpRecord<'a> {
    pub fn to_vec(&self) -> Result<Vec<u8>, CaptureError> {
        let v = Vec::with_capacity(RTPDUMP_RECORD_HEADER_LEN + self.data.len());
        let (v, _) = gen(
            tuple((
                be_u16(self.length),
                be_u16(self.plen),
                be_u32(self.offset_ms),
                slice(self.data),
            )),
            v,
        )?;
        Ok(v)
    }
}

pub fn parse_rtpdump_record(i: &[u8]) -> IResult<&[u8], RtpDumpRecord, CaptureError> {
    let (i, length) = p_be_u16(i)?;
    let (i, plen) = p_be_u16(i)?;
    let (i, offset_ms) = p_be_u32(i)?;
    if usize::from(length) < RTPDUMP_RECORD_HEADER_LEN {
        return Err(nom::Err::Failure(CaptureError::LengthMismatch {
            what: "rtpdump record",
            declared: usize::from(length),
            actual: RTPDUMP_RECORD_HEADER_LEN,
        }));
    }
    let (i, data) = take(usize::from(length) - RTPDUMP_RECORD_HEADER_LEN)(i)?;
    let record = RtpDumpRecord {
        length,
        plen,
        offset_ms,
        data,
    };
    Ok((i, record))
}

/// Wrap a bare RTP packet into an IPv4/UDP datagram
///
/// Addresses and ports come from the file header when available, otherwise placeholders are
/// used. The IPv4 total length is `rtp.len() + 28`.
pub fn synthesize_ipv4_udp(
    header: Option<&RtpDumpHeader>,
    rtp: &[u8],
) -> Result<Vec<u8>, CaptureError> {
    let total = IPV4_HEADER_LEN + UDP_HEADER_LEN + rtp.len();
    if total > usize::from(u16::MAX) {
        return Err(CaptureError::LengthMismatch {
            what: "synthesized datagram",
            declared: total,
            actual: usize::from(u16::MAX),
        });
    }
    let ((src, sport), (dst, dport)) = match header {
        Some(h) => (h.source(), (h.dst_addr, h.dst_port)),
        None => (
            (PLACEHOLDER_SRC_ADDR, PLACEHOLDER_SRC_PORT),
            (PLACEHOLDER_DST_ADDR, PLACEHOLDER_DST_PORT),
        ),
    };
    let mut v = Vec::with_capacity(total);
    v.extend_from_slice(&[0x45, 0x00]);
    v.extend_from_slice(&(total as u16).to_be_bytes());
    // id 0, don't fragment, ttl 64
    v.extend_from_slice(&[0x00, 0x00, 0x40, 0x00, 64, IPPROTO_UDP, 0x00, 0x00]);
    v.extend_from_slice(&src.octets());
    v.extend_from_slice(&dst.octets());
    let csum = ipv4_checksum(&v[..IPV4_HEADER_LEN]);
    v[10..12].copy_from_slice(&csum.to_be_bytes());
    v.extend_from_slice(&sport.to_be_bytes());
    v.extend_from_slice(&dport.to_be_bytes());
    v.extend_from_slice(&((UDP_HEADER_LEN + rtp.len()) as u16).to_be_bytes());
    v.extend_from_slice(&[0x00, 0x00]);
    v.extend_from_slice(rtp);
    Ok(v)
}
