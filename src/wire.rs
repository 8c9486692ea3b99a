//! Bounds-checked views over network headers
//!
//! All multi-byte wire fields are big-endian (network byte order). Each parser checks the
//! declared header length against the input before any field is read, and returns a nom error
//! instead of indexing out of range.

use nom::bytes::complete::take;
use nom::error::{make_error, ErrorKind};
use nom::number::complete::{be_u16, be_u32, be_u8};
use nom::IResult;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_VLAN: u16 = 0x8100;
pub const ETHERTYPE_IPV6: u16 = 0x86dd;

pub const IPPROTO_HOPOPTS: u8 = 0;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_ROUTING: u8 = 43;
pub const IPPROTO_FRAGMENT: u8 = 44;
pub const IPPROTO_AH: u8 = 51;
pub const IPPROTO_DSTOPTS: u8 = 60;

pub const IPV4_HEADER_LEN: usize = 20;
pub const IPV6_HEADER_LEN: usize = 40;
pub const IPV6_FRAGMENT_HEADER_LEN: usize = 8;
pub const UDP_HEADER_LEN: usize = 8;
pub const TCP_HEADER_LEN: usize = 20;
pub const RTP_HEADER_LEN: usize = 12;

/// Return the IP version nibble of a network-layer buffer
#[inline]
pub fn ip_version(data: &[u8]) -> Option<u8> {
    data.first().map(|b| b >> 4)
}

/// IPv4 header, options skipped
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Header length in bytes (IHL * 4)
    pub header_len: usize,
    pub tos: u8,
    pub total_length: u16,
    pub identification: u16,
    /// The 3 flag bits, right-aligned (bit 0 = MF, bit 1 = DF)
    pub flags: u8,
    /// Fragment offset, in 8-byte units
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    #[inline]
    pub fn more_fragments(&self) -> bool {
        self.flags & 0x1 != 0
    }

    #[inline]
    pub fn is_fragment(&self) -> bool {
        self.more_fragments() || self.fragment_offset != 0
    }
}

/// Parse an IPv4 header, consuming `IHL * 4` bytes
pub fn parse_ipv4_header(i: &[u8]) -> IResult<&[u8], Ipv4Header> {
    let start = i;
    let (i, vihl) = be_u8(i)?;
    let header_len = usize::from(vihl & 0x0f) * 4;
    if vihl >> 4 != 4 || header_len < IPV4_HEADER_LEN {
        return Err(nom::Err::Error(make_error(start, ErrorKind::Verify)));
    }
    let (i, tos) = be_u8(i)?;
    let (i, total_length) = be_u16(i)?;
    let (i, identification) = be_u16(i)?;
    let (i, flags_offset) = be_u16(i)?;
    let (i, ttl) = be_u8(i)?;
    let (i, protocol) = be_u8(i)?;
    let (i, checksum) = be_u16(i)?;
    let (i, src) = be_u32(i)?;
    let (i, dst) = be_u32(i)?;
    let (i, _options) = take(header_len - IPV4_HEADER_LEN)(i)?;
    let header = Ipv4Header {
        header_len,
        tos,
        total_length,
        identification,
        flags: (flags_offset >> 13) as u8,
        fragment_offset: flags_offset & 0x1fff,
        ttl,
        protocol,
        checksum,
        src: Ipv4Addr::from(src),
        dst: Ipv4Addr::from(dst),
    };
    Ok((i, header))
}

/// Compute the IPv4 header checksum, treating the checksum field as zero
pub fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for (idx, chunk) in header.chunks(2).enumerate() {
        if idx == 5 {
            continue;
        }
        let word = match chunk {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [hi] => u16::from_be_bytes([*hi, 0]),
            _ => 0,
        };
        sum += u32::from(word);
    }
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Fixed IPv6 header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ipv6Header {
    pub traffic_class: u8,
    pub flow_label: u32,
    pub payload_length: u16,
    pub next_header: u8,
    pub hop_limit: u8,
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
}

fn be_ipv6(i: &[u8]) -> IResult<&[u8], Ipv6Addr> {
    let (i, b) = take(16usize)(i)?;
    let mut octets = [0u8; 16];
    octets.copy_from_slice(b);
    Ok((i, Ipv6Addr::from(octets)))
}

/// Parse the fixed 40-byte IPv6 header (extension headers are left in the remainder)
pub fn parse_ipv6_header(i: &[u8]) -> IResult<&[u8], Ipv6Header> {
    let start = i;
    let (i, vtf) = be_u32(i)?;
    if vtf >> 28 != 6 {
        return Err(nom::Err::Error(make_error(start, ErrorKind::Verify)));
    }
    let (i, payload_length) = be_u16(i)?;
    let (i, next_header) = be_u8(i)?;
    let (i, hop_limit) = be_u8(i)?;
    let (i, src) = be_ipv6(i)?;
    let (i, dst) = be_ipv6(i)?;
    let header = Ipv6Header {
        traffic_class: ((vtf >> 20) & 0xff) as u8,
        flow_label: vtf & 0x000f_ffff,
        payload_length,
        next_header,
        hop_limit,
        src,
        dst,
    };
    Ok((i, header))
}

/// IPv6 fragmentation extension header (RFC 8200, section 4.5)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ipv6FragmentHeader {
    pub next_header: u8,
    /// Fragment offset, in 8-byte units
    pub fragment_offset: u16,
    pub more_fragments: bool,
    pub identification: u32,
}

pub fn parse_ipv6_fragment_header(i: &[u8]) -> IResult<&[u8], Ipv6FragmentHeader> {
    let (i, next_header) = be_u8(i)?;
    let (i, _reserved) = be_u8(i)?;
    let (i, offset_flags) = be_u16(i)?;
    let (i, identification) = be_u32(i)?;
    let header = Ipv6FragmentHeader {
        next_header,
        fragment_offset: offset_flags >> 3,
        more_fragments: offset_flags & 0x1 != 0,
        identification,
    };
    Ok((i, header))
}

/// Result of walking an IPv6 extension header chain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ipv6Chain {
    /// Upper-layer protocol after all extension headers
    pub protocol: u8,
    /// Offset of the upper-layer header from the start of the datagram
    pub payload_offset: usize,
    /// Offset and content of the fragment extension header, if present
    pub fragment: Option<(usize, Ipv6FragmentHeader)>,
}

const MAX_IPV6_EXTENSIONS: usize = 16;

/// Walk the extension headers of an IPv6 datagram
pub fn walk_ipv6_extensions(datagram: &[u8]) -> Option<Ipv6Chain> {
    let (_, header) = parse_ipv6_header(datagram).ok()?;
    let mut next = header.next_header;
    let mut pos = IPV6_HEADER_LEN;
    let mut fragment = None;
    for _ in 0..MAX_IPV6_EXTENSIONS {
        let ext = datagram.get(pos..)?;
        let len = match next {
            IPPROTO_FRAGMENT => {
                let (_, fh) = parse_ipv6_fragment_header(ext).ok()?;
                fragment = Some((pos, fh));
                next = fh.next_header;
                pos += IPV6_FRAGMENT_HEADER_LEN;
                continue;
            }
            IPPROTO_HOPOPTS | IPPROTO_ROUTING | IPPROTO_DSTOPTS => {
                (usize::from(*ext.get(1)?) + 1) * 8
            }
            IPPROTO_AH => (usize::from(*ext.get(1)?) + 2) * 4,
            _ => {
                return Some(Ipv6Chain {
                    protocol: next,
                    payload_offset: pos,
                    fragment,
                })
            }
        };
        if ext.len() < len {
            return None;
        }
        next = *ext.first()?;
        pos += len;
    }
    None
}

/// Convert an address to the 128-bit form used in fragment keys
///
/// IPv4 addresses are stored in their IPv4-mapped IPv6 form.
#[inline]
pub fn addr_to_u128(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(a) => u128::from(a.to_ipv6_mapped()),
        IpAddr::V6(a) => u128::from(a),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
    pub checksum: u16,
}

pub fn parse_udp_header(i: &[u8]) -> IResult<&[u8], UdpHeader> {
    let (i, src_port) = be_u16(i)?;
    let (i, dst_port) = be_u16(i)?;
    let (i, length) = be_u16(i)?;
    let (i, checksum) = be_u16(i)?;
    Ok((
        i,
        UdpHeader {
            src_port,
            dst_port,
            length,
            checksum,
        },
    ))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub sequence: u32,
    pub acknowledgment: u32,
    /// Header length in bytes (data offset * 4)
    pub header_len: usize,
    pub flags: u16,
}

/// Parse a TCP header, consuming the options
pub fn parse_tcp_header(i: &[u8]) -> IResult<&[u8], TcpHeader> {
    let start = i;
    let (i, src_port) = be_u16(i)?;
    let (i, dst_port) = be_u16(i)?;
    let (i, sequence) = be_u32(i)?;
    let (i, acknowledgment) = be_u32(i)?;
    let (i, offset_flags) = be_u16(i)?;
    let header_len = usize::from(offset_flags >> 12) * 4;
    if header_len < TCP_HEADER_LEN {
        return Err(nom::Err::Error(make_error(start, ErrorKind::Verify)));
    }
    let (i, _window) = be_u16(i)?;
    let (i, _checksum) = be_u16(i)?;
    let (i, _urgent) = be_u16(i)?;
    let (i, _options) = take(header_len - TCP_HEADER_LEN)(i)?;
    let header = TcpHeader {
        src_port,
        dst_port,
        sequence,
        acknowledgment,
        header_len,
        flags: offset_flags & 0x01ff,
    };
    Ok((i, header))
}

/// RTP fixed header (RFC 3550, section 5.1)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    /// Total header length: fixed part, CSRC list and header extension
    pub header_len: usize,
}

/// Parse an RTP header, including the CSRC list and header extension
pub fn parse_rtp_header(i: &[u8]) -> IResult<&[u8], RtpHeader> {
    let start = i;
    let (i, b0) = be_u8(i)?;
    let (i, b1) = be_u8(i)?;
    let (i, sequence) = be_u16(i)?;
    let (i, timestamp) = be_u32(i)?;
    let (i, ssrc) = be_u32(i)?;
    let csrc_count = b0 & 0x0f;
    let (mut i, _csrc) = take(usize::from(csrc_count) * 4)(i)?;
    let mut header_len = RTP_HEADER_LEN + usize::from(csrc_count) * 4;
    let extension = b0 & 0x10 != 0;
    if extension {
        let (rem, _profile) = be_u16(i)?;
        let (rem, words) = be_u16(rem)?;
        let (rem, _ext) = take(usize::from(words) * 4)(rem)?;
        header_len += 4 + usize::from(words) * 4;
        i = rem;
    }
    let version = b0 >> 6;
    if version != 2 {
        return Err(nom::Err::Error(make_error(start, ErrorKind::Verify)));
    }
    let header = RtpHeader {
        version,
        padding: b0 & 0x20 != 0,
        extension,
        csrc_count,
        marker: b1 & 0x80 != 0,
        payload_type: b1 & 0x7f,
        sequence,
        timestamp,
        ssrc,
        header_len,
    };
    Ok((i, header))
}

/// Compute the RTP payload length implied by the header of `udp_payload`
///
/// The result is signed: header, extension and padding lengths taken from a buffer that is not
/// RTP frequently add up to more than the buffer itself.
pub fn rtp_payload_len(udp_payload: &[u8]) -> i64 {
    let len = udp_payload.len() as i64;
    if udp_payload.len() < RTP_HEADER_LEN {
        return len - RTP_HEADER_LEN as i64;
    }
    let b0 = udp_payload[0];
    let mut header_len = (RTP_HEADER_LEN + usize::from(b0 & 0x0f) * 4) as i64;
    if b0 & 0x10 != 0 {
        let pos = header_len as usize;
        match udp_payload.get(pos + 2..pos + 4) {
            Some(w) => header_len += 4 + i64::from(u16::from_be_bytes([w[0], w[1]])) * 4,
            None => header_len += 4,
        }
    }
    let padding = if b0 & 0x20 != 0 {
        udp_payload.last().map_or(0, |p| i64::from(*p))
    } else {
        0
    };
    len - header_len - padding
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hex_literal::hex;

    // IPv4/UDP, 10.0.0.1:5000 -> 10.0.0.5:5004, RTP seq 0x0102, 4-byte payload
    pub(crate) const IPV4_UDP_RTP: &[u8] = &hex!(
        "
45 00 00 2c 12 34 00 00 40 11 00 00 0a 00 00 01
0a 00 00 05 13 88 13 8c 00 18 00 00 80 00 01 02
00 00 03 e8 de ad be ef 01 02 03 04"
    );

    #[test]
    fn test_parse_ipv4() {
        let (rem, hdr) = parse_ipv4_header(IPV4_UDP_RTP).expect("ipv4");
        assert_eq!(hdr.header_len, 20);
        assert_eq!(hdr.total_length, 44);
        assert_eq!(hdr.protocol, IPPROTO_UDP);
        assert_eq!(hdr.dst, Ipv4Addr::new(10, 0, 0, 5));
        assert!(!hdr.is_fragment());
        let (rem, udp) = parse_udp_header(rem).expect("udp");
        assert_eq!(udp.dst_port, 5004);
        let (_, rtp) = parse_rtp_header(rem).expect("rtp");
        assert_eq!(rtp.sequence, 0x0102);
        assert_eq!(rtp.ssrc, 0xdead_beef);
        assert_eq!(rtp_payload_len(rem), 4);
    }

    #[test]
    fn test_ipv4_bad_ihl() {
        let mut buf = IPV4_UDP_RTP.to_vec();
        buf[0] = 0x44;
        assert!(parse_ipv4_header(&buf).is_err());
        // header claims 60 bytes, only 44 available
        buf[0] = 0x4f;
        assert!(parse_ipv4_header(&buf).is_err());
    }

    #[test]
    fn test_ipv4_checksum() {
        // classic example from RFC 1071 discussions
        let hdr = hex!("45 00 00 73 00 00 40 00 40 11 b8 61 c0 a8 00 01 c0 a8 00 c7");
        assert_eq!(ipv4_checksum(&hdr), 0xb861);
    }

    #[test]
    fn test_walk_ipv6_fragment() {
        let mut d = vec![0u8; 40];
        d[0] = 0x60;
        d[4..6].copy_from_slice(&16u16.to_be_bytes());
        d[6] = IPPROTO_FRAGMENT;
        // fragment header: next=UDP, offset 185 (1480 bytes), MF, id 0x01020304
        d.extend_from_slice(&hex!("11 00 05 c9 01 02 03 04"));
        d.extend_from_slice(&[0u8; 8]);
        let chain = walk_ipv6_extensions(&d).expect("chain");
        assert_eq!(chain.protocol, IPPROTO_UDP);
        assert_eq!(chain.payload_offset, 48);
        let (pos, fh) = chain.fragment.expect("fragment header");
        assert_eq!(pos, 40);
        assert_eq!(fh.fragment_offset, 185);
        assert!(fh.more_fragments);
        assert_eq!(fh.identification, 0x0102_0304);
    }

    #[test]
    fn test_rtp_payload_len_negative() {
        // version 2, 15 CSRCs claimed in an 16-byte buffer
        let buf = hex!("8f 00 00 01 00 00 00 00 00 00 00 01 00 00 00 00");
        assert!(rtp_payload_len(&buf) < 0);
    }
}
