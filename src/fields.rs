//! Packet field parsing interface
//!
//! The filter and the analyzer do not decode protocol headers themselves: they consume the
//! structured [`PacketFields`] produced by a [`FieldParser`]. Applications with a richer
//! decoder implement the trait; [`BasicFieldParser`] covers IPv4/IPv6, UDP, TCP and RTP.

use crate::wire::*;
use std::net::{IpAddr, Ipv4Addr};
use std::ops::RangeInclusive;

/// Position of a datagram within an IP fragment set
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FragmentClass {
    /// Not fragmented
    Whole,
    /// Offset 0, more fragments follow
    First,
    Middle,
    /// Non-zero offset, no more fragments
    Last,
}

impl FragmentClass {
    pub fn from_parts(offset: u16, more_fragments: bool) -> FragmentClass {
        match (offset, more_fragments) {
            (0, false) => FragmentClass::Whole,
            (0, true) => FragmentClass::First,
            (_, true) => FragmentClass::Middle,
            (_, false) => FragmentClass::Last,
        }
    }

    #[inline]
    pub fn is_fragment(self) -> bool {
        self != FragmentClass::Whole
    }

    /// True for fragments that do not carry the transport header
    #[inline]
    pub fn is_trailing(self) -> bool {
        matches!(self, FragmentClass::Middle | FragmentClass::Last)
    }
}

/// Content classification of a packet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContentClass {
    Media,
    /// Silence insertion descriptor / comfort noise
    Sid,
    /// RFC 4733 telephone-event
    Dtmf,
    Rtcp,
    Sip,
    Other,
}

/// RTP header fields
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RtpFields {
    pub payload_type: u8,
    pub marker: bool,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub header_len: usize,
    pub payload_len: usize,
}

/// Structured fields of one network-layer packet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketFields {
    pub ip_version: u8,
    pub protocol: u8,
    pub src: IpAddr,
    pub dst: IpAddr,
    /// IP header length, including IPv6 extension headers
    pub ip_header_len: usize,
    /// Network-layer packet length
    pub packet_len: usize,
    /// IPv4 header checksum (`None` for IPv6)
    pub ipv4_checksum: Option<u16>,
    pub fragment: FragmentClass,
    pub fragment_offset: u16,
    pub src_port: u16,
    pub dst_port: u16,
    pub tcp_sequence: u32,
    pub tcp_acknowledgment: u32,
    pub udp_checksum: u16,
    /// Offset of the transport payload from the start of the packet
    pub payload_offset: usize,
    pub payload_len: usize,
    pub rtp: Option<RtpFields>,
    pub content: ContentClass,
}

/// Parse a raw network-layer buffer into structured fields
pub trait FieldParser {
    /// Returns `None` if the buffer does not start with a valid IP header
    fn parse_fields(&self, data: &[u8]) -> Option<PacketFields>;
}

impl<F: FieldParser + ?Sized> FieldParser for &F {
    fn parse_fields(&self, data: &[u8]) -> Option<PacketFields> {
        (**self).parse_fields(data)
    }
}

/// RTP payload types 64..=95 collide with RTCP packet types 192..=223 (RFC 5761)
pub const RTCP_PAYLOAD_TYPES: RangeInclusive<u8> = 64..=95;
/// Static comfort-noise payload type (RFC 3389)
pub const CN_PAYLOAD_TYPE: u8 = 13;

/// Minimal field parser for IPv4/IPv6 with UDP/TCP and RTP
#[derive(Clone, Debug)]
pub struct BasicFieldParser {
    /// Dynamic payload types carrying telephone-event
    pub dtmf_payload_types: Vec<u8>,
    pub sip_ports: RangeInclusive<u16>,
}

impl Default for BasicFieldParser {
    fn default() -> Self {
        BasicFieldParser {
            dtmf_payload_types: vec![101],
            sip_ports: 5060..=5061,
        }
    }
}

impl BasicFieldParser {
    fn classify_udp(&self, fields: &mut PacketFields, payload: &[u8]) {
        if self.sip_ports.contains(&fields.dst_port) || self.sip_ports.contains(&fields.src_port) {
            if parse_rtp_header(payload).is_err() {
                fields.content = ContentClass::Sip;
                return;
            }
        }
        let rtp = match parse_rtp_header(payload) {
            Ok((_, rtp)) => rtp,
            Err(_) => return,
        };
        if RTCP_PAYLOAD_TYPES.contains(&rtp.payload_type) {
            fields.content = ContentClass::Rtcp;
            return;
        }
        let payload_len = rtp_payload_len(payload);
        if payload_len < 0 {
            return;
        }
        fields.content = if self.dtmf_payload_types.contains(&rtp.payload_type) {
            ContentClass::Dtmf
        } else if rtp.payload_type == CN_PAYLOAD_TYPE {
            ContentClass::Sid
        } else {
            ContentClass::Media
        };
        fields.rtp = Some(RtpFields {
            payload_type: rtp.payload_type,
            marker: rtp.marker,
            sequence: rtp.sequence,
            timestamp: rtp.timestamp,
            ssrc: rtp.ssrc,
            header_len: rtp.header_len,
            payload_len: payload_len as usize,
        });
    }
}

impl FieldParser for BasicFieldParser {
    fn parse_fields(&self, data: &[u8]) -> Option<PacketFields> {
        let mut fields = match ip_version(data)? {
            4 => {
                let (_, ip) = parse_ipv4_header(data).ok()?;
                PacketFields {
                    ip_version: 4,
                    protocol: ip.protocol,
                    src: IpAddr::V4(ip.src),
                    dst: IpAddr::V4(ip.dst),
                    ip_header_len: ip.header_len,
                    packet_len: data.len(),
                    ipv4_checksum: Some(ip.checksum),
                    fragment: FragmentClass::from_parts(ip.fragment_offset, ip.more_fragments()),
                    fragment_offset: ip.fragment_offset,
                    ..PacketFields::empty(data.len())
                }
            }
            6 => {
                let (_, ip) = parse_ipv6_header(data).ok()?;
                let chain = walk_ipv6_extensions(data)?;
                let (offset, more) = chain
                    .fragment
                    .map_or((0, false), |(_, fh)| (fh.fragment_offset, fh.more_fragments));
                PacketFields {
                    ip_version: 6,
                    protocol: chain.protocol,
                    src: IpAddr::V6(ip.src),
                    dst: IpAddr::V6(ip.dst),
                    ip_header_len: chain.payload_offset,
                    packet_len: data.len(),
                    fragment: FragmentClass::from_parts(offset, more),
                    fragment_offset: offset,
                    ..PacketFields::empty(data.len())
                }
            }
            _ => return None,
        };
        fields.payload_offset = fields.ip_header_len;
        fields.payload_len = data.len().saturating_sub(fields.ip_header_len);
        if fields.fragment.is_trailing() {
            return Some(fields);
        }
        let transport = &data[fields.ip_header_len.min(data.len())..];
        match fields.protocol {
            IPPROTO_UDP => {
                if let Ok((payload, udp)) = parse_udp_header(transport) {
                    fields.src_port = udp.src_port;
                    fields.dst_port = udp.dst_port;
                    fields.udp_checksum = udp.checksum;
                    fields.payload_offset += UDP_HEADER_LEN;
                    fields.payload_len = payload.len();
                    self.classify_udp(&mut fields, payload);
                }
            }
            IPPROTO_TCP => {
                if let Ok((payload, tcp)) = parse_tcp_header(transport) {
                    fields.src_port = tcp.src_port;
                    fields.dst_port = tcp.dst_port;
                    fields.tcp_sequence = tcp.sequence;
                    fields.tcp_acknowledgment = tcp.acknowledgment;
                    fields.payload_offset += tcp.header_len;
                    fields.payload_len = payload.len();
                    if self.sip_ports.contains(&tcp.dst_port)
                        || self.sip_ports.contains(&tcp.src_port)
                    {
                        fields.content = ContentClass::Sip;
                    }
                }
            }
            _ => (),
        }
        Some(fields)
    }
}

impl PacketFields {
    fn empty(packet_len: usize) -> PacketFields {
        PacketFields {
            ip_version: 0,
            protocol: 0,
            src: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dst: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            ip_header_len: 0,
            packet_len,
            ipv4_checksum: None,
            fragment: FragmentClass::Whole,
            fragment_offset: 0,
            src_port: 0,
            dst_port: 0,
            tcp_sequence: 0,
            tcp_acknowledgment: 0,
            udp_checksum: 0,
            payload_offset: 0,
            payload_len: 0,
            rtp: None,
            content: ContentClass::Other,
        }
    }

    /// Transport payload bytes of `data`, the buffer these fields were parsed from
    pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        let start = self.payload_offset.min(data.len());
        let end = (start + self.payload_len).min(data.len());
        &data[start..end]
    }
}
