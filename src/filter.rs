//! Packet filter
//!
//! Stateless predicates classifying records that the sequence analysis must ignore, and
//! detecting packets captured twice.

use std::fmt;
use std::ops::{Range, RangeInclusive};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::capture::PacketRecord;
use crate::fields::{ContentClass, PacketFields, RTCP_PAYLOAD_TYPES};
use crate::wire::{rtp_payload_len, ETHERTYPE_ARP, IPPROTO_TCP, IPPROTO_UDP};

/// Ethernet type/length values taken as 802.3 frames with an LLC header
///
/// Values from 0x0600 up are Ethernet II types; lengths below the minimum Ethernet payload
/// are left alone, as no real frame carries them.
pub const LLC_LENGTH_RANGE: Range<u16> = 46..0x0600;

/// Destination ports below this are treated as well-known services
pub const RESERVED_PORT_LIMIT: u16 = 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FilterConfig {
    pub discard_tcp: bool,
    pub discard_rtcp: bool,
    /// Ports carrying SIP, whose non-RTP UDP traffic is discarded
    pub sip_ports: RangeInclusive<u16>,
    /// Additional destination ports whose UDP packets are compared for duplicates even when
    /// their fragment classes differ
    pub duplicate_ports: Vec<u16>,
    /// Also require equal UDP checksums for duplicates. Off by default since checksum offload
    /// leaves garbage in captured checksums.
    pub compare_udp_checksum: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            discard_tcp: true,
            discard_rtcp: true,
            sip_ports: 5060..=5061,
            duplicate_ports: Vec::new(),
            compare_udp_checksum: false,
        }
    }
}

/// Why a record was discarded
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiscardReason {
    Arp,
    /// 802.2 LLC frame
    Llc,
    Tcp,
    Rtcp,
    /// Non-RTP UDP traffic on a SIP port
    SipControl,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            DiscardReason::Arp => "ARP",
            DiscardReason::Llc => "802.2 LLC",
            DiscardReason::Tcp => "TCP",
            DiscardReason::Rtcp => "RTCP",
            DiscardReason::SipControl => "SIP control",
        };
        f.write_str(s)
    }
}

/// A parsed packet together with the buffer it was parsed from
#[derive(Clone, Copy, Debug)]
pub struct PacketView<'a> {
    pub fields: &'a PacketFields,
    pub data: &'a [u8],
}

impl<'a> PacketView<'a> {
    pub fn new(fields: &'a PacketFields, data: &'a [u8]) -> PacketView<'a> {
        PacketView { fields, data }
    }
}

/// Returns true if `udp_payload` can be an RTP packet of a datagram of `packet_len` bytes
///
/// The version field must be 2 and the payload length implied by the header must be neither
/// negative nor larger than the packet.
pub fn looks_like_rtp(udp_payload: &[u8], packet_len: usize) -> bool {
    if udp_payload.first().map(|b| b >> 6) != Some(2) {
        return false;
    }
    let len = rtp_payload_len(udp_payload);
    len >= 0 && len as usize <= packet_len
}

/// UDP packet on a SIP port that is not RTP
pub fn is_sip_control(cfg: &FilterConfig, p: PacketView) -> bool {
    let f = p.fields;
    f.protocol == IPPROTO_UDP
        && !f.fragment.is_trailing()
        && cfg.sip_ports.contains(&f.dst_port)
        && !looks_like_rtp(f.payload(p.data), f.packet_len)
}

/// Classify a record that must not reach the analysis
///
/// `fields` is `None` when the record is not an IP packet; only link-level checks apply then.
pub fn discard_reason(
    cfg: &FilterConfig,
    record: &PacketRecord,
    fields: Option<&PacketFields>,
) -> Option<DiscardReason> {
    if record.ethertype == ETHERTYPE_ARP {
        return Some(DiscardReason::Arp);
    }
    if !record.link_header.is_empty() && LLC_LENGTH_RANGE.contains(&record.ethertype) {
        return Some(DiscardReason::Llc);
    }
    let f = fields?;
    if f.protocol == IPPROTO_TCP {
        return if cfg.discard_tcp {
            Some(DiscardReason::Tcp)
        } else {
            None
        };
    }
    if f.protocol != IPPROTO_UDP {
        return None;
    }
    let rtcp = f.content == ContentClass::Rtcp
        || f.rtp
            .map_or(false, |rtp| RTCP_PAYLOAD_TYPES.contains(&rtp.payload_type));
    if cfg.discard_rtcp && rtcp {
        return Some(DiscardReason::Rtcp);
    }
    if is_sip_control(cfg, PacketView::new(f, &record.data)) {
        return Some(DiscardReason::SipControl);
    }
    None
}

/// Returns true if `a` and `b` are the same packet captured twice
pub fn is_duplicate(cfg: &FilterConfig, a: PacketView, b: PacketView) -> bool {
    let (fa, fb) = (a.fields, b.fields);
    if fa.packet_len != fb.packet_len
        || fa.ip_version != fb.ip_version
        || fa.protocol != fb.protocol
    {
        return false;
    }
    match fa.protocol {
        IPPROTO_TCP => {
            fa.tcp_sequence == fb.tcp_sequence
                && fa.tcp_acknowledgment == fb.tcp_acknowledgment
                && fa.src_port == fb.src_port
                && fa.dst_port == fb.dst_port
        }
        IPPROTO_UDP => {
            let comparable = fa.fragment == fb.fragment
                || fa.dst_port < RESERVED_PORT_LIMIT
                || cfg.duplicate_ports.contains(&fa.dst_port)
                || is_sip_control(cfg, a);
            if !comparable {
                return false;
            }
            let whole_payloads = fa.fragment_offset == 0 && fb.fragment_offset == 0;
            if whole_payloads && fa.payload_len != fb.payload_len {
                return false;
            }
            let header_match = if fa.ip_version == 4 {
                fa.ipv4_checksum == fb.ipv4_checksum
            } else {
                fa.ip_header_len == fb.ip_header_len
            };
            header_match && (!cfg.compare_udp_checksum || fa.udp_checksum == fb.udp_checksum)
        }
        _ => false,
    }
}
