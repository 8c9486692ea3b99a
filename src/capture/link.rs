//! Link-layer normalization
//!
//! Records are handed out starting at the network layer. This module locates the end of the
//! link header for each supported link type and reports the protocol it announces, as an
//! Ethernet type.

use crate::error::CaptureError;
use crate::linktype::{Linktype, ETHERNET_HEADER_LEN, NULL_HEADER_LEN, SLL_HEADER_LEN};
use crate::wire::{ip_version, ETHERTYPE_IPV4, ETHERTYPE_IPV6, ETHERTYPE_VLAN, IPPROTO_TCP};

/// 802.1ad service tag, stacked in front of 802.1Q tags
pub const ETHERTYPE_QINQ: u16 = 0x88a8;
pub const VLAN_TAG_LEN: usize = 4;

/// BSD address families meaning IPv6 (NetBSD/OpenBSD, FreeBSD, Darwin)
const AF_INET: u32 = 2;
const AF_INET6: [u32; 3] = [24, 28, 30];

/// Link header of one frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkLayer {
    /// Bytes before the network layer, VLAN tags included
    pub header_len: usize,
    /// Protocol of the network layer. For Ethernet frames this is the type/length field, so
    /// values below 0x0600 denote 802.3 lengths rather than protocols.
    pub ethertype: u16,
}

fn be16(b: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([b[at], b[at + 1]])
}

fn truncated(expected: usize, got: usize) -> CaptureError {
    CaptureError::Truncated {
        what: "link header",
        expected,
        got,
    }
}

fn ethertype_of_ip(data: &[u8]) -> u16 {
    match ip_version(data) {
        Some(4) => ETHERTYPE_IPV4,
        Some(6) => ETHERTYPE_IPV6,
        _ => 0,
    }
}

fn ethertype_of_family(af: u32) -> u16 {
    if af == AF_INET {
        ETHERTYPE_IPV4
    } else if AF_INET6.contains(&af) {
        ETHERTYPE_IPV6
    } else {
        0
    }
}

/// Locate the network layer of `frame`
pub fn parse_link_layer(frame: &[u8], linktype: Linktype) -> Result<LinkLayer, CaptureError> {
    match linktype {
        Linktype::ETHERNET => {
            if frame.len() < ETHERNET_HEADER_LEN {
                return Err(truncated(ETHERNET_HEADER_LEN, frame.len()));
            }
            let mut ethertype = be16(frame, 12);
            let mut header_len = ETHERNET_HEADER_LEN;
            while ethertype == ETHERTYPE_VLAN || ethertype == ETHERTYPE_QINQ {
                if frame.len() < header_len + VLAN_TAG_LEN {
                    return Err(truncated(header_len + VLAN_TAG_LEN, frame.len()));
                }
                ethertype = be16(frame, header_len + 2);
                header_len += VLAN_TAG_LEN;
            }
            Ok(LinkLayer {
                header_len,
                ethertype,
            })
        }
        Linktype::LINUX_SLL => {
            if frame.len() < SLL_HEADER_LEN {
                return Err(truncated(SLL_HEADER_LEN, frame.len()));
            }
            Ok(LinkLayer {
                header_len: SLL_HEADER_LEN,
                ethertype: be16(frame, 14),
            })
        }
        Linktype::NULL | Linktype::LOOP => {
            if frame.len() < NULL_HEADER_LEN {
                return Err(truncated(NULL_HEADER_LEN, frame.len()));
            }
            let raw = [frame[0], frame[1], frame[2], frame[3]];
            let af = if linktype == Linktype::LOOP {
                u32::from_be_bytes(raw)
            } else {
                // host order of the capturing machine, which may differ from ours
                let le = u32::from_le_bytes(raw);
                if le > 0xffff {
                    u32::from_be_bytes(raw)
                } else {
                    le
                }
            };
            Ok(LinkLayer {
                header_len: NULL_HEADER_LEN,
                ethertype: ethertype_of_family(af),
            })
        }
        Linktype::RAW | Linktype::IPV4 | Linktype::IPV6 => Ok(LinkLayer {
            header_len: 0,
            ethertype: ethertype_of_ip(frame),
        }),
        l => Err(CaptureError::UnsupportedLinktype(l.0)),
    }
}

/// Rewrite a zero IPv4 total length of a TCP segment to the captured length
///
/// Captures taken on hosts doing TCP segmentation offload carry a zero total length for
/// segments larger than the MTU. Returns `true` if the field was rewritten.
pub fn repair_tso_length(data: &mut [u8]) -> bool {
    if data.len() < 20 || ip_version(data) != Some(4) || data[9] != IPPROTO_TCP {
        return false;
    }
    if be16(data, 2) != 0 || data.len() > usize::from(u16::MAX) {
        return false;
    }
    let len = data.len() as u16;
    data[2..4].copy_from_slice(&len.to_be_bytes());
    true
}

/// Ethernet header written in front of packets that have none
pub fn placeholder_ethernet(network: &[u8]) -> [u8; ETHERNET_HEADER_LEN] {
    let mut h = [
        0x02, 0x00, 0x00, 0x00, 0x00, 0x02, 0x02, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
    ];
    h[12..14].copy_from_slice(&ethertype_of_ip(network).to_be_bytes());
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_ethernet_vlan() {
        let frame = hex!(
            "
00 11 22 33 44 55 66 77 88 99 aa bb 81 00 00 64
08 00 45 00"
        );
        let l = parse_link_layer(&frame, Linktype::ETHERNET).expect("link");
        assert_eq!(
            l,
            LinkLayer {
                header_len: 18,
                ethertype: ETHERTYPE_IPV4
            }
        );
        assert!(matches!(
            parse_link_layer(&frame[..16], Linktype::ETHERNET),
            Err(CaptureError::Truncated { expected: 18, .. })
        ));
    }

    #[test]
    fn test_sll_and_null() {
        let sll = hex!("00 00 00 01 00 06 00 11 22 33 44 55 00 00 86 dd 60");
        let l = parse_link_layer(&sll, Linktype::LINUX_SLL).expect("sll");
        assert_eq!(l.header_len, 16);
        assert_eq!(l.ethertype, ETHERTYPE_IPV6);

        let null_le = hex!("02 00 00 00 45");
        assert_eq!(
            parse_link_layer(&null_le, Linktype::NULL).map(|l| l.ethertype).ok(),
            Some(ETHERTYPE_IPV4)
        );
        let null_be = hex!("00 00 00 1e 60");
        assert_eq!(
            parse_link_layer(&null_be, Linktype::NULL).map(|l| l.ethertype).ok(),
            Some(ETHERTYPE_IPV6)
        );
        let lo = hex!("00 00 00 18 60");
        assert_eq!(
            parse_link_layer(&lo, Linktype::LOOP).map(|l| l.ethertype).ok(),
            Some(ETHERTYPE_IPV6)
        );
        assert!(matches!(
            parse_link_layer(&lo, Linktype(147)),
            Err(CaptureError::UnsupportedLinktype(147))
        ));
    }

    #[test]
    fn test_tso_repair() {
        let mut data = vec![0u8; 1400];
        data[0] = 0x45;
        data[9] = IPPROTO_TCP;
        assert!(repair_tso_length(&mut data));
        assert_eq!(be16(&data, 2), 1400);
        // already set: untouched
        assert!(!repair_tso_length(&mut data));
        data[2..4].copy_from_slice(&[0, 0]);
        data[9] = 17;
        assert!(!repair_tso_length(&mut data));
    }
}
