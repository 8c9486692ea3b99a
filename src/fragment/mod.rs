//! IP fragment store and reassembler
//!
//! Each processing thread owns one [`FragmentList`], holding the fragments it has received but
//! not yet reassembled. Fragments are identified by protocol, source and destination address,
//! datagram identifier and offset; a datagram is complete when the fragment at offset 0 and the
//! final fragment (more-fragments cleared) are present, and the payload lengths add up to the
//! final fragment's end.
//!
//! Incomplete sets are never discarded automatically: callers sweep them with
//! [`FragmentList::remove_fragment`] and `None`.
//!
//! ```rust
//! use capdiag::fragment::{FragmentList, FragmentOutcome};
//!
//! fn feed(list: &mut FragmentList, datagram: &[u8]) {
//!     match list.process(datagram) {
//!         Ok(FragmentOutcome::Reassembled(full)) => println!("{} bytes", full.len()),
//!         Ok(_) => (),
//!         Err(e) => eprintln!("fragment error: {}", e),
//!     }
//! }
//! ```

use crate::error::FragmentError;
use crate::wire::*;
use std::net::IpAddr;
use std::ops::Range;

mod registry;
mod store;

pub use registry::*;
pub use store::*;

/// Identity of the datagram a fragment belongs to (the 3-way tuple plus identifier)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DatagramKey {
    pub protocol: u8,
    pub src: u128,
    pub dst: u128,
    /// Datagram identifier; IPv4 identifiers are widened from 16 bits
    pub identifier: u32,
}

/// Location of the fields of one fragment inside the received datagram
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct FragmentLayout {
    pub key: DatagramKey,
    pub version: u8,
    /// Offset in 8-byte units
    pub offset: u16,
    pub more_fragments: bool,
    /// IP header bytes, extension headers excluded
    pub header: Range<usize>,
    pub payload: Range<usize>,
}

impl FragmentLayout {
    /// Derive key and length fields from a fragmented datagram
    ///
    /// For IPv6, `ext_offset` is the position of the fragmentation extension header; when absent
    /// the extension chain is walked to find it.
    pub(crate) fn from_datagram(
        datagram: &[u8],
        ext_offset: Option<usize>,
    ) -> Result<FragmentLayout, FragmentError> {
        match ip_version(datagram) {
            Some(4) => Self::from_ipv4(datagram),
            Some(6) => Self::from_ipv6(datagram, ext_offset),
            _ => Err(FragmentError::Malformed),
        }
    }

    fn from_ipv4(datagram: &[u8]) -> Result<FragmentLayout, FragmentError> {
        let (_, ip) = parse_ipv4_header(datagram).map_err(|_| FragmentError::Malformed)?;
        if !ip.is_fragment() {
            return Err(FragmentError::NotFragment);
        }
        let total = usize::from(ip.total_length);
        if total < ip.header_len || total > datagram.len() {
            return Err(FragmentError::Malformed);
        }
        Ok(FragmentLayout {
            key: DatagramKey {
                protocol: ip.protocol,
                src: addr_to_u128(IpAddr::V4(ip.src)),
                dst: addr_to_u128(IpAddr::V4(ip.dst)),
                identifier: u32::from(ip.identification),
            },
            version: 4,
            offset: ip.fragment_offset,
            more_fragments: ip.more_fragments(),
            header: 0..ip.header_len,
            payload: ip.header_len..total,
        })
    }

    fn from_ipv6(
        datagram: &[u8],
        ext_offset: Option<usize>,
    ) -> Result<FragmentLayout, FragmentError> {
        let (_, ip) = parse_ipv6_header(datagram).map_err(|_| FragmentError::Malformed)?;
        let (pos, fh) = match ext_offset {
            Some(pos) => {
                let ext = datagram.get(pos..).ok_or(FragmentError::Malformed)?;
                let (_, fh) =
                    parse_ipv6_fragment_header(ext).map_err(|_| FragmentError::Malformed)?;
                (pos, fh)
            }
            None => walk_ipv6_extensions(datagram)
                .ok_or(FragmentError::Malformed)?
                .fragment
                .ok_or(FragmentError::NotFragment)?,
        };
        let total = IPV6_HEADER_LEN + usize::from(ip.payload_length);
        let payload_start = pos + IPV6_FRAGMENT_HEADER_LEN;
        if pos < IPV6_HEADER_LEN || total < payload_start || total > datagram.len() {
            return Err(FragmentError::Malformed);
        }
        Ok(FragmentLayout {
            key: DatagramKey {
                protocol: fh.next_header,
                src: addr_to_u128(IpAddr::V6(ip.src)),
                dst: addr_to_u128(IpAddr::V6(ip.dst)),
                identifier: fh.identification,
            },
            version: 6,
            offset: fh.fragment_offset,
            more_fragments: fh.more_fragments,
            header: 0..IPV6_HEADER_LEN,
            payload: payload_start..total,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    /// Split an IPv4 datagram into fragments of at most `chunk` payload bytes (multiple of 8)
    pub(crate) fn fragment_ipv4(datagram: &[u8], chunk: usize) -> Vec<Vec<u8>> {
        let hl = usize::from(datagram[0] & 0x0f) * 4;
        let payload = &datagram[hl..];
        let mut out = Vec::new();
        let mut start = 0;
        while start < payload.len() {
            let end = (start + chunk).min(payload.len());
            let mut frag = datagram[..hl].to_vec();
            frag.extend_from_slice(&payload[start..end]);
            let total = frag.len() as u16;
            frag[2..4].copy_from_slice(&total.to_be_bytes());
            let mut flags_offset = (start / 8) as u16;
            if end < payload.len() {
                flags_offset |= 0x2000;
            }
            frag[6..8].copy_from_slice(&flags_offset.to_be_bytes());
            out.push(frag);
            start = end;
        }
        out
    }

    /// Build an IPv4/UDP datagram with `len` payload bytes
    pub(crate) fn ipv4_udp_datagram(id: u16, len: usize) -> Vec<u8> {
        let mut d = vec![
            0x45, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x11, 0x00, 0x00, 10, 0, 0, 1,
            10, 0, 0, 5,
        ];
        d[4..6].copy_from_slice(&id.to_be_bytes());
        let total = (20 + 8 + len) as u16;
        d[2..4].copy_from_slice(&total.to_be_bytes());
        let udp_len = (8 + len) as u16;
        d.extend_from_slice(&[0x13, 0x88, 0x13, 0x8c]);
        d.extend_from_slice(&udp_len.to_be_bytes());
        d.extend_from_slice(&[0, 0]);
        d.extend((0..len).map(|i| (i % 251) as u8));
        let csum = crate::wire::ipv4_checksum(&d[..20]);
        d[10..12].copy_from_slice(&csum.to_be_bytes());
        d
    }

    #[test]
    fn test_layout_ipv4() {
        let d = ipv4_udp_datagram(7, 100);
        let frags = fragment_ipv4(&d, 64);
        assert_eq!(frags.len(), 2);
        let l0 = super::FragmentLayout::from_datagram(&frags[0], None).expect("layout");
        assert_eq!(l0.offset, 0);
        assert!(l0.more_fragments);
        assert_eq!(l0.payload, 20..84);
        let l1 = super::FragmentLayout::from_datagram(&frags[1], None).expect("layout");
        assert_eq!(l1.offset, 8);
        assert!(!l1.more_fragments);
        assert_eq!(l1.key, l0.key);
        assert_eq!(
            super::FragmentLayout::from_datagram(&d, None),
            Err(crate::error::FragmentError::NotFragment)
        );
    }
}
