use tracing::{debug, warn};

use super::{DatagramKey, FragmentLayout};
use crate::error::FragmentError;
use crate::wire::{ipv4_checksum, IPV6_HEADER_LEN};

/// One IP fragment awaiting reassembly
#[derive(Debug)]
pub struct Fragment {
    pub key: DatagramKey,
    pub version: u8,
    /// Offset in 8-byte units
    pub offset: u16,
    pub more_fragments: bool,
    /// Copy of the IP header, extension headers excluded
    pub header: Vec<u8>,
    pub payload: Vec<u8>,
    next: Option<usize>,
}

impl Fragment {
    /// Byte offset of this fragment's payload within the original datagram payload
    #[inline]
    pub fn byte_offset(&self) -> usize {
        usize::from(self.offset) * 8
    }

    #[inline]
    fn end(&self) -> usize {
        self.byte_offset() + self.payload.len()
    }
}

/// Result of [`FragmentList::reassembly_status`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReassemblyStatus {
    /// At least one fragment of the datagram is stored
    pub any_present: bool,
    /// The datagram can be reassembled
    pub all_present: bool,
}

/// Result of [`FragmentList::remove_fragment`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RemovalReport {
    pub removed: usize,
    /// Highest number of simultaneously stored fragments seen by the list
    pub high_water: usize,
}

/// Result of [`FragmentList::process`]
#[derive(Debug, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// Datagram is not fragmented, use it as is
    NotFragment,
    /// Same fragment already stored (retransmission)
    Duplicate,
    /// Fragment stored, datagram not yet complete
    Pending,
    Reassembled(Vec<u8>),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FragmentStats {
    pub active: usize,
    pub total: u64,
    pub high_water: usize,
    pub reassembled: u64,
    pub duplicates: u64,
}

/// Singly-linked list of fragments, stored in a slot arena
///
/// Links are slot indices. A removed fragment is moved out of its slot, so every fragment is
/// dropped exactly once: either when handed back by a removal, or when the list is dropped.
#[derive(Debug, Default)]
pub struct FragmentList {
    slots: Vec<Option<Fragment>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    stats: FragmentStats,
}

impl FragmentList {
    pub fn new() -> FragmentList {
        FragmentList::default()
    }

    #[inline]
    pub fn stats(&self) -> FragmentStats {
        self.stats
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.stats.active
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stats.active == 0
    }

    /// Iterate over stored fragments, in arrival order
    pub fn iter(&self) -> FragmentIter<'_> {
        FragmentIter {
            list: self,
            cursor: self.head,
        }
    }

    /// Copy the header and payload of a fragmented datagram into a new fragment
    ///
    /// `ext_offset` is the position of the IPv6 fragmentation header, if already known.
    /// Fails without modifying the list if the length fields cannot be derived, or if a fragment
    /// with the same key is already stored.
    pub fn add_fragment(
        &mut self,
        datagram: &[u8],
        ext_offset: Option<usize>,
    ) -> Result<(), FragmentError> {
        let layout = FragmentLayout::from_datagram(datagram, ext_offset)?;
        if self.contains(&layout.key, layout.offset) {
            self.stats.duplicates += 1;
            return Err(FragmentError::Duplicate);
        }
        let fragment = Fragment {
            key: layout.key,
            version: layout.version,
            offset: layout.offset,
            more_fragments: layout.more_fragments,
            header: datagram[layout.header].to_vec(),
            payload: datagram[layout.payload].to_vec(),
            next: None,
        };
        self.push_back(fragment);
        Ok(())
    }

    /// Returns true if a fragment with the same key as `datagram` is stored
    pub fn find_fragment(&self, datagram: &[u8]) -> bool {
        match FragmentLayout::from_datagram(datagram, None) {
            Ok(layout) => self.contains(&layout.key, layout.offset),
            Err(_) => false,
        }
    }

    /// Check whether the datagram `datagram` belongs to can be reassembled
    ///
    /// The check does not depend on the order in which fragments arrived.
    pub fn reassembly_status(&self, datagram: &[u8]) -> ReassemblyStatus {
        match FragmentLayout::from_datagram(datagram, None) {
            Ok(layout) => self.status_of(&layout.key),
            Err(_) => ReassemblyStatus::default(),
        }
    }

    fn status_of(&self, key: &DatagramKey) -> ReassemblyStatus {
        let mut any_present = false;
        let mut has_first = false;
        let mut expected = None;
        let mut sum = 0usize;
        for frag in self.iter().filter(|f| f.key == *key) {
            any_present = true;
            sum += frag.payload.len();
            if frag.offset == 0 {
                has_first = true;
            }
            if !frag.more_fragments {
                expected = Some(frag.end());
            }
        }
        let all_present = has_first && expected == Some(sum);
        ReassemblyStatus {
            any_present,
            all_present,
        }
    }

    /// Reassemble the datagram `datagram` belongs to into `out`
    ///
    /// Returns the total reassembled length. All fragments of the datagram are removed from the
    /// list on success; on error the list is left unchanged.
    pub fn reassemble(&mut self, datagram: &[u8], out: &mut [u8]) -> Result<usize, FragmentError> {
        let layout = FragmentLayout::from_datagram(datagram, None)?;
        self.reassemble_key(&layout.key, out)
    }

    /// Same as [`reassemble`](Self::reassemble), allocating the output buffer
    pub fn reassemble_to_vec(&mut self, datagram: &[u8]) -> Result<Vec<u8>, FragmentError> {
        let layout = FragmentLayout::from_datagram(datagram, None)?;
        let needed = self.reassembled_len(&layout.key)?;
        let mut out = vec![0u8; needed];
        let len = self.reassemble_key(&layout.key, &mut out)?;
        out.truncate(len);
        Ok(out)
    }

    fn reassembled_len(&self, key: &DatagramKey) -> Result<usize, FragmentError> {
        if !self.status_of(key).all_present {
            return Err(FragmentError::Incomplete);
        }
        // pass 1: the fragment at offset 0 carries the header template
        let first = self
            .iter()
            .find(|f| f.key == *key && f.offset == 0)
            .ok_or(FragmentError::MissingFirst)?;
        let payload_len = self
            .iter()
            .filter(|f| f.key == *key)
            .map(Fragment::end)
            .max()
            .unwrap_or(0);
        let total = first.header.len() + payload_len;
        // the rebuilt header must be able to state the length
        let length_field = if first.version == 4 { total } else { payload_len };
        if length_field > usize::from(u16::MAX) {
            return Err(FragmentError::Inconsistent);
        }
        Ok(total)
    }

    fn reassemble_key(
        &mut self,
        key: &DatagramKey,
        out: &mut [u8],
    ) -> Result<usize, FragmentError> {
        let total = self.reassembled_len(key)?;
        if out.len() < total {
            return Err(FragmentError::BufferTooSmall { needed: total });
        }
        let (mut header, version) = match self.iter().find(|f| f.key == *key && f.offset == 0) {
            Some(first) => (first.header.clone(), first.version),
            None => return Err(FragmentError::MissingFirst),
        };
        let header_len = header.len();
        let payload_len = total - header_len;
        // lengths add up, but an overlap can still hide a gap
        let mut covered = vec![false; payload_len];
        for frag in self.iter().filter(|f| f.key == *key) {
            let range = frag.byte_offset()..frag.end();
            if covered[range.clone()].iter().any(|c| *c) {
                return Err(FragmentError::Inconsistent);
            }
            covered[range].iter_mut().for_each(|c| *c = true);
        }
        // pass 2: copy and remove
        for frag in self.unlink_matching(|f| f.key == *key) {
            let start = header_len + frag.byte_offset();
            out[start..start + frag.payload.len()].copy_from_slice(&frag.payload);
        }
        if version == 4 {
            let total16 = total as u16;
            header[2..4].copy_from_slice(&total16.to_be_bytes());
            header[6] = 0;
            header[7] = 0;
            let csum = ipv4_checksum(&header);
            header[10..12].copy_from_slice(&csum.to_be_bytes());
        } else {
            let plen = (total - IPV6_HEADER_LEN) as u16;
            header[4..6].copy_from_slice(&plen.to_be_bytes());
            header[6] = key.protocol;
        }
        out[..header_len].copy_from_slice(&header);
        self.stats.reassembled += 1;
        debug!(
            identifier = key.identifier,
            total, "reassembled fragmented datagram"
        );
        Ok(total)
    }

    /// Remove fragments
    ///
    /// With a datagram, removes every fragment of the same datagram. Without one, removes every
    /// remaining fragment (orphan cleanup) and reports each removed set.
    pub fn remove_fragment(&mut self, datagram: Option<&[u8]>) -> RemovalReport {
        let removed = match datagram {
            Some(d) => match FragmentLayout::from_datagram(d, None) {
                Ok(layout) => self.unlink_matching(|f| f.key == layout.key).len(),
                Err(_) => 0,
            },
            None => {
                let orphans = self.unlink_matching(|_| true);
                for frag in &orphans {
                    warn!(
                        identifier = frag.key.identifier,
                        protocol = frag.key.protocol,
                        offset = frag.byte_offset(),
                        len = frag.payload.len(),
                        "removing orphan fragment"
                    );
                }
                orphans.len()
            }
        };
        RemovalReport {
            removed,
            high_water: self.stats.high_water,
        }
    }

    /// Add a fragment and attempt reassembly of its datagram
    pub fn process(&mut self, datagram: &[u8]) -> Result<FragmentOutcome, FragmentError> {
        match self.add_fragment(datagram, None) {
            Ok(()) => (),
            Err(FragmentError::NotFragment) => return Ok(FragmentOutcome::NotFragment),
            Err(FragmentError::Duplicate) => return Ok(FragmentOutcome::Duplicate),
            Err(e) => return Err(e),
        }
        if self.reassembly_status(datagram).all_present {
            self.reassemble_to_vec(datagram)
                .map(FragmentOutcome::Reassembled)
        } else {
            Ok(FragmentOutcome::Pending)
        }
    }

    fn contains(&self, key: &DatagramKey, offset: u16) -> bool {
        self.iter().any(|f| f.key == *key && f.offset == offset)
    }

    fn push_back(&mut self, fragment: Fragment) {
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(fragment);
                idx
            }
            None => {
                self.slots.push(Some(fragment));
                self.slots.len() - 1
            }
        };
        if let Some(tail) = self.tail {
            if let Some(t) = self.slots[tail].as_mut() {
                t.next = Some(idx);
            }
        } else {
            self.head = Some(idx);
        }
        self.tail = Some(idx);
        self.stats.active += 1;
        self.stats.total += 1;
        self.stats.high_water = self.stats.high_water.max(self.stats.active);
    }

    /// Unlink every fragment matching `pred`, transferring ownership to the caller
    fn unlink_matching<P>(&mut self, pred: P) -> Vec<Fragment>
    where
        P: Fn(&Fragment) -> bool,
    {
        let mut removed = Vec::new();
        let mut prev: Option<usize> = None;
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let (next, matches) = match self.slots[idx].as_ref() {
                Some(f) => (f.next, pred(f)),
                None => break,
            };
            if matches {
                match prev {
                    Some(p) => {
                        if let Some(pf) = self.slots[p].as_mut() {
                            pf.next = next;
                        }
                    }
                    None => self.head = next,
                }
                if self.tail == Some(idx) {
                    self.tail = prev;
                }
                if let Some(frag) = self.slots[idx].take() {
                    removed.push(frag);
                }
                self.free.push(idx);
                self.stats.active -= 1;
            } else {
                prev = Some(idx);
            }
            cursor = next;
        }
        removed
    }
}

pub struct FragmentIter<'a> {
    list: &'a FragmentList,
    cursor: Option<usize>,
}

impl<'a> Iterator for FragmentIter<'a> {
    type Item = &'a Fragment;

    fn next(&mut self) -> Option<&'a Fragment> {
        let idx = self.cursor?;
        let frag = self.list.slots.get(idx)?.as_ref()?;
        self.cursor = frag.next;
        Some(frag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::tests::{fragment_ipv4, ipv4_udp_datagram};

    #[test]
    fn test_reassemble_in_order() {
        let d = ipv4_udp_datagram(42, 300);
        let frags = fragment_ipv4(&d, 120);
        assert_eq!(frags.len(), 3);
        let mut list = FragmentList::new();
        assert_eq!(list.process(&frags[0]), Ok(FragmentOutcome::Pending));
        assert_eq!(list.process(&frags[1]), Ok(FragmentOutcome::Pending));
        assert_eq!(list.process(&frags[2]), Ok(FragmentOutcome::Reassembled(d)));
        assert!(list.is_empty());
        assert_eq!(list.stats().high_water, 3);
        assert_eq!(list.stats().reassembled, 1);
    }

    #[test]
    fn test_reassemble_any_permutation() {
        let d = ipv4_udp_datagram(9, 200);
        let frags = fragment_ipv4(&d, 64);
        assert_eq!(frags.len(), 4);
        let orders: &[[usize; 4]] = &[[3, 2, 1, 0], [1, 3, 0, 2], [2, 0, 3, 1], [0, 2, 1, 3]];
        for order in orders {
            let mut list = FragmentList::new();
            for &i in &order[..3] {
                list.add_fragment(&frags[i], None).expect("add");
                assert!(!list.reassembly_status(&frags[i]).all_present);
            }
            let last = &frags[order[3]];
            list.add_fragment(last, None).expect("add");
            let status = list.reassembly_status(last);
            assert!(status.any_present && status.all_present);
            let mut out = vec![0u8; 2048];
            let len = list.reassemble(last, &mut out).expect("reassemble");
            assert_eq!(&out[..len], &d[..]);
            assert!(list.is_empty());
        }
    }

    #[test]
    fn test_find_and_duplicate() {
        let d = ipv4_udp_datagram(1, 100);
        let frags = fragment_ipv4(&d, 64);
        let mut list = FragmentList::new();
        assert!(!list.find_fragment(&frags[0]));
        list.add_fragment(&frags[0], None).expect("add");
        assert!(list.find_fragment(&frags[0]));
        assert!(!list.find_fragment(&frags[1]));
        assert_eq!(list.add_fragment(&frags[0], None), Err(FragmentError::Duplicate));
        assert_eq!(list.process(&frags[0]), Ok(FragmentOutcome::Duplicate));
        assert_eq!(list.len(), 1);
        assert_eq!(list.process(&d), Ok(FragmentOutcome::NotFragment));
    }

    #[test]
    fn test_incomplete_and_buffer_too_small() {
        let d = ipv4_udp_datagram(3, 100);
        let frags = fragment_ipv4(&d, 64);
        let mut list = FragmentList::new();
        list.add_fragment(&frags[1], None).expect("add");
        let mut out = vec![0u8; 256];
        assert_eq!(list.reassemble(&frags[1], &mut out), Err(FragmentError::Incomplete));
        list.add_fragment(&frags[0], None).expect("add");
        let mut small = vec![0u8; 16];
        assert_eq!(
            list.reassemble(&frags[0], &mut small),
            Err(FragmentError::BufferTooSmall { needed: d.len() })
        );
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_oversized_datagram_rejected() {
        // last fragment ends at 65672 payload bytes, past what the total length can state
        let d = ipv4_udp_datagram(77, 65672 - 8);
        let frags = fragment_ipv4(&d, 8184);
        assert_eq!(frags.len(), 9);
        let mut list = FragmentList::new();
        for f in &frags {
            list.add_fragment(f, None).expect("add");
        }
        assert!(list.reassembly_status(&frags[8]).all_present);
        assert_eq!(list.reassemble_to_vec(&frags[8]), Err(FragmentError::Inconsistent));
        let mut out = vec![0u8; 70000];
        assert_eq!(list.reassemble(&frags[8], &mut out), Err(FragmentError::Inconsistent));
        assert_eq!(list.len(), 9);
    }

    #[test]
    fn test_remove_orphans() {
        let mut list = FragmentList::new();
        let a = fragment_ipv4(&ipv4_udp_datagram(10, 200), 64);
        let b = fragment_ipv4(&ipv4_udp_datagram(11, 200), 64);
        list.add_fragment(&a[0], None).expect("add");
        list.add_fragment(&b[0], None).expect("add");
        list.add_fragment(&a[1], None).expect("add");
        let report = list.remove_fragment(Some(&a[2]));
        assert_eq!(report.removed, 2);
        assert_eq!(list.len(), 1);
        list.add_fragment(&b[1], None).expect("add");
        let report = list.remove_fragment(None);
        assert_eq!(
            report,
            RemovalReport {
                removed: 2,
                high_water: 3
            }
        );
        assert!(list.is_empty());
        assert_eq!(list.iter().count(), 0);
    }

    #[test]
    fn test_reassemble_ipv6() {
        // 40-byte header, fragment header, UDP payload of 24 bytes split at 16
        let payload: Vec<u8> = (0u8..24).collect();
        let mut base = vec![0u8; 40];
        base[0] = 0x60;
        base[6] = crate::wire::IPPROTO_FRAGMENT;
        base[8] = 0x20;
        base[24] = 0x20;
        base[39] = 1;
        let frag = |offset: u16, more: bool, data: &[u8]| {
            let mut f = base.clone();
            let plen = (8 + data.len()) as u16;
            f[4..6].copy_from_slice(&plen.to_be_bytes());
            let of = (offset << 3) | u16::from(more);
            f.extend_from_slice(&[17, 0]);
            f.extend_from_slice(&of.to_be_bytes());
            f.extend_from_slice(&0xabcd_0001u32.to_be_bytes());
            f.extend_from_slice(data);
            f
        };
        let f0 = frag(0, true, &payload[..16]);
        let f1 = frag(2, false, &payload[16..]);
        let mut list = FragmentList::new();
        assert_eq!(list.process(&f1), Ok(FragmentOutcome::Pending));
        let full = match list.process(&f0) {
            Ok(FragmentOutcome::Reassembled(full)) => full,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(full.len(), 40 + 24);
        assert_eq!(full[6], 17);
        assert_eq!(u16::from_be_bytes([full[4], full[5]]), 24);
        assert_eq!(&full[40..], &payload[..]);
    }
}
