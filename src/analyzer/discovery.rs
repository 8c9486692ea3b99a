use std::collections::HashMap;

use tracing::debug;

use super::entry::{AnalyzerEntry, StreamKey};
use super::walk::StreamStats;
use super::AnalyzerConfig;

const SEQ_MODULUS: i64 = 0x1_0000;

/// Unwraps 16-bit sequence numbers of one stream into a monotonic numbering
///
/// A wrap is only accepted when the resulting forward step is at most `max_gap`. A number
/// lying at most `max_gap` behind the highest one seen is a late packet and does not move
/// the reference. Anything else is a jump (stream restart) and the numbering resumes from
/// the new value within the current cycle.
#[derive(Clone, Debug)]
pub struct SeqUnwrapper {
    max_gap: u16,
    highest: Option<i64>,
    jumps: u32,
}

impl SeqUnwrapper {
    pub fn new(max_gap: u16) -> SeqUnwrapper {
        SeqUnwrapper {
            max_gap,
            highest: None,
            jumps: 0,
        }
    }

    /// Start from an already known extended number
    pub fn starting_at(max_gap: u16, start: i64) -> SeqUnwrapper {
        SeqUnwrapper {
            max_gap,
            highest: Some(start),
            jumps: 0,
        }
    }

    pub fn unwrap(&mut self, seq: u16) -> i64 {
        let highest = match self.highest {
            Some(h) => h,
            None => {
                self.highest = Some(i64::from(seq));
                return i64::from(seq);
            }
        };
        let forward = i64::from(seq.wrapping_sub(highest as u16));
        let max_gap = i64::from(self.max_gap);
        if forward <= max_gap {
            let ext = highest + forward;
            self.highest = Some(ext);
            ext
        } else if SEQ_MODULUS - forward <= max_gap {
            highest - (SEQ_MODULUS - forward)
        } else {
            let ext = (highest & !(SEQ_MODULUS - 1)) + i64::from(seq);
            self.jumps += 1;
            self.highest = Some(ext);
            ext
        }
    }

    /// Number of sequence jumps seen, i.e. stream segments minus one
    pub fn jumps(&self) -> u32 {
        self.jumps
    }
}

/// Extended sequence number: the 16-bit value plus the local wrap count of its group
pub fn split_extended(ext: i64) -> (u16, i64) {
    (ext as u16, ext.div_euclid(SEQ_MODULUS))
}

/// Entries of one stream identity
#[derive(Clone, Debug, PartialEq)]
pub struct StreamGroup {
    pub key: StreamKey,
    /// Index of the first entry of the group in the analyzed array
    pub first_index: usize,
    pub last_index: usize,
    /// Provisional first sequence number, extended
    pub first_seq: i64,
    /// Highest sequence number, extended
    pub last_seq: i64,
    /// The look-ahead window at the start of the group crossed a 16-bit wrap
    pub leading_wrap: bool,
    /// Indices of the entries of the group, in array order
    pub members: Vec<usize>,
    /// Extended sequence number of each member
    pub extended: Vec<i64>,
    /// Sequence jumps that could not be explained by a wrap
    pub jumps: u32,
    pub stats: StreamStats,
}

impl StreamGroup {
    /// Sequence numbers the group should hold, from first to last
    pub fn expected_count(&self) -> u64 {
        (self.last_seq - self.first_seq + 1).max(0) as u64
    }

    /// Stream segments: one, plus one per sequence jump
    pub fn segments(&self) -> u32 {
        self.jumps + 1
    }
}

/// Lowest sequence number of `key` within `window` entries starting at `start`
///
/// Offsets are taken relative to the sequence number at `start`, so leading reordering across
/// a wrap yields a negative offset. Returns the extended first number and whether the window
/// crosses a wrap.
fn provisional_first(
    entries: &[AnalyzerEntry],
    start: usize,
    key: StreamKey,
    cfg: &AnalyzerConfig,
) -> (i64, bool) {
    let origin = entries[start].sequence;
    let bound = cfg.lookahead as i64;
    let mut min = 0i64;
    let mut max = 0i64;
    for e in entries[start..]
        .iter()
        .take(cfg.lookahead)
        .filter(|e| e.key(cfg.key_by_channel) == key)
    {
        let delta = i64::from(e.sequence.wrapping_sub(origin) as i16);
        // farther than the window can reorder: a jump, left to the walk
        if delta.abs() > bound {
            continue;
        }
        min = min.min(delta);
        max = max.max(delta);
    }
    let first = i64::from(origin) + min;
    let wrapped = first < 0 || i64::from(origin) + max >= SEQ_MODULUS;
    // keep the numbering of the group non-negative
    let first = if first < 0 { first + SEQ_MODULUS } else { first };
    (first, wrapped)
}

/// Assign every entry to a stream group, in order of first appearance
pub fn discover(entries: &[AnalyzerEntry], cfg: &AnalyzerConfig) -> Vec<StreamGroup> {
    let mut groups: Vec<StreamGroup> = Vec::new();
    let mut unwrappers: Vec<SeqUnwrapper> = Vec::new();
    let mut by_key: HashMap<StreamKey, usize> = HashMap::new();
    for (i, e) in entries.iter().enumerate() {
        let key = e.key(cfg.key_by_channel);
        let g = match by_key.get(&key) {
            Some(&g) => g,
            None => {
                let (first_seq, leading_wrap) = provisional_first(entries, i, key, cfg);
                debug!(
                    stream = %key,
                    first = first_seq,
                    leading_wrap,
                    "new stream group at entry {}",
                    i
                );
                groups.push(StreamGroup {
                    key,
                    first_index: i,
                    last_index: i,
                    first_seq,
                    last_seq: first_seq,
                    leading_wrap,
                    members: Vec::new(),
                    extended: Vec::new(),
                    jumps: 0,
                    stats: StreamStats::default(),
                });
                unwrappers.push(SeqUnwrapper::starting_at(cfg.max_wrap_gap, first_seq));
                by_key.insert(key, groups.len() - 1);
                groups.len() - 1
            }
        };
        let group = &mut groups[g];
        let ext = unwrappers[g].unwrap(e.sequence);
        group.last_index = i;
        group.last_seq = group.last_seq.max(ext);
        group.members.push(i);
        group.extended.push(ext);
        group.jumps = unwrappers[g].jumps();
    }
    groups
}

/// Make the entries of each group contiguous
///
/// Groups keep the order of their first appearance and entries keep their relative order
/// within a group. Returns true if anything moved.
pub fn collate(entries: &mut [AnalyzerEntry], cfg: &AnalyzerConfig) -> bool {
    let mut rank: HashMap<StreamKey, usize> = HashMap::new();
    let mut sorted = true;
    let mut previous = 0;
    for e in entries.iter() {
        let next = rank.len();
        let r = *rank.entry(e.key(cfg.key_by_channel)).or_insert(next);
        sorted &= r >= previous;
        previous = r;
    }
    if sorted {
        return false;
    }
    // sort_by_key is stable
    entries.sort_by_key(|e| rank[&e.key(cfg.key_by_channel)]);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::entry::tests::stream;

    #[test]
    fn test_unwrapper() {
        let mut u = SeqUnwrapper::new(20000);
        assert_eq!(u.unwrap(65534), 65534);
        assert_eq!(u.unwrap(65535), 65535);
        assert_eq!(u.unwrap(0), 65536);
        // late packet from before the wrap
        assert_eq!(u.unwrap(65533), 65533);
        assert_eq!(u.unwrap(2), 65538);
        assert_eq!(split_extended(65538), (2, 1));
        assert_eq!(u.jumps(), 0);
        // neither a plausible wrap nor a late packet
        assert_eq!(u.unwrap(40000), 65536 + 40000);
        assert_eq!(u.jumps(), 1);
    }

    #[test]
    fn test_discovery_lookahead() {
        let mut entries = stream(1, &[5, 3, 4, 6]);
        entries.extend(stream(2, &[100, 101]));
        let groups = discover(&entries, &AnalyzerConfig::default());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].first_seq, 3);
        assert_eq!(groups[0].last_seq, 6);
        assert_eq!(groups[0].extended, vec![5, 3, 4, 6]);
        assert_eq!(groups[0].expected_count(), 4);
        assert_eq!(groups[1].first_index, 4);
        assert_eq!(groups[1].members, vec![4, 5]);
    }

    #[test]
    fn test_discovery_leading_wrap() {
        let entries = stream(1, &[0, 65535, 1, 2]);
        let groups = discover(&entries, &AnalyzerConfig::default());
        assert!(groups[0].leading_wrap);
        assert_eq!(split_extended(groups[0].first_seq), (65535, 0));
        assert_eq!(groups[0].extended, vec![65536, 65535, 65537, 65538]);
        assert_eq!(groups[0].expected_count(), 4);
    }

    #[test]
    fn test_collate_is_stable() {
        let mut entries = stream(1, &[1, 2, 3]);
        let other = stream(2, &[7, 8]);
        entries.insert(1, other[0]);
        entries.insert(3, other[1]);
        let cfg = AnalyzerConfig::default();
        assert!(collate(&mut entries, &cfg));
        let seqs: Vec<u16> = entries.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3, 7, 8]);
        assert!(!collate(&mut entries, &cfg));
        let groups = discover(&entries, &cfg);
        assert_eq!(groups[1].first_index, 3);
        assert_eq!(groups[1].last_index, 4);
    }
}
