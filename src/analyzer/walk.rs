use tracing::debug;

use super::discovery::{split_extended, StreamGroup};
use super::entry::{AnalyzerEntry, EntryKind};
use super::AnalyzerConfig;
use crate::abort::AbortFlag;
use crate::error::AnalyzeError;

/// Channel numbers remembered per stream
pub const MAX_CHANNELS: usize = 8;

/// Counters of one stream group
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub packets: u64,
    /// Sequence numbers stepped through by the walk
    pub expected: u64,
    pub out_of_order: u64,
    /// Largest displacement of an out-of-order packet, in entries
    pub max_out_of_order: u64,
    pub duplicates: u64,
    pub missing: u64,
    pub max_consecutive_missing: u64,
    /// Sequence jumps after which the walk resumed at the new number
    pub resyncs: u64,
    pub sid: u64,
    pub dtmf: u64,
    pub reuse: u64,
    pub repair: u64,
    /// Distinct channel numbers carried by the stream, first seen first
    pub channels: Vec<u16>,
}

impl StreamStats {
    fn tally(&mut self, e: &AnalyzerEntry) {
        self.packets += 1;
        match e.kind {
            EntryKind::Media => (),
            EntryKind::Sid => self.sid += 1,
            EntryKind::Dtmf => self.dtmf += 1,
            EntryKind::Reuse => self.reuse += 1,
            EntryKind::Repair => self.repair += 1,
        }
        if self.channels.len() < MAX_CHANNELS && !self.channels.contains(&e.channel) {
            self.channels.push(e.channel);
        }
    }

    /// Missing packets, as a percentage of the sequence numbers expected
    pub fn loss_percent(&self) -> f64 {
        if self.expected == 0 {
            0.0
        } else {
            100.0 * self.missing as f64 / self.expected as f64
        }
    }

    pub fn out_of_order_percent(&self) -> f64 {
        if self.packets == 0 {
            0.0
        } else {
            100.0 * self.out_of_order as f64 / self.packets as f64
        }
    }
}

struct Walk<'a> {
    group: &'a StreamGroup,
    entries: &'a [AnalyzerEntry],
    cfg: &'a AnalyzerConfig,
    used: Vec<bool>,
    stats: StreamStats,
    missing_run: u64,
}

impl<'a> Walk<'a> {
    fn entry(&self, member: usize) -> &'a AnalyzerEntry {
        &self.entries[self.group.members[member]]
    }

    fn hit(&mut self, member: usize) {
        self.used[member] = true;
        self.missing_run = 0;
    }

    /// Consume copies of `ext` immediately following `member`
    fn consume_duplicates(&mut self, member: usize, ext: i64) {
        let mut next = member + 1;
        while next < self.used.len() && !self.used[next] && self.group.extended[next] == ext {
            self.used[next] = true;
            let e = self.entry(next);
            let exempt = e.kind.is_synthetic()
                || (e.kind == EntryKind::Dtmf && !self.cfg.count_dtmf_duplicates);
            if !exempt {
                self.stats.duplicates += 1;
                debug!(
                    stream = %self.group.key,
                    packet = e.packet_number,
                    seq = e.sequence,
                    "duplicate"
                );
            }
            next += 1;
        }
    }

    /// Look for `ext` among the unused members after `pos`
    fn search_ahead(&self, pos: usize, ext: i64) -> Option<usize> {
        let end = (pos + 1 + self.cfg.ooo_window).min(self.used.len());
        (pos + 1..end).find(|&m| !self.used[m] && self.group.extended[m] == ext)
    }
}

/// Classify the entries of `group`, stepping the expected sequence number by one
///
/// Each expected number is either found at the current position (a match, followed by any
/// consecutive duplicates), found within the out-of-order window further on, or counted as
/// missing. Entries behind the expected number that were not consumed are late arrivals and
/// count as out of order. The abort flag is polled once per step.
pub fn walk_group(
    group: &StreamGroup,
    entries: &[AnalyzerEntry],
    cfg: &AnalyzerConfig,
    abort: Option<&AbortFlag>,
) -> Result<StreamStats, AnalyzeError> {
    let n = group.members.len();
    let mut w = Walk {
        group,
        entries,
        cfg,
        used: vec![false; n],
        stats: StreamStats::default(),
        missing_run: 0,
    };
    for &i in &group.members {
        w.stats.tally(&entries[i]);
    }
    let max_gap = i64::from(cfg.max_wrap_gap);
    let mut expected = group.first_seq;
    let mut pos = 0;
    while pos < n {
        if abort.map_or(false, AbortFlag::is_set) {
            return Err(AnalyzeError::Aborted);
        }
        if w.used[pos] {
            pos += 1;
            continue;
        }
        let ext = group.extended[pos];
        if ext == expected {
            w.hit(pos);
            w.consume_duplicates(pos, ext);
            pos += 1;
            expected += 1;
            w.stats.expected += 1;
        } else if expected - ext > max_gap {
            // stream restarted below the numbers already walked
            w.stats.resyncs += 1;
            let (seq, wraps) = split_extended(ext);
            debug!(
                stream = %group.key,
                from = expected,
                seq,
                wraps,
                "backward sequence jump, resynchronizing"
            );
            expected = ext;
        } else if ext < expected {
            // late arrival of a number already passed
            w.hit(pos);
            let e = w.entry(pos);
            if !e.kind.is_synthetic() {
                w.stats.out_of_order += 1;
                debug!(stream = %group.key, packet = e.packet_number, seq = e.sequence, "late");
            }
            w.consume_duplicates(pos, ext);
            pos += 1;
        } else if ext - expected > max_gap {
            w.stats.resyncs += 1;
            let (seq, wraps) = split_extended(ext);
            debug!(
                stream = %group.key,
                from = expected,
                seq,
                wraps,
                "sequence jump, resynchronizing"
            );
            expected = ext;
        } else if let Some(found) = w.search_ahead(pos, expected) {
            w.hit(found);
            let displacement = (found - pos) as u64;
            w.stats.out_of_order += 1;
            w.stats.max_out_of_order = w.stats.max_out_of_order.max(displacement);
            let e = w.entry(found);
            debug!(
                stream = %group.key,
                packet = e.packet_number,
                seq = e.sequence,
                displacement,
                "out of order"
            );
            w.consume_duplicates(found, expected);
            expected += 1;
            w.stats.expected += 1;
        } else {
            w.missing_run += 1;
            w.stats.missing += 1;
            w.stats.max_consecutive_missing = w.stats.max_consecutive_missing.max(w.missing_run);
            let (seq, _) = split_extended(expected);
            debug!(stream = %group.key, seq, run = w.missing_run, "missing");
            expected += 1;
            w.stats.expected += 1;
        }
    }
    Ok(w.stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::discovery::discover;
    use crate::analyzer::entry::tests::stream;

    fn walk(entries: &[AnalyzerEntry]) -> StreamStats {
        let cfg = AnalyzerConfig::default();
        let groups = discover(entries, &cfg);
        walk_group(&groups[0], entries, &cfg, None).expect("walk")
    }

    #[test]
    fn test_duplicate_and_gap() {
        let stats = walk(&stream(7, &[1, 2, 2, 4]));
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.missing, 1);
        assert_eq!(stats.max_consecutive_missing, 1);
        assert_eq!(stats.out_of_order, 0);
        assert_eq!(stats.packets, 4);
    }

    #[test]
    fn test_out_of_order() {
        let stats = walk(&stream(7, &[1, 3, 4, 2, 5]));
        assert_eq!(stats.out_of_order, 1);
        assert_eq!(stats.max_out_of_order, 2);
        assert_eq!(stats.missing, 0);
        assert_eq!(stats.duplicates, 0);
    }

    #[test]
    fn test_missing_run_and_loss() {
        let entries = stream(7, &[10, 11, 15, 16, 18]);
        let cfg = AnalyzerConfig::default();
        let groups = discover(&entries, &cfg);
        let stats = walk_group(&groups[0], &entries, &cfg, None).expect("walk");
        assert_eq!(stats.missing, 4);
        assert_eq!(stats.max_consecutive_missing, 3);
        assert_eq!(groups[0].expected_count(), 9);
        assert_eq!(stats.expected, 9);
        assert!((stats.loss_percent() - 44.444).abs() < 0.01);
    }

    #[test]
    fn test_wrap() {
        let stats = walk(&stream(7, &[65534, 65535, 0, 1, 3]));
        assert_eq!(stats.missing, 1);
        assert_eq!(stats.resyncs, 0);
        assert_eq!(stats.out_of_order, 0);
    }

    #[test]
    fn test_dtmf_duplicates_exempt() {
        let mut entries = stream(7, &[1, 2, 2, 2, 3]);
        for e in entries.iter_mut().skip(1).take(3) {
            e.kind = EntryKind::Dtmf;
        }
        let cfg = AnalyzerConfig::default();
        let groups = discover(&entries, &cfg);
        let stats = walk_group(&groups[0], &entries, &cfg, None).expect("walk");
        assert_eq!(stats.duplicates, 0);
        assert_eq!(stats.dtmf, 3);
        let counting = AnalyzerConfig {
            count_dtmf_duplicates: true,
            ..AnalyzerConfig::default()
        };
        let stats = walk_group(&groups[0], &entries, &counting, None).expect("walk");
        assert_eq!(stats.duplicates, 2);
    }

    #[test]
    fn test_reuse_not_duplicate() {
        let mut entries = stream(7, &[1, 2, 2, 3, 1]);
        entries[2].kind = EntryKind::Reuse;
        entries[4].kind = EntryKind::Repair;
        let stats = walk(&entries);
        assert_eq!(stats.duplicates, 0);
        assert_eq!(stats.out_of_order, 0);
        assert_eq!(stats.reuse, 1);
        assert_eq!(stats.repair, 1);
    }

    #[test]
    fn test_jump_resyncs() {
        let stats = walk(&stream(7, &[100, 101, 40000, 40001]));
        assert_eq!(stats.resyncs, 1);
        assert_eq!(stats.missing, 0);
        assert_eq!(stats.expected, 4);
    }

    #[test]
    fn test_backward_jump_resyncs() {
        let seqs: Vec<u16> = (40000..40010).chain(100..140).collect();
        let stats = walk(&stream(7, &seqs));
        assert_eq!(stats.resyncs, 1);
        assert_eq!(stats.out_of_order, 0);
        assert_eq!(stats.missing, 0);
        assert_eq!(stats.duplicates, 0);
        assert_eq!(stats.expected, 50);
    }

    #[test]
    fn test_abort() {
        let entries = stream(7, &[1, 2, 3]);
        let cfg = AnalyzerConfig::default();
        let groups = discover(&entries, &cfg);
        let flag = AbortFlag::new();
        flag.set();
        assert_eq!(
            walk_group(&groups[0], &entries, &cfg, Some(&flag)),
            Err(AnalyzeError::Aborted)
        );
    }
}
