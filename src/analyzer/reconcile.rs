use std::collections::HashMap;

use tracing::{debug, warn};

use super::discovery::StreamGroup;
use super::entry::{AnalyzerEntry, EntryKind, StreamKey};
use super::AnalyzerConfig;
use crate::abort::AbortFlag;
use crate::error::AnalyzeError;

/// Ingress versus egress counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CrossStats {
    /// Ingress packets looked up in the egress set
    pub compared: u64,
    /// Ingress packets with no egress packet of the same sequence number
    pub drops: u64,
    /// Extra egress packets matching one ingress packet
    pub duplicates: u64,
    /// Sequence number matched but the RTP timestamp differs
    pub timestamp_mismatches: u64,
    /// Repair entries treated as reuse after a timestamp mismatch
    pub repairs_reclassified: u64,
}

impl CrossStats {
    fn merge(&mut self, other: &CrossStats) {
        self.compared += other.compared;
        self.drops += other.drops;
        self.duplicates += other.duplicates;
        self.timestamp_mismatches += other.timestamp_mismatches;
        self.repairs_reclassified += other.repairs_reclassified;
    }
}

/// Result of comparing an ingress set with an egress set
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Reconciliation {
    pub totals: CrossStats,
    /// Counters per ingress group, in ingress group order
    pub per_group: Vec<(StreamKey, CrossStats)>,
    /// Ingress groups without an egress group of the same identity
    pub unmapped: Vec<StreamKey>,
    /// Non-fatal problems found while mapping groups
    pub warnings: Vec<AnalyzeError>,
}

/// Map each ingress group to the egress group of the same identity
pub fn map_groups(
    ingress: &[StreamGroup],
    egress: &[StreamGroup],
) -> (Vec<Option<usize>>, Option<AnalyzeError>) {
    let warning = if ingress.len() != egress.len() {
        warn!(
            "ingress has {} stream groups, egress has {}",
            ingress.len(),
            egress.len()
        );
        Some(AnalyzeError::GroupCountMismatch {
            ingress: ingress.len(),
            egress: egress.len(),
        })
    } else {
        None
    };
    let by_key: HashMap<StreamKey, usize> =
        egress.iter().enumerate().map(|(i, g)| (g.key, i)).collect();
    let mapping = ingress.iter().map(|g| by_key.get(&g.key).copied()).collect();
    (mapping, warning)
}

struct Search<'a> {
    group: &'a StreamGroup,
    entries: &'a [AnalyzerEntry],
    kinds: Vec<EntryKind>,
    used: Vec<bool>,
    /// Position in the egress group where the next search starts
    offset: usize,
    window: usize,
}

impl<'a> Search<'a> {
    fn entry(&self, member: usize) -> &'a AnalyzerEntry {
        &self.entries[self.group.members[member]]
    }

    /// Unused, non-reuse egress members carrying `seq`, in order
    ///
    /// The window extends `window` members on both sides of the offset, plus one member
    /// for every reuse entry passed ahead of it.
    fn candidates(&self, seq: u16) -> Vec<usize> {
        let n = self.kinds.len();
        let lo = self.offset.saturating_sub(self.window);
        let mut hi = (self.offset + self.window).min(n);
        let mut found = Vec::new();
        let mut m = lo;
        while m < hi {
            if self.kinds[m] == EntryKind::Reuse {
                if m >= self.offset {
                    hi = (hi + 1).min(n);
                }
            } else if !self.used[m] && self.entry(m).sequence == seq {
                found.push(m);
            }
            m += 1;
        }
        found
    }
}

/// Look up every received ingress packet of `ingress_group` in `egress_group`
///
/// Egress reuse entries never match and widen the search window instead, so a reuse insert
/// is not mistaken for a drop.
pub fn reconcile_group(
    ingress_group: &StreamGroup,
    ingress: &[AnalyzerEntry],
    egress_group: &StreamGroup,
    egress: &[AnalyzerEntry],
    cfg: &AnalyzerConfig,
    abort: Option<&AbortFlag>,
) -> Result<CrossStats, AnalyzeError> {
    let mut stats = CrossStats::default();
    let mut search = Search {
        group: egress_group,
        entries: egress,
        kinds: egress_group.members.iter().map(|&i| egress[i].kind).collect(),
        used: vec![false; egress_group.members.len()],
        offset: 0,
        window: cfg.lookahead,
    };
    let segments = ingress_group.segments();
    if segments > 2 {
        // the search offset is only carried from one segment into the next
        warn!(
            stream = %ingress_group.key,
            segments,
            "SSRC resumed by more than two stream segments, later segments are not reliably matched"
        );
    }
    let max_gap = i64::from(cfg.max_wrap_gap);
    for (k, &i) in ingress_group.members.iter().enumerate() {
        if abort.map_or(false, AbortFlag::is_set) {
            return Err(AnalyzeError::Aborted);
        }
        let e = &ingress[i];
        if e.kind.is_synthetic() {
            continue;
        }
        if k > 0 && ingress_group.extended[k] == ingress_group.extended[k - 1] {
            // ingress duplicate, counted by the walk
            continue;
        }
        if k > 0 && (ingress_group.extended[k] - ingress_group.extended[k - 1]).abs() > max_gap {
            debug!(
                stream = %ingress_group.key,
                packet = e.packet_number,
                offset = search.offset,
                "new stream segment, carrying search offset"
            );
        }
        stats.compared += 1;
        let mut retried = false;
        loop {
            let found = search.candidates(e.sequence);
            let first = match found.first() {
                Some(&m) => m,
                None => {
                    stats.drops += 1;
                    debug!(
                        stream = %ingress_group.key,
                        packet = e.packet_number,
                        seq = e.sequence,
                        "dropped"
                    );
                    break;
                }
            };
            let matched = search.entry(first);
            if matched.timestamp != e.timestamp {
                if search.kinds[first] == EntryKind::Repair && !retried {
                    // a repair shorter than the real gap took this number
                    search.kinds[first] = EntryKind::Reuse;
                    stats.repairs_reclassified += 1;
                    retried = true;
                    continue;
                }
                stats.timestamp_mismatches += 1;
                debug!(
                    stream = %ingress_group.key,
                    packet = e.packet_number,
                    seq = e.sequence,
                    ingress = e.timestamp,
                    egress = matched.timestamp,
                    "timestamp mismatch"
                );
            }
            if found.len() > 1 {
                stats.duplicates += (found.len() - 1) as u64;
                debug!(
                    stream = %ingress_group.key,
                    packet = e.packet_number,
                    seq = e.sequence,
                    copies = found.len(),
                    "duplicated in egress"
                );
            }
            for &m in &found {
                search.used[m] = true;
            }
            search.offset = search.offset.max(first + 1);
            break;
        }
    }
    Ok(stats)
}

/// Compare every ingress group with its egress counterpart
pub fn reconcile(
    ingress: &[AnalyzerEntry],
    ingress_groups: &[StreamGroup],
    egress: &[AnalyzerEntry],
    egress_groups: &[StreamGroup],
    cfg: &AnalyzerConfig,
    abort: Option<&AbortFlag>,
) -> Result<Reconciliation, AnalyzeError> {
    let (mapping, warning) = map_groups(ingress_groups, egress_groups);
    let mut result = Reconciliation {
        warnings: warning.into_iter().collect(),
        ..Reconciliation::default()
    };
    for (group, mapped) in ingress_groups.iter().zip(mapping) {
        let egress_group = match mapped {
            Some(g) => &egress_groups[g],
            None => {
                warn!(stream = %group.key, "no egress stream for ingress stream");
                result.unmapped.push(group.key);
                continue;
            }
        };
        let stats = reconcile_group(group, ingress, egress_group, egress, cfg, abort)?;
        result.totals.merge(&stats);
        result.per_group.push((group.key, stats));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::discovery::discover;
    use crate::analyzer::entry::tests::stream;

    fn run(ingress: &[AnalyzerEntry], egress: &[AnalyzerEntry]) -> Reconciliation {
        let cfg = AnalyzerConfig::default();
        let ig = discover(ingress, &cfg);
        let eg = discover(egress, &cfg);
        reconcile(ingress, &ig, egress, &eg, &cfg, None).expect("reconcile")
    }

    #[test]
    fn test_reuse_is_not_a_drop() {
        let ingress = stream(1, &[10, 11, 12]);
        let mut egress = stream(1, &[10, 11, 11, 12]);
        egress[2].kind = EntryKind::Reuse;
        let r = run(&ingress, &egress);
        assert_eq!(r.totals.compared, 3);
        assert_eq!(r.totals.drops, 0);
        assert_eq!(r.totals.duplicates, 0);
        assert_eq!(r.totals.timestamp_mismatches, 0);
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn test_repair_with_own_number_is_not_a_drop() {
        let ingress = stream(1, &[10, 11, 12]);
        let mut egress = stream(1, &[10, 11, 500, 12]);
        egress[2].kind = EntryKind::Repair;
        egress[2].timestamp = 11 * 160 + 80;
        let r = run(&ingress, &egress);
        assert_eq!(r.totals.compared, 3);
        assert_eq!(r.totals.drops, 0);
        assert_eq!(r.totals.duplicates, 0);
        assert_eq!(r.totals.timestamp_mismatches, 0);
        assert_eq!(r.totals.repairs_reclassified, 0);
    }

    #[test]
    fn test_repair_retried_as_reuse() {
        let ingress = stream(1, &[10, 11, 12]);
        let mut egress = stream(1, &[10, 11, 12, 12]);
        egress[2].kind = EntryKind::Repair;
        egress[2].timestamp = 11 * 160 + 80;
        let r = run(&ingress, &egress);
        assert_eq!(r.totals.drops, 0);
        assert_eq!(r.totals.repairs_reclassified, 1);
        assert_eq!(r.totals.timestamp_mismatches, 0);
        assert_eq!(r.totals.duplicates, 0);
    }

    #[test]
    fn test_drop_duplicate_and_mismatch() {
        let ingress = stream(1, &[1, 2, 3, 4]);
        let mut egress = stream(1, &[1, 1, 3, 4]);
        egress[3].timestamp += 1;
        let r = run(&ingress, &egress);
        assert_eq!(r.totals.duplicates, 1);
        assert_eq!(r.totals.drops, 1);
        assert_eq!(r.totals.timestamp_mismatches, 1);
    }

    #[test]
    fn test_group_count_mismatch() {
        let mut ingress = stream(1, &[1, 2]);
        ingress.extend(stream(2, &[5, 6]));
        let egress = stream(1, &[1, 2]);
        let r = run(&ingress, &egress);
        assert_eq!(
            r.warnings,
            vec![AnalyzeError::GroupCountMismatch {
                ingress: 2,
                egress: 1
            }]
        );
        assert_eq!(r.unmapped.len(), 1);
        assert_eq!(r.unmapped[0].ssrc, 2);
        assert_eq!(r.totals.drops, 0);
    }

    #[test]
    fn test_offset_carried_into_second_segment() {
        let ingress = stream(1, &[100, 101, 40000, 40001]);
        let egress = stream(1, &[100, 101, 40000, 40001]);
        let r = run(&ingress, &egress);
        assert_eq!(r.totals.drops, 0);
        assert_eq!(r.totals.compared, 4);
    }
}
