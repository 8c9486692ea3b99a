use std::fmt;

use super::discovery::{split_extended, StreamGroup};
use super::reconcile::Reconciliation;
use super::walk::StreamStats;

/// Outcome of an analysis, printable as a four-section text report
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnalysisReport {
    pub ingress: Vec<StreamGroup>,
    pub egress: Vec<StreamGroup>,
    /// Present when an egress set was analyzed
    pub reconciliation: Option<Reconciliation>,
    /// The abort flag stopped the analysis; counters are partial
    pub aborted: bool,
}

impl AnalysisReport {
    /// Sum of the counters of `groups`
    pub fn totals(groups: &[StreamGroup]) -> StreamStats {
        let mut t = StreamStats::default();
        for g in groups {
            let s = &g.stats;
            t.packets += s.packets;
            t.expected += s.expected;
            t.out_of_order += s.out_of_order;
            t.max_out_of_order = t.max_out_of_order.max(s.max_out_of_order);
            t.duplicates += s.duplicates;
            t.missing += s.missing;
            t.max_consecutive_missing = t.max_consecutive_missing.max(s.max_consecutive_missing);
            t.resyncs += s.resyncs;
            t.sid += s.sid;
            t.dtmf += s.dtmf;
            t.reuse += s.reuse;
            t.repair += s.repair;
        }
        t
    }
}

fn write_groups(f: &mut fmt::Formatter, groups: &[StreamGroup]) -> fmt::Result {
    if groups.is_empty() {
        return writeln!(f, "  no streams");
    }
    for g in groups {
        let s = &g.stats;
        let (first, first_wraps) = split_extended(g.first_seq);
        let (last, last_wraps) = split_extended(g.last_seq);
        writeln!(
            f,
            "  {}: {} packets, seq {}..{} ({} wraps), loss {:.2}%, ooo {:.2}% (max {}), \
             missing {} (max consecutive {}), duplicates {}",
            g.key,
            s.packets,
            first,
            last,
            last_wraps - first_wraps,
            s.loss_percent(),
            s.out_of_order_percent(),
            s.max_out_of_order,
            s.missing,
            s.max_consecutive_missing,
            s.duplicates,
        )?;
        if s.resyncs > 0 || g.leading_wrap {
            writeln!(
                f,
                "    resyncs {}, leading wrap {}",
                s.resyncs, g.leading_wrap
            )?;
        }
        if s.channels.len() > 1 {
            let channels: Vec<String> = s.channels.iter().map(u16::to_string).collect();
            writeln!(f, "    channels {}", channels.join(" "))?;
        }
    }
    Ok(())
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.aborted {
            writeln!(f, "(analysis aborted, counters are partial)")?;
        }

        writeln!(f, "Packet Ingress Stats")?;
        write_groups(f, &self.ingress)?;

        writeln!(f, "Jitter Buffer Stats")?;
        let t = AnalysisReport::totals(&self.egress);
        writeln!(
            f,
            "  SID {}, DTMF {}, media reuse {}, repair {}",
            t.sid, t.dtmf, t.reuse, t.repair
        )?;
        if let Some(r) = &self.reconciliation {
            writeln!(
                f,
                "  repairs reclassified as reuse {}",
                r.totals.repairs_reclassified
            )?;
        }

        writeln!(f, "Packet Stats and Analysis")?;
        let t = AnalysisReport::totals(&self.ingress);
        writeln!(
            f,
            "  ingress: {} packets, {} missing, {} duplicates, {} out of order",
            t.packets, t.missing, t.duplicates, t.out_of_order
        )?;
        match &self.reconciliation {
            Some(r) => {
                writeln!(
                    f,
                    "  compared {}, dropped {}, duplicated {}, timestamp mismatches {}",
                    r.totals.compared,
                    r.totals.drops,
                    r.totals.duplicates,
                    r.totals.timestamp_mismatches
                )?;
                for key in &r.unmapped {
                    writeln!(f, "  {} has no egress stream", key)?;
                }
                for w in &r.warnings {
                    writeln!(f, "  warning: {}", w)?;
                }
            }
            None => writeln!(f, "  no egress set")?,
        }

        writeln!(f, "Packet Egress Stats")?;
        write_groups(f, &self.egress)
    }
}

#[cfg(test)]
mod tests {
    use crate::analyzer::entry::tests::stream;
    use crate::analyzer::{Analyzer, AnalyzerConfig};

    #[test]
    fn test_report_sections() {
        let mut ingress = stream(0x1234, &[1, 2, 2, 4]);
        let mut egress = stream(0x1234, &[1, 2, 4]);
        let report =
            Analyzer::new(AnalyzerConfig::default()).analyze(&mut ingress, Some(&mut egress));
        let text = report.to_string();
        let sections = [
            "Packet Ingress Stats",
            "Jitter Buffer Stats",
            "Packet Stats and Analysis",
            "Packet Egress Stats",
        ];
        let mut last = 0;
        for s in sections.iter() {
            let at = text.find(s).expect("section");
            assert!(at >= last);
            last = at;
        }
        assert!(text.contains("SSRC 0x00001234: 4 packets, seq 1..4"));
        assert!(text.contains("dropped 0"));
        assert!(!report.aborted);
    }
}
