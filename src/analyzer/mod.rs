//! Stream sequence analyzer
//!
//! Entries (one per RTP packet) are grouped by stream identity, each group is walked to count
//! loss, duplication and reordering, and an ingress set can be reconciled against the egress
//! set produced from it by downstream processing.
//!
//! ```rust
//! use capdiag::analyzer::{Analyzer, AnalyzerConfig, AnalyzerEntry, EntryKind};
//!
//! let mut entries: Vec<AnalyzerEntry> = [1u16, 2, 2, 4]
//!     .iter()
//!     .enumerate()
//!     .map(|(i, &seq)| AnalyzerEntry {
//!         packet_number: i as u64 + 1,
//!         capture_usec: 0,
//!         ssrc: 42,
//!         channel: 0,
//!         sequence: seq,
//!         timestamp: u32::from(seq) * 160,
//!         payload_type: 0,
//!         kind: EntryKind::Media,
//!     })
//!     .collect();
//! let groups = Analyzer::new(AnalyzerConfig::default())
//!     .analyze_set(&mut entries)
//!     .expect("analysis");
//! assert_eq!(groups[0].stats.duplicates, 1);
//! assert_eq!(groups[0].stats.missing, 1);
//! ```

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::abort::AbortFlag;
use crate::error::AnalyzeError;

mod discovery;
mod entry;
mod reconcile;
mod report;
mod walk;

pub use discovery::*;
pub use entry::*;
pub use reconcile::*;
pub use report::*;
pub use walk::*;

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AnalyzerConfig {
    /// Include the channel number in the stream identity
    pub key_by_channel: bool,
    /// Make each group contiguous before walking
    pub collate: bool,
    /// Count consecutive identical telephone-event packets as duplicates
    pub count_dtmf_duplicates: bool,
    /// Entries examined when establishing the first sequence number of a group
    pub lookahead: usize,
    /// Entries searched ahead for an out-of-order packet
    pub ooo_window: usize,
    /// Largest forward step accepted across a 16-bit wrap
    pub max_wrap_gap: u16,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        AnalyzerConfig {
            key_by_channel: false,
            collate: false,
            count_dtmf_duplicates: false,
            lookahead: 30,
            ooo_window: 30,
            max_wrap_gap: 20000,
        }
    }
}

/// Runs discovery, collation, walks and reconciliation
#[derive(Clone, Debug, Default)]
pub struct Analyzer {
    config: AnalyzerConfig,
    abort: Option<AbortFlag>,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Analyzer {
        Analyzer {
            config,
            abort: None,
        }
    }

    /// Poll `flag` at every step of the walks and the reconciliation
    pub fn with_abort(mut self, flag: AbortFlag) -> Analyzer {
        self.abort = Some(flag);
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Group `entries` and fill in the counters of each group
    ///
    /// On abort, `groups` holds the groups walked so far.
    fn run_set(
        &self,
        entries: &mut [AnalyzerEntry],
        groups: &mut Vec<StreamGroup>,
    ) -> Result<(), AnalyzeError> {
        *groups = discover(entries, &self.config);
        if self.config.collate && collate(entries, &self.config) {
            debug!("entries collated, rediscovering groups");
            *groups = discover(entries, &self.config);
        }
        for g in groups.iter_mut() {
            g.stats = walk_group(g, entries, &self.config, self.abort.as_ref())?;
        }
        Ok(())
    }

    /// Analyze one set of entries
    ///
    /// With collation enabled, `entries` is reordered so that the entries of each group are
    /// contiguous.
    pub fn analyze_set(
        &self,
        entries: &mut [AnalyzerEntry],
    ) -> Result<Vec<StreamGroup>, AnalyzeError> {
        let mut groups = Vec::new();
        self.run_set(entries, &mut groups)?;
        Ok(groups)
    }

    /// Analyze an ingress set and, when given, the egress set derived from it
    ///
    /// An abort does not discard the counters gathered so far; the report is marked aborted.
    pub fn analyze(
        &self,
        ingress: &mut [AnalyzerEntry],
        egress: Option<&mut [AnalyzerEntry]>,
    ) -> AnalysisReport {
        let mut report = AnalysisReport::default();
        let result = self.run_set(ingress, &mut report.ingress).and_then(|_| {
            let egress = match egress {
                Some(e) => e,
                None => return Ok(()),
            };
            self.run_set(egress, &mut report.egress)?;
            let r = reconcile(
                ingress,
                &report.ingress,
                egress,
                &report.egress,
                &self.config,
                self.abort.as_ref(),
            )?;
            report.reconciliation = Some(r);
            Ok(())
        });
        if let Err(e) = result {
            warn!("{}", e);
            report.aborted = true;
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::entry::tests::stream;

    #[test]
    fn test_analyze_collated() {
        let mut entries = stream(1, &[1, 2, 3]);
        let other = stream(2, &[9, 10]);
        entries.insert(1, other[0]);
        entries.insert(2, other[1]);
        let cfg = AnalyzerConfig {
            collate: true,
            ..AnalyzerConfig::default()
        };
        let groups = Analyzer::new(cfg).analyze_set(&mut entries).expect("analysis");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].first_index, 0);
        assert_eq!(groups[0].last_index, 2);
        assert_eq!(groups[1].first_index, 3);
        assert_eq!(groups[0].stats.missing, 0);
        assert_eq!(groups[1].stats.packets, 2);
    }

    #[test]
    fn test_analyze_reuse_vs_drop() {
        let mut ingress = stream(5, &[10, 11, 12]);
        let mut egress = stream(5, &[10, 11, 11, 12]);
        egress[2].kind = EntryKind::Reuse;
        let report = Analyzer::default().analyze(&mut ingress, Some(&mut egress));
        let r = report.reconciliation.expect("reconciliation");
        assert_eq!(r.totals.drops, 0);
        assert_eq!(report.egress[0].stats.reuse, 1);
    }

    #[test]
    fn test_analyze_aborted() {
        let flag = AbortFlag::new();
        flag.set();
        let mut ingress = stream(5, &[10, 11, 12]);
        let report = Analyzer::default()
            .with_abort(flag)
            .analyze(&mut ingress, None);
        assert!(report.aborted);
        assert_eq!(report.ingress.len(), 1);
        assert_eq!(report.ingress[0].stats.packets, 0);
    }
}
