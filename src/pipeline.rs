//! Capture loading
//!
//! Reads a capture and turns it into analyzer entries: records are filtered, fragments are
//! reassembled, fields are parsed and every RTP packet becomes one [`AnalyzerEntry`].

use std::io::Read;
use std::path::Path;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::abort::AbortFlag;
use crate::analyzer::AnalyzerEntry;
use crate::capture::{CaptureReader, PacketRecord, ReadContext, ReaderOptions, ReaderStats};
use crate::error::CaptureError;
use crate::fields::{FieldParser, PacketFields};
use crate::filter::{discard_reason, is_duplicate, DiscardReason, FilterConfig, PacketView};
use crate::fragment::{FragmentList, FragmentOutcome, RemovalReport};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LoadOptions {
    pub reader: ReaderOptions,
    pub filter: FilterConfig,
}

/// What happened to the records of a capture
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub records: u64,
    pub read_errors: u64,
    pub arp: u64,
    pub llc: u64,
    pub tcp: u64,
    pub rtcp: u64,
    pub sip_control: u64,
    /// Copies of the immediately preceding packet
    pub duplicates: u64,
    /// Retransmitted fragments already stored
    pub duplicate_fragments: u64,
    /// Fragments stored, waiting for the rest of their datagram
    pub pending_fragments: u64,
    pub reassembled: u64,
    pub fragment_errors: u64,
    /// Packets that are not RTP media, SID or telephone-event
    pub not_rtp: u64,
    /// Fragments left incomplete at the end of the capture
    pub orphans: RemovalReport,
    pub reader: ReaderStats,
}

impl LoadStats {
    fn discarded(&mut self, reason: DiscardReason) {
        let counter = match reason {
            DiscardReason::Arp => &mut self.arp,
            DiscardReason::Llc => &mut self.llc,
            DiscardReason::Tcp => &mut self.tcp,
            DiscardReason::Rtcp => &mut self.rtcp,
            DiscardReason::SipControl => &mut self.sip_control,
        };
        *counter += 1;
    }
}

/// Entries of one capture
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Loaded {
    pub entries: Vec<AnalyzerEntry>,
    pub stats: LoadStats,
    /// The abort flag stopped loading; entries are partial
    pub aborted: bool,
}

/// Load the entries of an open capture
///
/// Incomplete fragment sets stay in `fragments`; the caller decides when to sweep them.
pub fn load_entries<R, P>(
    reader: &mut CaptureReader<R>,
    parser: &P,
    filter: &FilterConfig,
    fragments: &mut FragmentList,
    abort: Option<&AbortFlag>,
) -> Loaded
where
    R: Read,
    P: FieldParser + ?Sized,
{
    let mut loaded = Loaded::default();
    let mut previous: Option<(PacketRecord, PacketFields)> = None;
    let mut number = 0u64;
    loop {
        if abort.map_or(false, AbortFlag::is_set) {
            info!(packet = number, "loading aborted");
            loaded.aborted = true;
            break;
        }
        number += 1;
        let record = match reader.next_packet(&ReadContext::packet(number)) {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(e) => {
                // already reported by the reader
                loaded.stats.read_errors += 1;
                if matches!(e, CaptureError::Io(_)) {
                    break;
                }
                continue;
            }
        };
        loaded.stats.records += 1;
        let fields = parser.parse_fields(&record.data);
        if let Some(reason) = discard_reason(filter, &record, fields.as_ref()) {
            debug!(packet = number, reason = %reason, "discarded");
            loaded.stats.discarded(reason);
            continue;
        }
        let fields = match fields {
            Some(f) => f,
            None => {
                loaded.stats.not_rtp += 1;
                continue;
            }
        };
        if let Some((prev, prev_fields)) = &previous {
            let a = PacketView::new(prev_fields, &prev.data);
            if is_duplicate(filter, a, PacketView::new(&fields, &record.data)) {
                debug!(packet = number, "duplicate of previous packet");
                loaded.stats.duplicates += 1;
                continue;
            }
        }
        let reassembled = if fields.fragment.is_fragment() {
            match fragments.process(&record.data) {
                Ok(FragmentOutcome::NotFragment) => None,
                Ok(FragmentOutcome::Duplicate) => {
                    loaded.stats.duplicate_fragments += 1;
                    continue;
                }
                Ok(FragmentOutcome::Pending) => {
                    loaded.stats.pending_fragments += 1;
                    previous = Some((record, fields));
                    continue;
                }
                Ok(FragmentOutcome::Reassembled(full)) => {
                    loaded.stats.reassembled += 1;
                    debug!(packet = number, len = full.len(), "datagram reassembled");
                    parser.parse_fields(&full)
                }
                Err(e) => {
                    warn!(packet = number, "fragment not stored: {}", e);
                    loaded.stats.fragment_errors += 1;
                    continue;
                }
            }
        } else {
            None
        };
        let entry_fields = reassembled.as_ref().unwrap_or(&fields);
        match AnalyzerEntry::from_fields(entry_fields, &record.header, number) {
            Some(entry) => loaded.entries.push(entry),
            None => loaded.stats.not_rtp += 1,
        }
        previous = Some((record, fields));
    }
    loaded.stats.reader = *reader.stats();
    loaded
}

/// Open `path` and load its entries, sweeping orphan fragments at the end
pub fn load_file<P, F>(
    path: P,
    parser: &F,
    options: &LoadOptions,
    abort: Option<&AbortFlag>,
) -> Result<Loaded, CaptureError>
where
    P: AsRef<Path>,
    F: FieldParser + ?Sized,
{
    let mut reader = CaptureReader::open(path.as_ref(), options.reader.clone())?;
    let mut fragments = FragmentList::new();
    let mut loaded = load_entries(&mut reader, parser, &options.filter, &mut fragments, abort);
    loaded.stats.orphans = fragments.remove_fragment(None);
    if loaded.stats.orphans.removed > 0 {
        info!(
            removed = loaded.stats.orphans.removed,
            high_water = loaded.stats.orphans.high_water,
            "{}: incomplete fragment sets at end of capture",
            path.as_ref().display()
        );
    }
    loaded.stats.reader = reader.close();
    Ok(loaded)
}
