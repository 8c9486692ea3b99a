use std::fmt;

use crate::capture::RecordHeader;
use crate::fields::{ContentClass, PacketFields};

/// Event class of an analyzed packet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Media,
    /// Silence descriptor
    Sid,
    /// Telephone-event
    Dtmf,
    /// Synthetic packet re-sending earlier media to cover a gap
    Reuse,
    /// Synthetic packet filling a gap with a sequence number of its own
    Repair,
}

impl EntryKind {
    /// Entries inserted by upstream processing rather than received
    #[inline]
    pub fn is_synthetic(self) -> bool {
        matches!(self, EntryKind::Reuse | EntryKind::Repair)
    }
}

/// Identity of a stream
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    pub ssrc: u32,
    /// Internal channel number, only part of the identity when keying by channel
    pub channel: Option<u16>,
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.channel {
            Some(ch) => write!(f, "SSRC {:#010x} ch {}", self.ssrc, ch),
            None => write!(f, "SSRC {:#010x}", self.ssrc),
        }
    }
}

/// One RTP packet, as seen by the sequence analysis
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnalyzerEntry {
    /// 1-based packet number in the capture the entry was read from
    pub packet_number: u64,
    /// Capture time, in microseconds
    pub capture_usec: u64,
    pub ssrc: u32,
    /// Internal channel number, 0 when unknown
    pub channel: u16,
    pub sequence: u16,
    pub timestamp: u32,
    pub payload_type: u8,
    pub kind: EntryKind,
}

impl AnalyzerEntry {
    /// Build an entry from parsed fields
    ///
    /// Returns `None` for packets that are not RTP media, SID or telephone-event.
    pub fn from_fields(
        fields: &PacketFields,
        header: &RecordHeader,
        packet_number: u64,
    ) -> Option<AnalyzerEntry> {
        let rtp = fields.rtp?;
        let kind = match fields.content {
            ContentClass::Media => EntryKind::Media,
            ContentClass::Sid => EntryKind::Sid,
            ContentClass::Dtmf => EntryKind::Dtmf,
            _ => return None,
        };
        Some(AnalyzerEntry {
            packet_number,
            capture_usec: u64::from(header.ts_sec) * 1_000_000 + u64::from(header.ts_usec),
            ssrc: rtp.ssrc,
            channel: 0,
            sequence: rtp.sequence,
            timestamp: rtp.timestamp,
            payload_type: rtp.payload_type,
            kind,
        })
    }

    pub fn key(&self, by_channel: bool) -> StreamKey {
        StreamKey {
            ssrc: self.ssrc,
            channel: if by_channel { Some(self.channel) } else { None },
        }
    }
}
