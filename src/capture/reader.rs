use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use circular::Buffer;
use nom::combinator::map;
use nom::{IResult, Needed, Offset};
use tracing::{debug, info, warn};

use super::*;
use crate::endianness::{CaptureBE, CaptureEndianness, CaptureLE};
use crate::wire::ETHERTYPE_IPV4;

/// Smallest circular buffer accepted; it must hold at least a file header
const MIN_BUFFER_CAPACITY: usize = 4096;

/// Streaming reader over a capture file of any supported container
///
/// The reader is based on a circular buffer, so memory usage stays constant whatever the size
/// of the input. The buffer grows when a single record does not fit.
///
/// The file header (and for pcapng, the first section header and the interface description
/// following it) is consumed when the reader is created; [`FormatDescriptor`] describes what
/// was found. [`read_record`](CaptureReader::read_record) then returns one entry per call, and
/// `Ok(None)` at end of file.
///
/// A framing error (declared lengths that cannot be trusted) ends the stream: the error is
/// returned once and subsequent reads return `Ok(None)`. Errors about the content of a single
/// record (unsupported link type, truncated link header) leave the reader positioned on the
/// next record.
pub struct CaptureReader<R>
where
    R: Read,
{
    descriptor: FormatDescriptor,
    options: ReaderOptions,
    path: Option<PathBuf>,
    reader: R,
    buffer: Buffer,
    reader_exhausted: bool,
    /// Interfaces of the current pcapng section
    interfaces: Vec<InterfaceDescription>,
    stats: ReaderStats,
}

/// An entry parsed out of the buffer, copied so the buffer can be consumed
enum RawItem {
    Legacy {
        ts_sec: u32,
        ts_frac: u32,
        origlen: u32,
        frame: Vec<u8>,
    },
    Section(SectionHeader),
    Interface(InterfaceDescription),
    NgPacket {
        kind: BlockKind,
        if_id: u32,
        ts_high: u32,
        ts_low: u32,
        origlen: u32,
        frame: Vec<u8>,
    },
    Other(BlockKind),
    RtpDump {
        plen: u16,
        offset_ms: u32,
        rtp: Vec<u8>,
    },
}

impl RawItem {
    fn legacy(r: LegacyPcapRecord) -> RawItem {
        RawItem::Legacy {
            ts_sec: r.ts_sec,
            ts_frac: r.ts_frac,
            origlen: r.origlen,
            frame: r.data.to_vec(),
        }
    }

    fn ng(b: NgBlock) -> RawItem {
        match b {
            NgBlock::SectionHeader(shb) => RawItem::Section(shb),
            NgBlock::InterfaceDescription(idb) => RawItem::Interface(idb),
            NgBlock::Packet(p) => RawItem::NgPacket {
                kind: p.kind,
                if_id: p.if_id,
                ts_high: p.ts_high,
                ts_low: p.ts_low,
                origlen: p.origlen,
                frame: p.data.to_vec(),
            },
            NgBlock::Other(kind) => RawItem::Other(kind),
        }
    }

    fn rtpdump(r: RtpDumpRecord) -> RawItem {
        RawItem::RtpDump {
            plen: r.plen,
            offset_ms: r.offset_ms,
            rtp: r.data.to_vec(),
        }
    }
}

fn parse_raw(
    kind: ContainerKind,
    big_endian: bool,
    i: &[u8],
) -> IResult<&[u8], RawItem, CaptureError> {
    match (kind, big_endian) {
        (ContainerKind::LegacyPcap, false) => {
            map(parse_pcap_record::<CaptureLE>, RawItem::legacy)(i)
        }
        (ContainerKind::LegacyPcap, true) => {
            map(parse_pcap_record::<CaptureBE>, RawItem::legacy)(i)
        }
        (ContainerKind::PcapNg, false) => map(parse_ng_block::<CaptureLE>, RawItem::ng)(i),
        (ContainerKind::PcapNg, true) => map(parse_ng_block::<CaptureBE>, RawItem::ng)(i),
        (ContainerKind::RtpDump, _) => map(parse_rtpdump_record, RawItem::rtpdump)(i),
    }
}

/// Parse the interface description block at the start of a section, if there is one
fn leading_interface<En: CaptureEndianness>(
    i: &[u8],
) -> IResult<&[u8], Option<InterfaceDescription>, CaptureError> {
    if peek_block_type::<En>(i) != Some(IDB_MAGIC) {
        return Ok((i, None));
    }
    let (rem, block) = parse_ng_block::<En>(i)?;
    match block {
        NgBlock::InterfaceDescription(idb) => Ok((rem, Some(idb))),
        _ => Ok((i, None)),
    }
}

impl CaptureReader<File> {
    /// Open a capture file and read its header
    pub fn open<P: AsRef<Path>>(
        path: P,
        options: ReaderOptions,
    ) -> Result<CaptureReader<File>, CaptureError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            warn!("{}: cannot open capture: {}", path.display(), e);
            CaptureError::Io(e)
        })?;
        Self::with_path(file, options, Some(path.to_path_buf()))
    }
}

impl<R> CaptureReader<R>
where
    R: Read,
{
    /// Create a reader over `reader`, consuming the file header
    pub fn new(reader: R, options: ReaderOptions) -> Result<CaptureReader<R>, CaptureError> {
        Self::with_path(reader, options, None)
    }

    fn with_path(
        reader: R,
        options: ReaderOptions,
        path: Option<PathBuf>,
    ) -> Result<CaptureReader<R>, CaptureError> {
        let buffer = Buffer::with_capacity(options.buffer_capacity.max(MIN_BUFFER_CAPACITY));
        let mut r = CaptureReader {
            descriptor: FormatDescriptor::new(ContainerKind::LegacyPcap, Linktype::ETHERNET),
            options,
            path,
            reader,
            buffer,
            reader_exhausted: false,
            interfaces: Vec::new(),
            stats: ReaderStats::default(),
        };
        if let Err(e) = r.read_file_header() {
            warn!("{}: {}", r.file_location(), e);
            return Err(e);
        }
        debug!(
            kind = ?r.descriptor.kind,
            linktype = %r.descriptor.linktype,
            big_endian = r.descriptor.big_endian,
            "{}: capture opened",
            r.file_location()
        );
        Ok(r)
    }

    fn read_file_header(&mut self) -> Result<(), CaptureError> {
        self.fill_to(16)?;
        self.descriptor.kind = detect_format(self.buffer.data())?;
        match self.descriptor.kind {
            ContainerKind::LegacyPcap => {
                let header = self
                    .parse_next("pcap file header", parse_pcap_header)?
                    .ok_or(CaptureError::HeaderNotRecognized)?;
                self.descriptor.big_endian = header.is_bigendian();
                self.descriptor.nanosecond = header.is_nanosecond_precision();
                self.descriptor.snaplen = header.snaplen;
                if !header.network.is_supported() {
                    return Err(CaptureError::UnsupportedLinktype(header.network.0));
                }
                self.descriptor.set_linktype(header.network);
            }
            ContainerKind::PcapNg => {
                let shb = self
                    .parse_next("section header block", parse_section_header)?
                    .ok_or(CaptureError::HeaderNotRecognized)?;
                self.descriptor.big_endian = shb.big_endian;
                self.fill_to(8)?;
                let idb = if shb.big_endian {
                    self.parse_next("interface description block", leading_interface::<CaptureBE>)?
                } else {
                    self.parse_next("interface description block", leading_interface::<CaptureLE>)?
                };
                match idb.flatten() {
                    Some(idb) => {
                        if !idb.linktype.is_supported() {
                            return Err(CaptureError::UnsupportedLinktype(idb.linktype.0));
                        }
                        self.descriptor.set_linktype(idb.linktype);
                        self.descriptor.snaplen = idb.snaplen;
                        self.interfaces.push(idb);
                    }
                    None => {
                        warn!(
                            "{}: no interface description block after the section header, \
                             assuming Ethernet",
                            self.file_location()
                        );
                        self.descriptor.set_linktype(Linktype::ETHERNET);
                    }
                }
            }
            ContainerKind::RtpDump => {
                let header = self
                    .parse_next("rtpdump file header", parse_rtpdump_header)?
                    .ok_or(CaptureError::InvalidRtpDumpHeader("empty file"))?;
                // records are synthesized as raw IPv4
                self.descriptor.set_linktype(Linktype::IPV4);
                self.descriptor.rtpdump = Some(header);
            }
        }
        Ok(())
    }

    pub fn descriptor(&self) -> &FormatDescriptor {
        &self.descriptor
    }

    pub fn stats(&self) -> &ReaderStats {
        &self.stats
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Release the input, returning the anomaly counters
    pub fn close(self) -> ReaderStats {
        self.stats
    }

    fn file_location(&self) -> Location {
        Location {
            path: self.path.as_deref(),
            packet_number: None,
            data_packet: true,
            context: None,
        }
    }

    fn refill(&mut self) -> Result<(), CaptureError> {
        self.buffer.shift();
        if self.buffer.available_space() == 0 {
            let size = self.buffer.capacity() * 2;
            self.buffer.grow(size);
        }
        let space = self.buffer.space();
        let sz = self.reader.read(space)?;
        self.reader_exhausted = sz == 0;
        self.buffer.fill(sz);
        Ok(())
    }

    fn fill_to(&mut self, n: usize) -> Result<(), CaptureError> {
        while self.buffer.available_data() < n && !self.reader_exhausted {
            self.refill()?;
        }
        Ok(())
    }

    /// Run `parser` on the buffered data, refilling until it has enough input
    ///
    /// Returns `Ok(None)` at a clean end of input.
    fn parse_next<T, F>(&mut self, what: &'static str, parser: F) -> Result<Option<T>, CaptureError>
    where
        F: for<'a> Fn(&'a [u8]) -> IResult<&'a [u8], T, CaptureError>,
    {
        loop {
            if self.buffer.available_data() == 0 && self.reader_exhausted {
                return Ok(None);
            }
            let data = self.buffer.data();
            let res = parser(data).map(|(rem, item)| (data.offset(rem), item));
            match res {
                Ok((offset, item)) => {
                    self.buffer.consume(offset);
                    return Ok(Some(item));
                }
                Err(nom::Err::Incomplete(needed)) => {
                    let got = self.buffer.available_data();
                    if self.reader_exhausted {
                        // expected more bytes but reader is EOF, truncated capture
                        self.buffer.consume(got);
                        let missing = match needed {
                            Needed::Size(n) => usize::from(n),
                            Needed::Unknown => 1,
                        };
                        return Err(CaptureError::Truncated {
                            what,
                            expected: got + missing,
                            got,
                        });
                    }
                    if let Needed::Size(n) = needed {
                        let want = got + usize::from(n);
                        if want > self.buffer.capacity() {
                            self.buffer.grow(want);
                        }
                    }
                    self.refill()?;
                }
                Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                    // lengths can no longer be trusted, stop here
                    let got = self.buffer.available_data();
                    self.buffer.consume(got);
                    self.reader_exhausted = true;
                    return Err(e);
                }
            }
        }
    }

    fn next_raw(&mut self) -> Result<Option<RawItem>, CaptureError> {
        let kind = self.descriptor.kind;
        let big_endian = self.descriptor.big_endian;
        self.parse_next("record", move |i: &[u8]| parse_raw(kind, big_endian, i))
    }

    /// Read the next entry of the capture
    ///
    /// `ctx` only annotates diagnostic messages. When it carries no packet number, the number
    /// of packets returned so far plus one is used.
    pub fn read_record(&mut self, ctx: &ReadContext) -> Result<Option<ReadItem>, CaptureError> {
        let number = ctx.packet_number.unwrap_or(self.stats.packets + 1);
        let raw = match self.next_raw() {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(e) => {
                let loc = Location {
                    path: self.path.as_deref(),
                    packet_number: Some(number),
                    data_packet: true,
                    context: ctx.context,
                };
                warn!("{}: {}", loc, e);
                return Err(e);
            }
        };
        match raw {
            RawItem::Legacy {
                ts_sec,
                ts_frac,
                origlen,
                frame,
            } => {
                let ts_usec = if self.descriptor.nanosecond {
                    ts_frac / 1000
                } else {
                    ts_frac
                };
                let linktype = self.descriptor.linktype;
                let ts = (ts_sec, ts_usec);
                self.packet(BlockKind::LegacyRecord, linktype, 0, ts, origlen, frame, number, ctx)
            }
            RawItem::NgPacket {
                kind,
                if_id,
                ts_high,
                ts_low,
                origlen,
                frame,
            } => {
                let (linktype, ts) = match self.interfaces.get(if_id as usize) {
                    Some(idb) => {
                        let resolution = idb.ts_resolution().unwrap_or(1_000_000);
                        let ts = build_ts_usec(ts_high, ts_low, idb.ts_offset, resolution);
                        (idb.linktype, ts)
                    }
                    None => {
                        let loc = Location {
                            path: self.path.as_deref(),
                            packet_number: Some(number),
                            data_packet: true,
                            context: ctx.context,
                        };
                        warn!("{}: {} refers to unknown interface {}", loc, kind, if_id);
                        let ts = build_ts_usec(ts_high, ts_low, 0, 1_000_000);
                        (self.descriptor.linktype, ts)
                    }
                };
                self.packet(kind, linktype, if_id, ts, origlen, frame, number, ctx)
            }
            RawItem::RtpDump {
                plen,
                offset_ms,
                rtp,
            } => self.rtpdump_packet(plen, offset_ms, rtp, number, ctx),
            RawItem::Section(shb) => {
                self.stats.section_headers += 1;
                self.interfaces.clear();
                self.descriptor.big_endian = shb.big_endian;
                self.skipped(BlockKind::SectionHeader, number, ctx)
            }
            RawItem::Interface(idb) => {
                self.interfaces.push(idb);
                self.skipped(BlockKind::InterfaceDescription, number, ctx)
            }
            RawItem::Other(kind) => self.skipped(kind, number, ctx),
        }
    }

    /// Read entries until the next packet, skipping (and reporting) the others
    pub fn next_packet(&mut self, ctx: &ReadContext) -> Result<Option<PacketRecord>, CaptureError> {
        loop {
            match self.read_record(ctx)? {
                Some(ReadItem::Packet(record)) => return Ok(Some(record)),
                Some(ReadItem::Skipped(_)) => (),
                None => return Ok(None),
            }
        }
    }

    fn skipped(
        &mut self,
        kind: BlockKind,
        number: u64,
        ctx: &ReadContext,
    ) -> Result<Option<ReadItem>, CaptureError> {
        self.stats.skipped_blocks += 1;
        let loc = Location {
            path: self.path.as_deref(),
            packet_number: Some(number),
            data_packet: false,
            context: ctx.context,
        };
        if kind == BlockKind::SectionHeader {
            warn!("{}: additional section header block, new section started", loc);
        } else if self.options.report_skipped_blocks {
            info!(block = %kind, "{}: skipped non-packet {}", loc, kind);
        }
        Ok(Some(ReadItem::Skipped(kind)))
    }

    #[allow(clippy::too_many_arguments)]
    fn packet(
        &mut self,
        block: BlockKind,
        linktype: Linktype,
        interface: u32,
        (ts_sec, ts_usec): (u32, u32),
        origlen: u32,
        mut frame: Vec<u8>,
        number: u64,
        ctx: &ReadContext,
    ) -> Result<Option<ReadItem>, CaptureError> {
        self.stats.packets += 1;
        let loc = Location {
            path: self.path.as_deref(),
            packet_number: Some(number),
            data_packet: true,
            context: ctx.context,
        };
        let link = match parse_link_layer(&frame, linktype) {
            Ok(link) => link,
            Err(e) => {
                warn!("{}: {}", loc, e);
                return Err(e);
            }
        };
        let mut data = frame.split_off(link.header_len);
        let tso_candidate = link.ethertype == ETHERTYPE_IPV4 && self.options.repair_tso;
        if tso_candidate && repair_tso_length(&mut data) {
            self.stats.tso_repairs += 1;
            if self.options.report_tso_repairs {
                info!(
                    "{}: zero IPv4 total length (TCP segmentation offload) set to {}",
                    loc,
                    data.len()
                );
            }
        }
        let header = RecordHeader {
            ts_sec,
            ts_usec,
            caplen: data.len() as u32,
            origlen: origlen.saturating_sub(link.header_len as u32),
        };
        Ok(Some(ReadItem::Packet(PacketRecord {
            header,
            data,
            link_header: frame,
            ethertype: link.ethertype,
            block,
            interface,
        })))
    }

    fn rtpdump_packet(
        &mut self,
        plen: u16,
        offset_ms: u32,
        rtp: Vec<u8>,
        number: u64,
        ctx: &ReadContext,
    ) -> Result<Option<ReadItem>, CaptureError> {
        self.stats.packets += 1;
        let loc = Location {
            path: self.path.as_deref(),
            packet_number: Some(number),
            data_packet: true,
            context: ctx.context,
        };
        if plen != 0 && usize::from(plen) != rtp.len() {
            self.stats.rtpdump_length_warnings += 1;
            warn!(
                "{}: rtpdump record declares {} RTP bytes but holds {}",
                loc,
                plen,
                rtp.len()
            );
        }
        let header = self.descriptor.rtpdump.as_ref();
        let data = match synthesize_ipv4_udp(header, &rtp) {
            Ok(data) => data,
            Err(e) => {
                warn!("{}: {}", loc, e);
                return Err(e);
            }
        };
        let (start_sec, start_usec) = header.map_or((0, 0), |h| (h.start_sec, h.start_usec));
        let usec = u64::from(start_usec) + u64::from(offset_ms % 1000) * 1000;
        let ts_sec = start_sec
            .wrapping_add(offset_ms / 1000)
            .wrapping_add((usec / 1_000_000) as u32);
        let len = data.len() as u32;
        Ok(Some(ReadItem::Packet(PacketRecord {
            header: RecordHeader {
                ts_sec,
                ts_usec: (usec % 1_000_000) as u32,
                caplen: len,
                origlen: len,
            },
            data,
            link_header: Vec::new(),
            ethertype: ETHERTYPE_IPV4,
            block: BlockKind::RtpDump,
            interface: 0,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::pcapng::tests::{IDB_TSRESOL_LE, SHB_BE, SHB_LE};
    use crate::capture::rtpdump::tests::header_10_0_0_5;
    use crate::wire::tests::IPV4_UDP_RTP;
    use hex_literal::hex;
    use std::io::Cursor;

    fn legacy_capture(linktype: Linktype, frames: &[&[u8]]) -> Vec<u8> {
        let mut v = PcapHeader::new(linktype, 65535).to_vec().expect("header");
        for (idx, frame) in frames.iter().enumerate() {
            let rec = LegacyPcapRecord {
                ts_sec: 100 + idx as u32,
                ts_frac: 250,
                caplen: frame.len() as u32,
                origlen: frame.len() as u32,
                data: frame,
            };
            v.extend(rec.to_vec().expect("record"));
        }
        v
    }

    #[test]
    fn test_legacy_raw_ip() {
        let data = legacy_capture(Linktype::RAW, &[IPV4_UDP_RTP, IPV4_UDP_RTP]);
        let mut reader = CaptureReader::new(Cursor::new(data), ReaderOptions::default())
            .expect("reader");
        assert_eq!(reader.descriptor().kind, ContainerKind::LegacyPcap);
        assert_eq!(reader.descriptor().link_header_len, 0);
        let ctx = ReadContext::default();
        let p = reader.next_packet(&ctx).expect("read").expect("packet");
        assert_eq!(p.data, IPV4_UDP_RTP);
        assert_eq!(p.header.ts_sec, 100);
        assert_eq!(p.header.ts_usec, 250);
        assert_eq!(p.ethertype, ETHERTYPE_IPV4);
        assert!(reader.next_packet(&ctx).expect("read").is_some());
        assert!(reader.next_packet(&ctx).expect("read").is_none());
        assert_eq!(reader.close().packets, 2);
    }

    #[test]
    fn test_small_buffer_grows() {
        let big = vec![0x45u8; 9000];
        let data = legacy_capture(Linktype::RAW, &[&big]);
        let options = ReaderOptions {
            buffer_capacity: 16,
            ..ReaderOptions::default()
        };
        let mut reader = CaptureReader::new(Cursor::new(data), options).expect("reader");
        let p = reader
            .next_packet(&ReadContext::default())
            .expect("read")
            .expect("packet");
        assert_eq!(p.data.len(), 9000);
    }

    #[test]
    fn test_truncated_record_then_eof() {
        let mut data = legacy_capture(Linktype::RAW, &[IPV4_UDP_RTP]);
        data.truncate(data.len() - 3);
        let mut reader = CaptureReader::new(Cursor::new(data), ReaderOptions::default())
            .expect("reader");
        let ctx = ReadContext::packet(1);
        assert!(matches!(
            reader.read_record(&ctx),
            Err(CaptureError::Truncated { .. })
        ));
        assert!(matches!(reader.read_record(&ctx), Ok(None)));
    }

    #[test]
    fn test_pcapng_without_interface_assumes_ethernet() {
        let mut data = SHB_BE.to_vec();
        // big-endian interface statistics block
        data.extend_from_slice(&hex!("00 00 00 05 00 00 00 0c 00 00 00 0c"));
        let mut reader = CaptureReader::new(Cursor::new(data), ReaderOptions::default())
            .expect("reader");
        assert_eq!(reader.descriptor().linktype, Linktype::ETHERNET);
        assert!(reader.descriptor().big_endian);
        assert_eq!(
            reader.read_record(&ReadContext::packet(1)).expect("read"),
            Some(ReadItem::Skipped(BlockKind::InterfaceStatistics))
        );
        assert_eq!(reader.read_record(&ReadContext::packet(1)).expect("read"), None);
        assert_eq!(reader.stats().skipped_blocks, 1);
    }

    #[test]
    fn test_pcapng_tsresol_and_second_section() {
        let mut data = SHB_LE.to_vec();
        data.extend_from_slice(IDB_TSRESOL_LE);
        data.extend(
            enhanced_packet_to_vec(0, 0, 0, IPV4_UDP_RTP.len() as u32, IPV4_UDP_RTP)
                .expect("epb"),
        );
        data.extend_from_slice(SHB_LE);
        let mut reader = CaptureReader::new(Cursor::new(data), ReaderOptions::default())
            .expect("reader");
        assert_eq!(reader.descriptor().linktype, Linktype::RAW);
        let p = reader
            .next_packet(&ReadContext::packet(1))
            .expect("read")
            .expect("packet");
        assert_eq!(p.block, BlockKind::EnhancedPacket);
        assert_eq!(p.data, IPV4_UDP_RTP);
        assert_eq!(
            reader.read_record(&ReadContext::packet(2)).expect("read"),
            Some(ReadItem::Skipped(BlockKind::SectionHeader))
        );
        assert_eq!(reader.stats().section_headers, 1);
    }

    #[test]
    fn test_pcapng_second_section_switches_byte_order() {
        let mut data = SHB_LE.to_vec();
        data.extend_from_slice(IDB_TSRESOL_LE);
        data.extend_from_slice(SHB_BE);
        // big-endian IDB, linktype RAW, no options
        data.extend_from_slice(&hex!(
            "00 00 00 01 00 00 00 14 00 65 00 00 00 00 ff ff 00 00 00 14"
        ));
        let len = IPV4_UDP_RTP.len() as u32;
        let pad = (4 - IPV4_UDP_RTP.len() % 4) % 4;
        let total = 32 + len + pad as u32;
        data.extend_from_slice(&EPB_MAGIC.to_be_bytes());
        data.extend_from_slice(&total.to_be_bytes());
        for field in [0u32, 0, 1_500_000, len, len].iter() {
            data.extend_from_slice(&field.to_be_bytes());
        }
        data.extend_from_slice(IPV4_UDP_RTP);
        data.resize(data.len() + pad, 0);
        data.extend_from_slice(&total.to_be_bytes());

        let mut reader = CaptureReader::new(Cursor::new(data), ReaderOptions::default())
            .expect("reader");
        assert!(!reader.descriptor().big_endian);
        assert_eq!(
            reader.read_record(&ReadContext::packet(1)).expect("read"),
            Some(ReadItem::Skipped(BlockKind::SectionHeader))
        );
        assert!(reader.descriptor().big_endian);
        let p = reader
            .next_packet(&ReadContext::packet(1))
            .expect("read")
            .expect("packet");
        assert_eq!(p.block, BlockKind::EnhancedPacket);
        assert_eq!(p.data, IPV4_UDP_RTP);
        // the new interface uses the default microsecond resolution
        assert_eq!((p.header.ts_sec, p.header.ts_usec), (1, 500_000));
        assert_eq!(reader.read_record(&ReadContext::packet(2)).expect("read"), None);
        assert_eq!(reader.stats().section_headers, 1);
        assert_eq!(reader.stats().packets, 1);
    }

    #[test]
    fn test_rtpdump_length_warning() {
        let mut data = header_10_0_0_5();
        // plen 20 but only 12 RTP bytes, 1.5s after start
        let rtp = &IPV4_UDP_RTP[28..40];
        let rec = RtpDumpRecord {
            length: 20,
            plen: 20,
            offset_ms: 1500,
            data: rtp,
        };
        data.extend(rec.to_vec().expect("record"));
        let mut reader = CaptureReader::new(Cursor::new(data), ReaderOptions::default())
            .expect("reader");
        assert_eq!(reader.descriptor().kind, ContainerKind::RtpDump);
        let p = reader
            .next_packet(&ReadContext::default())
            .expect("read")
            .expect("packet");
        assert_eq!(p.data.len(), 12 + 28);
        assert_eq!(p.header.ts_sec, 0x5f5e_1000 + 1);
        assert_eq!(p.header.ts_usec, 500_016);
        assert_eq!(reader.stats().rtpdump_length_warnings, 1);
    }

    #[test]
    fn test_unknown_format() {
        let data = b"not a capture".to_vec();
        let r = CaptureReader::new(Cursor::new(data), ReaderOptions::default());
        assert!(matches!(r, Err(CaptureError::UnknownFormat(_))));
    }
}
