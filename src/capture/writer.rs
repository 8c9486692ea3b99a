use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use super::*;
use crate::wire::{parse_ipv4_header, parse_udp_header, IPPROTO_UDP};

/// RTCP packet types (SR, RR, SDES, BYE, APP, RTPFB, PSFB, XR) found in the second byte
const RTCP_PACKET_TYPES: std::ops::RangeInclusive<u8> = 200..=207;

/// Writer of capture files
///
/// The file header is written on creation, except for rtpdump output without a configured
/// [`RtpDumpHeader`], whose header is derived from the first record.
pub struct CaptureWriter<W>
where
    W: Write,
{
    descriptor: FormatDescriptor,
    writer: W,
    header_pending: bool,
    records: u64,
}

impl CaptureWriter<BufWriter<File>> {
    /// Create (or truncate) a capture file
    pub fn create<P: AsRef<Path>>(
        path: P,
        kind: ContainerKind,
        linktype: Linktype,
        options: WriterOptions,
    ) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| {
            warn!("{}: cannot create capture: {}", path.display(), e);
            CaptureError::Io(e)
        })?;
        Self::new(BufWriter::new(file), kind, linktype, options)
    }
}

impl<W> CaptureWriter<W>
where
    W: Write,
{
    pub fn new(
        mut writer: W,
        kind: ContainerKind,
        linktype: Linktype,
        options: WriterOptions,
    ) -> Result<Self, CaptureError> {
        let mut descriptor = FormatDescriptor::new(kind, linktype);
        descriptor.snaplen = options.snaplen;
        let mut header_pending = false;
        match kind {
            ContainerKind::LegacyPcap => {
                if !linktype.is_supported() {
                    return Err(CaptureError::UnsupportedLinktype(linktype.0));
                }
                writer.write_all(&PcapHeader::new(linktype, options.snaplen).to_vec()?)?;
            }
            ContainerKind::PcapNg => {
                if !linktype.is_supported() {
                    return Err(CaptureError::UnsupportedLinktype(linktype.0));
                }
                let idb = InterfaceDescription::new(linktype, options.snaplen);
                writer.write_all(&section_header_to_vec()?)?;
                writer.write_all(&interface_description_to_vec(&idb)?)?;
            }
            ContainerKind::RtpDump => {
                descriptor.set_linktype(Linktype::IPV4);
                match options.rtpdump {
                    Some(header) => {
                        writer.write_all(&header.to_vec()?)?;
                        descriptor.rtpdump = Some(header);
                    }
                    None => header_pending = true,
                }
            }
        }
        Ok(CaptureWriter {
            descriptor,
            writer,
            header_pending,
            records: 0,
        })
    }

    pub fn descriptor(&self) -> &FormatDescriptor {
        &self.descriptor
    }

    /// Number of records written so far
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Fill in the zero fields of a caller-supplied header
    ///
    /// A zero timestamp becomes the current time, a zero `caplen` the payload length and a
    /// zero `origlen` the captured length. Non-zero values are kept.
    fn complete_header(
        &self,
        header: &RecordHeader,
        payload: &[u8],
    ) -> Result<RecordHeader, CaptureError> {
        let mut h = *header;
        if h.ts_sec == 0 && h.ts_usec == 0 {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            h.ts_sec = now.as_secs() as u32;
            h.ts_usec = now.subsec_micros();
        }
        if h.caplen == 0 {
            h.caplen = payload.len() as u32;
        } else if h.caplen as usize > payload.len() {
            return Err(CaptureError::LengthMismatch {
                what: "record captured length",
                declared: h.caplen as usize,
                actual: payload.len(),
            });
        }
        if h.origlen == 0 {
            h.origlen = h.caplen;
        }
        Ok(h)
    }

    /// Write one record
    ///
    /// `payload` starts at the network layer. `link_template`, when given, is written as the
    /// link header; otherwise a placeholder Ethernet header is synthesized for Ethernet
    /// captures and nothing is written for other link types. Returns the number of bytes
    /// written.
    pub fn write_record(
        &mut self,
        header: &RecordHeader,
        payload: &[u8],
        link_template: Option<&[u8]>,
    ) -> Result<usize, CaptureError> {
        let header = self.complete_header(header, payload)?;
        let payload = &payload[..header.caplen as usize];
        let v = match self.descriptor.kind {
            ContainerKind::RtpDump => self.rtpdump_record(&header, payload)?,
            kind => {
                let link: Cow<[u8]> = match link_template {
                    Some(template) => Cow::Borrowed(template),
                    None if self.descriptor.linktype == Linktype::ETHERNET => {
                        Cow::Owned(placeholder_ethernet(payload).to_vec())
                    }
                    None => Cow::Borrowed(&[]),
                };
                let mut frame = Vec::with_capacity(link.len() + payload.len());
                frame.extend_from_slice(&link);
                frame.extend_from_slice(payload);
                let origlen = header.origlen.saturating_add(link.len() as u32);
                if kind == ContainerKind::PcapNg {
                    enhanced_packet_to_vec(0, header.ts_sec, header.ts_usec, origlen, &frame)?
                } else {
                    let record = LegacyPcapRecord {
                        ts_sec: header.ts_sec,
                        ts_frac: header.ts_usec,
                        caplen: frame.len() as u32,
                        origlen,
                        data: &frame,
                    };
                    record.to_vec()?
                }
            }
        };
        self.writer.write_all(&v)?;
        self.records += 1;
        Ok(v.len())
    }

    /// Serialize an rtpdump record, writing the file header first if still pending
    fn rtpdump_record(
        &mut self,
        header: &RecordHeader,
        payload: &[u8],
    ) -> Result<Vec<u8>, CaptureError> {
        // keep only the RTP packet of IPv4/UDP datagrams
        let udp = parse_ipv4_header(payload)
            .ok()
            .filter(|(_, ip)| ip.protocol == IPPROTO_UDP)
            .and_then(|(rem, ip)| {
                parse_udp_header(rem)
                    .ok()
                    .map(|(rtp, udp)| (ip.src, ip.dst, udp.src_port, udp.dst_port, rtp))
            });
        let rtp = udp.map_or(payload, |u| u.4);
        if self.header_pending {
            let (src, dst, sport, dport) = match udp {
                Some((src, dst, sport, dport, _)) => (src, dst, sport, dport),
                None => (
                    Ipv4Addr::UNSPECIFIED,
                    PLACEHOLDER_DST_ADDR,
                    0,
                    PLACEHOLDER_DST_PORT,
                ),
            };
            let file_header = RtpDumpHeader {
                dst_addr: dst,
                dst_port: dport,
                start_sec: header.ts_sec,
                start_usec: header.ts_usec,
                src_addr: src,
                src_port: sport,
            };
            debug!(dst = %dst, port = dport, "rtpdump header derived from first record");
            self.writer.write_all(&file_header.to_vec()?)?;
            self.descriptor.rtpdump = Some(file_header);
            self.header_pending = false;
        }
        let length = rtp.len() + RTPDUMP_RECORD_HEADER_LEN;
        if length > usize::from(u16::MAX) {
            return Err(CaptureError::LengthMismatch {
                what: "rtpdump record",
                declared: length,
                actual: usize::from(u16::MAX),
            });
        }
        let (start_sec, start_usec) = self
            .descriptor
            .rtpdump
            .as_ref()
            .map_or((0, 0), |h| (h.start_sec, h.start_usec));
        let elapsed_us = (i64::from(header.ts_sec) - i64::from(start_sec)) * 1_000_000
            + (i64::from(header.ts_usec) - i64::from(start_usec));
        let offset_ms = (elapsed_us.max(0) / 1000).min(i64::from(u32::MAX)) as u32;
        let is_rtcp = rtp.len() > 1 && RTCP_PACKET_TYPES.contains(&rtp[1]);
        let record = RtpDumpRecord {
            length: length as u16,
            plen: if is_rtcp { 0 } else { rtp.len() as u16 },
            offset_ms,
            data: rtp,
        };
        record.to_vec()
    }

    /// Flush and return the underlying writer
    pub fn close(mut self) -> Result<W, CaptureError> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::tests::IPV4_UDP_RTP;
    use std::io::Cursor;

    fn read_back(v: Vec<u8>) -> (FormatDescriptor, Vec<PacketRecord>) {
        let mut reader =
            CaptureReader::new(Cursor::new(v), ReaderOptions::default()).expect("reader");
        let mut packets = Vec::new();
        while let Some(p) = reader.next_packet(&ReadContext::default()).expect("read") {
            packets.push(p);
        }
        (reader.descriptor().clone(), packets)
    }

    #[test]
    fn test_defaults_and_placeholder_ethernet() {
        let mut w = CaptureWriter::new(
            Vec::new(),
            ContainerKind::LegacyPcap,
            Linktype::ETHERNET,
            WriterOptions::default(),
        )
        .expect("writer");
        let n = w
            .write_record(&RecordHeader::default(), IPV4_UDP_RTP, None)
            .expect("write");
        assert_eq!(n, 16 + 14 + IPV4_UDP_RTP.len());
        let header = RecordHeader {
            ts_sec: 7,
            ts_usec: 9,
            caplen: 20,
            origlen: 0,
        };
        w.write_record(&header, IPV4_UDP_RTP, None).expect("write");
        let (desc, packets) = read_back(w.close().expect("close"));
        assert_eq!(desc.linktype, Linktype::ETHERNET);
        assert_eq!(packets.len(), 2);
        assert_ne!(packets[0].header.ts_sec, 0);
        assert_eq!(packets[0].data, IPV4_UDP_RTP);
        assert_eq!(packets[0].link_header.len(), 14);
        assert_eq!(packets[1].header.ts_sec, 7);
        assert_eq!(packets[1].data, &IPV4_UDP_RTP[..20]);
        assert_eq!(packets[1].header.origlen, 20);
    }

    #[test]
    fn test_caplen_beyond_payload() {
        let mut w = CaptureWriter::new(
            Vec::new(),
            ContainerKind::PcapNg,
            Linktype::RAW,
            WriterOptions::default(),
        )
        .expect("writer");
        let header = RecordHeader {
            caplen: 100,
            ..RecordHeader::default()
        };
        assert!(matches!(
            w.write_record(&header, IPV4_UDP_RTP, None),
            Err(CaptureError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_rtpdump_header_from_first_record() {
        let mut w = CaptureWriter::new(
            Vec::new(),
            ContainerKind::RtpDump,
            Linktype::RAW,
            WriterOptions::default(),
        )
        .expect("writer");
        let header = RecordHeader {
            ts_sec: 1000,
            ts_usec: 0,
            ..RecordHeader::default()
        };
        w.write_record(&header, IPV4_UDP_RTP, None).expect("write");
        let header = RecordHeader {
            ts_sec: 1000,
            ts_usec: 20_000,
            ..RecordHeader::default()
        };
        w.write_record(&header, IPV4_UDP_RTP, None).expect("write");
        let (desc, packets) = read_back(w.close().expect("close"));
        let file_header = desc.rtpdump.expect("rtpdump header");
        assert_eq!(file_header.dst_addr, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(file_header.dst_port, 5004);
        assert_eq!(file_header.src_port, 5000);
        assert_eq!(packets.len(), 2);
        // the synthesized envelope carries the same addressing
        assert_eq!(&packets[0].data[12..20], &IPV4_UDP_RTP[12..20]);
        assert_eq!(&packets[0].data[28..], &IPV4_UDP_RTP[28..]);
        assert_eq!(packets[1].header.ts_usec, 20_000);
    }
}
