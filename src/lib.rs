//! # Capture diagnostics
//!
//! This crate reads and writes packet captures, reassembles fragmented IP datagrams and
//! analyzes RTP packet sequences for loss, duplication, reordering and timestamp drift.
//!
//! Three containers are supported: legacy pcap (both byte orders, micro- or nanosecond
//! timestamps), pcapng (multiple sections and interfaces) and rtpdump. Records are always
//! handed out starting at the network layer, whatever the link type of the capture.
//!
//! Data flows through the crate as follows:
//!
//! - [`capture`] produces [`PacketRecord`](capture::PacketRecord)s,
//! - [`filter`] discards traffic that is not media and packets captured twice,
//! - [`fragment`] completes fragmented datagrams,
//! - a [`FieldParser`](fields::FieldParser) decodes the protocol headers,
//! - [`analyzer`] groups the RTP packets by stream and counts what went wrong.
//!
//! [`pipeline`] chains all of these for one capture file.
//!
//! # Example: reading a capture
//!
//! ```rust
//! use capdiag::capture::{CaptureReader, ReadContext, ReaderOptions};
//! use capdiag::CaptureError;
//! use std::io::Cursor;
//!
//! fn count_packets(bytes: Vec<u8>) -> Result<u64, CaptureError> {
//!     let mut reader = CaptureReader::new(Cursor::new(bytes), ReaderOptions::default())?;
//!     let mut n = 0;
//!     while let Some(record) = reader.next_packet(&ReadContext::packet(n + 1))? {
//!         let h = record.header;
//!         println!("{} bytes at {}.{:06}", record.data.len(), h.ts_sec, h.ts_usec);
//!         n += 1;
//!     }
//!     Ok(n)
//! }
//! ```
//!
//! # Example: analyzing a capture
//!
//! ```rust,no_run
//! use capdiag::analyzer::{Analyzer, AnalyzerConfig};
//! use capdiag::fields::BasicFieldParser;
//! use capdiag::pipeline::{load_file, LoadOptions};
//!
//! let parser = BasicFieldParser::default();
//! let mut loaded =
//!     load_file("ingress.pcap", &parser, &LoadOptions::default(), None).expect("capture");
//! let report = Analyzer::new(AnalyzerConfig::default()).analyze(&mut loaded.entries, None);
//! println!("{}", report);
//! ```

mod abort;
mod endianness;
mod error;
mod linktype;
pub use abort::*;
pub use error::*;
pub use linktype::*;

pub mod analyzer;
pub mod capture;
pub mod fields;
pub mod filter;
pub mod fragment;
pub mod pipeline;
pub mod wire;
