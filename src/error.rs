use nom::error::{ErrorKind, ParseError};
use std::io;
use thiserror::Error;

/// Errors raised while opening, reading or writing capture files
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// First bytes match none of the known magic numbers
    #[error("unknown capture format (magic {0:#010x})")]
    UnknownFormat(u32),
    #[error("header not recognized")]
    HeaderNotRecognized,
    #[error("unsupported link type {0}")]
    UnsupportedLinktype(i32),

    /// Input ended inside a header or a record
    #[error("truncated {what}: expected {expected} bytes, got {got}")]
    Truncated {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("length mismatch in {what}: declared {declared}, actual {actual}")]
    LengthMismatch {
        what: &'static str,
        declared: usize,
        actual: usize,
    },
    #[error("invalid rtpdump header: {0}")]
    InvalidRtpDumpHeader(&'static str),

    #[error("serialization failed")]
    Serialize,

    #[error("parse error ({0:?})")]
    Nom(ErrorKind),
}

impl<I> ParseError<I> for CaptureError {
    fn from_error_kind(_input: I, kind: ErrorKind) -> Self {
        CaptureError::Nom(kind)
    }
    fn append(_input: I, kind: ErrorKind, _other: Self) -> Self {
        CaptureError::Nom(kind)
    }
}

impl From<cookie_factory::GenError> for CaptureError {
    fn from(e: cookie_factory::GenError) -> Self {
        match e {
            cookie_factory::GenError::IoError(e) => CaptureError::Io(e),
            _ => CaptureError::Serialize,
        }
    }
}

/// Errors raised by the fragment store
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FragmentError {
    /// Length fields could not be derived from the datagram
    #[error("malformed datagram")]
    Malformed,
    #[error("datagram is not a fragment")]
    NotFragment,
    /// A live fragment already has the same key
    #[error("duplicate fragment")]
    Duplicate,
    #[error("fragment set is incomplete")]
    Incomplete,
    #[error("no fragment with offset 0")]
    MissingFirst,
    #[error("output buffer too small: need {needed} bytes")]
    BufferTooSmall { needed: usize },
    /// Fragments overlap or run past the declared datagram end
    #[error("fragment chain inconsistent")]
    Inconsistent,
}

/// Errors raised by the stream sequence analyzer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnalyzeError {
    #[error("ingress has {ingress} stream groups, egress has {egress}")]
    GroupCountMismatch { ingress: usize, egress: usize },
    #[error("analysis aborted")]
    Aborted,
}
