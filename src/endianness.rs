use nom::error::ParseError;
use nom::number::streaming::{be_u16, be_u32, le_u16, le_u32};
use nom::IResult;

/// Big-endian capture sections (swapped magic)
pub(crate) struct CaptureBE;
/// Little-endian capture sections
pub(crate) struct CaptureLE;

/// Byte order of a legacy pcap file or of one pcapng section
pub(crate) trait CaptureEndianness {
    const BIG_ENDIAN: bool;

    fn parse_u16<'a, E: ParseError<&'a [u8]>>(i: &'a [u8]) -> IResult<&'a [u8], u16, E>;
    fn parse_u32<'a, E: ParseError<&'a [u8]>>(i: &'a [u8]) -> IResult<&'a [u8], u32, E>;

    fn u16_from_bytes(i: [u8; 2]) -> u16;
    fn u32_from_bytes(i: [u8; 4]) -> u32;
}

impl CaptureEndianness for CaptureBE {
    const BIG_ENDIAN: bool = true;

    #[inline]
    fn parse_u16<'a, E: ParseError<&'a [u8]>>(i: &'a [u8]) -> IResult<&'a [u8], u16, E> {
        be_u16(i)
    }

    #[inline]
    fn parse_u32<'a, E: ParseError<&'a [u8]>>(i: &'a [u8]) -> IResult<&'a [u8], u32, E> {
        be_u32(i)
    }

    #[inline]
    fn u16_from_bytes(i: [u8; 2]) -> u16 {
        u16::from_be_bytes(i)
    }

    #[inline]
    fn u32_from_bytes(i: [u8; 4]) -> u32 {
        u32::from_be_bytes(i)
    }
}

impl CaptureEndianness for CaptureLE {
    const BIG_ENDIAN: bool = false;

    #[inline]
    fn parse_u16<'a, E: ParseError<&'a [u8]>>(i: &'a [u8]) -> IResult<&'a [u8], u16, E> {
        le_u16(i)
    }

    #[inline]
    fn parse_u32<'a, E: ParseError<&'a [u8]>>(i: &'a [u8]) -> IResult<&'a [u8], u32, E> {
        le_u32(i)
    }

    #[inline]
    fn u16_from_bytes(i: [u8; 2]) -> u16 {
        u16::from_le_bytes(i)
    }

    #[inline]
    fn u32_from_bytes(i: [u8; 4]) -> u32 {
        u32::from_le_bytes(i)
    }
}
