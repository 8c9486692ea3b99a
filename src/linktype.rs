use rusticata_macros::newtype_enum;

/// Data link type of a capture file or pcapng interface
///
/// See <http://www.tcpdump.org/linktypes.html>
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Linktype(pub i32);

newtype_enum! {
impl display Linktype {
    // BSD loopback, 4-byte address family in host byte order
    NULL = 0,
    ETHERNET = 1,

    RAW = 101,

    // OpenBSD loopback, 4-byte address family in network byte order
    LOOP = 108,
    LINUX_SLL = 113,

    IPV4 = 228,
    IPV6 = 229,
}
}

/// Size of an Ethernet II header without VLAN tags
pub const ETHERNET_HEADER_LEN: usize = 14;
/// Size of the Linux "cooked capture" pseudo-header
pub const SLL_HEADER_LEN: usize = 16;
/// Size of the loopback address-family prefix
pub const NULL_HEADER_LEN: usize = 4;

impl Linktype {
    /// Nominal link header length, before VLAN tags are taken into account
    ///
    /// Returns `None` for link types this crate does not normalize.
    pub fn link_header_len(self) -> Option<usize> {
        match self {
            Linktype::ETHERNET => Some(ETHERNET_HEADER_LEN),
            Linktype::LINUX_SLL => Some(SLL_HEADER_LEN),
            Linktype::NULL | Linktype::LOOP => Some(NULL_HEADER_LEN),
            Linktype::RAW | Linktype::IPV4 | Linktype::IPV6 => Some(0),
            _ => None,
        }
    }

    #[inline]
    pub fn is_supported(self) -> bool {
        self.link_header_len().is_some()
    }
}
