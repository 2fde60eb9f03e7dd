/*! Low-level packet access.

The `wire` module only deals with what the raw receive path needs from an
inbound datagram: a checked view of its IPv4 header, in the usual
`Packet<T: AsRef<[u8]>>` style where field ranges live in a private
`field` module and multi-byte fields are read in network byte order.
*/

use core::fmt;

mod ip;
mod ipv4;

pub use self::ip::Protocol as IpProtocol;
pub use self::ipv4::{
    Address as Ipv4Address, Packet as Ipv4Packet, HEADER_LEN as IPV4_HEADER_LEN,
};
#[cfg(test)]
pub(crate) use self::ipv4::tests::datagram as ipv4_datagram;

mod field {
    pub type Field = ::core::ops::Range<usize>;
}

/// Parsing a packet failed.
///
/// Either it is malformed, or it is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "wire::Error")
    }
}

impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
