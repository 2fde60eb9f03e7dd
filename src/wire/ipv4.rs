use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, IpProtocol as Protocol, Result};

pub use core::net::Ipv4Addr as Address;

/// A read-only wrapper around an Internet Protocol version 4 packet buffer.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

mod field {
    use crate::wire::field::*;

    pub const VER_IHL: usize = 0;
    pub const LENGTH: Field = 2..4;
    pub const PROTOCOL: usize = 9;
    pub const SRC_ADDR: Field = 12..16;
    pub const DST_ADDR: Field = 16..20;
}

/// Length of an IPv4 header without options.
pub const HEADER_LEN: usize = field::DST_ADDR.end;

impl<T: AsRef<[u8]>> Packet<T> {
    /// Imbue a raw octet buffer with IPv4 packet structure.
    pub const fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    /// Shorthand for a combination of [new_unchecked] and [check_len].
    ///
    /// [new_unchecked]: #method.new_unchecked
    /// [check_len]: #method.check_len
    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Self::new_unchecked(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    /// Ensure that no accessor method will panic if called.
    /// Returns `Err(Error)` if the buffer is too short, or if the header
    /// length fields are inconsistent with each other.
    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < HEADER_LEN {
            Err(Error)
        } else if (self.header_len() as usize) < HEADER_LEN {
            Err(Error)
        } else if self.header_len() as u16 > self.total_len() {
            Err(Error)
        } else if len < self.total_len() as usize {
            Err(Error)
        } else {
            Ok(())
        }
    }

    /// Consume the packet, returning the underlying buffer.
    pub fn into_inner(self) -> T {
        self.buffer
    }

    /// Return the version field.
    pub fn version(&self) -> u8 {
        let data = self.buffer.as_ref();
        data[field::VER_IHL] >> 4
    }

    /// Return the header length, in octets.
    pub fn header_len(&self) -> u8 {
        let data = self.buffer.as_ref();
        (data[field::VER_IHL] & 0x0f) * 4
    }

    /// Return the total length field.
    pub fn total_len(&self) -> u16 {
        let data = self.buffer.as_ref();
        NetworkEndian::read_u16(&data[field::LENGTH])
    }

    /// Return the next_header (protocol) field.
    pub fn next_header(&self) -> Protocol {
        let data = self.buffer.as_ref();
        Protocol::from(data[field::PROTOCOL])
    }

    /// Return the source address field.
    pub fn src_addr(&self) -> Address {
        let data = self.buffer.as_ref();
        Address::from(NetworkEndian::read_u32(&data[field::SRC_ADDR]))
    }

    /// Return the destination address field.
    pub fn dst_addr(&self) -> Address {
        let data = self.buffer.as_ref();
        Address::from(NetworkEndian::read_u32(&data[field::DST_ADDR]))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a minimal IPv4 header followed by `payload`.
    pub(crate) fn datagram(protocol: Protocol, payload: &[u8]) -> Vec<u8> {
        let total = HEADER_LEN + payload.len();
        let mut bytes = vec![0u8; total];
        bytes[field::VER_IHL] = 0x45;
        NetworkEndian::write_u16(&mut bytes[field::LENGTH], total as u16);
        bytes[field::PROTOCOL] = protocol.into();
        bytes[field::SRC_ADDR].copy_from_slice(&[192, 168, 69, 100]);
        bytes[field::DST_ADDR].copy_from_slice(&[192, 168, 69, 1]);
        bytes[HEADER_LEN..].copy_from_slice(payload);
        bytes
    }

    #[test]
    fn test_deconstruct() {
        let bytes = datagram(Protocol::Icmp, &[0xaa; 4]);
        let packet = Packet::new_checked(&bytes[..]).unwrap();
        assert_eq!(packet.version(), 4);
        assert_eq!(packet.header_len(), 20);
        assert_eq!(packet.total_len(), 24);
        assert_eq!(packet.next_header(), Protocol::Icmp);
        assert_eq!(packet.src_addr(), Address::new(192, 168, 69, 100));
        assert_eq!(packet.dst_addr(), Address::new(192, 168, 69, 1));
    }

    #[test]
    fn test_check_len() {
        let bytes = datagram(Protocol::Udp, &[0; 8]);
        assert_eq!(Packet::new_checked(&bytes[..10]), Err(Error));
        // total length claims more than the buffer holds
        assert_eq!(Packet::new_checked(&bytes[..24]), Err(Error));

        let mut short_ihl = bytes.clone();
        short_ihl[field::VER_IHL] = 0x44;
        assert_eq!(Packet::new_checked(&short_ihl[..]), Err(Error));
    }
}
