//! IPv4 header codec
//!
//! The gateway writes IPv4 headers for the datagrams it assembles and reads
//! them back when matching echo replies. Options are never emitted; a
//! configured header longer than 20 bytes is zero-padded by the caller.
//!
//! Features:
//! - Header parsing with version and IHL validation
//! - Serialization in network byte order
//! - Checksum sealing with a configurable seed
//! - Address extraction at arbitrary frame offsets

use std::io::Read;
use std::net::Ipv4Addr;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};

use crate::network::checksum;

pub const IPV4_HEADER_LEN: usize = 20;
pub const IPV4_VERSION: u8 = 4;
/// Header length in 32-bit words without options
pub const MIN_IHL: u8 = 5;
pub const DEFAULT_TTL: u8 = 64;

const CHECKSUM_RANGE: std::ops::Range<usize> = 10..12;

/// Fixed part of an IPv4 header (RFC 791)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub version: u8,
    /// Header length in 32-bit words
    pub ihl: u8,
    pub tos: u8,
    pub total_len: u16,
    pub id: u16,
    /// Flags in the top three bits, fragment offset below
    pub flags_fragment: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
}

impl Ipv4Header {
    /// Unfragmented UDP header with default TTL and an unsealed checksum.
    pub fn udp(src_addr: Ipv4Addr, dst_addr: Ipv4Addr, total_len: u16, id: u16) -> Self {
        Ipv4Header {
            version: IPV4_VERSION,
            ihl: MIN_IHL,
            tos: 0,
            total_len,
            id,
            flags_fragment: 0,
            ttl: DEFAULT_TTL,
            protocol: protocol::UDP,
            checksum: 0,
            src_addr,
            dst_addr,
        }
    }

    /// Parse the fixed header at the start of `data`.
    ///
    /// `None` for short input, a version other than 4, or an IHL below 5.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let mut fixed = data.get(..IPV4_HEADER_LEN)?;
        let version_ihl = fixed.read_u8().ok()?;
        let (version, ihl) = (version_ihl >> 4, version_ihl & 0x0F);
        if version != IPV4_VERSION || ihl < MIN_IHL {
            return None;
        }

        let tos = fixed.read_u8().ok()?;
        let total_len = fixed.read_u16::<BigEndian>().ok()?;
        let id = fixed.read_u16::<BigEndian>().ok()?;
        let flags_fragment = fixed.read_u16::<BigEndian>().ok()?;
        let ttl = fixed.read_u8().ok()?;
        let protocol = fixed.read_u8().ok()?;
        let checksum = fixed.read_u16::<BigEndian>().ok()?;
        let mut addrs = [0u8; 8];
        fixed.read_exact(&mut addrs).ok()?;

        Some(Ipv4Header {
            version,
            ihl,
            tos,
            total_len,
            id,
            flags_fragment,
            ttl,
            protocol,
            checksum,
            src_addr: Ipv4Addr::new(addrs[0], addrs[1], addrs[2], addrs[3]),
            dst_addr: Ipv4Addr::new(addrs[4], addrs[5], addrs[6], addrs[7]),
        })
    }

    /// Serialize the fixed header in network byte order
    pub fn to_bytes(&self) -> [u8; IPV4_HEADER_LEN] {
        let mut out = [0u8; IPV4_HEADER_LEN];
        out[0] = (self.version << 4) | (self.ihl & 0x0F);
        out[1] = self.tos;
        BigEndian::write_u16(&mut out[2..4], self.total_len);
        BigEndian::write_u16(&mut out[4..6], self.id);
        BigEndian::write_u16(&mut out[6..8], self.flags_fragment);
        out[8] = self.ttl;
        out[9] = self.protocol;
        BigEndian::write_u16(&mut out[CHECKSUM_RANGE], self.checksum);
        out[12..16].copy_from_slice(&self.src_addr.octets());
        out[16..20].copy_from_slice(&self.dst_addr.octets());
        out
    }

    /// Compute the checksum with `seed` standing in the checksum field.
    ///
    /// A zero seed gives the standard Internet checksum, which then verifies
    /// to all ones over the sealed header.
    pub fn seal(&mut self, seed: u16) {
        self.checksum = seed;
        self.checksum = checksum(&self.to_bytes());
    }

    /// Header length in bytes as declared by the IHL field
    pub fn header_len(&self) -> usize {
        usize::from(self.ihl) * 4
    }
}

/// Read a 32-bit address stored in network order at `offset`.
pub fn read_addr(data: &[u8], offset: usize) -> Option<Ipv4Addr> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(Ipv4Addr::from(BigEndian::read_u32(bytes)))
}

/// Protocol numbers the gateway deals with
pub mod protocol {
    pub const UDP: u8 = 17;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::verify_checksum;

    const DONT_FRAGMENT: u16 = 0x4000;

    fn sample() -> Ipv4Header {
        Ipv4Header {
            flags_fragment: DONT_FRAGMENT,
            ..Ipv4Header::udp(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 9), 48, 7)
        }
    }

    #[test]
    fn test_serialized_layout() {
        let mut header = sample();
        header.seal(0);
        let bytes = header.to_bytes();

        assert_eq!(bytes[0], 0x45);
        assert_eq!(&bytes[2..4], &[0, 48]);
        assert_eq!(&bytes[4..6], &[0, 7]);
        assert_eq!(&bytes[6..8], &[0x40, 0x00]);
        assert_eq!(bytes[8], DEFAULT_TTL);
        assert_eq!(bytes[9], protocol::UDP);
        assert_eq!(&bytes[12..16], &[10, 0, 0, 2]);
        assert_eq!(&bytes[16..20], &[10, 0, 0, 9]);
        assert!(verify_checksum(&bytes));
    }

    #[test]
    fn test_seeded_checksum_differs() {
        let mut zero = sample();
        zero.seal(0);
        let mut seeded = sample();
        seeded.seal(0x1234);
        assert_ne!(zero.checksum, seeded.checksum);
        assert!(!verify_checksum(&seeded.to_bytes()));
    }

    #[test]
    fn test_parse_serialized_header() {
        let mut header = sample();
        header.seal(0);
        let parsed = Ipv4Header::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.header_len(), 20);
    }

    #[test]
    fn test_rejects_short_non_v4_and_bad_ihl() {
        assert!(Ipv4Header::from_bytes(&[0x45; 19]).is_none());
        let mut bytes = sample().to_bytes();
        bytes[0] = 0x65;
        assert!(Ipv4Header::from_bytes(&bytes).is_none());
        bytes[0] = 0x44;
        assert!(Ipv4Header::from_bytes(&bytes).is_none());
    }

    #[test]
    fn test_read_addr_bounds() {
        let frame = [0u8, 192, 168, 1, 7];
        assert_eq!(read_addr(&frame, 1), Some(Ipv4Addr::new(192, 168, 1, 7)));
        assert_eq!(read_addr(&frame, 2), None);
        assert_eq!(read_addr(&frame, usize::MAX), None);
    }
}
