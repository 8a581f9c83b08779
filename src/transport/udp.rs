//! UDP datagram layout
//!
//! Outbound datagrams may use a header longer than the standard eight
//! bytes; the extra bytes are zero and count toward the length field.

use byteorder::{BigEndian, ByteOrder};

pub const UDP_HEADER_LEN: usize = 8;

/// Checksum value meaning "not computed" for UDP over IPv4
pub const UDP_CHECKSUM_UNUSED: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    /// Header plus payload in bytes
    pub length: u16,
    pub checksum: u16,
}

impl UdpHeader {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let fields = data.get(..UDP_HEADER_LEN)?;
        let mut words = [0u16; 4];
        BigEndian::read_u16_into(fields, &mut words);
        let [src_port, dst_port, length, checksum] = words;
        Some(UdpHeader {
            src_port,
            dst_port,
            length,
            checksum,
        })
    }

    pub fn to_bytes(&self) -> [u8; UDP_HEADER_LEN] {
        let mut bytes = [0u8; UDP_HEADER_LEN];
        BigEndian::write_u16_into(&[self.src_port, self.dst_port, self.length, self.checksum], &mut bytes);
        bytes
    }
}

/// Append a `header_len`-byte UDP header and `payload` to `out`.
///
/// The checksum field is written as given.
pub fn write_datagram(
    out: &mut Vec<u8>,
    header_len: usize,
    src_port: u16,
    dst_port: u16,
    checksum: u16,
    payload: &[u8],
) {
    let header = UdpHeader {
        src_port,
        dst_port,
        length: (header_len + payload.len()) as u16,
        checksum,
    };
    let start = out.len();
    out.extend_from_slice(&header.to_bytes());
    out.resize(start + header_len.max(UDP_HEADER_LEN), 0);
    out.extend_from_slice(payload);
}
