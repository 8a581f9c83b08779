//! ICMP echo messages
//!
//! Only the echo pair is handled: the self-search probe sends a request and
//! waits for the reply carrying the same identifier and sequence number.

use byteorder::{BigEndian, ByteOrder};

use crate::network::checksum;

pub const ICMP_HEADER_LEN: usize = 8;

pub const ICMP_TYPE_ECHO_REPLY: u8 = 0;
pub const ICMP_TYPE_ECHO_REQUEST: u8 = 8;

/// Echo request or reply header (RFC 792)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpHeader {
    pub kind: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
}

impl IcmpHeader {
    pub fn echo_request(identifier: u16, sequence: u16) -> Self {
        IcmpHeader {
            kind: ICMP_TYPE_ECHO_REQUEST,
            code: 0,
            checksum: 0,
            identifier,
            sequence,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let header = data.get(..ICMP_HEADER_LEN)?;
        Some(IcmpHeader {
            kind: header[0],
            code: header[1],
            checksum: BigEndian::read_u16(&header[2..]),
            identifier: BigEndian::read_u16(&header[4..]),
            sequence: BigEndian::read_u16(&header[6..]),
        })
    }

    /// Write the header into the first eight bytes of `out`.
    fn write(&self, out: &mut [u8]) {
        out[0] = self.kind;
        out[1] = self.code;
        BigEndian::write_u16(&mut out[2..4], self.checksum);
        BigEndian::write_u16(&mut out[4..6], self.identifier);
        BigEndian::write_u16(&mut out[6..8], self.sequence);
    }

    /// Reply to the request identified by `identifier` and `sequence`
    pub fn answers(&self, identifier: u16, sequence: u16) -> bool {
        self.kind == ICMP_TYPE_ECHO_REPLY && self.identifier == identifier && self.sequence == sequence
    }
}

/// Echo request of `total_len` bytes with a zero body, checksummed.
pub fn build_echo_request(identifier: u16, sequence: u16, total_len: usize) -> Vec<u8> {
    let mut message = vec![0u8; total_len.max(ICMP_HEADER_LEN)];
    let mut header = IcmpHeader::echo_request(identifier, sequence);
    header.write(&mut message);
    header.checksum = checksum(&message);
    header.write(&mut message);
    message
}

pub fn is_matching_reply(message: &[u8], identifier: u16, sequence: u16) -> bool {
    IcmpHeader::from_bytes(message).is_some_and(|header| header.answers(identifier, sequence))
}
