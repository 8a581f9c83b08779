//! Network layer protocols
//!
//! This module contains the network layer codecs used by the gateway:
//! - IPv4: header construction for outbound datagrams and address extraction
//! - ICMP: echo request/reply used by the reachability probe

pub mod icmp;
pub mod ipv4;

// Re-export commonly used items
pub use icmp::{IcmpHeader, ICMP_TYPE_ECHO_REPLY, ICMP_TYPE_ECHO_REQUEST};
pub use ipv4::{protocol, Ipv4Header};

/// Sum data as big-endian 16-bit words with end-around carry folding.
///
/// Odd-length data is padded with a trailing zero byte.
pub fn ones_complement_sum(data: &[u8]) -> u16 {
    let mut sum = 0u32;

    for chunk in data.chunks_exact(2) {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }

    if data.len() % 2 != 0 {
        if let Some(&last_byte) = data.last() {
            sum += (last_byte as u32) << 8;
        }
    }

    while (sum >> 16) > 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    sum as u16
}

/// Calculate Internet checksum
///
/// One's complement of the folded 16-bit word sum. Used for the IPv4
/// header and ICMP messages.
pub fn checksum(data: &[u8]) -> u16 {
    !ones_complement_sum(data)
}

/// Check a block that already carries its checksum.
///
/// Holds when the folded sum, checksum included, is all ones.
pub fn verify_checksum(data: &[u8]) -> bool {
    ones_complement_sum(data) == 0xFFFF
}
