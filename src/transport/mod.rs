//! Transport layer protocols
//!
//! - UDP: the only transport the gateway emits

pub mod udp;

pub use udp::{UdpHeader, UDP_CHECKSUM_UNUSED, UDP_HEADER_LEN};
