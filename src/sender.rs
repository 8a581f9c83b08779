//! Packet assembler and sender
//!
//! Turns a role-tagged payload into a complete IPv4 + UDP datagram and
//! transmits it on the interface holding that role.
//!
//! Features:
//! - Destination resolved from the role selector carried in the payload
//! - IPv4 header with per-sender wrapping identification counter
//! - Header checksum over the configured header length
//! - UDP checksum left at the configured "unused" value
//!
//! Failures drop the payload with a log entry; nothing is retried here.

use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{trace, warn};

use crate::config::SenderConfig;
use crate::iface::{NetworkInterface, Role, RoleSelector, RoleTable};
use crate::network::Ipv4Header;
use crate::pipeline::Message;
use crate::queue::BoundedQueue;
use crate::transport::udp;

/// Reasons a payload was not transmitted.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("payload of {len} bytes is shorter than the {min} byte packet header")]
    ShortPayload { len: usize, min: usize },

    #[error("role selector could not be decoded")]
    NoSelector,

    #[error("no interface holds role {0}")]
    Unresolved(Role),

    #[error("{iface} has no self or destination address")]
    Unaddressed { iface: String },

    #[error("{iface} has no usable transport")]
    NoTransport { iface: String },

    #[error("datagram of {len} bytes exceeds the IPv4 total length field")]
    Oversized { len: usize },

    #[error("transmit on {iface} failed: {source}")]
    Transmit {
        iface: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Default)]
pub struct SenderStats {
    pub sent: AtomicU64,
    pub dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderSnapshot {
    pub sent: u64,
    pub dropped: u64,
}

impl SenderStats {
    pub fn snapshot(&self) -> SenderSnapshot {
        SenderSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Builds datagrams from the configured header constants.
#[derive(Debug, Clone)]
pub struct Assembler {
    config: SenderConfig,
}

impl Assembler {
    pub fn new(config: SenderConfig) -> Self {
        Assembler { config }
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Lay out IPv4 header, UDP header and payload contiguously.
    pub fn assemble(
        &self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        id: u16,
        payload: &[u8],
    ) -> Result<Vec<u8>, SendError> {
        let config = &self.config;
        let total = config.ipv4_header_size + config.udp_header_size + payload.len();
        let total_len = u16::try_from(total).map_err(|_| SendError::Oversized { len: total })?;

        let mut header = Ipv4Header {
            version: config.ip_version,
            ihl: config.ihl,
            tos: config.default_tos,
            flags_fragment: config.flags_fragment,
            ttl: config.default_ttl,
            protocol: config.protocol,
            ..Ipv4Header::udp(src, dst, total_len, id)
        };
        // Options past the fixed header are zero, so they add nothing to the sum.
        header.seal(config.initial_ip_checksum);

        let mut datagram = Vec::with_capacity(total);
        datagram.extend_from_slice(&header.to_bytes());
        datagram.resize(config.ipv4_header_size, 0);
        udp::write_datagram(
            &mut datagram,
            config.udp_header_size,
            src_port,
            dst_port,
            config.udp_checksum,
            payload,
        );
        Ok(datagram)
    }
}

pub struct Sender {
    assembler: Assembler,
    selector: RoleSelector,
    table: Arc<RoleTable>,
    next_id: u16,
    stats: Arc<SenderStats>,
}

impl Sender {
    pub fn new(config: SenderConfig, table: Arc<RoleTable>) -> Self {
        Sender {
            selector: config.role_selector(),
            assembler: Assembler::new(config),
            table,
            next_id: 0,
            stats: Arc::new(SenderStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<SenderStats> {
        Arc::clone(&self.stats)
    }

    /// Resolve, assemble and transmit one payload. Returns the role it went to.
    pub fn send(&mut self, payload: &[u8]) -> Result<Role, SendError> {
        let min = self.assembler.config().packet_header_size;
        if payload.len() < min {
            return Err(SendError::ShortPayload { len: payload.len(), min });
        }
        let role = self.selector.decode(payload).ok_or(SendError::NoSelector)?;
        let endpoint = self.table.lookup(role).ok_or(SendError::Unresolved(role))?;
        let iface = &endpoint.iface;

        let transport = endpoint
            .transport()
            .filter(|transport| transport.raw_fd() != self.assembler.config().invalid_socket)
            .ok_or_else(|| SendError::NoTransport {
                iface: iface.name.clone(),
            })?;
        let (src, dst) = addresses(iface)?;

        let id = self.next_id;
        let datagram = self.assembler.assemble(
            src,
            dst,
            iface.addressing.src_port,
            iface.addressing.dst_port,
            id,
            payload,
        )?;
        self.next_id = self.next_id.wrapping_add(1);

        transport.send(&datagram).map_err(|source| SendError::Transmit {
            iface: iface.name.clone(),
            source,
        })?;
        trace!(iface = %iface.name, %role, id, len = datagram.len(), "datagram sent");
        Ok(role)
    }

    /// Send payloads until the stop sentinel arrives.
    pub fn run(&mut self, input: &BoundedQueue<Message>) {
        loop {
            match input.dequeue() {
                Message::Frame(payload) => match self.send(&payload) {
                    Ok(_) => {
                        self.stats.sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %e, "payload dropped");
                    }
                },
                Message::Stop => return,
            }
        }
    }
}

fn addresses(iface: &NetworkInterface) -> Result<(Ipv4Addr, Ipv4Addr), SendError> {
    match (iface.self_addr(), iface.dest_addr()) {
        (Some(src), Some(dst)) => Ok((src, dst)),
        _ => Err(SendError::Unaddressed {
            iface: iface.name.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::Addressing;
    use crate::network::verify_checksum;
    use crate::platform::RawTransport;
    use crate::transport::UdpHeader;
    use parking_lot::Mutex;
    use std::os::fd::RawFd;
    use std::time::Duration;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<Vec<u8>>>,
        fail: bool,
        fd: RawFd,
    }

    impl RawTransport for Recording {
        fn send(&self, datagram: &[u8]) -> io::Result<usize> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::Other, "link down"));
            }
            self.sent.lock().push(datagram.to_vec());
            Ok(datagram.len())
        }

        fn recv(&self, _buf: &mut [u8], _timeout: Duration) -> io::Result<Option<usize>> {
            Ok(None)
        }

        fn raw_fd(&self) -> RawFd {
            self.fd
        }
    }

    fn interface(name: &str, role: Role, last: u8, ports: (u16, u16)) -> NetworkInterface {
        let mut iface = NetworkInterface::new(name);
        iface.assign(
            Addressing {
                self_addr: Some(Ipv4Addr::new(10, 0, 0, last)),
                dest_addr: Some(Ipv4Addr::new(10, 0, 0, 9)),
                src_port: ports.0,
                dst_port: ports.1,
                ..Addressing::default()
            },
            role,
        );
        iface
    }

    fn tagged(role: Role, body: &[u8]) -> Vec<u8> {
        let mut payload = vec![0u8; 8];
        payload.extend_from_slice(body);
        assert!(RoleSelector::default().encode(&mut payload, role));
        payload
    }

    fn sender_with(transport: Arc<Recording>) -> Sender {
        let mut table = RoleTable::build(vec![
            interface("eth1", Role::Source1, 1, (4000, 4001)),
            interface("eth2", Role::Source2, 2, (5000, 6000)),
        ])
        .unwrap();
        assert!(table.attach(Role::Source2, transport));
        Sender::new(SenderConfig::default(), Arc::new(table))
    }

    #[test]
    fn test_end_to_end_source2_datagram() {
        let transport = Arc::new(Recording::default());
        let mut sender = sender_with(Arc::clone(&transport));
        let payload = tagged(Role::Source2, b"hello gateway");

        assert_eq!(sender.send(&payload).unwrap(), Role::Source2);

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        let datagram = &sent[0];
        let ip = Ipv4Header::from_bytes(datagram).unwrap();
        assert_eq!(ip.src_addr, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(ip.dst_addr, Ipv4Addr::new(10, 0, 0, 9));
        assert_eq!(ip.protocol, crate::network::protocol::UDP);
        assert_eq!(ip.total_len as usize, 20 + 8 + payload.len());
        assert_eq!(ip.ttl, 64);
        assert!(verify_checksum(&datagram[..20]));

        let udp = UdpHeader::from_bytes(&datagram[20..]).unwrap();
        assert_eq!(udp.src_port, 5000);
        assert_eq!(udp.dst_port, 6000);
        assert_eq!(udp.length as usize, 8 + payload.len());
        assert_eq!(udp.checksum, 0);
        assert_eq!(&datagram[28..], payload.as_slice());
    }

    #[test]
    fn test_identification_increments_and_wraps() {
        let transport = Arc::new(Recording::default());
        let mut sender = sender_with(Arc::clone(&transport));
        sender.next_id = u16::MAX;
        let payload = tagged(Role::Source2, b"x");

        sender.send(&payload).unwrap();
        sender.send(&payload).unwrap();
        sender.send(&payload).unwrap();

        let ids: Vec<u16> = transport
            .sent
            .lock()
            .iter()
            .map(|datagram| Ipv4Header::from_bytes(datagram).unwrap().id)
            .collect();
        assert_eq!(ids, vec![u16::MAX, 0, 1]);
    }

    #[test]
    fn test_unresolvable_payloads_are_dropped() {
        let transport = Arc::new(Recording::default());
        let mut sender = sender_with(Arc::clone(&transport));

        assert!(matches!(
            sender.send(&[0u8; 7]),
            Err(SendError::ShortPayload { len: 7, min: 8 })
        ));
        assert!(matches!(
            sender.send(&tagged(Role::Tunnel, b"")),
            Err(SendError::Unresolved(Role::Tunnel))
        ));
        // Source1 is mapped but has no transport attached.
        assert!(matches!(
            sender.send(&tagged(Role::Source1, b"")),
            Err(SendError::NoTransport { .. })
        ));
        assert!(transport.sent.lock().is_empty());
    }

    #[test]
    fn test_invalid_socket_is_not_used() {
        let transport = Arc::new(Recording {
            fd: -1,
            ..Recording::default()
        });
        let mut sender = sender_with(Arc::clone(&transport));
        assert!(matches!(
            sender.send(&tagged(Role::Source2, b"")),
            Err(SendError::NoTransport { .. })
        ));
    }

    #[test]
    fn test_run_counts_and_survives_transmit_failure() {
        let transport = Arc::new(Recording {
            fail: true,
            ..Recording::default()
        });
        let mut sender = sender_with(transport);
        let input = BoundedQueue::new(4);
        input.enqueue(Message::Frame(tagged(Role::Source2, b"a")));
        input.enqueue(Message::Frame(vec![1, 2]));
        input.enqueue(Message::Stop);

        sender.run(&input);

        assert_eq!(sender.stats().snapshot(), SenderSnapshot { sent: 0, dropped: 2 });
    }

    #[test]
    fn test_assembler_pads_configured_headers() {
        let config = SenderConfig {
            ihl: 6,
            ipv4_header_size: 24,
            udp_header_size: 12,
            initial_ip_checksum: 0,
            ..SenderConfig::default()
        };
        let assembler = Assembler::new(config);
        let datagram = assembler
            .assemble(Ipv4Addr::new(1, 2, 3, 4), Ipv4Addr::new(5, 6, 7, 8), 1, 2, 7, b"abc")
            .unwrap();

        assert_eq!(datagram.len(), 24 + 12 + 3);
        assert_eq!(datagram[0], 0x46);
        assert!(verify_checksum(&datagram[..24]));
        let udp = UdpHeader::from_bytes(&datagram[24..]).unwrap();
        assert_eq!(udp.length, 15);
        assert_eq!(&datagram[36..], b"abc");
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let assembler = Assembler::new(SenderConfig::default());
        let payload = vec![0u8; 65_536];
        assert!(matches!(
            assembler.assemble(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST, 1, 2, 0, &payload),
            Err(SendError::Oversized { .. })
        ));
    }
}
