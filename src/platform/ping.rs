//! ICMP echo reachability probe
//!
//! One echo request per probe over a raw ICMP socket bound to the interface
//! under test. Any socket error or a missing reply counts as unreachable.

use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, warn};

use crate::network::icmp::{build_echo_request, is_matching_reply};
use crate::network::Ipv4Header;
use crate::platform::{timed_out_as_none, Reachability};

const ECHO_SEQUENCE: u16 = 1;
const ECHO_MESSAGE_LEN: usize = 64;

pub struct IcmpPinger {
    identifier: u16,
}

impl Default for IcmpPinger {
    fn default() -> Self {
        IcmpPinger {
            identifier: std::process::id() as u16,
        }
    }
}

impl IcmpPinger {
    fn try_probe(&self, iface: &str, target: Ipv4Addr, wait: Duration) -> io::Result<bool> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
        socket.bind_device(Some(iface.as_bytes()))?;

        let request = build_echo_request(self.identifier, ECHO_SEQUENCE, ECHO_MESSAGE_LEN);
        let started = Instant::now();
        let deadline = started + wait;
        socket.send_to(&request, &SockAddr::from(SocketAddrV4::new(target, 0)))?;

        // Raw ICMP sockets see every ICMP message on the host; skip unrelated ones.
        let mut buf = [0u8; 1500];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            socket.set_read_timeout(Some(remaining))?;
            let Some(n) = timed_out_as_none((&socket).read(&mut buf))? else {
                return Ok(false);
            };

            let Some(ip) = Ipv4Header::from_bytes(&buf[..n]) else {
                continue;
            };
            if ip.src_addr != target || ip.header_len() > n {
                continue;
            }
            if is_matching_reply(&buf[ip.header_len()..n], self.identifier, ECHO_SEQUENCE) {
                debug!(iface, %target, rtt_ms = started.elapsed().as_millis() as u64, "echo reply");
                return Ok(true);
            }
        }
    }
}

impl Reachability for IcmpPinger {
    fn probe(&self, iface: &str, target: Ipv4Addr, wait: Duration) -> bool {
        debug!(iface, %target, "pinging");
        match self.try_probe(iface, target, wait) {
            Ok(reachable) => reachable,
            Err(e) => {
                warn!(iface, %target, error = %e, "ping failed");
                false
            }
        }
    }
}
