//! Operating system collaborators
//!
//! The core only talks to the host through the traits below, so discovery,
//! routing and sending can be exercised with in-memory fakes. The concrete
//! Linux implementations live in the submodules:
//! - `ip_command`: interface addressing and flags via the `ip` tool
//! - `sysfs`: link carrier and traffic counters
//! - `ping`: ICMP echo reachability probe
//! - `packet_socket`: capture and raw IPv4 transmit on a physical port
//! - `tun`: TUN device transport for lab setups
//! - `rt`: real-time scheduling hint

pub mod ip_command;
pub mod packet_socket;
pub mod ping;
pub mod rt;
pub mod sysfs;
pub mod tun;

use std::io;
use std::net::Ipv4Addr;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::Result;
use crate::iface::{LinkFlags, NetworkInterface, TransportKind};

pub use ip_command::IpCommand;
pub use packet_socket::PacketSocket;
pub use ping::IcmpPinger;
pub use sysfs::SysfsLink;
pub use tun::TunTransport;

/// Physical link carrier query.
pub trait LinkStatus: Send + Sync {
    fn is_link_up(&self, iface: &str) -> bool;
}

/// Address, route and flag programming for a named interface.
pub trait InterfaceConfigurator: Send + Sync {
    /// Remove every IPv4 address from the interface.
    fn clear_addresses(&self, iface: &str) -> Result<()>;

    fn add_address(
        &self,
        iface: &str,
        addr: Ipv4Addr,
        prefix_len: u8,
        broadcast: Option<Ipv4Addr>,
    ) -> Result<()>;

    /// Add an address given in CIDR notation.
    fn add_cidr(&self, iface: &str, cidr: &str) -> Result<()>;

    fn set_default_gateway(&self, iface: &str, gateway: Ipv4Addr) -> Result<()>;

    /// Delete the default route that goes out of `iface`.
    fn remove_default_gateway(&self, iface: &str) -> Result<()>;

    /// Bring the link up and apply promiscuous, ARP and multicast flags.
    fn set_flags(&self, iface: &str, flags: &LinkFlags) -> Result<()>;

    fn set_mtu(&self, iface: &str, mtu: u32) -> Result<()>;
}

/// Single-shot reachability check.
pub trait Reachability: Send + Sync {
    /// Send one echo request out of `iface` and wait up to `wait` for the reply.
    fn probe(&self, iface: &str, target: Ipv4Addr, wait: Duration) -> bool;
}

/// Sleep source for retry loops.
pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Send/receive handle for one interface.
pub trait RawTransport: Send + Sync {
    /// Transmit a complete IPv4 datagram.
    fn send(&self, datagram: &[u8]) -> io::Result<usize>;

    /// Receive one frame, returning `None` when nothing arrived within `timeout`.
    fn recv(&self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>>;

    fn raw_fd(&self) -> RawFd;
}

/// Opens a transport for an interface.
pub trait TransportOpener: Send + Sync {
    fn open(&self, iface: &NetworkInterface) -> io::Result<Arc<dyn RawTransport>>;
}

/// Opens the transport named by the interface's configured kind.
pub struct SystemOpener;

impl TransportOpener for SystemOpener {
    fn open(&self, iface: &NetworkInterface) -> io::Result<Arc<dyn RawTransport>> {
        Ok(match iface.transport {
            TransportKind::Raw => Arc::new(PacketSocket::open(&iface.name)?),
            TransportKind::Tun => Arc::new(TunTransport::open(&iface.name)?),
        })
    }
}

/// Map a receive timeout to `Ok(None)`.
pub(crate) fn timed_out_as_none(result: io::Result<usize>) -> io::Result<Option<usize>> {
    match result {
        Ok(n) => Ok(Some(n)),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
            ) =>
        {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
