//! Raw transport over a physical Ethernet port
//!
//! Capture uses an `AF_PACKET` datagram socket bound to the port, so each
//! frame starts at the IPv4 header with the link header already removed.
//! Transmit uses a raw IPv4 socket (`IPPROTO_RAW` implies a caller-built
//! header) bound to the same port.

use std::ffi::CString;
use std::io::{self, Read};
use std::mem;
use std::net::SocketAddrV4;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::network::ipv4::read_addr;
use crate::platform::{timed_out_as_none, RawTransport};

const DEST_ADDR_OFFSET: usize = 16;

pub struct PacketSocket {
    capture: Socket,
    transmit: Socket,
}

impl PacketSocket {
    pub fn open(iface: &str) -> io::Result<Self> {
        let ifindex = interface_index(iface)?;
        let protocol = (libc::ETH_P_IP as u16).to_be();

        let capture = Socket::new(Domain::PACKET, Type::DGRAM, Some(Protocol::from(protocol as i32)))?;
        capture.bind(&link_layer_addr(ifindex, protocol))?;

        let transmit = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::from(libc::IPPROTO_RAW)))?;
        transmit.bind_device(Some(iface.as_bytes()))?;

        Ok(PacketSocket { capture, transmit })
    }
}

impl RawTransport for PacketSocket {
    fn send(&self, datagram: &[u8]) -> io::Result<usize> {
        let dst = read_addr(datagram, DEST_ADDR_OFFSET)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "datagram shorter than IPv4 header"))?;
        self.transmit.send_to(datagram, &SockAddr::from(SocketAddrV4::new(dst, 0)))
    }

    fn recv(&self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        self.capture.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        timed_out_as_none((&self.capture).read(buf))
    }

    fn raw_fd(&self) -> RawFd {
        self.capture.as_raw_fd()
    }
}

fn interface_index(iface: &str) -> io::Result<u32> {
    let name = CString::new(iface).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: `name` is a valid NUL-terminated string for the duration of the call.
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if index == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(index)
}

fn link_layer_addr(ifindex: u32, protocol: u16) -> SockAddr {
    // SAFETY: an all-zero sockaddr_storage is a valid value.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    // SAFETY: sockaddr_storage is large enough and suitably aligned for sockaddr_ll.
    let ll = unsafe { &mut *(&mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr_ll) };
    ll.sll_family = libc::AF_PACKET as u16;
    ll.sll_protocol = protocol;
    ll.sll_ifindex = ifindex as i32;
    // SAFETY: the storage holds an initialized sockaddr_ll of the given length.
    unsafe { SockAddr::new(storage, mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t) }
}
