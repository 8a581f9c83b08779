//! TUN device transport
//!
//! Lab rigs substitute a TUN device for a physical port. Without packet
//! information the device exchanges bare IPv4 datagrams, the same framing the
//! packet socket delivers.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use tun_tap::{Iface, Mode};

use crate::platform::{timed_out_as_none, RawTransport};

pub struct TunTransport {
    iface: Iface,
}

impl TunTransport {
    pub fn open(name: &str) -> io::Result<Self> {
        let iface = Iface::without_packet_info(name, Mode::Tun)?;
        Ok(TunTransport { iface })
    }
}

impl RawTransport for TunTransport {
    fn send(&self, datagram: &[u8]) -> io::Result<usize> {
        self.iface.send(datagram)
    }

    fn recv(&self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        if !wait_readable(self.iface.as_raw_fd(), timeout)? {
            return Ok(None);
        }
        timed_out_as_none(self.iface.recv(buf))
    }

    fn raw_fd(&self) -> RawFd {
        self.iface.as_raw_fd()
    }
}

/// Block until `fd` is readable or `timeout` passes.
fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
    // SAFETY: `pollfd` is a valid pollfd for the duration of the call.
    let ready = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    if ready < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(ready > 0 && pollfd.revents & libc::POLLIN != 0)
}
