//! Packet classifier and router
//!
//! Every captured frame is sorted into exactly one downstream queue:
//! - GUI: tunnel traffic whose payload carries the GUI marker
//! - tunnel receive: other traffic from the tunnel peer
//! - process: everything else
//!
//! A frame is tunnel traffic when its source is the tunnel interface's
//! destination address and its destination is the tunnel interface's own
//! address. Both comparisons are exact. The GUI test only runs on tunnel
//! traffic.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, trace};

use crate::config::RouterConfig;
use crate::iface::RoleTable;
use crate::network::ipv4::read_addr;
use crate::pipeline::Message;
use crate::queue::BoundedQueue;

/// Downstream queue chosen for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Gui,
    TunnelReceive,
    Process,
}

/// Why a frame was not routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Shorter than the configured minimum packet size
    TooShort { len: usize },
    /// A configured header field lies beyond the end of the frame
    IncompleteHeader { len: usize },
}

/// Parsed header fields borrowing the frame they came from.
#[derive(Debug, Clone, Copy)]
pub struct PacketView<'a> {
    frame: &'a [u8],
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    payload_offset: usize,
}

impl<'a> PacketView<'a> {
    pub fn parse(frame: &'a [u8], config: &RouterConfig) -> Result<Self, DropReason> {
        let len = frame.len();
        if len < config.min_packet_size {
            return Err(DropReason::TooShort { len });
        }
        if len < config.ipv4_header_size || config.payload_offset > len {
            return Err(DropReason::IncompleteHeader { len });
        }
        let (Some(src), Some(dst)) = (
            read_addr(frame, config.src_ip_offset),
            read_addr(frame, config.dest_ip_offset),
        ) else {
            return Err(DropReason::IncompleteHeader { len });
        };

        Ok(PacketView {
            frame,
            src,
            dst,
            src_port: read_port(frame, config.src_port_offset),
            dst_port: read_port(frame, config.dest_port_offset),
            payload_offset: config.payload_offset,
        })
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.frame[self.payload_offset..]
    }

    /// Payload's first and second-to-last bytes both equal `marker`.
    pub fn has_gui_marker(&self, marker: u8) -> bool {
        let payload = self.payload();
        payload.len() >= 2 && payload[0] == marker && payload[payload.len() - 2] == marker
    }
}

fn read_port(frame: &[u8], offset: usize) -> Option<u16> {
    let bytes = frame.get(offset..offset.checked_add(2)?)?;
    Some(BigEndian::read_u16(bytes))
}

/// The tunnel link's expected peer addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelPeer {
    /// Address of the far end (the tunnel interface's destination)
    pub remote: Ipv4Addr,
    /// Address of the tunnel interface itself
    pub local: Ipv4Addr,
}

impl TunnelPeer {
    /// Peer of the tunnel interface in `table`, if it has both addresses.
    pub fn from_table(table: &RoleTable) -> Option<Self> {
        let tunnel = table.tunnel()?;
        Some(TunnelPeer {
            remote: tunnel.dest_addr()?,
            local: tunnel.self_addr()?,
        })
    }

    pub fn matches(&self, packet: &PacketView<'_>) -> bool {
        packet.src == self.remote && packet.dst == self.local
    }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    config: RouterConfig,
    tunnel: Option<TunnelPeer>,
    marker: u8,
}

impl Classifier {
    pub fn new(config: RouterConfig, tunnel: Option<TunnelPeer>) -> Self {
        let marker = config.gui_marker_byte();
        Classifier { config, tunnel, marker }
    }

    pub fn classify(&self, frame: &[u8]) -> Result<Route, DropReason> {
        let packet = PacketView::parse(frame, &self.config)?;
        let tunnel = self.tunnel.as_ref().is_some_and(|peer| peer.matches(&packet));
        Ok(match (tunnel, tunnel && packet.has_gui_marker(self.marker)) {
            (true, true) => Route::Gui,
            (true, false) => Route::TunnelReceive,
            (false, _) => Route::Process,
        })
    }
}

#[derive(Debug, Default)]
pub struct RouterStats {
    pub gui: AtomicU64,
    pub tunnel: AtomicU64,
    pub process: AtomicU64,
    pub dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterSnapshot {
    pub gui: u64,
    pub tunnel: u64,
    pub process: u64,
    pub dropped: u64,
}

impl RouterStats {
    pub fn snapshot(&self) -> RouterSnapshot {
        RouterSnapshot {
            gui: self.gui.load(Ordering::Relaxed),
            tunnel: self.tunnel.load(Ordering::Relaxed),
            process: self.process.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Queues fed by the router.
#[derive(Clone)]
pub struct RouterOutputs {
    pub gui: Arc<BoundedQueue<Message>>,
    pub tunnel_receive: Arc<BoundedQueue<Message>>,
    pub process: Arc<BoundedQueue<Message>>,
}

pub struct Router {
    classifier: Classifier,
    stats: Arc<RouterStats>,
}

impl Router {
    pub fn new(classifier: Classifier) -> Self {
        Router {
            classifier,
            stats: Arc::new(RouterStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<RouterStats> {
        Arc::clone(&self.stats)
    }

    /// Classify one frame and hand it to its queue.
    pub fn dispatch(&self, frame: Vec<u8>, outputs: &RouterOutputs) -> Option<Route> {
        let route = match self.classifier.classify(&frame) {
            Ok(route) => route,
            Err(reason) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(?reason, "frame dropped");
                return None;
            }
        };
        trace!(?route, len = frame.len(), "routing frame");
        let (queue, counter) = match route {
            Route::Gui => (&outputs.gui, &self.stats.gui),
            Route::TunnelReceive => (&outputs.tunnel_receive, &self.stats.tunnel),
            Route::Process => (&outputs.process, &self.stats.process),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        queue.enqueue(Message::Frame(frame));
        Some(route)
    }

    /// Route frames until the stop sentinel arrives.
    ///
    /// The sentinel goes on to the GUI and tunnel receive queues; the process
    /// queue gets it from the tunnel receive stage, after any frames still
    /// in flight there.
    pub fn run(&self, input: &BoundedQueue<Message>, outputs: &RouterOutputs) {
        loop {
            match input.dequeue() {
                Message::Frame(frame) => {
                    self.dispatch(frame, outputs);
                }
                Message::Stop => {
                    outputs.gui.enqueue(Message::Stop);
                    outputs.tunnel_receive.enqueue(Message::Stop);
                    return;
                }
            }
        }
    }
}
