//! Tunnel framing
//!
//! Data crossing the tunnel link carries a fixed-size header in front of the
//! payload. Both ends agree on the size; its contents are deployment specific
//! and left zeroed here.
//!
//! - receive: strip the header from frames arriving from the tunnel peer
//! - transmit: reserve the header in front of outbound payloads and stamp the
//!   destination role selector into it

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::iface::{Role, RoleSelector};
use crate::pipeline::{Message, Outbound};
use crate::queue::BoundedQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelFraming {
    header_size: usize,
}

impl TunnelFraming {
    pub fn new(header_size: usize) -> Self {
        TunnelFraming { header_size }
    }

    pub fn header_size(&self) -> usize {
        self.header_size
    }

    /// Remove the tunnel header, `None` when the frame cannot hold one.
    pub fn strip(&self, mut frame: Vec<u8>) -> Option<Vec<u8>> {
        if frame.len() < self.header_size {
            return None;
        }
        frame.drain(..self.header_size);
        Some(frame)
    }

    /// Prepend a zeroed tunnel header to `payload`.
    pub fn wrap(&self, payload: &[u8]) -> Vec<u8> {
        let mut framed = Vec::with_capacity(self.header_size + payload.len());
        framed.resize(self.header_size, 0);
        framed.extend_from_slice(payload);
        framed
    }

    /// Wrap `payload` and record `role` in the header for the sender.
    pub fn wrap_for(&self, selector: &RoleSelector, role: Role, payload: &[u8]) -> Option<Vec<u8>> {
        let mut framed = self.wrap(payload);
        selector.encode(&mut framed, role).then_some(framed)
    }
}

/// Tunnel receive stage: strip headers until the stop sentinel arrives,
/// then pass the sentinel on.
pub fn run_receive(
    framing: TunnelFraming,
    input: &BoundedQueue<Message>,
    output: &BoundedQueue<Message>,
    dropped: &AtomicU64,
) {
    loop {
        match input.dequeue() {
            Message::Frame(frame) => {
                let len = frame.len();
                match framing.strip(frame) {
                    Some(payload) => output.enqueue(Message::Frame(payload)),
                    None => {
                        dropped.fetch_add(1, Ordering::Relaxed);
                        debug!(len, header = framing.header_size(), "tunnel frame shorter than header, dropped");
                    }
                }
            }
            Message::Stop => {
                output.enqueue(Message::Stop);
                return;
            }
        }
    }
}

/// Tunnel transmit stage: frame outbound payloads for the sender.
pub fn run_transmit(
    framing: TunnelFraming,
    selector: RoleSelector,
    input: &BoundedQueue<Message<Outbound>>,
    output: &BoundedQueue<Message>,
    dropped: &AtomicU64,
) {
    loop {
        match input.dequeue() {
            Message::Frame(outbound) => match framing.wrap_for(&selector, outbound.role, &outbound.payload) {
                Some(framed) => output.enqueue(Message::Frame(framed)),
                None => {
                    dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(role = %outbound.role, "role selector does not fit tunnel header, dropped");
                }
            },
            Message::Stop => {
                output.enqueue(Message::Stop);
                return;
            }
        }
    }
}
