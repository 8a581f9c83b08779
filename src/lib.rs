//! A role-based raw packet gateway
//!
//! The gateway owns several physical Ethernet ports, gives each a logical
//! role (three sources and one tunnel) and forwards raw packets between them:
//! - Role discovery by trial addressing and ICMP reachability probing
//! - Packet classification into GUI, tunnel and process queues
//! - IPv4/UDP datagram assembly with header checksums
//! - Tunnel header strip and wrap
//! - Bounded blocking queues between single-threaded stages

pub mod config;
pub mod discovery;
pub mod error;
pub mod iface;
pub mod monitor;
pub mod network;
pub mod pipeline;
pub mod platform;
pub mod queue;
pub mod router;
pub mod sender;
pub mod transport;
pub mod tunnel;

// Re-export commonly used types
pub use config::{RouterConfig, SearchCandidate, SenderConfig, Settings};
pub use discovery::{NetworkManager, SearchState, SelfSearch, Services};
pub use error::{Error, Result};
pub use iface::{NetworkInterface, Role, RoleSelector, RoleTable};
pub use network::ipv4::Ipv4Header;
pub use pipeline::{Message, Outbound, Pipeline, PipelineConfig, PipelineStats};
pub use queue::BoundedQueue;
pub use router::{Classifier, Route, Router};
pub use sender::{Assembler, Sender};
pub use tunnel::TunnelFraming;
