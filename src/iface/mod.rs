//! Network interface abstraction layer
//!
//! This module provides abstractions for the gateway's physical ports:
//! - Role tags and the wire-level role selector
//! - Interface addressing and capability flags
//! - The frozen role to interface table

pub mod interface;
pub mod role;
pub mod table;

// Re-export commonly used items
pub use interface::{Addressing, LinkFlags, NetworkInterface, TransportKind};
pub use role::{Role, RoleSelector};
pub use table::{Endpoint, RoleTable};
