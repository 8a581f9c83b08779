//! Role to interface table
//!
//! Built once at startup from the configured or discovered interfaces, then
//! shared read-only (behind an `Arc`) with the router and sender. Mutation is
//! only possible through `&mut self` before the table is shared.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::iface::interface::NetworkInterface;
use crate::iface::role::Role;
use crate::platform::{RawTransport, TransportOpener};

/// An interface holding a role, with its transport once opened.
pub struct Endpoint {
    pub iface: NetworkInterface,
    transport: Option<Arc<dyn RawTransport>>,
}

impl Endpoint {
    pub fn transport(&self) -> Option<&Arc<dyn RawTransport>> {
        self.transport.as_ref()
    }
}

#[derive(Default)]
pub struct RoleTable {
    slots: [Option<Endpoint>; 4],
    unassigned: Vec<NetworkInterface>,
}

impl RoleTable {
    /// Build the table, rejecting two interfaces with the same role.
    pub fn build(interfaces: Vec<NetworkInterface>) -> Result<Self> {
        let mut table = RoleTable::default();
        for iface in interfaces {
            let Some(slot) = iface.role.slot() else {
                table.unassigned.push(iface);
                continue;
            };
            if let Some(existing) = &table.slots[slot] {
                return Err(Error::RoleConflict {
                    role: iface.role.to_string(),
                    first: existing.iface.name.clone(),
                    second: iface.name,
                });
            }
            table.slots[slot] = Some(Endpoint {
                iface,
                transport: None,
            });
        }
        Ok(table)
    }

    /// Open a transport for every interface that holds a role.
    ///
    /// An interface whose transport fails to open keeps its role but cannot
    /// send or capture; the sender drops traffic for it.
    pub fn attach_transports(&mut self, opener: &dyn TransportOpener) {
        for endpoint in self.slots.iter_mut().flatten() {
            match opener.open(&endpoint.iface) {
                Ok(transport) => {
                    info!(iface = %endpoint.iface.name, role = %endpoint.iface.role, "transport opened");
                    endpoint.transport = Some(transport);
                }
                Err(e) => {
                    warn!(iface = %endpoint.iface.name, error = %e, "failed to open transport");
                }
            }
        }
    }

    /// Attach an already open transport to the interface holding `role`.
    pub fn attach(&mut self, role: Role, transport: Arc<dyn RawTransport>) -> bool {
        match role.slot().and_then(|slot| self.slots[slot].as_mut()) {
            Some(endpoint) => {
                endpoint.transport = Some(transport);
                true
            }
            None => false,
        }
    }

    /// Resolve a role to its endpoint.
    pub fn lookup(&self, role: Role) -> Option<&Endpoint> {
        self.slots[role.slot()?].as_ref()
    }

    /// The interface holding the tunnel role, if any.
    pub fn tunnel(&self) -> Option<&NetworkInterface> {
        self.lookup(Role::Tunnel).map(|endpoint| &endpoint.iface)
    }

    /// Endpoints in role order.
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.slots.iter().flatten()
    }

    /// Every known interface, assigned ones first.
    pub fn interfaces(&self) -> impl Iterator<Item = &NetworkInterface> {
        self.endpoints()
            .map(|endpoint| &endpoint.iface)
            .chain(self.unassigned.iter())
    }
}
