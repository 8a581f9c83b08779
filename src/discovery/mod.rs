//! Role discovery
//!
//! Decides which physical port holds which role before the pipeline starts:
//! - `link`: carrier polling with a bounded retry budget
//! - `search`: per-interface self-search state machine
//! - `manager`: normal-mode configuration and parallel self-search

pub mod link;
pub mod manager;
pub mod search;

pub use link::{LinkPoll, LinkPoller, LinkPolicy};
pub use manager::NetworkManager;
pub use search::{ExhaustReason, SearchPolicy, SearchState, SelfSearch};

use tracing::warn;

use crate::error::{Error, Result};
use crate::iface::NetworkInterface;
use crate::platform::{Clock, InterfaceConfigurator, LinkStatus, Reachability};

/// Host collaborators used during discovery.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub link: &'a dyn LinkStatus,
    pub configurator: &'a dyn InterfaceConfigurator,
    pub reachability: &'a dyn Reachability,
    pub clock: &'a dyn Clock,
}

/// Replace the interface's addresses with its self address and install the
/// gateway, stopping at the first failure.
pub(crate) fn apply_addressing(configurator: &dyn InterfaceConfigurator, iface: &NetworkInterface) -> Result<()> {
    let addressing = &iface.addressing;
    let self_addr = addressing
        .self_addr
        .ok_or_else(|| Error::invalid("ipAddress", format!("no self address for {}", iface.name)))?;

    configurator.clear_addresses(&iface.name)?;
    configurator.add_address(
        &iface.name,
        self_addr,
        addressing.prefix_len(),
        addressing.broadcast_address(),
    )?;
    if let Some(gateway) = addressing.gateway {
        configurator.set_default_gateway(&iface.name, gateway)?;
    }
    Ok(())
}

/// Take back whatever addressing `iface` last put on the host and leave the
/// port unassigned. Failures are logged; the port is unassigned regardless.
pub(crate) fn release_addressing(configurator: &dyn InterfaceConfigurator, iface: &mut NetworkInterface) {
    if iface.addressing.gateway.is_some() {
        if let Err(e) = configurator.remove_default_gateway(&iface.name) {
            warn!(iface = %iface.name, error = %e, "failed to remove default route");
        }
    }
    if let Err(e) = configurator.clear_addresses(&iface.name) {
        warn!(iface = %iface.name, error = %e, "failed to flush addresses");
    }
    iface.unassign();
}
