//! Startup configuration of the physical ports
//!
//! In normal mode roles and addressing come straight from the settings file
//! and are applied immediately. In self-search mode every port runs its own
//! [`SelfSearch`] on a dedicated thread and startup waits for all of them.
//! Either way the result is frozen into a [`RoleTable`].

use std::thread;

use tracing::{debug, error, info, warn};

use crate::config::{SearchCandidate, Settings};
use crate::discovery::search::{SearchState, SelfSearch};
use crate::discovery::Services;
use crate::error::Result;
use crate::iface::{NetworkInterface, Role, RoleTable};
use crate::platform::InterfaceConfigurator;

pub struct NetworkManager {
    self_search: bool,
    interfaces: Vec<NetworkInterface>,
    searches: Vec<SelfSearch>,
    candidates: Vec<SearchCandidate>,
}

impl NetworkManager {
    /// Create one interface per configured port.
    ///
    /// Link flags and transport kind always come from the settings. Role and
    /// addressing are taken from them only in normal mode.
    pub fn from_settings(settings: &Settings, candidates: Vec<SearchCandidate>) -> Self {
        let policy = settings.search_policy();
        let mut interfaces = Vec::with_capacity(settings.ports.len());
        for port in &settings.ports {
            let mut iface = NetworkInterface::new(port.as_str());
            match settings.interfaces.get(port) {
                Some(configured) => {
                    iface.flags = configured.flags.clone();
                    iface.transport = configured.transport;
                    if !settings.enable_self_search {
                        iface.assign(configured.addressing.clone(), configured.role);
                        iface.virtual_addr = configured.virtual_ip.clone().filter(|cidr| !cidr.is_empty());
                    }
                }
                None if !settings.enable_self_search => {
                    warn!(iface = %port, "no settings for port, leaving it unassigned");
                }
                None => {}
            }
            interfaces.push(iface);
        }

        NetworkManager {
            self_search: settings.enable_self_search,
            searches: vec![SelfSearch::new(policy); interfaces.len()],
            interfaces,
            candidates,
        }
    }

    pub fn is_self_search(&self) -> bool {
        self.self_search
    }

    pub fn interfaces(&self) -> &[NetworkInterface] {
        &self.interfaces
    }

    /// Current self-search state of the named port.
    pub fn search_state(&self, name: &str) -> Option<SearchState> {
        let position = self.interfaces.iter().position(|iface| iface.name == name)?;
        Some(self.searches[position].state())
    }

    /// Configure every port according to the startup mode.
    pub fn configure(&mut self, services: Services<'_>) {
        if self.self_search {
            info!("self-search mode enabled, running self-search");
            self.run_self_search(services);
        } else {
            info!("normal mode, applying static settings");
            for iface in self.interfaces.iter().filter(|iface| iface.role.is_assigned()) {
                apply_static(services.configurator, iface);
            }
        }
    }

    /// Run self-search on every port in parallel and wait for all of them.
    ///
    /// Ports whose search already finished are left alone, so a second run
    /// only repeats work for ports that were [`reset`](Self::reset).
    pub fn run_self_search(&mut self, services: Services<'_>) {
        let NetworkManager {
            interfaces,
            searches,
            candidates,
            ..
        } = self;
        let candidates = candidates.as_slice();

        thread::scope(|scope| {
            for (iface, search) in interfaces.iter_mut().zip(searches.iter_mut()) {
                scope.spawn(move || {
                    let state = search.run(iface, candidates, services);
                    info!(iface = %iface.name, ?state, "self-search finished");
                });
            }
        });

        demote_duplicates(services.configurator, &mut self.interfaces, &mut self.searches);
        reinstate_gateways(services.configurator, &self.interfaces, &self.searches);
        info!("self-search completed for all interfaces");
    }

    /// Forget the outcome for `name` so the next run searches it again.
    pub fn reset(&mut self, name: &str) -> bool {
        match self.interfaces.iter().position(|iface| iface.name == name) {
            Some(position) => {
                self.searches[position].reset();
                self.interfaces[position].unassign();
                true
            }
            None => false,
        }
    }

    /// Freeze the resolved roles into a table.
    ///
    /// A role claimed twice in static settings is fatal.
    pub fn into_role_table(self) -> Result<RoleTable> {
        RoleTable::build(self.interfaces)
    }
}

/// Apply normal-mode settings. Each failed step is logged and the rest still run.
fn apply_static(configurator: &dyn InterfaceConfigurator, iface: &NetworkInterface) {
    let name = iface.name.as_str();
    info!(iface = name, role = %iface.role, addr = ?iface.self_addr(), "applying settings");

    report(name, "link flags", configurator.set_flags(name, &iface.flags));
    report(name, "mtu", configurator.set_mtu(name, iface.flags.mtu));

    let addressing = &iface.addressing;
    if let Some(addr) = addressing.self_addr {
        let result = configurator.clear_addresses(name).and_then(|()| {
            configurator.add_address(name, addr, addressing.prefix_len(), addressing.broadcast_address())
        });
        report(name, "address", result);
    }
    if let Some(cidr) = &iface.virtual_addr {
        report(name, "virtual address", configurator.add_cidr(name, cidr));
    }
    if let Some(gateway) = addressing.gateway {
        report(name, "default gateway", configurator.set_default_gateway(name, gateway));
    }
}

fn report(iface: &str, step: &str, result: Result<()>) {
    if let Err(e) = result {
        error!(iface, step, error = %e, "interface configuration step failed");
    }
}

/// Keep each role on the earliest port that committed it.
fn demote_duplicates(
    configurator: &dyn InterfaceConfigurator,
    interfaces: &mut [NetworkInterface],
    searches: &mut [SelfSearch],
) {
    let mut holders: [Option<usize>; Role::ASSIGNABLE.len()] = [None; Role::ASSIGNABLE.len()];
    for position in 0..interfaces.len() {
        let Some(slot) = interfaces[position].role.slot() else {
            continue;
        };
        match holders[slot] {
            None => holders[slot] = Some(position),
            Some(first) => {
                warn!(
                    iface = %interfaces[position].name,
                    role = %interfaces[position].role,
                    holder = %interfaces[first].name,
                    "role already held by an earlier port, demoting"
                );
                searches[position].demote(configurator, &mut interfaces[position]);
            }
        }
    }
}

/// Ports search in parallel, so a port that later failed or was demoted may
/// have replaced a committed port's default route. Install those again.
fn reinstate_gateways(configurator: &dyn InterfaceConfigurator, interfaces: &[NetworkInterface], searches: &[SelfSearch]) {
    for (iface, search) in interfaces.iter().zip(searches) {
        let (SearchState::Committed { .. }, Some(gateway)) = (search.state(), iface.addressing.gateway) else {
            continue;
        };
        debug!(iface = %iface.name, %gateway, "reinstating default route");
        report(&iface.name, "default gateway", configurator.set_default_gateway(&iface.name, gateway));
    }
}
