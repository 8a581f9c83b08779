//! Interface configuration through the `ip` tool

use std::net::Ipv4Addr;
use std::process::Command;

use tracing::debug;

use crate::error::{Error, Result};
use crate::iface::LinkFlags;
use crate::platform::InterfaceConfigurator;

const PROGRAM: &str = "ip";

/// Shells out to iproute2 for every configuration step.
#[derive(Debug, Default, Clone, Copy)]
pub struct IpCommand;

impl IpCommand {
    fn run(&self, iface: &str, args: &[String]) -> Result<()> {
        debug!(iface, command = %args.join(" "), "ip");
        let status = Command::new(PROGRAM).args(args).status()?;
        if !status.success() {
            return Err(Error::Command {
                program: PROGRAM,
                iface: iface.to_string(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

fn on_off(enabled: bool) -> String {
    if enabled { "on" } else { "off" }.to_string()
}

/// `ip link set` arguments for the given flags.
pub fn link_flag_args(iface: &str, flags: &LinkFlags) -> Vec<String> {
    vec![
        "link".into(),
        "set".into(),
        "dev".into(),
        iface.into(),
        "up".into(),
        "promisc".into(),
        on_off(flags.promiscuous),
        "arp".into(),
        on_off(!flags.no_arp),
        "multicast".into(),
        on_off(flags.multicast),
    ]
}

/// `ip addr add` arguments for an address with prefix length.
pub fn address_args(iface: &str, addr: Ipv4Addr, prefix_len: u8, broadcast: Option<Ipv4Addr>) -> Vec<String> {
    let mut args = vec!["addr".into(), "add".into(), format!("{addr}/{prefix_len}")];
    if let Some(brd) = broadcast {
        args.push("broadcast".into());
        args.push(brd.to_string());
    }
    args.push("dev".into());
    args.push(iface.into());
    args
}

/// `ip route del` arguments for the default route through `iface`.
pub fn default_route_del_args(iface: &str) -> Vec<String> {
    ["route", "del", "default", "dev", iface].iter().map(|s| s.to_string()).collect()
}

impl InterfaceConfigurator for IpCommand {
    fn clear_addresses(&self, iface: &str) -> Result<()> {
        self.run(iface, &["-4".into(), "addr".into(), "flush".into(), "dev".into(), iface.into()])
    }

    fn add_address(
        &self,
        iface: &str,
        addr: Ipv4Addr,
        prefix_len: u8,
        broadcast: Option<Ipv4Addr>,
    ) -> Result<()> {
        self.run(iface, &address_args(iface, addr, prefix_len, broadcast))
    }

    fn add_cidr(&self, iface: &str, cidr: &str) -> Result<()> {
        self.run(iface, &["addr".into(), "add".into(), cidr.into(), "dev".into(), iface.into()])
    }

    fn set_default_gateway(&self, iface: &str, gateway: Ipv4Addr) -> Result<()> {
        self.run(
            iface,
            &[
                "route".into(),
                "replace".into(),
                "default".into(),
                "via".into(),
                gateway.to_string(),
                "dev".into(),
                iface.into(),
            ],
        )
    }

    fn remove_default_gateway(&self, iface: &str) -> Result<()> {
        self.run(iface, &default_route_del_args(iface))
    }

    fn set_flags(&self, iface: &str, flags: &LinkFlags) -> Result<()> {
        self.run(iface, &link_flag_args(iface, flags))
    }

    fn set_mtu(&self, iface: &str, mtu: u32) -> Result<()> {
        self.run(
            iface,
            &["link".into(), "set".into(), "dev".into(), iface.into(), "mtu".into(), mtu.to_string()],
        )
    }
}
