//! Physical interface model
//!
//! A [`NetworkInterface`] is one Ethernet port: its stable OS name, the role it
//! currently holds, its addressing tuple and its link capability flags. Role
//! and addressing change only during startup (static configuration or
//! self-search); afterwards the interface is frozen into the role table.

use std::net::Ipv4Addr;

use serde::{Deserialize, Deserializer};

use crate::iface::role::Role;

pub const DEFAULT_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
pub const DEFAULT_MTU: u32 = 1500;

/// Addressing tuple shared by static settings and self-search candidates.
///
/// Empty strings in configuration mean "not configured".
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Addressing {
    #[serde(rename = "ipAddress", alias = "selfIp", default, deserialize_with = "optional_addr")]
    pub self_addr: Option<Ipv4Addr>,
    #[serde(rename = "DestIpAddress", default, deserialize_with = "optional_addr")]
    pub dest_addr: Option<Ipv4Addr>,
    #[serde(rename = "DefaultGateway", default, deserialize_with = "optional_addr")]
    pub gateway: Option<Ipv4Addr>,
    #[serde(rename = "SubnetMask", default = "default_netmask", deserialize_with = "netmask")]
    pub netmask: Ipv4Addr,
    #[serde(rename = "RemoteIp", default, deserialize_with = "optional_addr")]
    pub remote_addr: Option<Ipv4Addr>,
    #[serde(rename = "RemoteIpDestination", default, deserialize_with = "optional_addr")]
    pub remote_dest_addr: Option<Ipv4Addr>,
    #[serde(rename = "sourcePort", default)]
    pub src_port: u16,
    #[serde(rename = "destPort", default)]
    pub dst_port: u16,
}

impl Default for Addressing {
    fn default() -> Self {
        Addressing {
            self_addr: None,
            dest_addr: None,
            gateway: None,
            netmask: DEFAULT_NETMASK,
            remote_addr: None,
            remote_dest_addr: None,
            src_port: 0,
            dst_port: 0,
        }
    }
}

impl Addressing {
    /// Prefix length of the netmask (leading one bits).
    pub fn prefix_len(&self) -> u8 {
        u32::from(self.netmask).leading_ones() as u8
    }

    /// Directed broadcast address for the configured subnet.
    pub fn broadcast_address(&self) -> Option<Ipv4Addr> {
        let addr = u32::from(self.self_addr?);
        Some(Ipv4Addr::from(addr | !u32::from(self.netmask)))
    }
}

/// Link capability flags applied in normal mode.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkFlags {
    #[serde(default)]
    pub promiscuous: bool,
    #[serde(default)]
    pub no_arp: bool,
    #[serde(default)]
    pub multicast: bool,
    #[serde(default)]
    pub broadcast: bool,
    #[serde(default = "default_mtu")]
    pub mtu: u32,
}

impl Default for LinkFlags {
    fn default() -> Self {
        LinkFlags {
            promiscuous: false,
            no_arp: false,
            multicast: false,
            broadcast: false,
            mtu: DEFAULT_MTU,
        }
    }
}

/// How frames are read from and written to an interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Packet socket for capture, raw IPv4 socket for transmit
    #[default]
    Raw,
    /// TUN device without packet information
    Tun,
}

/// One physical port of the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    pub role: Role,
    pub addressing: Addressing,
    pub flags: LinkFlags,
    pub transport: TransportKind,
    /// Secondary address in CIDR form added in normal mode
    pub virtual_addr: Option<String>,
}

impl NetworkInterface {
    /// Create an unconfigured interface for the port called `name`
    pub fn new(name: impl Into<String>) -> Self {
        NetworkInterface {
            name: name.into(),
            role: Role::Unassigned,
            addressing: Addressing::default(),
            flags: LinkFlags::default(),
            transport: TransportKind::default(),
            virtual_addr: None,
        }
    }

    pub fn self_addr(&self) -> Option<Ipv4Addr> {
        self.addressing.self_addr
    }

    pub fn dest_addr(&self) -> Option<Ipv4Addr> {
        self.addressing.dest_addr
    }

    /// Adopt an addressing tuple and role.
    pub fn assign(&mut self, addressing: Addressing, role: Role) {
        self.addressing = addressing;
        self.role = role;
    }

    /// Drop role and addressing, leaving the port unconfigured.
    pub fn unassign(&mut self) {
        self.role = Role::Unassigned;
        self.addressing = Addressing::default();
    }
}

fn default_netmask() -> Ipv4Addr {
    DEFAULT_NETMASK
}

fn default_mtu() -> u32 {
    DEFAULT_MTU
}

fn optional_addr<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Ipv4Addr>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => text.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

fn netmask<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Ipv4Addr, D::Error> {
    let mask = optional_addr(deserializer)?.unwrap_or(DEFAULT_NETMASK);
    let bits = u32::from(mask);
    // Contiguous masks only: the inverted mask plus one is a power of two.
    if (!bits).wrapping_add(1) & !bits != 0 {
        return Err(serde::de::Error::custom(format!("non-contiguous subnet mask {mask}")));
    }
    Ok(mask)
}
