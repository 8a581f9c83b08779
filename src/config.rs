//! Configuration files
//!
//! Four JSON documents are read once at startup:
//! - settings: static per-interface configuration and startup mode
//! - self-search candidates: ordered addressing tuples to try per interface
//! - router: header offsets and the GUI marker
//! - sender: IPv4/UDP header constants and the role selector position
//!
//! Any missing or malformed file is fatal for the subsystem that needs it.

use std::collections::BTreeMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::discovery::{LinkPolicy, SearchPolicy};
use crate::error::{Error, Result};
use crate::iface::{Addressing, LinkFlags, Role, RoleSelector, TransportKind};

pub const DEFAULT_SETTINGS_FILE: &str = "settings.json";
pub const DEFAULT_SELF_SEARCH_FILE: &str = "self_search.json";
pub const DEFAULT_ROUTER_FILE: &str = "router.json";
pub const DEFAULT_SENDER_FILE: &str = "sender.json";

/// Read and deserialize a JSON file.
pub fn load_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read(path).map_err(|e| Error::Config {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_slice(&data).map_err(|e| Error::Config {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Static configuration and startup mode.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub enable_self_search: bool,
    /// Physical ports, in the order roles are resolved
    #[serde(default = "default_ports")]
    pub ports: Vec<String>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_tunnel_header_size")]
    pub tunnel_header_size: usize,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_link_attempts")]
    pub link_attempts: u32,
    #[serde(default = "default_link_retry_secs")]
    pub link_retry_secs: u64,
    /// Per-interface settings keyed by interface name
    #[serde(flatten)]
    pub interfaces: BTreeMap<String, InterfaceSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            enable_self_search: false,
            ports: default_ports(),
            queue_capacity: default_queue_capacity(),
            tunnel_header_size: default_tunnel_header_size(),
            probe_timeout_ms: default_probe_timeout_ms(),
            link_attempts: default_link_attempts(),
            link_retry_secs: default_link_retry_secs(),
            interfaces: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn search_policy(&self) -> SearchPolicy {
        SearchPolicy {
            link: LinkPolicy {
                max_attempts: self.link_attempts,
                interval: Duration::from_secs(self.link_retry_secs),
            },
            probe_wait: Duration::from_millis(self.probe_timeout_ms),
        }
    }
}

/// Static settings for one interface.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InterfaceSettings {
    #[serde(flatten)]
    pub addressing: Addressing,
    #[serde(default)]
    pub role: Role,
    #[serde(flatten)]
    pub flags: LinkFlags,
    #[serde(rename = "virtualIp", default)]
    pub virtual_ip: Option<String>,
    #[serde(default)]
    pub transport: TransportKind,
}

/// One self-search candidate: an addressing tuple plus the address to probe.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchCandidate {
    #[serde(flatten)]
    pub addressing: Addressing,
    #[serde(rename = "ipToPing")]
    pub probe_addr: Ipv4Addr,
    #[serde(default)]
    pub role: Role,
}

/// Load the ordered self-search candidate list.
pub fn load_candidates<P: AsRef<Path>>(path: P) -> Result<Vec<SearchCandidate>> {
    let path = path.as_ref();
    let value: serde_json::Value = load_json(path)?;
    if !value.is_array() {
        return Err(Error::Config {
            path: path.to_path_buf(),
            reason: "self-search configuration is not an array".into(),
        });
    }
    serde_json::from_value(value).map_err(|e| Error::Config {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Header layout used by the packet router.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct RouterConfig {
    pub ipv4_header_size: usize,
    pub packet_header_size: usize,
    pub min_packet_size: usize,
    pub src_ip_offset: usize,
    pub dest_ip_offset: usize,
    pub src_port_offset: usize,
    pub dest_port_offset: usize,
    pub payload_offset: usize,
    #[serde(rename = "guiPayloadICD")]
    pub gui_marker: u16,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            ipv4_header_size: 20,
            packet_header_size: 8,
            min_packet_size: 28,
            src_ip_offset: 12,
            dest_ip_offset: 16,
            src_port_offset: 20,
            dest_port_offset: 22,
            payload_offset: 28,
            gui_marker: 0x6464,
        }
    }
}

impl RouterConfig {
    /// Reject layouts where an address field would lie beyond a minimum frame.
    pub fn validate(&self) -> Result<()> {
        for (field, offset) in [
            ("SRC_IP_OFFSET", self.src_ip_offset),
            ("DEST_IP_OFFSET", self.dest_ip_offset),
        ] {
            if offset.saturating_add(4) > self.min_packet_size {
                return Err(Error::invalid(
                    field,
                    format!("offset {offset} exceeds minimum packet size {}", self.min_packet_size),
                ));
            }
        }
        Ok(())
    }

    /// Byte compared against the payload's first and second-to-last bytes.
    pub fn gui_marker_byte(&self) -> u8 {
        (self.gui_marker & 0xFF) as u8
    }
}

/// Header constants used by the packet assembler.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct SenderConfig {
    /// Minimum payload size, i.e. the leading header carrying the role selector
    #[serde(rename = "HEADER_SIZE")]
    pub packet_header_size: usize,
    pub udp_header_size: usize,
    pub ipv4_header_size: usize,
    pub ip_version: u8,
    pub ihl: u8,
    pub default_ttl: u8,
    #[serde(rename = "PROTOCOL_TYPE_INDEX")]
    pub protocol: u8,
    pub flags_fragment: u16,
    pub default_tos: u8,
    /// UDP checksum field value; zero means "not computed"
    #[serde(rename = "CHECKSUM")]
    pub udp_checksum: u16,
    pub initial_ip_checksum: u16,
    pub invalid_socket: i32,
    pub role_index_byte: usize,
    pub role_bit_offset: u8,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            packet_header_size: 8,
            udp_header_size: 8,
            ipv4_header_size: 20,
            ip_version: 4,
            ihl: 5,
            default_ttl: 64,
            protocol: 17,
            flags_fragment: 0,
            default_tos: 0,
            udp_checksum: 0,
            initial_ip_checksum: 0,
            invalid_socket: -1,
            role_index_byte: 4,
            role_bit_offset: 4,
        }
    }
}

impl SenderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ihl < 5 || self.ihl > 15 || self.ipv4_header_size != self.ihl as usize * 4 {
            return Err(Error::invalid(
                "IPV4_HEADER_SIZE",
                format!("{} bytes does not match IHL {}", self.ipv4_header_size, self.ihl),
            ));
        }
        if self.udp_header_size < 8 {
            return Err(Error::invalid("UDP_HEADER_SIZE", "must be at least 8 bytes"));
        }
        if self.role_bit_offset > 6 {
            return Err(Error::invalid("ROLE_BIT_OFFSET", "2-bit selector must fit in one byte"));
        }
        Ok(())
    }

    pub fn role_selector(&self) -> RoleSelector {
        RoleSelector {
            index_byte: self.role_index_byte,
            bit_offset: self.role_bit_offset,
        }
    }
}

fn default_ports() -> Vec<String> {
    ["eth1", "eth2", "eth3", "eth4"].iter().map(|s| s.to_string()).collect()
}

fn default_queue_capacity() -> usize {
    100
}

fn default_tunnel_header_size() -> usize {
    8
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

fn default_link_attempts() -> u32 {
    5
}

fn default_link_retry_secs() -> u64 {
    12
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_settings_with_interfaces() {
        let file = write_temp(
            r#"{
                "enableSelfSearch": false,
                "ports": ["eth1", "eth2"],
                "queueCapacity": 16,
                "eth1": {"ipAddress": "10.0.0.2", "DestIpAddress": "10.0.0.9",
                         "role": "tunnel", "promiscuous": true, "mtu": 1400},
                "eth2": {"ipAddress": "10.0.1.2", "role": "source2", "transport": "tun",
                         "virtualIp": "192.168.1.101/24"}
            }"#,
        );
        let settings: Settings = load_json(file.path()).unwrap();
        assert!(!settings.enable_self_search);
        assert_eq!(settings.ports, vec!["eth1", "eth2"]);
        assert_eq!(settings.queue_capacity, 16);
        assert_eq!(settings.tunnel_header_size, 8);

        let eth1 = &settings.interfaces["eth1"];
        assert_eq!(eth1.role, Role::Tunnel);
        assert!(eth1.flags.promiscuous);
        assert_eq!(eth1.flags.mtu, 1400);
        assert_eq!(eth1.addressing.dest_addr, Some(Ipv4Addr::new(10, 0, 0, 9)));
        assert_eq!(eth1.transport, TransportKind::Raw);

        let eth2 = &settings.interfaces["eth2"];
        assert_eq!(eth2.role, Role::Source2);
        assert_eq!(eth2.transport, TransportKind::Tun);
        assert_eq!(eth2.virtual_ip.as_deref(), Some("192.168.1.101/24"));
        assert_eq!(eth2.flags.mtu, 1500);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result: Result<Settings> = load_json("/nonexistent/settings.json");
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let file = write_temp(r#"{"enableSelfSearch": tru"#);
        match load_json::<Settings, _>(file.path()) {
            Err(Error::Config { path, reason }) => {
                assert_eq!(path, file.path());
                assert!(!reason.is_empty());
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_candidates_must_be_array() {
        let file = write_temp(r#"{"selfIp": "10.0.0.2", "ipToPing": "10.0.0.1"}"#);
        assert!(matches!(load_candidates(file.path()), Err(Error::Config { .. })));
    }

    #[test]
    fn test_candidates_in_order() {
        let file = write_temp(
            r#"[
                {"selfIp": "10.0.0.2", "ipToPing": "10.0.0.1", "DestIpAddress": "10.0.0.1",
                 "DefaultGateway": "10.0.0.254", "role": "tunnel"},
                {"selfIp": "10.0.1.2", "ipToPing": "10.0.1.1", "role": "Source2"}
            ]"#,
        );
        let candidates = load_candidates(file.path()).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].role, Role::Tunnel);
        assert_eq!(candidates[0].addressing.self_addr, Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(candidates[0].addressing.gateway, Some(Ipv4Addr::new(10, 0, 0, 254)));
        assert_eq!(candidates[0].addressing.netmask, Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(candidates[1].probe_addr, Ipv4Addr::new(10, 0, 1, 1));
        // Case-sensitive role mapping falls back to source1.
        assert_eq!(candidates[1].role, Role::Source1);
    }

    #[test]
    fn test_router_config_keys_and_validation() {
        let config: RouterConfig = serde_json::from_str(
            r#"{"IPV4_HEADER_SIZE": 20, "MIN_PACKET_SIZE": 40, "SRC_IP_OFFSET": 26,
                "DEST_IP_OFFSET": 30, "PAYLOAD_OFFSET": 42, "guiPayloadICD": 25700}"#,
        )
        .unwrap();
        assert_eq!(config.min_packet_size, 40);
        assert_eq!(config.src_port_offset, 20);
        assert_eq!(config.gui_marker_byte(), 0x64);
        assert!(config.validate().is_ok());

        let bad = RouterConfig {
            dest_ip_offset: 38,
            ..config
        };
        assert!(matches!(bad.validate(), Err(Error::InvalidField { field: "DEST_IP_OFFSET", .. })));
    }

    #[test]
    fn test_sender_config_validation() {
        assert!(SenderConfig::default().validate().is_ok());
        let config: SenderConfig = serde_json::from_str(r#"{"IHL": 6}"#).unwrap();
        assert!(config.validate().is_err());
        let config: SenderConfig = serde_json::from_str(r#"{"IHL": 6, "IPV4_HEADER_SIZE": 24}"#).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.role_selector(), RoleSelector::default());
    }
}
