//! Link carrier and traffic counters from `/sys/class/net`

use std::fs;
use std::path::PathBuf;

use crate::platform::LinkStatus;

const SYSFS_NET: &str = "/sys/class/net";

#[derive(Debug, Clone)]
pub struct SysfsLink {
    root: PathBuf,
}

impl Default for SysfsLink {
    fn default() -> Self {
        SysfsLink {
            root: PathBuf::from(SYSFS_NET),
        }
    }
}

impl SysfsLink {
    /// Read from an alternate tree laid out like `/sys/class/net`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        SysfsLink { root: root.into() }
    }

    fn read_trimmed(&self, iface: &str, file: &str) -> Option<String> {
        let path = self.root.join(iface).join(file);
        fs::read_to_string(path).ok().map(|s| s.trim().to_string())
    }

    /// Cumulative received bytes, `None` if unreadable.
    pub fn rx_bytes(&self, iface: &str) -> Option<u64> {
        self.read_trimmed(iface, "statistics/rx_bytes")?.parse().ok()
    }

    /// Cumulative transmitted bytes, `None` if unreadable.
    pub fn tx_bytes(&self, iface: &str) -> Option<u64> {
        self.read_trimmed(iface, "statistics/tx_bytes")?.parse().ok()
    }
}

impl LinkStatus for SysfsLink {
    /// Carrier reads `1` when a cable is connected; unreadable counts as down.
    fn is_link_up(&self, iface: &str) -> bool {
        self.read_trimmed(iface, "carrier").as_deref() == Some("1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_carrier_and_counters() {
        let root = tempfile::tempdir().unwrap();
        let eth1 = root.path().join("eth1");
        fs::create_dir_all(eth1.join("statistics")).unwrap();
        fs::write(eth1.join("carrier"), "1\n").unwrap();
        fs::write(eth1.join("statistics/rx_bytes"), "1234\n").unwrap();

        let eth2 = root.path().join("eth2");
        fs::create_dir_all(&eth2).unwrap();
        fs::write(eth2.join("carrier"), "0\n").unwrap();

        let link = SysfsLink::with_root(root.path());
        assert!(link.is_link_up("eth1"));
        assert!(!link.is_link_up("eth2"));
        assert!(!link.is_link_up("eth9"));
        assert_eq!(link.rx_bytes("eth1"), Some(1234));
        assert_eq!(link.tx_bytes("eth1"), None);
    }
}
