//! Interface activity monitor
//!
//! Samples each port's cumulative rx/tx byte counters on a fixed interval and
//! reports every increase to an [`ActivitySink`]. Useful for driving status
//! indicators; the default sink only traces.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::trace;

use crate::error::Result;
use crate::platform::SysfsLink;

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Rx,
    Tx,
}

/// Traffic seen on one port since the previous sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub iface: String,
    pub direction: Direction,
    pub bytes: u64,
}

pub trait ActivitySink: Send {
    fn on_activity(&mut self, activity: &Activity);
}

/// Sink that records activity at trace level.
pub struct TraceSink;

impl ActivitySink for TraceSink {
    fn on_activity(&mut self, activity: &Activity) {
        trace!(iface = %activity.iface, direction = ?activity.direction, bytes = activity.bytes, "activity");
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    rx: Option<u64>,
    tx: Option<u64>,
}

pub struct ActivityMonitor {
    sysfs: SysfsLink,
    ports: Vec<(String, Counters)>,
}

impl ActivityMonitor {
    pub fn new(sysfs: SysfsLink, ports: impl IntoIterator<Item = String>) -> Self {
        ActivityMonitor {
            sysfs,
            ports: ports.into_iter().map(|name| (name, Counters::default())).collect(),
        }
    }

    /// Read every counter once and return the increases since the last call.
    ///
    /// The first reading of a counter only sets the baseline. A counter that
    /// went backwards (device reset) is re-baselined silently.
    pub fn sample(&mut self) -> Vec<Activity> {
        let mut activity = Vec::new();
        for (name, last) in &mut self.ports {
            let readings = [
                (Direction::Rx, self.sysfs.rx_bytes(name), &mut last.rx),
                (Direction::Tx, self.sysfs.tx_bytes(name), &mut last.tx),
            ];
            for (direction, current, previous) in readings {
                let Some(current) = current else {
                    continue;
                };
                if let Some(before) = previous.replace(current) {
                    if current > before {
                        activity.push(Activity {
                            iface: name.clone(),
                            direction,
                            bytes: current - before,
                        });
                    }
                }
            }
        }
        activity
    }

    /// Sample on `interval` until `stop` is set.
    pub fn spawn(
        mut self,
        interval: Duration,
        stop: Arc<AtomicBool>,
        mut sink: Box<dyn ActivitySink>,
    ) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("activity-monitor".into())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    for activity in self.sample() {
                        sink.on_activity(&activity);
                    }
                    thread::sleep(interval);
                }
            })?;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn write_counters(root: &Path, iface: &str, rx: u64, tx: u64) {
        let dir = root.join(iface).join("statistics");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("rx_bytes"), format!("{rx}\n")).unwrap();
        fs::write(dir.join("tx_bytes"), format!("{tx}\n")).unwrap();
    }

    #[test]
    fn test_first_sample_is_baseline() {
        let root = tempfile::tempdir().unwrap();
        write_counters(root.path(), "eth1", 100, 50);
        let mut monitor = ActivityMonitor::new(SysfsLink::with_root(root.path()), vec!["eth1".to_string()]);
        assert!(monitor.sample().is_empty());
    }

    #[test]
    fn test_increases_are_reported() {
        let root = tempfile::tempdir().unwrap();
        write_counters(root.path(), "eth1", 100, 50);
        write_counters(root.path(), "eth2", 0, 0);
        let mut monitor = ActivityMonitor::new(
            SysfsLink::with_root(root.path()),
            vec!["eth1".to_string(), "eth2".to_string(), "eth9".to_string()],
        );
        monitor.sample();

        write_counters(root.path(), "eth1", 164, 50);
        write_counters(root.path(), "eth2", 0, 20);
        assert_eq!(
            monitor.sample(),
            vec![
                Activity {
                    iface: "eth1".into(),
                    direction: Direction::Rx,
                    bytes: 64,
                },
                Activity {
                    iface: "eth2".into(),
                    direction: Direction::Tx,
                    bytes: 20,
                },
            ]
        );
        assert!(monitor.sample().is_empty());
    }

    #[test]
    fn test_counter_reset_rebaselines() {
        let root = tempfile::tempdir().unwrap();
        write_counters(root.path(), "eth1", 1000, 0);
        let mut monitor = ActivityMonitor::new(SysfsLink::with_root(root.path()), vec!["eth1".to_string()]);
        monitor.sample();
        write_counters(root.path(), "eth1", 10, 0);
        assert!(monitor.sample().is_empty());
        write_counters(root.path(), "eth1", 15, 0);
        assert_eq!(monitor.sample()[0].bytes, 5);
    }
}
