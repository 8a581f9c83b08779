//! Link carrier retry policy
//!
//! The carrier is checked once, then re-checked after each sleep until it
//! comes up or the retry budget is spent. With the default policy that is
//! six checks and five 12 second sleeps, about one minute in total.

use std::time::Duration;

use crate::platform::LinkStatus;

pub const DEFAULT_LINK_ATTEMPTS: u32 = 5;
pub const DEFAULT_LINK_INTERVAL: Duration = Duration::from_secs(12);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkPolicy {
    /// Retries after the first check
    pub max_attempts: u32,
    /// Sleep before each retry
    pub interval: Duration,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        LinkPolicy {
            max_attempts: DEFAULT_LINK_ATTEMPTS,
            interval: DEFAULT_LINK_INTERVAL,
        }
    }
}

/// Outcome of one carrier check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPoll {
    Up,
    /// Still down; sleep this long and poll again
    Retry(Duration),
    GaveUp,
}

#[derive(Debug, Clone)]
pub struct LinkPoller {
    policy: LinkPolicy,
    retries: u32,
    checks: u32,
}

impl LinkPoller {
    pub fn new(policy: LinkPolicy) -> Self {
        LinkPoller {
            policy,
            retries: 0,
            checks: 0,
        }
    }

    /// Check the carrier once and decide what happens next.
    pub fn poll(&mut self, link: &dyn LinkStatus, iface: &str) -> LinkPoll {
        self.checks += 1;
        if link.is_link_up(iface) {
            return LinkPoll::Up;
        }
        if self.retries >= self.policy.max_attempts {
            return LinkPoll::GaveUp;
        }
        self.retries += 1;
        LinkPoll::Retry(self.policy.interval)
    }

    pub fn checks(&self) -> u32 {
        self.checks
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn reset(&mut self) {
        self.retries = 0;
        self.checks = 0;
    }
}
