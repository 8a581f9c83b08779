//! Per-interface self-search
//!
//! One [`SelfSearch`] drives one port through
//! `Idle -> ProbingLink -> ConfiguringCandidate -> VerifyingReachability`
//! until it either commits a candidate or runs out of options. Candidates are
//! tried strictly in list order and the first one whose probe address answers
//! a single echo request wins.
//!
//! Each call to [`SelfSearch::step`] performs exactly one transition, so the
//! machine can be driven and inspected one state at a time in tests.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::SearchCandidate;
use crate::discovery::link::{LinkPoll, LinkPoller, LinkPolicy};
use crate::discovery::{apply_addressing, release_addressing, Services};
use crate::iface::NetworkInterface;
use crate::platform::InterfaceConfigurator;

pub const DEFAULT_PROBE_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchPolicy {
    pub link: LinkPolicy,
    /// How long one echo request waits for its reply
    pub probe_wait: Duration,
}

impl Default for SearchPolicy {
    fn default() -> Self {
        SearchPolicy {
            link: LinkPolicy::default(),
            probe_wait: DEFAULT_PROBE_WAIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustReason {
    /// Carrier never came up within the retry budget
    LinkDown,
    /// Every candidate was tried without a reply
    CandidatesExhausted,
    /// Committed, but an earlier port already holds the same role
    RoleTaken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Idle,
    ProbingLink,
    ConfiguringCandidate { index: usize },
    VerifyingReachability { index: usize },
    Committed { index: usize },
    Exhausted(ExhaustReason),
}

impl SearchState {
    pub fn is_finished(&self) -> bool {
        matches!(self, SearchState::Committed { .. } | SearchState::Exhausted(_))
    }
}

#[derive(Debug, Clone)]
pub struct SelfSearch {
    state: SearchState,
    policy: SearchPolicy,
    poller: LinkPoller,
    probes_sent: usize,
}

impl SelfSearch {
    pub fn new(policy: SearchPolicy) -> Self {
        SelfSearch {
            state: SearchState::Idle,
            policy,
            poller: LinkPoller::new(policy.link),
            probes_sent: 0,
        }
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    /// Echo requests issued since the last reset.
    pub fn probes_sent(&self) -> usize {
        self.probes_sent
    }

    /// Return to `Idle` so the next run starts over.
    pub fn reset(&mut self) {
        self.state = SearchState::Idle;
        self.poller.reset();
        self.probes_sent = 0;
    }

    /// Give up a committed role to an earlier port, removing the addressing
    /// it applied so the two ports do not share an address.
    pub(crate) fn demote(&mut self, configurator: &dyn InterfaceConfigurator, iface: &mut NetworkInterface) {
        release_addressing(configurator, iface);
        self.state = SearchState::Exhausted(ExhaustReason::RoleTaken);
    }

    /// Run to a terminal state. A finished search is left untouched.
    pub fn run(
        &mut self,
        iface: &mut NetworkInterface,
        candidates: &[SearchCandidate],
        services: Services<'_>,
    ) -> SearchState {
        while !self.state.is_finished() {
            self.step(iface, candidates, services);
        }
        self.state
    }

    /// Perform one transition and return the new state.
    pub fn step(
        &mut self,
        iface: &mut NetworkInterface,
        candidates: &[SearchCandidate],
        services: Services<'_>,
    ) -> SearchState {
        self.state = match self.state {
            SearchState::Idle => {
                debug!(iface = %iface.name, "starting self-search");
                if let Err(e) = services.configurator.set_flags(&iface.name, &iface.flags) {
                    warn!(iface = %iface.name, error = %e, "failed to bring link up");
                }
                self.poller.reset();
                SearchState::ProbingLink
            }
            SearchState::ProbingLink => match self.poller.poll(services.link, &iface.name) {
                LinkPoll::Up => SearchState::ConfiguringCandidate { index: 0 },
                LinkPoll::Retry(interval) => {
                    info!(
                        iface = %iface.name,
                        attempt = self.poller.retries(),
                        max = self.policy.link.max_attempts,
                        "cable not connected, retrying"
                    );
                    services.clock.sleep(interval);
                    SearchState::ProbingLink
                }
                LinkPoll::GaveUp => {
                    warn!(
                        iface = %iface.name,
                        checks = self.poller.checks(),
                        "cable still not connected, skipping interface"
                    );
                    self.exhaust(iface, services, ExhaustReason::LinkDown)
                }
            },
            SearchState::ConfiguringCandidate { index } => match candidates.get(index) {
                None => {
                    warn!(iface = %iface.name, tried = index, "no self-search candidate answered");
                    self.exhaust(iface, services, ExhaustReason::CandidatesExhausted)
                }
                Some(candidate) => {
                    iface.assign(candidate.addressing.clone(), candidate.role);
                    match apply_addressing(services.configurator, iface) {
                        Ok(()) => {
                            debug!(iface = %iface.name, index, addr = ?iface.self_addr(), "candidate applied");
                            SearchState::VerifyingReachability { index }
                        }
                        Err(e) => {
                            warn!(iface = %iface.name, index, error = %e, "candidate could not be applied, skipping");
                            SearchState::ConfiguringCandidate { index: index + 1 }
                        }
                    }
                }
            },
            SearchState::VerifyingReachability { index } => match candidates.get(index) {
                None => self.exhaust(iface, services, ExhaustReason::CandidatesExhausted),
                Some(candidate) => {
                    self.probes_sent += 1;
                    let target = candidate.probe_addr;
                    if services.reachability.probe(&iface.name, target, self.policy.probe_wait) {
                        info!(iface = %iface.name, role = %iface.role, %target, "ping answered, configuration committed");
                        SearchState::Committed { index }
                    } else {
                        debug!(iface = %iface.name, %target, "no reply, trying next candidate");
                        SearchState::ConfiguringCandidate { index: index + 1 }
                    }
                }
            },
            finished => finished,
        };
        self.state
    }

    fn exhaust(&self, iface: &mut NetworkInterface, services: Services<'_>, reason: ExhaustReason) -> SearchState {
        release_addressing(services.configurator, iface);
        SearchState::Exhausted(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::fakes::{FakeClock, RecordingConfigurator, ScriptedLink, ScriptedPinger};
    use crate::iface::{Addressing, Role};
    use std::net::Ipv4Addr;

    fn candidate(last: u8, role: Role) -> SearchCandidate {
        SearchCandidate {
            addressing: Addressing {
                self_addr: Some(Ipv4Addr::new(10, 0, last, 2)),
                dest_addr: Some(Ipv4Addr::new(10, 0, last, 9)),
                gateway: Some(Ipv4Addr::new(10, 0, last, 254)),
                remote_addr: Some(Ipv4Addr::new(172, 16, last, 1)),
                src_port: 5000 + last as u16,
                dst_port: 6000 + last as u16,
                ..Addressing::default()
            },
            probe_addr: Ipv4Addr::new(10, 0, last, 1),
            role,
        }
    }

    fn services<'a>(
        link: &'a ScriptedLink,
        configurator: &'a RecordingConfigurator,
        pinger: &'a ScriptedPinger,
        clock: &'a FakeClock,
    ) -> Services<'a> {
        Services {
            link,
            configurator,
            reachability: pinger,
            clock,
        }
    }

    #[test]
    fn test_second_candidate_commits_after_two_probes() {
        let candidates = vec![
            candidate(1, Role::Source1),
            candidate(2, Role::Tunnel),
            candidate(3, Role::Source3),
        ];
        let link = ScriptedLink::up_after(0);
        let configurator = RecordingConfigurator::default();
        let pinger = ScriptedPinger::reaching(&[candidates[1].probe_addr, candidates[2].probe_addr]);
        let clock = FakeClock::default();
        let mut iface = NetworkInterface::new("eth1");
        let mut search = SelfSearch::new(SearchPolicy::default());

        let state = search.run(&mut iface, &candidates, services(&link, &configurator, &pinger, &clock));

        assert_eq!(state, SearchState::Committed { index: 1 });
        assert_eq!(search.probes_sent(), 2);
        assert_eq!(pinger.probes().len(), 2);
        assert_eq!(iface.role, Role::Tunnel);
        assert_eq!(iface.addressing, candidates[1].addressing);
        assert!(configurator
            .calls_on("eth1")
            .contains(&"gateway 10.0.2.254".to_string()));
        assert!(!configurator.calls_on("eth1").contains(&"addr 10.0.3.2/24".to_string()));
    }

    #[test]
    fn test_steps_follow_state_order() {
        let candidates = vec![candidate(1, Role::Source2)];
        let link = ScriptedLink::up_after(1);
        let configurator = RecordingConfigurator::default();
        let pinger = ScriptedPinger::reaching(&[candidates[0].probe_addr]);
        let clock = FakeClock::default();
        let services = services(&link, &configurator, &pinger, &clock);
        let mut iface = NetworkInterface::new("eth2");
        let mut search = SelfSearch::new(SearchPolicy::default());

        assert_eq!(search.state(), SearchState::Idle);
        assert_eq!(search.step(&mut iface, &candidates, services), SearchState::ProbingLink);
        assert_eq!(search.step(&mut iface, &candidates, services), SearchState::ProbingLink);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(12)]);
        assert_eq!(
            search.step(&mut iface, &candidates, services),
            SearchState::ConfiguringCandidate { index: 0 }
        );
        assert_eq!(
            search.step(&mut iface, &candidates, services),
            SearchState::VerifyingReachability { index: 0 }
        );
        assert_eq!(
            search.step(&mut iface, &candidates, services),
            SearchState::Committed { index: 0 }
        );
        assert_eq!(iface.role, Role::Source2);
    }

    #[test]
    fn test_link_down_exhausts_without_configuring() {
        let candidates = vec![candidate(1, Role::Source1)];
        let link = ScriptedLink::down();
        let configurator = RecordingConfigurator::default();
        let pinger = ScriptedPinger::default();
        let clock = FakeClock::default();
        let mut iface = NetworkInterface::new("eth3");
        let mut search = SelfSearch::new(SearchPolicy::default());

        let state = search.run(&mut iface, &candidates, services(&link, &configurator, &pinger, &clock));

        assert_eq!(state, SearchState::Exhausted(ExhaustReason::LinkDown));
        assert_eq!(clock.total(), Duration::from_secs(60));
        assert!(pinger.probes().is_empty());
        assert_eq!(iface.role, Role::Unassigned);
        assert_eq!(configurator.calls_on("eth3"), vec!["up promisc=false", "flush"]);
    }

    #[test]
    fn test_all_candidates_fail() {
        let candidates = vec![candidate(1, Role::Source1), candidate(2, Role::Source2)];
        let link = ScriptedLink::up_after(0);
        let configurator = RecordingConfigurator::default();
        let pinger = ScriptedPinger::default();
        let clock = FakeClock::default();
        let mut iface = NetworkInterface::new("eth1");
        let mut search = SelfSearch::new(SearchPolicy::default());

        let state = search.run(&mut iface, &candidates, services(&link, &configurator, &pinger, &clock));

        assert_eq!(state, SearchState::Exhausted(ExhaustReason::CandidatesExhausted));
        assert_eq!(search.probes_sent(), 2);
        assert_eq!(iface.role, Role::Unassigned);
        assert_eq!(iface.self_addr(), None);

        // The last candidate's route and address do not outlive the search.
        let calls = configurator.calls_on("eth1");
        assert_eq!(calls[calls.len() - 3..], ["gateway 10.0.2.254", "del gateway", "flush"]);
    }

    #[test]
    fn test_demoted_port_is_left_unconfigured() {
        let candidates = vec![candidate(1, Role::Tunnel)];
        let link = ScriptedLink::up_after(0);
        let configurator = RecordingConfigurator::default();
        let pinger = ScriptedPinger::reaching(&[candidates[0].probe_addr]);
        let clock = FakeClock::default();
        let mut iface = NetworkInterface::new("eth2");
        let mut search = SelfSearch::new(SearchPolicy::default());

        search.run(&mut iface, &candidates, services(&link, &configurator, &pinger, &clock));
        search.demote(&configurator, &mut iface);

        assert_eq!(search.state(), SearchState::Exhausted(ExhaustReason::RoleTaken));
        assert_eq!(iface.role, Role::Unassigned);
        let calls = configurator.calls_on("eth2");
        assert_eq!(calls[calls.len() - 2..], ["del gateway", "flush"]);
    }

    #[test]
    fn test_unappliable_candidate_is_skipped_without_probe() {
        let candidates = vec![candidate(1, Role::Source1), candidate(2, Role::Source3)];
        let link = ScriptedLink::up_after(0);
        let configurator = RecordingConfigurator::rejecting(Ipv4Addr::new(10, 0, 1, 2));
        let pinger = ScriptedPinger::reaching(&[candidates[0].probe_addr, candidates[1].probe_addr]);
        let clock = FakeClock::default();
        let mut iface = NetworkInterface::new("eth1");
        let mut search = SelfSearch::new(SearchPolicy::default());

        let state = search.run(&mut iface, &candidates, services(&link, &configurator, &pinger, &clock));

        assert_eq!(state, SearchState::Committed { index: 1 });
        assert_eq!(pinger.probes(), vec![("eth1".to_string(), candidates[1].probe_addr)]);
        assert_eq!(iface.role, Role::Source3);
    }

    #[test]
    fn test_each_candidate_flushes_previous_addresses() {
        let candidates = vec![candidate(1, Role::Source1), candidate(2, Role::Source2)];
        let link = ScriptedLink::up_after(0);
        let configurator = RecordingConfigurator::default();
        let pinger = ScriptedPinger::reaching(&[candidates[1].probe_addr]);
        let clock = FakeClock::default();
        let mut iface = NetworkInterface::new("eth1");
        let mut search = SelfSearch::new(SearchPolicy::default());

        search.run(&mut iface, &candidates, services(&link, &configurator, &pinger, &clock));

        let calls = configurator.calls_on("eth1");
        let flushes = calls.iter().filter(|call| *call == "flush").count();
        assert_eq!(flushes, 2);
        let second_flush = calls.iter().rposition(|call| call == "flush").unwrap();
        assert_eq!(calls[second_flush + 1], "addr 10.0.2.2/24");
    }

    #[test]
    fn test_committed_search_is_idempotent_until_reset() {
        let candidates = vec![candidate(1, Role::Source1)];
        let link = ScriptedLink::up_after(0);
        let configurator = RecordingConfigurator::default();
        let pinger = ScriptedPinger::reaching(&[candidates[0].probe_addr]);
        let clock = FakeClock::default();
        let services = services(&link, &configurator, &pinger, &clock);
        let mut iface = NetworkInterface::new("eth1");
        let mut search = SelfSearch::new(SearchPolicy::default());

        search.run(&mut iface, &candidates, services);
        let calls = configurator.calls().len();
        assert_eq!(search.run(&mut iface, &candidates, services), SearchState::Committed { index: 0 });
        assert_eq!(pinger.probes().len(), 1);
        assert_eq!(configurator.calls().len(), calls);

        search.reset();
        assert_eq!(search.state(), SearchState::Idle);
        search.run(&mut iface, &candidates, services);
        assert_eq!(pinger.probes().len(), 2);
    }
}
