//! Circuit breaker state machine.
//!
//! # States
//! - Closed: attempts pass through, failures are counted
//! - Open: attempts are rejected; a recovery probe may be scheduled
//! - HalfOpen: exactly one probe attempt is admitted
//!
//! # State Transitions
//! ```text
//! Closed → Open: fail_count > threshold
//! HalfOpen → Open: any probe failure
//! Open → HalfOpen: recovery timer fires (same epoch only)
//! Closed/HalfOpen → Closed: attempt admitted in the current state succeeds
//! ```
//!
//! # Design Decisions
//! - Pure: every transition returns the effects to run instead of running them
//! - The caller owns locking and executes effects after releasing the lock
//! - Every state change starts a new epoch; timers and outcomes from an older
//!   epoch never transition the breaker

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use serde::Serialize;

/// Current breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens after the breaker trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePolicy {
    /// Never probe again: the first trip is permanent.
    Never,
    /// Allow this many failed probes before giving up.
    Limited(NonZeroU32),
    /// Keep probing forever.
    Unlimited,
}

impl ProbePolicy {
    /// Whether another probe may be scheduled after `failed_probes` failures.
    pub fn can_probe(&self, failed_probes: u32) -> bool {
        match self {
            ProbePolicy::Never => false,
            ProbePolicy::Limited(limit) => failed_probes < limit.get(),
            ProbePolicy::Unlimited => true,
        }
    }

    /// The signed form used in configuration: 0, positive limit, or negative.
    pub fn as_threshold(&self) -> i64 {
        match self {
            ProbePolicy::Never => 0,
            ProbePolicy::Limited(limit) => i64::from(limit.get()),
            ProbePolicy::Unlimited => -1,
        }
    }
}

impl From<i32> for ProbePolicy {
    fn from(threshold: i32) -> Self {
        if threshold < 0 {
            return ProbePolicy::Unlimited;
        }
        match NonZeroU32::new(threshold.unsigned_abs()) {
            Some(limit) => ProbePolicy::Limited(limit),
            None => ProbePolicy::Never,
        }
    }
}

/// Immutable breaker policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Failures tolerated in Closed; the next one trips the breaker.
    pub threshold: u32,
    /// Wait in Open before the recovery probe.
    pub timeout: Duration,
    pub probe: ProbePolicy,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 1,
            timeout: Duration::from_secs(1),
            probe: ProbePolicy::Never,
        }
    }
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Effect {
    /// Move to HalfOpen after `after`, if still in `epoch`.
    ScheduleProbe { epoch: u64, after: Duration },
    /// Drop any pending probe timer.
    CancelProbe,
    /// The breaker tripped.
    Opened { fail_count: u32, failed_probes: u32 },
    /// The breaker will never probe again.
    GaveUp { failed_probes: u32 },
    /// The breaker moved to a new state.
    Entered(BreakerState),
}

/// Proof of admission, stamped with the epoch it was issued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ticket(u64);

/// Counters and state of one breaker. Not synchronized.
#[derive(Debug, Clone)]
pub(crate) struct BreakerCore {
    config: BreakerConfig,
    state: BreakerState,
    fail_count: u32,
    failed_half_open_count: u32,
    running: bool,
    exhausted: bool,
    probe_in_flight: bool,
    epoch: u64,
    last_failure: Option<String>,
}

impl BreakerCore {
    pub(crate) fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            fail_count: 0,
            failed_half_open_count: 0,
            running: true,
            exhausted: false,
            probe_in_flight: false,
            epoch: 0,
            last_failure: None,
        }
    }

    pub(crate) fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub(crate) fn state(&self) -> BreakerState {
        self.state
    }

    pub(crate) fn fail_count(&self) -> u32 {
        self.fail_count
    }

    pub(crate) fn failed_half_open_count(&self) -> u32 {
        self.failed_half_open_count
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    /// Whether an attempt would be admitted right now.
    pub(crate) fn can_admit(&self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => !self.probe_in_flight,
            BreakerState::Open => false,
        }
    }

    /// A retry loop should wait: still running, but nothing is admitted.
    pub(crate) fn should_wait(&self) -> bool {
        self.running && !self.can_admit()
    }

    /// Admission check. In HalfOpen this claims the single probe slot.
    ///
    /// The returned ticket ties the outcome to the state it was admitted in.
    pub(crate) fn admit(&mut self) -> Option<Ticket> {
        if !self.can_admit() {
            return None;
        }
        if self.state == BreakerState::HalfOpen {
            self.probe_in_flight = true;
        }
        Some(Ticket(self.epoch))
    }

    /// Start a new retry run on this breaker. An exhausted breaker stays stopped.
    pub(crate) fn arm(&mut self) {
        if !self.exhausted {
            self.running = true;
        }
    }

    /// Whether `ticket` was issued in the current state.
    fn is_current(&self, ticket: Ticket) -> bool {
        ticket.0 == self.epoch
    }

    /// An admitted attempt succeeded.
    ///
    /// A success admitted before the breaker last changed state closes nothing.
    pub(crate) fn on_success(&mut self, ticket: Ticket) -> Vec<Effect> {
        if !self.is_current(ticket) {
            return Vec::new();
        }
        let effects = self.enter(BreakerState::Closed);
        self.running = false;
        effects
    }

    /// An admitted attempt failed.
    ///
    /// A failure admitted before the breaker last changed state is only counted.
    pub(crate) fn on_failure(&mut self, ticket: Ticket, failure: String) -> Vec<Effect> {
        self.last_failure = Some(failure);
        if !self.is_current(ticket) {
            self.fail_count = self.fail_count.saturating_add(1);
            return Vec::new();
        }
        match self.state {
            BreakerState::Closed => {
                self.fail_count = self.fail_count.saturating_add(1);
                if self.fail_count > self.config.threshold {
                    self.enter(BreakerState::Open)
                } else {
                    Vec::new()
                }
            }
            BreakerState::HalfOpen => {
                self.failed_half_open_count = self.failed_half_open_count.saturating_add(1);
                self.enter(BreakerState::Open)
            }
            // Nothing is admitted while Open.
            BreakerState::Open => {
                self.fail_count = self.fail_count.saturating_add(1);
                Vec::new()
            }
        }
    }

    /// An admitted attempt ended without reporting an outcome (panic or
    /// dropped future). Frees the probe slot so another caller can probe.
    pub(crate) fn on_abandoned(&mut self, ticket: Ticket) {
        if self.state == BreakerState::HalfOpen && self.is_current(ticket) {
            self.probe_in_flight = false;
        }
    }

    /// The recovery timer scheduled for `epoch` fired.
    pub(crate) fn on_probe_timer(&mut self, epoch: u64) -> Vec<Effect> {
        if self.state == BreakerState::Open && self.epoch == epoch {
            self.enter(BreakerState::HalfOpen)
        } else {
            Vec::new()
        }
    }

    /// Force Closed regardless of the current state. Outstanding tickets go stale.
    pub(crate) fn reset(&mut self) -> Vec<Effect> {
        let mut effects = self.enter(BreakerState::Closed);
        self.epoch = self.epoch.wrapping_add(1);
        if !effects.contains(&Effect::CancelProbe) {
            effects.push(Effect::CancelProbe);
        }
        effects
    }

    /// The single state setter. Every transition goes through here.
    fn enter(&mut self, next: BreakerState) -> Vec<Effect> {
        let previous = self.state;
        self.state = next;
        if previous != next {
            self.epoch = self.epoch.wrapping_add(1);
        }
        let mut effects = Vec::new();

        match next {
            BreakerState::Closed => {
                self.fail_count = 0;
                self.failed_half_open_count = 0;
                self.running = true;
                self.exhausted = false;
                self.probe_in_flight = false;
                if previous == BreakerState::Open {
                    effects.push(Effect::CancelProbe);
                }
            }
            BreakerState::Open => {
                self.probe_in_flight = false;
                effects.push(Effect::Opened {
                    fail_count: self.fail_count,
                    failed_probes: self.failed_half_open_count,
                });
                if self.config.probe.can_probe(self.failed_half_open_count) {
                    effects.push(Effect::ScheduleProbe {
                        epoch: self.epoch,
                        after: self.config.timeout,
                    });
                } else {
                    self.running = false;
                    self.exhausted = true;
                    effects.push(Effect::GaveUp {
                        failed_probes: self.failed_half_open_count,
                    });
                }
            }
            BreakerState::HalfOpen => {
                self.probe_in_flight = false;
            }
        }

        if previous != next {
            effects.push(Effect::Entered(next));
        }
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core(threshold: u32, probe: i32) -> BreakerCore {
        BreakerCore::new(BreakerConfig {
            threshold,
            timeout: Duration::from_millis(50),
            probe: ProbePolicy::from(probe),
        })
    }

    fn admit(core: &mut BreakerCore) -> Ticket {
        match core.admit() {
            Some(ticket) => ticket,
            None => panic!("attempt should be admitted in {}", core.state()),
        }
    }

    fn fail(core: &mut BreakerCore) -> Vec<Effect> {
        let ticket = admit(core);
        core.on_failure(ticket, "boom".to_string())
    }

    #[test]
    fn test_probe_policy_from_threshold() {
        assert_eq!(ProbePolicy::from(0), ProbePolicy::Never);
        assert_eq!(ProbePolicy::from(-5), ProbePolicy::Unlimited);
        assert_eq!(ProbePolicy::from(3).as_threshold(), 3);
        assert!(ProbePolicy::from(2).can_probe(1));
        assert!(!ProbePolicy::from(2).can_probe(2));
        assert!(ProbePolicy::Unlimited.can_probe(u32::MAX));
        assert!(!ProbePolicy::Never.can_probe(0));
    }

    #[test]
    fn test_trips_only_after_exceeding_threshold() {
        let mut core = core(2, -1);

        assert!(fail(&mut core).is_empty());
        assert!(fail(&mut core).is_empty());
        assert_eq!(core.state(), BreakerState::Closed);

        let effects = fail(&mut core);
        assert_eq!(core.state(), BreakerState::Open);
        assert_eq!(core.fail_count(), 3);
        assert!(effects.contains(&Effect::ScheduleProbe {
            epoch: 1,
            after: Duration::from_millis(50)
        }));
        assert!(effects.contains(&Effect::Entered(BreakerState::Open)));
        assert!(core.is_running());
    }

    #[test]
    fn test_never_probe_gives_up_on_first_trip() {
        let mut core = core(1, 0);
        fail(&mut core);
        let effects = fail(&mut core);

        assert_eq!(core.state(), BreakerState::Open);
        assert!(effects.contains(&Effect::GaveUp { failed_probes: 0 }));
        assert!(!effects.iter().any(|e| matches!(e, Effect::ScheduleProbe { .. })));
        assert!(!core.is_running());
        assert!(core.is_exhausted());
        assert!(core.admit().is_none());
    }

    #[test]
    fn test_half_open_failure_trips_immediately() {
        let mut core = core(5, 3);
        for _ in 0..6 {
            fail(&mut core);
        }
        assert_eq!(core.state(), BreakerState::Open);

        core.on_probe_timer(core.epoch());
        assert_eq!(core.state(), BreakerState::HalfOpen);

        fail(&mut core);
        assert_eq!(core.state(), BreakerState::Open);
        assert_eq!(core.failed_half_open_count(), 1);
    }

    #[test]
    fn test_limited_probes_give_up_after_exactly_k_failures() {
        let mut core = core(1, 2);
        fail(&mut core);
        fail(&mut core);

        core.on_probe_timer(core.epoch());
        let effects = fail(&mut core);
        assert!(effects.iter().any(|e| matches!(e, Effect::ScheduleProbe { .. })));
        assert!(core.is_running());

        core.on_probe_timer(core.epoch());
        let effects = fail(&mut core);
        assert!(effects.contains(&Effect::GaveUp { failed_probes: 2 }));
        assert!(!core.is_running());
    }

    #[test]
    fn test_half_open_admits_a_single_probe() {
        let mut core = core(0, -1);
        fail(&mut core);
        core.on_probe_timer(core.epoch());

        let probe = admit(&mut core);
        assert!(core.admit().is_none());
        assert!(core.should_wait());

        core.on_success(probe);
        assert_eq!(core.state(), BreakerState::Closed);
        assert!(core.admit().is_some());
    }

    #[test]
    fn test_abandoned_probe_frees_the_slot() {
        let mut core = core(0, -1);
        fail(&mut core);
        core.on_probe_timer(core.epoch());

        let probe = admit(&mut core);
        assert!(!core.can_admit());
        core.on_abandoned(probe);
        assert!(core.can_admit());
        assert_eq!(core.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn test_stale_timer_is_ignored() {
        let mut core = core(0, -1);
        fail(&mut core);
        let stale = core.epoch();

        core.on_probe_timer(stale);
        fail(&mut core);
        assert_eq!(core.state(), BreakerState::Open);

        assert!(core.on_probe_timer(stale).is_empty());
        assert_eq!(core.state(), BreakerState::Open);

        core.on_probe_timer(core.epoch());
        assert_eq!(core.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn test_success_closes_and_stops_running() {
        let mut core = core(0, -1);
        fail(&mut core);
        core.on_probe_timer(core.epoch());
        let probe = admit(&mut core);

        let effects = core.on_success(probe);
        assert!(effects.contains(&Effect::Entered(BreakerState::Closed)));
        assert_eq!(core.fail_count(), 0);
        assert_eq!(core.failed_half_open_count(), 0);
        assert!(!core.is_running());

        core.arm();
        assert!(core.is_running());
    }

    #[test]
    fn test_reset_revives_exhausted_breaker() {
        let mut core = core(0, 0);
        fail(&mut core);
        assert!(core.is_exhausted());

        core.arm();
        assert!(!core.is_running());

        let effects = core.reset();
        assert!(effects.contains(&Effect::CancelProbe));
        assert_eq!(core.state(), BreakerState::Closed);
        assert!(core.is_running());
        assert!(!core.is_exhausted());
    }

    #[test]
    fn test_failure_recorded_while_open_does_not_transition() {
        let mut core = core(0, -1);
        let first = admit(&mut core);
        let second = admit(&mut core);

        core.on_failure(first, "first".into());
        let epoch = core.epoch();
        let effects = core.on_failure(second, "second".into());

        assert!(effects.is_empty());
        assert_eq!(core.epoch(), epoch);
        assert_eq!(core.last_failure(), Some("second"));
    }

    #[test]
    fn test_success_admitted_before_exhaustion_does_not_revive() {
        let mut core = core(1, 0);
        let slow = admit(&mut core);

        fail(&mut core);
        fail(&mut core);
        assert!(core.is_exhausted());

        assert!(core.on_success(slow).is_empty());
        assert_eq!(core.state(), BreakerState::Open);
        assert!(core.is_exhausted());
        assert!(!core.is_running());
        assert!(core.admit().is_none());
    }

    #[test]
    fn test_failure_admitted_while_closed_is_not_a_failed_probe() {
        let mut core = core(0, 1);
        let slow = admit(&mut core);

        fail(&mut core);
        core.on_probe_timer(core.epoch());
        let probe = admit(&mut core);

        assert!(core.on_failure(slow, "late".into()).is_empty());
        assert_eq!(core.state(), BreakerState::HalfOpen);
        assert_eq!(core.failed_half_open_count(), 0);
        assert!(!core.can_admit());

        core.on_abandoned(slow);
        assert!(!core.can_admit());

        core.on_success(probe);
        assert_eq!(core.state(), BreakerState::Closed);
    }

    #[test]
    fn test_reset_makes_outstanding_tickets_stale() {
        let mut core = core(5, -1);
        let before = admit(&mut core);
        core.reset();

        core.on_failure(before, "late".into());
        assert_eq!(core.state(), BreakerState::Closed);
        assert!(core.on_success(before).is_empty());
        assert!(core.is_running());
    }
}
