//! Circuit breaker guarding a fallible operation.
//!
//! # States
//! - Closed: normal operation, attempts pass through
//! - Open: operation assumed broken, attempts fail fast
//! - Half-Open: testing if the operation recovered
//!
//! # Design Decisions
//! - One mutex per breaker guards state, counters and the pending probe
//! - The operation itself never runs under the lock
//! - Transition effects (timers, logs, metrics) run after the lock is released
//! - The recovery probe timer is owned by the breaker and dies with it

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;

use crate::observability::metrics;
use crate::resilience::error::AttemptError;
use crate::resilience::state::{BreakerConfig, BreakerCore, BreakerState, Effect, Ticket};
use crate::resilience::timer::{default_timer, ScheduledTask, Timer};

struct Inner {
    core: BreakerCore,
    probe: Option<ScheduledTask>,
}

struct Shared {
    name: String,
    inner: Mutex<Inner>,
    /// Wakes blocked retry loops on every transition.
    changed: Condvar,
    /// Same, for async retry loops.
    notify: Notify,
    timer: Arc<dyn Timer>,
}

/// Point-in-time view of a breaker, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub fail_count: u32,
    pub failed_half_open_count: u32,
    pub running: bool,
    pub exhausted: bool,
    pub last_failure: Option<String>,
}

/// A thread-safe circuit breaker. Clones share the same state.
#[derive(Clone)]
pub struct CircuitBreaker {
    shared: Arc<Shared>,
}

impl CircuitBreaker {
    /// Create a breaker using the default timer for the calling context.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_timer(name, config, default_timer())
    }

    /// Create a breaker that schedules recovery probes on `timer`.
    pub fn with_timer(name: impl Into<String>, config: BreakerConfig, timer: Arc<dyn Timer>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                inner: Mutex::new(Inner {
                    core: BreakerCore::new(config),
                    probe: None,
                }),
                changed: Condvar::new(),
                notify: Notify::new(),
                timer,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> BreakerConfig {
        *self.lock().core.config()
    }

    pub fn state(&self) -> BreakerState {
        self.lock().core.state()
    }

    /// False once an attempt succeeded or the breaker gave up for good.
    pub fn is_running(&self) -> bool {
        self.lock().core.is_running()
    }

    pub fn last_failure(&self) -> Option<String> {
        self.lock().core.last_failure().map(str::to_string)
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.shared.name.clone(),
            state: inner.core.state(),
            fail_count: inner.core.fail_count(),
            failed_half_open_count: inner.core.failed_half_open_count(),
            running: inner.core.is_running(),
            exhausted: inner.core.is_exhausted(),
            last_failure: inner.core.last_failure().map(str::to_string),
        }
    }

    /// Run `operation` if the breaker admits it.
    ///
    /// Fails with [`AttemptError::OpenCircuit`] without invoking the operation
    /// while Open. Operation failures are returned unchanged inside
    /// [`AttemptError::Operation`] after being counted.
    pub fn attempt<T, E, F>(&self, operation: F) -> Result<T, AttemptError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        let admission = match self.admit() {
            Some(admission) => admission,
            None => return Err(AttemptError::OpenCircuit),
        };
        let outcome = operation();
        admission.settle(outcome)
    }

    /// Async form of [`attempt`](Self::attempt). The lock is never held across an await.
    ///
    /// Dropping the returned future mid-operation releases a half-open probe slot.
    pub async fn attempt_async<T, E, F, Fut>(&self, operation: F) -> Result<T, AttemptError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let admission = match self.admit() {
            Some(admission) => admission,
            None => return Err(AttemptError::OpenCircuit),
        };
        let outcome = operation().await;
        admission.settle(outcome)
    }

    /// Force the breaker Closed and clear its counters, cancelling any pending probe.
    pub fn reset(&self) {
        tracing::info!(breaker = %self.shared.name, "Circuit breaker reset");
        self.transition(BreakerCore::reset);
    }

    /// Start a retry run on this breaker.
    pub(crate) fn arm(&self) {
        self.lock().core.arm();
    }

    /// Block until an attempt could be admitted, the breaker stops running, or `max` elapses.
    pub(crate) fn wait_for_admission(&self, max: Duration) {
        let guard = self.lock();
        let _ = self
            .shared
            .changed
            .wait_timeout_while(guard, max, |inner| inner.core.should_wait())
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Async form of [`wait_for_admission`](Self::wait_for_admission).
    pub(crate) async fn wait_for_admission_async(&self, max: Duration) {
        let notified = self.shared.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let waiting = self.lock().core.should_wait();
        if !waiting {
            return;
        }
        let _ = tokio::time::timeout(max, notified).await;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self) -> Option<Admission<'_>> {
        let ticket = self.lock().core.admit();
        match ticket {
            Some(ticket) => Some(Admission {
                breaker: self,
                ticket,
                settled: false,
            }),
            None => {
                metrics::record_attempt(&self.shared.name, "rejected");
                None
            }
        }
    }

    /// Apply one state change under the lock, then run its effects outside it.
    fn transition<F>(&self, change: F)
    where
        F: FnOnce(&mut BreakerCore) -> Vec<Effect>,
    {
        let (effects, cancelled) = {
            let mut inner = self.lock();
            let effects = change(&mut inner.core);
            let cancelled = if effects.contains(&Effect::CancelProbe) {
                inner.probe.take()
            } else {
                None
            };
            (effects, cancelled)
        };
        drop(cancelled);
        self.run_effects(effects);
    }

    fn run_effects(&self, effects: Vec<Effect>) {
        let name = &self.shared.name;
        for effect in effects {
            match effect {
                Effect::ScheduleProbe { epoch, after } => self.schedule_probe(epoch, after),
                Effect::CancelProbe => {}
                Effect::Opened { fail_count, failed_probes } => {
                    tracing::warn!(
                        breaker = %name,
                        fail_count,
                        failed_probes,
                        "Circuit breaker opened"
                    );
                }
                Effect::GaveUp { failed_probes } => {
                    tracing::error!(
                        breaker = %name,
                        failed_probes,
                        "Circuit breaker gave up, no further probes"
                    );
                }
                Effect::Entered(state) => {
                    tracing::debug!(breaker = %name, state = %state, "Circuit breaker state changed");
                    metrics::record_transition(name, state);
                }
            }
        }
        self.shared.changed.notify_all();
        self.shared.notify.notify_waiters();
    }

    fn schedule_probe(&self, epoch: u64, after: Duration) {
        let weak = Arc::downgrade(&self.shared);
        let task = self.shared.timer.schedule(
            after,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    let breaker = CircuitBreaker { shared };
                    breaker.transition(|core| core.on_probe_timer(epoch));
                }
            }),
        );

        // The timer may already have fired, or the breaker moved on meanwhile.
        let replaced = {
            let mut inner = self.lock();
            if inner.core.state() == BreakerState::Open && inner.core.epoch() == epoch {
                inner.probe.replace(task)
            } else {
                Some(task)
            }
        };
        drop(replaced);
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// An admitted attempt that has not reported its outcome yet.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    ticket: Ticket,
    settled: bool,
}

impl Admission<'_> {
    fn settle<T, E: fmt::Display>(mut self, outcome: Result<T, E>) -> Result<T, AttemptError<E>> {
        self.settled = true;
        let breaker = self.breaker;
        let ticket = self.ticket;
        match outcome {
            Ok(value) => {
                metrics::record_attempt(&breaker.shared.name, "success");
                breaker.transition(move |core| core.on_success(ticket));
                Ok(value)
            }
            Err(failure) => {
                tracing::debug!(breaker = %breaker.shared.name, error = %failure, "Attempt failed");
                metrics::record_attempt(&breaker.shared.name, "failure");
                let text = failure.to_string();
                breaker.transition(move |core| core.on_failure(ticket, text));
                Err(AttemptError::Operation(failure))
            }
        }
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(breaker = %self.breaker.shared.name, "Attempt abandoned before completing");
            let ticket = self.ticket;
            self.breaker.transition(move |core| {
                core.on_abandoned(ticket);
                Vec::new()
            });
        }
    }
}
