//! Retry execution.
//!
//! # Responsibilities
//! - Short-circuit identified runs that already completed
//! - Drive attempts through a circuit breaker until it stops running
//! - Route failures to recovery handlers by exact kind
//! - Cache the result of a genuine success
//!
//! # Design Decisions
//! - Open-circuit rejections never reach the caller; the loop waits for the probe
//! - An unhandled failure ends the run at once and is returned untouched
//! - Handler results are substitutes, not successes: they are never cached
//! - The async form only detaches on cancellation; an in-flight attempt finishes

use std::future::Future;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::observability::metrics;
use crate::resilience::backoff::Backoff;
use crate::resilience::cache::ResultCache;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::error::{AttemptError, CacheError};
use crate::resilience::failure::{Failure, HandlerTable};
use crate::resilience::state::{BreakerConfig, ProbePolicy};
use crate::resilience::timer::{default_timer, ThreadTimer, Timer};

/// Extra wait on top of the breaker timeout before re-checking admission.
const ADMISSION_SLACK: Duration = Duration::from_millis(50);

/// How a retry run is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failures tolerated before the breaker trips (at least 1).
    pub max_tries: u32,
    /// Wait in Open before probing again.
    pub delay: Duration,
    pub probe: ProbePolicy,
    /// Pause after each handled failure.
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_tries: u32, delay: Duration, probe: impl Into<ProbePolicy>) -> Self {
        Self {
            max_tries,
            delay,
            probe: probe.into(),
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Breaker settings for one run of this policy.
    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            threshold: self.max_tries.max(1),
            timeout: self.delay,
            probe: self.probe,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), ProbePolicy::Never)
    }
}

/// Runs operations under a retry policy, a circuit breaker and a result cache.
#[derive(Clone)]
pub struct RetryExecutor<T> {
    name: String,
    policy: RetryPolicy,
    cache: ResultCache<T>,
    breaker: Option<CircuitBreaker>,
}

impl<T: Clone> RetryExecutor<T> {
    /// A fresh breaker is built for every run.
    pub fn new(policy: RetryPolicy, cache: ResultCache<T>) -> Self {
        Self {
            name: "retry".to_string(),
            policy,
            cache,
            breaker: None,
        }
    }

    /// Name used for breakers, log fields and metric labels.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Share one breaker, and its failure budget, across every run.
    ///
    /// The breaker's own config and timer then take precedence over the
    /// policy's `max_tries`, `delay` and `probe`. A breaker built with
    /// [`CircuitBreaker::new`] on a current-thread runtime should only be
    /// driven through [`run_async`](Self::run_async).
    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn cache(&self) -> &ResultCache<T> {
        &self.cache
    }

    pub fn breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    /// Run `operation` until it succeeds, the breaker stops, or a failure goes unhandled.
    ///
    /// Returns `Ok(Some(_))` with the success or the last handler substitute,
    /// `Ok(None)` when the breaker stopped before anything produced a value,
    /// and `Err(e)` with the unhandled failure exactly as the operation raised it.
    ///
    /// Blocks the calling thread while waiting for recovery probes, which are
    /// timed on their own thread so this also completes inside a tokio runtime.
    pub fn run<E, F>(
        &self,
        mut operation: F,
        handlers: &HandlerTable<T, E>,
        id: Option<&str>,
    ) -> Result<Option<T>, E>
    where
        E: Failure,
        F: FnMut() -> Result<T, E>,
    {
        let span = self.span(id);
        let _enter = span.enter();

        if let Some(cached) = self.cached(id) {
            return Ok(Some(cached));
        }

        let breaker = self.breaker_for_run(Arc::new(ThreadTimer));
        let wait = breaker.config().timeout.saturating_add(ADMISSION_SLACK);
        let mut result = None;
        let mut handled = 0u32;

        while breaker.is_running() {
            match breaker.attempt(&mut operation) {
                Ok(value) => return Ok(Some(self.complete(id, value, handled))),
                Err(AttemptError::OpenCircuit) => breaker.wait_for_admission(wait),
                Err(AttemptError::Operation(failure)) => {
                    result = Some(self.recover(failure, handlers)?);
                    handled += 1;
                    let pause = self.policy.backoff.delay(handled);
                    if !pause.is_zero() && breaker.is_running() {
                        thread::sleep(pause);
                    }
                }
            }
        }

        self.stopped(&breaker, result.is_some());
        Ok(result)
    }

    /// Like [`run`](Self::run), but falls back to `T::default()` when nothing produced a value.
    pub fn run_or_default<E, F>(
        &self,
        operation: F,
        handlers: &HandlerTable<T, E>,
        id: Option<&str>,
    ) -> Result<T, E>
    where
        T: Default,
        E: Failure,
        F: FnMut() -> Result<T, E>,
    {
        self.run(operation, handlers, id)
            .map(Option::unwrap_or_default)
    }

    /// Async form of [`run`](Self::run): waits and pauses without blocking the thread.
    pub async fn run_async<E, F, Fut>(
        &self,
        mut operation: F,
        handlers: &HandlerTable<T, E>,
        id: Option<&str>,
    ) -> Result<Option<T>, E>
    where
        E: Failure,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let span = self.span(id);

        async move {
            if let Some(cached) = self.cached(id) {
                return Ok(Some(cached));
            }

            let breaker = self.breaker_for_run(default_timer());
            let wait = breaker.config().timeout.saturating_add(ADMISSION_SLACK);
            let mut result = None;
            let mut handled = 0u32;

            while breaker.is_running() {
                match breaker.attempt_async(&mut operation).await {
                    Ok(value) => return Ok(Some(self.complete(id, value, handled))),
                    Err(AttemptError::OpenCircuit) => breaker.wait_for_admission_async(wait).await,
                    Err(AttemptError::Operation(failure)) => {
                        result = Some(self.recover(failure, handlers)?);
                        handled += 1;
                        let pause = self.policy.backoff.delay(handled);
                        if !pause.is_zero() && breaker.is_running() {
                            tokio::time::sleep(pause).await;
                        }
                    }
                }
            }

            self.stopped(&breaker, result.is_some());
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Run [`run_async`](Self::run_async) on a background task.
    ///
    /// Dropping the handle detaches the task: the run keeps going and its
    /// result (and cache entry) is still produced, just never observed.
    pub fn spawn<E, F, Fut>(
        &self,
        operation: F,
        handlers: HandlerTable<T, E>,
        id: Option<String>,
    ) -> JoinHandle<Result<Option<T>, E>>
    where
        T: Send + Sync + 'static,
        E: Failure + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let executor = self.clone();
        tokio::spawn(async move { executor.run_async(operation, &handlers, id.as_deref()).await })
    }

    fn span(&self, id: Option<&str>) -> tracing::Span {
        tracing::info_span!(
            "retry",
            run_id = %Uuid::new_v4(),
            breaker = %self.name,
            id = id.unwrap_or_default()
        )
    }

    fn cached(&self, id: Option<&str>) -> Option<T> {
        if self.cache.can_run(id) {
            if id.is_some_and(|id| !id.is_empty()) {
                metrics::record_cache_lookup(false);
            }
            return None;
        }
        let cached = self.cache.get_result(id);
        metrics::record_cache_lookup(cached.is_some());
        if cached.is_some() {
            tracing::info!("Returning cached result, operation not executed");
        }
        cached
    }

    /// The shared breaker, re-armed, or a fresh one timing probes on `timer`.
    fn breaker_for_run(&self, timer: Arc<dyn Timer>) -> CircuitBreaker {
        match &self.breaker {
            Some(shared) => {
                shared.arm();
                shared.clone()
            }
            None => CircuitBreaker::with_timer(self.name.clone(), self.policy.breaker_config(), timer),
        }
    }

    fn recover<E: Failure>(&self, failure: E, handlers: &HandlerTable<T, E>) -> Result<T, E> {
        let kind = failure.kind();
        match handlers.dispatch(failure) {
            Ok(substitute) => {
                tracing::debug!(kind = ?kind, "Failure recovered by handler");
                metrics::record_handler_invoked(&self.name);
                Ok(substitute)
            }
            Err(failure) => {
                tracing::warn!(kind = ?kind, error = %failure, "Unhandled failure, abandoning run");
                Err(failure)
            }
        }
    }

    /// Cache a genuine success. A racing run that cached first wins.
    fn complete(&self, id: Option<&str>, value: T, handled: u32) -> T {
        tracing::info!(handled_failures = handled, "Operation succeeded");
        match self.cache.add_result(id, value.clone()) {
            Ok(()) => value,
            Err(CacheError::DuplicateKey(key)) => {
                tracing::debug!(id = %key, "Result already cached by a concurrent run");
                self.cache.get_result(id).unwrap_or(value)
            }
        }
    }

    fn stopped(&self, breaker: &CircuitBreaker, has_value: bool) {
        if has_value {
            tracing::info!(state = %breaker.state(), "Retry loop stopped, returning handler result");
        } else {
            tracing::warn!(state = %breaker.state(), "Retry loop stopped without producing a value");
        }
    }
}

impl<T> std::fmt::Debug for RetryExecutor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("cache", &self.cache)
            .field("breaker", &self.breaker)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn timed_out() -> io::Error {
        io::Error::new(io::ErrorKind::TimedOut, "timed out")
    }

    #[test]
    fn test_policy_breaker_config() {
        let config = RetryPolicy::new(0, Duration::from_millis(5), -1).breaker_config();
        assert_eq!(config.threshold, 1);
        assert_eq!(config.timeout, Duration::from_millis(5));
        assert_eq!(config.probe, ProbePolicy::Unlimited);
    }

    #[test]
    fn test_success_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let executor = RetryExecutor::new(RetryPolicy::new(5, Duration::from_millis(10), 0), ResultCache::new());
        let handlers = HandlerTable::<i32, io::Error>::new().on(io::ErrorKind::TimedOut, |_| -1);

        let result = executor.run(
            || {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(timed_out())
                } else {
                    Ok(10)
                }
            },
            &handlers,
            Some("job"),
        );

        assert_eq!(result.unwrap(), Some(10));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.cache().get_result(Some("job")), Some(10));
    }

    #[test]
    fn test_handler_result_is_not_cached() {
        let executor = RetryExecutor::new(RetryPolicy::new(1, Duration::from_millis(10), 0), ResultCache::new());
        let handlers = HandlerTable::<i32, io::Error>::new().on(io::ErrorKind::TimedOut, |_| -1);

        let result = executor.run(|| Err(timed_out()), &handlers, Some("job"));

        assert_eq!(result.unwrap(), Some(-1));
        assert!(executor.cache().can_run(Some("job")));
    }

    #[test]
    fn test_exhausted_shared_breaker_yields_nothing() {
        let executor = RetryExecutor::new(RetryPolicy::new(1, Duration::from_millis(10), 0), ResultCache::new());
        let breaker = CircuitBreaker::new("shared", executor.policy().breaker_config());
        let executor = executor.with_breaker(breaker.clone());
        let handlers = HandlerTable::<i32, io::Error>::new().on(io::ErrorKind::TimedOut, |_| -1);

        assert_eq!(executor.run(|| Err(timed_out()), &handlers, None).unwrap(), Some(-1));
        assert!(!breaker.is_running());

        let calls = AtomicU32::new(0);
        let result = executor.run(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            },
            &handlers,
            None,
        );
        assert_eq!(result.unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(executor.run_or_default(|| Ok(1), &handlers, None).unwrap(), 0);

        breaker.reset();
        assert_eq!(executor.run(|| Ok(1), &handlers, None).unwrap(), Some(1));
    }

    #[test]
    fn test_backoff_pauses_between_handled_failures() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10), 0).with_backoff(Backoff::new(20, 100));
        let executor = RetryExecutor::new(policy, ResultCache::new());
        let handlers = HandlerTable::<i32, io::Error>::new().on(io::ErrorKind::TimedOut, |_| 0);

        let started = std::time::Instant::now();
        let _ = executor.run(|| Err(timed_out()), &handlers, None);

        // Pauses after the first and second failure; the third trips the breaker.
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
