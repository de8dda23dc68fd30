//! Delayed task scheduling for breaker recovery probes.
//!
//! # Responsibilities
//! - Run a callback after a delay without blocking the caller
//! - Hand back a handle that cancels the callback when dropped
//!
//! # Design Decisions
//! - Tokio timer when a runtime is available, a dedicated thread otherwise
//! - Cancellation is best effort: a callback that already started runs to completion

use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::runtime::Handle;

/// A callback run once the delay elapses.
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Schedules delayed callbacks.
pub trait Timer: Send + Sync + fmt::Debug {
    /// Run `task` after `after`. Dropping the returned handle cancels it.
    fn schedule(&self, after: Duration, task: TimerTask) -> ScheduledTask;
}

/// Handle to a scheduled callback. Cancels on drop.
#[must_use = "dropping a ScheduledTask cancels it"]
pub struct ScheduledTask {
    cancel: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl ScheduledTask {
    /// Wrap a cancellation routine.
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to cancel.
    pub fn inert() -> Self {
        Self { cancel: None }
    }

    /// Cancel the callback if it has not started yet.
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// Runs each callback on its own short-lived thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadTimer;

impl Timer for ThreadTimer {
    fn schedule(&self, after: Duration, task: TimerTask) -> ScheduledTask {
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();

        let spawned = thread::Builder::new()
            .name("breaker-probe".to_string())
            .spawn(move || {
                // A send or a dropped sender both mean cancelled.
                if let Err(mpsc::RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(after) {
                    task();
                }
            });

        match spawned {
            Ok(_) => ScheduledTask::new(move || drop(cancel_tx)),
            Err(e) => {
                tracing::error!(error = %e, "Failed to spawn recovery probe thread");
                ScheduledTask::inert()
            }
        }
    }
}

/// Runs callbacks as tasks on a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioTimer {
    handle: Handle,
}

impl TokioTimer {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime of the calling context, if any.
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl Timer for TokioTimer {
    fn schedule(&self, after: Duration, task: TimerTask) -> ScheduledTask {
        let join = self.handle.spawn(async move {
            tokio::time::sleep(after).await;
            task();
        });
        ScheduledTask::new(move || join.abort())
    }
}

/// Tokio timer inside a runtime, thread timer outside of one.
pub fn default_timer() -> Arc<dyn Timer> {
    match TokioTimer::try_current() {
        Some(timer) => Arc::new(timer),
        None => Arc::new(ThreadTimer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_thread_timer_fires() {
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();

        let _task = ThreadTimer.schedule(
            Duration::from_millis(20),
            Box::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );

        thread::sleep(Duration::from_millis(200));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_thread_timer_cancelled_on_drop() {
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();

        let task = ThreadTimer.schedule(
            Duration::from_millis(50),
            Box::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );
        drop(task);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tokio_timer_cancel() {
        let timer = TokioTimer::try_current().expect("inside runtime");
        let fired = Arc::new(AtomicU32::new(0));

        let f = fired.clone();
        let kept = timer.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let f = fired.clone();
        let cancelled = timer.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                f.fetch_add(10, Ordering::SeqCst);
            }),
        );
        cancelled.cancel();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        drop(kept);
    }

    #[test]
    fn test_default_timer_outside_runtime() {
        let timer = default_timer();
        assert!(format!("{:?}", timer).contains("ThreadTimer"));
    }
}
