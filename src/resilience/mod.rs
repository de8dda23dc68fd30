//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! RetryExecutor::run(operation, handlers, id):
//!     → cache.rs (identified run already completed? return stored result)
//!     → circuit_breaker.rs (admit attempt, count failures, trip)
//!         → state.rs (pure transitions and their effects)
//!         → timer.rs (recovery probe after the Open timeout)
//!     → failure.rs (route failure to handler by exact kind, or propagate)
//!     → backoff.rs (optional pause between handled failures)
//!     → cache.rs (store genuine success under id)
//! ```
//!
//! # Design Decisions
//! - Each breaker is process-local; nothing is coordinated across instances
//! - Breakers and caches are explicit values; callers share them by cloning
//! - The open-circuit signal is internal; callers see a value or their own failure

pub mod backoff;
pub mod cache;
pub mod circuit_breaker;
pub mod error;
pub mod failure;
pub mod retries;
pub mod state;
pub mod timer;

pub use backoff::Backoff;
pub use cache::ResultCache;
pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker};
pub use error::{AttemptError, CacheError};
pub use failure::{Failure, Handler, HandlerTable};
pub use retries::{RetryExecutor, RetryPolicy};
pub use state::{BreakerConfig, BreakerState, ProbePolicy};
pub use timer::{default_timer, ScheduledTask, ThreadTimer, Timer, TimerTask, TokioTimer};
