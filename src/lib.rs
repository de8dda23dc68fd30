//! Retry execution behind a circuit breaker, with run-once result caching.

pub mod config;
pub mod observability;
pub mod resilience;

pub use config::schema::AppConfig;
pub use resilience::{
    CircuitBreaker, Failure, HandlerTable, ResultCache, RetryExecutor, RetryPolicy,
};
