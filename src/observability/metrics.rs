//! Metrics collection and exposition.
//!
//! # Metrics
//! - `retry_attempts_total` (counter): attempts by breaker and outcome
//! - `retry_breaker_transitions_total` (counter): state changes by breaker and state
//! - `retry_handler_invocations_total` (counter): recovered failures by breaker
//! - `retry_cache_lookups_total` (counter): cache hits and misses
//! - `retry_cache_entries` (gauge): results currently cached, by cache
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Labels stay low-cardinality: breaker and cache names, never run ids

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::BreakerState;

/// Install the Prometheus exporter with an HTTP scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Outcome of one breaker attempt.
pub fn record_attempt(breaker: &str, outcome: &'static str) {
    counter!("retry_attempts_total", "breaker" => breaker.to_string(), "outcome" => outcome)
        .increment(1);
}

pub fn record_transition(breaker: &str, state: BreakerState) {
    counter!(
        "retry_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "state" => state.as_str()
    )
    .increment(1);
}

pub fn record_handler_invoked(breaker: &str) {
    counter!("retry_handler_invocations_total", "breaker" => breaker.to_string()).increment(1);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("retry_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_size(cache: &str, size: usize) {
    gauge!("retry_cache_entries", "cache" => cache.to_string()).set(size as f64);
}
