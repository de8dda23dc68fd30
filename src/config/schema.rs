//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files and
//! default every field, so an empty file is a valid config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::{Backoff, ProbePolicy, RetryPolicy};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Retry and circuit breaker policy.
    pub retry: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Failures tolerated before the breaker trips (at least 1).
    pub max_tries: u32,

    /// Wait in Open before the recovery probe, in milliseconds.
    pub delay_ms: u64,

    /// 0 = never probe, N > 0 = give up after N failed probes, negative = probe forever.
    pub half_open_threshold: i32,

    /// Base pause after a handled failure in milliseconds (0 disables backoff).
    pub backoff_base_ms: u64,

    /// Maximum backoff pause in milliseconds.
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_tries: 3,
            delay_ms: 1000,
            half_open_threshold: 0,
            backoff_base_ms: 0,
            backoff_max_ms: 2000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_tries: self.max_tries,
            delay: Duration::from_millis(self.delay_ms),
            probe: ProbePolicy::from(self.half_open_threshold),
            backoff: Backoff::new(self.backoff_base_ms, self.backoff_max_ms),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
