//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::AppConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in a config.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("retry.max_tries must be at least 1")]
    ZeroMaxTries,

    #[error("retry.backoff_max_ms ({max}) is below retry.backoff_base_ms ({base})")]
    BackoffRange { base: u64, max: u64 },

    #[error("observability.log_level {0:?} is not one of trace, debug, info, warn, error")]
    UnknownLogLevel(String),

    #[error("observability.metrics_address {0:?} is not a socket address")]
    MetricsAddress(String),
}

/// Check every semantic constraint serde cannot express.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let retry = &config.retry;
    let observability = &config.observability;

    if retry.max_tries == 0 {
        errors.push(ValidationError::ZeroMaxTries);
    }

    if retry.backoff_base_ms > 0 && retry.backoff_max_ms < retry.backoff_base_ms {
        errors.push(ValidationError::BackoffRange {
            base: retry.backoff_base_ms,
            max: retry.backoff_max_ms,
        });
    }

    if !LOG_LEVELS.contains(&observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::UnknownLogLevel(observability.log_level.clone()));
    }

    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(observability.metrics_address.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
