//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! resilience subsystem produces:
//!     → logging.rs (structured log events, one span per retry run)
//!     → metrics.rs (attempt, transition, handler and cache counters)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every retry run carries a UUID run id in its span
//! - Metrics are cheap and a no-op until an exporter is installed

pub mod logging;
pub mod metrics;
