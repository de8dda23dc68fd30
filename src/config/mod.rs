//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → SharedConfig (atomic swap, read by each new retry run)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of Arc<AppConfig>
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Runs already in flight keep the policy they started with

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

use std::sync::Arc;

use arc_swap::ArcSwap;

pub use loader::{load_config, ConfigError};
pub use schema::{AppConfig, LogFormat, ObservabilityConfig, RetryConfig};
pub use validation::ValidationError;
pub use watcher::ConfigWatcher;

/// The current configuration, swappable while readers hold older snapshots.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<ArcSwap<AppConfig>>,
}

impl SharedConfig {
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    /// Snapshot of the current config.
    pub fn load(&self) -> Arc<AppConfig> {
        self.inner.load_full()
    }

    pub fn store(&self, config: AppConfig) {
        self.inner.store(Arc::new(config));
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new(AppConfig::default())
    }
}
