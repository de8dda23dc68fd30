//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::loader::load_config;
use crate::config::SharedConfig;

/// A watcher that reloads the configuration file into a [`SharedConfig`].
pub struct ConfigWatcher {
    path: PathBuf,
    shared: SharedConfig,
}

impl ConfigWatcher {
    pub fn new(path: &Path, shared: SharedConfig) -> Self {
        Self {
            path: path.to_path_buf(),
            shared,
        }
    }

    /// Reload now. Invalid files leave the current config in place.
    pub fn reload(&self) -> bool {
        reload_into(&self.path, &self.shared)
    }

    /// Start watching the file in a background thread.
    ///
    /// Watching stops when the returned watcher is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let shared = self.shared.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!("Config file change detected, reloading...");
                        reload_into(&path, &shared);
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

fn reload_into(path: &Path, shared: &SharedConfig) -> bool {
    match load_config(path) {
        Ok(config) => {
            tracing::info!(
                max_tries = config.retry.max_tries,
                delay_ms = config.retry.delay_ms,
                half_open_threshold = config.retry.half_open_threshold,
                "Configuration reloaded"
            );
            shared.store(config);
            true
        }
        Err(e) => {
            tracing::error!("Failed to reload config: {}. Keeping current configuration.", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use std::fs;

    #[test]
    fn test_reload_swaps_valid_config_only() {
        let path = std::env::temp_dir().join(format!("circuit-retry-watch-{}.toml", uuid::Uuid::new_v4()));
        let shared = SharedConfig::new(AppConfig::default());
        let watcher = ConfigWatcher::new(&path, shared.clone());

        fs::write(&path, "[retry]\nmax_tries = 9\n").unwrap();
        assert!(watcher.reload());
        assert_eq!(shared.load().retry.max_tries, 9);

        fs::write(&path, "[retry]\nmax_tries = 0\n").unwrap();
        assert!(!watcher.reload());
        assert_eq!(shared.load().retry.max_tries, 9);

        fs::remove_file(&path).unwrap_or_default();
    }
}
