//! Run-once result cache.
//!
//! # Responsibilities
//! - Remember the result of an identified retry sequence
//! - Answer "has this logical operation already completed"
//!
//! # Design Decisions
//! - Explicit instances, shared by cloning; there is no process-wide cache
//! - Anonymous runs (no id or an empty id) are never stored
//! - Storing twice under one id is an error, never a silent overwrite
//! - The entry gauge is labelled by cache name, one series per cache

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::observability::metrics;
use crate::resilience::error::CacheError;

static NEXT_CACHE: AtomicU64 = AtomicU64::new(1);

/// A thread-safe map from run id to result. Clones share the same entries.
pub struct ResultCache<T> {
    name: Arc<str>,
    inner: Arc<DashMap<String, T>>,
}

/// Normalize an optional id: empty ids count as absent.
fn key(id: Option<&str>) -> Option<&str> {
    id.filter(|id| !id.is_empty())
}

impl<T> ResultCache<T> {
    /// Create a new empty cache with a generated name.
    pub fn new() -> Self {
        Self::named(format!("cache-{}", NEXT_CACHE.fetch_add(1, Ordering::Relaxed)))
    }

    /// Create a new empty cache. `name` labels its metrics.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            inner: Arc::new(DashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if `id` is absent or empty, or nothing is stored for it yet.
    pub fn can_run(&self, id: Option<&str>) -> bool {
        match key(id) {
            Some(id) => !self.inner.contains_key(id),
            None => true,
        }
    }

    /// Store `value` under `id`. Anonymous runs are accepted and not stored.
    pub fn add_result(&self, id: Option<&str>, value: T) -> Result<(), CacheError> {
        let Some(id) = key(id) else {
            return Ok(());
        };

        match self.inner.entry(id.to_string()) {
            Entry::Occupied(_) => Err(CacheError::DuplicateKey(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(value);
                metrics::record_cache_size(&self.name, self.inner.len());
                Ok(())
            }
        }
    }

    /// Drop the result stored under `id`, returning it.
    pub fn remove_result(&self, id: &str) -> Option<T> {
        let removed = self.inner.remove(id).map(|(_, value)| value);
        if removed.is_some() {
            metrics::record_cache_size(&self.name, self.inner.len());
        }
        removed
    }

    /// Drop every stored result.
    pub fn clear_results(&self) {
        self.inner.clear();
        metrics::record_cache_size(&self.name, 0);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<T: Clone> ResultCache<T> {
    /// The stored result, or `None` when nothing is stored (or `id` is anonymous).
    pub fn get_result(&self, id: Option<&str>) -> Option<T> {
        let id = key(id)?;
        self.inner.get(id).map(|r| r.value().clone())
    }
}

impl<T> Default for ResultCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ResultCache<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ResultCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache")
            .field("name", &self.name)
            .field("entries", &self.inner.len())
            .finish()
    }
}
