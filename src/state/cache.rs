//! Cache invalidation seam for server-derived data.

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;

/// Anything holding data fetched on behalf of the current user.
pub trait CacheInvalidator: Send + Sync {
    /// Drop every cached entry. Called when the session ends.
    fn invalidate_all(&self);
}

/// Invalidator for callers without a cache.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCache;

impl CacheInvalidator for NoopCache {
    fn invalidate_all(&self) {}
}

/// In-memory cache of JSON responses keyed by endpoint.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: Mutex<HashMap<String, Value>>,
}

impl QueryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.lock().insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl CacheInvalidator for QueryCache {
    fn invalidate_all(&self) {
        self.lock().clear();
    }
}
