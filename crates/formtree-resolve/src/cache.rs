//! Raw-node resolution cache
//!
//! TTL-bounded cache of raw node payloads keyed by node id. Injectable:
//! owned by whoever drives resolution (the reconciliation engine), never a
//! process-wide singleton. Optimistic injection synthesizes view entries
//! from whatever this cache still holds.

use formtree_graph::NodeId;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Cache sizing and expiry
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum cached payloads
    pub capacity: u64,
    /// Time to live per entry
    pub ttl: Duration,
}

impl CacheConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With capacity
    #[inline]
    #[must_use]
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// With time to live
    #[inline]
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl: Duration::from_secs(30),
        }
    }
}

/// TTL cache of raw node payloads by id
#[derive(Debug, Clone)]
pub struct ResolutionCache {
    inner: Cache<NodeId, Value>,
}

impl ResolutionCache {
    /// Cache with the given configuration
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(config.capacity)
                .time_to_live(config.ttl)
                .build(),
        }
    }

    /// Cached payload for `id`
    #[inline]
    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<Value> {
        self.inner.get(id)
    }

    /// Cache a payload for `id`
    #[inline]
    pub fn insert(&self, id: NodeId, payload: Value) {
        self.inner.insert(id, payload);
    }

    /// Drop the entry for `id`
    #[inline]
    pub fn evict(&self, id: &NodeId) {
        self.inner.invalidate(id);
    }
}

impl Default for ResolutionCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
