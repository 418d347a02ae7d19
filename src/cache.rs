//! Result cache
//!
//! TTL-bounded cache keyed by a fingerprint of the normalized spec, the
//! operation name and its parameters. Normalization upstream guarantees
//! that equivalent requests fingerprint identically, so chip order or
//! stray whitespace never causes a duplicate entry.
//!
//! Concurrent misses for the same key may each compute; the second insert
//! simply overwrites an identical value. With a refreshed-in-place
//! snapshot that duplication is bounded and harmless.

use std::collections::hash_map::DefaultHasher;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::error::Result;
use crate::filter::FilterSpec;

/// Cache key derived from a normalized spec and operation parameters
///
/// Serializable so task records can hand it back to callers as the
/// handle for fetching the stored result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Fingerprint one operation against one spec
    ///
    /// `params` carries everything beyond the spec that changes the result
    /// (page, sort, bin count); its `Debug` form feeds the hash. Call only
    /// with specs that went through [`FilterSpec::normalized`].
    pub fn compute(spec: &FilterSpec, operation: &str, params: &impl Debug) -> Self {
        let mut hasher = DefaultHasher::new();
        operation.hash(&mut hasher);
        format!("{:?}", spec).hash(&mut hasher);
        format!("{:?}", params).hash(&mut hasher);
        Fingerprint(hasher.finish())
    }

    /// Raw hash value, used in logs
    pub fn value(&self) -> u64 {
        self.0
    }
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    expires_at: Instant,
}

/// TTL cache for computed results
///
/// Values are cloned out, so `V` is expected to be cheap to clone or
/// wrapped in `Arc` by the caller.
pub struct ResultCache<V> {
    entries: DashMap<Fingerprint, Entry<V>>,
    max_entries: usize,
}

impl<V: Clone> ResultCache<V> {
    /// Create a cache honoring the configured entry cap
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: config.max_entries,
        }
    }

    /// Fetch a live entry, ignoring expired ones
    pub fn get(&self, key: Fingerprint) -> Option<V> {
        let entry = self.entries.get(&key)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        Some(entry.value.clone())
    }

    /// Store a value under `key` for `ttl`
    pub fn insert(&self, key: Fingerprint, value: V, ttl: Duration) {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.evict_one();
        }
        let now = Instant::now();
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                expires_at: now + ttl,
            },
        );
    }

    /// Serve from cache or run `compute` and remember its output
    ///
    /// Errors from `compute` pass through uncached, so a transient backing
    /// failure does not poison the key for the TTL.
    pub fn get_or_compute(
        &self,
        key: Fingerprint,
        ttl: Duration,
        compute: impl FnOnce() -> Result<V>,
    ) -> Result<V> {
        if let Some(hit) = self.get(key) {
            tracing::debug!(fingerprint = key.value(), "Cache hit");
            return Ok(hit);
        }
        let value = compute()?;
        self.insert(key, value.clone(), ttl);
        tracing::debug!(fingerprint = key.value(), "Cache fill");
        Ok(value)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    /// Drop everything, e.g. after a snapshot reload
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Live entry count (expired entries linger until touched or swept)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries at all
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // Over-cap insert: prefer an expired victim, else the oldest insert.
    fn evict_one(&self) {
        let now = Instant::now();
        let mut victim: Option<(Fingerprint, Instant)> = None;
        for entry in self.entries.iter() {
            if entry.expires_at <= now {
                victim = Some((*entry.key(), entry.inserted_at));
                break;
            }
            match victim {
                Some((_, oldest)) if entry.inserted_at >= oldest => {}
                _ => victim = Some((*entry.key(), entry.inserted_at)),
            }
        }
        if let Some((key, _)) = victim {
            self.entries.remove(&key);
        }
    }
}
