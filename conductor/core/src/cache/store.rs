//! Response Store
//!
//! Four keyspaces sharing one entry budget and one TTL. Lookups take the
//! shared lock and record hits through atomics; inserts, sweeps and eviction
//! take the exclusive lock.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::keys::{CacheKey, CacheableRequest, CachedResponse};
use crate::config::CacheConfig;
use crate::models::Modality;
use crate::monitor::Counter;

/// Share of capacity removed by one eviction pass
pub const EVICTION_FRACTION: usize = 10;

/// Expiry used when `now + ttl` does not fit in an `Instant`
const FOREVER_SECS: u64 = 100 * 365 * 24 * 3600;

/// A stored response and its bookkeeping
#[derive(Debug)]
pub struct CacheEntry {
    /// The stored response
    pub response: CachedResponse,
    /// When the entry was written
    pub created_at: Instant,
    /// When the entry stops being served
    pub expires_at: Instant,
    hits: AtomicU64,
    /// Milliseconds after `created_at` of the latest hit, 0 if never hit
    last_hit_ms: AtomicU64,
}

impl CacheEntry {
    fn new(response: CachedResponse, now: Instant, ttl: Duration) -> Self {
        Self {
            response,
            created_at: now,
            expires_at: now
                .checked_add(ttl)
                .unwrap_or_else(|| now + Duration::from_secs(FOREVER_SECS)),
            hits: AtomicU64::new(0),
            last_hit_ms: AtomicU64::new(0),
        }
    }

    /// Whether the entry may no longer be served
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn touch(&self, now: Instant) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        let elapsed = now.saturating_duration_since(self.created_at).as_millis();
        self.last_hit_ms
            .store(u64::try_from(elapsed).unwrap_or(u64::MAX).max(1), Ordering::Relaxed);
    }

    /// Times this entry was served
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// When this entry was last served
    #[must_use]
    pub fn last_hit(&self) -> Option<Instant> {
        match self.last_hit_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(self.created_at + Duration::from_millis(ms)),
        }
    }
}

/// Read-only cache statistics
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups
    pub requests: u64,
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that found nothing servable
    pub misses: u64,
    /// Entries removed to stay within capacity
    pub evictions: u64,
    /// Entries removed by the expiry sweep
    pub expired: u64,
    /// Entries currently held
    pub entries: usize,
    /// Entry budget
    pub capacity: usize,
}

impl CacheStats {
    /// `hits / requests`, 0 before the first lookup
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.requests as f64
        }
    }

    /// Export as Prometheus text format
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        let families: [(&str, &str, f64); 6] = [
            ("cache_requests_total", "counter", self.requests as f64),
            ("cache_hits_total", "counter", self.hits as f64),
            ("cache_misses_total", "counter", self.misses as f64),
            ("cache_evictions_total", "counter", self.evictions as f64),
            ("cache_entries", "gauge", self.entries as f64),
            ("cache_hit_rate", "gauge", self.hit_rate()),
        ];
        for (name, kind, value) in families {
            let _ = writeln!(output, "# TYPE {name} {kind}\n{name} {value}");
        }
        output
    }
}

/// Content-addressed response cache
pub struct ResponseCache {
    capacity: usize,
    ttl: Duration,
    keyspaces: RwLock<HashMap<Modality, HashMap<CacheKey, CacheEntry>>>,
    requests: Counter,
    hits: Counter,
    misses: Counter,
    evictions: Counter,
    expired: Counter,
}

impl ResponseCache {
    /// Create a cache from configuration
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_ttl(config.capacity, config.ttl())
    }

    /// Create a cache with an explicit capacity and TTL
    #[must_use]
    pub fn with_ttl(capacity: usize, ttl: Duration) -> Self {
        let keyspaces: HashMap<Modality, HashMap<CacheKey, CacheEntry>> = Modality::CACHED
            .iter()
            .map(|m| (*m, HashMap::new()))
            .collect();
        Self {
            capacity: capacity.max(1),
            ttl,
            keyspaces: RwLock::new(keyspaces),
            requests: Counter::new(),
            hits: Counter::new(),
            misses: Counter::new(),
            evictions: Counter::new(),
            expired: Counter::new(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached response for a request, if present and unexpired
    pub fn get<R: CacheableRequest>(&self, request: &R) -> Option<R::Cached> {
        let Some(key) = request.cache_key() else {
            self.requests.inc();
            self.misses.inc();
            return None;
        };
        self.get_by_key(request.keyspace(), &key)
            .and_then(|cached| R::unwrap_cached(&cached))
    }

    /// Store a response for a request
    ///
    /// Returns `false` if the request could not be keyed.
    pub fn set<R: CacheableRequest>(&self, request: &R, response: R::Cached) -> bool {
        match request.cache_key() {
            Some(key) => {
                self.insert(request.keyspace(), key, R::wrap(response));
                true
            }
            None => false,
        }
    }

    /// Keyed lookup
    pub fn get_by_key(&self, keyspace: Modality, key: &CacheKey) -> Option<CachedResponse> {
        self.requests.inc();
        let now = Instant::now();
        let keyspaces = self.keyspaces.read();
        let hit = keyspaces
            .get(&keyspace)
            .and_then(|entries| entries.get(key))
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| {
                entry.touch(now);
                entry.response.clone()
            });
        drop(keyspaces);

        if hit.is_some() {
            self.hits.inc();
            debug!(keyspace = %keyspace, key = %key, "Cache hit");
        } else {
            self.misses.inc();
            debug!(keyspace = %keyspace, key = %key, "Cache miss");
        }
        hit
    }

    /// Keyed insert; evicts if the total exceeds capacity afterwards
    pub fn insert(&self, keyspace: Modality, key: CacheKey, response: CachedResponse) {
        let now = Instant::now();
        let mut keyspaces = self.keyspaces.write();
        keyspaces
            .entry(keyspace)
            .or_default()
            .insert(key, CacheEntry::new(response, now, self.ttl));

        let total: usize = keyspaces.values().map(HashMap::len).sum();
        if total > self.capacity {
            let evicted = Self::evict_oldest(&mut keyspaces, self.capacity);
            self.evictions.add(evicted as u64);
            debug!(evicted, total, capacity = self.capacity, "Cache eviction");
        }
    }

    /// Remove the oldest `max(1, capacity / 10)` entries across every keyspace
    ///
    /// Age is creation time, not last hit.
    fn evict_oldest(
        keyspaces: &mut HashMap<Modality, HashMap<CacheKey, CacheEntry>>,
        capacity: usize,
    ) -> usize {
        let mut by_age: Vec<(Instant, Modality, CacheKey)> = keyspaces
            .iter()
            .flat_map(|(modality, entries)| {
                entries
                    .iter()
                    .map(move |(key, entry)| (entry.created_at, *modality, key.clone()))
            })
            .collect();
        by_age.sort_by_key(|(created_at, _, _)| *created_at);

        let quota = (capacity / EVICTION_FRACTION).max(1);
        let mut evicted = 0;
        for (_, modality, key) in by_age.into_iter().take(quota) {
            if let Some(entries) = keyspaces.get_mut(&modality) {
                if entries.remove(&key).is_some() {
                    evicted += 1;
                }
            }
        }
        evicted
    }

    /// Remove every expired entry; returns how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        let mut keyspaces = self.keyspaces.write();
        for entries in keyspaces.values_mut() {
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired(now));
            removed += before - entries.len();
        }
        drop(keyspaces);

        if removed > 0 {
            self.expired.add(removed as u64);
            debug!(removed, "Removed expired cache entries");
        }
        removed
    }

    /// Drop every entry in every keyspace
    pub fn clear_cache(&self) {
        let mut keyspaces = self.keyspaces.write();
        let cleared: usize = keyspaces.values().map(HashMap::len).sum();
        for entries in keyspaces.values_mut() {
            entries.clear();
        }
        drop(keyspaces);
        info!(cleared, "Response cache cleared");
    }

    /// Entries across all keyspaces
    #[must_use]
    pub fn len(&self) -> usize {
        self.keyspaces.read().values().map(HashMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries in one keyspace
    #[must_use]
    pub fn keyspace_len(&self, keyspace: Modality) -> usize {
        self.keyspaces.read().get(&keyspace).map_or(0, HashMap::len)
    }

    /// Hit count of one entry
    #[must_use]
    pub fn entry_hits(&self, keyspace: Modality, key: &CacheKey) -> Option<u64> {
        self.keyspaces
            .read()
            .get(&keyspace)
            .and_then(|entries| entries.get(key))
            .map(CacheEntry::hits)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            requests: self.requests.get(),
            hits: self.hits.get(),
            misses: self.misses.get(),
            evictions: self.evictions.get(),
            expired: self.expired.get(),
            entries: self.len(),
            capacity: self.capacity,
        }
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}
