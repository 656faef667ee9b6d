//! Two-tier query result cache.
//!
//! - **Hot tier**: small LRU for cheap or frequently repeated queries.
//! - **Cold tier**: larger LRU whose entries also expire after a TTL.
//!
//! A cold entry that is read `promotion_threshold` times moves to the hot
//! tier. Results whose JSON form exceeds `compress_threshold` bytes are kept
//! zlib-compressed and inflated on every read.
//!
//! The cache never fails a query: a poisoned lock or an entry that no longer
//! decodes is logged and treated as a miss.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use cpgq_core::{defaults, QueryResult};

/// zlib level used for large results.
const COMPRESSION_LEVEL: u32 = 6;

/// Cache key for an already-formatted query.
pub fn cache_key(formatted_query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(formatted_query.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cache sizing and policy.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Hot tier capacity.
    pub hot_size: usize,
    /// Cold tier capacity.
    pub cold_size: usize,
    /// Cold tier time-to-live.
    pub ttl: Duration,
    /// Serialized size (bytes) above which values are compressed.
    pub compress_threshold: usize,
    /// Cold hits that promote an entry to the hot tier.
    pub promotion_threshold: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hot_size: defaults::CACHE_HOT_SIZE,
            cold_size: defaults::CACHE_COLD_SIZE,
            ttl: Duration::from_secs(defaults::CACHE_TTL_SECS),
            compress_threshold: defaults::CACHE_COMPRESS_THRESHOLD,
            promotion_threshold: defaults::CACHE_PROMOTION_THRESHOLD,
        }
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hot_hits: u64,
    pub cold_hits: u64,
    pub misses: u64,
    pub promotions: u64,
    /// Entries currently stored compressed.
    pub compressed: usize,
    pub hot_size: usize,
    pub cold_size: usize,
    pub total_size: usize,
    /// `hits / (hits + misses) * 100`, 0 before the first lookup.
    pub hit_rate: f64,
}

#[derive(Debug, Clone)]
enum Stored {
    Plain(QueryResult),
    Compressed(Vec<u8>),
}

impl Stored {
    fn encode(value: QueryResult, threshold: usize) -> Self {
        let serialized = match serde_json::to_vec(&value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Cache value not serializable, storing uncompressed");
                return Stored::Plain(value);
            }
        };
        if serialized.len() <= threshold {
            return Stored::Plain(value);
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(COMPRESSION_LEVEL));
        match encoder.write_all(&serialized).and_then(|_| encoder.finish()) {
            Ok(bytes) => {
                debug!(
                    original = serialized.len(),
                    compressed = bytes.len(),
                    "Compressed cache value"
                );
                Stored::Compressed(bytes)
            }
            Err(e) => {
                warn!(error = %e, "Compression failed, storing uncompressed");
                Stored::Plain(value)
            }
        }
    }

    fn decode(&self) -> Result<QueryResult, String> {
        match self {
            Stored::Plain(value) => Ok(value.clone()),
            Stored::Compressed(bytes) => {
                let mut inflated = Vec::new();
                ZlibDecoder::new(bytes.as_slice())
                    .read_to_end(&mut inflated)
                    .map_err(|e| e.to_string())?;
                serde_json::from_slice(&inflated).map_err(|e| e.to_string())
            }
        }
    }

    fn is_compressed(&self) -> bool {
        matches!(self, Stored::Compressed(_))
    }
}

struct ColdEntry {
    value: Stored,
    stored_at: Instant,
}

#[derive(Default)]
struct Counters {
    hot_hits: u64,
    cold_hits: u64,
    misses: u64,
    promotions: u64,
}

struct CacheState {
    hot: LruCache<String, Stored>,
    cold: LruCache<String, ColdEntry>,
    /// Reads per cold key since it was stored.
    access_counts: HashMap<String, u32>,
    counters: Counters,
}

/// Hot/cold result cache. All state sits behind one lock so `clear()` and
/// `stats()` observe a consistent picture.
pub struct HybridCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl Default for HybridCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl HybridCache {
    /// Create a cache with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        let hot_size = NonZeroUsize::new(config.hot_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        let cold_size = NonZeroUsize::new(config.cold_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                hot: LruCache::new(hot_size),
                cold: LruCache::new(cold_size),
                access_counts: HashMap::new(),
                counters: Counters::default(),
            }),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> Option<MutexGuard<'_, CacheState>> {
        match self.state.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!("Cache lock poisoned, treating as miss");
                None
            }
        }
    }

    /// Look up `key`, hot tier first.
    pub fn get(&self, key: &str) -> Option<QueryResult> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        if let Some(decoded) = state.hot.get(key).map(Stored::decode) {
            return match decoded {
                Ok(value) => {
                    state.counters.hot_hits += 1;
                    Some(value)
                }
                Err(e) => {
                    warn!(cache_key = %key, error = %e, "Dropping undecodable hot entry");
                    state.hot.pop(key);
                    state.counters.misses += 1;
                    None
                }
            };
        }

        let expired = state
            .cold
            .peek(key)
            .map(|entry| entry.stored_at.elapsed() > self.config.ttl);

        match expired {
            Some(true) => {
                debug!(cache_key = %key, "Cold entry expired");
                state.cold.pop(key);
                state.access_counts.remove(key);
            }
            Some(false) => {
                let decoded = state.cold.get(key).map(|entry| entry.value.decode());
                match decoded {
                    Some(Ok(value)) => {
                        state.counters.cold_hits += 1;
                        self.note_cold_access(state, key);
                        return Some(value);
                    }
                    Some(Err(e)) => {
                        warn!(cache_key = %key, error = %e, "Dropping undecodable cold entry");
                        state.cold.pop(key);
                        state.access_counts.remove(key);
                    }
                    None => {}
                }
            }
            None => {}
        }

        state.counters.misses += 1;
        None
    }

    /// Count a cold read and promote once the threshold is reached.
    fn note_cold_access(&self, state: &mut CacheState, key: &str) {
        let count = state.access_counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        if *count < self.config.promotion_threshold {
            return;
        }

        state.access_counts.remove(key);
        if let Some(entry) = state.cold.pop(key) {
            state.hot.put(key.to_string(), entry.value);
            state.counters.promotions += 1;
            debug!(cache_key = %key, "Cache key promoted to hot");
        }
    }

    /// Store `value` under `key` in the hot or cold tier.
    pub fn set(&self, key: &str, value: QueryResult, hot: bool) {
        // Serialize and compress before taking the lock
        let stored = Stored::encode(value, self.config.compress_threshold);

        let Some(mut guard) = self.lock() else {
            return;
        };
        let state = &mut *guard;

        state.access_counts.remove(key);
        if hot {
            state.cold.pop(key);
            state.hot.put(key.to_string(), stored);
        } else {
            state.hot.pop(key);
            let entry = ColdEntry {
                value: stored,
                stored_at: Instant::now(),
            };
            if let Some((evicted, _)) = state.cold.push(key.to_string(), entry) {
                if evicted != key {
                    state.access_counts.remove(&evicted);
                }
            }
        }
    }

    /// Remove every entry and reset all counters.
    pub fn clear(&self) {
        let Some(mut state) = self.lock() else {
            return;
        };
        state.hot.clear();
        state.cold.clear();
        state.access_counts.clear();
        state.counters = Counters::default();
        info!("Query cache cleared");
    }

    /// Entries across both tiers.
    pub fn len(&self) -> usize {
        self.lock()
            .map(|state| state.hot.len() + state.cold.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of sizes and hit counters.
    pub fn stats(&self) -> CacheStats {
        let Some(state) = self.lock() else {
            return CacheStats::default();
        };

        let hits = state.counters.hot_hits + state.counters.cold_hits;
        let lookups = hits + state.counters.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64 * 100.0
        };

        let compressed = state.hot.iter().filter(|(_, v)| v.is_compressed()).count()
            + state
                .cold
                .iter()
                .filter(|(_, e)| e.value.is_compressed())
                .count();

        CacheStats {
            hot_hits: state.counters.hot_hits,
            cold_hits: state.counters.cold_hits,
            misses: state.counters.misses,
            promotions: state.counters.promotions,
            compressed,
            hot_size: state.hot.len(),
            cold_size: state.cold.len(),
            total_size: state.hot.len() + state.cold.len(),
            hit_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache() -> HybridCache {
        HybridCache::new(CacheConfig {
            hot_size: 2,
            cold_size: 3,
            ttl: Duration::from_secs(60),
            compress_threshold: 64,
            promotion_threshold: 3,
        })
    }

    #[test]
    fn test_cache_key_is_stable_hex() {
        let key = cache_key("cpg.method.toJson");
        assert_eq!(key.len(), 64);
        assert_eq!(key, cache_key("cpg.method.toJson"));
        assert_ne!(key, cache_key("cpg.call.toJson"));
    }

    #[test]
    fn test_miss_on_empty_cache() {
        let cache = small_cache();
        assert!(cache.get("k").is_none());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[test]
    fn test_hot_set_and_get() {
        let cache = small_cache();
        cache.set("k", QueryResult::success("v"), true);
        assert_eq!(cache.get("k"), Some(QueryResult::success("v")));
        let stats = cache.stats();
        assert_eq!(stats.hot_hits, 1);
        assert_eq!(stats.hot_size, 1);
        assert_eq!(stats.cold_size, 0);
        assert_eq!(stats.hit_rate, 100.0);
    }

    #[test]
    fn test_cold_entry_promoted_after_threshold() {
        let cache = small_cache();
        cache.set("k", QueryResult::success("v"), false);

        cache.get("k");
        cache.get("k");
        assert_eq!(cache.stats().promotions, 0);
        assert_eq!(cache.stats().cold_size, 1);

        cache.get("k");
        let stats = cache.stats();
        assert_eq!(stats.promotions, 1);
        assert_eq!(stats.cold_hits, 3);
        assert_eq!(stats.hot_size, 1);
        assert_eq!(stats.cold_size, 0);

        // Subsequent reads are hot hits and never promote again
        cache.get("k");
        let stats = cache.stats();
        assert_eq!(stats.hot_hits, 1);
        assert_eq!(stats.promotions, 1);
    }

    #[test]
    fn test_set_resets_access_count() {
        let cache = small_cache();
        cache.set("k", QueryResult::success("v1"), false);
        cache.get("k");
        cache.get("k");
        cache.set("k", QueryResult::success("v2"), false);
        cache.get("k");
        assert_eq!(cache.stats().promotions, 0);
        assert_eq!(cache.get("k"), Some(QueryResult::success("v2")));
    }

    #[test]
    fn test_entry_never_in_both_tiers() {
        let cache = small_cache();
        cache.set("k", QueryResult::success("cold"), false);
        cache.set("k", QueryResult::success("hot"), true);
        let stats = cache.stats();
        assert_eq!(stats.total_size, 1);
        assert_eq!(stats.hot_size, 1);

        cache.set("k", QueryResult::success("cold again"), false);
        let stats = cache.stats();
        assert_eq!(stats.total_size, 1);
        assert_eq!(stats.cold_size, 1);
        assert_eq!(cache.get("k"), Some(QueryResult::success("cold again")));
    }

    #[test]
    fn test_hot_tier_evicts_least_recently_used() {
        let cache = small_cache();
        cache.set("a", QueryResult::success("a"), true);
        cache.set("b", QueryResult::success("b"), true);
        cache.get("a");
        cache.set("c", QueryResult::success("c"), true);

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().hot_size, 2);
    }

    #[test]
    fn test_cold_tier_capacity() {
        let cache = small_cache();
        for key in ["a", "b", "c", "d"] {
            cache.set(key, QueryResult::success(key), false);
        }
        assert_eq!(cache.stats().cold_size, 3);
        assert!(cache.get("a").is_none());
        assert!(cache.get("d").is_some());
    }

    #[test]
    fn test_cold_entry_expires_after_ttl() {
        let cache = HybridCache::new(CacheConfig {
            ttl: Duration::from_millis(20),
            ..CacheConfig::default()
        });
        cache.set("k", QueryResult::success("v"), false);
        std::thread::sleep(Duration::from_millis(40));

        assert!(cache.get("k").is_none());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.cold_size, 0);
    }

    #[test]
    fn test_large_values_are_compressed_transparently() {
        let cache = small_cache();
        let payload = "[{\"name\":\"main\"}]".repeat(50);
        cache.set("big", QueryResult::success(payload.clone()), false);
        cache.set("small", QueryResult::success("[]"), true);

        assert_eq!(cache.stats().compressed, 1);
        assert_eq!(cache.get("big"), Some(QueryResult::success(payload)));
        assert_eq!(cache.get("small"), Some(QueryResult::success("[]")));
    }

    #[test]
    fn test_compressed_entry_survives_promotion() {
        let cache = small_cache();
        let payload = "x".repeat(500);
        cache.set("big", QueryResult::success(payload.clone()), false);
        for _ in 0..3 {
            cache.get("big");
        }
        let stats = cache.stats();
        assert_eq!(stats.promotions, 1);
        assert_eq!(stats.compressed, 1);
        assert_eq!(cache.get("big"), Some(QueryResult::success(payload)));
    }

    #[test]
    fn test_clear_resets_everything() {
        let cache = small_cache();
        cache.set("a", QueryResult::success("a"), true);
        cache.set("b", QueryResult::success("b"), false);
        cache.get("a");
        cache.get("missing");

        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn test_hit_rate() {
        let cache = small_cache();
        cache.set("k", QueryResult::success("v"), true);
        cache.get("k");
        cache.get("k");
        cache.get("k");
        cache.get("other");
        assert_eq!(cache.stats().hit_rate, 75.0);
    }
}
