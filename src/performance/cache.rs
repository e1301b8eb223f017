//! In-memory cache with pluggable eviction.
//!
//! All operations take a single short-lived lock, so a `put` is atomic and
//! the last `put` for a key is the one every later `get` observes.
//!
//! LRU entries live in an [`LruCache`] that keeps recency order. The other
//! policies keep insertion order in an [`IndexMap`]: FIFO evicts its head,
//! LFU and TTL scan for the victim.

use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Rule deciding which entry leaves the cache when it is full or expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Evict the least recently accessed entry.
    Lru,
    /// Evict the least frequently accessed entry, oldest insertion on ties.
    Lfu,
    /// Evict expired entries; when full, evict the entry closest to expiry.
    Ttl,
    /// Evict the oldest insertion regardless of access.
    Fifo,
}

impl EvictionPolicy {
    /// Get the policy name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Ttl => "ttl",
            EvictionPolicy::Fifo => "fifo",
        }
    }
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "ttl" => Ok(EvictionPolicy::Ttl),
            "fifo" => Ok(EvictionPolicy::Fifo),
            _ => Err(format!("Unknown eviction policy: {}", s)),
        }
    }
}

/// A cached value with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached value.
    pub value: V,
    /// When the entry was inserted (or last overwritten).
    pub inserted_at: Instant,
    /// When the entry was last read or written.
    pub last_access: Instant,
    /// Number of reads and writes.
    pub access_count: u64,
    /// Explicit time-to-live, if any.
    pub ttl: Option<Duration>,
}

impl<V> CacheEntry<V> {
    fn expires_at(&self) -> Option<Instant> {
        self.ttl.map(|ttl| self.inserted_at + ttl)
    }

    /// Whether the entry has outlived its TTL at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at().is_some_and(|deadline| now >= deadline)
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
    pub capacity: usize,
}

enum Entries<K: Hash + Eq, V> {
    Recency(LruCache<K, CacheEntry<V>>),
    Ordered(IndexMap<K, CacheEntry<V>>),
}

impl<K: Hash + Eq + Clone, V> Entries<K, V> {
    fn for_policy(policy: EvictionPolicy) -> Self {
        match policy {
            EvictionPolicy::Lru => Entries::Recency(LruCache::unbounded()),
            _ => Entries::Ordered(IndexMap::new()),
        }
    }

    fn peek(&self, key: &K) -> Option<&CacheEntry<V>> {
        match self {
            Entries::Recency(map) => map.peek(key),
            Entries::Ordered(map) => map.get(key),
        }
    }

    /// Mutable access that counts as a use for recency.
    fn touch(&mut self, key: &K) -> Option<&mut CacheEntry<V>> {
        match self {
            Entries::Recency(map) => map.get_mut(key),
            Entries::Ordered(map) => map.get_mut(key),
        }
    }

    fn insert(&mut self, key: K, entry: CacheEntry<V>) {
        match self {
            Entries::Recency(map) => {
                map.put(key, entry);
            }
            Entries::Ordered(map) => {
                map.insert(key, entry);
            }
        }
    }

    fn remove(&mut self, key: &K) {
        match self {
            Entries::Recency(map) => {
                map.pop(key);
            }
            Entries::Ordered(map) => {
                map.shift_remove(key);
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            Entries::Recency(map) => map.len(),
            Entries::Ordered(map) => map.len(),
        }
    }

    fn live_len(&self, now: Instant) -> usize {
        match self {
            Entries::Recency(map) => map.iter().filter(|(_, e)| !e.is_expired(now)).count(),
            Entries::Ordered(map) => map.values().filter(|e| !e.is_expired(now)).count(),
        }
    }

    fn clear(&mut self) {
        match self {
            Entries::Recency(map) => map.clear(),
            Entries::Ordered(map) => map.clear(),
        }
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.len();
        match self {
            Entries::Recency(map) => {
                let expired: Vec<K> = map
                    .iter()
                    .filter(|(_, e)| e.is_expired(now))
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in &expired {
                    map.pop(key);
                }
            }
            Entries::Ordered(map) => map.retain(|_, entry| !entry.is_expired(now)),
        }
        before - self.len()
    }

    /// Remove one entry according to `policy`; false when empty.
    fn evict_one(&mut self, policy: EvictionPolicy) -> bool {
        match self {
            Entries::Recency(map) => map.pop_lru().is_some(),
            Entries::Ordered(map) => {
                let index = match policy {
                    EvictionPolicy::Lfu => map
                        .values()
                        .enumerate()
                        .min_by_key(|(_, e)| e.access_count)
                        .map(|(i, _)| i),
                    // Entries without a TTL sort after every expiring entry.
                    EvictionPolicy::Ttl => map
                        .values()
                        .enumerate()
                        .min_by_key(|(_, e)| (e.expires_at().is_none(), e.expires_at()))
                        .map(|(i, _)| i),
                    EvictionPolicy::Fifo | EvictionPolicy::Lru => (!map.is_empty()).then_some(0),
                };
                index.and_then(|i| map.shift_remove_index(i)).is_some()
            }
        }
    }
}

struct CacheState<K: Hash + Eq, V> {
    entries: Entries<K, V>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

/// Bounded in-memory cache.
pub struct InMemoryCache<K: Hash + Eq, V> {
    state: Mutex<CacheState<K, V>>,
    capacity: usize,
    policy: EvictionPolicy,
    default_ttl: Option<Duration>,
}

impl<K, V> InMemoryCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: Entries::for_policy(policy),
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
            capacity: capacity.max(1),
            policy,
            default_ttl: None,
        }
    }

    /// Apply `ttl` to every `put` that does not carry its own.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Active eviction policy.
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Look up `key`; `None` on a miss or an expired entry.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut state = self.state.lock();

        match state.entries.peek(key).map(|entry| entry.is_expired(now)) {
            Some(true) => {
                state.entries.remove(key);
                state.expirations += 1;
                state.misses += 1;
                None
            }
            Some(false) => {
                state.hits += 1;
                let entry = state.entries.touch(key)?;
                entry.last_access = now;
                entry.access_count += 1;
                Some(entry.value.clone())
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Insert or overwrite `key` using the default TTL.
    pub fn put(&self, key: K, value: V) {
        self.put_with_ttl(key, value, self.default_ttl);
    }

    /// Insert or overwrite `key` with an explicit TTL.
    ///
    /// Overwriting keeps a FIFO entry's original queue position.
    pub fn put_with_ttl(&self, key: K, value: V, ttl: Option<Duration>) {
        let now = Instant::now();
        let mut state = self.state.lock();

        if let Some(entry) = state.entries.touch(&key) {
            entry.value = value;
            entry.inserted_at = now;
            entry.last_access = now;
            entry.access_count += 1;
            entry.ttl = ttl;
            return;
        }

        if state.entries.len() >= self.capacity {
            let expired = state.entries.purge_expired(now);
            state.expirations += expired as u64;
        }
        while state.entries.len() >= self.capacity {
            if !state.entries.evict_one(self.policy) {
                break;
            }
            state.evictions += 1;
        }

        state.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                last_access: now,
                access_count: 1,
                ttl,
            },
        );
    }

    /// Drop every entry; counters are kept.
    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// Fraction of lookups that were hits (0.0 when nothing was looked up).
    pub fn hit_rate(&self) -> f64 {
        let state = self.state.lock();
        let total = state.hits + state.misses;
        if total == 0 {
            0.0
        } else {
            state.hits as f64 / total as f64
        }
    }

    /// Number of unexpired entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.live_len(Instant::now())
    }

    /// Whether the cache holds no unexpired entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of counters; `size` counts unexpired entries.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            expirations: state.expirations,
            size: state.entries.live_len(Instant::now()),
            capacity: self.capacity,
        }
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let mut state = self.state.lock();
        let removed = state.entries.purge_expired(Instant::now());
        state.expirations += removed as u64;
        removed
    }
}

impl<K, V> InMemoryCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Spawn a background task that sweeps expired entries every `interval`.
    ///
    /// The task holds a weak reference and exits once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let removed = cache.sweep_expired();
                if removed > 0 {
                    debug!(removed, policy = %cache.policy, "Cache sweep removed expired entries");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_miss_returns_none() {
        let cache: InMemoryCache<String, i32> = InMemoryCache::new(4, EvictionPolicy::Lru);
        assert_eq!(cache.get(&"missing".to_string()), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_put_overwrites_last_write_wins() {
        let cache = InMemoryCache::new(4, EvictionPolicy::Lru);
        cache.put("k", 1);
        cache.put("k", 2);
        assert_eq!(cache.get(&"k"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lru_evicts_least_recently_accessed() {
        let cache = InMemoryCache::new(2, EvictionPolicy::Lru);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));
        cache.put("c", 3);

        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn test_lfu_evicts_least_frequent_oldest_on_tie() {
        let cache = InMemoryCache::new(3, EvictionPolicy::Lfu);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);
        cache.get(&"a");
        cache.get(&"a");
        cache.get(&"c");
        // b has the fewest accesses
        cache.put("d", 4);
        assert_eq!(cache.get(&"b"), None);

        // c and d now tie with a single extra access each; c is older
        cache.get(&"d");
        cache.put("e", 5);
        assert_eq!(cache.get(&"c"), None);
        assert_eq!(cache.get(&"a"), Some(1));
    }

    #[test]
    fn test_fifo_ignores_access_pattern() {
        let cache = InMemoryCache::new(2, EvictionPolicy::Fifo);
        cache.put("a", 1);
        cache.put("b", 2);
        for _ in 0..5 {
            cache.get(&"a");
        }
        cache.put("c", 3);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn test_ttl_entry_expires_lazily() {
        let cache = InMemoryCache::new(4, EvictionPolicy::Ttl);
        cache.put_with_ttl("short", 1, Some(Duration::from_millis(20)));
        cache.put("forever", 2);
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.get(&"short"), None);
        assert_eq!(cache.get(&"forever"), Some(2));
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_ttl_policy_evicts_soonest_expiry_when_full() {
        let cache = InMemoryCache::new(2, EvictionPolicy::Ttl);
        cache.put_with_ttl("long", 1, Some(Duration::from_secs(60)));
        cache.put_with_ttl("soon", 2, Some(Duration::from_secs(5)));
        cache.put_with_ttl("new", 3, Some(Duration::from_secs(30)));
        assert_eq!(cache.get(&"soon"), None);
        assert_eq!(cache.get(&"long"), Some(1));
    }

    #[test]
    fn test_len_excludes_expired_entries() {
        let cache = InMemoryCache::new(8, EvictionPolicy::Lru);
        cache.put_with_ttl("short", 1, Some(Duration::from_millis(10)));
        cache.put("kept", 2);
        assert_eq!(cache.len(), 2);
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().size, 1);
        // Still physically present until swept.
        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_lru_overwrite_counts_as_use() {
        let cache = InMemoryCache::new(2, EvictionPolicy::Lru);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 10);
        cache.put("c", 3);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_sweep_removes_expired() {
        let cache = InMemoryCache::new(8, EvictionPolicy::Lru)
            .with_default_ttl(Duration::from_millis(10));
        cache.put("a", 1);
        cache.put("b", 2);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.sweep_expired(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_keeps_counters() {
        let cache = InMemoryCache::new(4, EvictionPolicy::Lru);
        cache.put("a", 1);
        cache.get(&"a");
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_lru_round_robin_hit_rate_converges() {
        let cache = InMemoryCache::new(10, EvictionPolicy::Lru);
        for i in 0..1000 {
            let key = i % 10;
            if cache.get(&key).is_none() {
                cache.put(key, key * 2);
            }
        }
        assert!(cache.hit_rate() >= 0.99, "hit rate {}", cache.hit_rate());
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_eviction_policy_from_str() {
        assert_eq!("LRU".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Lru);
        assert_eq!("fifo".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Fifo);
        assert!("random".parse::<EvictionPolicy>().is_err());
    }

    #[tokio::test]
    async fn test_sweeper_task_expires_entries() {
        let cache = Arc::new(
            InMemoryCache::new(8, EvictionPolicy::Ttl).with_default_ttl(Duration::from_millis(10)),
        );
        cache.put("a", 1);
        let handle = cache.spawn_sweeper(Duration::from_millis(15));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.is_empty());
        handle.abort();
    }
}
