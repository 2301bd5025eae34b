//! Time-boxed memoization for expensive read-only queries.
//!
//! Entries are valid while `now - stored_at < ttl`. Expired entries are
//! treated as absent and dropped on the lookup that notices them. The table
//! sits behind a single mutex; contention is a handful of UI-driven lookups.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Cache keys for the queries the console memoizes.
pub mod keys {
    pub const MACHINE_LIST: &str = "machine-list";
    pub const DEV_SHELLS: &str = "dev-shells";
    pub const VM_LIST: &str = "vm-list";
    pub const CONTAINERS: &str = "containers";
}

/// Source of "now" for TTL checks. Swappable so tests can simulate time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

pub struct CacheManager<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    clock: Arc<dyn Clock>,
    max_entries: Option<usize>,
}

impl<V: Clone> CacheManager<V> {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            max_entries: None,
        }
    }

    /// Cap the number of stored entries; the oldest-stored entry is evicted
    /// when a new key would exceed the bound. `0` means unbounded.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = (max > 0).then_some(max);
        self
    }

    /// Return the live value for `key`, or `None` on miss or expiry.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => {
                tracing::debug!(key, "cache hit");
                Some(entry.value.clone())
            }
            Some(_) => {
                tracing::debug!(key, "cache entry expired");
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store or overwrite `key`. A zero TTL stores nothing.
    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        let mut entries = self.lock();
        if ttl.is_zero() {
            entries.remove(key);
            return;
        }

        if let Some(max) = self.max_entries
            && !entries.contains_key(key)
            && entries.len() >= max
        {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.stored_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                tracing::debug!(key = %oldest, "evicting oldest cache entry");
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: self.clock.now(),
                ttl,
            },
        );
    }

    /// Force the next `get(key)` to miss.
    pub fn invalidate(&self, key: &str) {
        if self.lock().remove(key).is_some() {
            tracing::debug!(key, "cache entry invalidated");
        }
    }

    /// Drop `base` and every `base:<suffix>` entry.
    pub fn invalidate_family(&self, base: &str) {
        let prefix = format!("{base}:");
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|k, _| k != base && !k.starts_with(&prefix));
        let dropped = before - entries.len();
        if dropped > 0 {
            tracing::debug!(base, dropped, "cache family invalidated");
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, live or not yet noticed as expired.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        // Entries are replaced whole; a poisoned table is still consistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<V: Clone> Default for CacheManager<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Clock that only moves when told to.
    pub struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Instant::now()),
            })
        }

        pub fn advance(&self, by: Duration) {
            *self.now.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    fn cache(clock: &Arc<ManualClock>) -> CacheManager<Vec<String>> {
        CacheManager::with_clock(clock.clone())
    }

    #[test]
    fn hit_within_ttl() {
        let clock = ManualClock::new();
        let cache = cache(&clock);
        cache.set("machine-list", vec!["superheavy".into()], Duration::from_secs(60));

        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get("machine-list"), Some(vec!["superheavy".to_string()]));
    }

    #[test]
    fn miss_after_ttl() {
        let clock = ManualClock::new();
        let cache = cache(&clock);
        cache.set("machine-list", vec!["superheavy".into()], Duration::from_secs(60));

        clock.advance(Duration::from_secs(60));
        assert_eq!(cache.get("machine-list"), None);
        // Expired entry is dropped, not retained for later.
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_forces_miss() {
        let clock = ManualClock::new();
        let cache = cache(&clock);
        cache.set("vm-list", vec!["test1".into()], Duration::from_secs(300));
        cache.invalidate("vm-list");
        assert_eq!(cache.get("vm-list"), None);
    }

    #[test]
    fn family_invalidation_spares_other_keys() {
        let clock = ManualClock::new();
        let cache = cache(&clock);
        let ttl = Duration::from_secs(30);
        cache.set("status", vec![], ttl);
        cache.set("status:machine=superheavy", vec![], ttl);
        cache.set("status-extra", vec![], ttl);
        cache.set("health", vec![], ttl);

        cache.invalidate_family("status");
        assert!(cache.get("status").is_none());
        assert!(cache.get("status:machine=superheavy").is_none());
        assert!(cache.get("status-extra").is_some());
        assert!(cache.get("health").is_some());
    }

    #[test]
    fn zero_ttl_is_never_live() {
        let clock = ManualClock::new();
        let cache = cache(&clock);
        cache.set("dev-shells", vec!["default".into()], Duration::ZERO);
        assert_eq!(cache.get("dev-shells"), None);
    }

    #[test]
    fn set_overwrites_and_refreshes() {
        let clock = ManualClock::new();
        let cache = cache(&clock);
        cache.set("k", vec!["old".into()], Duration::from_secs(10));
        clock.advance(Duration::from_secs(8));
        cache.set("k", vec!["new".into()], Duration::from_secs(10));
        clock.advance(Duration::from_secs(8));
        assert_eq!(cache.get("k"), Some(vec!["new".to_string()]));
    }

    #[test]
    fn clear_drops_everything() {
        let clock = ManualClock::new();
        let cache = cache(&clock);
        cache.set("a", vec![], Duration::from_secs(10));
        cache.set("b", vec![], Duration::from_secs(10));
        cache.clear();
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn bounded_cache_evicts_oldest_stored() {
        let clock = ManualClock::new();
        let cache = cache(&clock).with_max_entries(2);
        cache.set("a", vec!["1".into()], Duration::from_secs(100));
        clock.advance(Duration::from_secs(1));
        cache.set("b", vec!["2".into()], Duration::from_secs(100));
        clock.advance(Duration::from_secs(1));
        cache.set("c", vec!["3".into()], Duration::from_secs(100));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn overwriting_existing_key_does_not_evict() {
        let clock = ManualClock::new();
        let cache = cache(&clock).with_max_entries(2);
        cache.set("a", vec![], Duration::from_secs(100));
        cache.set("b", vec![], Duration::from_secs(100));
        cache.set("a", vec!["again".into()], Duration::from_secs(100));
        assert!(cache.get("b").is_some());
        assert_eq!(cache.get("a"), Some(vec!["again".to_string()]));
    }

    #[test]
    fn concurrent_writers_are_serialized() {
        let cache = Arc::new(CacheManager::<usize>::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        cache.set(&format!("k{}", j % 10), i, Duration::from_secs(60));
                        let _ = cache.get("k0");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 10);
    }
}
