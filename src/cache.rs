//! Bounded TTL cache for API responses, keyed by endpoint and request payload.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock advanced by hand; for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.lock().map(|now| *now).unwrap_or_else(|e| *e.into_inner())
    }
}

/// Which entry to drop when the cache is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    #[default]
    OldestInserted,
    LeastRecentlyUsed,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    data: V,
    timestamp: Instant,
    last_access: Instant,
}

pub struct TtlCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    ttl: Duration,
    max_entries: usize,
    policy: EvictionPolicy,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self::with_clock(ttl, max_entries, EvictionPolicy::default(), Arc::new(SystemClock))
    }

    pub fn with_clock(
        ttl: Duration,
        max_entries: usize,
        policy: EvictionPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries,
            policy,
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        now.saturating_duration_since(entry.timestamp) >= self.ttl
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            None => return None,
            Some(entry) => self.is_expired(entry, now),
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        let entry = self.entries.get_mut(key)?;
        entry.last_access = now;
        Some(entry.data.clone())
    }

    pub fn insert(&mut self, key: K, data: V) {
        if self.max_entries == 0 {
            return;
        }
        let now = self.clock.now();
        self.purge_expired();
        if !self.entries.contains_key(&key) {
            while self.entries.len() >= self.max_entries {
                if !self.evict_one() {
                    break;
                }
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                data,
                timestamp: now,
                last_access: now,
            },
        );
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|entry| entry.data)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now();
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.timestamp) < ttl);
        before - self.entries.len()
    }

    fn evict_one(&mut self) -> bool {
        let victim = match self.policy {
            EvictionPolicy::OldestInserted => self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.timestamp)
                .map(|(key, _)| key.clone()),
            EvictionPolicy::LeastRecentlyUsed => self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone()),
        };
        match victim {
            Some(key) => {
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }
}

/// `"<endpoint>:<json payload>"`.
pub fn cache_key<T: Serialize + ?Sized>(endpoint: &str, payload: &T) -> Result<String, serde_json::Error> {
    Ok(format!("{endpoint}:{}", serde_json::to_string(payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache(policy: EvictionPolicy, max: usize) -> (TtlCache<String, u32>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = TtlCache::with_clock(Duration::from_secs(300), max, policy, clock.clone());
        (cache, clock)
    }

    #[test]
    fn entries_expire_after_ttl() {
        let (mut cache, clock) = cache(EvictionPolicy::OldestInserted, 10);
        cache.insert("a".into(), 1);
        clock.advance(Duration::from_secs(299));
        assert_eq!(cache.get(&"a".into()), Some(1));
        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get(&"a".into()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn oldest_entry_is_evicted_at_capacity() {
        let (mut cache, clock) = cache(EvictionPolicy::OldestInserted, 2);
        cache.insert("a".into(), 1);
        clock.advance(Duration::from_secs(1));
        cache.insert("b".into(), 2);
        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get(&"a".into()), Some(1));
        cache.insert("c".into(), 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a".into()), None);
        assert_eq!(cache.get(&"b".into()), Some(2));
    }

    #[test]
    fn lru_policy_keeps_recently_read_entries() {
        let (mut cache, clock) = cache(EvictionPolicy::LeastRecentlyUsed, 2);
        cache.insert("a".into(), 1);
        clock.advance(Duration::from_secs(1));
        cache.insert("b".into(), 2);
        clock.advance(Duration::from_secs(1));
        cache.get(&"a".into());
        cache.insert("c".into(), 3);
        assert_eq!(cache.get(&"a".into()), Some(1));
        assert_eq!(cache.get(&"b".into()), None);
    }

    #[test]
    fn replacing_a_key_does_not_evict() {
        let (mut cache, _clock) = cache(EvictionPolicy::OldestInserted, 2);
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);
        cache.insert("a".into(), 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a".into()), Some(10));
        assert_eq!(cache.get(&"b".into()), Some(2));
    }

    #[test]
    fn purge_drops_only_expired() {
        let (mut cache, clock) = cache(EvictionPolicy::OldestInserted, 10);
        cache.insert("old".into(), 1);
        clock.advance(Duration::from_secs(200));
        cache.insert("new".into(), 2);
        clock.advance(Duration::from_secs(150));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let (mut cache, _clock) = cache(EvictionPolicy::OldestInserted, 0);
        cache.insert("a".into(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn key_includes_endpoint_and_payload() {
        let key = cache_key("/api/predict", &json!({"age": "17"})).unwrap();
        assert_eq!(key, r#"/api/predict:{"age":"17"}"#);
    }
}
