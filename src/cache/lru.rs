use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct LruEntry<V> {
    value: V,
    inserted_at: Instant,
    last_access: u64,
    ttl: Option<Duration>,
}

impl<V> LruEntry<V> {
    fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => self.inserted_at.elapsed() > ttl,
            None => false,
        }
    }
}

/// Recency-evicting map. `get`/`set` mark the key most-recently-used; at
/// capacity the least-recently-used key is evicted first. Entries can carry
/// a TTL (falling back to the cache-wide default) which is checked lazily on
/// access — an expired entry reads as absent.
pub struct LruCache<K, V> {
    capacity: usize,
    default_ttl: Option<Duration>,
    entries: HashMap<K, LruEntry<V>>,
    tick: u64,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize, default_ttl: Option<Duration>) -> Self {
        Self {
            capacity: capacity.max(1),
            default_ttl,
            entries: HashMap::new(),
            tick: 0,
        }
    }

    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let expired = self.entries.get(key)?.is_expired();
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.get_mut(key)?;
        entry.last_access = tick;
        Some(&entry.value)
    }

    pub fn set(&mut self, key: K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl(&mut self, key: K, value: V, ttl: Option<Duration>) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_one();
        }
        self.tick += 1;
        self.entries.insert(
            key,
            LruEntry {
                value,
                inserted_at: Instant::now(),
                last_access: self.tick,
                ttl,
            },
        );
    }

    /// Does not count as an access.
    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.get(key).is_some_and(|entry| !entry.is_expired())
    }

    pub fn delete<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Prefers evicting an already-expired entry; otherwise drops the
    /// least-recently-used one.
    fn evict_one(&mut self) {
        let expired = self
            .entries
            .iter()
            .find(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone());
        if let Some(key) = expired {
            self.entries.remove(&key);
            return;
        }

        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}
