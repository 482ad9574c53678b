use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

struct LfuEntry<V> {
    value: V,
    hits: u64,
}

/// Frequency-evicting map. Every `get`/`set` bumps the key's hit counter; at
/// capacity the key with the fewest hits goes first (ties fall to whichever
/// the scan meets first). Counters die with their entry — a re-inserted key
/// starts cold.
pub struct LfuCache<K, V> {
    capacity: usize,
    entries: HashMap<K, LfuEntry<V>>,
}

impl<K: Eq + Hash + Clone, V> LfuCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
        }
    }

    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let entry = self.entries.get_mut(key)?;
        entry.hits += 1;
        Some(&entry.value)
    }

    pub fn set(&mut self, key: K, value: V) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            entry.hits += 1;
            return;
        }
        if self.entries.len() >= self.capacity {
            self.evict_one();
        }
        self.entries.insert(key, LfuEntry { value, hits: 1 });
    }

    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.contains_key(key)
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

    fn evict_one(&mut self) {
        let coldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.hits)
            .map(|(key, _)| key.clone());
        if let Some(key) = coldest {
            self.entries.remove(&key);
        }
    }
}
