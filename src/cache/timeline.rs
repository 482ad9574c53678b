use std::collections::BTreeMap;

/// Media timestamps arrive as `f64` seconds; quantizing to integer
/// milliseconds gives an `Ord` key with more precision than the lookup
/// tolerances ever need.
fn key_ms(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}

fn ms_to_seconds(ms: i64) -> f64 {
    ms as f64 / 1000.0
}

/// Store keyed by a continuous timestamp, supporting exact and
/// nearest-within-tolerance lookup. At capacity the smallest (oldest)
/// timestamp is evicted.
pub struct TimelineCache<V> {
    capacity: usize,
    entries: BTreeMap<i64, V>,
}

impl<V> TimelineCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, at: f64, value: V) {
        let key = key_ms(at);
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.entries.pop_first();
        }
        self.entries.insert(key, value);
    }

    pub fn get(&self, at: f64) -> Option<&V> {
        self.entries.get(&key_ms(at))
    }

    pub fn has(&self, at: f64) -> bool {
        self.entries.contains_key(&key_ms(at))
    }

    pub fn delete(&mut self, at: f64) -> bool {
        self.entries.remove(&key_ms(at)).is_some()
    }

    /// The entry whose key is closest to `at`, provided the distance is
    /// within `tolerance` seconds. Equidistant neighbours resolve to the
    /// earlier key. Returns the matched timestamp alongside the value.
    pub fn get_closest(&self, at: f64, tolerance: f64) -> Option<(f64, &V)> {
        let target = key_ms(at);
        let below = self.entries.range(..=target).next_back();
        let above = self.entries.range(target + 1..).next();

        let best = match (below, above) {
            (Some(lo), Some(hi)) => {
                // <= keeps the earlier key on a tie
                if (target - lo.0).abs() <= (hi.0 - target).abs() {
                    Some(lo)
                } else {
                    Some(hi)
                }
            }
            (Some(lo), None) => Some(lo),
            (None, Some(hi)) => Some(hi),
            (None, None) => None,
        };

        let (key, value) = best?;
        if (key - target).abs() as f64 > tolerance * 1000.0 {
            return None;
        }
        Some((ms_to_seconds(*key), value))
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
}
