//! Bounded in-memory caches guarding against unbounded accumulation while
//! annotation data streams in. Each namespace gets the eviction policy its
//! data actually wants, behind one service owned by the application.

mod lfu;
mod lru;
mod ring;
mod timeline;

pub use lfu::LfuCache;
pub use lru::LruCache;
pub use ring::{RingBuffer, Stamped};
pub use timeline::TimelineCache;

use crate::types::EmotionSample;
use serde_json::Value;
use std::time::Duration;

/// Capacities and TTLs per namespace, fixed at construction.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub general_capacity: usize,
    pub general_ttl: Option<Duration>,
    pub frame_capacity: usize,
    pub translation_capacity: usize,
    pub emotion_capacity: usize,
    pub socket_log_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            general_capacity: 200,
            general_ttl: Some(Duration::from_secs(300)),
            frame_capacity: 120,
            translation_capacity: 500,
            emotion_capacity: 300,
            socket_log_capacity: 50,
        }
    }
}

/// One instance of each policy, namespaced per data type:
///
/// - general KV: LRU with a default TTL
/// - frame previews: timeline keyed by media timestamp
/// - translations: LFU (hot phrases are re-read constantly)
/// - emotion samples: LRU keyed by segment
/// - raw socket log: FIFO ring for debugging
///
/// Construct once at startup and pass by reference; `clear_all` is the
/// explicit teardown.
pub struct CacheService {
    general: LruCache<String, Value>,
    frames: TimelineCache<Value>,
    translations: LfuCache<String, String>,
    emotions: LruCache<String, EmotionSample>,
    socket_log: RingBuffer<String>,
}

impl CacheService {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            general: LruCache::new(config.general_capacity, config.general_ttl),
            frames: TimelineCache::new(config.frame_capacity),
            translations: LfuCache::new(config.translation_capacity),
            emotions: LruCache::new(config.emotion_capacity, None),
            socket_log: RingBuffer::new(config.socket_log_capacity),
        }
    }

    // --- general KV ---

    pub fn set_value(&mut self, key: impl Into<String>, value: Value) {
        self.general.set(key.into(), value);
    }

    pub fn set_value_with_ttl(&mut self, key: impl Into<String>, value: Value, ttl: Duration) {
        self.general.set_with_ttl(key.into(), value, Some(ttl));
    }

    pub fn value(&mut self, key: &str) -> Option<&Value> {
        self.general.get(key)
    }

    pub fn has_value(&self, key: &str) -> bool {
        self.general.has(key)
    }

    pub fn delete_value(&mut self, key: &str) -> bool {
        self.general.delete(key)
    }

    // --- frame previews ---

    pub fn set_frame(&mut self, at: f64, frame: Value) {
        self.frames.set(at, frame);
    }

    pub fn frame(&self, at: f64) -> Option<&Value> {
        self.frames.get(at)
    }

    /// Nearest cached frame within `tolerance` seconds of `at`.
    pub fn closest_frame(&self, at: f64, tolerance: f64) -> Option<(f64, &Value)> {
        self.frames.get_closest(at, tolerance)
    }

    pub fn has_frame(&self, at: f64) -> bool {
        self.frames.has(at)
    }

    pub fn delete_frame(&mut self, at: f64) -> bool {
        self.frames.delete(at)
    }

    // --- translations ---

    pub fn set_translation(&mut self, source: impl Into<String>, translated: impl Into<String>) {
        self.translations.set(source.into(), translated.into());
    }

    pub fn translation(&mut self, source: &str) -> Option<&String> {
        self.translations.get(source)
    }

    pub fn has_translation(&self, source: &str) -> bool {
        self.translations.has(source)
    }

    pub fn delete_translation(&mut self, source: &str) -> bool {
        self.translations.delete(source)
    }

    // --- emotion samples ---

    pub fn set_emotion(&mut self, key: impl Into<String>, sample: EmotionSample) {
        self.emotions.set(key.into(), sample);
    }

    pub fn emotion(&mut self, key: &str) -> Option<&EmotionSample> {
        self.emotions.get(key)
    }

    pub fn has_emotion(&self, key: &str) -> bool {
        self.emotions.has(key)
    }

    pub fn delete_emotion(&mut self, key: &str) -> bool {
        self.emotions.delete(key)
    }

    // --- raw socket log ---

    pub fn log_socket_frame(&mut self, at: f64, raw: impl Into<String>) {
        self.socket_log.push(at, raw.into());
    }

    pub fn socket_frames_since(&self, at: f64) -> Vec<&Stamped<String>> {
        self.socket_log.since(at).collect()
    }

    pub fn clear_all(&mut self) {
        self.general.clear();
        self.frames.clear();
        self.translations.clear();
        self.emotions.clear();
        self.socket_log.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_namespaces_are_independent() {
        let mut service = CacheService::new(CacheConfig::default());
        service.set_value("status", json!({"progress": 50}));
        service.set_frame(1.0, json!({"thumb": "abc"}));
        service.set_translation("مرحبا", "hello");
        service.set_emotion("0.0-2.0", EmotionSample::new(0.0, 2.0, "joy", 0.5, 0.9));
        service.log_socket_frame(1.0, r#"{"type":"pong"}"#);

        assert!(service.has_value("status"));
        assert!(service.frame(1.0).is_some());
        assert_eq!(service.translation("مرحبا").map(String::as_str), Some("hello"));
        assert!(service.emotion("0.0-2.0").is_some());
        assert_eq!(service.socket_frames_since(0.0).len(), 1);

        service.delete_value("status");
        assert!(!service.has_value("status"));
        assert!(service.frame(1.0).is_some(), "namespaces must not share keys");
    }

    #[test]
    fn test_clear_all_empties_every_namespace() {
        let mut service = CacheService::new(CacheConfig::default());
        service.set_value("k", json!(1));
        service.set_frame(2.0, json!(2));
        service.set_translation("a", "b");
        service.log_socket_frame(0.0, "frame");

        service.clear_all();
        assert!(!service.has_value("k"));
        assert!(service.frame(2.0).is_none());
        assert!(service.translation("a").is_none());
        assert!(service.socket_frames_since(0.0).is_empty());
    }

    #[test]
    fn test_closest_frame_passthrough() {
        let mut service = CacheService::new(CacheConfig::default());
        service.set_frame(10.0, json!("a"));
        service.set_frame(12.0, json!("b"));

        let (at, _) = service.closest_frame(11.2, 1.0).unwrap();
        assert_eq!(at, 12.0);
        assert!(service.closest_frame(20.0, 1.0).is_none());
    }
}
