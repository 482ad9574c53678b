use annosync::cache::{CacheConfig, CacheService, LfuCache, LruCache, RingBuffer, TimelineCache};
use serde_json::json;

#[test]
fn test_lru_keeps_recently_used_pair() {
    // set(a), set(b), get(a), set(c) at capacity 2 leaves {a, c}
    let mut cache: LruCache<&str, u32> = LruCache::new(2, None);
    cache.set("a", 1);
    cache.set("b", 2);
    assert_eq!(cache.get(&"a"), Some(&1));
    cache.set("c", 3);

    assert!(cache.has(&"a"));
    assert!(!cache.has(&"b"));
    assert!(cache.has(&"c"));
}

#[test]
fn test_lfu_keeps_frequently_used_pair() {
    // a accessed 3x, b 1x; inserting c evicts b
    let mut cache: LfuCache<&str, u32> = LfuCache::new(2);
    cache.set("a", 1);
    cache.get(&"a");
    cache.get(&"a");
    cache.set("b", 2);
    cache.set("c", 3);

    assert!(cache.has(&"a"));
    assert!(!cache.has(&"b"));
    assert!(cache.has(&"c"));
}

#[test]
fn test_capacity_invariant_across_policies() {
    let mut lru: LruCache<u32, u32> = LruCache::new(7, None);
    let mut lfu: LfuCache<u32, u32> = LfuCache::new(7);
    let mut ring: RingBuffer<u32> = RingBuffer::new(7);
    let mut timeline: TimelineCache<u32> = TimelineCache::new(7);

    // A deterministic mixed workload: inserts, repeats, deletes
    for i in 0..500u32 {
        let key = (i * 31) % 97;
        lru.set(key, i);
        lfu.set(key, i);
        ring.push(i as f64, i);
        timeline.set(key as f64 / 10.0, i);

        if i % 5 == 0 {
            lru.get(&key);
            lfu.get(&key);
        }
        if i % 11 == 0 {
            lru.delete(&key);
            lfu.delete(&key);
        }

        assert!(lru.len() <= 7);
        assert!(lfu.len() <= 7);
        assert!(ring.len() <= 7);
        assert!(timeline.len() <= 7);
    }
}

#[test]
fn test_service_streaming_workload_stays_bounded() {
    let mut service = CacheService::new(CacheConfig {
        socket_log_capacity: 10,
        ..CacheConfig::default()
    });

    // Simulate a long-running stream of raw frames plus frame previews
    for i in 0..10_000 {
        let at = i as f64 * 0.1;
        service.log_socket_frame(at, format!(r#"{{"type":"time_update","current_time":{}}}"#, at));
        service.set_frame(at, json!({ "index": i }));
    }

    assert_eq!(service.socket_frames_since(0.0).len(), 10);
    // Only the most recent frames survive; the earliest timestamps are gone
    assert!(service.frame(0.0).is_none());
    assert!(service.frame(999.9).is_some());
}

#[test]
fn test_closest_frame_tolerance_boundary() {
    let mut service = CacheService::new(CacheConfig::default());
    service.set_frame(10.0, json!("a"));

    assert!(service.closest_frame(10.4, 0.5).is_some());
    assert!(service.closest_frame(10.5, 0.5).is_some());
    assert!(service.closest_frame(10.6, 0.5).is_none());
}
