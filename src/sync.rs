//! Aligns incoming annotation events with the moving playback clock.
//!
//! Events arrive in network order, which is not time order — updates can come
//! from more than one channel, and the user can seek at any moment. Instead
//! of tracking a cursor, the engine re-derives "what is current" from the
//! clock position on every read, so seeks and out-of-order arrival need no
//! special handling.

use crate::error::{Result, SyncError};
use crate::types::{EmotionSample, PlaybackClock, SmoothedEmotion, TimedEvent, TranscriptSegment};
use std::collections::HashMap;
use std::collections::VecDeque;

/// Sync tolerance in seconds. Annotations within half a second of the clock
/// still read as current; the product explicitly trades frame accuracy for
/// resilience to network delay.
pub const SYNC_TOLERANCE: f64 = 0.5;

/// True when `clock` falls inside `[start - tolerance, end + tolerance]`.
pub fn is_time_in_range(clock: f64, start: f64, end: f64, tolerance: f64) -> bool {
    clock >= start - tolerance && clock <= end + tolerance
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub tolerance: f64,
    /// Retained events per stream; oldest are dropped first.
    pub history_limit: usize,
    pub smoothing_window: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tolerance: SYNC_TOLERANCE,
            history_limit: 100,
            smoothing_window: 5,
        }
    }
}

/// Bounded arrival-ordered history of one annotation stream. Transcript and
/// emotion streams share this one implementation.
struct EventStream<T: TimedEvent> {
    events: VecDeque<T>,
    limit: usize,
}

impl<T: TimedEvent> EventStream<T> {
    fn new(limit: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(limit.min(1024)),
            limit: limit.max(1),
        }
    }

    fn push(&mut self, event: T) {
        if self.events.len() >= self.limit {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// First event (in arrival order) whose range covers the clock, else the
    /// nearest-by-start-time event over the whole retained history. `None`
    /// only when the history is empty.
    fn current(&self, clock: f64, tolerance: f64) -> Option<&T> {
        self.events
            .iter()
            .find(|event| is_time_in_range(clock, event.start_time(), event.end_time(), tolerance))
            .or_else(|| self.nearest(clock))
    }

    fn nearest(&self, clock: f64) -> Option<&T> {
        let mut best: Option<(&T, f64)> = None;
        for event in &self.events {
            let distance = (event.start_time() - clock).abs();
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((event, distance)),
            }
        }
        best.map(|(event, _)| event)
    }

    /// Events overlapping `[from, to]`, in arrival order.
    fn history(&self, from: f64, to: f64) -> Vec<&T> {
        self.events
            .iter()
            .filter(|event| event.start_time() <= to && event.end_time() >= from)
            .collect()
    }

    fn last_n(&self, n: usize) -> impl Iterator<Item = &T> {
        let skip = self.events.len().saturating_sub(n);
        self.events.iter().skip(skip)
    }

    fn clear(&mut self) {
        self.events.clear();
    }

    fn len(&self) -> usize {
        self.events.len()
    }
}

/// The synchronization core: ingests transcript and emotion events, reads
/// the shared playback clock, and answers "current", history and smoothed
/// queries. Missing data is `None`/empty, never an error.
pub struct TimeSyncEngine {
    clock: PlaybackClock,
    config: SyncConfig,
    transcripts: EventStream<TranscriptSegment>,
    emotions: EventStream<EmotionSample>,
}

impl TimeSyncEngine {
    pub fn new(clock: PlaybackClock, config: SyncConfig) -> Self {
        let transcripts = EventStream::new(config.history_limit);
        let emotions = EventStream::new(config.history_limit);
        Self {
            clock,
            config,
            transcripts,
            emotions,
        }
    }

    /// Current playback position in seconds.
    pub fn clock_time(&self) -> f64 {
        self.clock.get()
    }

    pub fn sync_transcript(&mut self, segment: TranscriptSegment) -> Result<()> {
        segment.validate()?;
        self.transcripts.push(segment);
        Ok(())
    }

    pub fn sync_emotion(&mut self, sample: EmotionSample) -> Result<()> {
        sample.validate()?;
        self.emotions.push(sample);
        Ok(())
    }

    /// Ingest either kind of event, logging (not propagating) rejects. Used
    /// by callers that forward whole message streams.
    pub fn ingest_transcript(&mut self, segment: TranscriptSegment) {
        if let Err(SyncError::DataRange { start, end }) = self.sync_transcript(segment) {
            log::warn!(
                "Dropping transcript segment with inverted range {:.3}..{:.3}",
                start,
                end
            );
        }
    }

    pub fn ingest_emotion(&mut self, sample: EmotionSample) {
        if let Err(SyncError::DataRange { start, end }) = self.sync_emotion(sample) {
            log::warn!(
                "Dropping emotion sample with inverted range {:.3}..{:.3}",
                start,
                end
            );
        }
    }

    pub fn current_transcript(&self) -> Option<&TranscriptSegment> {
        self.transcripts.current(self.clock.get(), self.config.tolerance)
    }

    pub fn current_emotion(&self) -> Option<&EmotionSample> {
        self.emotions.current(self.clock.get(), self.config.tolerance)
    }

    pub fn transcript_history(&self, from: f64, to: f64) -> Vec<&TranscriptSegment> {
        self.transcripts.history(from, to)
    }

    pub fn emotion_history(&self, from: f64, to: f64) -> Vec<&EmotionSample> {
        self.emotions.history(from, to)
    }

    pub fn transcript_count(&self) -> usize {
        self.transcripts.len()
    }

    pub fn emotion_count(&self) -> usize {
        self.emotions.len()
    }

    /// Majority-vote emotion plus mean confidence/intensity over the last
    /// `window` samples (the configured window when `None`). Damps
    /// single-sample noise for display.
    pub fn smoothed_emotion(&self, window: Option<usize>) -> Option<SmoothedEmotion> {
        let window = window.unwrap_or(self.config.smoothing_window).max(1);
        let samples: Vec<&EmotionSample> = self.emotions.last_n(window).collect();
        if samples.is_empty() {
            return None;
        }

        let mut votes: HashMap<&str, usize> = HashMap::new();
        for sample in &samples {
            *votes.entry(sample.emotion_type.as_str()).or_insert(0) += 1;
        }
        // Walk samples in arrival order so vote ties resolve to the
        // earliest-seen emotion.
        let mut majority = samples[0].emotion_type.as_str();
        let mut majority_votes = 0;
        for sample in &samples {
            let count = votes[sample.emotion_type.as_str()];
            if count > majority_votes {
                majority = sample.emotion_type.as_str();
                majority_votes = count;
            }
        }

        let n = samples.len() as f32;
        let confidence = samples.iter().map(|s| s.confidence).sum::<f32>() / n;
        let intensity = samples.iter().map(|s| s.intensity).sum::<f32>() / n;

        Some(SmoothedEmotion {
            emotion_type: majority.to_string(),
            confidence,
            intensity,
            window: samples.len(),
        })
    }

    pub fn clear(&mut self) {
        self.transcripts.clear();
        self.emotions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> TimeSyncEngine {
        TimeSyncEngine::new(PlaybackClock::new(), SyncConfig::default())
    }

    #[test]
    fn test_is_time_in_range_tolerance() {
        // clock >= start - 0.5 && clock <= end + 0.5
        assert!(is_time_in_range(1.5, 2.0, 4.0, 0.5));
        assert!(is_time_in_range(4.5, 2.0, 4.0, 0.5));
        assert!(!is_time_in_range(1.49, 2.0, 4.0, 0.5));
        assert!(!is_time_in_range(4.51, 2.0, 4.0, 0.5));
        assert!(is_time_in_range(3.0, 2.0, 4.0, 0.5));
    }

    #[test]
    fn test_current_transcript_within_tolerance() {
        let mut engine = engine();
        engine
            .sync_transcript(TranscriptSegment::new(2.0, 4.0, "inside"))
            .unwrap();

        engine.clock.set(3.0);
        assert_eq!(engine.current_transcript().unwrap().text, "inside");

        // 1.6 is within start - 0.5
        engine.clock.set(1.6);
        assert_eq!(engine.current_transcript().unwrap().text, "inside");
    }

    #[test]
    fn test_overlap_resolves_to_first_in_arrival_order() {
        let mut engine = engine();
        engine
            .sync_transcript(TranscriptSegment::new(1.0, 5.0, "first"))
            .unwrap();
        engine
            .sync_transcript(TranscriptSegment::new(2.0, 6.0, "second"))
            .unwrap();

        engine.clock.set(3.0);
        assert_eq!(engine.current_transcript().unwrap().text, "first");
    }

    #[test]
    fn test_fallback_nearest_when_nothing_matches() {
        let mut engine = engine();
        engine
            .sync_emotion(EmotionSample::new(10.0, 11.0, "joy", 0.5, 0.9))
            .unwrap();
        engine
            .sync_emotion(EmotionSample::new(50.0, 51.0, "anger", 0.7, 0.8))
            .unwrap();

        // Far from both, nearer to the first
        engine.clock.set(20.0);
        assert_eq!(engine.current_emotion().unwrap().emotion_type, "joy");

        engine.clock.set(45.0);
        assert_eq!(engine.current_emotion().unwrap().emotion_type, "anger");
    }

    #[test]
    fn test_empty_history_yields_none() {
        let engine = engine();
        assert!(engine.current_transcript().is_none());
        assert!(engine.current_emotion().is_none());
        assert!(engine.smoothed_emotion(None).is_none());
        assert!(engine.transcript_history(0.0, 100.0).is_empty());
    }

    #[test]
    fn test_history_bound_drops_oldest() {
        let mut engine = TimeSyncEngine::new(
            PlaybackClock::new(),
            SyncConfig {
                history_limit: 3,
                ..SyncConfig::default()
            },
        );
        for i in 0..5 {
            let start = i as f64;
            engine
                .sync_transcript(TranscriptSegment::new(start, start + 1.0, format!("seg{}", i)))
                .unwrap();
        }
        assert_eq!(engine.transcript_count(), 3);
        let all = engine.transcript_history(0.0, 100.0);
        assert_eq!(all.first().unwrap().text, "seg2");
        assert_eq!(all.last().unwrap().text, "seg4");
    }

    #[test]
    fn test_history_uses_interval_overlap() {
        let mut engine = engine();
        engine
            .sync_transcript(TranscriptSegment::new(0.0, 2.0, "a"))
            .unwrap();
        engine
            .sync_transcript(TranscriptSegment::new(1.5, 3.0, "b"))
            .unwrap();
        engine
            .sync_transcript(TranscriptSegment::new(5.0, 6.0, "c"))
            .unwrap();

        let hits = engine.transcript_history(1.8, 4.0);
        let texts: Vec<&str> = hits.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn test_inverted_range_rejected_not_stored() {
        let mut engine = engine();
        let result = engine.sync_emotion(EmotionSample::new(5.0, 1.0, "joy", 0.5, 0.9));
        assert!(matches!(result, Err(SyncError::DataRange { .. })));
        assert_eq!(engine.emotion_count(), 0);

        engine.ingest_emotion(EmotionSample::new(5.0, 1.0, "joy", 0.5, 0.9));
        assert_eq!(engine.emotion_count(), 0);
    }

    #[test]
    fn test_smoothing_majority_and_means() {
        let mut engine = engine();
        let samples = [
            ("happy", 0.8),
            ("happy", 0.9),
            ("sad", 0.5),
            ("happy", 0.7),
            ("neutral", 0.6),
        ];
        for (i, (emotion, confidence)) in samples.iter().enumerate() {
            let start = i as f64;
            engine
                .sync_emotion(EmotionSample::new(start, start + 1.0, *emotion, 0.5, *confidence))
                .unwrap();
        }

        let smoothed = engine.smoothed_emotion(Some(5)).unwrap();
        assert_eq!(smoothed.emotion_type, "happy");
        assert!((smoothed.confidence - 0.7).abs() < 1e-6);
        assert!((smoothed.intensity - 0.5).abs() < 1e-6);
        assert_eq!(smoothed.window, 5);
    }

    #[test]
    fn test_smoothing_window_smaller_than_history() {
        let mut engine = engine();
        for _ in 0..4 {
            engine
                .sync_emotion(EmotionSample::new(0.0, 1.0, "sad", 0.2, 0.4))
                .unwrap();
        }
        for i in 0..3 {
            let start = (4 + i) as f64;
            engine
                .sync_emotion(EmotionSample::new(start, start + 1.0, "joy", 0.8, 0.9))
                .unwrap();
        }

        // Last 3 samples are all joy; the sad run must not leak in
        let smoothed = engine.smoothed_emotion(Some(3)).unwrap();
        assert_eq!(smoothed.emotion_type, "joy");
        assert_eq!(smoothed.window, 3);
        assert!((smoothed.intensity - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_seek_recomputes_current_from_full_history() {
        let mut engine = engine();
        for i in 0..10 {
            let start = i as f64 * 10.0;
            engine
                .sync_transcript(TranscriptSegment::new(start, start + 2.0, format!("seg{}", i)))
                .unwrap();
        }

        engine.clock.set(91.0);
        assert_eq!(engine.current_transcript().unwrap().text, "seg9");

        // Seek far backwards; resolution must not depend on the previous read
        engine.clock.set(1.0);
        assert_eq!(engine.current_transcript().unwrap().text, "seg0");
    }

    #[test]
    fn test_clear_resets_both_streams() {
        let mut engine = engine();
        engine
            .sync_transcript(TranscriptSegment::new(0.0, 1.0, "a"))
            .unwrap();
        engine
            .sync_emotion(EmotionSample::new(0.0, 1.0, "joy", 0.5, 0.9))
            .unwrap();
        engine.clear();
        assert_eq!(engine.transcript_count(), 0);
        assert_eq!(engine.emotion_count(), 0);
        assert!(engine.current_transcript().is_none());
    }
}
