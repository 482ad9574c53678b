//! Annotation data model shared by the channel, cache and sync layers.

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Anything that occupies a `[start_time, end_time]` span on the media
/// timeline. Times are in seconds.
pub trait TimedEvent {
    fn start_time(&self) -> f64;
    fn end_time(&self) -> f64;

    /// Rejects events with an inverted range before they reach any buffer.
    fn validate(&self) -> Result<(), SyncError> {
        if self.start_time() > self.end_time() {
            return Err(SyncError::DataRange {
                start: self.start_time(),
                end: self.end_time(),
            });
        }
        Ok(())
    }
}

/// Word-level timing inside a transcript segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub confidence: f32,
}

fn default_language() -> String {
    "auto".to_string()
}

/// One transcribed segment as streamed by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptSegment {
    pub start_time: f64,
    pub end_time: f64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub english_text: Option<String>,
    #[serde(default)]
    pub words: Vec<WordTiming>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub is_final: bool,
    /// Local arrival stamp, set when the segment is parsed off the wire.
    #[serde(skip, default = "Instant::now")]
    pub received_at: Instant,
}

impl TranscriptSegment {
    pub fn new(start_time: f64, end_time: f64, text: impl Into<String>) -> Self {
        Self {
            start_time,
            end_time,
            text: text.into(),
            english_text: None,
            words: Vec::new(),
            language: default_language(),
            confidence: 0.0,
            is_final: false,
            received_at: Instant::now(),
        }
    }
}

impl TimedEvent for TranscriptSegment {
    fn start_time(&self) -> f64 {
        self.start_time
    }

    fn end_time(&self) -> f64 {
        self.end_time
    }
}

/// One emotion sample as streamed by the backend. `emotion_type` is kept as
/// a free string (joy/sadness/anger/fear/surprise/neutral today) so a newer
/// backend vocabulary doesn't break parsing.
#[derive(Debug, Clone, Deserialize)]
pub struct EmotionSample {
    pub start_time: f64,
    pub end_time: f64,
    pub emotion_type: String,
    #[serde(default)]
    pub intensity: f32,
    #[serde(default)]
    pub confidence: f32,
    #[serde(skip, default = "Instant::now")]
    pub received_at: Instant,
}

impl EmotionSample {
    pub fn new(
        start_time: f64,
        end_time: f64,
        emotion_type: impl Into<String>,
        intensity: f32,
        confidence: f32,
    ) -> Self {
        Self {
            start_time,
            end_time,
            emotion_type: emotion_type.into(),
            intensity,
            confidence,
            received_at: Instant::now(),
        }
    }
}

impl TimedEvent for EmotionSample {
    fn start_time(&self) -> f64 {
        self.start_time
    }

    fn end_time(&self) -> f64 {
        self.end_time
    }
}

/// Aggregate over the last few emotion samples. A distinct type from
/// [`EmotionSample`] so a smoothed value can never be mistaken for a raw one.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedEmotion {
    /// Majority-vote emotion across the window.
    pub emotion_type: String,
    /// Arithmetic mean confidence across the window.
    pub confidence: f32,
    /// Arithmetic mean intensity across the window.
    pub intensity: f32,
    /// Number of samples actually aggregated (may be less than requested).
    pub window: usize,
}

/// Processing status as returned by `GET /api/status/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: String,
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusReport {
    /// Terminal states end the polling loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "completed" | "failed")
    }
}

/// Shared read of the playback position, written by the playback owner
/// (play/pause/seek/timeupdate) and read by the sync engine. Positions are
/// seconds; seeks may move the value backwards.
///
/// Stored as raw `f64` bits in an atomic so readers never block a writer.
#[derive(Debug, Clone, Default)]
pub struct PlaybackClock {
    bits: Arc<AtomicU64>,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, seconds: f64) {
        self.bits.store(seconds.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_event_validation() {
        assert!(TranscriptSegment::new(1.0, 2.0, "ok").validate().is_ok());
        assert!(TranscriptSegment::new(2.0, 2.0, "point").validate().is_ok());

        let inverted = EmotionSample::new(3.0, 1.0, "joy", 0.5, 0.9);
        match inverted.validate() {
            Err(SyncError::DataRange { start, end }) => {
                assert_eq!(start, 3.0);
                assert_eq!(end, 1.0);
            }
            other => panic!("Expected DataRange error, got {:?}", other),
        }
    }

    #[test]
    fn test_status_report_terminal() {
        let processing = StatusReport {
            status: "processing".into(),
            progress: 40.0,
            message: None,
            error: None,
        };
        assert!(!processing.is_terminal());

        for status in ["completed", "failed"] {
            let report = StatusReport {
                status: status.into(),
                progress: 100.0,
                message: None,
                error: None,
            };
            assert!(report.is_terminal(), "{} should be terminal", status);
        }
    }

    #[test]
    fn test_playback_clock_roundtrip() {
        let clock = PlaybackClock::new();
        assert_eq!(clock.get(), 0.0);

        clock.set(12.75);
        assert_eq!(clock.get(), 12.75);

        // Seeks can move backwards
        clock.set(3.5);
        assert_eq!(clock.get(), 3.5);

        // Clones observe the same position
        let reader = clock.clone();
        clock.set(99.0);
        assert_eq!(reader.get(), 99.0);
    }
}
