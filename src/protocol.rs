//! Wire protocol for the annotation stream.
//!
//! Inbound frames are JSON objects discriminated by a `type` field. Parsing
//! them into one tagged enum means every consumer dispatches with a single
//! exhaustive `match` instead of a table of per-type callbacks, and adding a
//! message type is a compile-checked change.

use crate::types::{EmotionSample, StatusReport, TranscriptSegment};
use serde::{Deserialize, Serialize};

/// Everything the backend may push over a channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake acknowledgement after the socket opens.
    Connected {
        #[serde(default)]
        file_id: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    StatusUpdate {
        #[serde(flatten)]
        report: StatusReport,
        #[serde(default)]
        file_id: Option<String>,
    },
    ProgressUpdate {
        #[serde(flatten)]
        report: StatusReport,
        #[serde(default)]
        file_id: Option<String>,
    },
    Completed {
        #[serde(default)]
        file_id: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    /// Server echo of the playback position it is annotating against.
    TimeUpdate {
        current_time: f64,
    },
    EmotionUpdate {
        emotion: EmotionSample,
        #[serde(default)]
        file_id: Option<String>,
    },
    TranscriptUpdate {
        transcript: TranscriptSegment,
        #[serde(default)]
        file_id: Option<String>,
    },
    Error {
        message: String,
    },
    Pong {
        #[serde(default)]
        timestamp: Option<String>,
    },
    PlaybackState {
        #[serde(default)]
        is_playing: bool,
        #[serde(default)]
        current_time: f64,
    },
    SeekComplete {
        #[serde(default)]
        current_time: f64,
    },
    /// Any tag this client does not know. Kept instead of rejected so an
    /// older client survives a newer backend.
    #[serde(other)]
    Unknown,
}

/// Playback state reported to the backend.
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackUpdate {
    pub current_time: f64,
    pub is_playing: bool,
    pub is_seeking: bool,
}

/// Everything this client may send over a channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping { timestamp: String },
    PlaybackUpdate { data: PlaybackUpdate },
    Seek { position: f64 },
}

impl ClientMessage {
    /// A ping stamped with the current wall-clock time.
    pub fn ping_now() -> Self {
        ClientMessage::Ping {
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_emotion_update() {
        let raw = r#"{
            "type": "emotion_update",
            "file_id": "f1",
            "emotion": {
                "emotion_type": "joy",
                "confidence": 0.82,
                "intensity": 0.6,
                "start_time": 4.0,
                "end_time": 6.5
            },
            "timestamp": "2026-01-01T00:00:00Z"
        }"#;

        match serde_json::from_str::<ServerMessage>(raw).unwrap() {
            ServerMessage::EmotionUpdate { emotion, file_id } => {
                assert_eq!(emotion.emotion_type, "joy");
                assert_eq!(emotion.start_time, 4.0);
                assert_eq!(emotion.end_time, 6.5);
                assert!((emotion.confidence - 0.82).abs() < 1e-6);
                assert!((emotion.intensity - 0.6).abs() < 1e-6);
                assert_eq!(file_id.as_deref(), Some("f1"));
            }
            other => panic!("Expected emotion_update, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_transcript_update() {
        let raw = r#"{
            "type": "transcript_update",
            "transcript": {
                "start_time": 1.0,
                "end_time": 2.4,
                "text": "hello there",
                "words": [
                    {"word": "hello", "start": 1.0, "end": 1.6, "confidence": 0.97},
                    {"word": "there", "start": 1.6, "end": 2.4, "confidence": 0.91}
                ],
                "language": "en",
                "confidence": 0.94,
                "is_final": true
            }
        }"#;

        match serde_json::from_str::<ServerMessage>(raw).unwrap() {
            ServerMessage::TranscriptUpdate { transcript, .. } => {
                assert_eq!(transcript.text, "hello there");
                assert_eq!(transcript.words.len(), 2);
                assert_eq!(transcript.language, "en");
                assert!(transcript.is_final);
            }
            other => panic!("Expected transcript_update, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_progress_update_flattened() {
        let raw = r#"{"type": "progress_update", "status": "transcribing", "progress": 60.0, "message": "Transcribing speech..."}"#;
        match serde_json::from_str::<ServerMessage>(raw).unwrap() {
            ServerMessage::ProgressUpdate { report, .. } => {
                assert_eq!(report.status, "transcribing");
                assert_eq!(report.progress, 60.0);
            }
            other => panic!("Expected progress_update, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_is_not_an_error() {
        let raw = r#"{"type": "brand_new_thing", "payload": 42}"#;
        let message = serde_json::from_str::<ServerMessage>(raw).unwrap();
        assert!(matches!(message, ServerMessage::Unknown));
    }

    #[test]
    fn test_client_message_wire_shape() {
        let seek = serde_json::to_value(ClientMessage::Seek { position: 12.5 }).unwrap();
        assert_eq!(seek["type"], "seek");
        assert_eq!(seek["position"], 12.5);

        let ping = serde_json::to_value(ClientMessage::ping_now()).unwrap();
        assert_eq!(ping["type"], "ping");
        assert!(ping["timestamp"].is_string());
    }
}
