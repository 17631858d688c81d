//! Events broadcast by [`SyncEngine`](crate::engine::SyncEngine).
//!
//! | Event | Subscribe with |
//! |-------|----------------|
//! | `FrameEvent` | `SyncEngine::subscribe_frames` |
//! | `EngineStatusEvent` | `SyncEngine::subscribe_status` |

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Frame events
// ---------------------------------------------------------------------------

/// One per flipped frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub frame_index: u64,
    pub audio: FrameAudioKind,
    /// Sample pairs written into the ring this frame.
    pub samples_written: u32,
    pub play_cursor: u32,
    pub write_cursor: u32,
    pub target_cursor_byte: Option<u32>,
    pub audio_card_is_latent: bool,
    pub work_ms: f64,
    pub frame_ms: f64,
    pub missed_deadline: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameAudioKind {
    Filled,
    Starved,
    Disabled,
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineStatus {
    /// Created, `start()` not called yet.
    Idle,
    /// Frame loop running with sound.
    Running,
    /// Frame loop running, no usable audio device.
    AudioDisabled,
    /// Frame loop finished; the engine may be started again.
    Stopped,
    /// Initialization failed.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_event_serializes_with_camel_case() {
        let event = FrameEvent {
            seq: 3,
            frame_index: 2,
            audio: FrameAudioKind::Starved,
            samples_written: 0,
            play_cursor: 4096,
            write_cursor: 6144,
            target_cursor_byte: None,
            audio_card_is_latent: false,
            work_ms: 1.5,
            frame_ms: 33.3,
            missed_deadline: false,
        };

        let json = serde_json::to_value(&event).expect("serialize frame event");
        assert_eq!(json["seq"], 3);
        assert_eq!(json["frameIndex"], 2);
        assert_eq!(json["audio"], "starved");
        assert_eq!(json["playCursor"], 4096);
        assert!(json["targetCursorByte"].is_null());
        assert_eq!(json["missedDeadline"], false);
    }

    #[test]
    fn status_event_round_trips() {
        let event = EngineStatusEvent {
            status: EngineStatus::AudioDisabled,
            detail: Some("no default output device found".into()),
        };
        let json = serde_json::to_string(&event).expect("serialize");
        assert!(json.contains(r#""status":"audioDisabled""#));

        let back: EngineStatusEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.status, EngineStatus::AudioDisabled);
        assert_eq!(back.detail.as_deref(), Some("no default output device found"));
    }
}
