//! Playback events
//!
//! Every native notification becomes exactly one canonical [`EventType`];
//! the session adds a few synthetic ones (state changes, manifest readiness,
//! quality switches, recovery attempts). Each emission carries a fresh
//! metadata/stats snapshot.

mod bus;

pub use bus::{EventBus, Listener, ListenerHandle};

use crate::error::{Error, ErrorKind};
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical event keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    LoadStart,
    LoadedMetadata,
    CanPlay,
    Play,
    Playing,
    Pause,
    Seeking,
    Seeked,
    Waiting,
    TimeUpdate,
    Progress,
    VolumeChange,
    RateChange,
    Ended,
    Error,
    FullscreenChange,
    PictureInPictureChange,
    // Synthetic
    StateChange,
    QualityChange,
    Ready,
    Recovery,
}

impl EventType {
    /// Events that mirror a native notification one-to-one
    pub fn is_native(&self) -> bool {
        !matches!(
            self,
            EventType::StateChange | EventType::QualityChange | EventType::Ready | EventType::Recovery
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventType::LoadStart => "loadstart",
            EventType::LoadedMetadata => "loadedmetadata",
            EventType::CanPlay => "canplay",
            EventType::Play => "play",
            EventType::Playing => "playing",
            EventType::Pause => "pause",
            EventType::Seeking => "seeking",
            EventType::Seeked => "seeked",
            EventType::Waiting => "waiting",
            EventType::TimeUpdate => "timeupdate",
            EventType::Progress => "progress",
            EventType::VolumeChange => "volumechange",
            EventType::RateChange => "ratechange",
            EventType::Ended => "ended",
            EventType::Error => "error",
            EventType::FullscreenChange => "fullscreenchange",
            EventType::PictureInPictureChange => "pictureinpicturechange",
            EventType::StateChange => "statechange",
            EventType::QualityChange => "qualitychange",
            EventType::Ready => "ready",
            EventType::Recovery => "recovery",
        };
        f.write_str(name)
    }
}

/// Error details carried on `error` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    pub fatal: bool,
}

impl ErrorPayload {
    /// Error handed to callers waiting on a request this failure aborted
    pub fn to_error(&self) -> Error {
        let code = self.code.clone();
        let message = self.message.clone();
        match self.kind {
            ErrorKind::Network => Error::Network {
                code,
                message,
                fatal: self.fatal,
            },
            ErrorKind::Media => Error::Media {
                code,
                message,
                fatal: self.fatal,
            },
            ErrorKind::Manifest => Error::Manifest { code, message },
            ErrorKind::Other => Error::Internal(format!("{code}: {message}")),
        }
    }
}

/// Type-specific event payload
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    #[default]
    None,
    Metadata {
        duration: Option<f64>,
        width: u32,
        height: u32,
    },
    State {
        from: PlaybackState,
        to: PlaybackState,
    },
    Quality {
        from: Quality,
        to: Quality,
        reason: QualityChangeReason,
    },
    Error(ErrorPayload),
    Ready {
        live: bool,
        levels: usize,
        native: bool,
    },
    Recovery {
        attempt: u32,
        delay_ms: u64,
        kind: ErrorKind,
    },
    Volume {
        volume: f64,
        muted: bool,
    },
    Rate {
        rate: f64,
    },
    Buffered {
        ranges: Vec<TimeRange>,
    },
    Fullscreen {
        active: bool,
    },
    PictureInPicture {
        active: bool,
    },
    Custom {
        data: serde_json::Value,
    },
}

/// One emission, valid for the duration of the listener call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_type: EventType,
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub current_time: f64,
    pub duration: Option<f64>,
    pub payload: EventPayload,
    pub state: PlaybackState,
    pub metadata: MediaMetadata,
    pub stats: PlaybackStats,
}

impl EventRecord {
    pub fn error(&self) -> Option<&ErrorPayload> {
        match &self.payload {
            EventPayload::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn quality_change(&self) -> Option<(&Quality, &Quality)> {
        match &self.payload {
            EventPayload::Quality { from, to, .. } => Some((from, to)),
            _ => None,
        }
    }

    /// Serialize for beacons or logs
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Session-scoped bus type
pub type PlayerEventBus = EventBus<EventType, EventRecord>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(EventType::LoadedMetadata.to_string(), "loadedmetadata");
        assert_eq!(EventType::QualityChange.to_string(), "qualitychange");
        assert!(EventType::Playing.is_native());
        assert!(!EventType::Ready.is_native());
    }

    #[test]
    fn test_record_json_carries_payload() {
        let record = EventRecord {
            event_type: EventType::QualityChange,
            session_id: SessionId::new(),
            timestamp: Utc::now(),
            current_time: 12.5,
            duration: Some(60.0),
            payload: EventPayload::Quality {
                from: Quality::Auto,
                to: Quality::Level("720p".into()),
                reason: QualityChangeReason::Manual,
            },
            state: PlaybackState::Playing,
            metadata: MediaMetadata::default(),
            stats: PlaybackStats::default(),
        };

        let json = record.to_json();
        assert!(json.contains("\"event_type\":\"quality_change\""));
        assert!(json.contains("\"to\":\"720p\""));
        assert_eq!(
            record.quality_change(),
            Some((&Quality::Auto, &Quality::Level("720p".into())))
        );
        assert!(record.error().is_none());
    }
}
