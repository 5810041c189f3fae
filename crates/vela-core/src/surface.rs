//! Native playback surface contract
//!
//! The surface is the platform's media output (a video element, a native
//! player view). Vela never reimplements it; it drives the surface through
//! [`MediaSurface`] and listens to its lifecycle notifications.
//!
//! Notifications must be delivered from the host's event loop, never
//! re-entrantly from inside one of the control methods below. A surface that
//! confirms `pause()` should queue the `pause` notification, not invoke the
//! handler before `pause()` returns.

use crate::events::EventType;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

/// Stable identity of a native surface
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub String);

impl SurfaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token returned when binding a native listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceListenerId(pub u64);

/// Native lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeEvent {
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
    EnterPictureInPicture,
    LeavePictureInPicture,
}

impl NativeEvent {
    pub const ALL: [NativeEvent; 18] = [
        NativeEvent::LoadStart,
        NativeEvent::LoadedMetadata,
        NativeEvent::CanPlay,
        NativeEvent::Play,
        NativeEvent::Playing,
        NativeEvent::Pause,
        NativeEvent::Seeking,
        NativeEvent::Seeked,
        NativeEvent::Waiting,
        NativeEvent::TimeUpdate,
        NativeEvent::Progress,
        NativeEvent::VolumeChange,
        NativeEvent::RateChange,
        NativeEvent::Ended,
        NativeEvent::Error,
        NativeEvent::FullscreenChange,
        NativeEvent::EnterPictureInPicture,
        NativeEvent::LeavePictureInPicture,
    ];

    /// Canonical event this notification is published as
    pub fn canonical(&self) -> EventType {
        match self {
            NativeEvent::LoadStart => EventType::LoadStart,
            NativeEvent::LoadedMetadata => EventType::LoadedMetadata,
            NativeEvent::CanPlay => EventType::CanPlay,
            NativeEvent::Play => EventType::Play,
            NativeEvent::Playing => EventType::Playing,
            NativeEvent::Pause => EventType::Pause,
            NativeEvent::Seeking => EventType::Seeking,
            NativeEvent::Seeked => EventType::Seeked,
            NativeEvent::Waiting => EventType::Waiting,
            NativeEvent::TimeUpdate => EventType::TimeUpdate,
            NativeEvent::Progress => EventType::Progress,
            NativeEvent::VolumeChange => EventType::VolumeChange,
            NativeEvent::RateChange => EventType::RateChange,
            NativeEvent::Ended => EventType::Ended,
            NativeEvent::Error => EventType::Error,
            NativeEvent::FullscreenChange => EventType::FullscreenChange,
            NativeEvent::EnterPictureInPicture | NativeEvent::LeavePictureInPicture => {
                EventType::PictureInPictureChange
            }
        }
    }
}

/// Native media error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaErrorCode {
    Aborted,
    Network,
    Decode,
    SourceNotSupported,
    Unknown,
}

impl MediaErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaErrorCode::Aborted => "MEDIA_ERR_ABORTED",
            MediaErrorCode::Network => "MEDIA_ERR_NETWORK",
            MediaErrorCode::Decode => "MEDIA_ERR_DECODE",
            MediaErrorCode::SourceNotSupported => "MEDIA_ERR_SRC_NOT_SUPPORTED",
            MediaErrorCode::Unknown => "MEDIA_ERR_UNKNOWN",
        }
    }
}

/// Error reported by the surface alongside an `error` notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaError {
    pub code: MediaErrorCode,
    pub message: String,
}

impl MediaError {
    pub fn new(code: MediaErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Callback bound to a native notification
pub type NativeHandler = Arc<dyn Fn(NativeEvent) + Send + Sync>;

/// Platform media output driven by a session
///
/// Control methods request work; completion is confirmed only through the
/// corresponding notification. Requests that the platform refuses outright
/// (autoplay policy, fullscreen not permitted) return `Err` with a reason.
pub trait MediaSurface: Send {
    /// Identity used to enforce one session per surface
    fn id(&self) -> SurfaceId;

    // Source
    fn set_source(&mut self, source: Option<&Url>);
    fn load(&mut self);

    // Transport
    fn play(&mut self) -> Result<(), String>;
    fn pause(&mut self);
    fn is_paused(&self) -> bool;
    fn current_time(&self) -> f64;
    fn set_current_time(&mut self, time: f64);
    /// Total duration; NaN before metadata, infinite for live sources
    fn duration(&self) -> f64;

    // Output
    fn volume(&self) -> f64;
    fn set_volume(&mut self, volume: f64);
    fn is_muted(&self) -> bool;
    fn set_muted(&mut self, muted: bool);
    fn playback_rate(&self) -> f64;
    fn set_playback_rate(&mut self, rate: f64);

    // Introspection
    fn buffered(&self) -> Vec<TimeRange>;
    fn seekable(&self) -> Vec<TimeRange>;
    fn video_size(&self) -> (u32, u32);
    fn ready_state(&self) -> ReadyState;
    fn network_state(&self) -> NetworkState;
    fn frame_counts(&self) -> Option<FrameCounts> {
        None
    }
    /// Error behind the most recent `error` notification
    fn error(&self) -> Option<MediaError>;

    // Presentation
    fn request_fullscreen(&mut self) -> Result<(), String> {
        Err("fullscreen not supported".to_string())
    }
    fn exit_fullscreen(&mut self) -> Result<(), String> {
        Err("fullscreen not supported".to_string())
    }
    fn is_fullscreen(&self) -> bool {
        false
    }
    fn request_picture_in_picture(&mut self) -> Result<(), String> {
        Err("picture-in-picture not supported".to_string())
    }
    fn exit_picture_in_picture(&mut self) -> Result<(), String> {
        Err("picture-in-picture not supported".to_string())
    }
    fn is_picture_in_picture(&self) -> bool {
        false
    }

    // Notifications
    fn add_listener(&mut self, event: NativeEvent, handler: NativeHandler) -> SurfaceListenerId;
    fn remove_listener(&mut self, id: SurfaceListenerId) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_native_event_has_a_canonical_type() {
        let mapped: std::collections::HashSet<_> =
            NativeEvent::ALL.iter().map(|e| e.canonical()).collect();
        // Both picture-in-picture notifications share one canonical type
        assert_eq!(mapped.len(), NativeEvent::ALL.len() - 1);
        assert!(mapped.iter().all(EventType::is_native));
    }

    #[test]
    fn test_media_error_codes() {
        assert_eq!(MediaErrorCode::Decode.as_str(), "MEDIA_ERR_DECODE");
        let err = MediaError::new(MediaErrorCode::Network, "connection reset");
        assert_eq!(err.message, "connection reset");
    }
}
