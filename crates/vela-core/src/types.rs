//! Core types for Vela Core

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry identifier handed out by the player factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "player-{}", self.0)
    }
}

/// Which player implementation backs a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerKind {
    /// Progressive playback straight off the native surface
    Simple,
    /// Manifest playback through native support or the external client
    Adaptive,
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns quality tier name
    pub fn quality_name(&self) -> &'static str {
        match self.height {
            0 => "audio",
            1..=240 => "240p",
            241..=360 => "360p",
            361..=480 => "480p",
            481..=720 => "720p",
            721..=1080 => "1080p",
            1081..=1440 => "1440p",
            _ => "4K",
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Canonical playback states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// No source, or reset by `stop()`
    Idle,
    /// Source assigned, media not yet playable
    Loading,
    /// Enough data to start playback
    CanPlay,
    /// Content is playing
    Playing,
    /// Playback paused
    Paused,
    /// Seek in flight
    Seeking,
    /// Stalled waiting for data
    Waiting,
    /// Playback reached the end
    Ended,
    /// Unrecoverable error
    Error,
}

impl PlaybackState {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: PlaybackState) -> bool {
        use PlaybackState::*;

        // Any state other than idle can be forced back to idle (stop, new source)
        if target == Idle {
            return *self != Idle;
        }
        // Error is reachable from everywhere except itself
        if target == Error {
            return *self != Error;
        }

        matches!(
            (self, target),
            // From Idle
            (Idle, Loading) | (Idle, Playing) |
            // From Loading
            (Loading, CanPlay) |
            // From CanPlay
            (CanPlay, Playing) | (CanPlay, Paused) | (CanPlay, Seeking) | (CanPlay, Waiting) |
            // From Playing
            (Playing, Paused) | (Playing, Seeking) | (Playing, Waiting) | (Playing, Ended) |
            // From Paused
            (Paused, Playing) | (Paused, Seeking) | (Paused, Waiting) | (Paused, Ended) |
            // From Seeking
            (Seeking, Playing) | (Seeking, Paused) | (Seeking, CanPlay) | (Seeking, Waiting) |
            // From Waiting
            (Waiting, Playing) | (Waiting, Paused) | (Waiting, CanPlay) | (Waiting, Seeking) |
            // From Ended / Error: only a new source
            (Ended, Loading) | (Error, Loading)
        )
    }

    /// Terminal until a new source is assigned
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlaybackState::Ended | PlaybackState::Error)
    }

    /// Transient sub-states of playing/paused
    pub fn is_transient(&self) -> bool {
        matches!(self, PlaybackState::Seeking | PlaybackState::Waiting)
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Loading => write!(f, "loading"),
            PlaybackState::CanPlay => write!(f, "canplay"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
            PlaybackState::Seeking => write!(f, "seeking"),
            PlaybackState::Waiting => write!(f, "waiting"),
            PlaybackState::Ended => write!(f, "ended"),
            PlaybackState::Error => write!(f, "error"),
        }
    }
}

/// Selected quality: the `auto` sentinel or a named catalogue entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Quality {
    #[default]
    Auto,
    Level(String),
}

impl Quality {
    pub const AUTO: &'static str = "auto";

    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.eq_ignore_ascii_case(Self::AUTO) {
            Quality::Auto
        } else {
            Quality::Level(name)
        }
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, Quality::Auto)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Quality::Auto => Self::AUTO,
            Quality::Level(name) => name,
        }
    }
}

impl From<String> for Quality {
    fn from(value: String) -> Self {
        Quality::named(value)
    }
}

impl From<&str> for Quality {
    fn from(value: &str) -> Self {
        Quality::named(value)
    }
}

impl From<Quality> for String {
    fn from(value: Quality) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rung of a manifest's bitrate ladder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityLevel {
    /// Index into the streaming client's level list
    pub index: usize,
    /// Resolution label, e.g. "720p"
    pub name: String,
    /// Bandwidth in bits per second
    pub bitrate: u64,
    pub width: u32,
    pub height: u32,
}

impl QualityLevel {
    pub fn quality(&self) -> Quality {
        Quality::Level(self.name.clone())
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// Why the active quality changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityChangeReason {
    /// ABR algorithm decision
    Abr,
    /// User manual selection
    Manual,
}

/// A contiguous buffered or seekable range, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time <= self.end
    }

    pub fn len(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0.0
    }
}

/// Native readiness, mirroring the media element's ready states
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    #[default]
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

/// Native network activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkState {
    #[default]
    Empty,
    Idle,
    Loading,
    NoSource,
}

/// Derived description of the loaded media
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaMetadata {
    /// Total duration, or the current live window for live streams
    pub duration: Option<f64>,
    pub video_width: u32,
    pub video_height: u32,
    pub ready_state: ReadyState,
    pub network_state: NetworkState,
    /// Source is a live stream
    pub is_live: bool,
    /// Manifest loaded and quality catalogue available
    pub stream_ready: bool,
}

impl MediaMetadata {
    pub fn resolution(&self) -> Option<Resolution> {
        (self.video_height > 0).then(|| Resolution::new(self.video_width, self.video_height))
    }

    /// Surface reports enough data to begin playback
    pub fn can_play(&self) -> bool {
        self.ready_state >= ReadyState::HaveFutureData
    }
}

/// Per-session playback counters
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaybackStats {
    /// Time from load start to first `canplay`
    pub load_time: Option<Duration>,
    /// Accumulated time spent in `playing`
    pub play_time: Duration,
    pub seek_count: u32,
    /// Monotonic; every error notification and recovery attempt counts
    pub error_count: u32,
    pub quality_changes: u32,
    pub buffering_events: u32,
    pub dropped_frames: u64,
    pub total_frames: u64,
    /// Rolling average of active level bitrates, in bps
    pub average_bitrate: u64,
}

impl PlaybackStats {
    /// Fraction of decoded frames that were dropped
    pub fn dropped_frame_ratio(&self) -> f64 {
        if self.total_frames == 0 {
            0.0
        } else {
            self.dropped_frames as f64 / self.total_frames as f64
        }
    }
}

/// Frame counters reported by the native surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameCounts {
    pub dropped: u64,
    pub total: u64,
}

/// Network information for buffer decisions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// Estimated bandwidth in bps
    pub bandwidth_estimate: u64,
    /// RTT in milliseconds
    pub rtt_ms: u32,
    /// Connection type (if known)
    pub connection_type: Option<ConnectionType>,
    /// Is connection metered
    pub metered: bool,
}

/// Connection type for network-aware buffering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Ethernet,
    Wifi,
    Cellular5G,
    Cellular4G,
    Cellular3G,
    Cellular2G,
    Unknown,
}
