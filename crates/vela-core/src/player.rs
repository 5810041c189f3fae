//! Common control surface for every player kind

use crate::config::PlayerConfig;
use crate::events::{EventPayload, EventRecord, EventType, Listener, ListenerHandle};
use crate::request::PendingRequest;
use crate::surface::SurfaceId;
use crate::types::*;
use crate::Result;
use std::sync::Arc;

/// Operations shared by the simple and adaptive players.
///
/// All methods are synchronous and take `&self`; a destroyed player turns
/// every control call into a no-op.
pub trait Player: Send + Sync {
    fn session_id(&self) -> SessionId;
    fn kind(&self) -> PlayerKind;
    fn surface_id(&self) -> SurfaceId;
    /// Configuration the player was built from
    fn config(&self) -> PlayerConfig;

    fn state(&self) -> PlaybackState;
    fn metadata(&self) -> MediaMetadata;
    fn stats(&self) -> PlaybackStats;
    fn current_quality(&self) -> Quality;
    fn current_time(&self) -> f64;
    fn playback_rate(&self) -> f64;
    fn is_paused(&self) -> bool;
    fn buffered(&self) -> Vec<TimeRange>;
    /// Bitrate of the level currently playing, when known
    fn current_bitrate(&self) -> Option<u64>;
    fn is_destroyed(&self) -> bool;

    /// Request playback; resolves when the surface confirms `playing`
    fn play(&self) -> PendingRequest;
    fn pause(&self);
    /// Pause, rewind to the start and reset to `idle`
    fn stop(&self);
    /// Seek, clamping into the playable range
    fn seek(&self, time: f64);
    fn set_volume(&self, volume: f64) -> Result<()>;
    fn set_muted(&self, muted: bool);
    fn set_playback_rate(&self, rate: f64) -> Result<()>;

    fn available_qualities(&self) -> Vec<Quality>;
    fn quality_levels(&self) -> Vec<QualityLevel>;
    fn set_quality(&self, quality: &Quality) -> Result<()>;

    fn enter_fullscreen(&self) -> PendingRequest;
    fn exit_fullscreen(&self) -> PendingRequest;
    fn enter_picture_in_picture(&self) -> PendingRequest;
    fn exit_picture_in_picture(&self) -> PendingRequest;

    fn add_listener(
        &self,
        event: EventType,
        listener: Listener<EventRecord>,
        once: bool,
    ) -> ListenerHandle<EventType>;
    fn off(&self, handle: &ListenerHandle<EventType>) -> bool;
    /// Publish a record on this session's bus
    fn emit(&self, event: EventType, payload: EventPayload) -> bool;
    fn remove_all_listeners(&self, event: Option<EventType>);
    fn listener_count(&self) -> usize;

    /// Tear down; idempotent
    fn destroy(&self);
}

/// Closure-friendly subscription helpers
pub trait PlayerExt: Player {
    fn on<F>(&self, event: EventType, listener: F) -> ListenerHandle<EventType>
    where
        F: Fn(&EventRecord) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_listener(event, Arc::new(listener), false)
    }

    fn once<F>(&self, event: EventType, listener: F) -> ListenerHandle<EventType>
    where
        F: Fn(&EventRecord) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_listener(event, Arc::new(listener), true)
    }
}

impl<P: Player + ?Sized> PlayerExt for P {}
