//! In-memory collaborators for headless playback
//!
//! [`SimSurface`] and [`SimStreamingClient`] record every control call and
//! only deliver notifications when told to (`fire`, `emit`), outside their
//! own locks. Handles are cheap clones over shared state, so a test keeps
//! one clone while the player owns another.

use crate::buffer::NetworkProbe;
use crate::config::ClientOptions;
use crate::streaming::{StreamingClient, StreamingClientProvider, StreamingEvent, StreamingHandler};
use crate::surface::{
    MediaError, MediaSurface, NativeEvent, NativeHandler, SurfaceId, SurfaceListenerId,
};
use crate::types::*;
use crate::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use url::Url;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scriptable media surface
#[derive(Clone)]
pub struct SimSurface {
    id: SurfaceId,
    state: Arc<Mutex<SurfaceState>>,
}

struct SurfaceState {
    source: Option<Url>,
    load_calls: usize,
    play_calls: usize,
    paused: bool,
    position: f64,
    duration: f64,
    volume: f64,
    muted: bool,
    rate: f64,
    buffered: Vec<TimeRange>,
    seekable: Vec<TimeRange>,
    video_size: (u32, u32),
    ready_state: ReadyState,
    network_state: NetworkState,
    frames: Option<FrameCounts>,
    error: Option<MediaError>,
    deny_play: Option<String>,
    allow_fullscreen: bool,
    fullscreen: bool,
    allow_picture_in_picture: bool,
    picture_in_picture: bool,
    next_listener: u64,
    listeners: Vec<(SurfaceListenerId, NativeEvent, NativeHandler)>,
}

impl SimSurface {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: SurfaceId::new(id),
            state: Arc::new(Mutex::new(SurfaceState {
                source: None,
                load_calls: 0,
                play_calls: 0,
                paused: true,
                position: 0.0,
                duration: f64::NAN,
                volume: 1.0,
                muted: false,
                rate: 1.0,
                buffered: Vec::new(),
                seekable: Vec::new(),
                video_size: (0, 0),
                ready_state: ReadyState::HaveNothing,
                network_state: NetworkState::Empty,
                frames: None,
                error: None,
                deny_play: None,
                allow_fullscreen: false,
                fullscreen: false,
                allow_picture_in_picture: false,
                picture_in_picture: false,
                next_listener: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Owned handle for a session
    pub fn boxed(&self) -> Box<dyn MediaSurface> {
        Box::new(self.clone())
    }

    /// Deliver a native notification to every bound handler
    pub fn fire(&self, event: NativeEvent) {
        let handlers: Vec<NativeHandler> = lock(&self.state)
            .listeners
            .iter()
            .filter(|(_, bound, _)| *bound == event)
            .map(|(_, _, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    pub fn set_duration(&self, duration: f64) {
        lock(&self.state).duration = duration;
    }

    pub fn set_position(&self, position: f64) {
        lock(&self.state).position = position;
    }

    pub fn set_buffered(&self, ranges: Vec<TimeRange>) {
        lock(&self.state).buffered = ranges;
    }

    pub fn set_seekable(&self, ranges: Vec<TimeRange>) {
        lock(&self.state).seekable = ranges;
    }

    pub fn set_video_size(&self, width: u32, height: u32) {
        lock(&self.state).video_size = (width, height);
    }

    pub fn set_ready_state(&self, ready_state: ReadyState) {
        lock(&self.state).ready_state = ready_state;
    }

    pub fn set_frame_counts(&self, frames: FrameCounts) {
        lock(&self.state).frames = Some(frames);
    }

    /// Error reported for the next `error` notification
    pub fn fail_with(&self, error: MediaError) {
        lock(&self.state).error = Some(error);
    }

    /// Refuse `play()` with `reason`, or accept again with `None`
    pub fn deny_play(&self, reason: Option<&str>) {
        lock(&self.state).deny_play = reason.map(str::to_string);
    }

    pub fn allow_fullscreen(&self, allow: bool) {
        lock(&self.state).allow_fullscreen = allow;
    }

    pub fn allow_picture_in_picture(&self, allow: bool) {
        lock(&self.state).allow_picture_in_picture = allow;
    }

    pub fn source(&self) -> Option<Url> {
        lock(&self.state).source.clone()
    }

    pub fn load_calls(&self) -> usize {
        lock(&self.state).load_calls
    }

    pub fn play_calls(&self) -> usize {
        lock(&self.state).play_calls
    }

    pub fn position(&self) -> f64 {
        lock(&self.state).position
    }

    pub fn volume(&self) -> f64 {
        lock(&self.state).volume
    }

    pub fn muted(&self) -> bool {
        lock(&self.state).muted
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.state).paused
    }

    /// Native handlers currently bound
    pub fn listener_count(&self) -> usize {
        lock(&self.state).listeners.len()
    }
}

impl MediaSurface for SimSurface {
    fn id(&self) -> SurfaceId {
        self.id.clone()
    }

    fn set_source(&mut self, source: Option<&Url>) {
        let mut state = lock(&self.state);
        state.source = source.cloned();
        state.network_state = if source.is_some() {
            NetworkState::Idle
        } else {
            NetworkState::NoSource
        };
    }

    fn load(&mut self) {
        lock(&self.state).load_calls += 1;
    }

    fn play(&mut self) -> std::result::Result<(), String> {
        let mut state = lock(&self.state);
        if let Some(reason) = &state.deny_play {
            return Err(reason.clone());
        }
        state.play_calls += 1;
        state.paused = false;
        Ok(())
    }

    fn pause(&mut self) {
        lock(&self.state).paused = true;
    }

    fn is_paused(&self) -> bool {
        lock(&self.state).paused
    }

    fn current_time(&self) -> f64 {
        lock(&self.state).position
    }

    fn set_current_time(&mut self, time: f64) {
        lock(&self.state).position = time;
    }

    fn duration(&self) -> f64 {
        lock(&self.state).duration
    }

    fn volume(&self) -> f64 {
        lock(&self.state).volume
    }

    fn set_volume(&mut self, volume: f64) {
        lock(&self.state).volume = volume;
    }

    fn is_muted(&self) -> bool {
        lock(&self.state).muted
    }

    fn set_muted(&mut self, muted: bool) {
        lock(&self.state).muted = muted;
    }

    fn playback_rate(&self) -> f64 {
        lock(&self.state).rate
    }

    fn set_playback_rate(&mut self, rate: f64) {
        lock(&self.state).rate = rate;
    }

    fn buffered(&self) -> Vec<TimeRange> {
        lock(&self.state).buffered.clone()
    }

    fn seekable(&self) -> Vec<TimeRange> {
        lock(&self.state).seekable.clone()
    }

    fn video_size(&self) -> (u32, u32) {
        lock(&self.state).video_size
    }

    fn ready_state(&self) -> ReadyState {
        lock(&self.state).ready_state
    }

    fn network_state(&self) -> NetworkState {
        lock(&self.state).network_state
    }

    fn frame_counts(&self) -> Option<FrameCounts> {
        lock(&self.state).frames
    }

    fn error(&self) -> Option<MediaError> {
        lock(&self.state).error.clone()
    }

    fn request_fullscreen(&mut self) -> std::result::Result<(), String> {
        let mut state = lock(&self.state);
        if !state.allow_fullscreen {
            return Err("fullscreen not permitted".to_string());
        }
        state.fullscreen = true;
        Ok(())
    }

    fn exit_fullscreen(&mut self) -> std::result::Result<(), String> {
        lock(&self.state).fullscreen = false;
        Ok(())
    }

    fn is_fullscreen(&self) -> bool {
        lock(&self.state).fullscreen
    }

    fn request_picture_in_picture(&mut self) -> std::result::Result<(), String> {
        let mut state = lock(&self.state);
        if !state.allow_picture_in_picture {
            return Err("picture-in-picture not permitted".to_string());
        }
        state.picture_in_picture = true;
        Ok(())
    }

    fn exit_picture_in_picture(&mut self) -> std::result::Result<(), String> {
        lock(&self.state).picture_in_picture = false;
        Ok(())
    }

    fn is_picture_in_picture(&self) -> bool {
        lock(&self.state).picture_in_picture
    }

    fn add_listener(&mut self, event: NativeEvent, handler: NativeHandler) -> SurfaceListenerId {
        let mut state = lock(&self.state);
        state.next_listener += 1;
        let id = SurfaceListenerId(state.next_listener);
        state.listeners.push((id, event, handler));
        id
    }

    fn remove_listener(&mut self, id: SurfaceListenerId) -> bool {
        let mut state = lock(&self.state);
        let before = state.listeners.len();
        state.listeners.retain(|(bound, _, _)| *bound != id);
        state.listeners.len() != before
    }
}

impl std::fmt::Debug for SimSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimSurface")
            .field("id", &self.id)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Scriptable streaming client
#[derive(Clone, Default)]
pub struct SimStreamingClient {
    state: Arc<Mutex<ClientState>>,
}

#[derive(Default)]
struct ClientState {
    options: ClientOptions,
    attached: Option<SurfaceId>,
    loaded: Option<Url>,
    level: Option<usize>,
    media_recoveries: usize,
    start_loads: Vec<f64>,
    destroyed: bool,
    handler: Option<StreamingHandler>,
}

impl SimStreamingClient {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClientState {
                options,
                ..Default::default()
            })),
        }
    }

    /// Deliver a notification; a destroyed client stays silent
    pub fn emit(&self, event: StreamingEvent) {
        let handler = {
            let state = lock(&self.state);
            if state.destroyed {
                return;
            }
            state.handler.clone()
        };
        if let Some(handler) = handler {
            handler(event);
        }
    }

    pub fn options(&self) -> ClientOptions {
        lock(&self.state).options.clone()
    }

    pub fn attached(&self) -> Option<SurfaceId> {
        lock(&self.state).attached.clone()
    }

    pub fn loaded(&self) -> Option<Url> {
        lock(&self.state).loaded.clone()
    }

    pub fn current_level(&self) -> Option<usize> {
        lock(&self.state).level
    }

    pub fn media_recoveries(&self) -> usize {
        lock(&self.state).media_recoveries
    }

    /// Positions passed to `start_load`
    pub fn start_loads(&self) -> Vec<f64> {
        lock(&self.state).start_loads.clone()
    }

    pub fn is_destroyed(&self) -> bool {
        lock(&self.state).destroyed
    }
}

impl StreamingClient for SimStreamingClient {
    fn attach_media(&mut self, surface: &SurfaceId) {
        lock(&self.state).attached = Some(surface.clone());
    }

    fn load_source(&mut self, url: &Url) {
        lock(&self.state).loaded = Some(url.clone());
    }

    fn set_current_level(&mut self, level: Option<usize>) {
        lock(&self.state).level = level;
    }

    fn current_level(&self) -> Option<usize> {
        lock(&self.state).level
    }

    fn recover_media_error(&mut self) {
        lock(&self.state).media_recoveries += 1;
    }

    fn start_load(&mut self, position: f64) {
        lock(&self.state).start_loads.push(position);
    }

    fn set_handler(&mut self, handler: StreamingHandler) {
        lock(&self.state).handler = Some(handler);
    }

    fn destroy(&mut self) {
        let mut state = lock(&self.state);
        state.destroyed = true;
        state.handler = None;
        state.attached = None;
    }
}

/// Provider handing out [`SimStreamingClient`]s and keeping a handle to each
#[derive(Clone, Default)]
pub struct SimClientProvider {
    state: Arc<Mutex<ProviderState>>,
}

#[derive(Default)]
struct ProviderState {
    clients: Vec<SimStreamingClient>,
    failure: Option<String>,
}

impl SimClientProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `create_client` fail with `reason`
    pub fn fail_with(&self, reason: impl Into<String>) {
        lock(&self.state).failure = Some(reason.into());
    }

    pub fn created(&self) -> usize {
        lock(&self.state).clients.len()
    }

    pub fn last_client(&self) -> Option<SimStreamingClient> {
        lock(&self.state).clients.last().cloned()
    }
}

impl StreamingClientProvider for SimClientProvider {
    fn create_client(&self, options: &ClientOptions) -> Result<Box<dyn StreamingClient>> {
        let mut state = lock(&self.state);
        if let Some(reason) = &state.failure {
            return Err(Error::InvalidEnvironment(reason.clone()));
        }
        let client = SimStreamingClient::new(options.clone());
        state.clients.push(client.clone());
        Ok(Box::new(client))
    }
}

/// Network probe returning a fixed, replaceable answer
#[derive(Debug, Default)]
pub struct StaticNetworkProbe {
    info: Mutex<Option<NetworkInfo>>,
}

impl StaticNetworkProbe {
    pub fn new(info: NetworkInfo) -> Self {
        Self {
            info: Mutex::new(Some(info)),
        }
    }

    pub fn set(&self, info: Option<NetworkInfo>) {
        *lock(&self.info) = info;
    }
}

impl NetworkProbe for StaticNetworkProbe {
    fn network_info(&self) -> Option<NetworkInfo> {
        lock(&self.info).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fire_reaches_only_matching_handlers() {
        let surface = SimSurface::new("video-1");
        let mut handle = surface.boxed();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = handle.add_listener(
            NativeEvent::Playing,
            Arc::new(move |_: NativeEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        surface.fire(NativeEvent::Pause);
        surface.fire(NativeEvent::Playing);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(handle.remove_listener(id));
        assert!(!handle.remove_listener(id));
        surface.fire(NativeEvent::Playing);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_destroyed_client_is_silent() {
        let provider = SimClientProvider::new();
        let mut client = provider.create_client(&ClientOptions::default()).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        client.set_handler(Arc::new(move |_: StreamingEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let handle = provider.last_client().unwrap();
        handle.emit(StreamingEvent::LevelSwitched { level: 0 });
        client.destroy();
        handle.emit(StreamingEvent::LevelSwitched { level: 1 });

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(handle.is_destroyed());
    }

    #[test]
    fn test_provider_failure() {
        let provider = SimClientProvider::new();
        provider.fail_with("client library missing");
        assert!(provider.create_client(&ClientOptions::default()).is_err());
        assert_eq!(provider.created(), 0);
    }
}
