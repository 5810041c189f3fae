//! Playback Session - state machine over a single media surface
//!
//! Native notifications drive every state change:
//! - Each notification is published as exactly one canonical event
//! - Legal transitions additionally publish a `statechange` event
//! - Control calls (`play`, fullscreen) settle when the confirming
//!   notification arrives
//!
//! Records are built under the session lock and emitted after it is
//! released, so listeners may call back into the session.

use crate::config::{is_allowed_rate, PlayerConfig};
use crate::error::ErrorKind;
use crate::events::{
    ErrorPayload, EventPayload, EventRecord, EventType, Listener, ListenerHandle, PlayerEventBus,
};
use crate::player::Player;
use crate::request::{PendingRequest, PendingSet};
use crate::surface::{
    MediaError, MediaErrorCode, MediaSurface, NativeEvent, SurfaceId, SurfaceListenerId,
};
use crate::types::*;
use crate::{Error, Result};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Bitrate samples kept for the running average
const BITRATE_WINDOW: usize = 20;

/// Outcome of offering a native error to the session hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NativeErrorHandling {
    /// Fall through to the fatal default
    Default,
    /// The hook took over; publish a non-fatal error only
    Recovered,
}

/// Extension points used by the adaptive player
pub(crate) trait SessionHooks: Send + Sync {
    fn native_error(&self, session: &PlaybackSession, error: &MediaError) -> NativeErrorHandling;

    fn native_event(&self, _session: &PlaybackSession, _event: NativeEvent) {}
}

/// Playback session bound to one media surface.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct PlaybackSession {
    shared: Arc<Shared>,
}

struct Shared {
    id: SessionId,
    kind: PlayerKind,
    surface_id: SurfaceId,
    destroyed: AtomicBool,
    core: Mutex<Core>,
    events: PlayerEventBus,
    hooks: OnceLock<Arc<dyn SessionHooks>>,
}

#[derive(Debug, Clone, Copy)]
enum Presentation {
    Fullscreen,
    PictureInPicture,
}

struct Core {
    session_id: SessionId,
    surface: Box<dyn MediaSurface>,
    config: PlayerConfig,
    state: PlaybackState,
    metadata: MediaMetadata,
    stats: PlaybackStats,
    quality: Quality,
    live_hint: bool,
    native_listeners: Vec<SurfaceListenerId>,
    /// State to settle into once a seek completes
    resume_state: PlaybackState,
    load_started_at: Option<Instant>,
    playing_since: Option<Instant>,
    pending_start: Option<f64>,
    bitrate_samples: VecDeque<u64>,
    pending_play: PendingSet,
    pending_fullscreen: PendingSet,
    pending_pip: PendingSet,
}

impl PlaybackSession {
    /// Create a session and start loading the configured source.
    ///
    /// Adaptive configurations are handed to the surface as-is; use
    /// [`crate::AdaptivePlayer`] for client-driven playback.
    pub fn new(surface: Box<dyn MediaSurface>, config: PlayerConfig) -> Result<Self> {
        let source = match &config {
            PlayerConfig::Simple(simple) => simple.initial_source().map(|s| s.url.clone()),
            PlayerConfig::AdaptiveStreaming(streaming) => streaming
                .manifest_source()
                .or_else(|| streaming.sources.first())
                .map(|s| s.url.clone()),
        };
        let session = Self::build(surface, config, PlayerKind::Simple)?;
        session.assign_source(source.as_ref());
        Ok(session)
    }

    /// Validate, bind native listeners and apply initial options without
    /// assigning a source
    pub(crate) fn build(
        surface: Box<dyn MediaSurface>,
        config: PlayerConfig,
        kind: PlayerKind,
    ) -> Result<Self> {
        config.validate()?;

        let id = SessionId::new();
        let surface_id = surface.id();
        let events = PlayerEventBus::new();
        events.set_max_listeners(config.options().max_listeners);

        let core = Core {
            session_id: id,
            surface,
            quality: Quality::Auto,
            config,
            state: PlaybackState::Idle,
            metadata: MediaMetadata::default(),
            stats: PlaybackStats::default(),
            live_hint: false,
            native_listeners: Vec::new(),
            resume_state: PlaybackState::CanPlay,
            load_started_at: None,
            playing_since: None,
            pending_start: None,
            bitrate_samples: VecDeque::with_capacity(BITRATE_WINDOW),
            pending_play: PendingSet::default(),
            pending_fullscreen: PendingSet::default(),
            pending_pip: PendingSet::default(),
        };

        let shared = Arc::new(Shared {
            id,
            kind,
            surface_id,
            destroyed: AtomicBool::new(false),
            core: Mutex::new(core),
            events,
            hooks: OnceLock::new(),
        });

        {
            let mut core = shared.lock();
            for event in NativeEvent::ALL {
                let weak: Weak<Shared> = Arc::downgrade(&shared);
                let id = core.surface.add_listener(
                    event,
                    Arc::new(move |native: NativeEvent| {
                        if let Some(shared) = weak.upgrade() {
                            Shared::handle_native(&shared, native);
                        }
                    }),
                );
                core.native_listeners.push(id);
            }

            let options = core.config.options().clone();
            core.surface.set_volume(options.volume.clamp(0.0, 1.0));
            core.surface.set_muted(options.muted);
            core.surface.set_playback_rate(options.playback_rate);
        }

        info!(session_id = %id, kind = ?kind, "Session created");
        Ok(Self { shared })
    }

    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    pub(crate) fn install_hooks(&self, hooks: Arc<dyn SessionHooks>) {
        if self.shared.hooks.set(hooks).is_err() {
            warn!(session_id = %self.shared.id, "Session hooks already installed");
        }
    }

    /// Point the surface at `source` and start loading it
    pub(crate) fn assign_source(&self, source: Option<&Url>) {
        if self.is_destroyed() {
            return;
        }
        {
            let mut core = self.shared.lock();
            core.prepare_load();
            core.surface.set_source(source);
            core.surface.load();
        }
        if let Some(url) = source {
            info!(url = %url, session_id = %self.shared.id, "Loading source");
        }
        self.autoplay();
    }

    /// Reset load bookkeeping for a source an external client will feed
    pub(crate) fn prepare_external_load(&self) {
        self.shared.lock().prepare_load();
    }

    /// Request playback if the configuration asks for autoplay
    pub(crate) fn autoplay(&self) {
        let autoplay = self.shared.lock().config.options().autoplay;
        if autoplay {
            // Denials are logged by `play`; nobody waits on the result
            drop(Player::play(self));
        }
    }

    pub(crate) fn mark_stream_ready(&self, live: bool) {
        let mut core = self.shared.lock();
        core.live_hint = live;
        core.metadata.stream_ready = true;
        core.refresh_metadata();
    }

    pub(crate) fn set_current_quality(&self, quality: Quality) {
        self.shared.lock().quality = quality;
    }

    pub(crate) fn record_error(&self) {
        self.shared.lock().stats.error_count += 1;
    }

    /// Count a quality switch and publish it
    pub(crate) fn record_quality_change(
        &self,
        from: Quality,
        to: Quality,
        reason: QualityChangeReason,
        bitrate: Option<u64>,
    ) {
        if self.is_destroyed() {
            return;
        }
        let record = {
            let mut core = self.shared.lock();
            core.stats.quality_changes += 1;
            if let Some(bitrate) = bitrate {
                core.push_bitrate(bitrate);
            }
            core.record(EventType::QualityChange, EventPayload::Quality { from, to, reason })
        };
        self.shared.dispatch(vec![record]);
    }

    /// Enter the error state and publish a fatal error
    pub(crate) fn fail(&self, error: ErrorPayload) {
        if self.is_destroyed() {
            return;
        }
        let records = {
            let mut core = self.shared.lock();
            core.pending_play.reject_all(&error.to_error());
            let transition = core.transition(PlaybackState::Error);
            let mut records = vec![core.record(EventType::Error, EventPayload::Error(error))];
            records.extend(core.state_record(transition));
            records
        };
        self.shared.dispatch(records);
    }

    fn request_presentation(&self, mode: Presentation, enter: bool) -> PendingRequest {
        if self.is_destroyed() {
            return PendingRequest::settled(Err(Error::Destroyed));
        }
        let mut core = self.shared.lock();
        if core.is_inert() {
            return PendingRequest::settled(Err(Error::PlaybackDenied(
                "session is in the error state".to_string(),
            )));
        }
        let active = match mode {
            Presentation::Fullscreen => core.surface.is_fullscreen(),
            Presentation::PictureInPicture => core.surface.is_picture_in_picture(),
        };
        if active == enter {
            return PendingRequest::settled(Ok(()));
        }

        let result = match (mode, enter) {
            (Presentation::Fullscreen, true) => core.surface.request_fullscreen(),
            (Presentation::Fullscreen, false) => core.surface.exit_fullscreen(),
            (Presentation::PictureInPicture, true) => core.surface.request_picture_in_picture(),
            (Presentation::PictureInPicture, false) => core.surface.exit_picture_in_picture(),
        };
        match result {
            Ok(()) => {
                let (completer, request) = PendingRequest::channel();
                core.pending_presentation(mode).push(completer);
                request
            }
            Err(reason) => {
                debug!(?mode, enter, %reason, "Presentation request refused");
                PendingRequest::settled(Err(Error::PlaybackDenied(reason)))
            }
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Emit records in order, stopping if a listener destroyed the session
    fn dispatch(&self, records: Vec<EventRecord>) -> bool {
        let mut delivered = false;
        for record in records {
            if self.is_destroyed() {
                break;
            }
            delivered |= self.events.emit(&record.event_type, &record);
        }
        delivered
    }

    fn handle_native(shared: &Arc<Shared>, event: NativeEvent) {
        if shared.is_destroyed() {
            return;
        }
        let session = PlaybackSession {
            shared: Arc::clone(shared),
        };
        let hooks = shared.hooks.get().cloned();

        if event == NativeEvent::Error {
            if let Some(hooks) = &hooks {
                let error = shared.lock().surface_error();
                if hooks.native_error(&session, &error) == NativeErrorHandling::Recovered {
                    let records = shared.lock().recovered_error(&error);
                    shared.dispatch(records);
                    return;
                }
            }
        }

        let records = shared.lock().apply_native(event);
        shared.dispatch(records);

        if let Some(hooks) = hooks {
            if !shared.is_destroyed() {
                hooks.native_event(&session, event);
            }
        }
    }
}

impl Core {
    fn prepare_load(&mut self) {
        self.pending_start = self.config.options().start_time;
        self.load_started_at = None;
    }

    fn record(&self, event_type: EventType, payload: EventPayload) -> EventRecord {
        EventRecord {
            event_type,
            session_id: self.session_id,
            timestamp: Utc::now(),
            current_time: self.surface.current_time(),
            duration: self.metadata.duration,
            payload,
            state: self.state,
            metadata: self.metadata.clone(),
            stats: self.stats_snapshot(),
        }
    }

    fn state_record(&self, transition: Option<(PlaybackState, PlaybackState)>) -> Option<EventRecord> {
        transition.map(|(from, to)| self.record(EventType::StateChange, EventPayload::State { from, to }))
    }

    fn stats_snapshot(&self) -> PlaybackStats {
        let mut stats = self.stats.clone();
        if let Some(since) = self.playing_since {
            stats.play_time += since.elapsed();
        }
        stats
    }

    /// Apply a transition if the state machine allows it
    fn transition(&mut self, to: PlaybackState) -> Option<(PlaybackState, PlaybackState)> {
        let from = self.state;
        if from == to {
            return None;
        }
        if !from.can_transition_to(to) {
            debug!(from = %from, to = %to, "Ignoring invalid state transition");
            return None;
        }
        self.state = to;

        if to == PlaybackState::Playing {
            self.playing_since.get_or_insert_with(Instant::now);
        } else if let Some(since) = self.playing_since.take() {
            self.stats.play_time += since.elapsed();
        }

        debug!(from = %from, to = %to, "State transition");
        Some((from, to))
    }

    /// A failed session ignores controls until `stop` or a new source
    fn is_inert(&self) -> bool {
        self.state == PlaybackState::Error
    }

    fn refresh_metadata(&mut self) {
        let raw = self.surface.duration();
        let is_live = self.live_hint || raw.is_infinite();
        self.metadata.is_live = is_live;
        self.metadata.duration = if is_live {
            self.surface.seekable().last().map(TimeRange::len)
        } else if raw.is_finite() && raw > 0.0 {
            Some(raw)
        } else {
            None
        };

        let (width, height) = self.surface.video_size();
        self.metadata.video_width = width;
        self.metadata.video_height = height;
        self.metadata.ready_state = self.surface.ready_state();
        self.metadata.network_state = self.surface.network_state();

        if let Some(frames) = self.surface.frame_counts() {
            self.stats.dropped_frames = frames.dropped;
            self.stats.total_frames = frames.total;
        }
    }

    /// Clamp a seek target into the playable range
    fn clamp_position(&self, time: f64) -> f64 {
        let time = if time.is_nan() { 0.0 } else { time };
        if self.metadata.is_live {
            if let Some(window) = self.surface.seekable().last() {
                return time.clamp(window.start, window.end);
            }
        }
        match self.metadata.duration {
            Some(duration) => time.clamp(0.0, duration),
            None if time.is_finite() => time.max(0.0),
            None => self.surface.current_time(),
        }
    }

    /// Where a completed seek leaves playback
    fn settled_state(&self) -> PlaybackState {
        if !self.surface.is_paused() {
            PlaybackState::Playing
        } else if self.resume_state == PlaybackState::CanPlay {
            PlaybackState::CanPlay
        } else {
            PlaybackState::Paused
        }
    }

    fn push_bitrate(&mut self, bitrate: u64) {
        if self.bitrate_samples.len() == BITRATE_WINDOW {
            self.bitrate_samples.pop_front();
        }
        self.bitrate_samples.push_back(bitrate);
        let total: u64 = self.bitrate_samples.iter().sum();
        self.stats.average_bitrate = total / self.bitrate_samples.len() as u64;
    }

    fn pending_presentation(&mut self, mode: Presentation) -> &mut PendingSet {
        match mode {
            Presentation::Fullscreen => &mut self.pending_fullscreen,
            Presentation::PictureInPicture => &mut self.pending_pip,
        }
    }

    fn surface_error(&self) -> MediaError {
        self.surface
            .error()
            .unwrap_or_else(|| MediaError::new(MediaErrorCode::Unknown, "unknown media error"))
    }

    fn recovered_error(&mut self, error: &MediaError) -> Vec<EventRecord> {
        self.stats.error_count += 1;
        self.refresh_metadata();
        warn!(code = error.code.as_str(), message = %error.message, "Native error handed to recovery");
        vec![self.record(EventType::Error, EventPayload::Error(native_error_payload(error, false)))]
    }

    /// Map one native notification onto state and records
    fn apply_native(&mut self, event: NativeEvent) -> Vec<EventRecord> {
        use PlaybackState as S;

        self.refresh_metadata();
        let mut transition = None;
        let mut payload = EventPayload::None;

        match event {
            NativeEvent::LoadStart => {
                self.load_started_at = Some(Instant::now());
                transition = self.transition(S::Loading);
            }
            NativeEvent::LoadedMetadata => {
                payload = EventPayload::Metadata {
                    duration: self.metadata.duration,
                    width: self.metadata.video_width,
                    height: self.metadata.video_height,
                };
                if let Some(start) = self.pending_start.take() {
                    let target = self.clamp_position(start);
                    debug!(start = target, "Applying start time");
                    self.surface.set_current_time(target);
                }
            }
            NativeEvent::CanPlay => {
                if self.stats.load_time.is_none() {
                    if let Some(started) = self.load_started_at {
                        self.stats.load_time = Some(started.elapsed());
                    }
                }
                if self.state == S::Loading {
                    transition = self.transition(S::CanPlay);
                }
            }
            NativeEvent::Play => {}
            NativeEvent::Playing => {
                transition = self.transition(S::Playing);
                self.pending_play.resolve_all();
            }
            NativeEvent::Pause => {
                if matches!(self.state, S::Playing | S::CanPlay | S::Seeking | S::Waiting) {
                    transition = self.transition(S::Paused);
                }
                if !self.pending_play.is_empty() {
                    self.pending_play.reject_all(&Error::PlaybackDenied(
                        "play request interrupted by pause".to_string(),
                    ));
                }
            }
            NativeEvent::Seeking => {
                if !matches!(self.state, S::Idle | S::Loading | S::Ended | S::Error) {
                    self.stats.seek_count += 1;
                    if !self.state.is_transient() {
                        self.resume_state = self.state;
                    }
                    transition = self.transition(S::Seeking);
                }
            }
            NativeEvent::Seeked => {
                if self.state == S::Seeking {
                    transition = self.transition(self.settled_state());
                }
            }
            NativeEvent::Waiting => {
                if matches!(self.state, S::Playing | S::Paused | S::CanPlay | S::Seeking) {
                    if !self.state.is_transient() {
                        self.resume_state = self.state;
                    }
                    self.stats.buffering_events += 1;
                    transition = self.transition(S::Waiting);
                }
            }
            NativeEvent::TimeUpdate => {}
            NativeEvent::Progress => {
                payload = EventPayload::Buffered {
                    ranges: self.surface.buffered(),
                };
            }
            NativeEvent::VolumeChange => {
                payload = EventPayload::Volume {
                    volume: self.surface.volume(),
                    muted: self.surface.is_muted(),
                };
            }
            NativeEvent::RateChange => {
                payload = EventPayload::Rate {
                    rate: self.surface.playback_rate(),
                };
            }
            NativeEvent::Ended => {
                transition = self.transition(S::Ended);
            }
            NativeEvent::Error => {
                let error = self.surface_error();
                self.stats.error_count += 1;
                let error_payload = native_error_payload(&error, true);
                warn!(code = error.code.as_str(), message = %error.message, "Native playback error");
                self.pending_play.reject_all(&error_payload.to_error());
                transition = self.transition(S::Error);
                payload = EventPayload::Error(error_payload);
            }
            NativeEvent::FullscreenChange => {
                payload = EventPayload::Fullscreen {
                    active: self.surface.is_fullscreen(),
                };
                self.pending_fullscreen.resolve_all();
            }
            NativeEvent::EnterPictureInPicture | NativeEvent::LeavePictureInPicture => {
                payload = EventPayload::PictureInPicture {
                    active: event == NativeEvent::EnterPictureInPicture,
                };
                self.pending_pip.resolve_all();
            }
        }

        let mut records = vec![self.record(event.canonical(), payload)];
        records.extend(self.state_record(transition));
        records
    }
}

fn native_error_payload(error: &MediaError, fatal: bool) -> ErrorPayload {
    let kind = match error.code {
        MediaErrorCode::Network => ErrorKind::Network,
        MediaErrorCode::Decode | MediaErrorCode::SourceNotSupported => ErrorKind::Media,
        MediaErrorCode::Aborted | MediaErrorCode::Unknown => ErrorKind::Other,
    };
    ErrorPayload {
        kind,
        code: error.code.as_str().to_string(),
        message: error.message.clone(),
        fatal,
    }
}

impl Player for PlaybackSession {
    fn session_id(&self) -> SessionId {
        self.shared.id
    }

    fn kind(&self) -> PlayerKind {
        self.shared.kind
    }

    fn surface_id(&self) -> SurfaceId {
        self.shared.surface_id.clone()
    }

    fn config(&self) -> PlayerConfig {
        self.shared.lock().config.clone()
    }

    fn state(&self) -> PlaybackState {
        self.shared.lock().state
    }

    fn metadata(&self) -> MediaMetadata {
        self.shared.lock().metadata.clone()
    }

    fn stats(&self) -> PlaybackStats {
        self.shared.lock().stats_snapshot()
    }

    fn current_quality(&self) -> Quality {
        self.shared.lock().quality.clone()
    }

    fn current_time(&self) -> f64 {
        self.shared.lock().surface.current_time()
    }

    fn playback_rate(&self) -> f64 {
        self.shared.lock().surface.playback_rate()
    }

    fn is_paused(&self) -> bool {
        self.shared.lock().surface.is_paused()
    }

    fn buffered(&self) -> Vec<TimeRange> {
        self.shared.lock().surface.buffered()
    }

    fn current_bitrate(&self) -> Option<u64> {
        None
    }

    fn is_destroyed(&self) -> bool {
        self.shared.is_destroyed()
    }

    #[instrument(skip(self), fields(session_id = %self.shared.id))]
    fn play(&self) -> PendingRequest {
        if self.is_destroyed() {
            return PendingRequest::settled(Err(Error::Destroyed));
        }
        let mut core = self.shared.lock();
        if core.state == PlaybackState::Playing && !core.surface.is_paused() {
            return PendingRequest::settled(Ok(()));
        }
        if core.is_inert() {
            return PendingRequest::settled(Err(Error::PlaybackDenied(
                "session is in the error state".to_string(),
            )));
        }

        // Replay from the start; Ended only leaves through Idle or Loading
        let mut records = Vec::new();
        if core.state == PlaybackState::Ended {
            let start = core.clamp_position(0.0);
            core.surface.set_current_time(start);
            let transition = core.transition(PlaybackState::Idle);
            records.extend(core.state_record(transition));
            debug!("Restarting ended playback");
        }

        let request = match core.surface.play() {
            Ok(()) => {
                let (completer, request) = PendingRequest::channel();
                core.pending_play.push(completer);
                request
            }
            Err(reason) => {
                warn!(%reason, "Playback request denied");
                PendingRequest::settled(Err(Error::PlaybackDenied(reason)))
            }
        };
        drop(core);
        self.shared.dispatch(records);
        request
    }

    fn pause(&self) {
        if self.is_destroyed() {
            return;
        }
        let mut core = self.shared.lock();
        if !core.is_inert() {
            core.surface.pause();
        }
    }

    #[instrument(skip(self), fields(session_id = %self.shared.id))]
    fn stop(&self) {
        if self.is_destroyed() {
            return;
        }
        let records = {
            let mut core = self.shared.lock();
            core.surface.pause();
            let start = core.clamp_position(0.0);
            core.surface.set_current_time(start);
            core.pending_play
                .reject_all(&Error::PlaybackDenied("playback stopped".to_string()));
            let transition = core.transition(PlaybackState::Idle);
            core.state_record(transition).into_iter().collect::<Vec<_>>()
        };
        info!("Stopping playback");
        self.shared.dispatch(records);
    }

    #[instrument(skip(self), fields(session_id = %self.shared.id))]
    fn seek(&self, time: f64) {
        if self.is_destroyed() {
            return;
        }
        let mut core = self.shared.lock();
        if core.is_inert() {
            debug!(time, "Ignoring seek on a failed session");
            return;
        }
        core.refresh_metadata();
        let target = core.clamp_position(time);
        debug!(from = core.surface.current_time(), to = target, "Seeking");
        core.surface.set_current_time(target);
    }

    fn set_volume(&self, volume: f64) -> Result<()> {
        if self.is_destroyed() {
            return Ok(());
        }
        if volume.is_nan() {
            return Err(Error::invalid_argument("volume must be a number"));
        }
        let mut core = self.shared.lock();
        if !core.is_inert() {
            core.surface.set_volume(volume.clamp(0.0, 1.0));
        }
        Ok(())
    }

    fn set_muted(&self, muted: bool) {
        if self.is_destroyed() {
            return;
        }
        let mut core = self.shared.lock();
        if !core.is_inert() {
            core.surface.set_muted(muted);
        }
    }

    fn set_playback_rate(&self, rate: f64) -> Result<()> {
        if self.is_destroyed() {
            return Ok(());
        }
        if !is_allowed_rate(rate) {
            return Err(Error::invalid_argument(format!(
                "unsupported playback rate {rate}"
            )));
        }
        let mut core = self.shared.lock();
        if !core.is_inert() {
            core.surface.set_playback_rate(rate);
        }
        Ok(())
    }

    fn available_qualities(&self) -> Vec<Quality> {
        vec![Quality::Auto]
    }

    fn quality_levels(&self) -> Vec<QualityLevel> {
        Vec::new()
    }

    fn set_quality(&self, quality: &Quality) -> Result<()> {
        if quality.is_auto() || self.is_destroyed() {
            return Ok(());
        }
        Err(Error::invalid_argument(format!(
            "quality '{quality}' is not available"
        )))
    }

    fn enter_fullscreen(&self) -> PendingRequest {
        self.request_presentation(Presentation::Fullscreen, true)
    }

    fn exit_fullscreen(&self) -> PendingRequest {
        self.request_presentation(Presentation::Fullscreen, false)
    }

    fn enter_picture_in_picture(&self) -> PendingRequest {
        self.request_presentation(Presentation::PictureInPicture, true)
    }

    fn exit_picture_in_picture(&self) -> PendingRequest {
        self.request_presentation(Presentation::PictureInPicture, false)
    }

    fn add_listener(
        &self,
        event: EventType,
        listener: Listener<EventRecord>,
        once: bool,
    ) -> ListenerHandle<EventType> {
        self.shared.events.add_listener(event, listener, once)
    }

    fn off(&self, handle: &ListenerHandle<EventType>) -> bool {
        self.shared.events.off(handle)
    }

    fn emit(&self, event: EventType, payload: EventPayload) -> bool {
        if self.is_destroyed() {
            return false;
        }
        let record = self.shared.lock().record(event, payload);
        self.shared.dispatch(vec![record])
    }

    fn remove_all_listeners(&self, event: Option<EventType>) {
        self.shared.events.remove_all_listeners(event.as_ref());
    }

    fn listener_count(&self) -> usize {
        self.shared.events.total_listener_count()
    }

    #[instrument(skip(self), fields(session_id = %self.shared.id))]
    fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut core = self.shared.lock();
            let listeners = std::mem::take(&mut core.native_listeners);
            for id in listeners {
                core.surface.remove_listener(id);
            }
            core.pending_play.abandon();
            core.pending_fullscreen.abandon();
            core.pending_pip.abandon();
            if let Some(since) = core.playing_since.take() {
                core.stats.play_time += since.elapsed();
            }
            core.surface.pause();
            core.surface.set_source(None);
        }
        self.shared.events.remove_all_listeners(None);
        info!("Session destroyed");
    }
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .field("surface", &self.shared.surface_id)
            .field("destroyed", &self.shared.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PlayerConfig, Source};
    use crate::player::PlayerExt;
    use crate::sim::SimSurface;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, assert_ready_err, task};

    fn source(path: &str) -> Source {
        Source::new(Url::parse(&format!("https://cdn.example.com/{path}")).unwrap())
    }

    fn session_on(surface: &SimSurface) -> PlaybackSession {
        PlaybackSession::new(surface.boxed(), PlayerConfig::simple(vec![source("movie.mp4")])).unwrap()
    }

    fn record_types(session: &PlaybackSession) -> Arc<StdMutex<Vec<(EventType, PlaybackState)>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        for event in [
            EventType::LoadStart,
            EventType::CanPlay,
            EventType::Playing,
            EventType::Pause,
            EventType::Ended,
            EventType::Error,
            EventType::StateChange,
        ] {
            let seen = seen.clone();
            session.on(event, move |record| {
                seen.lock().unwrap().push((record.event_type, record.state));
                Ok(())
            });
        }
        seen
    }

    fn load(surface: &SimSurface) {
        surface.set_duration(120.0);
        surface.fire(NativeEvent::LoadStart);
        surface.fire(NativeEvent::LoadedMetadata);
        surface.fire(NativeEvent::CanPlay);
    }

    #[test]
    fn test_new_assigns_source_and_options() {
        let surface = SimSurface::new("video-1");
        let mut config = PlayerConfig::simple(vec![source("movie.mp4")]);
        config.options_mut().volume = 0.5;
        config.options_mut().muted = true;
        let session = PlaybackSession::new(surface.boxed(), config).unwrap();

        assert_eq!(
            surface.source().map(|u| u.to_string()),
            Some("https://cdn.example.com/movie.mp4".to_string())
        );
        assert_eq!(surface.volume(), 0.5);
        assert!(surface.muted());
        assert_eq!(surface.listener_count(), NativeEvent::ALL.len());
        assert_eq!(session.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let surface = SimSurface::new("video-1");
        let err = PlaybackSession::new(surface.boxed(), PlayerConfig::simple(vec![])).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(surface.listener_count(), 0);
    }

    #[test]
    fn test_load_sequence_emits_state_changes_after_canonical_events() {
        let surface = SimSurface::new("video-1");
        let session = session_on(&surface);
        let seen = record_types(&session);

        load(&surface);

        assert_eq!(session.state(), PlaybackState::CanPlay);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (EventType::LoadStart, PlaybackState::Loading),
                (EventType::StateChange, PlaybackState::Loading),
                (EventType::CanPlay, PlaybackState::CanPlay),
                (EventType::StateChange, PlaybackState::CanPlay),
            ]
        );
        assert_eq!(session.metadata().duration, Some(120.0));
        assert!(session.stats().load_time.is_some());
    }

    #[test]
    fn test_play_resolves_on_playing_notification() {
        let surface = SimSurface::new("video-1");
        let session = session_on(&surface);
        load(&surface);

        let mut request = task::spawn(session.play());
        assert_pending!(request.poll());
        assert_eq!(surface.play_calls(), 1);

        surface.fire(NativeEvent::Playing);
        assert!(assert_ready!(request.poll()).is_ok());
        assert_eq!(session.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_play_denied_by_surface() {
        let surface = SimSurface::new("video-1");
        let session = session_on(&surface);
        surface.deny_play(Some("autoplay policy"));

        let mut request = task::spawn(session.play());
        let err = assert_ready_err!(request.poll());
        assert!(matches!(err, Error::PlaybackDenied(reason) if reason == "autoplay policy"));
    }

    #[test]
    fn test_pause_interrupts_pending_play() {
        let surface = SimSurface::new("video-1");
        let session = session_on(&surface);
        load(&surface);

        let mut request = task::spawn(session.play());
        session.pause();
        surface.fire(NativeEvent::Pause);

        assert!(matches!(
            assert_ready_err!(request.poll()),
            Error::PlaybackDenied(_)
        ));
        assert_eq!(session.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_invalid_transition_keeps_state_but_emits_event() {
        let surface = SimSurface::new("video-1");
        let session = session_on(&surface);
        let seen = record_types(&session);

        surface.fire(NativeEvent::LoadStart);
        surface.fire(NativeEvent::Ended);

        assert_eq!(session.state(), PlaybackState::Loading);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.last(), Some(&(EventType::Ended, PlaybackState::Loading)));
        assert_eq!(
            seen.iter().filter(|(t, _)| *t == EventType::StateChange).count(),
            1
        );
    }

    #[test]
    fn test_seek_round_trip_returns_to_playing() {
        let surface = SimSurface::new("video-1");
        let session = session_on(&surface);
        load(&surface);
        drop(session.play());
        surface.fire(NativeEvent::Playing);

        session.seek(30.0);
        surface.fire(NativeEvent::Seeking);
        assert_eq!(session.state(), PlaybackState::Seeking);
        surface.fire(NativeEvent::Seeked);

        assert_eq!(session.state(), PlaybackState::Playing);
        assert_eq!(session.current_time(), 30.0);
        assert_eq!(session.stats().seek_count, 1);
    }

    #[test]
    fn test_seek_while_paused_settles_paused() {
        let surface = SimSurface::new("video-1");
        let session = session_on(&surface);
        load(&surface);
        drop(session.play());
        surface.fire(NativeEvent::Playing);
        session.pause();
        surface.fire(NativeEvent::Pause);

        surface.fire(NativeEvent::Seeking);
        surface.fire(NativeEvent::Seeked);
        assert_eq!(session.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_seek_clamps_to_duration() {
        let surface = SimSurface::new("video-1");
        let session = session_on(&surface);
        load(&surface);

        session.seek(500.0);
        assert_eq!(surface.position(), 120.0);
        session.seek(-4.0);
        assert_eq!(surface.position(), 0.0);
        session.seek(f64::NAN);
        assert_eq!(surface.position(), 0.0);
    }

    #[test]
    fn test_live_seek_clamps_to_seekable_window() {
        let surface = SimSurface::new("live-1");
        let session = session_on(&surface);
        surface.set_duration(f64::INFINITY);
        surface.set_seekable(vec![TimeRange::new(100.0, 160.0)]);
        surface.fire(NativeEvent::LoadedMetadata);

        assert!(session.metadata().is_live);
        assert_eq!(session.metadata().duration, Some(60.0));
        session.seek(10.0);
        assert_eq!(surface.position(), 100.0);
        session.seek(1e9);
        assert_eq!(surface.position(), 160.0);
    }

    #[test]
    fn test_start_time_applied_after_metadata() {
        let surface = SimSurface::new("video-1");
        let mut config = PlayerConfig::simple(vec![source("movie.mp4")]);
        config.options_mut().start_time = Some(42.0);
        let _session = PlaybackSession::new(surface.boxed(), config).unwrap();

        assert_eq!(surface.position(), 0.0);
        load(&surface);
        assert_eq!(surface.position(), 42.0);
    }

    #[test]
    fn test_waiting_counts_buffering_events() {
        let surface = SimSurface::new("video-1");
        let session = session_on(&surface);
        load(&surface);
        drop(session.play());
        surface.fire(NativeEvent::Playing);

        surface.fire(NativeEvent::Waiting);
        assert_eq!(session.state(), PlaybackState::Waiting);
        surface.fire(NativeEvent::Playing);
        assert_eq!(session.state(), PlaybackState::Playing);
        assert_eq!(session.stats().buffering_events, 1);
    }

    #[test]
    fn test_native_error_is_fatal_and_classified() {
        let surface = SimSurface::new("video-1");
        let session = session_on(&surface);
        let errors = Arc::new(StdMutex::new(Vec::new()));
        let sink = errors.clone();
        session.on(EventType::Error, move |record| {
            sink.lock().unwrap().push(record.error().cloned());
            Ok(())
        });
        load(&surface);
        let mut request = task::spawn(session.play());

        surface.fail_with(MediaError::new(MediaErrorCode::Network, "connection reset"));
        surface.fire(NativeEvent::Error);

        assert_eq!(session.state(), PlaybackState::Error);
        assert_eq!(session.stats().error_count, 1);
        let payload = errors.lock().unwrap()[0].clone().unwrap();
        assert_eq!(payload.kind, ErrorKind::Network);
        assert_eq!(payload.code, "MEDIA_ERR_NETWORK");
        assert!(payload.fatal);
        assert!(matches!(
            assert_ready_err!(request.poll()),
            Error::Network { .. }
        ));
    }

    #[test]
    fn test_stop_resets_to_idle() {
        let surface = SimSurface::new("video-1");
        let session = session_on(&surface);
        load(&surface);
        drop(session.play());
        surface.fire(NativeEvent::Playing);
        session.seek(60.0);

        session.stop();
        assert_eq!(session.state(), PlaybackState::Idle);
        assert_eq!(surface.position(), 0.0);
        assert!(surface.is_paused());
    }

    #[test]
    fn test_controls_inert_after_native_error() {
        let surface = SimSurface::new("video-1");
        let session = session_on(&surface);
        load(&surface);
        drop(session.play());
        surface.fire(NativeEvent::Playing);
        session.seek(30.0);

        surface.fail_with(MediaError::new(MediaErrorCode::Decode, "corrupt frame"));
        surface.fire(NativeEvent::Error);
        assert_eq!(session.state(), PlaybackState::Error);

        session.pause();
        session.seek(90.0);
        session.set_volume(0.25).unwrap();
        session.set_muted(true);
        session.set_playback_rate(2.0).unwrap();
        assert!(!surface.is_paused());
        assert_eq!(surface.position(), 30.0);
        assert_eq!(surface.volume(), 1.0);
        assert!(!surface.muted());
        assert_eq!(session.playback_rate(), 1.0);

        surface.allow_fullscreen(true);
        let mut request = task::spawn(session.enter_fullscreen());
        assert!(matches!(
            assert_ready_err!(request.poll()),
            Error::PlaybackDenied(_)
        ));

        // Stop is the way out
        session.stop();
        assert_eq!(session.state(), PlaybackState::Idle);
        session.seek(10.0);
        assert_eq!(surface.position(), 10.0);
    }

    #[test]
    fn test_play_after_ended_restarts_from_start() {
        let surface = SimSurface::new("video-1");
        let session = session_on(&surface);
        let seen = record_types(&session);
        load(&surface);
        drop(session.play());
        surface.fire(NativeEvent::Playing);
        surface.set_position(120.0);
        surface.fire(NativeEvent::Ended);
        assert_eq!(session.state(), PlaybackState::Ended);

        let mut request = task::spawn(session.play());
        assert_pending!(request.poll());
        assert_eq!(surface.position(), 0.0);
        assert_eq!(surface.play_calls(), 2);
        assert_eq!(session.state(), PlaybackState::Idle);

        surface.fire(NativeEvent::Playing);
        assert!(assert_ready!(request.poll()).is_ok());
        assert_eq!(session.state(), PlaybackState::Playing);
        let seen = seen.lock().unwrap();
        assert!(seen.contains(&(EventType::StateChange, PlaybackState::Idle)));
        assert_eq!(seen.last(), Some(&(EventType::StateChange, PlaybackState::Playing)));
    }

    #[test]
    fn test_volume_and_rate_validation() {
        let surface = SimSurface::new("video-1");
        let session = session_on(&surface);

        assert!(session.set_volume(f64::NAN).is_err());
        session.set_volume(3.0).unwrap();
        assert_eq!(surface.volume(), 1.0);
        session.set_volume(-1.0).unwrap();
        assert_eq!(surface.volume(), 0.0);

        assert!(session.set_playback_rate(1.5).is_ok());
        assert_eq!(session.playback_rate(), 1.5);
        assert!(matches!(
            session.set_playback_rate(3.0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_quality_on_simple_session() {
        let surface = SimSurface::new("video-1");
        let session = session_on(&surface);
        assert_eq!(session.available_qualities(), vec![Quality::Auto]);
        assert!(session.set_quality(&Quality::Auto).is_ok());
        assert!(session.set_quality(&Quality::named("720p")).is_err());
    }

    #[test]
    fn test_fullscreen_request_settles_on_notification() {
        let surface = SimSurface::new("video-1");
        let session = session_on(&surface);
        surface.allow_fullscreen(true);

        let mut request = task::spawn(session.enter_fullscreen());
        assert_pending!(request.poll());
        surface.fire(NativeEvent::FullscreenChange);
        assert!(assert_ready!(request.poll()).is_ok());

        // Already in fullscreen
        let mut again = task::spawn(session.enter_fullscreen());
        assert!(assert_ready!(again.poll()).is_ok());
    }

    #[test]
    fn test_fullscreen_refused() {
        let surface = SimSurface::new("video-1");
        let session = session_on(&surface);
        let mut request = task::spawn(session.enter_picture_in_picture());
        assert!(matches!(
            assert_ready_err!(request.poll()),
            Error::PlaybackDenied(_)
        ));
    }

    #[test]
    fn test_destroy_releases_everything() {
        let surface = SimSurface::new("video-1");
        let session = session_on(&surface);
        session.on(EventType::Playing, |_| Ok(()));
        load(&surface);
        let mut request = task::spawn(session.play());

        session.destroy();
        session.destroy();

        assert!(session.is_destroyed());
        assert_eq!(surface.listener_count(), 0);
        assert_eq!(session.listener_count(), 0);
        assert!(surface.source().is_none());
        assert!(matches!(assert_ready_err!(request.poll()), Error::Destroyed));

        // Control calls are no-ops afterwards
        session.seek(10.0);
        assert!(session.set_volume(0.2).is_ok());
        let mut late = task::spawn(session.play());
        assert!(matches!(assert_ready_err!(late.poll()), Error::Destroyed));
    }

    #[test]
    fn test_destroy_from_listener_suppresses_remaining_records() {
        let surface = SimSurface::new("video-1");
        let session = session_on(&surface);
        let state_changes = Arc::new(StdMutex::new(0));

        let handle = session.clone();
        session.on(EventType::LoadStart, move |_| {
            handle.destroy();
            Ok(())
        });
        let counter = state_changes.clone();
        session.on(EventType::StateChange, move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        surface.fire(NativeEvent::LoadStart);
        assert!(session.is_destroyed());
        assert_eq!(*state_changes.lock().unwrap(), 0);
    }

    #[test]
    fn test_failing_listener_does_not_break_session() {
        let surface = SimSurface::new("video-1");
        let session = session_on(&surface);
        session.on(EventType::LoadStart, |_| anyhow::bail!("listener failure"));
        session.on(EventType::LoadStart, |_| panic!("listener panic"));

        surface.fire(NativeEvent::LoadStart);
        assert_eq!(session.state(), PlaybackState::Loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_time_accumulates_while_playing() {
        let surface = SimSurface::new("video-1");
        let session = session_on(&surface);
        load(&surface);
        let request = session.play();
        surface.fire(NativeEvent::Playing);
        request.await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        session.pause();
        surface.fire(NativeEvent::Pause);
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(session.stats().play_time, Duration::from_secs(5));
    }
}
