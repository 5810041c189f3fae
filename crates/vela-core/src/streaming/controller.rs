//! Adaptive player: manifest lifecycle, quality catalogue and recovery
//!
//! Lock order is streaming state first, then the session core. Nothing is
//! emitted while the streaming lock is held.

use super::recovery::{classify, RecoveryAction, RetryTracker};
use super::{StreamingClient, StreamingClientProvider, StreamingEvent};
use crate::capabilities::{Capabilities, CapabilityProbe};
use crate::config::{NativeFallbackPolicy, PlayerConfig, StreamingConfig};
use crate::error::ErrorKind;
use crate::events::{ErrorPayload, EventPayload, EventRecord, EventType, Listener, ListenerHandle};
use crate::manifest::QualityCatalogue;
use crate::player::Player;
use crate::request::PendingRequest;
use crate::session::{NativeErrorHandling, PlaybackSession, SessionHooks};
use crate::surface::{MediaError, MediaSurface, NativeEvent, SurfaceId};
use crate::timer::TimerHandle;
use crate::types::*;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// How the manifest reaches the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// The surface plays the manifest itself
    Native,
    /// The external streaming client feeds the surface
    Client,
}

/// Player for manifest-based sources
#[derive(Clone)]
pub struct AdaptivePlayer {
    inner: Arc<Inner>,
}

struct Inner {
    session: PlaybackSession,
    manifest: Url,
    streaming: Mutex<Streaming>,
}

struct Streaming {
    config: StreamingConfig,
    capabilities: Capabilities,
    provider: Arc<dyn StreamingClientProvider>,
    client: Option<Box<dyn StreamingClient>>,
    delivery: Delivery,
    catalogue: QualityCatalogue,
    /// Level pinned by a manual selection
    pinned: Option<usize>,
    /// Level the client reports as playing
    active_level: Option<usize>,
    ready: bool,
    fell_back: bool,
    retry: RetryTracker,
    recovery_timer: Option<TimerHandle>,
}

impl AdaptivePlayer {
    /// Choose a delivery path and start loading the manifest.
    ///
    /// Native support wins when `prefer_native` is set; otherwise the
    /// external client is used when available. Fails with
    /// [`Error::InvalidEnvironment`] when neither path exists.
    pub fn new(
        surface: Box<dyn MediaSurface>,
        config: StreamingConfig,
        probe: &dyn CapabilityProbe,
        provider: Arc<dyn StreamingClientProvider>,
    ) -> Result<Self> {
        PlayerConfig::AdaptiveStreaming(config.clone()).validate()?;
        let manifest = config
            .manifest_source()
            .map(|source| source.url.clone())
            .ok_or_else(|| Error::config("adaptive configuration needs a manifest source"))?;

        let capabilities = probe.detect();
        let format = config.format();
        let native = capabilities.native_support(format);
        let delivery = match (native, capabilities.streaming_client) {
            (true, true) if config.prefer_native => Delivery::Native,
            (_, true) => Delivery::Client,
            (true, false) => Delivery::Native,
            (false, false) => {
                return Err(Error::InvalidEnvironment(format!(
                    "no adaptive playback support for {format}"
                )))
            }
        };

        let session = PlaybackSession::build(
            surface,
            PlayerConfig::AdaptiveStreaming(config.clone()),
            PlayerKind::Adaptive,
        )?;
        let retry = RetryTracker::new(config.retry);
        let inner = Arc::new(Inner {
            session,
            manifest,
            streaming: Mutex::new(Streaming {
                config,
                capabilities,
                provider,
                client: None,
                delivery,
                catalogue: QualityCatalogue::default(),
                pinned: None,
                active_level: None,
                ready: false,
                fell_back: false,
                retry,
                recovery_timer: None,
            }),
        });
        inner.session.install_hooks(Arc::new(Hooks {
            inner: Arc::downgrade(&inner),
        }));

        match delivery {
            Delivery::Native => {
                info!(url = %inner.manifest, %format, "Using native adaptive playback");
                inner.session.assign_source(Some(&inner.manifest));
            }
            Delivery::Client => {
                if let Err(e) = inner.start_client() {
                    inner.session.destroy();
                    return Err(e);
                }
                inner.session.autoplay();
            }
        }

        Ok(Self { inner })
    }

    pub fn delivery(&self) -> Delivery {
        self.inner.lock().delivery
    }

    /// Underlying playback session
    pub fn session(&self) -> &PlaybackSession {
        &self.inner.session
    }

    /// Recovery attempts consumed since playback was last healthy
    pub fn recovery_attempts(&self) -> u32 {
        self.inner.lock().retry.attempts()
    }

    pub fn has_client(&self) -> bool {
        self.inner.lock().client.is_some()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Streaming> {
        self.streaming.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create, attach and load the external client
    fn start_client(self: &Arc<Self>) -> Result<()> {
        let surface_id = self.session.surface_id();
        let mut streaming = self.lock();
        let mut client = streaming.provider.create_client(&streaming.config.client)?;

        let weak = Arc::downgrade(self);
        client.set_handler(Arc::new(move |event: StreamingEvent| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_streaming(event);
            }
        }));
        client.attach_media(&surface_id);
        client.load_source(&self.manifest);

        streaming.client = Some(client);
        streaming.delivery = Delivery::Client;
        streaming.ready = false;
        streaming.catalogue = QualityCatalogue::default();
        streaming.active_level = None;
        drop(streaming);

        self.session.prepare_external_load();
        info!(url = %self.manifest, surface = %surface_id, "Streaming client attached");
        Ok(())
    }

    fn handle_streaming(self: &Arc<Self>, event: StreamingEvent) {
        if self.session.is_destroyed() {
            return;
        }
        match event {
            StreamingEvent::ManifestParsed { levels, live } => self.manifest_parsed(&levels, live),
            StreamingEvent::LevelSwitched { level } => self.level_switched(level),
            StreamingEvent::Error {
                category,
                details,
                message,
                fatal,
            } => {
                let kind = classify(category, &details);
                self.streaming_error(ErrorPayload {
                    kind,
                    code: details,
                    message,
                    fatal,
                });
            }
        }
    }

    fn manifest_parsed(&self, levels: &[crate::manifest::LevelInfo], live: bool) {
        let (count, change) = {
            let mut streaming = self.lock();
            streaming.catalogue = QualityCatalogue::from_levels(levels);
            streaming.retry.reset();
            streaming.active_level = None;
            streaming.ready = true;

            // Keep a manual selection that survives the new catalogue,
            // else fall back to the configured default
            let current = self.session.current_quality();
            let wanted = if current.is_auto() {
                streaming.config.options.default_quality.clone()
            } else {
                current.clone()
            };
            let (selected, index, bitrate) = match &wanted {
                Quality::Level(name) => match streaming.catalogue.find(name) {
                    Some(level) => (wanted.clone(), Some(level.index), Some(level.bitrate)),
                    None => (Quality::Auto, None, None),
                },
                Quality::Auto => (Quality::Auto, None, None),
            };
            streaming.pinned = index;
            if let Some(client) = streaming.client.as_mut() {
                client.set_current_level(index);
            }
            self.session.set_current_quality(selected.clone());
            let change = (selected != current).then_some((current, selected, bitrate));
            (streaming.catalogue.len(), change)
        };

        self.session.mark_stream_ready(live);
        info!(levels = count, live, "Manifest parsed");
        if let Some((from, to, bitrate)) = change {
            self.session
                .record_quality_change(from, to, QualityChangeReason::Manual, bitrate);
        }
        self.session.emit(
            EventType::Ready,
            EventPayload::Ready {
                live,
                levels: count,
                native: false,
            },
        );
    }

    fn level_switched(&self, level: usize) {
        let change = {
            let mut streaming = self.lock();
            if streaming.active_level == Some(level) {
                return;
            }
            let Some(to) = streaming.catalogue.quality_at(level) else {
                warn!(level, "Level switch outside the catalogue");
                return;
            };
            let from = streaming
                .active_level
                .and_then(|index| streaming.catalogue.quality_at(index))
                .unwrap_or(Quality::Auto);
            streaming.active_level = Some(level);

            // Manual switches were already reported by `set_quality`
            if streaming.pinned.is_some() {
                None
            } else {
                let bitrate = streaming.catalogue.get(level).map(|l| l.bitrate);
                Some((from, to, bitrate))
            }
        };

        if let Some((from, to, bitrate)) = change {
            debug!(from = %from, to = %to, "ABR level switch");
            self.session
                .record_quality_change(from, to, QualityChangeReason::Abr, bitrate);
        }
    }

    fn streaming_error(self: &Arc<Self>, payload: ErrorPayload) {
        self.session.record_error();
        let action = self.lock().retry.decide(payload.kind, payload.fatal);

        match action {
            RecoveryAction::Retry {
                attempt,
                delay,
                kind,
            } => {
                let delay_ms = delay.as_millis() as u64;
                warn!(attempt, delay_ms, kind = %kind, code = %payload.code, "Recovering from streaming error");
                self.session.emit(
                    EventType::Error,
                    EventPayload::Error(ErrorPayload {
                        fatal: false,
                        ..payload
                    }),
                );
                self.session.emit(
                    EventType::Recovery,
                    EventPayload::Recovery {
                        attempt,
                        delay_ms,
                        kind,
                    },
                );
                self.schedule_recovery(kind, delay);
            }
            RecoveryAction::Report => {
                debug!(code = %payload.code, "Non-fatal streaming error");
                self.session.emit(
                    EventType::Error,
                    EventPayload::Error(ErrorPayload {
                        fatal: false,
                        ..payload
                    }),
                );
            }
            RecoveryAction::Terminal => {
                error!(kind = %payload.kind, code = %payload.code, message = %payload.message, "Terminal streaming error");
                self.terminate(ErrorPayload {
                    fatal: true,
                    ..payload
                });
            }
        }
    }

    fn schedule_recovery(self: &Arc<Self>, kind: ErrorKind, delay: Duration) {
        if self.session.is_destroyed() {
            return;
        }
        let weak = Arc::downgrade(self);
        let timer = TimerHandle::after(delay, move || {
            if let Some(inner) = weak.upgrade() {
                inner.run_recovery(kind);
            }
        });
        match timer {
            // Replacing the handle aborts any recovery still pending
            Some(timer) => self.lock().recovery_timer = Some(timer),
            None => self.run_recovery(kind),
        }
    }

    fn run_recovery(&self, kind: ErrorKind) {
        if self.session.is_destroyed() {
            return;
        }
        let position = self.session.current_time();
        let mut streaming = self.lock();
        let timer = streaming.recovery_timer.take();
        if let Some(client) = streaming.client.as_mut() {
            match kind {
                ErrorKind::Media => client.recover_media_error(),
                _ => client.start_load(position),
            }
            debug!(kind = %kind, position, "Recovery attempt issued");
        }
        drop(streaming);
        drop(timer);
    }

    /// Release the client and end the session in `error`
    fn terminate(&self, payload: ErrorPayload) {
        self.release_client();
        self.session.fail(payload);
    }

    fn release_client(&self) {
        let (client, timer) = {
            let mut streaming = self.lock();
            (streaming.client.take(), streaming.recovery_timer.take())
        };
        if let Some(timer) = timer {
            timer.cancel();
        }
        if let Some(mut client) = client {
            client.destroy();
            debug!("Streaming client destroyed");
        }
    }

    fn native_failure(self: &Arc<Self>, error: &MediaError) -> NativeErrorHandling {
        let fall_back = {
            let mut streaming = self.lock();
            let eligible = streaming.delivery == Delivery::Native
                && streaming.config.native_fallback == NativeFallbackPolicy::FallbackToClient
                && streaming.capabilities.streaming_client
                && !streaming.fell_back;
            if eligible {
                streaming.fell_back = true;
            }
            eligible
        };

        if !fall_back {
            self.release_client();
            return NativeErrorHandling::Default;
        }

        warn!(code = error.code.as_str(), message = %error.message, "Native adaptive playback failed; switching to streaming client");
        match self.start_client() {
            Ok(()) => NativeErrorHandling::Recovered,
            Err(e) => {
                error!(error = %e, "Streaming client fallback failed");
                NativeErrorHandling::Default
            }
        }
    }

    fn native_event(&self, event: NativeEvent) {
        match event {
            NativeEvent::Playing => self.lock().retry.reset(),
            NativeEvent::LoadedMetadata => {
                let first = {
                    let mut streaming = self.lock();
                    let first = streaming.delivery == Delivery::Native && !streaming.ready;
                    streaming.ready |= first;
                    first
                };
                if first {
                    let live = self.session.metadata().is_live;
                    self.session.mark_stream_ready(live);
                    self.session.emit(
                        EventType::Ready,
                        EventPayload::Ready {
                            live,
                            levels: 0,
                            native: true,
                        },
                    );
                }
            }
            _ => {}
        }
    }
}

struct Hooks {
    inner: Weak<Inner>,
}

impl SessionHooks for Hooks {
    fn native_error(&self, _session: &PlaybackSession, error: &MediaError) -> NativeErrorHandling {
        match self.inner.upgrade() {
            Some(inner) => inner.native_failure(error),
            None => NativeErrorHandling::Default,
        }
    }

    fn native_event(&self, _session: &PlaybackSession, event: NativeEvent) {
        if let Some(inner) = self.inner.upgrade() {
            inner.native_event(event);
        }
    }
}

impl Player for AdaptivePlayer {
    fn session_id(&self) -> SessionId {
        self.inner.session.session_id()
    }

    fn kind(&self) -> PlayerKind {
        PlayerKind::Adaptive
    }

    fn surface_id(&self) -> SurfaceId {
        self.inner.session.surface_id()
    }

    fn config(&self) -> PlayerConfig {
        PlayerConfig::AdaptiveStreaming(self.inner.lock().config.clone())
    }

    fn state(&self) -> PlaybackState {
        self.inner.session.state()
    }

    fn metadata(&self) -> MediaMetadata {
        self.inner.session.metadata()
    }

    fn stats(&self) -> PlaybackStats {
        self.inner.session.stats()
    }

    fn current_quality(&self) -> Quality {
        self.inner.session.current_quality()
    }

    fn current_time(&self) -> f64 {
        self.inner.session.current_time()
    }

    fn playback_rate(&self) -> f64 {
        self.inner.session.playback_rate()
    }

    fn is_paused(&self) -> bool {
        self.inner.session.is_paused()
    }

    fn buffered(&self) -> Vec<TimeRange> {
        self.inner.session.buffered()
    }

    fn current_bitrate(&self) -> Option<u64> {
        let streaming = self.inner.lock();
        streaming
            .active_level
            .or(streaming.pinned)
            .and_then(|index| streaming.catalogue.get(index))
            .map(|level| level.bitrate)
    }

    fn is_destroyed(&self) -> bool {
        self.inner.session.is_destroyed()
    }

    fn play(&self) -> PendingRequest {
        self.inner.session.play()
    }

    fn pause(&self) {
        self.inner.session.pause()
    }

    fn stop(&self) {
        self.inner.session.stop()
    }

    fn seek(&self, time: f64) {
        self.inner.session.seek(time)
    }

    fn set_volume(&self, volume: f64) -> Result<()> {
        self.inner.session.set_volume(volume)
    }

    fn set_muted(&self, muted: bool) {
        self.inner.session.set_muted(muted)
    }

    fn set_playback_rate(&self, rate: f64) -> Result<()> {
        self.inner.session.set_playback_rate(rate)
    }

    fn available_qualities(&self) -> Vec<Quality> {
        self.inner.lock().catalogue.qualities()
    }

    fn quality_levels(&self) -> Vec<QualityLevel> {
        self.inner.lock().catalogue.levels().to_vec()
    }

    #[instrument(skip(self), fields(session_id = %self.session_id()))]
    fn set_quality(&self, quality: &Quality) -> Result<()> {
        if self.is_destroyed() || self.inner.session.state() == PlaybackState::Error {
            return Ok(());
        }
        let (from, bitrate) = {
            let mut streaming = self.inner.lock();
            let current = self.inner.session.current_quality();
            if &current == quality {
                return Ok(());
            }
            let (index, bitrate) = match quality {
                Quality::Auto => (None, None),
                Quality::Level(name) => {
                    let level = streaming.catalogue.find(name).ok_or_else(|| {
                        Error::invalid_argument(format!("quality '{name}' is not available"))
                    })?;
                    (Some(level.index), Some(level.bitrate))
                }
            };
            streaming.pinned = index;
            if let Some(client) = streaming.client.as_mut() {
                client.set_current_level(index);
            }
            self.inner.session.set_current_quality(quality.clone());
            (current, bitrate)
        };

        info!(from = %from, to = %quality, "Quality selected");
        self.inner.session.record_quality_change(
            from,
            quality.clone(),
            QualityChangeReason::Manual,
            bitrate,
        );
        Ok(())
    }

    fn enter_fullscreen(&self) -> PendingRequest {
        self.inner.session.enter_fullscreen()
    }

    fn exit_fullscreen(&self) -> PendingRequest {
        self.inner.session.exit_fullscreen()
    }

    fn enter_picture_in_picture(&self) -> PendingRequest {
        self.inner.session.enter_picture_in_picture()
    }

    fn exit_picture_in_picture(&self) -> PendingRequest {
        self.inner.session.exit_picture_in_picture()
    }

    fn add_listener(
        &self,
        event: EventType,
        listener: Listener<EventRecord>,
        once: bool,
    ) -> ListenerHandle<EventType> {
        self.inner.session.add_listener(event, listener, once)
    }

    fn off(&self, handle: &ListenerHandle<EventType>) -> bool {
        self.inner.session.off(handle)
    }

    fn emit(&self, event: EventType, payload: EventPayload) -> bool {
        self.inner.session.emit(event, payload)
    }

    fn remove_all_listeners(&self, event: Option<EventType>) {
        self.inner.session.remove_all_listeners(event)
    }

    fn listener_count(&self) -> usize {
        self.inner.session.listener_count()
    }

    #[instrument(skip(self), fields(session_id = %self.session_id()))]
    fn destroy(&self) {
        if self.is_destroyed() {
            return;
        }
        self.inner.release_client();
        self.inner.session.destroy();
        info!("Adaptive player destroyed");
    }
}

impl std::fmt::Debug for AdaptivePlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptivePlayer")
            .field("session", &self.inner.session)
            .field("manifest", &self.inner.manifest.as_str())
            .field("delivery", &self.delivery())
            .finish()
    }
}
