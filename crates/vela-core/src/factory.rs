//! Player factory and live-instance registry
//!
//! The factory is the composition root: it validates configuration, asks the
//! [`CapabilityProbe`] what the environment supports and builds either a
//! [`PlaybackSession`] or an [`AdaptivePlayer`]. Every player it builds is
//! recorded in a registry for bulk teardown and accounting.
//!
//! The registry does not own players. Callers hold the returned
//! [`ManagedPlayer`]; entries whose player was dropped or destroyed are
//! pruned lazily.

use crate::capabilities::CapabilityProbe;
use crate::config::{ConfigOverrides, PlayerConfig, StreamingConfig};
use crate::player::Player;
use crate::session::PlaybackSession;
use crate::streaming::{AdaptivePlayer, StreamingClientProvider};
use crate::surface::{MediaSurface, SurfaceId};
use crate::types::{PlayerId, PlayerKind};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, instrument, warn};

const BASE_PLAYER_BYTES: usize = 4096;
const ADAPTIVE_PLAYER_BYTES: usize = 8192;
const LISTENER_BYTES: usize = 128;
const QUALITY_LEVEL_BYTES: usize = 96;

/// A player built by the factory, tagged with its registry id
#[derive(Clone)]
pub struct ManagedPlayer {
    id: PlayerId,
    player: Arc<dyn Player>,
}

impl ManagedPlayer {
    pub fn id(&self) -> PlayerId {
        self.id
    }

    /// Shared handle, e.g. for attaching a buffer manager
    pub fn player(&self) -> &Arc<dyn Player> {
        &self.player
    }
}

impl Deref for ManagedPlayer {
    type Target = dyn Player;

    fn deref(&self) -> &Self::Target {
        self.player.as_ref()
    }
}

impl std::fmt::Debug for ManagedPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedPlayer")
            .field("id", &self.id)
            .field("kind", &self.player.kind())
            .field("surface", &self.player.surface_id())
            .field("state", &self.player.state())
            .finish()
    }
}

/// Advisory aggregate over registered players
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactoryStats {
    pub active: usize,
    pub simple: usize,
    pub adaptive: usize,
    pub total_created: u64,
    pub total_listeners: usize,
    /// Rough footprint estimate, not a measurement
    pub estimated_memory_bytes: usize,
}

struct RegistryEntry {
    id: PlayerId,
    player: Weak<dyn Player>,
    surface: SurfaceId,
    kind: PlayerKind,
    created_at: DateTime<Utc>,
}

impl RegistryEntry {
    fn live(&self) -> Option<Arc<dyn Player>> {
        self.player.upgrade().filter(|p| !p.is_destroyed())
    }
}

#[derive(Default)]
struct Registry {
    entries: Vec<RegistryEntry>,
    total_created: u64,
}

impl Registry {
    fn prune(&mut self) {
        self.entries.retain(|e| e.live().is_some());
    }
}

/// Builds players and tracks the live ones
pub struct PlayerFactory {
    probe: Arc<dyn CapabilityProbe>,
    provider: Arc<dyn StreamingClientProvider>,
    registry: Mutex<Registry>,
}

impl PlayerFactory {
    pub fn new(
        probe: Arc<dyn CapabilityProbe>,
        provider: Arc<dyn StreamingClientProvider>,
    ) -> Self {
        Self {
            probe,
            provider,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Build a player for `config`.
    ///
    /// An adaptive config degrades to progressive playback when the
    /// environment cannot play its manifest at all. A live player already
    /// registered for the same surface is destroyed first.
    #[instrument(skip(self, surface, config), fields(kind = ?config.kind()))]
    pub fn create(
        &self,
        surface: Box<dyn MediaSurface>,
        config: PlayerConfig,
    ) -> Result<ManagedPlayer> {
        config.validate()?;
        let capabilities = self.probe.detect();
        let surface_id = surface.id();
        self.release_surface(&surface_id);

        let player: Arc<dyn Player> = match config {
            PlayerConfig::Simple(simple) => Arc::new(PlaybackSession::new(
                surface,
                PlayerConfig::Simple(simple),
            )?),
            PlayerConfig::AdaptiveStreaming(streaming) => {
                let format = streaming.format();
                if capabilities.can_play(format) {
                    Arc::new(AdaptivePlayer::new(
                        surface,
                        streaming,
                        &capabilities,
                        self.provider.clone(),
                    )?)
                } else {
                    warn!(
                        surface = %surface_id,
                        ?format,
                        "No adaptive support, degrading to progressive playback"
                    );
                    Arc::new(PlaybackSession::new(
                        surface,
                        PlayerConfig::Simple(streaming.to_simple()),
                    )?)
                }
            }
        };

        Ok(self.register(player))
    }

    /// Like [`create`](Self::create), but picks the player kind from the
    /// sources and fails instead of degrading when adaptive playback is
    /// required but unsupported.
    #[instrument(skip(self, surface, config))]
    pub fn create_smart(
        &self,
        surface: Box<dyn MediaSurface>,
        config: PlayerConfig,
    ) -> Result<ManagedPlayer> {
        if !config.requires_adaptive() {
            return self.create(surface, config);
        }

        let streaming = match config {
            PlayerConfig::Simple(simple) => StreamingConfig {
                options: simple.options,
                ..StreamingConfig::new(simple.sources)
            },
            PlayerConfig::AdaptiveStreaming(streaming) => streaming,
        };
        let format = streaming.format();
        let config = PlayerConfig::AdaptiveStreaming(streaming);
        config.validate()?;

        if !self.probe.detect().can_play(format) {
            return Err(Error::InvalidEnvironment(format!(
                "{format:?} playback needs native support or a streaming client"
            )));
        }

        self.create(surface, config)
    }

    /// Rebuild `source`'s configuration on another surface, carrying the
    /// current position and any manual quality selection.
    pub fn clone_player(
        &self,
        source: &dyn Player,
        surface: Box<dyn MediaSurface>,
        overrides: &ConfigOverrides,
    ) -> Result<ManagedPlayer> {
        let mut overrides = overrides.clone();
        if overrides.start_time.is_none() {
            let position = source.current_time();
            if position.is_finite() && position > 0.0 {
                overrides.start_time = Some(position);
            }
        }
        if overrides.default_quality.is_none() {
            let quality = source.current_quality();
            if !quality.is_auto() {
                overrides.default_quality = Some(quality);
            }
        }

        let config = source.config().with_overrides(&overrides);
        debug!(from = %source.session_id(), "Cloning player configuration");
        self.create(surface, config)
    }

    /// Destroy and forget one player; `false` if it was not registered
    pub fn unregister(&self, id: PlayerId) -> bool {
        let entry = {
            let mut registry = self.lock();
            let index = registry.entries.iter().position(|e| e.id == id);
            index.map(|i| registry.entries.remove(i))
        };

        match entry {
            Some(entry) => {
                if let Some(player) = entry.player.upgrade() {
                    player.destroy();
                }
                debug!(player_id = %id, "Player unregistered");
                true
            }
            None => false,
        }
    }

    /// Destroy every registered player
    pub fn destroy_all(&self) {
        let entries = std::mem::take(&mut self.lock().entries);
        let count = entries.len();
        for entry in entries {
            if let Some(player) = entry.player.upgrade() {
                player.destroy();
            }
        }
        if count > 0 {
            info!(count, "Destroyed all players");
        }
    }

    /// Live registered players
    pub fn registered_count(&self) -> usize {
        let mut registry = self.lock();
        registry.prune();
        registry.entries.len()
    }

    /// Registered player by id, if still live
    pub fn get(&self, id: PlayerId) -> Option<Arc<dyn Player>> {
        self.lock()
            .entries
            .iter()
            .find(|e| e.id == id)
            .and_then(RegistryEntry::live)
    }

    /// When a live player was registered
    pub fn created_at(&self, id: PlayerId) -> Option<DateTime<Utc>> {
        let registry = self.lock();
        let entry = registry.entries.iter().find(|e| e.id == id)?;
        entry.live().map(|_| entry.created_at)
    }

    pub fn get_stats(&self) -> FactoryStats {
        let (players, total_created) = {
            let mut registry = self.lock();
            registry.prune();
            let players: Vec<_> = registry
                .entries
                .iter()
                .filter_map(|e| e.live().map(|p| (e.kind, p)))
                .collect();
            (players, registry.total_created)
        };

        let mut stats = FactoryStats {
            total_created,
            ..Default::default()
        };
        for (kind, player) in players {
            let listeners = player.listener_count();
            let levels = player.quality_levels().len();
            stats.active += 1;
            stats.total_listeners += listeners;
            stats.estimated_memory_bytes +=
                BASE_PLAYER_BYTES + listeners * LISTENER_BYTES + levels * QUALITY_LEVEL_BYTES;
            match kind {
                PlayerKind::Simple => stats.simple += 1,
                PlayerKind::Adaptive => {
                    stats.adaptive += 1;
                    stats.estimated_memory_bytes += ADAPTIVE_PLAYER_BYTES;
                }
            }
        }
        stats
    }

    fn register(&self, player: Arc<dyn Player>) -> ManagedPlayer {
        let id = PlayerId::new();
        let kind = player.kind();
        let surface = player.surface_id();
        {
            let mut registry = self.lock();
            registry.prune();
            registry.entries.push(RegistryEntry {
                id,
                player: Arc::downgrade(&player),
                surface: surface.clone(),
                kind,
                created_at: Utc::now(),
            });
            registry.total_created += 1;
        }
        info!(player_id = %id, %surface, ?kind, "Player created");
        ManagedPlayer { id, player }
    }

    /// Destroy whatever live player is bound to `surface`
    fn release_surface(&self, surface: &SurfaceId) {
        let previous: Vec<_> = {
            let mut registry = self.lock();
            let (same, other): (Vec<_>, Vec<_>) = std::mem::take(&mut registry.entries)
                .into_iter()
                .partition(|e| &e.surface == surface);
            registry.entries = other;
            same
        };

        for entry in previous {
            if let Some(player) = entry.live() {
                warn!(player_id = %entry.id, %surface, "Surface reused, destroying previous player");
                player.destroy();
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PlayerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.lock();
        f.debug_struct("PlayerFactory")
            .field("registered", &registry.entries.len())
            .field("total_created", &registry.total_created)
            .finish()
    }
}
