//! Buffer Strategy Manager - advisory prebuffer sizing
//!
//! Observes a player through its events and computes a target buffer from
//! network conditions and viewer behaviour:
//! - Conservative: fixed minimum
//! - Adaptive: minimum scaled by network class, skip and pause rates
//! - Aggressive: covers the predicted distance to the next seek
//!
//! Never controls playback; callers pull [`BufferState`] snapshots.

use crate::error::{Error, Result};
use crate::events::{EventPayload, EventType, ListenerHandle};
use crate::player::{Player, PlayerExt};
use crate::timer::TimerHandle;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Source of network information, when the platform exposes one
pub trait NetworkProbe: Send + Sync {
    fn network_info(&self) -> Option<NetworkInfo>;
}

/// Target sizing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferStrategy {
    Conservative,
    #[default]
    Adaptive,
    Aggressive,
}

/// Network classification from estimated throughput
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkCondition {
    Excellent,
    Good,
    Fair,
    Poor,
    #[default]
    Unknown,
}

impl NetworkCondition {
    pub fn from_mbps(mbps: f64) -> Self {
        if mbps >= 10.0 {
            NetworkCondition::Excellent
        } else if mbps >= 4.0 {
            NetworkCondition::Good
        } else if mbps >= 1.5 {
            NetworkCondition::Fair
        } else if mbps > 0.0 {
            NetworkCondition::Poor
        } else {
            NetworkCondition::Unknown
        }
    }

    /// Multiplier applied to the minimum buffer by the adaptive strategy
    fn buffer_factor(&self) -> f64 {
        match self {
            NetworkCondition::Excellent => 0.75,
            NetworkCondition::Good => 1.0,
            NetworkCondition::Fair => 1.5,
            NetworkCondition::Poor => 2.0,
            NetworkCondition::Unknown => 1.25,
        }
    }
}

/// Buffer strategy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferStrategyConfig {
    pub strategy: BufferStrategy,
    /// Lower bound of the target (seconds)
    pub min_buffer: f64,
    /// Upper bound of the target (seconds)
    pub max_buffer: f64,
    /// Fallback sampling period when no events arrive
    pub sample_interval_ms: u64,
    /// How far back seek and pause history is kept
    pub behavior_window_secs: u64,
    /// Seeks per minute considered heavy skipping
    pub high_skip_rate: f64,
    /// Pauses per minute considered frequent pausing
    pub high_pause_rate: f64,
    /// Bitrate assumed when the player reports none (bits/s)
    pub reference_bitrate: u64,
}

impl Default for BufferStrategyConfig {
    fn default() -> Self {
        Self {
            strategy: BufferStrategy::Adaptive,
            min_buffer: 10.0,
            max_buffer: 30.0,
            sample_interval_ms: 1000,
            behavior_window_secs: 300,
            high_skip_rate: 2.0,
            high_pause_rate: 1.0,
            reference_bitrate: 2_500_000,
        }
    }
}

impl BufferStrategyConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }

    pub fn behavior_window(&self) -> Duration {
        Duration::from_secs(self.behavior_window_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.min_buffer.is_finite() && self.min_buffer >= 0.0) {
            return Err(Error::config("min buffer must be a non-negative number of seconds"));
        }
        if !(self.max_buffer.is_finite() && self.max_buffer >= self.min_buffer) {
            return Err(Error::config("max buffer must be finite and not below the min buffer"));
        }
        if self.sample_interval_ms == 0 {
            return Err(Error::config("sample interval must be non-zero"));
        }
        if !(self.high_skip_rate.is_finite() && self.high_pause_rate.is_finite()) {
            return Err(Error::config("behaviour thresholds must be finite"));
        }
        Ok(())
    }
}

/// Inputs to the target computation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BehaviorSignals {
    pub condition: NetworkCondition,
    pub skip_rate: f64,
    pub pause_rate: f64,
    pub metered: bool,
    pub playback_rate: f64,
    /// Mean wall-clock seconds between recent seeks
    pub average_seek_interval: Option<f64>,
    pub since_last_seek: Option<f64>,
}

/// Target buffer in seconds for `signals`, clamped to the configured range
pub fn target_buffer(config: &BufferStrategyConfig, signals: &BehaviorSignals) -> f64 {
    // NaN bounds collapse to zero rather than poisoning the comparison
    let min = if config.min_buffer.is_finite() { config.min_buffer.max(0.0) } else { 0.0 };
    let max = if config.max_buffer.is_nan() { min } else { config.max_buffer.max(min) };
    let rate = if signals.playback_rate.is_finite() {
        signals.playback_rate.max(1.0)
    } else {
        1.0
    };

    let target = match config.strategy {
        BufferStrategy::Conservative => min,
        BufferStrategy::Adaptive => {
            let mut target = min * signals.condition.buffer_factor();
            if signals.skip_rate >= config.high_skip_rate {
                // Skippers discard what they buffer
                target *= 0.7;
            }
            if signals.pause_rate >= config.high_pause_rate {
                target *= 1.2;
            }
            if signals.metered {
                target *= 0.8;
            }
            target * rate
        }
        BufferStrategy::Aggressive => match (signals.average_seek_interval, signals.since_last_seek) {
            (Some(interval), Some(since)) if interval > since => ((interval - since) * rate).max(min),
            _ => max,
        },
    };
    if target.is_nan() {
        return min;
    }
    target.clamp(min, max)
}

/// Seconds buffered ahead of `position`
pub fn buffered_ahead(ranges: &[TimeRange], position: f64) -> f64 {
    ranges
        .iter()
        .find(|range| range.contains(position))
        .map(|range| (range.end - position).max(0.0))
        .unwrap_or(0.0)
}

/// Snapshot recomputed on every sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferState {
    pub current_buffer_seconds: f64,
    pub target_buffer_seconds: f64,
    pub is_buffering: bool,
    /// Megabits per second
    pub estimated_network_speed: f64,
    pub efficiency_percent: f64,
    pub network_condition: NetworkCondition,
    pub strategy: BufferStrategy,
}

/// Advisory buffer sizing attached to one player
pub struct BufferStrategyManager {
    shared: Arc<Shared>,
    handles: Vec<ListenerHandle<EventType>>,
    timer: Option<TimerHandle>,
}

struct Shared {
    player: Weak<dyn Player>,
    probe: Option<Arc<dyn NetworkProbe>>,
    tracker: Mutex<Tracker>,
}

struct Tracker {
    config: BufferStrategyConfig,
    attached_at: Instant,
    seeks: VecDeque<Instant>,
    pauses: VecDeque<Instant>,
    preferred_rate: f64,
    last_fill: Option<(Instant, f64)>,
    /// Smoothed fill-rate throughput (Mbps)
    fill_estimate: Option<f64>,
    state: BufferState,
}

impl BufferStrategyManager {
    /// Start observing `player`; fails on an invalid `config`
    pub fn attach(
        player: &Arc<dyn Player>,
        config: BufferStrategyConfig,
        probe: Option<Arc<dyn NetworkProbe>>,
    ) -> Result<Self> {
        config.validate()?;
        let interval = config.sample_interval();
        let shared = Arc::new(Shared {
            player: Arc::downgrade(player),
            probe,
            tracker: Mutex::new(Tracker {
                preferred_rate: player.playback_rate(),
                attached_at: Instant::now(),
                seeks: VecDeque::new(),
                pauses: VecDeque::new(),
                last_fill: None,
                fill_estimate: None,
                state: BufferState {
                    strategy: config.strategy,
                    ..Default::default()
                },
                config,
            }),
        });

        let mut handles = Vec::new();
        for event in [
            EventType::Seeking,
            EventType::Pause,
            EventType::RateChange,
            EventType::Progress,
            EventType::TimeUpdate,
        ] {
            let weak = Arc::downgrade(&shared);
            handles.push(player.on(event, move |record| {
                let Some(shared) = weak.upgrade() else {
                    return Ok(());
                };
                {
                    let mut tracker = shared.lock();
                    match (&record.event_type, &record.payload) {
                        (EventType::Seeking, _) => tracker.seeks.push_back(Instant::now()),
                        (EventType::Pause, _) => tracker.pauses.push_back(Instant::now()),
                        (EventType::RateChange, EventPayload::Rate { rate }) => {
                            tracker.preferred_rate = *rate
                        }
                        _ => {}
                    }
                }
                shared.sample();
                Ok(())
            }));
        }

        let weak = Arc::downgrade(&shared);
        let timer = TimerHandle::every(interval, move || match weak.upgrade() {
            Some(shared) => shared.sample().is_some(),
            None => false,
        });

        debug!(interval_ms = interval.as_millis() as u64, "Buffer strategy attached");
        Ok(Self {
            shared,
            handles,
            timer,
        })
    }

    /// Most recent snapshot
    pub fn snapshot(&self) -> BufferState {
        self.shared.lock().state.clone()
    }

    /// Sample immediately and return the fresh snapshot
    pub fn sample_now(&self) -> BufferState {
        self.shared.sample().unwrap_or_else(|| self.snapshot())
    }

    pub fn strategy(&self) -> BufferStrategy {
        self.shared.lock().config.strategy
    }

    pub fn set_strategy(&self, strategy: BufferStrategy) {
        self.shared.lock().config.strategy = strategy;
        self.shared.sample();
    }

    /// Stop observing; the last snapshot stays readable
    pub fn detach(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        if let Some(player) = self.shared.player.upgrade() {
            for handle in self.handles.drain(..) {
                player.off(&handle);
            }
        }
        self.handles.clear();
    }
}

impl Drop for BufferStrategyManager {
    fn drop(&mut self) {
        self.detach();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Tracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recompute the snapshot; `None` once the player is gone
    fn sample(&self) -> Option<BufferState> {
        let player = self.player.upgrade()?;
        if player.is_destroyed() {
            return None;
        }
        let position = player.current_time();
        let ranges = player.buffered();
        let state = player.state();
        let bitrate = player.current_bitrate();
        let network = self.probe.as_ref().and_then(|probe| probe.network_info());
        drop(player);

        let now = Instant::now();
        let mut tracker = self.lock();
        tracker.prune(now);

        let current = buffered_ahead(&ranges, position);
        let fill_end = position + current;
        let bitrate = bitrate.unwrap_or(tracker.config.reference_bitrate);
        let measured = tracker.measure_fill(now, fill_end, bitrate);

        let (speed, metered) = match network {
            Some(info) if info.bandwidth_estimate > 0 => {
                (info.bandwidth_estimate as f64 / 1_000_000.0, info.metered)
            }
            Some(info) => (measured, info.metered),
            None => (measured, false),
        };

        let signals = tracker.signals(now, NetworkCondition::from_mbps(speed), metered);
        let target = target_buffer(&tracker.config, &signals);
        let efficiency = if target > 0.0 {
            (current / target * 100.0).min(100.0)
        } else {
            100.0
        };

        tracker.state = BufferState {
            current_buffer_seconds: current,
            target_buffer_seconds: target,
            is_buffering: matches!(state, PlaybackState::Waiting | PlaybackState::Loading),
            estimated_network_speed: speed,
            efficiency_percent: efficiency,
            network_condition: signals.condition,
            strategy: tracker.config.strategy,
        };
        trace!(current, target, speed, "Buffer sample");
        Some(tracker.state.clone())
    }
}

impl Tracker {
    fn prune(&mut self, now: Instant) {
        let window = self.config.behavior_window();
        for history in [&mut self.seeks, &mut self.pauses] {
            while history
                .front()
                .is_some_and(|at| now.duration_since(*at) > window)
            {
                history.pop_front();
            }
        }
    }

    /// Throughput implied by how fast the buffer end advances
    fn measure_fill(&mut self, now: Instant, fill_end: f64, bitrate: u64) -> f64 {
        if let Some((at, end)) = self.last_fill {
            let elapsed = now.duration_since(at).as_secs_f64();
            let gained = fill_end - end;
            if elapsed > 0.0 && gained > 0.0 {
                let sample = gained / elapsed * bitrate as f64 / 1_000_000.0;
                // EWMA with alpha = 0.2
                let estimate = match self.fill_estimate {
                    Some(previous) => previous * 0.8 + sample * 0.2,
                    None => sample,
                };
                self.fill_estimate = Some(estimate);
            }
        }
        self.last_fill = Some((now, fill_end));
        self.fill_estimate.unwrap_or(0.0)
    }

    fn signals(&self, now: Instant, condition: NetworkCondition, metered: bool) -> BehaviorSignals {
        let observed = now
            .duration_since(self.attached_at)
            .min(self.config.behavior_window());
        let minutes = (observed.as_secs_f64() / 60.0).max(1.0);

        let average_seek_interval = if self.seeks.len() >= 2 {
            let (first, last) = (self.seeks[0], self.seeks[self.seeks.len() - 1]);
            Some(last.duration_since(first).as_secs_f64() / (self.seeks.len() - 1) as f64)
        } else {
            None
        };

        BehaviorSignals {
            condition,
            skip_rate: self.seeks.len() as f64 / minutes,
            pause_rate: self.pauses.len() as f64 / minutes,
            metered,
            playback_rate: self.preferred_rate,
            average_seek_interval,
            since_last_seek: self
                .seeks
                .back()
                .map(|at| now.duration_since(*at).as_secs_f64()),
        }
    }
}

impl std::fmt::Debug for BufferStrategyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferStrategyManager")
            .field("state", &self.snapshot())
            .field("listeners", &self.handles.len())
            .finish()
    }
}
