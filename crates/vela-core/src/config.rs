//! Player configuration
//!
//! A configuration is an explicit tagged variant: [`PlayerConfig::Simple`]
//! for progressive sources played straight off the surface, or
//! [`PlayerConfig::AdaptiveStreaming`] for manifest sources.

use crate::manifest::{detect_format, ManifestFormat};
use crate::{Error, PlayerKind, Quality, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

/// Playback rates accepted by `set_playback_rate`
pub const PLAYBACK_RATES: [f64; 8] = [0.25, 0.5, 0.75, 1.0, 1.25, 1.5, 1.75, 2.0];

/// Whether `rate` is one of [`PLAYBACK_RATES`]
pub fn is_allowed_rate(rate: f64) -> bool {
    PLAYBACK_RATES.iter().any(|r| (r - rate).abs() < 1e-9)
}

/// One playable source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub url: Url,
    /// MIME type hint, e.g. `application/vnd.apple.mpegurl`
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Quality label this source represents, e.g. "720p"
    #[serde(default)]
    pub quality: Option<String>,
}

impl Source {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            mime_type: None,
            quality: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }

    pub fn format(&self) -> ManifestFormat {
        detect_format(&self.url, self.mime_type.as_deref())
    }

    pub fn requires_adaptive(&self) -> bool {
        self.format().is_adaptive()
    }
}

/// Options shared by every player kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackOptions {
    /// Request playback as soon as the source is assigned
    pub autoplay: bool,
    pub muted: bool,
    /// Initial volume (0.0-1.0)
    pub volume: f64,
    /// Initial playback rate, one of [`PLAYBACK_RATES`]
    pub playback_rate: f64,
    /// Position to seek to once metadata is ready
    pub start_time: Option<f64>,
    /// Declared quality labels for progressive sources
    pub qualities: Vec<String>,
    pub default_quality: Quality,
    /// Soft cap on listeners per event type (warnings only)
    pub max_listeners: Option<usize>,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            autoplay: false,
            muted: false,
            volume: 1.0,
            playback_rate: 1.0,
            start_time: None,
            qualities: Vec::new(),
            default_quality: Quality::Auto,
            max_listeners: None,
        }
    }
}

/// Bounded in-place recovery for non-fatal streaming errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Recovery attempts before the error becomes terminal
    pub max_attempts: u32,
    /// Delay before the first attempt, doubled per attempt
    pub base_delay_ms: u64,
    /// Upper bound for the backoff delay
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 8000,
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// What to do when the native adaptive path fails mid-playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeFallbackPolicy {
    /// Surface the error; the session ends in `error`
    #[default]
    Surface,
    /// Switch to the external streaming client once, if it is available
    FallbackToClient,
}

/// Settings handed to the external streaming client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Initial level index; `None` lets the client choose
    pub start_level: Option<usize>,
    /// Forward buffer the client should maintain (seconds)
    pub max_buffer_length: f64,
    pub low_latency: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            start_level: None,
            max_buffer_length: 30.0,
            low_latency: false,
        }
    }
}

/// Configuration for progressive playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleConfig {
    pub sources: Vec<Source>,
    #[serde(default)]
    pub options: PlaybackOptions,
}

impl SimpleConfig {
    pub fn new(sources: Vec<Source>) -> Self {
        Self {
            sources,
            options: PlaybackOptions::default(),
        }
    }

    /// Source matching the default quality, else the first one
    pub fn initial_source(&self) -> Option<&Source> {
        let wanted = self.options.default_quality.as_str();
        self.sources
            .iter()
            .find(|s| s.quality.as_deref() == Some(wanted))
            .or_else(|| self.sources.first())
    }
}

/// Configuration for manifest-based playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// The first manifest source drives playback; progressive entries are
    /// fallbacks for environments without adaptive support
    pub sources: Vec<Source>,
    #[serde(default)]
    pub options: PlaybackOptions,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub native_fallback: NativeFallbackPolicy,
    /// Prefer the surface's own adaptive support over the external client
    #[serde(default = "default_true")]
    pub prefer_native: bool,
    #[serde(default)]
    pub client: ClientOptions,
}

fn default_true() -> bool {
    true
}

impl StreamingConfig {
    pub fn new(sources: Vec<Source>) -> Self {
        Self {
            sources,
            options: PlaybackOptions::default(),
            retry: RetryPolicy::default(),
            native_fallback: NativeFallbackPolicy::default(),
            prefer_native: true,
            client: ClientOptions::default(),
        }
    }

    pub fn manifest_source(&self) -> Option<&Source> {
        self.sources.iter().find(|s| s.requires_adaptive())
    }

    pub fn format(&self) -> ManifestFormat {
        self.manifest_source()
            .map(Source::format)
            .unwrap_or(ManifestFormat::Progressive)
    }

    /// Equivalent progressive configuration, used when adaptive playback is
    /// unavailable. Keeps progressive fallbacks, else the manifest itself.
    pub fn to_simple(&self) -> SimpleConfig {
        let fallbacks: Vec<Source> = self
            .sources
            .iter()
            .filter(|s| !s.requires_adaptive())
            .cloned()
            .collect();
        let mut options = self.options.clone();
        if options.qualities.is_empty() {
            options.default_quality = Quality::Auto;
        }
        SimpleConfig {
            sources: if fallbacks.is_empty() {
                self.sources.clone()
            } else {
                fallbacks
            },
            options,
        }
    }
}

/// Player configuration, tagged by player kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerConfig {
    Simple(SimpleConfig),
    AdaptiveStreaming(StreamingConfig),
}

impl PlayerConfig {
    pub fn simple(sources: Vec<Source>) -> Self {
        PlayerConfig::Simple(SimpleConfig::new(sources))
    }

    pub fn adaptive(sources: Vec<Source>) -> Self {
        PlayerConfig::AdaptiveStreaming(StreamingConfig::new(sources))
    }

    pub fn kind(&self) -> PlayerKind {
        match self {
            PlayerConfig::Simple(_) => PlayerKind::Simple,
            PlayerConfig::AdaptiveStreaming(_) => PlayerKind::Adaptive,
        }
    }

    pub fn sources(&self) -> &[Source] {
        match self {
            PlayerConfig::Simple(c) => &c.sources,
            PlayerConfig::AdaptiveStreaming(c) => &c.sources,
        }
    }

    pub fn options(&self) -> &PlaybackOptions {
        match self {
            PlayerConfig::Simple(c) => &c.options,
            PlayerConfig::AdaptiveStreaming(c) => &c.options,
        }
    }

    pub fn options_mut(&mut self) -> &mut PlaybackOptions {
        match self {
            PlayerConfig::Simple(c) => &mut c.options,
            PlayerConfig::AdaptiveStreaming(c) => &mut c.options,
        }
    }

    /// Whether any source needs adaptive streaming
    pub fn requires_adaptive(&self) -> bool {
        self.sources().iter().any(Source::requires_adaptive)
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::config(format!("malformed config: {e}")))
    }

    /// Export as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Synchronous validation performed before a player is built
    pub fn validate(&self) -> Result<()> {
        let sources = self.sources();
        if sources.is_empty() {
            return Err(Error::config("at least one source is required"));
        }

        let options = self.options();
        validate_options(options)?;
        validate_qualities(options, sources, self.kind() == PlayerKind::Adaptive)?;

        if let PlayerConfig::AdaptiveStreaming(streaming) = self {
            if streaming.manifest_source().is_none() {
                return Err(Error::config(
                    "adaptive streaming requires a manifest source (.m3u8 or .mpd)",
                ));
            }
            let retry = &streaming.retry;
            if retry.base_delay_ms == 0 {
                return Err(Error::config("retry base delay must be non-zero"));
            }
            if retry.max_delay_ms < retry.base_delay_ms {
                return Err(Error::config("retry max delay is below the base delay"));
            }
            if !(streaming.client.max_buffer_length.is_finite()
                && streaming.client.max_buffer_length > 0.0)
            {
                return Err(Error::config("client max buffer length must be positive"));
            }
        }

        Ok(())
    }

    /// Apply overrides, returning a new configuration
    pub fn with_overrides(&self, overrides: &ConfigOverrides) -> Self {
        let mut config = self.clone();
        let options = config.options_mut();
        if let Some(autoplay) = overrides.autoplay {
            options.autoplay = autoplay;
        }
        if let Some(muted) = overrides.muted {
            options.muted = muted;
        }
        if let Some(volume) = overrides.volume {
            options.volume = volume;
        }
        if let Some(rate) = overrides.playback_rate {
            options.playback_rate = rate;
        }
        if let Some(start) = overrides.start_time {
            options.start_time = Some(start);
        }
        if let Some(quality) = &overrides.default_quality {
            options.default_quality = quality.clone();
        }
        config
    }
}

fn validate_options(options: &PlaybackOptions) -> Result<()> {
    if !(options.volume.is_finite() && (0.0..=1.0).contains(&options.volume)) {
        return Err(Error::config(format!(
            "volume {} is outside [0, 1]",
            options.volume
        )));
    }
    if !is_allowed_rate(options.playback_rate) {
        return Err(Error::config(format!(
            "playback rate {} is not one of {:?}",
            options.playback_rate, PLAYBACK_RATES
        )));
    }
    if let Some(start) = options.start_time {
        if !(start.is_finite() && start >= 0.0) {
            return Err(Error::config(format!("start time {start} is invalid")));
        }
    }
    Ok(())
}

/// Adaptive levels come from the manifest, so an adaptive default quality
/// only has to be declared when a list is given.
fn validate_qualities(
    options: &PlaybackOptions,
    sources: &[Source],
    from_manifest: bool,
) -> Result<()> {
    let mut declared = HashSet::new();
    for label in &options.qualities {
        let label = label.trim();
        if label.is_empty() {
            return Err(Error::config("quality labels must not be empty"));
        }
        if label.eq_ignore_ascii_case(Quality::AUTO) {
            return Err(Error::config("\"auto\" is reserved and cannot be declared"));
        }
        if !declared.insert(label) {
            return Err(Error::config(format!("duplicate quality label {label:?}")));
        }
    }

    if let Quality::Level(name) = &options.default_quality {
        if !(declared.contains(name.as_str()) || (from_manifest && declared.is_empty())) {
            return Err(Error::config(format!(
                "default quality {name:?} is not in the declared quality list"
            )));
        }
    }

    if !declared.is_empty() {
        for source in sources {
            if let Some(label) = &source.quality {
                if !declared.contains(label.trim()) {
                    return Err(Error::config(format!(
                        "source {} declares undeclared quality {label:?}",
                        source.url
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Field-level overrides applied when cloning a player onto a new surface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    pub autoplay: Option<bool>,
    pub muted: Option<bool>,
    pub volume: Option<f64>,
    pub playback_rate: Option<f64>,
    pub start_time: Option<f64>,
    pub default_quality: Option<Quality>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(s: &str) -> Source {
        Source::new(Url::parse(s).unwrap())
    }

    #[test]
    fn test_empty_sources_rejected() {
        let err = PlayerConfig::simple(vec![]).validate().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_quality_list_consistency() {
        let mut config = SimpleConfig::new(vec![
            source("https://cdn.example.com/a-720.mp4").with_quality("720p"),
            source("https://cdn.example.com/a-1080.mp4").with_quality("1080p"),
        ]);
        config.options.qualities = vec!["720p".into(), "1080p".into()];
        config.options.default_quality = Quality::named("1080p");
        assert!(PlayerConfig::Simple(config.clone()).validate().is_ok());
        assert_eq!(
            config.initial_source().and_then(|s| s.quality.as_deref()),
            Some("1080p")
        );

        let mut dup = config.clone();
        dup.options.qualities.push("720p".into());
        assert!(PlayerConfig::Simple(dup).validate().is_err());

        let mut missing_default = config.clone();
        missing_default.options.default_quality = Quality::named("480p");
        assert!(PlayerConfig::Simple(missing_default).validate().is_err());

        let mut undeclared = config;
        undeclared.options.qualities = vec!["720p".into()];
        undeclared.options.default_quality = Quality::Auto;
        assert!(PlayerConfig::Simple(undeclared).validate().is_err());
    }

    #[test]
    fn test_options_ranges() {
        let mut config = PlayerConfig::simple(vec![source("https://example.com/a.mp4")]);
        config.options_mut().volume = 1.5;
        assert!(config.validate().is_err());

        config.options_mut().volume = 0.5;
        config.options_mut().playback_rate = 3.0;
        assert!(config.validate().is_err());

        config.options_mut().playback_rate = 1.25;
        config.options_mut().start_time = Some(-1.0);
        assert!(config.validate().is_err());

        config.options_mut().start_time = Some(10.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_adaptive_requires_manifest() {
        let config = PlayerConfig::adaptive(vec![source("https://example.com/a.mp4")]);
        assert!(config.validate().is_err());

        let config = PlayerConfig::adaptive(vec![
            source("https://example.com/master.m3u8"),
            source("https://example.com/fallback.mp4"),
        ]);
        assert!(config.validate().is_ok());
        assert!(config.requires_adaptive());

        let PlayerConfig::AdaptiveStreaming(streaming) = config else {
            unreachable!()
        };
        assert_eq!(streaming.format(), ManifestFormat::Hls);
        let simple = streaming.to_simple();
        assert_eq!(simple.sources.len(), 1);
        assert!(simple.sources[0].url.path().ends_with(".mp4"));
    }

    #[test]
    fn test_retry_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(10), Duration::from_millis(8000));
    }

    #[test]
    fn test_json_round_trip_keeps_tag() {
        let json = r#"{
            "type": "adaptive_streaming",
            "sources": [{ "url": "https://example.com/live.m3u8" }],
            "retry": { "max_attempts": 5 }
        }"#;
        let config = PlayerConfig::from_json(json).unwrap();
        let PlayerConfig::AdaptiveStreaming(streaming) = &config else {
            panic!("expected adaptive config");
        };
        assert_eq!(streaming.retry.max_attempts, 5);
        assert_eq!(streaming.retry.base_delay_ms, 1000);
        assert!(streaming.prefer_native);
        assert!(config.to_json().contains("\"type\": \"adaptive_streaming\""));

        assert!(PlayerConfig::from_json("{\"type\":\"nope\"}").is_err());
    }

    #[test]
    fn test_overrides() {
        let config = PlayerConfig::simple(vec![source("https://example.com/a.mp4")]);
        let overridden = config.with_overrides(&ConfigOverrides {
            muted: Some(true),
            start_time: Some(42.0),
            ..Default::default()
        });
        assert!(overridden.options().muted);
        assert_eq!(overridden.options().start_time, Some(42.0));
        assert!(!config.options().muted);
    }
}
