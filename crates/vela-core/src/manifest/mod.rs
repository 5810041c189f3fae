//! Manifest formats and quality catalogues

use crate::{QualityLevel, Quality, Resolution};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// Source delivery formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestFormat {
    Hls,
    Dash,
    /// Plain file the surface can play directly
    Progressive,
}

impl ManifestFormat {
    /// Whether playback needs adaptive-streaming support
    pub fn is_adaptive(&self) -> bool {
        !matches!(self, ManifestFormat::Progressive)
    }
}

impl std::fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManifestFormat::Hls => write!(f, "hls"),
            ManifestFormat::Dash => write!(f, "dash"),
            ManifestFormat::Progressive => write!(f, "progressive"),
        }
    }
}

/// Detect source format from MIME type or URL
pub fn detect_format(url: &Url, mime_type: Option<&str>) -> ManifestFormat {
    // Explicit MIME type wins
    if let Some(mime) = mime_type {
        let mime = mime.trim().to_ascii_lowercase();
        #[cfg(feature = "hls")]
        if mime == "application/vnd.apple.mpegurl"
            || mime == "application/x-mpegurl"
            || mime == "audio/mpegurl"
        {
            return ManifestFormat::Hls;
        }
        #[cfg(feature = "dash")]
        if mime == "application/dash+xml" {
            return ManifestFormat::Dash;
        }
        if mime.starts_with("video/") || mime.starts_with("audio/") {
            return ManifestFormat::Progressive;
        }
    }

    // Check URL extension
    let path = url.path().to_lowercase();
    #[cfg(feature = "hls")]
    if path.ends_with(".m3u8") || path.ends_with(".m3u") {
        return ManifestFormat::Hls;
    }
    #[cfg(feature = "dash")]
    if path.ends_with(".mpd") {
        return ManifestFormat::Dash;
    }

    ManifestFormat::Progressive
}

/// Level description reported by the streaming client on manifest load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelInfo {
    /// Bandwidth in bits per second
    pub bitrate: u64,
    pub width: u32,
    pub height: u32,
    /// Label supplied by the manifest, if any
    pub name: Option<String>,
}

impl LevelInfo {
    pub fn new(bitrate: u64, width: u32, height: u32) -> Self {
        Self {
            bitrate,
            width,
            height,
            name: None,
        }
    }
}

/// Ordered, immutable list of quality levels for one manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityCatalogue {
    levels: Vec<QualityLevel>,
}

impl QualityCatalogue {
    /// Build a catalogue from client levels, keeping the client's indices.
    ///
    /// Names come from the level height ("720p"); duplicate heights are
    /// disambiguated with the bitrate in kbps ("720p@2800k").
    pub fn from_levels(levels: &[LevelInfo]) -> Self {
        let base_names: Vec<String> = levels
            .iter()
            .map(|level| match &level.name {
                Some(name) if !name.trim().is_empty() && !Quality::named(name.as_str()).is_auto() => {
                    name.trim().to_string()
                }
                _ => Resolution::new(level.width, level.height)
                    .quality_name()
                    .to_string(),
            })
            .collect();

        let mut occurrences: HashMap<&str, usize> = HashMap::new();
        for name in &base_names {
            *occurrences.entry(name.as_str()).or_default() += 1;
        }

        let mut seen: HashMap<String, usize> = HashMap::new();
        let levels = levels
            .iter()
            .zip(&base_names)
            .enumerate()
            .map(|(index, (level, base))| {
                let mut name = if occurrences[base.as_str()] > 1 {
                    format!("{}@{}k", base, level.bitrate / 1000)
                } else {
                    base.clone()
                };
                // Identical height and bitrate: fall back to the index
                let count = seen.entry(name.clone()).or_default();
                *count += 1;
                if *count > 1 {
                    name = format!("{}#{}", name, index);
                }
                QualityLevel {
                    index,
                    name,
                    bitrate: level.bitrate,
                    width: level.width,
                    height: level.height,
                }
            })
            .collect();

        Self { levels }
    }

    pub fn levels(&self) -> &[QualityLevel] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&QualityLevel> {
        self.levels.get(index)
    }

    pub fn find(&self, name: &str) -> Option<&QualityLevel> {
        self.levels.iter().find(|level| level.name == name)
    }

    /// Whether `quality` is `auto` or a member of this catalogue
    pub fn contains(&self, quality: &Quality) -> bool {
        match quality {
            Quality::Auto => true,
            Quality::Level(name) => self.find(name).is_some(),
        }
    }

    /// Selectable qualities: every level, then `auto`
    pub fn qualities(&self) -> Vec<Quality> {
        self.levels
            .iter()
            .map(QualityLevel::quality)
            .chain(std::iter::once(Quality::Auto))
            .collect()
    }

    /// Quality name for a client level index
    pub fn quality_at(&self, index: usize) -> Option<Quality> {
        self.get(index).map(QualityLevel::quality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_detect_hls() {
        assert_eq!(
            detect_format(&url("https://example.com/master.m3u8"), None),
            ManifestFormat::Hls
        );
        assert_eq!(
            detect_format(
                &url("https://example.com/stream"),
                Some("application/vnd.apple.mpegurl")
            ),
            ManifestFormat::Hls
        );
    }

    #[test]
    fn test_detect_dash() {
        assert_eq!(
            detect_format(&url("https://example.com/manifest.mpd"), None),
            ManifestFormat::Dash
        );
    }

    #[test]
    fn test_detect_progressive() {
        let mp4 = url("https://example.com/movie.mp4");
        assert_eq!(detect_format(&mp4, None), ManifestFormat::Progressive);
        assert_eq!(
            detect_format(&url("https://example.com/master.m3u8"), Some("video/mp4")),
            ManifestFormat::Progressive
        );
        assert!(!ManifestFormat::Progressive.is_adaptive());
    }

    #[test]
    fn test_catalogue_names_and_order() {
        let catalogue = QualityCatalogue::from_levels(&[
            LevelInfo::new(800_000, 640, 360),
            LevelInfo::new(2_800_000, 1280, 720),
            LevelInfo::new(5_000_000, 1920, 1080),
        ]);

        let names: Vec<_> = catalogue.levels().iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["360p", "720p", "1080p"]);
        assert_eq!(catalogue.qualities().len(), 4);
        assert_eq!(catalogue.qualities().last(), Some(&Quality::Auto));
        assert_eq!(catalogue.find("720p").map(|l| l.index), Some(1));
        assert!(catalogue.contains(&Quality::Auto));
        assert!(!catalogue.contains(&Quality::Level("4K".into())));
    }

    #[test]
    fn test_catalogue_disambiguates_duplicate_heights() {
        let catalogue = QualityCatalogue::from_levels(&[
            LevelInfo::new(2_000_000, 1280, 720),
            LevelInfo::new(3_500_000, 1280, 720),
            LevelInfo::new(3_500_000, 1280, 720),
        ]);

        let names: Vec<_> = catalogue.levels().iter().map(|l| l.name.clone()).collect();
        assert_eq!(names, vec!["720p@2000k", "720p@3500k", "720p@3500k#2"]);
    }
}
