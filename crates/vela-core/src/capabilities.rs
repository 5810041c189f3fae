//! Capability detection
//!
//! Environment probing (codec tables, library availability) lives behind
//! [`CapabilityProbe`] so it can be swapped for a fixed answer in tests.

use crate::manifest::ManifestFormat;
use serde::{Deserialize, Serialize};

/// What the current environment can play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Surface plays HLS manifests itself
    pub native_hls: bool,
    /// Surface plays DASH manifests itself
    pub native_dash: bool,
    /// External streaming client is loadable and supported
    pub streaming_client: bool,
}

impl Capabilities {
    /// Whether the surface can play `format` without the external client
    pub fn native_support(&self, format: ManifestFormat) -> bool {
        match format {
            ManifestFormat::Hls => self.native_hls,
            ManifestFormat::Dash => self.native_dash,
            ManifestFormat::Progressive => true,
        }
    }

    /// Whether `format` can be played at all
    pub fn can_play(&self, format: ManifestFormat) -> bool {
        self.native_support(format) || (format.is_adaptive() && self.streaming_client)
    }

    /// No adaptive path of any kind
    pub fn lacks_adaptive_support(&self) -> bool {
        !self.native_hls && !self.native_dash && !self.streaming_client
    }
}

/// Pure query over the execution environment
pub trait CapabilityProbe: Send + Sync {
    fn detect(&self) -> Capabilities;
}

impl CapabilityProbe for Capabilities {
    fn detect(&self) -> Capabilities {
        *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_support_per_format() {
        let safari = Capabilities {
            native_hls: true,
            ..Default::default()
        };
        assert!(safari.native_support(ManifestFormat::Hls));
        assert!(!safari.native_support(ManifestFormat::Dash));
        assert!(safari.can_play(ManifestFormat::Hls));
        assert!(!safari.can_play(ManifestFormat::Dash));
        assert!(safari.can_play(ManifestFormat::Progressive));
    }

    #[test]
    fn test_client_only_environment() {
        let caps = Capabilities {
            streaming_client: true,
            ..Default::default()
        };
        assert!(caps.can_play(ManifestFormat::Dash));
        assert!(!caps.native_support(ManifestFormat::Hls));
        assert!(!caps.lacks_adaptive_support());
        assert!(Capabilities::default().lacks_adaptive_support());
    }
}
