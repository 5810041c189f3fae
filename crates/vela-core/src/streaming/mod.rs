//! Adaptive streaming
//!
//! The adaptive player drives either the surface's own manifest support or
//! an external [`StreamingClient`]. Clients are created through a
//! [`StreamingClientProvider`] so the environment decides what is available.

mod controller;
mod recovery;

pub use controller::{AdaptivePlayer, Delivery};
pub use recovery::{classify, RecoveryAction, RetryTracker};

use crate::config::ClientOptions;
use crate::manifest::LevelInfo;
use crate::surface::SurfaceId;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

/// Error categories reported by streaming clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientErrorCategory {
    Network,
    Media,
    Mux,
    KeySystem,
    Other,
}

/// Notifications from a streaming client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamingEvent {
    /// Manifest loaded; levels are in manifest order
    ManifestParsed { levels: Vec<LevelInfo>, live: bool },
    /// The client started playing a different level
    LevelSwitched { level: usize },
    Error {
        category: ClientErrorCategory,
        /// Client-specific detail code, e.g. `manifestLoadError`
        details: String,
        message: String,
        fatal: bool,
    },
}

/// Callback receiving client notifications
pub type StreamingHandler = Arc<dyn Fn(StreamingEvent) + Send + Sync>;

/// External adaptive streaming client.
///
/// Like surfaces, clients must deliver notifications asynchronously and
/// never from inside one of these calls.
pub trait StreamingClient: Send {
    fn attach_media(&mut self, surface: &SurfaceId);
    fn load_source(&mut self, url: &Url);
    /// Pin a level, or `None` for automatic selection
    fn set_current_level(&mut self, level: Option<usize>);
    fn current_level(&self) -> Option<usize>;
    fn recover_media_error(&mut self);
    /// Restart loading from `position` after a network failure
    fn start_load(&mut self, position: f64);
    fn set_handler(&mut self, handler: StreamingHandler);
    fn destroy(&mut self);
}

/// Factory for streaming clients
pub trait StreamingClientProvider: Send + Sync {
    fn create_client(&self, options: &ClientOptions) -> Result<Box<dyn StreamingClient>>;
}
