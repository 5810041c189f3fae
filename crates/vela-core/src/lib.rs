//! Vela Core - Adaptive Media Playback Engine
//!
//! This crate drives a native media surface through a uniform player
//! contract:
//! - Typed, fault-isolated event bus per session
//! - Playback state machine over native lifecycle notifications
//! - Adaptive streaming through native support or an external client,
//!   with bounded error recovery
//! - Buffer strategy tuned to network conditions and viewer behavior
//! - Player factory with capability detection and a live-instance registry
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Vela Core                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │                    ┌──────────────┐                             │
//! │                    │    Player    │◄──── CapabilityProbe        │
//! │                    │   Factory    │                             │
//! │                    └──────┬───────┘                             │
//! │              ┌────────────┴────────────┐                        │
//! │       ┌──────┴───────┐         ┌───────┴──────┐                 │
//! │       │   Playback   │◄────────┤   Adaptive   │◄─── Streaming   │
//! │       │   Session    │  hooks  │    Player    │     Client      │
//! │       └──┬────────┬──┘         └──────────────┘                 │
//! │          │        │                                             │
//! │   ┌──────┴─────┐ ┌┴────────────┐  ┌──────────────┐              │
//! │   │   Media    │ │    Event    │◄─┤    Buffer    │◄── Network   │
//! │   │  Surface   │ │     Bus     │  │   Strategy   │    Probe     │
//! │   └────────────┘ └─────────────┘  └──────────────┘              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod config;
pub mod events;
pub mod surface;
pub mod manifest;
pub mod capabilities;
pub mod request;
mod timer;
pub mod player;
pub mod session;
pub mod streaming;
pub mod buffer;
pub mod factory;
pub mod sim;

pub use error::{Error, ErrorKind, Result};
pub use types::*;
pub use config::{
    ConfigOverrides, NativeFallbackPolicy, PlaybackOptions, PlayerConfig, RetryPolicy,
    SimpleConfig, Source, StreamingConfig,
};
pub use events::{EventPayload, EventRecord, EventType, ListenerHandle};
pub use surface::{MediaSurface, NativeEvent, SurfaceId};
pub use capabilities::{Capabilities, CapabilityProbe};
pub use request::PendingRequest;
pub use player::{Player, PlayerExt};
pub use session::PlaybackSession;
pub use streaming::{AdaptivePlayer, Delivery, StreamingClient, StreamingClientProvider};
pub use buffer::{BufferState, BufferStrategy, BufferStrategyConfig, BufferStrategyManager};
pub use factory::{FactoryStats, ManagedPlayer, PlayerFactory};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the player library with default configuration
pub fn init() {
    tracing::info!(version = VERSION, "Vela Core initialized");
}
