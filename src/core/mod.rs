//! Core engine modules - frame cache, player model, scheduler
//!
//! These modules form the playback engine, independent of any UI or server.

pub mod controller;
pub mod event_bus;
pub mod frame;
pub mod geometry;
pub mod player;
pub mod player_events;
pub mod provider;
pub mod session;
pub mod source;
pub mod workers;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use controller::{Controller, Intent};
pub use event_bus::EventBus;
pub use frame::{FetchError, Frame};
pub use player::{PlaybackState, PlayerModel};
pub use provider::{CacheStats, FrameProvider};
pub use session::{Session, SessionParams};
pub use source::{DirFrameSource, FrameSource, HttpFrameSource, TaskId};
pub use workers::Workers;
