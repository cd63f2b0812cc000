//! frameplay - frame-by-frame image sequence player core
//!
//! Re-exports all modules for use by the binary target.

// Core engine (cache, player, scheduler)
pub mod core;

// App modules
pub mod cli;
pub mod config;
pub mod paths;
pub mod server;

// Re-export commonly used types from core
pub use crate::core::event_bus::{BoxedEvent, EventBus, EventEmitter, downcast_event};
pub use crate::core::player_events::{FrameFailedEvent, FrameLoadedEvent, PlayerSnapshot, PlayerUpdateEvent};
pub use crate::core::{Frame, FrameProvider, Intent, PlayerModel, Session, SessionParams};
