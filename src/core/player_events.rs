//! Events published by the frame provider and the player model.

use serde::{Deserialize, Serialize};

use super::frame::Frame;
use super::geometry::GeometrySnapshot;

// === Frame provider ===

/// A frame finished loading and is now cached
#[derive(Clone, Debug)]
pub struct FrameLoadedEvent(pub i32);

/// A frame exhausted its fetch attempts
#[derive(Clone, Debug)]
pub struct FrameFailedEvent {
    pub frame: i32,
    pub error: String,
}

// === Player ===

/// Frame pointers of the playback window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameWindow {
    pub start: i32,
    pub stop: i32,
    pub current: i32,
    /// Last successfully displayed frame
    pub previous: Option<i32>,
}

impl FrameWindow {
    /// Clamp any frame number into `[start, stop]`
    pub fn clamp(&self, frame: i64) -> i32 {
        frame.clamp(self.start as i64, self.stop as i64) as i32
    }
}

/// Everything the rendering surface needs, emitted after each state change
#[derive(Clone, Debug)]
pub struct PlayerUpdateEvent {
    /// Current frame image, `None` while it is loading (or failed)
    pub image: Option<Frame>,
    pub frames: FrameWindow,
    pub geometry: GeometrySnapshot,
    pub playing: bool,
    /// Wanted frame that could not be fetched
    pub stalled: Option<i32>,
}

impl PlayerUpdateEvent {
    /// First/previous/backward buttons disabled
    pub fn at_start(&self) -> bool {
        self.frames.current == self.frames.start
    }

    /// Last/next/forward/play buttons disabled
    pub fn at_end(&self) -> bool {
        self.frames.current == self.frames.stop
    }

    /// Show the loading indicator
    pub fn loading(&self) -> bool {
        self.image.is_none() && self.stalled.is_none()
    }

    /// JSON-friendly copy without pixels
    pub fn to_snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            frames: self.frames,
            geometry: self.geometry,
            playing: self.playing,
            loading: self.loading(),
            stalled: self.stalled,
            image_size: self.image.as_ref().map(|f| (f.width(), f.height())),
        }
    }
}

/// Serializable player state (control API, logs)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub frames: FrameWindow,
    pub geometry: GeometrySnapshot,
    pub playing: bool,
    pub loading: bool,
    pub stalled: Option<i32>,
    pub image_size: Option<(u32, u32)>,
}
