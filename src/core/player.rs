//! Playback and view state of one viewing session
//!
//! **Architecture**: PlayerModel does NOT own the FrameProvider. It receives
//! `&mut FrameProvider` when it needs frames, so the session stays the single
//! owner of both and timers never alias state.
//!
//! **Used by**: Controller (intents), Session (timers, load notices)
//!
//! # Timing Model
//!
//! Playback ticks every `1/fps` seconds on the session clock and advances by
//! `max(floor(fps / 25), 1)` frames, so speeds above 25 fps skip frames
//! instead of ticking faster than a display can follow.
//!
//! # Waiting for frames
//!
//! `shift()` to a frame that is not cached returns `false` and pauses. If
//! playback was running, it resumes once the frame arrives, after a continue
//! delay that lets a few more frames land first.

use std::time::Duration;

use log::{debug, trace};

use crate::config::clamp_fps;

use super::event_bus::EventEmitter;
use super::frame::Frame;
use super::geometry::{Geometry, GeometrySnapshot, ZoomDirection};
use super::player_events::{FrameWindow, PlayerSnapshot, PlayerUpdateEvent};
use super::provider::FrameProvider;

/// Playback timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackClock {
    Paused,
    Playing { next_tick: Duration },
}

/// What the viewer is doing, derived from model and cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Paused,
    Playing,
    /// Current frame is not cached yet
    WaitingForFrame,
}

/// User-tunable playback settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSettings {
    /// Frames per forward/backward step
    pub multiple_step: i32,
    pub fps: f64,
    /// Fit every newly shown frame
    pub reset_zoom: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            multiple_step: 10,
            fps: 25.0,
            reset_zoom: false,
        }
    }
}

pub struct PlayerModel {
    frames: FrameWindow,
    settings: PlaybackSettings,
    geometry: Geometry,

    clock: PlaybackClock,
    /// Set by a stalled shift; the next playback tick stops without notifying
    pause_flag: bool,
    continue_after_load: bool,
    continue_timer: Option<Duration>,
    continue_delay: Duration,
    stalled: Option<i32>,

    emitter: EventEmitter,
}

impl PlayerModel {
    pub fn new(
        start: i32,
        stop: i32,
        geometry: Geometry,
        settings: PlaybackSettings,
        continue_delay: Duration,
        emitter: EventEmitter,
    ) -> Self {
        debug!(
            "PlayerModel: frames [{}..={}], viewport {}x{}, {:?}",
            start, stop, geometry.width, geometry.height, settings
        );
        Self {
            frames: FrameWindow {
                start,
                stop,
                current: start,
                previous: None,
            },
            settings,
            geometry,
            clock: PlaybackClock::Paused,
            pause_flag: false,
            continue_after_load: false,
            continue_timer: None,
            continue_delay,
            stalled: None,
            emitter,
        }
    }

    // === Accessors ===

    pub fn frames(&self) -> FrameWindow {
        self.frames
    }

    pub fn geometry(&self) -> GeometrySnapshot {
        self.geometry.snapshot()
    }

    pub fn settings(&self) -> PlaybackSettings {
        self.settings
    }

    pub fn playing(&self) -> bool {
        matches!(self.clock, PlaybackClock::Playing { .. })
    }

    pub fn stalled(&self) -> Option<i32> {
        self.stalled
    }

    pub fn state(&self, provider: &FrameProvider) -> PlaybackState {
        if self.stalled.is_none() && !provider.is_cached(self.frames.current) {
            PlaybackState::WaitingForFrame
        } else if self.playing() {
            PlaybackState::Playing
        } else {
            PlaybackState::Paused
        }
    }

    /// Current frame image; a miss schedules it
    pub fn image(&self, provider: &mut FrameProvider, now: Duration) -> Option<Frame> {
        provider.require(self.frames.current, now)
    }

    pub fn set_fps(&mut self, fps: f64) {
        self.settings.fps = fps;
    }

    pub fn set_multiple_step(&mut self, step: i32) {
        self.settings.multiple_step = step;
    }

    pub fn set_reset_zoom(&mut self, reset_zoom: bool) {
        self.settings.reset_zoom = reset_zoom;
    }

    // === Timers ===

    /// Playback tick interval; fps outside the speed table is clamped
    fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / clamp_fps(self.settings.fps))
    }

    pub fn tick_deadline(&self) -> Option<Duration> {
        match self.clock {
            PlaybackClock::Paused => None,
            PlaybackClock::Playing { next_tick } => Some(next_tick),
        }
    }

    pub fn continue_deadline(&self) -> Option<Duration> {
        self.continue_timer
    }

    /// Earliest timer the session has to fire for this model
    pub fn next_deadline(&self) -> Option<Duration> {
        match (self.tick_deadline(), self.continue_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // === Navigation ===

    /// Move to `delta` (absolute) or `current + delta`, clamped to the window.
    ///
    /// Returns `true` if a different frame than last time is now shown.
    pub fn shift(&mut self, delta: i64, absolute: bool, provider: &mut FrameProvider, now: Duration) -> bool {
        self.continue_after_load = false;
        let target = if absolute {
            delta
        } else {
            (self.frames.current as i64).saturating_add(delta)
        };
        self.frames.current = self.frames.clamp(target);

        let Some(image) = provider.require(self.frames.current, now) else {
            if provider.is_failed(self.frames.current) {
                debug!("Frame {} unavailable, stalling", self.frames.current);
                self.stall(self.frames.current);
            } else {
                trace!("Frame {} not cached, waiting", self.frames.current);
                self.continue_after_load = self.playing();
                self.pause_flag = true;
            }
            self.notify(None);
            return false;
        };

        self.stalled = None;
        if self.settings.reset_zoom || self.frames.previous.is_none() {
            self.geometry.fit(image.width() as f64, image.height() as f64);
        }
        self.notify(Some(image));

        let changed = self.frames.previous != Some(self.frames.current);
        self.frames.previous = Some(self.frames.current);
        changed
    }

    pub fn play(&mut self, provider: &FrameProvider, now: Duration) {
        self.pause_flag = false;
        self.clock = PlaybackClock::Playing {
            next_tick: now + self.period(),
        };
        debug!("Play from {} at {} fps", self.frames.current, self.settings.fps);
        self.notify(provider.peek(self.frames.current));
    }

    /// Stop playback. A pending resume after a frame load is cancelled too;
    /// the frame is still shown when it arrives.
    pub fn pause(&mut self, provider: &FrameProvider) {
        if self.playing() || self.continue_after_load {
            debug!("Pause at {}", self.frames.current);
        }
        self.continue_after_load = false;
        self.halt(provider);
    }

    /// Stop the clock but keep `continue_after_load`
    fn halt(&mut self, provider: &FrameProvider) {
        self.clock = PlaybackClock::Paused;
        self.pause_flag = true;
        self.notify(provider.peek(self.frames.current));
    }

    /// Playback timer fired
    pub fn playback_tick(&mut self, provider: &mut FrameProvider, now: Duration) {
        if !self.playing() {
            return;
        }
        if self.pause_flag {
            trace!("Playback stopped while waiting for frame {}", self.frames.current);
            self.clock = PlaybackClock::Paused;
            return;
        }

        self.clock = PlaybackClock::Playing {
            next_tick: now + self.period(),
        };
        let skip = ((self.settings.fps / 25.0).floor() as i64).max(1);
        if !self.shift(skip, false, provider, now) {
            self.halt(provider);
        }
    }

    /// A frame finished loading
    pub fn on_frame_loaded(&mut self, frame: i32, provider: &mut FrameProvider, now: Duration) {
        if frame != self.frames.current {
            return;
        }
        self.continue_timer = None;
        if self.continue_after_load {
            trace!("Frame {} arrived, continuing in {:?}", frame, self.continue_delay);
            self.continue_timer = Some(now + self.continue_delay);
        } else {
            self.shift(0, false, provider, now);
        }
    }

    /// Continue timer fired: resume playback or just show the frame
    pub fn on_continue_timer(&mut self, provider: &mut FrameProvider, now: Duration) {
        match self.continue_timer {
            Some(due) if now >= due => {}
            _ => return,
        }
        self.continue_timer = None;
        if self.continue_after_load {
            self.continue_after_load = false;
            self.play(provider, now);
        } else {
            self.shift(0, false, provider, now);
        }
    }

    /// A frame ran out of fetch attempts
    pub fn on_frame_failed(&mut self, frame: i32, provider: &FrameProvider) {
        if frame != self.frames.current {
            return;
        }
        self.stall(frame);
        self.notify(provider.peek(frame));
    }

    fn stall(&mut self, frame: i32) {
        self.stalled = Some(frame);
        self.continue_after_load = false;
        self.continue_timer = None;
        self.clock = PlaybackClock::Paused;
        self.pause_flag = true;
    }

    /// Fetch the current frame again after a failure
    pub fn retry(&mut self, provider: &mut FrameProvider, now: Duration) {
        let current = self.frames.current;
        self.stalled = None;
        if provider.retry(current, now).is_some() {
            self.shift(0, false, provider, now);
        } else {
            debug!("Retrying frame {}", current);
            self.notify(None);
        }
    }

    // === Geometry ===

    /// Fit the current frame into the viewport; no-op until it is cached
    pub fn fit(&mut self, provider: &FrameProvider) {
        let Some(image) = provider.peek(self.frames.current) else {
            return;
        };
        self.geometry.fit(image.width() as f64, image.height() as f64);
        self.notify(Some(image));
    }

    /// Zoom to a content-space box
    pub fn focus(&mut self, xtl: f64, xbr: f64, ytl: f64, ybr: f64, provider: &FrameProvider) {
        let Some(image) = provider.peek(self.frames.current) else {
            return;
        };
        self.geometry.focus(xtl, xbr, ytl, ybr);
        // Focusing is not a frame change for listeners comparing frames
        self.frames.previous = Some(self.frames.current);
        self.notify(Some(image));
    }

    /// Zoom one notch around viewport point `(x, y)`
    pub fn scale(&mut self, x: f64, y: f64, direction: ZoomDirection, provider: &FrameProvider) {
        let Some(image) = provider.peek(self.frames.current) else {
            return;
        };
        self.geometry.zoom_at(x, y, direction);
        self.notify(Some(image));
    }

    /// Pan by a viewport offset
    pub fn move_by(&mut self, d_top: f64, d_left: f64, provider: &FrameProvider) {
        self.geometry.translate(d_top, d_left);
        self.notify(provider.peek(self.frames.current));
    }

    // === Notifications ===

    pub fn update_event(&self, image: Option<Frame>) -> PlayerUpdateEvent {
        PlayerUpdateEvent {
            image,
            frames: self.frames,
            geometry: self.geometry.snapshot(),
            playing: self.playing(),
            stalled: self.stalled,
        }
    }

    pub fn snapshot(&self, provider: &FrameProvider) -> PlayerSnapshot {
        self.update_event(provider.peek(self.frames.current)).to_snapshot()
    }

    fn notify(&self, image: Option<Frame>) {
        self.emitter.emit(self.update_event(image));
    }
}
