//! Intent layer between input and the player model
//!
//! Input (keyboard, pointer, control API) is reduced to [`Intent`] values.
//! The controller validates arguments and maps each intent onto player
//! operations. Manual stepping always ends paused; seeking does not.

use std::time::Duration;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::config::{MAX_STEP, MIN_STEP, fps_for_index};

use super::geometry::ZoomDirection;
use super::player::PlayerModel;
use super::provider::FrameProvider;

/// Discrete user intent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Next,
    Previous,
    First,
    Last,
    Forward,
    Backward,
    Play,
    Pause,
    TogglePlay,
    /// Absolute frame number, clamped
    Seek(i64),
    /// Progress bar position in `0.0..=1.0`
    Rewind(f64),
    ZoomAtPoint {
        x: f64,
        y: f64,
        direction: ZoomDirection,
    },
    PanBy {
        d_top: f64,
        d_left: f64,
    },
    Fit,
    Focus {
        xtl: f64,
        xbr: f64,
        ytl: f64,
        ybr: f64,
    },
    ChangeStep(i64),
    /// Speed selector index 1..=6
    ChangeFps(i64),
    ChangeResetZoom(bool),
    /// Fetch a failed current frame again
    Retry,
}

/// Applies intents at time `now`; lives only for one call site
pub struct Controller<'a> {
    player: &'a mut PlayerModel,
    provider: &'a mut FrameProvider,
    now: Duration,
}

impl<'a> Controller<'a> {
    pub fn new(player: &'a mut PlayerModel, provider: &'a mut FrameProvider, now: Duration) -> Self {
        Self { player, provider, now }
    }

    pub fn apply(&mut self, intent: Intent) {
        trace!("Intent {:?}", intent);
        match intent {
            Intent::Next => self.step(1),
            Intent::Previous => self.step(-1),
            Intent::First => self.jump(self.player.frames().start),
            Intent::Last => self.jump(self.player.frames().stop),
            Intent::Forward => self.step(self.player.settings().multiple_step as i64),
            Intent::Backward => self.step(-(self.player.settings().multiple_step as i64)),
            Intent::Play => self.player.play(self.provider, self.now),
            Intent::Pause => self.player.pause(self.provider),
            Intent::TogglePlay => {
                if self.player.playing() {
                    self.player.pause(self.provider);
                } else {
                    self.player.play(self.provider, self.now);
                }
            }
            Intent::Seek(frame) => self.seek(frame),
            Intent::Rewind(fraction) => self.rewind(fraction),
            Intent::ZoomAtPoint { x, y, direction } => self.player.scale(x, y, direction, self.provider),
            Intent::PanBy { d_top, d_left } => self.player.move_by(d_top, d_left, self.provider),
            Intent::Fit => self.player.fit(self.provider),
            Intent::Focus { xtl, xbr, ytl, ybr } => self.player.focus(xtl, xbr, ytl, ybr, self.provider),
            Intent::ChangeStep(value) => self.change_step(value),
            Intent::ChangeFps(index) => self.change_fps(index),
            Intent::ChangeResetZoom(value) => self.player.set_reset_zoom(value),
            Intent::Retry => self.player.retry(self.provider, self.now),
        }
    }

    fn step(&mut self, delta: i64) {
        self.player.shift(delta, false, self.provider, self.now);
        self.player.pause(self.provider);
    }

    fn jump(&mut self, frame: i32) {
        self.player.shift(frame as i64, true, self.provider, self.now);
        self.player.pause(self.provider);
    }

    pub fn seek(&mut self, frame: i64) {
        self.player.shift(frame, true, self.provider, self.now);
    }

    /// Seek from the frame number field; anything but an integer is ignored
    pub fn seek_text(&mut self, input: &str) -> bool {
        match input.trim().parse::<i64>() {
            Ok(frame) => {
                self.seek(frame);
                true
            }
            Err(_) => {
                debug!("Ignoring frame input {:?}", input);
                false
            }
        }
    }

    fn rewind(&mut self, fraction: f64) {
        if !fraction.is_finite() {
            return;
        }
        let frames = self.player.frames();
        let span = frames.stop as i64 - frames.start as i64;
        let offset = (span as f64 * fraction.clamp(0.0, 1.0)).round() as i64;
        self.player.pause(self.provider);
        self.player
            .shift(frames.start as i64 + offset, true, self.provider, self.now);
    }

    fn change_step(&mut self, value: i64) {
        let step = value.clamp(MIN_STEP as i64, MAX_STEP as i64) as i32;
        self.player.set_multiple_step(step);
    }

    fn change_fps(&mut self, index: i64) {
        let fps = fps_for_index(index);
        debug!("Speed index {} -> {} fps", index, fps);
        self.player.set_fps(fps);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_bus::EventEmitter;
    use crate::core::geometry::Geometry;
    use crate::core::player::PlaybackSettings;
    use crate::core::testing::{MockSource, inline_provider, pump_until_idle};

    fn setup(stop: i32) -> (PlayerModel, FrameProvider, Duration) {
        let mut provider = inline_provider(stop, MockSource::new());
        let mut now = Duration::ZERO;
        provider.require(0, now);
        pump_until_idle(&mut provider, &mut now);
        let mut player = PlayerModel::new(
            0,
            stop,
            Geometry::new(800.0, 600.0),
            PlaybackSettings::default(),
            Duration::from_secs(5),
            EventEmitter::dummy(),
        );
        player.shift(0, true, &mut provider, now);
        (player, provider, now)
    }

    #[test]
    fn test_change_fps_table() {
        let (mut player, mut provider, now) = setup(9);
        let mut c = Controller::new(&mut player, &mut provider, now);

        c.apply(Intent::ChangeFps(6));
        assert_eq!(c.player.settings().fps, 100.0);
        c.apply(Intent::ChangeFps(0));
        assert_eq!(c.player.settings().fps, 1.0);
        c.apply(Intent::ChangeFps(3));
        assert_eq!(c.player.settings().fps, 12.0);
    }

    #[test]
    fn test_change_step_clamps() {
        let (mut player, mut provider, now) = setup(9);
        let mut c = Controller::new(&mut player, &mut provider, now);

        c.apply(Intent::ChangeStep(1));
        assert_eq!(c.player.settings().multiple_step, 2);
        c.apply(Intent::ChangeStep(500));
        assert_eq!(c.player.settings().multiple_step, 100);
        c.apply(Intent::ChangeStep(7));
        assert_eq!(c.player.settings().multiple_step, 7);
    }

    #[test]
    fn test_manual_steps_pause() {
        let (mut player, mut provider, now) = setup(99);
        let mut c = Controller::new(&mut player, &mut provider, now);

        c.apply(Intent::Play);
        c.apply(Intent::Next);
        assert!(!c.player.playing());
        assert_eq!(c.player.frames().current, 1);

        c.apply(Intent::Play);
        c.apply(Intent::Forward);
        assert!(!c.player.playing());
        assert_eq!(c.player.frames().current, 11);

        c.apply(Intent::Backward);
        c.apply(Intent::Previous);
        assert_eq!(c.player.frames().current, 0);

        c.apply(Intent::Last);
        assert_eq!(c.player.frames().current, 99);
        c.apply(Intent::First);
        assert_eq!(c.player.frames().current, 0);
    }

    #[test]
    fn test_seek_keeps_playing() {
        let (mut player, mut provider, now) = setup(99);
        let mut c = Controller::new(&mut player, &mut provider, now);

        c.apply(Intent::Play);
        c.apply(Intent::Seek(42));
        assert!(c.player.playing());
        assert_eq!(c.player.frames().current, 42);

        c.apply(Intent::Seek(1_000));
        assert_eq!(c.player.frames().current, 99);
    }

    #[test]
    fn test_seek_text_ignores_garbage() {
        let (mut player, mut provider, now) = setup(99);
        let mut c = Controller::new(&mut player, &mut provider, now);

        assert!(!c.seek_text("12.5"));
        assert!(!c.seek_text("abc"));
        assert_eq!(c.player.frames().current, 0);
        assert!(c.seek_text(" 17 "));
        assert_eq!(c.player.frames().current, 17);
    }

    #[test]
    fn test_rewind_fraction() {
        let (mut player, mut provider, now) = setup(99);
        let mut c = Controller::new(&mut player, &mut provider, now);

        c.apply(Intent::Play);
        c.apply(Intent::Rewind(0.5));
        assert!(!c.player.playing());
        assert_eq!(c.player.frames().current, 50);

        c.apply(Intent::Rewind(f64::NAN));
        assert_eq!(c.player.frames().current, 50);
        c.apply(Intent::Rewind(f64::INFINITY));
        assert_eq!(c.player.frames().current, 50);
    }

    #[test]
    fn test_rewind_out_of_range_clamps() {
        let mut provider = inline_provider(99, MockSource::new());
        let mut player = PlayerModel::new(
            10,
            99,
            Geometry::new(800.0, 600.0),
            PlaybackSettings::default(),
            Duration::from_secs(5),
            EventEmitter::dummy(),
        );
        let mut c = Controller::new(&mut player, &mut provider, Duration::ZERO);

        c.apply(Intent::Rewind(1e300));
        assert_eq!(c.player.frames().current, 99);
        c.apply(Intent::Rewind(-1e300));
        assert_eq!(c.player.frames().current, 10);
        c.apply(Intent::Rewind(1.5));
        assert_eq!(c.player.frames().current, 99);
    }

    #[test]
    fn test_extreme_numeric_intents_clamp() {
        let (mut player, mut provider, now) = setup(99);
        let mut c = Controller::new(&mut player, &mut provider, now);

        c.apply(Intent::Seek(i64::MAX));
        assert_eq!(c.player.frames().current, 99);
        c.apply(Intent::Seek(i64::MIN));
        assert_eq!(c.player.frames().current, 0);

        c.apply(Intent::ChangeStep(i64::MAX));
        assert_eq!(c.player.settings().multiple_step, 100);
        c.apply(Intent::ChangeStep(i64::MIN));
        assert_eq!(c.player.settings().multiple_step, 2);

        c.apply(Intent::ChangeFps(i64::MAX));
        assert_eq!(c.player.settings().fps, 100.0);
        c.apply(Intent::ChangeFps(i64::MIN));
        assert_eq!(c.player.settings().fps, 1.0);
    }

    #[test]
    fn test_toggle_play() {
        let (mut player, mut provider, now) = setup(9);
        let mut c = Controller::new(&mut player, &mut provider, now);

        c.apply(Intent::TogglePlay);
        assert!(c.player.playing());
        c.apply(Intent::TogglePlay);
        assert!(!c.player.playing());
    }

    #[test]
    fn test_intent_json() {
        let seek: Intent = serde_json::from_str(r#"{"seek": 12}"#).unwrap();
        assert_eq!(seek, Intent::Seek(12));
        let next: Intent = serde_json::from_str(r#""next""#).unwrap();
        assert_eq!(next, Intent::Next);
        let zoom: Intent =
            serde_json::from_str(r#"{"zoom_at_point": {"x": 1.0, "y": 2.0, "direction": "in"}}"#).unwrap();
        assert!(matches!(zoom, Intent::ZoomAtPoint { .. }));
    }
}
