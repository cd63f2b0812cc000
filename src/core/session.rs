//! Cooperative scheduler for one viewing session
//!
//! **Why**: the load pump, the playback clock, the continue timer and fetch
//! retries all mutate the same cache and frame pointer. Instead of separate
//! timers, the session owns provider, player and event bus, and fires every
//! deadline itself from one thread. Nothing else mutates them.
//!
//! **Used by**: `frameplay play` (real time via `run()`), tests (virtual time
//! via `advance_to()`)
//!
//! # Clock
//!
//! Time is a `Duration` since the session started. `advance_to(t)` fires all
//! deadlines up to `t` in order, applying finished fetches before each one.
//! Events are dispatched after each fired timer or intent, once the state
//! change is complete.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::PlayerSettings;

use super::controller::{Controller, Intent};
use super::event_bus::EventBus;
use super::geometry::Geometry;
use super::player::{PlaybackSettings, PlaybackState, PlayerModel};
use super::player_events::PlayerSnapshot;
use super::provider::{FetchResult, FrameProvider, LoadNotice};
use super::source::{FrameSource, TaskId};
use super::workers::WorkerPool;

/// Longest blocking wait in `run()` when no timer is armed
const IDLE_WAIT: Duration = Duration::from_millis(250);

/// Bootstrap parameters of a viewing session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionParams {
    pub task: TaskId,
    pub start: i32,
    pub stop: i32,
    /// Annotation mode fits every frame; interpolation mode fits once
    pub annotation_mode: bool,
    pub display_width: f64,
    pub display_height: f64,
}

#[derive(Debug, Clone, Copy)]
enum Timer {
    Pump,
    Continue,
    Playback,
}

pub struct Session {
    provider: FrameProvider,
    player: PlayerModel,
    bus: EventBus,
    now: Duration,
}

impl Session {
    pub fn new(
        params: &SessionParams,
        settings: &PlayerSettings,
        source: Arc<dyn FrameSource>,
        pool: Arc<dyn WorkerPool>,
    ) -> Self {
        let start = params.start;
        let stop = if params.stop < params.start {
            warn!("stop {} before start {}, using a single frame", params.stop, params.start);
            params.start
        } else {
            params.stop
        };

        let bus = EventBus::new();
        let provider = FrameProvider::new(
            params.task,
            start,
            stop,
            settings.provider_config(),
            source,
            pool,
            bus.emitter(),
        );
        let player = PlayerModel::new(
            start,
            stop,
            Geometry::new(params.display_width, params.display_height),
            PlaybackSettings {
                multiple_step: settings.multiple_step,
                fps: settings.fps,
                reset_zoom: params.annotation_mode,
            },
            settings.continue_delay(),
            bus.emitter(),
        );

        info!(
            "Session: task {} frames [{}..={}] ({} mode)",
            params.task,
            start,
            stop,
            if params.annotation_mode { "annotation" } else { "interpolation" }
        );

        Self {
            provider,
            player,
            bus,
            now: Duration::ZERO,
        }
    }

    /// Show `frame` (clamped). Subscribe to the bus before calling this to
    /// see the first update.
    pub fn open(&mut self, frame: i64) {
        self.player.shift(frame, true, &mut self.provider, self.now);
        self.bus.dispatch();
    }

    // === Accessors ===

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn player(&self) -> &PlayerModel {
        &self.player
    }

    pub fn provider(&self) -> &FrameProvider {
        &self.provider
    }

    pub fn state(&self) -> PlaybackState {
        self.player.state(&self.provider)
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.player.snapshot(&self.provider)
    }

    // === Intents ===

    pub fn apply(&mut self, intent: Intent) {
        Controller::new(&mut self.player, &mut self.provider, self.now).apply(intent);
        self.bus.dispatch();
    }

    /// Seek from text input; non-integers are ignored
    pub fn seek_text(&mut self, input: &str) -> bool {
        let applied = Controller::new(&mut self.player, &mut self.provider, self.now).seek_text(input);
        self.bus.dispatch();
        applied
    }

    // === Scheduling ===

    /// Earliest armed deadline of any timer
    pub fn next_deadline(&self) -> Option<Duration> {
        self.next_timer().map(|(due, _)| due)
    }

    fn next_timer(&self) -> Option<(Duration, Timer)> {
        [
            (self.provider.next_deadline(), Timer::Pump),
            (self.player.continue_deadline(), Timer::Continue),
            (self.player.tick_deadline(), Timer::Playback),
        ]
        .into_iter()
        .filter_map(|(due, timer)| due.map(|d| (d, timer)))
        .min_by_key(|(due, _)| *due)
    }

    /// Fire every deadline up to `t` and move the clock there
    pub fn advance_to(&mut self, t: Duration) {
        loop {
            self.drain_results();
            match self.next_timer() {
                Some((due, timer)) if due <= t => {
                    self.now = self.now.max(due);
                    self.fire(timer);
                    self.bus.dispatch();
                }
                _ => break,
            }
        }
        self.now = self.now.max(t);
        self.bus.dispatch();
    }

    pub fn advance_by(&mut self, dt: Duration) {
        self.advance_to(self.now + dt);
    }

    fn fire(&mut self, timer: Timer) {
        let now = self.now;
        match timer {
            Timer::Pump => self.provider.pump_tick(now),
            Timer::Continue => self.player.on_continue_timer(&mut self.provider, now),
            Timer::Playback => self.player.playback_tick(&mut self.provider, now),
        }
    }

    fn drain_results(&mut self) {
        while let Some(done) = self.provider.try_recv() {
            self.on_fetch_result(done);
        }
    }

    fn on_fetch_result(&mut self, done: FetchResult) {
        match self.provider.complete(done, self.now) {
            Some(LoadNotice::Loaded(frame)) => self.player.on_frame_loaded(frame, &mut self.provider, self.now),
            Some(LoadNotice::Failed(frame)) => self.player.on_frame_failed(frame, &self.provider),
            None => {}
        }
    }

    /// Drive the session in real time until `keep_going` says stop or the
    /// intent channel closes.
    ///
    /// Blocks on intents and fetch completions, waking up for the next
    /// deadline.
    pub fn run<F>(&mut self, intents: &Receiver<Intent>, mut keep_going: F)
    where
        F: FnMut(&Session) -> bool,
    {
        let origin = Instant::now().checked_sub(self.now).unwrap_or_else(Instant::now);
        let results = self.provider.results().clone();
        info!("Session loop started at {:?}", self.now);

        while keep_going(&*self) {
            let wait = self
                .next_deadline()
                .map(|due| due.saturating_sub(origin.elapsed()))
                .unwrap_or(IDLE_WAIT)
                .min(IDLE_WAIT);

            crossbeam_channel::select! {
                recv(intents) -> msg => match msg {
                    Ok(intent) => {
                        self.advance_to(origin.elapsed());
                        self.apply(intent);
                    }
                    Err(_) => {
                        info!("Intent channel closed");
                        break;
                    }
                },
                recv(results) -> msg => {
                    if let Ok(done) = msg {
                        self.on_fetch_result(done);
                    }
                }
                default(wait) => {}
            }
            self.advance_to(origin.elapsed());
        }
        debug!("Session loop finished at {:?}", self.now);
    }

    /// Stop playback and loading; late fetch results are dropped
    pub fn shutdown(&mut self) {
        self.player.pause(&self.provider);
        self.provider.shutdown();
        self.bus.dispatch();
        let stats = self.provider.stats();
        info!(
            "Session closed: {} frames cached, hit rate {:.1}%",
            self.provider.cached_count(),
            stats.hit_rate() * 100.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::player_events::{FrameFailedEvent, PlayerUpdateEvent};
    use crate::core::testing::MockSource;
    use crate::core::workers::{InlinePool, Workers};
    use std::sync::Mutex;

    fn params(stop: i32) -> SessionParams {
        SessionParams {
            task: 7,
            start: 0,
            stop,
            annotation_mode: false,
            display_width: 800.0,
            display_height: 600.0,
        }
    }

    fn session(stop: i32, source: Arc<MockSource>) -> Session {
        Session::new(&params(stop), &PlayerSettings::default(), source, Arc::new(InlinePool))
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_open_loads_and_shows_first_frame() {
        let mut s = session(99, MockSource::new());
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        s.bus().subscribe::<PlayerUpdateEvent, _>(move |e| {
            sink.lock().unwrap().push(e.image.is_some());
        });

        s.open(0);
        assert_eq!(s.state(), PlaybackState::WaitingForFrame);
        assert_eq!(*updates.lock().unwrap(), vec![false]);

        s.advance_to(ms(25));
        assert_eq!(s.state(), PlaybackState::Paused);
        assert_eq!(s.player().frames().previous, Some(0));
        assert_eq!(updates.lock().unwrap().last(), Some(&true));
        assert_eq!(s.snapshot().image_size, Some((16, 9)));
    }

    #[test]
    fn test_play_walks_to_end_then_pauses() {
        let mut s = session(99, MockSource::new());
        s.open(0);
        s.advance_to(ms(5_000));
        assert_eq!(s.provider().cached_count(), 100);

        s.apply(Intent::Play);
        let mut expected = 0;
        while s.player().playing() {
            let due = s.player().tick_deadline().unwrap();
            s.advance_to(due);
            if s.player().playing() {
                expected += 1;
                assert_eq!(s.player().frames().current, expected);
            }
        }
        assert_eq!(s.player().frames().current, 99);
        assert_eq!(s.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_high_fps_skips_frames() {
        let mut s = session(99, MockSource::new());
        s.open(0);
        s.advance_to(ms(5_000));

        s.apply(Intent::ChangeFps(6));
        s.apply(Intent::Play);
        let due = s.player().tick_deadline().unwrap();
        s.advance_to(due);
        assert_eq!(s.player().frames().current, 4);
    }

    #[test]
    fn test_stalled_playback_resumes_after_continue_delay() {
        let mut s = session(99, MockSource::new());
        s.open(0);
        s.apply(Intent::Play);

        // 25ms: frame 0 arrives; 40ms: tick wants 1, not there yet
        s.advance_to(ms(45));
        assert!(!s.player().playing());
        assert_eq!(s.player().frames().current, 1);

        // 50ms: frame 1 arrives, continue timer armed
        s.advance_to(ms(50));
        assert_eq!(s.player().continue_deadline(), Some(ms(5_050)));

        s.advance_to(ms(5_049));
        assert!(!s.player().playing());
        s.advance_to(ms(5_050));
        assert!(s.player().playing());

        s.advance_to(ms(20_000));
        assert_eq!(s.player().frames().current, 99);
        assert!(!s.player().playing());
    }

    #[test]
    fn test_pause_while_waiting_stays_paused() {
        let mut s = session(99, MockSource::new());
        s.open(0);
        s.apply(Intent::Play);
        s.advance_to(ms(45));
        assert_eq!(s.state(), PlaybackState::WaitingForFrame);

        s.apply(Intent::Pause);
        s.advance_to(ms(6_000));
        assert!(!s.player().playing());
        assert_eq!(s.player().continue_deadline(), None);
        assert_eq!(s.player().frames().previous, Some(1));
    }

    #[test]
    fn test_rewind_extremes_with_offset_start() {
        let mut p = params(99);
        p.start = 10;
        let mut s = Session::new(&p, &PlayerSettings::default(), MockSource::new(), Arc::new(InlinePool));
        s.open(10);

        s.apply(Intent::Rewind(1e300));
        assert_eq!(s.player().frames().current, 99);
        s.apply(Intent::Rewind(-1e300));
        assert_eq!(s.player().frames().current, 10);
    }

    #[test]
    fn test_failed_frame_stalls_then_retry_recovers() {
        let source = MockSource::new();
        source.fail(1, 100);
        let mut s = session(9, Arc::clone(&source));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        s.bus().subscribe::<FrameFailedEvent, _>(move |e| {
            sink.lock().unwrap().push(e.frame);
        });

        s.open(0);
        s.advance_to(ms(25));
        s.apply(Intent::Play);
        s.advance_to(ms(2_000));

        assert_eq!(*failures.lock().unwrap(), vec![1]);
        assert_eq!(s.player().frames().current, 1);
        assert_eq!(s.player().stalled(), Some(1));
        assert!(!s.player().playing());
        assert_eq!(s.player().continue_deadline(), None);
        assert_eq!(source.fetch_count(1), 3);
        // The walk went on past the bad frame
        assert!(s.provider().is_cached(9));

        source.fail(1, 0);
        s.apply(Intent::Retry);
        s.advance_to(ms(3_000));
        assert_eq!(s.player().stalled(), None);
        assert_eq!(s.player().frames().previous, Some(1));
        assert_eq!(s.snapshot().image_size, Some((16, 9)));
    }

    #[test]
    fn test_seek_during_load_takes_priority() {
        let source = MockSource::new();
        let mut s = session(999, Arc::clone(&source));
        s.open(0);
        s.advance_to(ms(100));
        s.apply(Intent::Seek(700));
        s.advance_to(ms(200));

        assert!(s.provider().is_cached(700));
        assert_eq!(s.player().frames().previous, Some(700));
    }

    #[test]
    fn test_run_with_worker_threads() {
        let source = MockSource::new();
        let pool = Arc::new(Workers::new(1).unwrap());
        let mut s = Session::new(&params(4), &PlayerSettings::default(), source, pool);
        s.open(0);

        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(Intent::Last).unwrap();
        let started = Instant::now();
        s.run(&rx, |s| {
            s.player().frames().previous != Some(4) && started.elapsed() < Duration::from_secs(5)
        });
        assert_eq!(s.player().frames().current, 4);
        assert_eq!(s.player().frames().previous, Some(4));

        s.shutdown();
        assert!(!s.provider().is_pumping());
    }

    #[test]
    fn test_inverted_bounds_collapse() {
        let mut p = params(5);
        p.start = 10;
        let s = Session::new(&p, &PlayerSettings::default(), MockSource::new(), Arc::new(InlinePool));
        let f = s.player().frames();
        assert_eq!((f.start, f.stop), (10, 10));
    }
}
