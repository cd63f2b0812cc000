//! Frame cache and sequential prefetcher
//!
//! `require(frame)` answers synchronously: the cached image, or `None` while
//! the frame is fetched in the background. A periodic pump drains a LIFO load
//! stack and issues **at most one** fetch at a time; every completed load
//! queues `frame + 1`, so loading walks forward through the sequence until the
//! load budget runs out or the last frame is reached.
//!
//! # Load budget
//!
//! `budget` bounds how many sequential loads one urgent `require()` or one
//! prefetch run may trigger. An urgent miss resets it; a prefetch run starts
//! with `budget - distance`. At zero, the pending stack is dropped.
//!
//! # Cache
//!
//! Frames are never evicted during a session: the cache only grows, bounded
//! by the sequence length.
//!
//! # Failures
//!
//! A failed fetch keeps the fetch slot and is retried after an exponential
//! backoff. Once `max_fetch_attempts` are used up the frame is marked failed,
//! the walk continues past it, and `FrameFailedEvent` is emitted. Failed
//! frames are only fetched again through `retry()`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, trace, warn};

use crate::config::ProviderConfig;

use super::event_bus::EventEmitter;
use super::frame::{FetchError, Frame};
use super::player_events::{FrameFailedEvent, FrameLoadedEvent};
use super::source::{FrameSource, TaskId};
use super::workers::{WorkerPool, with_epoch};

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }
}

/// Load pump timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Idle,
    Running { next_tick: Duration },
}

/// The single fetch slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlight {
    Fetching { frame: i32, attempt: u32 },
    /// Previous attempt failed; slot stays taken until the retry goes out
    Backoff { frame: i32, attempt: u32, until: Duration },
}

/// Worker -> session completion message
#[derive(Debug)]
pub struct FetchResult {
    epoch: u64,
    frame: i32,
    attempt: u32,
    result: Result<Frame, FetchError>,
}

/// What a completion meant for the sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadNotice {
    Loaded(i32),
    Failed(i32),
}

pub struct FrameProvider {
    task: TaskId,
    start: i32,
    stop: i32,
    config: ProviderConfig,

    cache: HashMap<i32, Frame>,
    failed: HashSet<i32>,
    stack: Vec<i32>,
    required: Option<i32>,
    load_counter: i32,
    preload_running: bool,
    pump: PumpState,
    in_flight: Option<InFlight>,

    source: Arc<dyn FrameSource>,
    pool: Arc<dyn WorkerPool>,
    epoch: Arc<AtomicU64>,
    results_tx: Sender<FetchResult>,
    results_rx: Receiver<FetchResult>,
    stats: Arc<CacheStats>,
    emitter: EventEmitter,
}

impl FrameProvider {
    pub fn new(
        task: TaskId,
        start: i32,
        stop: i32,
        config: ProviderConfig,
        source: Arc<dyn FrameSource>,
        pool: Arc<dyn WorkerPool>,
        emitter: EventEmitter,
    ) -> Self {
        let (results_tx, results_rx) = crossbeam_channel::unbounded();
        debug!(
            "FrameProvider created: task={} frames=[{}..={}] budget={} pump={:?}",
            task, start, stop, config.budget, config.pump_interval
        );
        Self {
            task,
            start,
            stop,
            config,
            cache: HashMap::new(),
            failed: HashSet::new(),
            stack: Vec::new(),
            required: None,
            load_counter: config.budget,
            preload_running: false,
            pump: PumpState::Idle,
            in_flight: None,
            source,
            pool,
            epoch: Arc::new(AtomicU64::new(0)),
            results_tx,
            results_rx,
            stats: Arc::new(CacheStats::default()),
            emitter,
        }
    }

    // === Public contract ===

    /// Cached frame, or `None` after scheduling it as the urgent load.
    ///
    /// A hit also starts a prefetch run ahead of `frame` unless one is active.
    pub fn require(&mut self, frame: i32, now: Duration) -> Option<Frame> {
        if let Some(image) = self.cache.get(&frame).cloned() {
            self.stats.record_hit();
            self.preload(frame, now);
            return Some(image);
        }

        self.stats.record_miss();
        if frame < self.start || frame > self.stop {
            warn!("require({}) outside [{}..={}]", frame, self.start, self.stop);
            return None;
        }
        if self.failed.contains(&frame) {
            return None;
        }

        trace!("require({}): miss, urgent", frame);
        self.required = Some(frame);
        self.load_counter = self.config.budget;
        self.ensure_pump(now);
        None
    }

    /// Clear the failed mark of `frame` and require it again
    pub fn retry(&mut self, frame: i32, now: Duration) -> Option<Frame> {
        if self.failed.remove(&frame) {
            debug!("Retrying failed frame {}", frame);
        }
        self.require(frame, now)
    }

    /// Side-effect free lookup
    pub fn peek(&self, frame: i32) -> Option<Frame> {
        self.cache.get(&frame).cloned()
    }

    pub fn is_cached(&self, frame: i32) -> bool {
        self.cache.contains_key(&frame)
    }

    pub fn is_failed(&self, frame: i32) -> bool {
        self.failed.contains(&frame)
    }

    // === Prefetch ===

    fn preload(&mut self, frame: i32, now: Duration) {
        if self.preload_running {
            return;
        }

        let half = (self.config.budget + 1) / 2;
        let last = self.stop.min(frame.saturating_add(half));
        if self.is_cached(last) {
            return;
        }

        for idx in (frame..=last).skip(1) {
            if !self.is_cached(idx) && !self.is_failed(idx) {
                self.load_counter = self.config.budget - (idx - frame);
                self.stack.push(idx);
                self.preload_running = true;
                trace!("Prefetch run from {} (hit {}), budget {}", idx, frame, self.load_counter);
                self.ensure_pump(now);
                return;
            }
        }
    }

    // === Pump ===

    fn ensure_pump(&mut self, now: Duration) {
        if self.pump == PumpState::Idle {
            self.pump = PumpState::Running {
                next_tick: now + self.config.pump_interval,
            };
            trace!("Load pump started");
        }
    }

    /// When the pump wants to run next
    pub fn next_deadline(&self) -> Option<Duration> {
        match self.pump {
            PumpState::Idle => None,
            PumpState::Running { next_tick } => Some(next_tick),
        }
    }

    /// One pump step; the session calls this when `next_deadline()` is due.
    pub fn pump_tick(&mut self, now: Duration) {
        if self.pump == PumpState::Idle {
            return;
        }
        self.pump = PumpState::Running {
            next_tick: now + self.config.pump_interval,
        };

        // One fetch at a time
        match self.in_flight {
            Some(InFlight::Fetching { .. }) => return,
            Some(InFlight::Backoff { frame, attempt, until }) => {
                if now >= until {
                    self.dispatch(frame, attempt);
                }
                return;
            }
            None => {}
        }

        if self.load_counter <= 0 && !self.stack.is_empty() {
            trace!("Load budget exhausted, dropping {} queued frames", self.stack.len());
            self.stack.clear();
        }

        if self.stack.is_empty() && self.required.is_none() {
            self.pump = PumpState::Idle;
            self.preload_running = false;
            trace!("Load pump idle");
            return;
        }

        if let Some(required) = self.required.take() {
            self.stack.push(required);
        }

        let Some(frame) = self.stack.pop() else {
            return;
        };

        // Loaded (or given up on) since it was queued: keep walking
        if self.is_cached(frame) || self.is_failed(frame) {
            self.load_counter -= 1;
            self.queue_next(frame);
            return;
        }

        // Reached the tail: earlier backlog is stale
        if frame == self.stop {
            self.stack.clear();
        }

        self.dispatch(frame, 0);
    }

    fn dispatch(&mut self, frame: i32, attempt: u32) {
        self.in_flight = Some(InFlight::Fetching { frame, attempt });

        let epoch = self.epoch.load(Ordering::Relaxed);
        let source = Arc::clone(&self.source);
        let tx = self.results_tx.clone();
        let task = self.task;
        trace!("Fetching frame {} (attempt {})", frame, attempt + 1);

        self.pool.execute(with_epoch(Arc::clone(&self.epoch), epoch, move || {
            let result = source.fetch(task, frame);
            let _ = tx.send(FetchResult {
                epoch,
                frame,
                attempt,
                result,
            });
        }));
    }

    // === Completions ===

    /// Receiver the session blocks on while waiting for the next deadline
    pub fn results(&self) -> &Receiver<FetchResult> {
        &self.results_rx
    }

    /// Non-blocking poll for one completion
    pub fn try_recv(&self) -> Option<FetchResult> {
        self.results_rx.try_recv().ok()
    }

    /// Apply a finished fetch. Returns what happened to the sequence, if
    /// anything the player must react to.
    pub fn complete(&mut self, done: FetchResult, now: Duration) -> Option<LoadNotice> {
        if done.epoch != self.epoch.load(Ordering::Relaxed) {
            trace!("Dropping stale completion for frame {}", done.frame);
            return None;
        }
        match self.in_flight {
            Some(InFlight::Fetching { frame, attempt }) if frame == done.frame && attempt == done.attempt => {}
            _ => {
                trace!("Unexpected completion for frame {}", done.frame);
                return None;
            }
        }
        self.in_flight = None;
        let frame = done.frame;

        match done.result {
            Ok(image) => {
                self.queue_next(frame);
                self.load_counter -= 1;
                debug!("Cached frame {} ({}x{}, {} bytes)", frame, image.width(), image.height(), image.mem());
                self.cache.insert(frame, image);
                self.emitter.emit(FrameLoadedEvent(frame));
                Some(LoadNotice::Loaded(frame))
            }
            Err(e) => {
                let next_attempt = done.attempt + 1;
                if next_attempt < self.config.max_fetch_attempts {
                    let delay = self.config.retry_backoff * 2u32.saturating_pow(done.attempt);
                    warn!(
                        "Frame {} fetch failed (attempt {}/{}): {}; retrying in {:?}",
                        frame, next_attempt, self.config.max_fetch_attempts, e, delay
                    );
                    self.in_flight = Some(InFlight::Backoff {
                        frame,
                        attempt: next_attempt,
                        until: now + delay,
                    });
                    return None;
                }

                warn!("Frame {} failed after {} attempts: {}", frame, next_attempt, e);
                self.failed.insert(frame);
                self.queue_next(frame);
                self.load_counter -= 1;
                self.emitter.emit(FrameFailedEvent {
                    frame,
                    error: e.to_string(),
                });
                Some(LoadNotice::Failed(frame))
            }
        }
    }

    fn queue_next(&mut self, frame: i32) {
        if let Some(next) = frame.checked_add(1)
            && next <= self.stop
            && self.load_counter > 0
        {
            self.stack.push(next);
        }
    }

    /// Stop loading and drop anything still in flight
    pub fn shutdown(&mut self) {
        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed) + 1;
        self.pump = PumpState::Idle;
        self.stack.clear();
        self.required = None;
        self.in_flight = None;
        self.preload_running = false;
        debug!("FrameProvider shut down (epoch {}, {} frames cached)", epoch, self.cache.len());
    }

    // === Introspection ===

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    pub fn pending(&self) -> &[i32] {
        &self.stack
    }

    pub fn load_counter(&self) -> i32 {
        self.load_counter
    }

    pub fn is_pumping(&self) -> bool {
        self.pump != PumpState::Idle
    }

    pub fn is_prefetching(&self) -> bool {
        self.preload_running
    }

    /// Frame currently holding the fetch slot
    pub fn in_flight(&self) -> Option<i32> {
        self.in_flight.map(|f| match f {
            InFlight::Fetching { frame, .. } | InFlight::Backoff { frame, .. } => frame,
        })
    }
}
