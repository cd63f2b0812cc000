//! Test doubles shared by core tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ProviderConfig;

use super::event_bus::EventEmitter;
use super::frame::{FetchError, Frame};
use super::provider::{FrameProvider, LoadNotice};
use super::source::{FrameSource, TaskId};
use super::workers::InlinePool;

/// Synthetic frame source with failure injection and a fetch log
pub(crate) struct MockSource {
    width: u32,
    height: u32,
    log: Mutex<Vec<i32>>,
    failures: Mutex<HashMap<i32, u32>>,
}

impl MockSource {
    pub fn new() -> Arc<Self> {
        Self::with_size(16, 9)
    }

    pub fn with_size(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            width,
            height,
            log: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        })
    }

    /// Make the next `times` fetches of `frame` fail
    pub fn fail(&self, frame: i32, times: u32) {
        self.failures.lock().unwrap().insert(frame, times);
    }

    /// Every fetch call, in order
    pub fn fetched(&self) -> Vec<i32> {
        self.log.lock().unwrap().clone()
    }

    pub fn fetch_count(&self, frame: i32) -> usize {
        self.log.lock().unwrap().iter().filter(|&&f| f == frame).count()
    }
}

impl FrameSource for MockSource {
    fn fetch(&self, _task: TaskId, frame: i32) -> Result<Frame, FetchError> {
        self.log.lock().unwrap().push(frame);
        let mut failures = self.failures.lock().unwrap();
        if let Some(left) = failures.get_mut(&frame)
            && *left > 0
        {
            *left -= 1;
            return Err(FetchError::Transport("injected failure".into()));
        }
        Ok(Frame::solid(frame, self.width, self.height))
    }
}

pub(crate) const TEST_TICK: Duration = Duration::from_millis(25);

pub(crate) fn test_config(budget: i32) -> ProviderConfig {
    ProviderConfig {
        budget,
        pump_interval: TEST_TICK,
        max_fetch_attempts: 3,
        retry_backoff: Duration::from_millis(100),
    }
}

/// Provider over `[0, stop]` with inline fetches
pub(crate) fn inline_provider(stop: i32, source: Arc<MockSource>) -> FrameProvider {
    FrameProvider::new(1, 0, stop, test_config(500), source, Arc::new(InlinePool), EventEmitter::dummy())
}

/// Pump until idle, returning every notice; advances `now`
pub(crate) fn pump_until_idle(p: &mut FrameProvider, now: &mut Duration) -> Vec<LoadNotice> {
    let mut notices = Vec::new();
    while let Some(due) = p.next_deadline() {
        *now = due;
        p.pump_tick(*now);
        while let Some(done) = p.try_recv() {
            notices.extend(p.complete(done, *now));
        }
    }
    notices
}
