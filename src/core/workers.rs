//! Background pool for blocking frame fetches
//!
//! The session thread never blocks on the network: fetch jobs run here and
//! report back over a channel. The provider keeps at most one job in flight,
//! so a single worker thread is the normal configuration.
//!
//! Epoch mechanism: jobs carry the epoch they were issued in and are skipped
//! if the epoch moved on before a worker picked them up (session teardown).

use crossbeam::deque::Injector;
use log::trace;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Anything that can run fetch jobs
pub trait WorkerPool: Send + Sync {
    fn execute(&self, job: Job);
}

/// Wrap a job so it only runs while `epoch` still equals `expected`.
///
/// The check happens at execution time, not enqueue time.
pub fn with_epoch<F>(epoch: Arc<AtomicU64>, expected: u64, f: F) -> Job
where
    F: FnOnce() + Send + 'static,
{
    Box::new(move || {
        if epoch.load(Ordering::Relaxed) == expected {
            f();
        } else {
            trace!("Skipping stale job (epoch {} != {})", expected, epoch.load(Ordering::Relaxed));
        }
    })
}

/// Thread pool fed from a global injector queue.
pub struct Workers {
    injector: Arc<Injector<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl Workers {
    /// Spawn `num_threads` fetch workers (at least one).
    pub fn new(num_threads: usize) -> std::io::Result<Self> {
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::new();

        for worker_id in 0..num_threads.max(1) {
            let injector = Arc::clone(&injector);
            let shutdown = Arc::clone(&shutdown);

            let handle = thread::Builder::new()
                .name(format!("frameplay-fetch-{}", worker_id))
                .spawn(move || {
                    trace!("Fetch worker {} started", worker_id);
                    loop {
                        if let Some(job) = injector.steal().success() {
                            job();
                            continue;
                        }
                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        // Idle: short sleep instead of spinning
                        thread::sleep(Duration::from_millis(1));
                    }
                    trace!("Fetch worker {} stopped", worker_id);
                })?;
            handles.push(handle);
        }

        trace!("Workers initialized: {} threads", handles.len());
        Ok(Self {
            injector,
            handles,
            shutdown,
        })
    }

    pub fn num_threads(&self) -> usize {
        self.handles.len()
    }
}

impl WorkerPool for Workers {
    fn execute(&self, job: Job) {
        self.injector.push(job);
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // In-flight fetches may be blocked on the network; don't wait on them.
        let deadline = std::time::Instant::now() + Duration::from_millis(500);
        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if std::time::Instant::now() >= deadline {
                    trace!("Fetch worker shutdown timeout, detaching");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }
    }
}

/// Runs jobs synchronously on the calling thread.
///
/// Used by tests and by callers that want deterministic, zero-latency fetches.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlinePool;

impl WorkerPool for InlinePool {
    fn execute(&self, job: Job) {
        job();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn test_inline_runs_immediately() {
        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);
        InlinePool.execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stale_epoch_skipped() {
        let epoch = Arc::new(AtomicU64::new(3));
        let counter = Arc::new(AtomicI32::new(0));

        let c = Arc::clone(&counter);
        InlinePool.execute(with_epoch(Arc::clone(&epoch), 2, move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        let c = Arc::clone(&counter);
        InlinePool.execute(with_epoch(epoch, 3, move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_workers_execute_on_thread() {
        let workers = Workers::new(1).unwrap();
        assert_eq!(workers.num_threads(), 1);

        let (tx, rx) = crossbeam_channel::bounded(1);
        workers.execute(Box::new(move || {
            let name = thread::current().name().map(str::to_string);
            let _ = tx.send(name);
        }));

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("frameplay-fetch-0"));
    }
}
