//! FFT job scheduling across a fixed pool of worker threads.
//!
//! The queue holds at most one entry per result key: a repeat request for a
//! pending or in-flight key is a no-op (its priority is implicit, see below).
//! Workers pick the job closest to the current screen centre, preferring
//! cheaper spectra and earlier times on ties, so the visible region fills
//! front-to-back even while expensive off-screen work is queued.
//!
//! Priorities are evaluated at pop time from the queue's current centre
//! column, so `reprioritize` is just a store; nothing is re-sorted and
//! in-flight work is never cancelled. `drop_all_work` bumps an epoch
//! instead: pending jobs vanish, and results computed under an old epoch are
//! discarded at post time.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};

use crate::cache::{ResultCache, ResultKey};
use crate::fft_analysis::{self, WindowCache};
use crate::sample_source::SampleSource;

/// A completed column on its way back to the UI thread.
pub struct FftResult {
    pub key: ResultKey,
    pub column: crate::cache::ColumnData,
    pub epoch: u64,
}

/// Pending/in-flight bookkeeping. Kept separate from the thread plumbing so
/// the queue discipline is testable on its own.
struct WorkQueue {
    pending: HashSet<ResultKey>,
    in_flight: HashSet<ResultKey>,
    center_col: i64,
    secpp: f64,
}

impl WorkQueue {
    fn new(secpp: f64) -> WorkQueue {
        WorkQueue {
            pending: HashSet::new(),
            in_flight: HashSet::new(),
            center_col: 0,
            secpp,
        }
    }

    /// Sort key: distance from centre, then spectrum cost, then time.
    fn priority(&self, key: &ResultKey) -> (i64, usize, i64) {
        let col = (key.time_secs() / self.secpp).round() as i64;
        ((col - self.center_col).abs(), key.speclen, key.time_us)
    }

    /// Adds a key unless it is already pending or in flight.
    fn offer(&mut self, key: ResultKey) -> bool {
        if self.in_flight.contains(&key) || self.pending.contains(&key) {
            return false;
        }
        self.pending.insert(key);
        true
    }

    /// Removes and returns the highest-priority pending key.
    fn pop_best(&mut self) -> Option<ResultKey> {
        let best = self
            .pending
            .iter()
            .min_by_key(|k| self.priority(*k))
            .copied()?;
        self.pending.remove(&best);
        self.in_flight.insert(best);
        Some(best)
    }

    fn complete(&mut self, key: &ResultKey) {
        self.in_flight.remove(key);
    }
}

struct Shared {
    queue: Mutex<WorkQueue>,
    available: Condvar,
    epoch: AtomicU64,
    shutdown: AtomicBool,
    source: Arc<SampleSource>,
    windows: Arc<WindowCache>,
    cache: Arc<ResultCache>,
    results_tx: Sender<FftResult>,
}

/// Owns the worker pool. With `max_threads == 0` every request is computed
/// synchronously in the caller and inserted straight into the cache.
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Vec<thread::JoinHandle<()>>,
    results_rx: Receiver<FftResult>,
    max_threads: usize,
}

impl Scheduler {
    pub fn new(
        source: Arc<SampleSource>,
        windows: Arc<WindowCache>,
        cache: Arc<ResultCache>,
        max_threads: usize,
        secpp: f64,
    ) -> Scheduler {
        let (results_tx, results_rx) = unbounded();
        let shared = Arc::new(Shared {
            queue: Mutex::new(WorkQueue::new(secpp)),
            available: Condvar::new(),
            epoch: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            source,
            windows,
            cache,
            results_tx,
        });

        let workers = (0..max_threads)
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("fft-worker-{}", i))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn FFT worker")
            })
            .collect();

        if max_threads == 0 {
            info!("scheduler running synchronously (no worker threads)");
        } else {
            info!("scheduler started with {} worker thread(s)", max_threads);
        }

        Scheduler {
            shared,
            workers,
            results_rx,
            max_threads,
        }
    }

    /// Default worker count: up to 8, bounded by hardware concurrency.
    pub fn default_threads() -> usize {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(8)
    }

    /// Asks for a column to be computed. No-op if the cache already has it
    /// or a matching job is pending or in flight.
    pub fn request(&self, key: ResultKey) {
        if self.shared.cache.contains(&key) {
            return;
        }

        if self.max_threads == 0 {
            match fft_analysis::compute_column(
                &self.shared.source,
                &self.shared.windows,
                key.time_secs(),
                key.speclen,
                key.window,
            ) {
                Ok(column) => self.shared.cache.insert(key, column),
                Err(e) => warn!("synchronous FFT at {:.3}s failed: {}", key.time_secs(), e),
            }
            return;
        }

        let mut queue = self.shared.queue.lock().unwrap();
        if queue.offer(key) {
            drop(queue);
            self.shared.available.notify_one();
        }
    }

    /// Updates the priority origin after a scroll, seek or zoom.
    pub fn reprioritize(&self, center_col: i64, secpp: f64) {
        let mut queue = self.shared.queue.lock().unwrap();
        queue.center_col = center_col;
        queue.secpp = secpp;
    }

    /// Clears the pending queue and invalidates in-flight work; stale
    /// results are dropped when the workers try to post them.
    pub fn drop_all_work(&self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.shared.queue.lock().unwrap();
        let n = queue.pending.len();
        queue.pending.clear();
        if n > 0 {
            debug!("dropped {} pending jobs", n);
        }
    }

    pub fn jobs_in_flight(&self) -> usize {
        self.shared.queue.lock().unwrap().in_flight.len()
    }

    pub fn pending_jobs(&self) -> usize {
        self.shared.queue.lock().unwrap().pending.len()
    }

    pub fn current_epoch(&self) -> u64 {
        self.shared.epoch.load(Ordering::SeqCst)
    }

    /// Non-blocking fetch of the next completed column, if any.
    pub fn poll_result(&self) -> Option<FftResult> {
        self.results_rx.try_recv().ok()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.available.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("FFT worker panicked during shutdown");
            }
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let (key, epoch) = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(key) = queue.pop_best() {
                    break (key, shared.epoch.load(Ordering::SeqCst));
                }
                queue = shared.available.wait(queue).unwrap();
            }
        };

        let result = fft_analysis::compute_column(
            &shared.source,
            &shared.windows,
            key.time_secs(),
            key.speclen,
            key.window,
        );

        shared.queue.lock().unwrap().complete(&key);

        match result {
            Ok(column) => {
                if shared.epoch.load(Ordering::SeqCst) == epoch {
                    let _ = shared.results_tx.send(FftResult { key, column, epoch });
                } else {
                    debug!("discarding stale column at {:.3}s", key.time_secs());
                }
            }
            // Transient decode failure: skip the column, the cache miss
            // persists and a recompute can retry it.
            Err(e) => warn!("FFT at {:.3}s failed: {}", key.time_secs(), e),
        }
    }
}
