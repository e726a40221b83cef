use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Live counters for one task. Exactly one writer (the task's worker) and
/// one reader (the aggregator); cross-thread traffic is plain atomics, no
/// locking.
pub struct TaskProgress {
    filename: String,
    total: AtomicU64,
    downloaded: AtomicU64,
    since_tick: AtomicU64,
}

impl TaskProgress {
    pub fn new(filename: String) -> Self {
        Self {
            filename,
            total: AtomicU64::new(0),
            downloaded: AtomicU64::new(0),
            since_tick: AtomicU64::new(0),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Total size learned from range negotiation; 0 while still unknown.
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    /// Seed the cumulative counter with bytes carried over from a previous
    /// attempt. Resumed bytes count toward percent but not toward rate.
    pub fn resume_from(&self, offset: u64) {
        self.downloaded.store(offset, Ordering::Relaxed);
    }

    /// Record a flushed chunk: cumulative and since-tick both advance.
    pub fn record(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::Relaxed);
        self.since_tick.fetch_add(bytes, Ordering::Relaxed);
    }

    fn take_delta(&self) -> u64 {
        self.since_tick.swap(0, Ordering::Relaxed)
    }
}

/// One rendered row, keyed by submission index.
#[derive(Clone, Debug)]
pub struct TaskRow {
    pub filename: String,
    pub downloaded: u64,
    pub total: u64,
    pub percent: u64,
    /// Instantaneous throughput over the last tick, bytes per second.
    pub rate: u64,
}

/// Combined view of every task at one tick. Rows keep submission order so
/// the rendered view never reorders between frames.
#[derive(Clone, Debug)]
pub struct ProgressSnapshot {
    pub rows: Vec<TaskRow>,
    pub total_rate: u64,
}

/// Receives one snapshot per tick; all visual layout lives behind this seam.
pub trait ProgressSink {
    fn render(&mut self, snapshot: &ProgressSnapshot);
}

/// Builds the per-tick snapshot from each task's counters. Reading the
/// since-tick delta also clears it, so each byte contributes to exactly one
/// rate sample.
pub struct ProgressAggregator {
    tasks: Vec<Arc<TaskProgress>>,
    tick: Duration,
}

impl ProgressAggregator {
    pub fn new(tasks: Vec<Arc<TaskProgress>>, tick: Duration) -> Self {
        Self { tasks, tick }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let tick_secs = self.tick.as_secs_f64();
        let mut rows = Vec::with_capacity(self.tasks.len());
        let mut total_rate = 0u64;

        for task in &self.tasks {
            let downloaded = task.downloaded.load(Ordering::Relaxed);
            let total = task.total.load(Ordering::Relaxed);
            // Total unknown while a task is still negotiating; report 0%.
            let percent = if total == 0 {
                0
            } else {
                downloaded.saturating_mul(100) / total
            };
            let rate = if tick_secs > 0.0 {
                (task.take_delta() as f64 / tick_secs) as u64
            } else {
                0
            };
            total_rate += rate;

            rows.push(TaskRow {
                filename: task.filename().to_string(),
                downloaded,
                total,
                percent,
                rate,
            });
        }

        ProgressSnapshot { rows, total_rate }
    }
}
