//! Batch statistics

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::batch::{BatchResult, JobStatus};

/// Aggregate outcome of a batch run.
///
/// Built only from counts and sums, so the order in which results arrive
/// does not matter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_files: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Frames written by files that finished (successfully or not)
    pub total_frames: u64,
    /// Frames skipped for decode, shape or write failures
    pub frames_failed: u64,
    pub elapsed_ms: u64,
}

impl BatchSummary {
    pub fn new(total_files: usize) -> Self {
        Self {
            total_files: total_files as u64,
            ..Self::default()
        }
    }

    pub fn record(&mut self, result: &BatchResult) {
        match result.status {
            JobStatus::Succeeded => self.succeeded += 1,
            JobStatus::TimedOut => self.timed_out += 1,
            JobStatus::Failed | JobStatus::Queued | JobStatus::Running => self.failed += 1,
        }
        self.total_frames += result.frames_extracted;
        self.frames_failed += result.frames_failed;
    }

    /// Results recorded so far
    pub fn processed(&self) -> u64 {
        self.succeeded + self.failed + self.timed_out
    }

    /// Failed plus timed-out files
    pub fn unsuccessful(&self) -> u64 {
        self.failed + self.timed_out
    }

    pub fn is_success(&self) -> bool {
        self.unsuccessful() == 0
    }

    /// Process exit status for the run
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    pub fn average_per_file(&self) -> Duration {
        match self.processed() {
            0 => Duration::ZERO,
            n => self.elapsed() / n as u32,
        }
    }

    /// Estimated time left, assuming `workers` files run concurrently.
    pub fn eta(&self, elapsed: Duration, workers: usize) -> Duration {
        let processed = self.processed();
        if processed == 0 || workers == 0 {
            return Duration::ZERO;
        }
        let remaining = self.total_files.saturating_sub(processed);
        let average = elapsed.as_secs_f64() / processed as f64;
        Duration::from_secs_f64(remaining as f64 * average / workers as f64)
    }
}

/// Timer for tracking job latency
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
