use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::scanner::results::{PortStatus, Target};

/// Completed-probe counter shared between the scheduler and whoever draws
/// progress. Only the scheduler advances it.
#[derive(Debug)]
pub struct ProgressTracker {
    completed: AtomicU64,
    total: u64,
    started: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub completed: u64,
    pub total: u64,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }

    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self {
            completed: AtomicU64::new(0),
            total,
            started: Instant::now(),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub(crate) fn advance(&self) -> u64 {
        self.completed.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            completed: self.completed.load(Ordering::Acquire),
            total: self.total,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Emitted by the scheduler as the sweep moves along.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Started {
        total: u64,
    },
    ProbeCompleted {
        target: Target,
        status: PortStatus,
        completed: u64,
        total: u64,
    },
    Finished {
        completed: u64,
        total: u64,
        cancelled: bool,
    },
}
