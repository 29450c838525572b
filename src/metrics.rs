//! Lifecycle Metrics
//!
//! Cache-line aligned crank counters shared by every clone of an engine.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache line size for alignment (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

/// Crank and transition counters, aligned to prevent false sharing
#[repr(C, align(64))]
#[derive(Debug)]
pub struct LifecycleMetrics {
    /// Cranks started
    pub cranks: AtomicU64,
    /// Condition functions executed
    pub conditions_run: AtomicU64,
    /// Cranks suspended on asynchronous work
    pub pending: AtomicU64,
    /// Committed state transitions
    pub transitions: AtomicU64,
    /// Transitions dropped because the state moved underneath
    pub skipped_transitions: AtomicU64,
    /// Objects that reached the end of their life
    pub destroyed: AtomicU64,
    /// Cranks that failed their carrier
    pub failures: AtomicU64,
    /// Clock value of the last crank completion (ms)
    pub last_crank_ms: AtomicU64,
}

// Verify size at compile time
const _: () = assert!(std::mem::size_of::<LifecycleMetrics>() <= CACHE_LINE_SIZE);

impl Default for LifecycleMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleMetrics {
    /// Create new zeroed metrics
    pub fn new() -> Self {
        Self {
            cranks: AtomicU64::new(0),
            conditions_run: AtomicU64::new(0),
            pending: AtomicU64::new(0),
            transitions: AtomicU64::new(0),
            skipped_transitions: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            last_crank_ms: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_crank(&self) {
        self.cranks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_crank_end(&self, now_ms: u64) {
        self.last_crank_ms.store(now_ms, Ordering::Release);
    }

    #[inline]
    pub fn record_condition_run(&self) {
        self.conditions_run.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_pending(&self) {
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transition(&self) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_skipped_transition(&self) {
        self.skipped_transitions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_destroyed(&self) {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all counters
    pub fn snapshot(&self) -> LifecycleStatsSnapshot {
        LifecycleStatsSnapshot {
            cranks: self.cranks.load(Ordering::Relaxed),
            conditions_run: self.conditions_run.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            skipped_transitions: self.skipped_transitions.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            last_crank_ms: self.last_crank_ms.load(Ordering::Acquire),
        }
    }
}

/// Serializable snapshot of [`LifecycleMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleStatsSnapshot {
    pub cranks: u64,
    pub conditions_run: u64,
    pub pending: u64,
    pub transitions: u64,
    pub skipped_transitions: u64,
    pub destroyed: u64,
    pub failures: u64,
    pub last_crank_ms: u64,
}

impl LifecycleStatsSnapshot {
    /// Fraction of cranks that actually ran a condition
    pub fn work_ratio(&self) -> f64 {
        if self.cranks == 0 {
            0.0
        } else {
            self.conditions_run as f64 / self.cranks as f64
        }
    }
}
