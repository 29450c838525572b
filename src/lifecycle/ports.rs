//! Lifecycle Ports - collaborator boundaries of the engine
//!
//! The engine performs no I/O and owns no threads. Everything it needs from
//! the outside world comes through these traits: the carrier that runs a
//! crank and receives its completion, the scheduler that decides when a crank
//! runs, the sinks that receive state changes and log lines, and a clock.
//! Adapters in `transport`, `scheduler` and `notify` implement them.

use crate::lifecycle::class::ClassId;
use crate::lifecycle::instance::ObjectLifecycle;
use crate::lifecycle::state::LifecycleState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Object Identity
// =============================================================================

/// Identity of a managed object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u32);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl From<u32> for ObjectId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Owning-object accessor
///
/// Every managed object embeds an [`ObjectLifecycle`] by value and exposes it
/// through this trait together with its identity.
pub trait LifecycleObject: Send + Sync + 'static {
    /// The lifecycle record embedded in this object
    fn lifecycle(&self) -> &ObjectLifecycle;

    /// Identity used for tracing and notifications
    fn object_id(&self) -> ObjectId;
}

// =============================================================================
// Carrier
// =============================================================================

/// Final status reported on a carrier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarrierStatus {
    /// Not yet completed
    InFlight,
    /// Completed without error
    Ok,
    /// Completed with a generic failure
    Failed,
}

/// Continuation run when a carrier completes
pub type Completion = Box<dyn FnOnce(&dyn Carrier) + Send>;

/// Completion-bearing request used to run a crank
///
/// Continuations run in LIFO order when [`Carrier::complete`] is called, so
/// the most recently attached continuation sees the completion first.
pub trait Carrier: Send + Sync {
    /// Attach a continuation
    fn push_completion(&self, completion: Completion);

    /// Signal completion, running every attached continuation
    fn complete(&self);

    /// Report a final status
    fn set_status(&self, status: CarrierStatus);

    /// Current status
    fn status(&self) -> CarrierStatus;
}

/// Shared handle to a carrier
pub type CarrierRef = Arc<dyn Carrier>;

// =============================================================================
// External Scheduler
// =============================================================================

/// Decides when and where a crank runs
///
/// The engine never cranks itself; it only asks the scheduler to run an
/// object now or after a delay.
pub trait MonitorScheduler: Send + Sync {
    /// Request a crank as soon as possible
    fn run_now(&self, object_id: ObjectId);

    /// Request a crank after `delay`
    fn run_after(&self, object_id: ObjectId, delay: Duration);
}

// =============================================================================
// Notification Sink
// =============================================================================

/// Event emitted on every committed state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangeEvent {
    pub object_id: ObjectId,
    pub class_id: ClassId,
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub forced: bool,
    pub timestamp: DateTime<Utc>,
}

/// Receives state change events
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: StateChangeEvent);
}

// =============================================================================
// Log Sink
// =============================================================================

/// Severity of a line sent to the log sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warning => write!(f, "warning"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Receives faults, unbuffered trace lines and trace dumps
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, object_id: ObjectId, line: &str);
}

// =============================================================================
// Clock
// =============================================================================

/// Millisecond clock used for timer conditions and crank timestamps
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall clock backed by chrono
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        Utc::now().timestamp_millis() as u64
    }
}

/// Manually advanced clock for deterministic timer behavior
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_display() {
        assert_eq!(format!("{}", ObjectId(0x2a)), "0x2a");
        assert_eq!(ObjectId::from(5), ObjectId(5));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1000);
        assert_eq!(clock.now_ms(), 1000);
        clock.advance(250);
        assert_eq!(clock.now_ms(), 1250);
    }

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Error > LogLevel::Warning);
        assert_eq!(format!("{}", LogLevel::Warning), "warning");
    }
}
