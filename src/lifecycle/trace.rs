//! Lifecycle Trace Ring
//!
//! Optional per-object diagnostic buffer. Entries are filtered by a category
//! mask before they are recorded; when no buffer is attached, entries that
//! pass the mask go straight to the engine's log sink.

use crate::error::{Error, Result};
use crate::lifecycle::class::{CondId, LifecycleStatus};
use crate::lifecycle::engine::LifecycleEngine;
use crate::lifecycle::ports::{LifecycleObject, LogLevel, ObjectId};
use crate::lifecycle::state::LifecycleState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Smallest ring a caller may attach
pub const MIN_TRACE_CAPACITY: usize = 8;

// =============================================================================
// Trace Flags
// =============================================================================

/// Category mask selecting which events are traced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceFlags(pub u32);

impl TraceFlags {
    pub const NONE: TraceFlags = TraceFlags(0);
    pub const CRANKING: TraceFlags = TraceFlags(1 << 0);
    pub const STATE_CHANGE: TraceFlags = TraceFlags(1 << 1);
    pub const CONDITIONS: TraceFlags = TraceFlags(1 << 2);
    pub const ALL: TraceFlags = TraceFlags(0b111);

    #[inline]
    pub fn contains(&self, other: TraceFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

impl Default for TraceFlags {
    fn default() -> Self {
        TraceFlags::ALL
    }
}

impl std::ops::BitOr for TraceFlags {
    type Output = TraceFlags;

    fn bitor(self, rhs: TraceFlags) -> TraceFlags {
        TraceFlags(self.0 | rhs.0)
    }
}

// =============================================================================
// Trace Entries
// =============================================================================

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceKind {
    CrankBegin { state: LifecycleState },
    CrankEnd { reschedule_ms: u64 },
    CondSet { cond: CondId },
    CondClear { cond: CondId },
    CondPreset { cond: CondId },
    CondRunBefore { cond: CondId },
    CondRunAfter { cond: CondId, status: LifecycleStatus },
    StateChange { from: LifecycleState, to: LifecycleState },
    ForcedStateChange { from: LifecycleState, to: LifecycleState },
    Reschedule { delay_ms: u64 },
}

impl TraceKind {
    /// Category the entry belongs to
    pub fn category(&self) -> TraceFlags {
        match self {
            TraceKind::CrankBegin { .. } | TraceKind::CrankEnd { .. } | TraceKind::Reschedule { .. } => {
                TraceFlags::CRANKING
            }
            TraceKind::StateChange { .. } | TraceKind::ForcedStateChange { .. } => {
                TraceFlags::STATE_CHANGE
            }
            TraceKind::CondSet { .. }
            | TraceKind::CondClear { .. }
            | TraceKind::CondPreset { .. }
            | TraceKind::CondRunBefore { .. }
            | TraceKind::CondRunAfter { .. } => TraceFlags::CONDITIONS,
        }
    }
}

impl std::fmt::Display for TraceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceKind::CrankBegin { state } => write!(f, "crank begin in {}", state),
            TraceKind::CrankEnd { reschedule_ms } => {
                write!(f, "crank end, reschedule in {}ms", reschedule_ms)
            }
            TraceKind::CondSet { cond } => write!(f, "cond {} set", cond),
            TraceKind::CondClear { cond } => write!(f, "cond {} clear", cond),
            TraceKind::CondPreset { cond } => write!(f, "cond {} preset", cond),
            TraceKind::CondRunBefore { cond } => write!(f, "cond {} run", cond),
            TraceKind::CondRunAfter { cond, status } => {
                write!(f, "cond {} returned {}", cond, status)
            }
            TraceKind::StateChange { from, to } => write!(f, "state {} -> {}", from, to),
            TraceKind::ForcedStateChange { from, to } => {
                write!(f, "state {} -> {} (forced)", from, to)
            }
            TraceKind::Reschedule { delay_ms } => write!(f, "reschedule in {}ms", delay_ms),
        }
    }
}

/// One recorded lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub timestamp: DateTime<Utc>,
    pub object_id: ObjectId,
    #[serde(flatten)]
    pub kind: TraceKind,
}

impl TraceEntry {
    pub fn new(object_id: ObjectId, kind: TraceKind) -> Self {
        Self {
            timestamp: Utc::now(),
            object_id,
            kind,
        }
    }
}

impl std::fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.object_id,
            self.kind
        )
    }
}

// =============================================================================
// Trace Ring
// =============================================================================

/// Fixed-capacity circular buffer of trace entries
#[derive(Debug, Clone)]
pub struct TraceRing {
    entries: Vec<TraceEntry>,
    capacity: usize,
    /// Index of the oldest entry once the ring has wrapped
    first: usize,
}

impl TraceRing {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < MIN_TRACE_CAPACITY {
            return Err(Error::InsufficientTraceCapacity {
                requested: capacity,
                minimum: MIN_TRACE_CAPACITY,
            });
        }
        Ok(Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            first: 0,
        })
    }

    /// Record an entry, overwriting the oldest one when full
    pub fn push(&mut self, entry: TraceEntry) {
        if self.entries.len() < self.capacity {
            self.entries.push(entry);
        } else {
            self.entries[self.first] = entry;
            self.first = (self.first + 1) % self.capacity;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries oldest first
    pub fn iter(&self) -> impl Iterator<Item = &TraceEntry> {
        self.entries[self.first..]
            .iter()
            .chain(self.entries[..self.first].iter())
    }
}

/// Trace state guarded by the object's trace lock
#[derive(Debug, Default)]
pub(crate) struct TraceState {
    pub ring: Option<TraceRing>,
    pub flags: TraceFlags,
}

// =============================================================================
// Engine Operations
// =============================================================================

impl<O: LifecycleObject> LifecycleEngine<O> {
    /// Record a lifecycle event for `obj`
    pub(crate) fn trace(&self, obj: &O, kind: TraceKind) {
        let lifecycle = obj.lifecycle();
        let object_id = obj.object_id();

        if self.config().debug_trace_classes.contains(&lifecycle.class_id()) {
            debug!(object_id = %object_id, class_id = %lifecycle.class_id(), event = %kind, "Lifecycle event");
        }

        let routed = {
            let mut trace = lifecycle.trace.lock();
            if !trace.flags.contains(kind.category()) {
                return;
            }
            let entry = TraceEntry::new(object_id, kind);
            match trace.ring.as_mut() {
                Some(ring) => {
                    ring.push(entry);
                    None
                }
                None => Some(entry),
            }
        };

        if let Some(entry) = routed {
            self.log_sink().log(LogLevel::Debug, object_id, &entry.to_string());
        }
    }

    /// Attach a trace ring of `capacity` entries recording the `flags` categories
    pub fn attach_trace(&self, obj: &O, capacity: usize, flags: TraceFlags) -> Result<()> {
        self.check_object(obj)?;
        let ring = TraceRing::new(capacity)?;
        let mut trace = obj.lifecycle().trace.lock();
        trace.ring = Some(ring);
        trace.flags = flags;
        Ok(())
    }

    /// Detach the trace ring; later events go to the log sink
    pub fn detach_trace(&self, obj: &O) -> Result<()> {
        self.check_object(obj)?;
        obj.lifecycle().trace.lock().ring = None;
        Ok(())
    }

    /// Change the recorded categories
    pub fn set_trace_flags(&self, obj: &O, flags: TraceFlags) -> Result<()> {
        self.check_object(obj)?;
        obj.lifecycle().trace.lock().flags = flags;
        Ok(())
    }

    /// Copy of the recorded entries, oldest first
    pub fn trace_entries(&self, obj: &O) -> Result<Vec<TraceEntry>> {
        self.check_object(obj)?;
        let trace = obj.lifecycle().trace.lock();
        Ok(trace
            .ring
            .as_ref()
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Write every recorded entry to the log sink; returns the number written
    pub fn dump_trace(&self, obj: &O) -> Result<usize> {
        let entries = self.trace_entries(obj)?;
        let object_id = obj.object_id();
        for entry in &entries {
            self.log_sink().log(LogLevel::Info, object_id, &entry.to_string());
        }
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::class::ClassId;
    use crate::lifecycle::test_support::{Fixture, LEAF, WORK};
    use assert_matches::assert_matches;

    fn entry(n: u32) -> TraceEntry {
        TraceEntry::new(ObjectId(1), TraceKind::CondSet { cond: CondId::new(ClassId(1), n as u16) })
    }

    #[test]
    fn test_ring_overwrites_oldest() {
        let mut ring = TraceRing::new(MIN_TRACE_CAPACITY).unwrap();
        for n in 0..10 {
            ring.push(entry(n));
        }
        assert_eq!(ring.len(), MIN_TRACE_CAPACITY);
        let seqs: Vec<u16> = ring
            .iter()
            .map(|e| match e.kind {
                TraceKind::CondSet { cond } => cond.seq(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(seqs, vec![2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_ring_minimum_capacity() {
        assert_matches!(
            TraceRing::new(4),
            Err(Error::InsufficientTraceCapacity { requested: 4, minimum: MIN_TRACE_CAPACITY })
        );
    }

    #[test]
    fn test_flags() {
        let flags = TraceFlags::CRANKING | TraceFlags::CONDITIONS;
        assert!(flags.contains(TraceFlags::CRANKING));
        assert!(!flags.contains(TraceFlags::STATE_CHANGE));
        assert!(!TraceFlags::ALL.contains(TraceFlags::NONE));
        assert_eq!(
            TraceKind::ForcedStateChange {
                from: LifecycleState::Ready,
                to: LifecycleState::Fail
            }
            .category(),
            TraceFlags::STATE_CHANGE
        );
    }

    #[test]
    fn test_entry_serializes_flat() {
        let json = serde_json::to_value(entry(3)).unwrap();
        assert_eq!(json["event"], "cond_set");
        assert_eq!(json["object_id"], 1);
    }

    #[test]
    fn test_attach_filter_and_dump() {
        let fx = Fixture::new();
        let obj = fx.object(7, LEAF);

        assert_matches!(
            fx.engine.attach_trace(&obj, 2, TraceFlags::ALL),
            Err(Error::InsufficientTraceCapacity { .. })
        );

        fx.engine.attach_trace(&obj, 16, TraceFlags::CONDITIONS).unwrap();
        fx.engine.set_cond(&obj, WORK).unwrap();
        fx.engine.force_set_state(&obj, LifecycleState::Fail).unwrap();

        let entries = fx.engine.trace_entries(&obj).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, TraceKind::CondSet { cond: WORK });

        assert_eq!(fx.engine.dump_trace(&obj).unwrap(), 1);
        assert_eq!(fx.sink.lines_at(LogLevel::Info).len(), 1);
    }

    #[test]
    fn test_unbuffered_entries_go_to_log_sink() {
        let fx = Fixture::new();
        let obj = fx.object(8, LEAF);

        fx.engine.set_trace_flags(&obj, TraceFlags::STATE_CHANGE).unwrap();
        fx.engine.set_cond(&obj, WORK).unwrap();
        fx.engine.force_set_state(&obj, LifecycleState::Fail).unwrap();

        let lines = fx.sink.lines_at(LogLevel::Debug);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("(forced)"));

        fx.engine.attach_trace(&obj, 8, TraceFlags::ALL).unwrap();
        fx.engine.detach_trace(&obj).unwrap();
        assert!(fx.engine.trace_entries(&obj).unwrap().is_empty());
    }
}
