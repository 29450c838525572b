//! Object Instance State
//!
//! The lifecycle record every managed object embeds by value. It is split
//! behind three locks with separate purposes:
//!
//! - state lock: current state, attribute bits, reschedule bookkeeping and the
//!   crank in flight
//! - condition lock: condition instances, one array per class in the chain
//! - trace lock: optional trace ring and its category mask
//!
//! The engine never holds two of them at once and never holds any of them
//! while a condition function or a collaborator runs.

use crate::error::{Error, Result};
use crate::lifecycle::class::{ClassId, CondId, CondKind};
use crate::lifecycle::ports::{CarrierRef, ObjectId};
use crate::lifecycle::registry::ClassRegistry;
use crate::lifecycle::state::LifecycleState;
use crate::lifecycle::trace::{TraceFlags, TraceState};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// Canary of a live record
const CANARY_LIVE: u32 = 0x4c59_4643;
/// Canary written by [`ObjectLifecycle::destroy`]
const CANARY_DEAD: u32 = 0xdead_4c59;

/// Timer remaining value meaning "expired" (the condition is set)
pub const TIMER_EXPIRED: u32 = u32::MAX;

// =============================================================================
// Condition Instances
// =============================================================================

/// Mutable per-object value of one condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CondInstance {
    Boolean {
        /// Outstanding sets
        set_count: u32,
        /// Sets observed when the condition was groomed for execution
        call_set_count: u32,
    },
    Timer {
        interval_ms: u32,
        /// 0 = stopped, [`TIMER_EXPIRED`] = set
        remaining_ms: u32,
    },
}

impl CondInstance {
    /// Fresh instance; timers start armed with their default interval
    pub fn new(kind: CondKind) -> Self {
        match kind {
            CondKind::Boolean => CondInstance::Boolean {
                set_count: 0,
                call_set_count: 0,
            },
            CondKind::Timer { interval_ms } => CondInstance::Timer {
                interval_ms,
                remaining_ms: interval_ms,
            },
        }
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        match self {
            CondInstance::Boolean { set_count, .. } => *set_count != 0,
            CondInstance::Timer { remaining_ms, .. } => *remaining_ms == TIMER_EXPIRED,
        }
    }
}

// =============================================================================
// State Record
// =============================================================================

/// Attribute bits guarded by the state lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateAttrs {
    /// Presets for the current state still need to be applied
    pub state_just_changed: bool,
    /// A crank is in flight
    pub cranking: bool,
    /// The condition in flight asked to be cleared on completion
    pub clear_current_cond: bool,
}

/// Data guarded by the state lock
pub(crate) struct StateRecord {
    pub state: LifecycleState,
    pub attrs: StateAttrs,
    pub last_crank_ms: Option<u64>,
    pub reschedule_ms: u64,
    pub carrier: Option<CarrierRef>,
    pub current_cond: Option<CondId>,
}

/// Point-in-time view of the state record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleSnapshot {
    pub class_id: ClassId,
    pub state: LifecycleState,
    pub attrs: StateAttrs,
    pub last_crank_ms: Option<u64>,
    pub reschedule_ms: u64,
    pub current_cond: Option<CondId>,
}

// =============================================================================
// Object Lifecycle
// =============================================================================

/// Lifecycle record embedded in a managed object
pub struct ObjectLifecycle {
    canary: AtomicU32,
    /// Class hierarchy, base first
    chain: Vec<ClassId>,
    state: Mutex<StateRecord>,
    conds: Mutex<Vec<Vec<CondInstance>>>,
    pub(crate) trace: Mutex<TraceState>,
}

impl ObjectLifecycle {
    /// Create the record for an object of class `class_id`
    ///
    /// The object starts in the initial state with presets pending and every
    /// timer armed with its default interval.
    pub fn new<O>(registry: &ClassRegistry<O>, class_id: ClassId) -> Result<Self> {
        Self::with_trace_flags(registry, class_id, TraceFlags::default())
    }

    pub(crate) fn with_trace_flags<O>(
        registry: &ClassRegistry<O>,
        class_id: ClassId,
        flags: TraceFlags,
    ) -> Result<Self> {
        let chain = registry.chain(class_id)?;
        let conds = chain
            .iter()
            .map(|desc| {
                desc.base_conds
                    .iter()
                    .map(|c| CondInstance::new(c.kind))
                    .collect()
            })
            .collect();

        Ok(Self {
            canary: AtomicU32::new(CANARY_LIVE),
            chain: chain.iter().map(|d| d.class_id).collect(),
            state: Mutex::new(StateRecord {
                state: LifecycleState::INITIAL,
                attrs: StateAttrs {
                    state_just_changed: true,
                    ..StateAttrs::default()
                },
                last_crank_ms: None,
                reschedule_ms: 0,
                carrier: None,
                current_cond: None,
            }),
            conds: Mutex::new(conds),
            trace: Mutex::new(TraceState {
                ring: None,
                flags,
            }),
        })
    }

    /// Leaf class of the object
    pub fn class_id(&self) -> ClassId {
        // chain is never empty: the registry returns at least the leaf
        self.chain[self.chain.len() - 1]
    }

    /// Class hierarchy, base first
    pub fn chain(&self) -> &[ClassId] {
        &self.chain
    }

    /// Position of `class_id` in the chain
    #[inline]
    pub fn chain_index(&self, class_id: ClassId) -> Option<usize> {
        self.chain.iter().position(|&c| c == class_id)
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.canary.load(Ordering::Acquire) == CANARY_LIVE
    }

    pub(crate) fn check_canary(&self, object_id: ObjectId) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(Error::CorruptInstance { object_id })
        }
    }

    /// Current state
    pub fn state(&self) -> LifecycleState {
        self.state.lock().state
    }

    /// Check if a crank is in flight
    pub fn is_cranking(&self) -> bool {
        self.state.lock().attrs.cranking
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        let st = self.state.lock();
        LifecycleSnapshot {
            class_id: self.class_id(),
            state: st.state,
            attrs: st.attrs,
            last_crank_ms: st.last_crank_ms,
            reschedule_ms: st.reschedule_ms,
            current_cond: st.current_cond,
        }
    }

    /// Copy of one condition instance
    pub fn cond_instance(&self, cond_id: CondId) -> Option<CondInstance> {
        let pos = self.chain_index(cond_id.class_id())?;
        self.conds.lock().get(pos)?.get(cond_id.seq() as usize).copied()
    }

    /// Invalidate the record; every later engine operation fails
    pub fn destroy(&self) {
        self.canary.store(CANARY_DEAD, Ordering::Release);
        self.trace.lock().ring = None;
        self.state.lock().carrier = None;
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, StateRecord> {
        self.state.lock()
    }

    pub(crate) fn lock_conds(&self) -> MutexGuard<'_, Vec<Vec<CondInstance>>> {
        self.conds.lock()
    }
}

impl std::fmt::Debug for ObjectLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectLifecycle")
            .field("valid", &self.is_valid())
            .field("chain", &self.chain)
            .field("state", &self.state())
            .finish()
    }
}
