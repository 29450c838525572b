//! Lifecycle States
//!
//! The fixed set of lifecycle states every managed object moves through,
//! partitioned into Non-Pending and Pending states, plus the state table that
//! says which transitions are permitted and which Pending state must run
//! before a Non-Pending state is entered.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Lifecycle State
// =============================================================================

/// Lifecycle state of a managed object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Specialize,
    Activate,
    Ready,
    Hibernate,
    Offline,
    Fail,
    Destroy,
    PendingReady,
    PendingActivate,
    PendingHibernate,
    PendingOffline,
    PendingFail,
    PendingDestroy,
}

impl LifecycleState {
    /// State every object instance starts in
    pub const INITIAL: LifecycleState = LifecycleState::Specialize;

    /// Terminal state; an object with nothing set here is destroyed
    pub const TERMINAL: LifecycleState = LifecycleState::Destroy;

    /// All states, Non-Pending first
    pub const ALL: [LifecycleState; 13] = [
        LifecycleState::Specialize,
        LifecycleState::Activate,
        LifecycleState::Ready,
        LifecycleState::Hibernate,
        LifecycleState::Offline,
        LifecycleState::Fail,
        LifecycleState::Destroy,
        LifecycleState::PendingReady,
        LifecycleState::PendingActivate,
        LifecycleState::PendingHibernate,
        LifecycleState::PendingOffline,
        LifecycleState::PendingFail,
        LifecycleState::PendingDestroy,
    ];

    /// Check if this is a Pending (transitional) state
    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            LifecycleState::PendingReady
                | LifecycleState::PendingActivate
                | LifecycleState::PendingHibernate
                | LifecycleState::PendingOffline
                | LifecycleState::PendingFail
                | LifecycleState::PendingDestroy
        )
    }

    /// The Pending state the default table interposes before this state
    pub fn default_pending(&self) -> Option<LifecycleState> {
        match self {
            LifecycleState::Activate => Some(LifecycleState::PendingActivate),
            LifecycleState::Ready => Some(LifecycleState::PendingReady),
            LifecycleState::Hibernate => Some(LifecycleState::PendingHibernate),
            LifecycleState::Offline => Some(LifecycleState::PendingOffline),
            LifecycleState::Fail => Some(LifecycleState::PendingFail),
            LifecycleState::Destroy => Some(LifecycleState::PendingDestroy),
            _ => None,
        }
    }

    /// The destination the default table gives a Pending state
    pub fn default_next(&self) -> Option<LifecycleState> {
        match self {
            LifecycleState::PendingActivate => Some(LifecycleState::Activate),
            LifecycleState::PendingReady => Some(LifecycleState::Ready),
            LifecycleState::PendingHibernate => Some(LifecycleState::Hibernate),
            LifecycleState::PendingOffline => Some(LifecycleState::Offline),
            LifecycleState::PendingFail => Some(LifecycleState::Fail),
            LifecycleState::PendingDestroy => Some(LifecycleState::Destroy),
            _ => None,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Specialize => "specialize",
            LifecycleState::Activate => "activate",
            LifecycleState::Ready => "ready",
            LifecycleState::Hibernate => "hibernate",
            LifecycleState::Offline => "offline",
            LifecycleState::Fail => "fail",
            LifecycleState::Destroy => "destroy",
            LifecycleState::PendingReady => "pending_ready",
            LifecycleState::PendingActivate => "pending_activate",
            LifecycleState::PendingHibernate => "pending_hibernate",
            LifecycleState::PendingOffline => "pending_offline",
            LifecycleState::PendingFail => "pending_fail",
            LifecycleState::PendingDestroy => "pending_destroy",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// State Descriptor
// =============================================================================

/// Transition rules for one state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDescriptor {
    /// Non-Pending state: the Pending state that must run before it is entered.
    /// Pending state: back-reference to the Non-Pending state that requested it.
    pub pending_state: Option<LifecycleState>,
    /// Pending state only: where the object goes once pending work is done
    pub next_state: Option<LifecycleState>,
    /// Targets a non-forced transition may request from this state
    pub permitted: Vec<LifecycleState>,
}

impl StateDescriptor {
    /// Descriptor with no pending requirement and the given permitted targets
    pub fn new(permitted: impl IntoIterator<Item = LifecycleState>) -> Self {
        Self {
            pending_state: None,
            next_state: None,
            permitted: permitted.into_iter().collect(),
        }
    }

    pub fn with_pending(mut self, pending: LifecycleState) -> Self {
        self.pending_state = Some(pending);
        self
    }

    pub fn with_next(mut self, next: LifecycleState) -> Self {
        self.next_state = Some(next);
        self
    }
}

// =============================================================================
// State Table
// =============================================================================

/// Per-state transition table shared by every class in a registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTable {
    states: BTreeMap<LifecycleState, StateDescriptor>,
}

impl Default for StateTable {
    fn default() -> Self {
        use LifecycleState::*;

        let mut states = BTreeMap::new();
        let mut non_pending = |state: LifecycleState, permitted: &[LifecycleState]| {
            let mut desc = StateDescriptor::new(permitted.iter().copied());
            desc.pending_state = state.default_pending();
            states.insert(state, desc);
        };

        non_pending(Specialize, &[Activate, Ready, Hibernate, Offline, Fail, Destroy]);
        non_pending(Activate, &[Ready, Hibernate, Offline, Fail, Destroy]);
        non_pending(Ready, &[Activate, Hibernate, Offline, Fail, Destroy]);
        non_pending(Hibernate, &[Activate, Ready, Offline, Fail, Destroy]);
        non_pending(Offline, &[Specialize, Activate, Ready, Fail, Destroy]);
        non_pending(Fail, &[Specialize, Activate, Destroy]);
        non_pending(Destroy, &[]);

        for pending in LifecycleState::ALL.iter().filter(|s| s.is_pending()) {
            // A pending state can always be superseded by failure or destruction
            let mut permitted = Vec::with_capacity(3);
            if let Some(next) = pending.default_next() {
                permitted.push(next);
            }
            for s in [Fail, Destroy] {
                if !permitted.contains(&s) {
                    permitted.push(s);
                }
            }
            let mut desc = StateDescriptor::new(permitted);
            desc.next_state = pending.default_next();
            states.insert(*pending, desc);
        }

        Self { states }
    }
}

impl StateTable {
    /// Replace the descriptor of one state
    pub fn with_descriptor(mut self, state: LifecycleState, desc: StateDescriptor) -> Self {
        self.states.insert(state, desc);
        self
    }

    /// Get the descriptor of a state
    pub fn descriptor(&self, state: LifecycleState) -> Option<&StateDescriptor> {
        self.states.get(&state)
    }

    /// Check whether a non-forced transition `from -> to` is allowed
    pub fn is_permitted(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.states
            .get(&from)
            .map(|d| d.permitted.contains(&to))
            .unwrap_or(false)
    }

    /// Pending state required before entering `state`, if any
    pub fn pending_state(&self, state: LifecycleState) -> Option<LifecycleState> {
        self.states.get(&state).and_then(|d| d.pending_state)
    }

    /// Destination of a Pending state
    pub fn next_state(&self, state: LifecycleState) -> Option<LifecycleState> {
        if !state.is_pending() {
            return None;
        }
        self.states.get(&state).and_then(|d| d.next_state)
    }

    /// Work out which state the object actually enters when `target` is requested
    /// from `current`.
    ///
    /// From a Pending state whose work the target was waiting on, the target is
    /// entered directly; otherwise a target that needs pending work enters its
    /// Pending state first.
    pub fn resolve_target(&self, current: LifecycleState, target: LifecycleState) -> LifecycleState {
        if target.is_pending() {
            return target;
        }
        let required = self.pending_state(target);
        if current.is_pending() && required == Some(current) {
            return target;
        }
        required.unwrap_or(target)
    }

    /// Iterate over all described states
    pub fn states(&self) -> impl Iterator<Item = (&LifecycleState, &StateDescriptor)> {
        self.states.iter()
    }
}
