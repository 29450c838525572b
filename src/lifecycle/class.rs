//! Class and Condition Metadata
//!
//! Immutable descriptors for lifecycle classes. A class owns a table of base
//! conditions, may override the function of conditions owned by its
//! ancestors, and lists per-state rotaries that decide in which order set
//! conditions are serviced during a crank.
//!
//! Descriptors are plain data with function pointers; inheritance is an
//! explicit parent link resolved by [`ClassRegistry`](super::registry::ClassRegistry).

use crate::lifecycle::engine::LifecycleEngine;
use crate::lifecycle::ports::CarrierRef;
use crate::lifecycle::state::LifecycleState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Identifiers
// =============================================================================

/// Class identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassId(pub u16);

impl std::fmt::Display for ClassId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Condition identifier: owning class id and sequence number packed into one value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CondId(pub u32);

impl CondId {
    #[inline]
    pub const fn new(class_id: ClassId, seq: u16) -> Self {
        Self(((class_id.0 as u32) << 16) | seq as u32)
    }

    /// Class that owns this condition
    #[inline]
    pub const fn class_id(&self) -> ClassId {
        ClassId((self.0 >> 16) as u16)
    }

    /// Position of this condition in its owner's base condition table
    #[inline]
    pub const fn seq(&self) -> u16 {
        (self.0 & 0xffff) as u16
    }
}

impl std::fmt::Display for CondId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.class_id(), self.seq())
    }
}

// =============================================================================
// Condition Functions
// =============================================================================

/// Result of running a condition function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    /// Work finished; reschedule after the recorded interval
    Done,
    /// Asynchronous work was issued with the carrier; the crank suspends
    Pending,
    /// Work finished; crank again immediately
    Reschedule,
}

impl std::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleStatus::Done => write!(f, "done"),
            LifecycleStatus::Pending => write!(f, "pending"),
            LifecycleStatus::Reschedule => write!(f, "reschedule"),
        }
    }
}

/// Everything a condition function gets to work with
pub struct CondContext<'a, O> {
    /// Engine cranking the object
    pub engine: &'a LifecycleEngine<O>,
    /// The object being cranked
    pub object: &'a Arc<O>,
    /// Carrier for this crank; clone it to complete asynchronously
    pub carrier: &'a CarrierRef,
    /// Condition being run
    pub cond_id: CondId,
}

/// Function executed when a condition fires
pub type CondFn<O> = fn(&CondContext<'_, O>) -> LifecycleStatus;

// =============================================================================
// Condition Definitions
// =============================================================================

/// Kind of value a condition instance carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CondKind {
    /// Set-count driven condition
    Boolean,
    /// Countdown that becomes set when it expires
    Timer { interval_ms: u32 },
}

/// Full condition type, distinguishing owned definitions from overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CondType {
    BooleanBase,
    BooleanDerived,
    TimerBase,
    TimerDerived,
}

impl CondType {
    pub fn is_timer(&self) -> bool {
        matches!(self, CondType::TimerBase | CondType::TimerDerived)
    }

    pub fn is_derived(&self) -> bool {
        matches!(self, CondType::BooleanDerived | CondType::TimerDerived)
    }
}

/// A condition owned by a class
pub struct BaseCondition<O> {
    pub id: CondId,
    pub name: &'static str,
    pub kind: CondKind,
    pub function: Option<CondFn<O>>,
    /// Exists only to drive a transition lookup; never actually set
    pub no_set: bool,
    /// Object state when set -> state to move to
    pub transitions: BTreeMap<LifecycleState, LifecycleState>,
}

impl<O> BaseCondition<O> {
    /// Boolean condition without function or transitions
    pub fn boolean(id: CondId, name: &'static str) -> Self {
        Self {
            id,
            name,
            kind: CondKind::Boolean,
            function: None,
            no_set: false,
            transitions: BTreeMap::new(),
        }
    }

    /// Timer condition with a compiled-in default interval
    pub fn timer(id: CondId, name: &'static str, interval_ms: u32) -> Self {
        Self {
            kind: CondKind::Timer { interval_ms },
            ..Self::boolean(id, name)
        }
    }

    pub fn function(mut self, function: CondFn<O>) -> Self {
        self.function = Some(function);
        self
    }

    pub fn no_set(mut self) -> Self {
        self.no_set = true;
        self
    }

    /// When set while the object is in `from`, move the object to `to`
    pub fn transition(mut self, from: LifecycleState, to: LifecycleState) -> Self {
        self.transitions.insert(from, to);
        self
    }

    /// Apply the same target from every listed state
    pub fn transitions_to(
        mut self,
        from: impl IntoIterator<Item = LifecycleState>,
        to: LifecycleState,
    ) -> Self {
        for state in from {
            self.transitions.insert(state, to);
        }
        self
    }

    pub fn cond_type(&self) -> CondType {
        match self.kind {
            CondKind::Boolean => CondType::BooleanBase,
            CondKind::Timer { .. } => CondType::TimerBase,
        }
    }

    /// Target state when this condition is set in `state`
    pub fn transition_target(&self, state: LifecycleState) -> Option<LifecycleState> {
        self.transitions.get(&state).copied()
    }

    /// Default interval for timer conditions
    pub fn timer_interval(&self) -> Option<u32> {
        match self.kind {
            CondKind::Timer { interval_ms } => Some(interval_ms),
            CondKind::Boolean => None,
        }
    }
}

impl<O> std::fmt::Debug for BaseCondition<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseCondition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("has_function", &self.function.is_some())
            .field("no_set", &self.no_set)
            .field("transitions", &self.transitions)
            .finish()
    }
}

/// Replacement function a class supplies for an ancestor's condition
pub struct DerivedCondition<O> {
    pub id: CondId,
    pub function: CondFn<O>,
}

impl<O> std::fmt::Debug for DerivedCondition<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedCondition").field("id", &self.id).finish()
    }
}

// =============================================================================
// Rotaries
// =============================================================================

/// Attributes of a condition reference inside a rotary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RotaryAttrs {
    /// Armed automatically on entry into the rotary's state
    pub preset: bool,
    /// Setting this condition re-applies the state's presets
    pub redo_presets: bool,
}

impl RotaryAttrs {
    pub const NONE: RotaryAttrs = RotaryAttrs {
        preset: false,
        redo_presets: false,
    };
    pub const PRESET: RotaryAttrs = RotaryAttrs {
        preset: true,
        redo_presets: false,
    };
    pub const REDO_PRESETS: RotaryAttrs = RotaryAttrs {
        preset: false,
        redo_presets: true,
    };
}

/// Condition reference inside a rotary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotaryCond {
    pub cond_id: CondId,
    pub attrs: RotaryAttrs,
}

impl RotaryCond {
    pub const fn new(cond_id: CondId, attrs: RotaryAttrs) -> Self {
        Self { cond_id, attrs }
    }

    pub const fn preset(cond_id: CondId) -> Self {
        Self::new(cond_id, RotaryAttrs::PRESET)
    }

    pub const fn plain(cond_id: CondId) -> Self {
        Self::new(cond_id, RotaryAttrs::NONE)
    }
}

/// Ordered list of conditions consulted in one state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rotary {
    pub state: LifecycleState,
    pub conds: Vec<RotaryCond>,
}

impl Rotary {
    pub fn find(&self, cond_id: CondId) -> Option<&RotaryCond> {
        self.conds.iter().find(|c| c.cond_id == cond_id)
    }
}

// =============================================================================
// Class Descriptor
// =============================================================================

/// Immutable description of one lifecycle class
pub struct ClassDescriptor<O> {
    pub class_id: ClassId,
    pub name: &'static str,
    pub parent: Option<ClassId>,
    pub base_conds: Vec<BaseCondition<O>>,
    pub derived_conds: Vec<DerivedCondition<O>>,
    pub rotaries: Vec<Rotary>,
}

impl<O> ClassDescriptor<O> {
    /// Root class (no parent)
    pub fn root(class_id: ClassId, name: &'static str) -> Self {
        Self {
            class_id,
            name,
            parent: None,
            base_conds: Vec::new(),
            derived_conds: Vec::new(),
            rotaries: Vec::new(),
        }
    }

    /// Class deriving from `parent`
    pub fn derived(class_id: ClassId, name: &'static str, parent: ClassId) -> Self {
        Self {
            parent: Some(parent),
            ..Self::root(class_id, name)
        }
    }

    /// Add an owned condition; conditions must be added in sequence order
    pub fn base_cond(mut self, cond: BaseCondition<O>) -> Self {
        self.base_conds.push(cond);
        self
    }

    /// Override the function of an ancestor's condition
    pub fn derived_cond(mut self, id: CondId, function: CondFn<O>) -> Self {
        self.derived_conds.push(DerivedCondition { id, function });
        self
    }

    /// Add the rotary for a state
    pub fn rotary(mut self, state: LifecycleState, conds: impl IntoIterator<Item = RotaryCond>) -> Self {
        self.rotaries.push(Rotary {
            state,
            conds: conds.into_iter().collect(),
        });
        self
    }

    /// Rotary for a state, if this class has one
    pub fn rotary_for(&self, state: LifecycleState) -> Option<&Rotary> {
        self.rotaries.iter().find(|r| r.state == state)
    }

    /// Owned condition by id
    pub fn owned_cond(&self, cond_id: CondId) -> Option<&BaseCondition<O>> {
        if cond_id.class_id() != self.class_id {
            return None;
        }
        self.base_conds
            .get(cond_id.seq() as usize)
            .filter(|c| c.id == cond_id)
    }

    /// Override this class supplies for an ancestor's condition
    pub fn derived_function(&self, cond_id: CondId) -> Option<CondFn<O>> {
        self.derived_conds
            .iter()
            .find(|d| d.id == cond_id)
            .map(|d| d.function)
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

impl<O> std::fmt::Debug for ClassDescriptor<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("class_id", &self.class_id)
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("base_conds", &self.base_conds)
            .field("derived_conds", &self.derived_conds)
            .field("rotaries", &self.rotaries)
            .finish()
    }
}
