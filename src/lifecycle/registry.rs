//! Class Registry
//!
//! Arena of immutable class descriptors forming single-inheritance chains.
//! Classes are registered root first; every registration is verified before
//! the class is admitted. Once built, the registry is shared behind an `Arc`
//! and never mutated again, so lookups need no locking.

use crate::error::{Error, Result};
use crate::lifecycle::class::{
    BaseCondition, ClassDescriptor, ClassId, CondFn, CondId, CondType, RotaryCond,
};
use crate::lifecycle::state::{LifecycleState, StateTable};
use crate::lifecycle::verify;
use std::collections::HashMap;
use tracing::{debug, error, info};

// =============================================================================
// Resolved Rotary Entry
// =============================================================================

/// Most-derived rotary entry for a (state, condition) pair
pub struct ResolvedCond<'a, O> {
    /// Class whose rotary references the condition
    pub class_id: ClassId,
    /// The rotary entry itself
    pub entry: &'a RotaryCond,
    /// Function to execute, if any
    pub function: Option<CondFn<O>>,
    /// Whether the function is a derived override or the owner's base function
    pub cond_type: CondType,
}

// =============================================================================
// Class Registry
// =============================================================================

/// Registry of lifecycle classes
pub struct ClassRegistry<O> {
    /// Descriptors in registration order (parents before children)
    classes: Vec<ClassDescriptor<O>>,
    /// Class id -> arena index
    index: HashMap<ClassId, usize>,
    /// Transition rules shared by all classes
    state_table: StateTable,
}

impl<O> Default for ClassRegistry<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> ClassRegistry<O> {
    /// Create an empty registry with the default state table
    pub fn new() -> Self {
        Self::with_state_table(StateTable::default())
    }

    /// Create an empty registry with a custom state table
    pub fn with_state_table(state_table: StateTable) -> Self {
        Self {
            classes: Vec::new(),
            index: HashMap::new(),
            state_table,
        }
    }

    /// Register a class after verifying it against its ancestors
    pub fn register(&mut self, desc: ClassDescriptor<O>) -> Result<()> {
        if self.index.contains_key(&desc.class_id) {
            return Err(Error::ClassAlreadyRegistered {
                class_id: desc.class_id,
            });
        }
        if let Some(parent) = desc.parent {
            if !self.index.contains_key(&parent) {
                return Err(Error::ClassNotRegistered { class_id: parent });
            }
        }

        let violations = verify::check_class(self, &desc);
        if !violations.is_empty() {
            for v in &violations {
                error!(class_id = %desc.class_id, class = desc.name, violation = %v, "Lifecycle class verification failed");
            }
            return Err(Error::Verification {
                class_id: desc.class_id,
                violations,
            });
        }

        info!(
            class_id = %desc.class_id,
            class = desc.name,
            parent = ?desc.parent,
            conditions = desc.base_conds.len(),
            rotaries = desc.rotaries.len(),
            "Registered lifecycle class"
        );
        self.index.insert(desc.class_id, self.classes.len());
        self.classes.push(desc);
        Ok(())
    }

    /// Re-verify every registered class
    pub fn verify_all(&self) -> Result<()> {
        for desc in &self.classes {
            self.verify_class(desc.class_id)?;
        }
        debug!(classes = self.classes.len(), "Lifecycle registry verified");
        Ok(())
    }

    /// Re-verify one registered class
    pub fn verify_class(&self, class_id: ClassId) -> Result<()> {
        let desc = self.get(class_id).ok_or(Error::ClassNotRegistered { class_id })?;
        let violations = verify::check_class(self, desc);
        if violations.is_empty() {
            Ok(())
        } else {
            for v in &violations {
                error!(class_id = %class_id, violation = %v, "Lifecycle class verification failed");
            }
            Err(Error::Verification {
                class_id,
                violations,
            })
        }
    }

    /// Get a descriptor by class id
    pub fn get(&self, class_id: ClassId) -> Option<&ClassDescriptor<O>> {
        self.index.get(&class_id).map(|&i| &self.classes[i])
    }

    /// Check if a class is registered
    pub fn contains(&self, class_id: ClassId) -> bool {
        self.index.contains_key(&class_id)
    }

    /// Number of registered classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// State transition table
    pub fn state_table(&self) -> &StateTable {
        &self.state_table
    }

    /// Descriptors from the root down to `leaf`
    pub fn chain(&self, leaf: ClassId) -> Result<Vec<&ClassDescriptor<O>>> {
        let mut chain = Vec::new();
        let mut cursor = Some(leaf);
        while let Some(class_id) = cursor {
            let desc = self
                .get(class_id)
                .ok_or(Error::ClassNotRegistered { class_id })?;
            chain.push(desc);
            cursor = desc.parent;
        }
        chain.reverse();
        Ok(chain)
    }

    /// Class ids of the hierarchy ending in `leaf`, base to leaf
    pub fn class_hierarchy(&self, leaf: ClassId) -> Result<Vec<ClassId>> {
        Ok(self.chain(leaf)?.iter().map(|d| d.class_id).collect())
    }

    /// Check whether `ancestor` is `class_id` itself or one of its ancestors
    pub fn is_in_chain(&self, class_id: ClassId, ancestor: ClassId) -> bool {
        let mut cursor = Some(class_id);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.get(id).and_then(|d| d.parent);
        }
        false
    }

    /// Resolve a condition id to its owning class and definition, walking from
    /// `leaf` toward the root
    pub fn find_cond(&self, leaf: ClassId, cond_id: CondId) -> Result<(ClassId, &BaseCondition<O>)> {
        let mut cursor = Some(leaf);
        while let Some(class_id) = cursor {
            let desc = self
                .get(class_id)
                .ok_or(Error::ClassNotRegistered { class_id })?;
            if cond_id.class_id() == class_id {
                return desc
                    .owned_cond(cond_id)
                    .map(|c| (class_id, c))
                    .ok_or(Error::ConditionNotFound {
                        class_id: leaf,
                        cond_id,
                    });
            }
            cursor = desc.parent;
        }
        Err(Error::ConditionNotFound {
            class_id: leaf,
            cond_id,
        })
    }

    /// Most-derived rotary entry referencing `cond_id` in `state`
    ///
    /// Walks from `leaf` toward the root and returns the first class whose
    /// rotary for `state` lists the condition. Its function is the nearest
    /// override at or above that class, falling back to the owner's base
    /// function.
    pub fn resolve_rotary_cond(
        &self,
        leaf: ClassId,
        state: LifecycleState,
        cond_id: CondId,
    ) -> Option<ResolvedCond<'_, O>> {
        let chain = self.chain(leaf).ok()?;
        let pos = chain.iter().rposition(|desc| {
            desc.rotary_for(state)
                .map(|r| r.find(cond_id).is_some())
                .unwrap_or(false)
        })?;
        let entry = chain[pos].rotary_for(state)?.find(cond_id)?;

        let is_timer = chain
            .iter()
            .find(|d| d.class_id == cond_id.class_id())
            .and_then(|d| d.owned_cond(cond_id))
            .map(|c| c.timer_interval().is_some())
            .unwrap_or(false);

        let mut function = None;
        let mut derived = false;
        for desc in chain[..=pos].iter().rev() {
            if let Some(f) = desc.derived_function(cond_id) {
                function = Some(f);
                derived = true;
                break;
            }
            if let Some(owned) = desc.owned_cond(cond_id) {
                function = owned.function;
                break;
            }
        }

        let cond_type = match (is_timer, derived) {
            (false, false) => CondType::BooleanBase,
            (false, true) => CondType::BooleanDerived,
            (true, false) => CondType::TimerBase,
            (true, true) => CondType::TimerDerived,
        };

        Some(ResolvedCond {
            class_id: chain[pos].class_id,
            entry,
            function,
            cond_type,
        })
    }

    /// Iterate over registered class ids in registration order
    pub fn class_ids(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.classes.iter().map(|d| d.class_id)
    }
}
