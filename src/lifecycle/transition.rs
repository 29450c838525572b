//! State Transition Engine
//!
//! Validates requested transitions against the state table, interposes
//! Pending states, and commits the result only if the object is still in the
//! state the request was based on.

use crate::error::{Error, Result};
use crate::lifecycle::engine::LifecycleEngine;
use crate::lifecycle::ports::{LifecycleObject, StateChangeEvent};
use crate::lifecycle::state::LifecycleState;
use crate::lifecycle::trace::TraceKind;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// Result of a transition request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    /// The object moved
    Committed {
        from: LifecycleState,
        to: LifecycleState,
    },
    /// The object left `expected` before the commit; nothing changed
    Skipped {
        expected: LifecycleState,
        actual: LifecycleState,
    },
}

impl TransitionOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, TransitionOutcome::Committed { .. })
    }
}

impl<O: LifecycleObject> LifecycleEngine<O> {
    /// Current state of the object
    pub fn get_state(&self, obj: &O) -> Result<LifecycleState> {
        self.check_object(obj)?;
        Ok(obj.lifecycle().state())
    }

    /// Request a validated transition toward `target`
    pub fn set_state(&self, obj: &O, target: LifecycleState) -> Result<TransitionOutcome> {
        let current = self.get_state(obj)?;
        self.transition(obj, current, target, false)
    }

    /// Move toward `target` even if the state table does not permit it
    pub fn force_set_state(&self, obj: &O, target: LifecycleState) -> Result<TransitionOutcome> {
        let current = self.get_state(obj)?;
        self.transition(obj, current, target, true)
    }

    /// Validate and resolve a transition requested while in `expected`
    pub(crate) fn transition(
        &self,
        obj: &O,
        expected: LifecycleState,
        target: LifecycleState,
        forced: bool,
    ) -> Result<TransitionOutcome> {
        let table = self.registry().state_table();
        if !forced && !table.is_permitted(expected, target) {
            return Err(self.reject_transition(obj, expected, target));
        }

        let to = table.resolve_target(expected, target);
        self.commit_state(obj, expected, to, forced)
    }

    /// Log and build the error for a transition the state table forbids
    pub(crate) fn reject_transition(
        &self,
        obj: &O,
        from: LifecycleState,
        to: LifecycleState,
    ) -> Error {
        error!(
            object_id = %obj.object_id(),
            from = %from,
            to = %to,
            "Transition not permitted"
        );
        let err = Error::InvalidTransition {
            object_id: obj.object_id(),
            from,
            to,
        };
        self.report_fault(obj.object_id(), &err);
        err
    }

    /// Enter `to` if the object is still in `expected`
    pub(crate) fn commit_state(
        &self,
        obj: &O,
        expected: LifecycleState,
        to: LifecycleState,
        forced: bool,
    ) -> Result<TransitionOutcome> {
        let object_id = obj.object_id();
        let lifecycle = obj.lifecycle();

        let cranking = {
            let mut st = lifecycle.lock_state();
            if st.state != expected {
                let actual = st.state;
                drop(st);
                self.metrics().record_skipped_transition();
                debug!(
                    object_id = %object_id,
                    expected = %expected,
                    actual = %actual,
                    to = %to,
                    "Transition skipped, state moved underneath"
                );
                return Ok(TransitionOutcome::Skipped { expected, actual });
            }
            st.state = to;
            st.attrs.state_just_changed = true;
            if st.attrs.cranking {
                st.reschedule_ms = 0;
            }
            st.attrs.cranking
        };

        if !cranking {
            self.scheduler().run_now(object_id);
        }

        let kind = if forced {
            TraceKind::ForcedStateChange { from: expected, to }
        } else {
            TraceKind::StateChange { from: expected, to }
        };
        self.trace(obj, kind);
        self.metrics().record_transition();

        info!(
            object_id = %object_id,
            class_id = %lifecycle.class_id(),
            from = %expected,
            to = %to,
            forced,
            "Lifecycle state changed"
        );

        self.notifier().notify(StateChangeEvent {
            object_id,
            class_id: lifecycle.class_id(),
            from: expected,
            to,
            forced,
            timestamp: Utc::now(),
        });

        Ok(TransitionOutcome::Committed { from: expected, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::test_support::{Fixture, SchedCall, LEAF};
    use assert_matches::assert_matches;
    use LifecycleState::*;

    #[test]
    fn test_invalid_transition_leaves_state() {
        let fx = Fixture::new();
        let obj = fx.object(1, LEAF);
        fx.engine.force_set_state(&obj, Destroy).unwrap();
        // Specialize -> PendingDestroy (forced goes through pending resolution)
        assert_eq!(obj.lifecycle.state(), PendingDestroy);
        fx.engine.set_state(&obj, Destroy).unwrap();
        assert_eq!(obj.lifecycle.state(), Destroy);

        assert_matches!(
            fx.engine.set_state(&obj, Ready),
            Err(Error::InvalidTransition { from: Destroy, to: Ready, .. })
        );
        assert_eq!(obj.lifecycle.state(), Destroy);
    }

    #[test]
    fn test_forced_transition_bypasses_table() {
        let fx = Fixture::new();
        let obj = fx.object(2, LEAF);
        fx.engine.force_set_state(&obj, PendingDestroy).unwrap();
        fx.engine.set_state(&obj, Destroy).unwrap();

        let outcome = fx.engine.force_set_state(&obj, Specialize).unwrap();
        assert_eq!(outcome, TransitionOutcome::Committed { from: Destroy, to: Specialize });

        let events = fx.notifier.events();
        assert_eq!(events.len(), 3);
        assert!(events[2].forced);
        assert!(!events[1].forced);
    }

    #[test]
    fn test_pending_interposition() {
        let fx = Fixture::new();
        let obj = fx.object(3, LEAF);

        assert_eq!(
            fx.engine.set_state(&obj, Ready).unwrap(),
            TransitionOutcome::Committed { from: Specialize, to: PendingReady }
        );
        // Pending work finished: the target is entered directly
        assert_eq!(
            fx.engine.set_state(&obj, Ready).unwrap(),
            TransitionOutcome::Committed { from: PendingReady, to: Ready }
        );
        // Superseded by a different target
        fx.engine.set_state(&obj, Hibernate).unwrap();
        assert_eq!(
            fx.engine.set_state(&obj, Fail).unwrap(),
            TransitionOutcome::Committed { from: PendingHibernate, to: PendingFail }
        );
        assert_eq!(fx.engine.metrics().snapshot().transitions, 4);
    }

    #[test]
    fn test_stale_expected_state_is_skipped() {
        let fx = Fixture::new();
        let obj = fx.object(4, LEAF);

        let outcome = fx.engine.transition(&obj, Ready, Hibernate, false).unwrap();
        assert_eq!(outcome, TransitionOutcome::Skipped { expected: Ready, actual: Specialize });
        assert!(!outcome.is_committed());
        assert_eq!(obj.lifecycle.state(), Specialize);
        assert!(fx.notifier.events().is_empty());
        assert_eq!(fx.engine.metrics().snapshot().skipped_transitions, 1);
    }

    #[test]
    fn test_commit_requests_crank() {
        let fx = Fixture::new();
        let obj = fx.object(5, LEAF);
        // Presets from creation already consumed
        obj.lifecycle.lock_state().attrs.state_just_changed = false;

        fx.engine.set_state(&obj, Offline).unwrap();
        assert!(obj.lifecycle.snapshot().attrs.state_just_changed);
        assert_eq!(fx.scheduler.calls(), vec![SchedCall::Now(obj.id)]);

        // While cranking only the interval shortens
        {
            let mut st = obj.lifecycle.lock_state();
            st.attrs.cranking = true;
            st.reschedule_ms = 3000;
        }
        fx.engine.set_state(&obj, Fail).unwrap();
        assert_eq!(obj.lifecycle.snapshot().reschedule_ms, 0);
        assert_eq!(fx.scheduler.calls().len(), 1);
    }

    #[test]
    fn test_outcome_serializes() {
        let json = serde_json::to_value(TransitionOutcome::Committed { from: Ready, to: PendingFail })
            .unwrap();
        assert_eq!(json["outcome"], "committed");
        assert_eq!(json["to"], "pending_fail");
    }
}
