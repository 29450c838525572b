//! Condition Engine
//!
//! Setting, clearing, grooming and timing condition instances. Boolean
//! conditions count outstanding sets so a set that lands while the condition
//! is running survives that run's clear; timers count down between cranks and
//! become set when they expire.

use crate::error::{Error, Result};
use crate::lifecycle::class::{BaseCondition, CondId};
use crate::lifecycle::engine::LifecycleEngine;
use crate::lifecycle::instance::{CondInstance, TIMER_EXPIRED};
use crate::lifecycle::ports::LifecycleObject;
use crate::lifecycle::state::LifecycleState;
use crate::lifecycle::trace::TraceKind;
use tracing::{debug, error, warn};

/// Location of a condition instance: chain position and sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CondSlot {
    pub pos: usize,
    pub seq: usize,
}

impl<O: LifecycleObject> LifecycleEngine<O> {
    /// Resolve a condition against the object's hierarchy
    pub(crate) fn locate(&self, obj: &O, cond_id: CondId) -> Result<(CondSlot, &BaseCondition<O>)> {
        let lifecycle = obj.lifecycle();
        let found = self
            .registry()
            .find_cond(lifecycle.class_id(), cond_id)
            .and_then(|(owner, cond)| {
                lifecycle
                    .chain_index(owner)
                    .map(|pos| {
                        (
                            CondSlot {
                                pos,
                                seq: cond_id.seq() as usize,
                            },
                            cond,
                        )
                    })
                    .ok_or(Error::ConditionNotFound {
                        class_id: lifecycle.class_id(),
                        cond_id,
                    })
            });

        if let Err(ref e) = found {
            error!(object_id = %obj.object_id(), cond = %cond_id, error = %e, "Condition lookup failed");
            self.report_fault(obj.object_id(), e);
        }
        found
    }

    /// Check whether a condition is set
    pub fn is_set(&self, obj: &O, cond_id: CondId) -> Result<bool> {
        self.check_object(obj)?;
        let (slot, _) = self.locate(obj, cond_id)?;
        Ok(obj.lifecycle().lock_conds()[slot.pos][slot.seq].is_set())
    }

    /// Set a condition
    ///
    /// If the condition's transition table maps the current state elsewhere,
    /// the transition is made. Otherwise a newly set condition whose rotary
    /// entry asks for it re-applies the state's presets. Either way the object
    /// is cranked soon.
    pub fn set_cond(&self, obj: &O, cond_id: CondId) -> Result<()> {
        self.check_object(obj)?;
        let (slot, cond) = self.locate(obj, cond_id)?;
        let lifecycle = obj.lifecycle();

        // A set that would request a forbidden move is rejected untouched
        let state = lifecycle.state();
        let target = cond.transition_target(state).filter(|&t| t != state);
        if let Some(target) = target {
            if !self.registry().state_table().is_permitted(state, target) {
                return Err(self.reject_transition(obj, state, target));
            }
        }

        let was_set = {
            let mut conds = lifecycle.lock_conds();
            let instance = &mut conds[slot.pos][slot.seq];
            let was_set = instance.is_set();
            match instance {
                CondInstance::Boolean { set_count, .. } => {
                    if !cond.no_set {
                        *set_count = set_count.saturating_add(1);
                        let step = self.config().runaway_set_warn_step;
                        if step != 0 && *set_count % step == 0 {
                            warn!(
                                object_id = %obj.object_id(),
                                cond = %cond_id,
                                name = cond.name,
                                set_count = *set_count,
                                "Condition keeps getting set without being serviced"
                            );
                        }
                    }
                }
                CondInstance::Timer { remaining_ms, .. } => *remaining_ms = TIMER_EXPIRED,
            }
            was_set
        };
        self.trace(obj, TraceKind::CondSet { cond: cond_id });

        match target {
            Some(target) => {
                self.transition(obj, state, target, false)?;
            }
            None if !was_set => {
                let redo = self
                    .registry()
                    .resolve_rotary_cond(lifecycle.class_id(), state, cond_id)
                    .map(|r| r.entry.attrs.redo_presets)
                    .unwrap_or(false);
                if redo {
                    self.do_presets(obj, state);
                }
            }
            _ => {}
        }

        self.poke(obj);
        Ok(())
    }

    /// Ask for the condition in flight to be cleared when its crank completes
    ///
    /// Called by condition functions. A condition that never calls this stays
    /// set and runs again on the next crank.
    pub fn clear_current_cond(&self, obj: &O) -> Result<()> {
        self.check_object(obj)?;
        obj.lifecycle().lock_state().attrs.clear_current_cond = true;
        Ok(())
    }

    /// Clear a condition unconditionally
    ///
    /// Boolean counts drop to zero; timers are re-armed with their interval.
    pub fn force_clear_cond(&self, obj: &O, cond_id: CondId) -> Result<()> {
        self.check_object(obj)?;
        let (slot, _) = self.locate(obj, cond_id)?;
        {
            let mut conds = obj.lifecycle().lock_conds();
            match &mut conds[slot.pos][slot.seq] {
                CondInstance::Boolean {
                    set_count,
                    call_set_count,
                } => {
                    *set_count = 0;
                    *call_set_count = 0;
                }
                CondInstance::Timer {
                    interval_ms,
                    remaining_ms,
                } => *remaining_ms = *interval_ms,
            }
        }
        self.trace(obj, TraceKind::CondClear { cond: cond_id });
        Ok(())
    }

    /// Stop a timer; a stopped timer is neither decremented nor set
    pub fn stop_timer(&self, obj: &O, cond_id: CondId) -> Result<()> {
        self.check_object(obj)?;
        let (slot, cond) = self.locate(obj, cond_id)?;
        let mut conds = obj.lifecycle().lock_conds();
        match &mut conds[slot.pos][slot.seq] {
            CondInstance::Timer { remaining_ms, .. } => {
                *remaining_ms = 0;
                Ok(())
            }
            CondInstance::Boolean { .. } => Err(Error::Configuration(format!(
                "condition '{}' ({}) is not a timer",
                cond.name, cond_id
            ))),
        }
    }

    /// Arm a timer
    ///
    /// A non-zero request shorter than the compiled-in default is used as
    /// the interval; anything else falls back to the default. A timer that
    /// already expired keeps its pending fire. Returns the interval in effect.
    pub fn set_timer(&self, obj: &O, cond_id: CondId, requested_ms: u32) -> Result<u32> {
        self.check_object(obj)?;
        let (slot, cond) = self.locate(obj, cond_id)?;
        let default_ms = cond.timer_interval().ok_or_else(|| {
            Error::Configuration(format!("condition '{}' ({}) is not a timer", cond.name, cond_id))
        })?;
        let interval = if requested_ms != 0 && requested_ms < default_ms {
            requested_ms
        } else {
            default_ms
        };

        {
            let mut conds = obj.lifecycle().lock_conds();
            let instance = &mut conds[slot.pos][slot.seq];
            // An expired timer stays set until it is serviced
            let remaining_ms = if instance.is_set() {
                TIMER_EXPIRED
            } else {
                interval
            };
            *instance = CondInstance::Timer {
                interval_ms: interval,
                remaining_ms,
            };
        }
        debug!(object_id = %obj.object_id(), cond = %cond_id, interval_ms = interval, "Timer armed");
        Ok(interval)
    }

    /// Count every running timer down by `elapsed_ms`
    pub fn decrement_all_timers(&self, obj: &O, elapsed_ms: u64) {
        let elapsed = u32::try_from(elapsed_ms).unwrap_or(TIMER_EXPIRED);
        let mut conds = obj.lifecycle().lock_conds();
        for instance in conds.iter_mut().flatten() {
            if let CondInstance::Timer { remaining_ms, .. } = instance {
                if *remaining_ms == 0 || *remaining_ms == TIMER_EXPIRED {
                    continue;
                }
                if *remaining_ms <= elapsed {
                    *remaining_ms = TIMER_EXPIRED;
                } else {
                    *remaining_ms -= elapsed;
                }
            }
        }
    }

    /// Arm the preset conditions of every class's rotary for `state`
    ///
    /// Presets are set without clear bookkeeping and without a transition
    /// lookup. Returns the number of conditions armed.
    pub fn do_presets(&self, obj: &O, state: LifecycleState) -> usize {
        let lifecycle = obj.lifecycle();
        let mut armed = Vec::new();
        {
            let mut conds = lifecycle.lock_conds();
            for class_id in lifecycle.chain() {
                let Some(rotary) = self.registry().get(*class_id).and_then(|d| d.rotary_for(state))
                else {
                    continue;
                };
                for entry in rotary.conds.iter().filter(|e| e.attrs.preset) {
                    let Some(pos) = lifecycle.chain_index(entry.cond_id.class_id()) else {
                        continue;
                    };
                    let Some(instance) = conds[pos].get_mut(entry.cond_id.seq() as usize) else {
                        continue;
                    };
                    if instance.is_set() {
                        continue;
                    }
                    match instance {
                        CondInstance::Boolean { set_count, .. } => *set_count = 1,
                        CondInstance::Timer { remaining_ms, .. } => *remaining_ms = TIMER_EXPIRED,
                    }
                    armed.push(entry.cond_id);
                }
            }
        }

        if !armed.is_empty() {
            lifecycle.lock_state().reschedule_ms = 0;
        }
        for cond in &armed {
            self.trace(obj, TraceKind::CondPreset { cond: *cond });
        }
        armed.len()
    }

    /// Snapshot the set count of a condition about to run
    pub(crate) fn groom(&self, obj: &O, slot: CondSlot) {
        let mut conds = obj.lifecycle().lock_conds();
        if let CondInstance::Boolean {
            set_count,
            call_set_count,
        } = &mut conds[slot.pos][slot.seq]
        {
            *call_set_count = *set_count;
        }
    }

    /// Clear the sets observed at groom time; later sets survive
    pub(crate) fn clear_snapshot(&self, obj: &O, cond_id: CondId, slot: CondSlot) {
        {
            let mut conds = obj.lifecycle().lock_conds();
            match &mut conds[slot.pos][slot.seq] {
                CondInstance::Boolean {
                    set_count,
                    call_set_count,
                } => {
                    *set_count = set_count.saturating_sub(*call_set_count);
                    *call_set_count = 0;
                }
                CondInstance::Timer {
                    interval_ms,
                    remaining_ms,
                } => *remaining_ms = *interval_ms,
            }
        }
        self.trace(obj, TraceKind::CondClear { cond: cond_id });
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::lifecycle::instance::{CondInstance, TIMER_EXPIRED};
    use crate::lifecycle::state::LifecycleState;
    use crate::lifecycle::test_support::{
        Fixture, SchedCall, BASE, GO_READY, HEARTBEAT, INIT, KICK, LEAF, LEAF_WORK, WORK,
    };
    use crate::lifecycle::class::{BaseCondition, ClassDescriptor, ClassId, CondId};
    use crate::lifecycle::ports::LogLevel;
    use crate::lifecycle::registry::ClassRegistry;
    use crate::lifecycle::test_support::TestObject;
    use crate::config::LifecycleConfig;
    use crate::transport::MonitorPacket;
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_set_persists_until_cleared() {
        let fx = Fixture::new();
        let obj = fx.object(1, LEAF);

        assert!(!fx.engine.is_set(&obj, WORK).unwrap());
        fx.engine.set_cond(&obj, WORK).unwrap();
        assert!(fx.engine.is_set(&obj, WORK).unwrap());
        assert!(fx.engine.is_set(&obj, WORK).unwrap());

        fx.engine.force_clear_cond(&obj, WORK).unwrap();
        assert!(!fx.engine.is_set(&obj, WORK).unwrap());

        // Setting outside a crank asks for a run
        assert_eq!(fx.scheduler.calls(), vec![SchedCall::Now(obj.id)]);
    }

    #[test]
    fn test_n_sets_then_n_clears() {
        let fx = Fixture::new();
        let obj = fx.object(2, LEAF);
        let (slot, _) = fx.engine.locate(&obj, WORK).unwrap();

        // One execution per set
        for _ in 0..5 {
            fx.engine.set_cond(&obj, WORK).unwrap();
            assert!(fx.engine.is_set(&obj, WORK).unwrap());
            fx.engine.groom(&obj, slot);
            fx.engine.clear_snapshot(&obj, WORK, slot);
            assert!(!fx.engine.is_set(&obj, WORK).unwrap());
        }
        assert_eq!(
            obj.lifecycle.cond_instance(WORK),
            Some(CondInstance::Boolean { set_count: 0, call_set_count: 0 })
        );
    }

    #[test]
    fn test_n_sets_absorbed_by_one_execution() {
        let fx = Fixture::new();
        let obj = fx.object(16, LEAF);
        let (slot, _) = fx.engine.locate(&obj, WORK).unwrap();

        for _ in 0..5 {
            fx.engine.set_cond(&obj, WORK).unwrap();
        }
        fx.engine.groom(&obj, slot);
        fx.engine.clear_snapshot(&obj, WORK, slot);
        assert!(!fx.engine.is_set(&obj, WORK).unwrap());

        // A second clear has nothing left to take
        fx.engine.clear_snapshot(&obj, WORK, slot);
        assert_eq!(
            obj.lifecycle.cond_instance(WORK),
            Some(CondInstance::Boolean { set_count: 0, call_set_count: 0 })
        );
    }

    #[test]
    fn test_concurrent_sets_during_cranks_are_not_lost() {
        const WORKERS: u32 = 4;
        const SETS: u32 = 250;

        let fx = Fixture::new();
        let obj = fx.object(17, LEAF);
        // Service the specialize preset first
        fx.engine.crank(&obj, Arc::new(MonitorPacket::new())).unwrap();
        assert_eq!(obj.runs(), vec![INIT]);

        let workers: Vec<_> = (0..WORKERS)
            .map(|_| {
                let engine = fx.engine.clone();
                let obj = Arc::clone(&obj);
                thread::spawn(move || {
                    for _ in 0..SETS {
                        engine.set_cond(&obj, WORK).unwrap();
                    }
                })
            })
            .collect();

        while !workers.iter().all(|w| w.is_finished()) {
            fx.engine.crank(&obj, Arc::new(MonitorPacket::new())).unwrap();
        }
        for worker in workers {
            worker.join().unwrap();
        }

        let mut drains = 0;
        while fx.engine.is_set(&obj, WORK).unwrap() {
            fx.engine.crank(&obj, Arc::new(MonitorPacket::new())).unwrap();
            drains += 1;
            assert!(drains < 10, "WORK never drained");
        }

        // Every set was absorbed by exactly one groomed snapshot
        assert_eq!(obj.serviced(WORK), u64::from(WORKERS * SETS));
        assert_eq!(
            obj.lifecycle.cond_instance(WORK),
            Some(CondInstance::Boolean { set_count: 0, call_set_count: 0 })
        );
    }

    #[test]
    fn test_set_during_execution_survives_clear() {
        let fx = Fixture::new();
        let obj = fx.object(3, LEAF);
        let (slot, _) = fx.engine.locate(&obj, WORK).unwrap();

        fx.engine.set_cond(&obj, WORK).unwrap();
        fx.engine.groom(&obj, slot);
        fx.engine.set_cond(&obj, WORK).unwrap();
        fx.engine.clear_snapshot(&obj, WORK, slot);

        assert_eq!(
            obj.lifecycle.cond_instance(WORK),
            Some(CondInstance::Boolean { set_count: 1, call_set_count: 0 })
        );
    }

    #[test]
    fn test_preset_then_clear_does_not_underflow() {
        let fx = Fixture::new();
        let obj = fx.object(4, LEAF);
        let (slot, _) = fx.engine.locate(&obj, INIT).unwrap();

        assert_eq!(fx.engine.do_presets(&obj, LifecycleState::Specialize), 1);
        // Clear without a groom removes nothing
        fx.engine.clear_snapshot(&obj, INIT, slot);
        assert!(fx.engine.is_set(&obj, INIT).unwrap());

        // Presetting an already set condition does nothing
        assert_eq!(fx.engine.do_presets(&obj, LifecycleState::Specialize), 0);

        fx.engine.groom(&obj, slot);
        fx.engine.clear_snapshot(&obj, INIT, slot);
        fx.engine.clear_snapshot(&obj, INIT, slot);
        assert_eq!(
            obj.lifecycle.cond_instance(INIT),
            Some(CondInstance::Boolean { set_count: 0, call_set_count: 0 })
        );
    }

    #[test]
    fn test_presets_shorten_reschedule() {
        let fx = Fixture::new();
        let obj = fx.object(5, LEAF);
        obj.lifecycle.lock_state().reschedule_ms = 3000;
        fx.engine.do_presets(&obj, LifecycleState::Specialize);
        assert_eq!(obj.lifecycle.snapshot().reschedule_ms, 0);
    }

    #[test]
    fn test_timer_round_trip() {
        let fx = Fixture::new();
        let obj = fx.object(6, LEAF);

        assert_eq!(fx.engine.set_timer(&obj, HEARTBEAT, 500).unwrap(), 500);
        fx.engine.decrement_all_timers(&obj, 300);
        assert!(!fx.engine.is_set(&obj, HEARTBEAT).unwrap());
        fx.engine.decrement_all_timers(&obj, 199);
        assert!(!fx.engine.is_set(&obj, HEARTBEAT).unwrap());
        fx.engine.decrement_all_timers(&obj, 1);
        assert!(fx.engine.is_set(&obj, HEARTBEAT).unwrap());

        // Stays set however long it waits
        fx.engine.decrement_all_timers(&obj, 10_000);
        assert!(fx.engine.is_set(&obj, HEARTBEAT).unwrap());

        // Clearing re-arms with the effective interval
        fx.engine.force_clear_cond(&obj, HEARTBEAT).unwrap();
        assert_eq!(
            obj.lifecycle.cond_instance(HEARTBEAT),
            Some(CondInstance::Timer { interval_ms: 500, remaining_ms: 500 })
        );
    }

    #[test]
    fn test_set_timer_interval_selection() {
        let fx = Fixture::new();
        let obj = fx.object(7, LEAF);
        let default_ms = 1000;

        assert_eq!(fx.engine.set_timer(&obj, HEARTBEAT, 0).unwrap(), default_ms);
        assert_eq!(fx.engine.set_timer(&obj, HEARTBEAT, 5000).unwrap(), default_ms);
        assert_eq!(fx.engine.set_timer(&obj, HEARTBEAT, 250).unwrap(), 250);
        assert_matches!(
            fx.engine.set_timer(&obj, WORK, 100),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_set_timer_keeps_expired_timer_set() {
        let fx = Fixture::new();
        let obj = fx.object(18, LEAF);

        fx.engine.decrement_all_timers(&obj, 5000);
        assert!(fx.engine.is_set(&obj, HEARTBEAT).unwrap());

        assert_eq!(fx.engine.set_timer(&obj, HEARTBEAT, 250).unwrap(), 250);
        assert_eq!(
            obj.lifecycle.cond_instance(HEARTBEAT),
            Some(CondInstance::Timer { interval_ms: 250, remaining_ms: TIMER_EXPIRED })
        );

        // Servicing re-arms with the new interval
        fx.engine.force_clear_cond(&obj, HEARTBEAT).unwrap();
        assert_eq!(
            obj.lifecycle.cond_instance(HEARTBEAT),
            Some(CondInstance::Timer { interval_ms: 250, remaining_ms: 250 })
        );
    }

    #[test]
    fn test_forbidden_transition_leaves_condition_unset() {
        let recover = CondId::new(BASE, 0);
        let mut reg: ClassRegistry<TestObject> = ClassRegistry::new();
        reg.register(
            ClassDescriptor::root(BASE, "base").base_cond(
                BaseCondition::boolean(recover, "recover")
                    .transition(LifecycleState::Fail, LifecycleState::Ready),
            ),
        )
        .unwrap();
        let fx = Fixture::with_registry(reg);
        let obj = fx.object(19, BASE);
        fx.engine.force_set_state(&obj, LifecycleState::Fail).unwrap();
        fx.engine.set_state(&obj, LifecycleState::Fail).unwrap();
        let sched_calls = fx.scheduler.calls().len();

        // The default table does not allow fail -> ready
        assert_matches!(
            fx.engine.set_cond(&obj, recover),
            Err(Error::InvalidTransition {
                from: LifecycleState::Fail,
                to: LifecycleState::Ready,
                ..
            })
        );
        assert!(!fx.engine.is_set(&obj, recover).unwrap());
        assert_eq!(obj.lifecycle.state(), LifecycleState::Fail);
        assert_eq!(fx.scheduler.calls().len(), sched_calls);
        assert_eq!(fx.sink.lines_at(LogLevel::Error).len(), 1);
    }

    #[test]
    fn test_stop_timer() {
        let fx = Fixture::new();
        let obj = fx.object(8, LEAF);

        fx.engine.stop_timer(&obj, HEARTBEAT).unwrap();
        fx.engine.decrement_all_timers(&obj, 5000);
        assert_eq!(
            obj.lifecycle.cond_instance(HEARTBEAT),
            Some(CondInstance::Timer { interval_ms: 1000, remaining_ms: 0 })
        );

        // Setting a stopped timer still works
        fx.engine.set_cond(&obj, HEARTBEAT).unwrap();
        assert_eq!(
            obj.lifecycle.cond_instance(HEARTBEAT),
            Some(CondInstance::Timer { interval_ms: 1000, remaining_ms: TIMER_EXPIRED })
        );
    }

    #[test]
    fn test_condition_outside_hierarchy() {
        let fx = Fixture::new();
        let base_obj = fx.object(9, BASE);

        assert_matches!(
            fx.engine.set_cond(&base_obj, LEAF_WORK),
            Err(Error::ConditionNotFound { class_id: BASE, .. })
        );
        assert_matches!(
            fx.engine.is_set(&base_obj, CondId::new(ClassId(42), 0)),
            Err(Error::ConditionNotFound { .. })
        );
        assert!(fx.scheduler.calls().is_empty());
    }

    #[test]
    fn test_no_set_condition_drives_transition() {
        let fx = Fixture::new();
        let obj = fx.object(10, LEAF);

        fx.engine.set_cond(&obj, GO_READY).unwrap();
        assert!(!fx.engine.is_set(&obj, GO_READY).unwrap());
        assert_eq!(obj.lifecycle.state(), LifecycleState::PendingReady);

        let events = fx.notifier.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from, LifecycleState::Specialize);
        assert_eq!(events[0].to, LifecycleState::PendingReady);
        assert!(!events[0].forced);
    }

    #[test]
    fn test_redo_presets_on_first_set() {
        let fx = Fixture::new();
        let obj = fx.object(11, LEAF);

        // KICK carries redo-presets in the Specialize rotary
        fx.engine.set_cond(&obj, KICK).unwrap();
        assert!(fx.engine.is_set(&obj, INIT).unwrap());

        // Already set: presets are not re-applied
        fx.engine.force_clear_cond(&obj, INIT).unwrap();
        fx.engine.set_cond(&obj, KICK).unwrap();
        assert!(!fx.engine.is_set(&obj, INIT).unwrap());
    }

    #[test]
    fn test_runaway_set_count_keeps_counting() {
        let fx = Fixture::with_config(LifecycleConfig {
            runaway_set_warn_step: 3,
            ..LifecycleConfig::default()
        });
        let obj = fx.object(12, LEAF);
        for _ in 0..7 {
            fx.engine.set_cond(&obj, WORK).unwrap();
        }
        assert_matches!(
            obj.lifecycle.cond_instance(WORK),
            Some(CondInstance::Boolean { set_count: 7, .. })
        );
    }

    #[test]
    fn test_destroyed_object_rejected() {
        let fx = Fixture::new();
        let obj = fx.object(13, LEAF);
        obj.lifecycle.destroy();
        assert_matches!(
            fx.engine.set_cond(&obj, WORK),
            Err(Error::CorruptInstance { .. })
        );
        assert_matches!(
            fx.engine.clear_current_cond(&obj),
            Err(Error::CorruptInstance { .. })
        );
    }
}
