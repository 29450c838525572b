//! Crank Scheduler
//!
//! One crank services at most one thing: the first set condition found
//! scanning the current state's rotaries from the root class down, or the
//! Pending-state follow-through transition, or the report that a destroyed
//! object can go away.
//!
//! The crank finishes through a continuation pushed on the carrier, so a
//! condition function that returns [`LifecycleStatus::Pending`] completes the
//! crank later simply by completing the carrier.

use crate::error::{Error, Result};
use crate::lifecycle::class::{CondContext, CondId, LifecycleStatus};
use crate::lifecycle::condition::CondSlot;
use crate::lifecycle::engine::LifecycleEngine;
use crate::lifecycle::ports::{Carrier, CarrierRef, CarrierStatus, LifecycleObject};
use crate::lifecycle::state::LifecycleState;
use crate::lifecycle::trace::TraceKind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How a crank ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrankOutcome {
    /// A condition function issued asynchronous work; the carrier completes later
    Pending,
    /// The crank finished and the object was rescheduled
    Completed,
    /// The object is in its terminal state with nothing left to do
    Destroyed,
}

impl<O: LifecycleObject> LifecycleEngine<O> {
    /// Run one crank of `obj` on `carrier`
    pub fn crank(&self, obj: &Arc<O>, carrier: CarrierRef) -> Result<CrankOutcome> {
        if let Err(e) = self.check_object(obj) {
            self.fail_carrier(&carrier);
            return Err(e);
        }

        let now = self.now_ms();
        let (state, elapsed, just_changed) = {
            let mut st = obj.lifecycle().lock_state();
            if st.attrs.cranking {
                drop(st);
                debug!(object_id = %obj.object_id(), "Crank already in flight");
                self.fail_carrier(&carrier);
                return Err(Error::CrankInProgress {
                    object_id: obj.object_id(),
                });
            }
            st.attrs.cranking = true;
            st.carrier = Some(Arc::clone(&carrier));
            st.reschedule_ms = self.config().default_reschedule_ms;
            let elapsed = st
                .last_crank_ms
                .map(|last| now.saturating_sub(last))
                .unwrap_or(0);
            let just_changed = std::mem::take(&mut st.attrs.state_just_changed);
            (st.state, elapsed, just_changed)
        };

        self.metrics().record_crank();
        self.trace(obj, TraceKind::CrankBegin { state });

        match self.crank_inner(obj, &carrier, state, elapsed, just_changed) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(object_id = %obj.object_id(), error = %e, "Crank failed");
                self.abort_crank(obj, &carrier);
                Err(e)
            }
        }
    }

    fn crank_inner(
        &self,
        obj: &Arc<O>,
        carrier: &CarrierRef,
        state: LifecycleState,
        elapsed: u64,
        just_changed: bool,
    ) -> Result<CrankOutcome> {
        if elapsed > 0 {
            self.decrement_all_timers(obj, elapsed);
        }
        if just_changed {
            self.do_presets(obj, state);
        }

        if let Some((cond_id, slot)) = self.first_set_cond(obj, state) {
            return self.run_cond(obj, carrier, state, cond_id, slot);
        }

        if state == LifecycleState::TERMINAL {
            self.release_crank(obj);
            self.metrics().record_destroyed();
            self.trace(obj, TraceKind::CrankEnd { reschedule_ms: 0 });
            debug!(object_id = %obj.object_id(), "Object has nothing left to do in destroy");
            if carrier.status() == CarrierStatus::InFlight {
                carrier.set_status(CarrierStatus::Ok);
            }
            carrier.complete();
            return Ok(CrankOutcome::Destroyed);
        }

        if let Some(next) = self.registry().state_table().next_state(state) {
            if next != state {
                // Pending work is done; commit shortens the interval to 0
                self.commit_state(obj, state, next, false)?;
            }
        }

        self.finish_sync(obj, carrier);
        Ok(CrankOutcome::Completed)
    }

    /// First set condition, scanning each class's rotary root to leaf
    fn first_set_cond(&self, obj: &O, state: LifecycleState) -> Option<(CondId, CondSlot)> {
        let lifecycle = obj.lifecycle();
        let conds = lifecycle.lock_conds();
        for class_id in lifecycle.chain() {
            let Some(rotary) = self.registry().get(*class_id).and_then(|d| d.rotary_for(state)) else {
                continue;
            };
            for entry in &rotary.conds {
                let Some(pos) = lifecycle.chain_index(entry.cond_id.class_id()) else {
                    continue;
                };
                let seq = entry.cond_id.seq() as usize;
                if conds[pos].get(seq).map(|c| c.is_set()).unwrap_or(false) {
                    return Some((entry.cond_id, CondSlot { pos, seq }));
                }
            }
        }
        None
    }

    fn run_cond(
        &self,
        obj: &Arc<O>,
        carrier: &CarrierRef,
        state: LifecycleState,
        cond_id: CondId,
        slot: CondSlot,
    ) -> Result<CrankOutcome> {
        let function = self
            .registry()
            .resolve_rotary_cond(obj.lifecycle().class_id(), state, cond_id)
            .ok_or_else(|| self.internal(obj, format!("no rotary entry for set condition {}", cond_id)))?
            .function;

        self.groom(obj, slot);
        obj.lifecycle().lock_state().current_cond = Some(cond_id);
        self.push_crank_completion(obj, carrier);

        self.metrics().record_condition_run();
        self.trace(obj, TraceKind::CondRunBefore { cond: cond_id });

        let status = match function {
            Some(f) => f(&CondContext {
                engine: self,
                object: obj,
                carrier,
                cond_id,
            }),
            None => LifecycleStatus::Done,
        };
        self.trace(obj, TraceKind::CondRunAfter { cond: cond_id, status });

        match status {
            LifecycleStatus::Pending => {
                self.metrics().record_pending();
                return Ok(CrankOutcome::Pending);
            }
            LifecycleStatus::Reschedule => {
                obj.lifecycle().lock_state().reschedule_ms = 0;
            }
            LifecycleStatus::Done => {}
        }

        if carrier.status() == CarrierStatus::InFlight {
            carrier.set_status(CarrierStatus::Ok);
        }
        carrier.complete();
        Ok(CrankOutcome::Completed)
    }

    fn finish_sync(&self, obj: &Arc<O>, carrier: &CarrierRef) {
        self.push_crank_completion(obj, carrier);
        if carrier.status() == CarrierStatus::InFlight {
            carrier.set_status(CarrierStatus::Ok);
        }
        carrier.complete();
    }

    fn push_crank_completion(&self, obj: &Arc<O>, carrier: &CarrierRef) {
        let engine = self.clone();
        let object = Arc::clone(obj);
        carrier.push_completion(Box::new(move |carrier: &dyn Carrier| {
            engine.crank_complete(&object, carrier);
        }));
    }

    /// Finish a crank: clear the serviced condition if asked, release the
    /// crank and reschedule the object
    fn crank_complete(&self, obj: &O, carrier: &dyn Carrier) {
        let lifecycle = obj.lifecycle();
        if !lifecycle.is_valid() {
            warn!(object_id = %obj.object_id(), "Crank completed on a destroyed object");
            return;
        }

        let (cond, clear) = {
            let mut st = lifecycle.lock_state();
            (
                st.current_cond.take(),
                std::mem::take(&mut st.attrs.clear_current_cond),
            )
        };
        if let (Some(cond_id), true) = (cond, clear) {
            match self.locate(obj, cond_id) {
                Ok((slot, _)) => self.clear_snapshot(obj, cond_id, slot),
                Err(e) => warn!(object_id = %obj.object_id(), error = %e, "Could not clear serviced condition"),
            }
        }

        let now = self.now_ms();
        let delay_ms = {
            let mut st = lifecycle.lock_state();
            st.attrs.cranking = false;
            st.carrier = None;
            st.last_crank_ms = Some(now);
            st.reschedule_ms.min(self.config().max_reschedule_ms)
        };

        if carrier.status() == CarrierStatus::Failed {
            self.metrics().record_failure();
        }
        self.metrics().record_crank_end(now);
        self.trace(obj, TraceKind::CrankEnd { reschedule_ms: delay_ms });

        if delay_ms == 0 {
            self.scheduler().run_now(obj.object_id());
        } else {
            self.scheduler()
                .run_after(obj.object_id(), Duration::from_millis(delay_ms));
        }
    }

    /// Ask for the object to be cranked within `delay_ms`
    ///
    /// During a crank this only shortens the interval the crank reschedules
    /// with; otherwise the scheduler is asked directly.
    pub fn reschedule(&self, obj: &O, delay_ms: u64) -> Result<()> {
        self.check_object(obj)?;
        let cranking = {
            let mut st = obj.lifecycle().lock_state();
            if st.attrs.cranking {
                st.reschedule_ms = st.reschedule_ms.min(delay_ms);
            }
            st.attrs.cranking
        };
        self.trace(obj, TraceKind::Reschedule { delay_ms });

        if !cranking {
            if delay_ms == 0 {
                self.scheduler().run_now(obj.object_id());
            } else {
                self.scheduler()
                    .run_after(obj.object_id(), Duration::from_millis(delay_ms));
            }
        }
        Ok(())
    }

    fn release_crank(&self, obj: &O) {
        let mut st = obj.lifecycle().lock_state();
        st.attrs.cranking = false;
        st.carrier = None;
        st.current_cond = None;
        st.attrs.clear_current_cond = false;
    }

    /// Fail a crank this caller owns
    ///
    /// Completes through the normal crank completion, so the object is
    /// released and rescheduled like after any other crank.
    fn abort_crank(&self, obj: &Arc<O>, carrier: &CarrierRef) {
        {
            let mut st = obj.lifecycle().lock_state();
            st.current_cond = None;
            st.attrs.clear_current_cond = false;
        }
        self.push_crank_completion(obj, carrier);
        carrier.set_status(CarrierStatus::Failed);
        carrier.complete();
    }

    fn fail_carrier(&self, carrier: &CarrierRef) {
        self.metrics().record_failure();
        carrier.set_status(CarrierStatus::Failed);
        carrier.complete();
    }
}
