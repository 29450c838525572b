//! Base Object Class
//!
//! Root of every managed object hierarchy. It owns the no-set conditions that
//! drive the standard state changes, a preset that runs when an object is
//! specialized, a preset run in every Pending state, and a heartbeat timer
//! serviced while Ready. Derived classes override the functions they care
//! about and add their own conditions.

use crate::lifecycle::class::{
    BaseCondition, ClassDescriptor, ClassId, CondContext, CondId, LifecycleStatus, RotaryCond,
};
use crate::lifecycle::ports::LifecycleObject;
use crate::lifecycle::state::LifecycleState;
use tracing::{debug, warn};

pub const CLASS_ID: ClassId = ClassId(1);
pub const NAME: &str = "base_object";

pub const SPECIALIZE_INIT: CondId = CondId::new(CLASS_ID, 0);
pub const GO_ACTIVATE: CondId = CondId::new(CLASS_ID, 1);
pub const GO_READY: CondId = CondId::new(CLASS_ID, 2);
pub const GO_HIBERNATE: CondId = CondId::new(CLASS_ID, 3);
pub const GO_OFFLINE: CondId = CondId::new(CLASS_ID, 4);
pub const GO_FAIL: CondId = CondId::new(CLASS_ID, 5);
pub const GO_DESTROY: CondId = CondId::new(CLASS_ID, 6);
pub const PENDING_WORK: CondId = CondId::new(CLASS_ID, 7);
pub const HEARTBEAT: CondId = CondId::new(CLASS_ID, 8);

/// Default heartbeat period
pub const HEARTBEAT_INTERVAL_MS: u32 = 3000;

/// Clear the condition being serviced and report the work done
pub fn clear_and_done<O: LifecycleObject>(ctx: &CondContext<'_, O>) -> LifecycleStatus {
    if let Err(e) = ctx.engine.clear_current_cond(ctx.object) {
        warn!(object_id = %ctx.object.object_id(), cond = %ctx.cond_id, error = %e, "Could not clear condition");
    }
    LifecycleStatus::Done
}

/// Set `cond` on the object being serviced, logging failures
pub fn request<O: LifecycleObject>(ctx: &CondContext<'_, O>, cond: CondId) {
    if let Err(e) = ctx.engine.set_cond(ctx.object, cond) {
        warn!(object_id = %ctx.object.object_id(), cond = %cond, error = %e, "Could not set condition");
    }
}

fn specialize_init<O: LifecycleObject>(ctx: &CondContext<'_, O>) -> LifecycleStatus {
    debug!(object_id = %ctx.object.object_id(), "Specializing object");
    clear_and_done(ctx)
}

fn pending_work<O: LifecycleObject>(ctx: &CondContext<'_, O>) -> LifecycleStatus {
    debug!(
        object_id = %ctx.object.object_id(),
        state = %ctx.object.lifecycle().state(),
        "Pending work done"
    );
    clear_and_done(ctx)
}

fn heartbeat<O: LifecycleObject>(ctx: &CondContext<'_, O>) -> LifecycleStatus {
    clear_and_done(ctx)
}

/// Descriptor of the root class
pub fn descriptor<O: LifecycleObject>() -> ClassDescriptor<O> {
    use LifecycleState::*;

    let mut desc = ClassDescriptor::root(CLASS_ID, NAME)
        .base_cond(BaseCondition::boolean(SPECIALIZE_INIT, "specialize_init").function(specialize_init::<O>))
        .base_cond(
            BaseCondition::boolean(GO_ACTIVATE, "go_activate")
                .no_set()
                .transitions_to([Specialize, Ready, Hibernate, Offline, Fail], Activate),
        )
        .base_cond(
            BaseCondition::boolean(GO_READY, "go_ready")
                .no_set()
                .transitions_to([Specialize, Activate, Hibernate, Offline], Ready),
        )
        .base_cond(
            BaseCondition::boolean(GO_HIBERNATE, "go_hibernate")
                .no_set()
                .transitions_to([Activate, Ready], Hibernate),
        )
        .base_cond(
            BaseCondition::boolean(GO_OFFLINE, "go_offline")
                .no_set()
                .transitions_to([Specialize, Activate, Ready, Hibernate], Offline),
        )
        .base_cond(
            BaseCondition::boolean(GO_FAIL, "go_fail")
                .no_set()
                .transitions_to([Specialize, Activate, Ready, Hibernate, Offline], Fail),
        )
        .base_cond(
            BaseCondition::boolean(GO_DESTROY, "go_destroy")
                .no_set()
                .transitions_to([Specialize, Activate, Ready, Hibernate, Offline, Fail], Destroy),
        )
        .base_cond(BaseCondition::boolean(PENDING_WORK, "pending_work").function(pending_work::<O>))
        .base_cond(
            BaseCondition::timer(HEARTBEAT, "heartbeat", HEARTBEAT_INTERVAL_MS).function(heartbeat::<O>),
        )
        .rotary(Specialize, [RotaryCond::preset(SPECIALIZE_INIT)])
        .rotary(Ready, [RotaryCond::plain(HEARTBEAT)]);

    for pending in LifecycleState::ALL.iter().filter(|s| s.is_pending()) {
        desc = desc.rotary(*pending, [RotaryCond::preset(PENDING_WORK)]);
    }
    desc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::RaidGroupObject;
    use crate::lifecycle::registry::ClassRegistry;
    use crate::lifecycle::state::StateTable;

    #[test]
    fn test_base_descriptor_verifies() {
        let mut reg: ClassRegistry<RaidGroupObject> = ClassRegistry::new();
        reg.register(descriptor()).unwrap();
        assert_eq!(reg.class_hierarchy(CLASS_ID).unwrap(), vec![CLASS_ID]);
        assert_eq!(reg.get(CLASS_ID).unwrap().base_conds.len(), 9);
    }

    #[test]
    fn test_go_transitions_are_permitted() {
        let desc: ClassDescriptor<RaidGroupObject> = descriptor();
        let table = StateTable::default();
        for cond in desc.base_conds.iter().filter(|c| c.no_set) {
            for (from, to) in &cond.transitions {
                assert!(table.is_permitted(*from, *to), "{} {} -> {}", cond.name, from, to);
            }
        }
    }

    #[test]
    fn test_every_pending_state_has_work() {
        let desc: ClassDescriptor<RaidGroupObject> = descriptor();
        for state in LifecycleState::ALL.iter().filter(|s| s.is_pending()) {
            let rotary = desc.rotary_for(*state).unwrap();
            assert_eq!(rotary.conds, vec![RotaryCond::preset(PENDING_WORK)]);
        }
    }
}
