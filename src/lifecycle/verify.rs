//! Static verification of class metadata
//!
//! Run when a class is registered (and again on demand). Every violation is
//! collected so a broken class reports all of its problems at once.

use crate::lifecycle::class::{BaseCondition, ClassDescriptor, ClassId, CondId};
use crate::lifecycle::instance::TIMER_EXPIRED;
use crate::lifecycle::registry::ClassRegistry;
use std::collections::HashSet;

/// Check one class descriptor against its (already registered) ancestors.
///
/// The descriptor itself need not be registered yet.
pub(crate) fn check_class<O>(registry: &ClassRegistry<O>, desc: &ClassDescriptor<O>) -> Vec<String> {
    let mut violations = Vec::new();

    check_base_conds(desc, &mut violations);
    check_derived_conds(registry, desc, &mut violations);
    check_rotaries(registry, desc, &mut violations);

    violations
}

fn check_base_conds<O>(desc: &ClassDescriptor<O>, violations: &mut Vec<String>) {
    for (pos, cond) in desc.base_conds.iter().enumerate() {
        if cond.id.class_id() != desc.class_id {
            violations.push(format!(
                "condition '{}' ({}) is owned by class {} but encodes class {}",
                cond.name,
                cond.id,
                desc.class_id,
                cond.id.class_id()
            ));
        }
        if cond.id.seq() as usize != pos {
            violations.push(format!(
                "condition '{}' ({}) sits at position {} but encodes sequence {}",
                cond.name,
                cond.id,
                pos,
                cond.id.seq()
            ));
        }
        if cond.no_set && cond.function.is_some() {
            violations.push(format!(
                "no-set condition '{}' ({}) must not carry a function",
                cond.name, cond.id
            ));
        }
        match cond.timer_interval() {
            Some(0) => violations.push(format!(
                "timer condition '{}' ({}) has a zero interval",
                cond.name, cond.id
            )),
            // Reserved as the expired marker; the timer could never count down
            Some(TIMER_EXPIRED) => violations.push(format!(
                "timer condition '{}' ({}) interval {} is reserved",
                cond.name, cond.id, TIMER_EXPIRED
            )),
            _ => {}
        }
    }
}

fn check_derived_conds<O>(
    registry: &ClassRegistry<O>,
    desc: &ClassDescriptor<O>,
    violations: &mut Vec<String>,
) {
    let mut seen = HashSet::new();
    for derived in &desc.derived_conds {
        if !seen.insert(derived.id) {
            violations.push(format!("condition {} is overridden twice", derived.id));
        }
        if derived.id.class_id() == desc.class_id {
            violations.push(format!(
                "condition {} is owned by this class and cannot be overridden here",
                derived.id
            ));
            continue;
        }
        match ancestor_cond(registry, desc, derived.id) {
            Some(cond) if cond.no_set => violations.push(format!(
                "no-set condition '{}' ({}) cannot be overridden",
                cond.name, derived.id
            )),
            Some(_) => {}
            None => violations.push(format!(
                "override of {} does not match any ancestor condition",
                derived.id
            )),
        }
    }
}

fn check_rotaries<O>(
    registry: &ClassRegistry<O>,
    desc: &ClassDescriptor<O>,
    violations: &mut Vec<String>,
) {
    let mut states = HashSet::new();
    for rotary in &desc.rotaries {
        if !states.insert(rotary.state) {
            violations.push(format!("state {} has more than one rotary", rotary.state));
        }

        let mut listed = HashSet::new();
        for entry in &rotary.conds {
            let cond_id = entry.cond_id;
            if !listed.insert(cond_id) {
                violations.push(format!(
                    "rotary for {} lists condition {} twice",
                    rotary.state, cond_id
                ));
            }

            let owner = cond_id.class_id();
            let cond = if owner == desc.class_id {
                desc.owned_cond(cond_id)
            } else {
                ancestor_cond(registry, desc, cond_id)
            };

            let Some(cond) = cond else {
                violations.push(format!(
                    "rotary for {} references {} which is neither local nor an ancestor's",
                    rotary.state, cond_id
                ));
                continue;
            };

            if cond.no_set {
                if owner != desc.class_id {
                    violations.push(format!(
                        "no-set condition '{}' ({}) is not allowed in a derived class rotary",
                        cond.name, cond_id
                    ));
                }
                if entry.attrs.preset {
                    violations.push(format!(
                        "no-set condition '{}' ({}) cannot be a preset",
                        cond.name, cond_id
                    ));
                }
            }
        }
    }
}

/// Look a condition up among the ancestors of `desc`
fn ancestor_cond<'a, O>(
    registry: &'a ClassRegistry<O>,
    desc: &ClassDescriptor<O>,
    cond_id: CondId,
) -> Option<&'a BaseCondition<O>> {
    let parent: ClassId = desc.parent?;
    if !registry.is_in_chain(parent, cond_id.class_id()) {
        return None;
    }
    registry.get(cond_id.class_id())?.owned_cond(cond_id)
}
