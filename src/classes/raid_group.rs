//! RAID Group Class
//!
//! Sample leaf class derived from the base object. It checks its geometry
//! while specializing and then walks itself to Ready (or Fail), runs a
//! periodic background verify while Ready, and overrides the base heartbeat.
//! No real RAID work happens here.

use crate::classes::base_object::{self, clear_and_done, request};
use crate::error::Result;
use crate::lifecycle::class::{
    BaseCondition, ClassDescriptor, ClassId, CondContext, CondId, LifecycleStatus, RotaryCond,
};
use crate::lifecycle::engine::LifecycleEngine;
use crate::lifecycle::instance::ObjectLifecycle;
use crate::lifecycle::ports::{LifecycleObject, ObjectId};
use crate::lifecycle::state::LifecycleState;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub const CLASS_ID: ClassId = ClassId(2);
pub const NAME: &str = "raid_group";

pub const VERIFY_GEOMETRY: CondId = CondId::new(CLASS_ID, 0);
pub const BACKGROUND_VERIFY: CondId = CondId::new(CLASS_ID, 1);

/// Background verify period
pub const BACKGROUND_VERIFY_INTERVAL_MS: u32 = 1000;

/// Widest group accepted by the geometry check
pub const MAX_WIDTH: u32 = 16;

// =============================================================================
// RAID Group Object
// =============================================================================

/// Managed RAID group
pub struct RaidGroupObject {
    id: ObjectId,
    width: u32,
    lifecycle: ObjectLifecycle,
    verify_passes: AtomicU64,
    heartbeats: AtomicU64,
}

/// Counters of work the RAID group has done
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidGroupStats {
    pub verify_passes: u64,
    pub heartbeats: u64,
}

impl RaidGroupObject {
    pub fn new(engine: &LifecycleEngine<Self>, id: ObjectId, width: u32) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            id,
            width,
            lifecycle: engine.create_lifecycle(CLASS_ID)?,
            verify_passes: AtomicU64::new(0),
            heartbeats: AtomicU64::new(0),
        }))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn stats(&self) -> RaidGroupStats {
        RaidGroupStats {
            verify_passes: self.verify_passes.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
        }
    }
}

impl LifecycleObject for RaidGroupObject {
    fn lifecycle(&self) -> &ObjectLifecycle {
        &self.lifecycle
    }

    fn object_id(&self) -> ObjectId {
        self.id
    }
}

// =============================================================================
// Condition Functions
// =============================================================================

fn verify_geometry(ctx: &CondContext<'_, RaidGroupObject>) -> LifecycleStatus {
    let rg = ctx.object;
    if rg.width == 0 || rg.width > MAX_WIDTH {
        warn!(object_id = %rg.id, width = rg.width, "RAID group geometry rejected");
        request(ctx, base_object::GO_FAIL);
    } else {
        info!(object_id = %rg.id, width = rg.width, "RAID group geometry verified");
        request(ctx, base_object::GO_READY);
    }
    clear_and_done(ctx)
}

fn background_verify(ctx: &CondContext<'_, RaidGroupObject>) -> LifecycleStatus {
    ctx.object.verify_passes.fetch_add(1, Ordering::Relaxed);
    clear_and_done(ctx)
}

fn heartbeat(ctx: &CondContext<'_, RaidGroupObject>) -> LifecycleStatus {
    ctx.object.heartbeats.fetch_add(1, Ordering::Relaxed);
    clear_and_done(ctx)
}

/// Descriptor of the RAID group class
pub fn descriptor() -> ClassDescriptor<RaidGroupObject> {
    ClassDescriptor::derived(CLASS_ID, NAME, base_object::CLASS_ID)
        .base_cond(BaseCondition::boolean(VERIFY_GEOMETRY, "verify_geometry").function(verify_geometry))
        .base_cond(
            BaseCondition::timer(BACKGROUND_VERIFY, "background_verify", BACKGROUND_VERIFY_INTERVAL_MS)
                .function(background_verify),
        )
        .derived_cond(base_object::HEARTBEAT, heartbeat)
        .rotary(LifecycleState::Specialize, [RotaryCond::preset(VERIFY_GEOMETRY)])
        .rotary(
            LifecycleState::Ready,
            [
                RotaryCond::plain(base_object::HEARTBEAT),
                RotaryCond::plain(BACKGROUND_VERIFY),
            ],
        )
}
