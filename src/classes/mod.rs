//! Sample Class Hierarchy
//!
//! A root `base_object` class and a `raid_group` leaf class. They exercise
//! every part of the engine (presets, no-set transitions, Pending states,
//! timers, derived overrides) and back the CLI and benches.

pub mod base_object;
pub mod raid_group;

pub use raid_group::{RaidGroupObject, RaidGroupStats};

use crate::error::Result;
use crate::lifecycle::registry::ClassRegistry;

/// Registry holding the sample hierarchy, verified
pub fn sample_registry() -> Result<ClassRegistry<RaidGroupObject>> {
    let mut registry = ClassRegistry::new();
    registry.register(base_object::descriptor())?;
    registry.register(raid_group::descriptor())?;
    Ok(registry)
}
