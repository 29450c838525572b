//! Object Lifecycle Engine
//!
//! Generic, inheritance-aware state machine and condition scheduler embedded
//! in every managed object. Classes describe conditions and per-state
//! rotaries; each object carries its own condition instances and state; a
//! crank services one set condition (or one transition) at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐   crank(obj, carrier)   ┌─────────────────────┐
//! │ MonitorScheduler   │ ──────────────────────▶ │  LifecycleEngine    │
//! │ (external)         │ ◀────────────────────── │  condition/crank/   │
//! └────────────────────┘  run_now / run_after    │  transition/trace   │
//!                                                 └──────────┬──────────┘
//!                                                            │
//!                              ┌─────────────────────────────┼───────────────┐
//!                              ▼                             ▼               ▼
//!                     ┌────────────────┐          ┌─────────────────┐ ┌─────────────┐
//!                     │ ClassRegistry  │          │ ObjectLifecycle │ │ Notification│
//!                     │ (immutable)    │          │ (per object)    │ │ / Log sinks │
//!                     └────────────────┘          └─────────────────┘ └─────────────┘
//! ```

pub mod class;
pub mod condition;
pub mod crank;
pub mod engine;
pub mod instance;
pub mod ports;
pub mod registry;
pub mod state;
pub mod trace;
pub mod transition;
mod verify;

#[cfg(test)]
pub(crate) mod test_support;

pub use class::{
    BaseCondition, ClassDescriptor, ClassId, CondContext, CondFn, CondId, CondKind, CondType,
    DerivedCondition, LifecycleStatus, Rotary, RotaryAttrs, RotaryCond,
};
pub use crank::CrankOutcome;
pub use engine::LifecycleEngine;
pub use instance::{CondInstance, LifecycleSnapshot, ObjectLifecycle, StateAttrs, TIMER_EXPIRED};
pub use ports::{
    Carrier, CarrierRef, CarrierStatus, Clock, Completion, LifecycleObject, LogLevel, LogSink,
    ManualClock, MonitorScheduler, NotificationSink, ObjectId, StateChangeEvent, SystemClock,
};
pub use registry::{ClassRegistry, ResolvedCond};
pub use state::{LifecycleState, StateDescriptor, StateTable};
pub use trace::{TraceEntry, TraceFlags, TraceKind, TraceRing, MIN_TRACE_CAPACITY};
pub use transition::TransitionOutcome;
