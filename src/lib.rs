//! Block Lifecycle - Object Lifecycle Engine for Block Services
//!
//! Generic, inheritance-aware finite-state machine and condition scheduler
//! that every managed block-services object (RAID group, LUN, drive, ...)
//! embeds to drive its own background processing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                          Monitor Service (tokio)                            │
//! │        object table · run-now / run-after requests · delayed wakeups        │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                             Lifecycle Engine                                │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │     Crank       │  │   Condition     │  │     State Transition        │  │
//! │  │   Scheduler     │  │    Engine       │  │        Engine               │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           └────────────────────┼─────────────────────────┘                  │
//! │                    ┌───────────┴───────────┐                                │
//! │                    │    Class Registry     │                                │
//! │                    │ (immutable, verified) │                                │
//! │                    └───────────────────────┘                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │   Carrier (MonitorPacket) · Notification sink · Log sink · Trace ring       │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`lifecycle`]: Class metadata, object instance state and the engine
//! - [`scheduler`]: Tokio monitor service and channel scheduler
//! - [`transport`]: In-process carrier
//! - [`notify`]: Notification and log sinks
//! - [`classes`]: Sample class hierarchy
//! - [`config`]: Configuration
//! - [`metrics`]: Crank counters
//! - [`error`]: Error types and handling

pub mod classes;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod notify;
pub mod scheduler;
pub mod transport;

// Re-export commonly used types
pub use classes::{sample_registry, RaidGroupObject, RaidGroupStats};

pub use config::{AppConfig, LifecycleConfig, MonitorConfig};

pub use error::{Error, ErrorCategory, Result};

pub use lifecycle::{
    BaseCondition, Carrier, CarrierRef, CarrierStatus, ClassDescriptor, ClassId, ClassRegistry,
    CondContext, CondId, CrankOutcome, LifecycleEngine, LifecycleObject, LifecycleState,
    LifecycleStatus, MonitorScheduler, NotificationSink, ObjectId, ObjectLifecycle, RotaryAttrs,
    RotaryCond, StateChangeEvent, StateTable, TraceEntry, TraceFlags, TransitionOutcome,
};

pub use metrics::{LifecycleMetrics, LifecycleStatsSnapshot};

pub use notify::{BroadcastNotifier, NullNotifier, TracingLogSink};

pub use scheduler::{ChannelScheduler, MonitorHandle, MonitorRequest, MonitorService};

pub use transport::MonitorPacket;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
