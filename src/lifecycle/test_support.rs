//! Shared fixtures for lifecycle unit tests

use crate::config::LifecycleConfig;
use crate::lifecycle::class::{
    BaseCondition, ClassDescriptor, ClassId, CondContext, CondId, LifecycleStatus, RotaryAttrs,
    RotaryCond,
};
use crate::lifecycle::engine::LifecycleEngine;
use crate::lifecycle::instance::{CondInstance, ObjectLifecycle};
use crate::lifecycle::ports::{
    CarrierRef, CarrierStatus, LifecycleObject, LogLevel, LogSink, ManualClock, MonitorScheduler,
    NotificationSink, ObjectId, StateChangeEvent,
};
use crate::lifecycle::registry::ClassRegistry;
use crate::lifecycle::state::{LifecycleState, StateTable};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const BASE: ClassId = ClassId(1);
pub const LEAF: ClassId = ClassId(2);

pub const INIT: CondId = CondId::new(BASE, 0);
pub const KICK: CondId = CondId::new(BASE, 1);
pub const WORK: CondId = CondId::new(BASE, 2);
pub const HEARTBEAT: CondId = CondId::new(BASE, 3);
pub const READY_PREP: CondId = CondId::new(BASE, 4);
pub const GO_READY: CondId = CondId::new(BASE, 5);
pub const GO_DESTROY: CondId = CondId::new(BASE, 6);
pub const LEAF_WORK: CondId = CondId::new(LEAF, 0);

// =============================================================================
// Test Object
// =============================================================================

/// What a scripted condition function does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Clear and return Done
    Clear,
    /// Return Done without clearing
    Keep,
    /// Set itself again, clear, return Done
    SetSelfAndClear,
    /// Clear, keep the carrier for later, return Pending
    Park,
    /// Clear and return Reschedule
    Reschedule,
    /// Clear, ask for a run within 500ms, return Done
    Reschedule500,
}

pub struct TestObject {
    pub id: ObjectId,
    pub lifecycle: ObjectLifecycle,
    runs: Mutex<Vec<CondId>>,
    derived_runs: Mutex<Vec<CondId>>,
    /// Sets absorbed per condition, summed from the groomed snapshots
    serviced: Mutex<HashMap<CondId, u64>>,
    steps: Mutex<HashMap<CondId, Step>>,
    parked: Mutex<Option<CarrierRef>>,
}

impl TestObject {
    pub fn runs(&self) -> Vec<CondId> {
        self.runs.lock().clone()
    }

    pub fn derived_runs(&self) -> Vec<CondId> {
        self.derived_runs.lock().clone()
    }

    pub fn serviced(&self, cond: CondId) -> u64 {
        self.serviced.lock().get(&cond).copied().unwrap_or(0)
    }

    pub fn script(&self, cond: CondId, step: Step) {
        self.steps.lock().insert(cond, step);
    }

    /// Finish the asynchronous work of a parked condition
    pub fn complete_parked(&self) {
        let carrier = self.parked.lock().take().expect("no parked carrier");
        carrier.set_status(CarrierStatus::Ok);
        carrier.complete();
    }
}

impl LifecycleObject for TestObject {
    fn lifecycle(&self) -> &ObjectLifecycle {
        &self.lifecycle
    }

    fn object_id(&self) -> ObjectId {
        self.id
    }
}

fn scripted(ctx: &CondContext<'_, TestObject>) -> LifecycleStatus {
    let obj = ctx.object;
    obj.runs.lock().push(ctx.cond_id);
    if let Some(CondInstance::Boolean { call_set_count, .. }) = obj.lifecycle.cond_instance(ctx.cond_id) {
        *obj.serviced.lock().entry(ctx.cond_id).or_insert(0) += u64::from(call_set_count);
    }
    let step = obj
        .steps
        .lock()
        .get(&ctx.cond_id)
        .copied()
        .unwrap_or(Step::Clear);

    if step != Step::Keep {
        ctx.engine.clear_current_cond(obj).unwrap();
    }
    match step {
        Step::Clear | Step::Keep => LifecycleStatus::Done,
        Step::SetSelfAndClear => {
            ctx.engine.set_cond(obj, ctx.cond_id).unwrap();
            LifecycleStatus::Done
        }
        Step::Park => {
            *obj.parked.lock() = Some(Arc::clone(ctx.carrier));
            LifecycleStatus::Pending
        }
        Step::Reschedule => LifecycleStatus::Reschedule,
        Step::Reschedule500 => {
            ctx.engine.reschedule(obj, 500).unwrap();
            LifecycleStatus::Done
        }
    }
}

fn scripted_derived(ctx: &CondContext<'_, TestObject>) -> LifecycleStatus {
    ctx.object.derived_runs.lock().push(ctx.cond_id);
    scripted(ctx)
}

// =============================================================================
// Hierarchy
// =============================================================================

pub fn registry() -> ClassRegistry<TestObject> {
    registry_with_table(StateTable::default())
}

pub fn registry_with_table(table: StateTable) -> ClassRegistry<TestObject> {
    use LifecycleState::*;

    let mut reg = ClassRegistry::with_state_table(table);
    reg.register(
        ClassDescriptor::root(BASE, "base")
            .base_cond(BaseCondition::boolean(INIT, "init").function(scripted))
            .base_cond(BaseCondition::boolean(KICK, "kick").function(scripted))
            .base_cond(BaseCondition::boolean(WORK, "work").function(scripted))
            .base_cond(BaseCondition::timer(HEARTBEAT, "heartbeat", 1000).function(scripted))
            .base_cond(BaseCondition::boolean(READY_PREP, "ready_prep").function(scripted))
            .base_cond(
                BaseCondition::boolean(GO_READY, "go_ready")
                    .no_set()
                    .transitions_to([Specialize, Activate, Hibernate, Offline], Ready),
            )
            .base_cond(
                BaseCondition::boolean(GO_DESTROY, "go_destroy")
                    .no_set()
                    .transitions_to([Specialize, Activate, Ready, Hibernate, Offline, Fail], Destroy),
            )
            .rotary(
                Specialize,
                [
                    RotaryCond::preset(INIT),
                    RotaryCond::new(KICK, RotaryAttrs::REDO_PRESETS),
                    RotaryCond::plain(WORK),
                ],
            )
            .rotary(PendingReady, [RotaryCond::preset(READY_PREP)])
            .rotary(Ready, [RotaryCond::plain(HEARTBEAT), RotaryCond::plain(WORK)]),
    )
    .unwrap();
    reg.register(
        ClassDescriptor::derived(LEAF, "leaf", BASE)
            .base_cond(BaseCondition::boolean(LEAF_WORK, "leaf_work").function(scripted))
            .derived_cond(KICK, scripted_derived)
            .rotary(
                Specialize,
                [
                    RotaryCond::new(KICK, RotaryAttrs::REDO_PRESETS),
                    RotaryCond::plain(LEAF_WORK),
                ],
            )
            .rotary(Ready, [RotaryCond::plain(LEAF_WORK)]),
    )
    .unwrap();
    reg
}

// =============================================================================
// Recording Collaborators
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedCall {
    Now(ObjectId),
    After(ObjectId, Duration),
}

#[derive(Default)]
pub struct RecordingScheduler {
    calls: Mutex<Vec<SchedCall>>,
}

impl RecordingScheduler {
    pub fn calls(&self) -> Vec<SchedCall> {
        self.calls.lock().clone()
    }
}

impl MonitorScheduler for RecordingScheduler {
    fn run_now(&self, object_id: ObjectId) {
        self.calls.lock().push(SchedCall::Now(object_id));
    }

    fn run_after(&self, object_id: ObjectId, delay: Duration) {
        self.calls.lock().push(SchedCall::After(object_id, delay));
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<StateChangeEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<StateChangeEvent> {
        self.events.lock().clone()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, event: StateChangeEvent) {
        self.events.lock().push(event);
    }
}

#[derive(Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingSink {
    pub fn lines_at(&self, level: LogLevel) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line.clone())
            .collect()
    }
}

impl LogSink for RecordingSink {
    fn log(&self, level: LogLevel, _object_id: ObjectId, line: &str) {
        self.lines.lock().push((level, line.to_string()));
    }
}

// =============================================================================
// Fixture
// =============================================================================

pub struct Fixture {
    pub engine: LifecycleEngine<TestObject>,
    pub scheduler: Arc<RecordingScheduler>,
    pub notifier: Arc<RecordingNotifier>,
    pub sink: Arc<RecordingSink>,
    pub clock: Arc<ManualClock>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(registry(), LifecycleConfig::default())
    }

    pub fn with_config(config: LifecycleConfig) -> Self {
        Self::build(registry(), config)
    }

    pub fn with_registry(registry: ClassRegistry<TestObject>) -> Self {
        Self::build(registry, LifecycleConfig::default())
    }

    fn build(registry: ClassRegistry<TestObject>, config: LifecycleConfig) -> Self {
        let scheduler = Arc::new(RecordingScheduler::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let engine = LifecycleEngine::new(Arc::new(registry), scheduler.clone())
            .with_notifier(notifier.clone())
            .with_log_sink(sink.clone())
            .with_clock(clock.clone())
            .with_config(config);
        Self {
            engine,
            scheduler,
            notifier,
            sink,
            clock,
        }
    }

    pub fn object(&self, id: u32, class_id: ClassId) -> Arc<TestObject> {
        Arc::new(TestObject {
            id: ObjectId(id),
            lifecycle: self.engine.create_lifecycle(class_id).unwrap(),
            runs: Mutex::new(Vec::new()),
            derived_runs: Mutex::new(Vec::new()),
            serviced: Mutex::new(HashMap::new()),
            steps: Mutex::new(HashMap::new()),
            parked: Mutex::new(None),
        })
    }
}
