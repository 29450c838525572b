//! Lifecycle Engine
//!
//! Handle bundling the class registry with the collaborators every lifecycle
//! operation needs. It is cheap to clone; the condition, transition, crank
//! and trace operations are implemented on it in their own modules.

use crate::config::LifecycleConfig;
use crate::error::{Error, Result};
use crate::lifecycle::class::ClassId;
use crate::lifecycle::instance::ObjectLifecycle;
use crate::lifecycle::ports::{
    Clock, LifecycleObject, LogLevel, LogSink, MonitorScheduler, NotificationSink, ObjectId,
    SystemClock,
};
use crate::lifecycle::registry::ClassRegistry;
use crate::metrics::LifecycleMetrics;
use crate::notify::{NullNotifier, TracingLogSink};
use std::sync::Arc;
use tracing::error;

/// Lifecycle engine shared by every object of a registry
pub struct LifecycleEngine<O> {
    registry: Arc<ClassRegistry<O>>,
    scheduler: Arc<dyn MonitorScheduler>,
    notifier: Arc<dyn NotificationSink>,
    log_sink: Arc<dyn LogSink>,
    clock: Arc<dyn Clock>,
    config: Arc<LifecycleConfig>,
    metrics: Arc<LifecycleMetrics>,
}

impl<O> Clone for LifecycleEngine<O> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            scheduler: Arc::clone(&self.scheduler),
            notifier: Arc::clone(&self.notifier),
            log_sink: Arc::clone(&self.log_sink),
            clock: Arc::clone(&self.clock),
            config: Arc::clone(&self.config),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<O> LifecycleEngine<O> {
    /// Create an engine with default configuration, no notification sink,
    /// a tracing-backed log sink and the system clock
    pub fn new(registry: Arc<ClassRegistry<O>>, scheduler: Arc<dyn MonitorScheduler>) -> Self {
        Self {
            registry,
            scheduler,
            notifier: Arc::new(NullNotifier),
            log_sink: Arc::new(TracingLogSink),
            clock: Arc::new(SystemClock),
            config: Arc::new(LifecycleConfig::default()),
            metrics: Arc::new(LifecycleMetrics::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_log_sink(mut self, log_sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = log_sink;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: LifecycleConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<LifecycleMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &ClassRegistry<O> {
        &self.registry
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<LifecycleMetrics> {
        &self.metrics
    }

    pub(crate) fn scheduler(&self) -> &dyn MonitorScheduler {
        self.scheduler.as_ref()
    }

    pub(crate) fn notifier(&self) -> &dyn NotificationSink {
        self.notifier.as_ref()
    }

    pub(crate) fn log_sink(&self) -> &dyn LogSink {
        self.log_sink.as_ref()
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Hand a fault line to the log sink; sinks always receive faults
    pub(crate) fn report_fault(&self, object_id: ObjectId, fault: &Error) {
        self.log_sink.log(LogLevel::Error, object_id, &fault.to_string());
    }

    /// Build the lifecycle record for a new object of class `class_id`
    pub fn create_lifecycle(&self, class_id: ClassId) -> Result<ObjectLifecycle> {
        ObjectLifecycle::with_trace_flags(&self.registry, class_id, self.config.default_trace_flags)
    }
}

impl<O: LifecycleObject> LifecycleEngine<O> {
    /// Class ids of the object's hierarchy, base first
    pub fn class_hierarchy(&self, obj: &O) -> Result<Vec<ClassId>> {
        self.check_object(obj)?;
        Ok(obj.lifecycle().chain().to_vec())
    }

    /// Fail with [`Error::CorruptInstance`] if the object's record was destroyed
    pub(crate) fn check_object(&self, obj: &O) -> Result<()> {
        let object_id = obj.object_id();
        obj.lifecycle().check_canary(object_id).map_err(|e| {
            error!(object_id = %object_id, "Lifecycle record is corrupt or destroyed");
            self.report_fault(object_id, &e);
            e
        })
    }

    /// Make sure the object is cranked soon
    ///
    /// While a crank is in flight only the reschedule interval is shortened;
    /// the completion then asks for an immediate run.
    pub(crate) fn poke(&self, obj: &O) {
        let cranking = {
            let mut st = obj.lifecycle().lock_state();
            if st.attrs.cranking {
                st.reschedule_ms = 0;
            }
            st.attrs.cranking
        };
        if !cranking {
            self.scheduler.run_now(obj.object_id());
        }
    }

    pub(crate) fn internal(&self, obj: &O, msg: impl Into<String>) -> Error {
        let msg = msg.into();
        error!(object_id = %obj.object_id(), error = %msg, "Lifecycle internal error");
        let err = Error::Internal(msg);
        self.report_fault(obj.object_id(), &err);
        err
    }
}
