//! Monitor Scheduling
//!
//! Tokio-based external scheduler for the lifecycle engine. The engine only
//! ever asks for an object to be run now or after a delay; [`ChannelScheduler`]
//! turns those requests into messages and [`MonitorService`] consumes them,
//! cranking objects from the table it owns.

mod service;

pub use service::{MonitorHandle, MonitorService};

use crate::lifecycle::ports::{MonitorScheduler, ObjectId};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Message consumed by the monitor service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorRequest {
    /// Crank as soon as possible
    RunNow(ObjectId),
    /// Crank after a delay
    RunAfter(ObjectId, Duration),
    /// A delay armed for the given generation expired
    Fire(ObjectId, u64),
    /// Stop the service loop
    Shutdown,
}

/// [`MonitorScheduler`] that forwards requests over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelScheduler {
    tx: mpsc::UnboundedSender<MonitorRequest>,
}

impl ChannelScheduler {
    /// Create the scheduler and the receiving end for a [`MonitorService`]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MonitorRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Ask the service loop to stop
    pub fn shutdown(&self) {
        self.send(MonitorRequest::Shutdown);
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<MonitorRequest> {
        self.tx.clone()
    }

    fn send(&self, request: MonitorRequest) {
        if self.tx.send(request).is_err() {
            debug!(?request, "Monitor service gone, request dropped");
        }
    }
}

impl MonitorScheduler for ChannelScheduler {
    fn run_now(&self, object_id: ObjectId) {
        self.send(MonitorRequest::RunNow(object_id));
    }

    fn run_after(&self, object_id: ObjectId, delay: Duration) {
        self.send(MonitorRequest::RunAfter(object_id, delay));
    }
}
