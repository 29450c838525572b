//! Monitor Packet
//!
//! In-process carrier used to run cranks. Continuations are kept on a stack
//! and run most recent first when the packet completes.

use crate::lifecycle::ports::{Carrier, CarrierStatus, Completion};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Completion-bearing request for one crank
pub struct MonitorPacket {
    completions: Mutex<Vec<Completion>>,
    status: Mutex<CarrierStatus>,
    completed: AtomicBool,
}

impl Default for MonitorPacket {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorPacket {
    pub fn new() -> Self {
        Self {
            completions: Mutex::new(Vec::new()),
            status: Mutex::new(CarrierStatus::InFlight),
            completed: AtomicBool::new(false),
        }
    }

    /// Check whether [`Carrier::complete`] has been called
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Number of continuations still attached
    pub fn pending_completions(&self) -> usize {
        self.completions.lock().len()
    }
}

impl Carrier for MonitorPacket {
    fn push_completion(&self, completion: Completion) {
        self.completions.lock().push(completion);
    }

    fn complete(&self) {
        self.completed.store(true, Ordering::Release);
        // Pop one at a time: a continuation may push another
        loop {
            let next = self.completions.lock().pop();
            match next {
                Some(completion) => completion(self),
                None => break,
            }
        }
    }

    fn set_status(&self, status: CarrierStatus) {
        *self.status.lock() = status;
    }

    fn status(&self) -> CarrierStatus {
        *self.status.lock()
    }
}

impl std::fmt::Debug for MonitorPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorPacket")
            .field("status", &self.status())
            .field("completed", &self.is_completed())
            .field("pending_completions", &self.pending_completions())
            .finish()
    }
}
