//! Notification and Log Sinks
//!
//! State change events fan out over a tokio broadcast channel; a send with no
//! subscribers is not an error. Log sink lines go through `tracing`.

use crate::lifecycle::ports::{LogLevel, LogSink, NotificationSink, ObjectId, StateChangeEvent};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Notification sink backed by a broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    event_tx: broadcast::Sender<StateChangeEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self { event_tx }
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<StateChangeEvent> {
        self.event_tx.subscribe()
    }
}

impl NotificationSink for BroadcastNotifier {
    fn notify(&self, event: StateChangeEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Notification sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl NotificationSink for NullNotifier {
    fn notify(&self, _event: StateChangeEvent) {}
}

/// Log sink writing through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, level: LogLevel, object_id: ObjectId, line: &str) {
        match level {
            LogLevel::Debug => debug!(target: "block_lifecycle::trace", object_id = %object_id, "{}", line),
            LogLevel::Info => info!(target: "block_lifecycle::trace", object_id = %object_id, "{}", line),
            LogLevel::Warning => warn!(target: "block_lifecycle::trace", object_id = %object_id, "{}", line),
            LogLevel::Error => error!(target: "block_lifecycle::trace", object_id = %object_id, "{}", line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::class::ClassId;
    use crate::lifecycle::state::LifecycleState;
    use chrono::Utc;

    fn event(to: LifecycleState) -> StateChangeEvent {
        StateChangeEvent {
            object_id: ObjectId(9),
            class_id: ClassId(1),
            from: LifecycleState::Specialize,
            to,
            forced: false,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_fan_out() {
        let notifier = BroadcastNotifier::new(16);
        let mut rx1 = notifier.subscribe();
        let mut rx2 = notifier.subscribe();

        notifier.notify(event(LifecycleState::PendingReady));

        assert_eq!(rx1.recv().await.unwrap().to, LifecycleState::PendingReady);
        assert_eq!(rx2.recv().await.unwrap().object_id, ObjectId(9));
    }

    #[test]
    fn test_late_subscriber_misses_earlier_events() {
        let notifier = BroadcastNotifier::new(4);
        notifier.notify(event(LifecycleState::PendingReady));
        let mut rx = notifier.subscribe();
        notifier.notify(event(LifecycleState::Ready));

        let received = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(received.to, LifecycleState::Ready);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_notify_without_subscribers() {
        let notifier = BroadcastNotifier::new(0);
        notifier.notify(event(LifecycleState::Fail));
        NullNotifier.notify(event(LifecycleState::Fail));
        TracingLogSink.log(LogLevel::Warning, ObjectId(1), "no subscriber");
    }
}
