//! Broadcast bus for `WorkflowEvent`.
//!
//! Publishing with no active subscribers is a no-op; slow subscribers see
//! `Lagged` rather than blocking the engine.

use tesflow_types::event::WorkflowEvent;
use tokio::sync::broadcast;

/// Multi-consumer event bus for run and task transitions.
///
/// Cloning the bus clones the sender, so every clone publishes into the
/// same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive all events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn skipped(task_id: &str) -> WorkflowEvent {
        WorkflowEvent::TaskSkipped {
            run_id: Uuid::now_v7(),
            task_id: task_id.to_string(),
            reason: "dependency failed".to_string(),
        }
    }

    #[tokio::test]
    async fn publish_and_subscribe_delivers_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(skipped("a"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.task_id(), Some("a"));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_event() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.publish(skipped("b"));

        assert!(matches!(rx1.recv().await.unwrap(), WorkflowEvent::TaskSkipped { .. }));
        assert!(matches!(rx2.recv().await.unwrap(), WorkflowEvent::TaskSkipped { .. }));
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(skipped("c"));
        assert_eq!(bus.receiver_count(), 0);
    }

    #[test]
    fn lagged_receiver_reports_lag() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(skipped(&format!("t{i}")));
        }
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
    }

    #[test]
    fn clone_shares_channel() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.clone().publish(skipped("d"));
        assert!(rx.try_recv().is_ok());
        assert!(format!("{bus:?}").contains("receiver_count"));
    }
}
