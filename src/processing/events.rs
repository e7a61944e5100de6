//! Stage completion notifications
//!
//! Observers subscribe to a broadcast channel. Events of one batch arrive in
//! stage order; events of different batches may interleave.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::entities::ProcessingState;

/// A batch finished a processing stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCompletedEvent {
    pub batch_id: Uuid,
    pub completed_state: ProcessingState,
}

/// Typed publish/subscribe channel for [`StateCompletedEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StateCompletedEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateCompletedEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers; returns how many received it
    pub fn publish(&self, event: StateCompletedEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::trace!(batch_id = %event.batch_id, "No subscribers for stage event");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let event = StateCompletedEvent {
            batch_id: Uuid::new_v4(),
            completed_state: ProcessingState::Validated,
        };
        assert_eq!(bus.publish(event), 2);

        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap(), event);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        let sent = bus.publish(StateCompletedEvent {
            batch_id: Uuid::nil(),
            completed_state: ProcessingState::Raw,
        });
        assert_eq!(sent, 0);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
