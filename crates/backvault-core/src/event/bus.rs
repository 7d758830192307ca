//! Progress notifications for whoever is watching the engine.
//!
//! Events are advisory: history is the record of truth, so a subscriber that
//! falls behind loses events instead of slowing the engine down.

use backvault_types::event::EngineEvent;
use tokio::sync::broadcast;

/// Fan-out of `EngineEvent`s from one engine to any number of watchers.
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// `capacity` bounds how far a subscriber may lag before it starts
    /// skipping events. Size it for the largest expected fan-out.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("engine event dropped, nobody is watching");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backvault_types::activity::ActivityKind;
    use tokio::sync::broadcast::error::TryRecvError;
    use uuid::Uuid;

    fn finished(instance_id: Uuid, seq: u64) -> EngineEvent {
        EngineEvent::ActivityFinished {
            instance_id,
            seq,
            kind: ActivityKind::Backup,
            succeeded: true,
            attempts: 1,
            duration_ms: 0,
        }
    }

    #[tokio::test]
    async fn watchers_see_events_in_publish_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let id = Uuid::now_v7();

        bus.publish(finished(id, 3));
        bus.publish(EngineEvent::InstanceResumed {
            instance_id: id,
            pending: 2,
        });

        assert!(matches!(
            rx.recv().await.unwrap(),
            EngineEvent::ActivityFinished { seq: 3, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            EngineEvent::InstanceResumed { pending: 2, .. }
        ));
    }

    #[test]
    fn publishing_without_watchers_is_harmless() {
        let bus = EventBus::new(16);
        bus.publish(finished(Uuid::now_v7(), 1));

        // Events published before subscribing are not replayed.
        let mut rx = bus.subscribe();
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn slow_watcher_skips_instead_of_blocking() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        let id = Uuid::now_v7();

        for seq in 0..10 {
            bus.publish(finished(id, seq));
        }

        assert!(matches!(rx.try_recv(), Err(TryRecvError::Lagged(6))));
        assert!(matches!(
            rx.try_recv(),
            Ok(EngineEvent::ActivityFinished { seq: 6, .. })
        ));
    }
}
