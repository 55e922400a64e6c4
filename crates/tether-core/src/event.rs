use crate::types::EngineEvent;

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        // No receivers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ThreadId;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(EngineEvent::RunStarted {
            thread_id: ThreadId::from_str("t1"),
            node_id: "input".into(),
        });

        match rx.recv().await.unwrap() {
            EngineEvent::RunStarted { thread_id, node_id } => {
                assert_eq!(thread_id.as_str(), "t1");
                assert_eq!(node_id, "input");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.publish(EngineEvent::PlanRemoved {
            thread_id: ThreadId::from_str("t1"),
            plan_id: "p1".into(),
        });
    }
}
