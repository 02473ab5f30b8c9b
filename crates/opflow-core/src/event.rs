use serde::Serialize;

use crate::types::{NodeId, RunId};

/// Progress events published while a workflow runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    RunStarted { run_id: RunId, nodes: usize },
    NodeStarted { run_id: RunId, node_id: NodeId, operator: String },
    NodeSucceeded { run_id: RunId, node_id: NodeId, elapsed_ms: u64 },
    NodeFailed { run_id: RunId, node_id: NodeId, error: String },
    NodeSkipped { run_id: RunId, node_id: NodeId },
    NodeCancelled { run_id: RunId, node_id: NodeId },
    RunFinished { run_id: RunId, succeeded: bool, elapsed_ms: u64 },
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: WorkflowEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WorkflowEvent> {
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

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(WorkflowEvent::RunStarted {
            run_id: RunId::new(),
            nodes: 0,
        });
    }

    #[tokio::test]
    async fn test_subscriber_receives() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(WorkflowEvent::NodeSkipped {
            run_id: RunId("r1".into()),
            node_id: NodeId::ordinal(3),
        });
        match rx.recv().await.unwrap() {
            WorkflowEvent::NodeSkipped { node_id, .. } => assert_eq!(node_id.as_str(), "n3"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
