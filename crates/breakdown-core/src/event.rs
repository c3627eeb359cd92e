use serde::Serialize;

/// Lifecycle events emitted while a workflow runs.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    RunStarted { task: String, pattern: String },
    StepStarted { step: String, branch: usize },
    StepCompleted { step: String, branch: usize, elapsed_ms: u64 },
    StepFailed { step: String, branch: usize, error: String },
    /// A branch reached the terminal sentinel.
    BranchEnded { step: String, branch: usize },
    RunCompleted { merged: bool, elapsed_ms: u64 },
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

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(WorkflowEvent::StepStarted {
            step: "task_breaker".into(),
            branch: 0,
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            WorkflowEvent::StepStarted {
                step: "task_breaker".into(),
                branch: 0
            }
        );
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(WorkflowEvent::RunCompleted {
            merged: true,
            elapsed_ms: 1,
        });
    }
}
