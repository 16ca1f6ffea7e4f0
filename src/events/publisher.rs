use crate::config::EngineConfig;
use crate::state_machine::errors::{DispatchError, DispatchResult};
use crate::state_machine::events::WorkflowEvent;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

/// Hand-off seam for notification jobs, webhook events and audit records.
///
/// The engine calls this only after a transition has committed.
#[async_trait]
pub trait OutboundDispatcher: Send + Sync {
    async fn dispatch(&self, event: &WorkflowEvent) -> DispatchResult<()>;
}

/// Broadcast publisher for workflow events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub payload: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Size the channel from `engine.event_channel_capacity`
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.event_channel_capacity)
    }

    /// Publish an event with the given name and payload
    pub fn publish(&self, event_name: impl Into<String>, payload: Value) {
        let event = PublishedEvent {
            name: event_name.into(),
            payload,
            published_at: chrono::Utc::now(),
        };

        // No subscribers is not an error; events are fire-and-forget
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl OutboundDispatcher for EventPublisher {
    async fn dispatch(&self, event: &WorkflowEvent) -> DispatchResult<()> {
        self.publish(event.event_type(), event.to_payload());
        Ok(())
    }
}

/// Dispatcher that refuses every message; useful for exercising fail-forward
/// and rollback paths of hand-off post-functions
#[derive(Debug, Clone, Default)]
pub struct RejectingDispatcher {
    pub reason: String,
}

#[async_trait]
impl OutboundDispatcher for RejectingDispatcher {
    async fn dispatch(&self, _event: &WorkflowEvent) -> DispatchResult<()> {
        Err(DispatchError::Rejected(self.reason.clone()))
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(crate::constants::system::DEFAULT_EVENT_CHANNEL_CAPACITY)
    }
}
