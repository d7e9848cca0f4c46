//! Domain event system: decoupled communication between bounded contexts.
//!
//! The agent loop publishes what happens during a turn. The gateway subscribes
//! to log them; tests subscribe to assert on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::channel::ChannelKind;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A turn began for a user on a channel
    TurnStarted {
        user_id: String,
        thread_id: String,
        channel: ChannelKind,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        user_id: String,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The agent produced its final answer for a turn
    ResponseGenerated {
        user_id: String,
        thread_id: String,
        model: String,
        tokens_used: u32,
        iterations: usize,
        timestamp: DateTime<Utc>,
    },

    /// Memory was skipped because the backend could not be used
    MemoryDegraded {
        user_id: String,
        operation: String, // "search", "add"
        timestamp: DateTime<Utc>,
    },

    /// A turn aborted on a fatal error
    TurnFailed {
        user_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn user_id(&self) -> &str {
        match self {
            DomainEvent::TurnStarted { user_id, .. }
            | DomainEvent::ToolExecuted { user_id, .. }
            | DomainEvent::ResponseGenerated { user_id, .. }
            | DomainEvent::MemoryDegraded { user_id, .. }
            | DomainEvent::TurnFailed { user_id, .. } => user_id,
        }
    }
}

/// A broadcast-based event bus for domain events.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
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
    async fn subscribers_receive_tool_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ToolExecuted {
            user_id: "alice".into(),
            tool_name: "list_calendar_events".into(),
            success: true,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.user_id(), "alice");
        match event.as_ref() {
            DomainEvent::ToolExecuted { tool_name, success, .. } => {
                assert_eq!(tool_name, "list_calendar_events");
                assert!(success);
            }
            other => panic!("Expected ToolExecuted event, got {other:?}"),
        }
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::MemoryDegraded {
            user_id: "bob".into(),
            operation: "search".into(),
            timestamp: Utc::now(),
        });
    }
}
