//! Domain event system: decoupled observation of planning sessions.
//!
//! The loop controller publishes events as sessions progress. Loggers,
//! audit sinks and tests subscribe without touching the loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::session::{SessionId, SessionStatus};
use crate::tool::ToolFailureKind;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A session moved to `Running`
    SessionStarted {
        session_id: SessionId,
        patient_id: String,
        max_steps: u32,
        timestamp: DateTime<Utc>,
    },

    /// The reasoning step returned a proposal
    ReasoningCompleted {
        session_id: SessionId,
        step: u32,
        finished: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A tool dispatch completed (after any retries)
    ToolDispatched {
        session_id: SessionId,
        step: u32,
        tool_name: String,
        attempts: u32,
        failure: Option<ToolFailureKind>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A session reached its terminal status
    SessionEnded {
        session_id: SessionId,
        status: SessionStatus,
        steps: u32,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::SessionStarted { session_id, .. }
            | Self::ReasoningCompleted { session_id, .. }
            | Self::ToolDispatched { session_id, .. }
            | Self::SessionEnded { session_id, .. } => *session_id,
        }
    }
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast`; slow subscribers lose the oldest events
/// rather than stalling sessions.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

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
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let id = SessionId::new();

        bus.publish(DomainEvent::ToolDispatched {
            session_id: id,
            step: 1,
            tool_name: "predict_risk".into(),
            attempts: 3,
            failure: Some(ToolFailureKind::Timeout),
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.session_id(), id);
        match event.as_ref() {
            DomainEvent::ToolDispatched {
                tool_name,
                attempts,
                failure,
                ..
            } => {
                assert_eq!(tool_name, "predict_risk");
                assert_eq!(*attempts, 3);
                assert_eq!(*failure, Some(ToolFailureKind::Timeout));
            }
            _ => panic!("Expected ToolDispatched event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::SessionEnded {
            session_id: SessionId::new(),
            status: SessionStatus::Cancelled,
            steps: 0,
            reason: None,
            timestamp: Utc::now(),
        });
    }
}
