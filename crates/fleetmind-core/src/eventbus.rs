//! Event bus wiring FleetMind components to their observers.
//!
//! Components expose output channels; the application shell connects
//! them to this bus at startup. UI consumers subscribe here rather than
//! being called back into.

use tokio::sync::broadcast;

use crate::llm::{DownloadProgress, ServerState};

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Events published on the bus.
#[derive(Debug, Clone)]
pub enum FleetEvent {
    /// Model server changed state.
    ServerState(ServerState),
    /// A model download made progress.
    Download(DownloadProgress),
    /// A reasoning step was parsed from the live stream.
    ReasoningStep {
        /// Stream the step belongs to.
        stream_id: String,
        /// Phase name.
        step: String,
    },
    /// A reasoning request finished.
    ReasoningComplete {
        /// Request identifier.
        request_id: String,
        /// Whether the request produced a usable result.
        success: bool,
    },
    /// An approval decision was taken.
    Decision {
        /// Interpretation the decision applies to.
        interpretation_id: String,
        /// Action label ("approve", "reject", ...).
        action: String,
    },
}

/// Broadcast event bus.
///
/// Slow subscribers may observe lag; events are never reordered.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FleetEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event. Returns `true` if at least one subscriber
    /// received it.
    pub fn publish(&self, event: FleetEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Subscribe to all events.
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        assert!(bus.publish(FleetEvent::ServerState(ServerState::Running)));

        match rx.recv().await.unwrap() {
            FleetEvent::ServerState(state) => assert_eq!(state, ServerState::Running),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert!(!bus.publish(FleetEvent::ServerState(ServerState::Stopped)));
    }

    #[tokio::test]
    async fn test_events_ordered() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        for state in [ServerState::Starting, ServerState::Running, ServerState::Error] {
            bus.publish(FleetEvent::ServerState(state));
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            if let FleetEvent::ServerState(s) = rx.recv().await.unwrap() {
                seen.push(s);
            }
        }
        assert_eq!(
            seen,
            vec![ServerState::Starting, ServerState::Running, ServerState::Error]
        );
    }
}
