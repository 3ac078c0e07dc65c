//! The composition root's concrete [`EventSink`]: a `tokio::sync::broadcast`
//! channel, per SPEC_FULL.md A.5. Every component publishes through the
//! trait object; the control plane (and, in future, any other consumer)
//! subscribes to the channel directly.

use ace_types::{EventSink, OrchestratorEvent, TimestampedEvent};
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::debug;

/// Wraps a `broadcast::Sender`. Lagging subscribers silently miss events
/// (the standard broadcast-channel behavior) rather than backpressuring
/// publishers — correct here since events are an observability surface,
/// not a delivery-guaranteed queue (spec.md §6 "the core itself does not
/// persist them").
pub struct BroadcastEventSink {
    sender: broadcast::Sender<TimestampedEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimestampedEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn publish(&self, event: OrchestratorEvent) {
        let envelope = TimestampedEvent { at: Utc::now(), event };
        // No subscribers is the common case outside of tests/the SSE
        // endpoint; that's not an error.
        if self.sender.send(envelope).is_err() {
            debug!("published event with no active subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ace_types::VpnId;

    #[test]
    fn subscribers_receive_published_events() {
        let sink = BroadcastEventSink::new(16);
        let mut rx = sink.subscribe();
        sink.publish(OrchestratorEvent::VpnConnected { vpn_id: VpnId::new("vpn1") });
        let received = rx.try_recv().expect("event should be queued");
        assert!(matches!(received.event, OrchestratorEvent::VpnConnected { .. }));
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let sink = BroadcastEventSink::new(4);
        sink.publish(OrchestratorEvent::VpnConnected { vpn_id: VpnId::new("vpn1") });
    }
}
