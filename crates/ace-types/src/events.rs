use crate::{ContentId, VpnId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured events the core emits for the admin layer to consume
/// (spec.md §6 "Control plane (produced, minimal)"). The core publishes
/// these on an [`EventSink`]; it persists none of them itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    EngineAdded { container_id: String, vpn_id: Option<VpnId>, forwarded: bool },
    EngineRemoved { container_id: String },
    VpnConnected { vpn_id: VpnId },
    VpnDisconnected { vpn_id: VpnId },
    VpnEmergencyEntered { failed_vpn: VpnId, healthy_vpn: VpnId },
    VpnEmergencyExited { recovered_vpn: VpnId },
    SessionStarted { content_id: ContentId, container_id: String },
    SessionEnded { content_id: ContentId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub at: DateTime<Utc>,
    pub event: OrchestratorEvent,
}

/// The seam every component publishes structured events through, without
/// depending on whatever transport the composition root wires up (spec.md
/// §9 "prefer a composition root... never import-time singletons"). The
/// orchestrator binary's `tokio::sync::broadcast` channel implements this;
/// tests can substitute a `Vec`-backed recorder.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: OrchestratorEvent);
}

/// An [`EventSink`] that drops everything, for components under test that
/// do not care about the event stream.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn publish(&self, _event: OrchestratorEvent) {}
}
