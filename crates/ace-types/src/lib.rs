//! Shared types and traits for the AceStream fleet orchestrator.
//!
//! This crate holds the value types that cross module boundaries
//! (`ace-docker`, `ace-ports`, `ace-state`, `ace-vpn`, `ace-engine`,
//! `ace-proxy`) so that those crates do not depend on each other just to
//! share a struct definition.

pub mod content_id;
pub mod engine;
pub mod error;
pub mod events;
pub mod stream;
pub mod vpn;

pub use content_id::ContentId;
pub use engine::{EngineHealth, EngineRecord};
pub use error::CommonError;
pub use events::{EventSink, NullEventSink, OrchestratorEvent, TimestampedEvent};
pub use stream::{StreamRecord, StreamStatus};
pub use vpn::{VpnId, VpnMode, VpnStatus};
