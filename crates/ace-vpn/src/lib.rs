//! VPN fleet coordination: per-sidecar health tracking, forwarded-port
//! change detection, and redundant-mode emergency fallback.
//!
//! `ace-vpn` drives `ace-engine` through the [`ace_engine::VpnLookup`]
//! seam rather than the other way round: the VPN Coordinator decides where
//! engines should live, the Engine Controller only knows how to build one.

pub mod client;
pub mod coordinator;
pub mod error;
pub mod fleet;
pub mod fsm;

pub use client::{GluetunClient, PortForwardOutcome, PublicIpInfo};
pub use coordinator::{VpnCoordinator, VpnCoordinatorConfig};
pub use error::{Result, VpnError};
pub use fleet::{EmergencyRecord, VpnFleet};
pub use fsm::{HealthTransition, PortObservation, VpnFsm};
