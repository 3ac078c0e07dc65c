//! Engine Fleet Controller: turns "desired number of engines, on which
//! VPNs" into running AceStream containers, keeps the state store in
//! sync with what the runtime actually reports, and replaces engines
//! that fail health checks without dropping below the configured floor.
//!
//! Depends on [`ace_docker`] for the container runtime and [`ace_ports`]
//! for port bookkeeping, but never on `ace-vpn` directly: the [`VpnLookup`]
//! trait in [`vpn_lookup`] is the seam the VPN coordinator drives this
//! crate through.

pub mod breaker;
pub mod controller;
pub mod error;
pub mod health_manager;
pub mod labels;
pub mod naming;
pub mod selector;
pub mod variant;
pub mod vpn_lookup;

pub use breaker::CircuitBreaker;
pub use controller::{EngineController, EngineControllerConfig};
pub use error::{EngineError, Result};
pub use health_manager::{HealthManager, HealthManagerConfig};
pub use selector::EngineSelector;
pub use variant::EngineVariant;
pub use vpn_lookup::{NoVpn, VpnLookup};
