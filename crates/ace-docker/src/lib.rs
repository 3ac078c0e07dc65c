//! # AceStream Docker Runtime Client
//!
//! Wraps `bollard` behind a [`ContainerRuntime`] trait so the engine
//! controller and VPN coordinator can be tested against a mock runtime
//! instead of a real Docker daemon. Unlike a connection-pool-plus-global-
//! singleton, there is exactly one `bollard::Docker` handle, constructed
//! once at the composition root and passed down by reference.

pub mod error;
pub mod runtime;
pub mod types;

pub use error::{DockerError, Result};
pub use runtime::{BollardRuntime, ContainerRuntime};
pub use types::{ContainerHealth, ContainerSpec, ContainerStatus, ManagedContainer};
