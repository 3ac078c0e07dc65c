//! Stream multiplexing proxy: one upstream AceStream playback per content
//! id, fanned out to every client watching it.
//!
//! The [`manager::ProxySessionManager`] is the entry point a control-plane
//! handler calls into; it drives engine selection (via [`ace_engine`]),
//! opens the stream on the chosen engine, and owns the
//! [`session::ProxySession`] / [`ring_buffer::RingBuffer`] pair for as
//! long as at least one client is attached.

pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod ring_buffer;
pub mod session;

pub use client::{EngineClient, StreamHandle};
pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use manager::ProxySessionManager;
pub use ring_buffer::{ReadResult, RingBuffer};
pub use session::ProxySession;
