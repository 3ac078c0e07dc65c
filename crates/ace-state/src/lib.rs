//! The in-memory, authoritative store of fleet state.
//!
//! [`StateStore`] owns every [`EngineRecord`] and [`StreamRecord`] (spec.md
//! §3). Every mutator takes its own lock internally and reads return cloned
//! snapshots, never guards or references, so callers can never hold the
//! lock across an `.await`.

pub mod store;

pub use store::StateStore;
