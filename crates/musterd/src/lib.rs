//! musterd: attendance daemon.
//!
//! Wires the `muster-core` cache, matcher and cooldown tracker to a SQLite
//! store, a face extraction engine thread and an HTTP API.

pub mod api;
pub mod attendance;
pub mod config;
pub mod engine;
pub mod enrollment;
pub mod sidecar;
pub mod store;
