//! Signaling relay that pairs two named WebRTC clients and forwards their
//! offer, answer and ICE candidate payloads without looking inside them.

pub mod cli;
pub mod client;
pub mod config;
pub mod connections;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod switchboard;
pub mod telemetry;
