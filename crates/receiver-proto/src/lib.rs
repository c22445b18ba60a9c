//! Shared types for the playback receiver: wire protocol, Socket.IO framing,
//! playlist model, session identity and on-disk configuration.

pub mod config;
pub mod platform;
pub mod playlist;
pub mod protocol;
pub mod session;
pub mod wire;
