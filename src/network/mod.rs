//! Network layer: poll-driven server connection management
//!
//! Uses mio for cross-platform non-blocking I/O (epoll/kqueue/IOCP).
//!
//! Features:
//! - Zero-timeout polling, one bounded tick at a time
//! - Preallocated per-client frame and read buffers
//! - Roster sync on connect, disconnect broadcast on leave

mod client;
mod config;
mod directory;
mod hooks;
mod server;
mod stats;

pub use client::{DisconnectReason, MAX_BACKLOG};
pub use config::{ConnectionConfig, Role, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};
pub use hooks::{Hook, Hooks};
pub use server::{ConnectionManager, ServerState};
pub use stats::{ServerStats, StatsSnapshot};
