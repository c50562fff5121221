//! Herald - RPC transport core for real-time client/server games
//!
//! Architecture:
//! - Framing: u16 little-endian length prefix, payloads staged in place
//! - Envelopes: rpc id, target object id, tagless argument bytes
//! - Server: single-threaded mio tick with roster sync on connect
//! - Handoff: mutex queues between the network loop and the application
//!
//! ```no_run
//! use herald::{Connection, ConnectionConfig, Hooks};
//!
//! let mut conn = Connection::new(ConnectionConfig::default(), Hooks::new())?;
//! loop {
//!     conn.tick()?;
//!     while let Some(message) = conn.next_message() {
//!         println!("{} from {}", message.rpc, message.caller);
//!     }
//! #   break;
//! }
//! # Ok::<(), herald::Error>(())
//! ```

pub mod connection;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod network;
pub mod protocol;

pub use crate::connection::Connection;
pub use crate::core::{ClientId, IdAllocator, Identities, MessageQueue, NetworkId, RpcId};
pub use crate::dispatch::{Dispatcher, RpcCall};
pub use crate::error::{Error, ProtocolError, Result};
pub use crate::network::{
    ConnectionConfig, ConnectionManager, DisconnectReason, Hooks, Role, ServerStats, StatsSnapshot,
};
pub use crate::protocol::{ArgKind, Encodable, FrameBuffer, Message, Notice, Param, Payload, RpcArgument};
