//! Core module: identities and the cross-thread mailbox
//!
//! Design principles:
//! - Identities are never reissued; allocators are explicit values
//! - The message queue is the only state shared between threads

mod ids;
mod message_queue;

pub use ids::{ClientId, IdAllocator, Identities, Identity, NetworkId, RpcId};
pub use message_queue::MessageQueue;
