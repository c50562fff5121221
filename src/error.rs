//! Error types shared by the codec, framing and connection layers.

use std::io;

use crate::core::RpcId;
use crate::protocol::ArgKind;

/// Malformed inbound data. Always scoped to a single connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ProtocolError {
    #[error("zero-length frame at offset {offset}")]
    ZeroLengthFrame { offset: usize },


    #[error("frame declares {declared} bytes, read buffer holds {capacity}")]
    OversizedFrame { declared: usize, capacity: usize },

    #[error("envelope of {len} bytes is shorter than its header")]
    TruncatedEnvelope { len: usize },

    #[error("argument {index} ({kind:?}) runs past the end of the payload")]
    TruncatedArgument { index: usize, kind: ArgKind },

    #[error("string argument {index} is not valid utf-8")]
    InvalidUtf8 { index: usize },

    #[error("{extra} bytes left over after the last argument")]
    TrailingBytes { extra: usize },
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("spans and frames must be at least one byte long")]
    ZeroLength,

    #[error("frame of {len} bytes exceeds the 16-bit length prefix")]
    FrameTooLong { len: usize },

    #[error("frame buffer cannot fit {requested} more bytes ({remaining} remaining)")]
    Capacity { requested: usize, remaining: usize },

    #[error("poll set is full ({capacity} sockets)")]
    PollSetFull { capacity: usize },

    #[error("range {offset}..{offset}+{len} is outside a span of {span_len} bytes")]
    Bounds {
        offset: usize,
        len: usize,
        span_len: usize,
    },

    #[error("argument holds {found:?}, not {expected:?}")]
    TypeMismatch { expected: ArgKind, found: ArgKind },

    #[error("rpc expects {expected} arguments, got {found}")]
    ArgumentCount { expected: usize, found: usize },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{rpc} is reserved and cannot carry a handler")]
    ReservedRpc { rpc: RpcId },

    #[error("only the server role is supported")]
    UnsupportedRole,

    #[error("network thread panicked")]
    WorkerPanicked,

    #[error("{kind} identities exhausted")]
    IdentitiesExhausted { kind: &'static str },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
