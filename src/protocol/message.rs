//! Envelope format carried inside each frame
//!
//! Layout:
//! ┌──────────────┬──────────────────────┬───────────────────────┐
//! │ u16 rpc id   │ u32 target / client  │ argument bytes ...    │
//! └──────────────┴──────────────────────┴───────────────────────┘
//!
//! Reserved rpc ids 1..=3 are roster notices whose second field names a
//! client and which carry no arguments. Ids 4 and 5 belong to the object
//! lifecycle layer. Everything from 10 up is a user rpc.

use super::frame_buffer::FrameBuffer;
use super::rpc_arg::{self, RpcArgument};
use super::span::{ByteSpan, ByteSpanMut};
use crate::core::{ClientId, Identities, NetworkId, RpcId};
use crate::error::{Error, ProtocolError, Result};

/// Bytes before the argument payload
pub const ENVELOPE_HEADER: usize = RpcId::SIZE + NetworkId::SIZE;

/// Full size of a roster notice
pub const NOTICE_LEN: usize = RpcId::SIZE + ClientId::SIZE;

/// Argument data of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Typed arguments built locally
    Arguments(Vec<RpcArgument>),
    /// Raw argument bytes as received; decoded later against a signature
    Encoded(Vec<u8>),
}

impl Payload {
    pub fn encoded_len(&self) -> usize {
        match self {
            Payload::Arguments(args) => rpc_arg::encoded_len(args),
            Payload::Encoded(bytes) => bytes.len(),
        }
    }

    fn encode_into(&self, span: &mut ByteSpanMut<'_>, offset: usize) -> Result<()> {
        match self {
            Payload::Arguments(args) => {
                rpc_arg::encode_arguments(args, span, offset)?;
            }
            Payload::Encoded(bytes) if bytes.is_empty() => {}
            Payload::Encoded(bytes) => {
                if !span.try_write_bytes(bytes, offset) {
                    return Err(Error::Bounds {
                        offset,
                        len: bytes.len(),
                        span_len: span.len(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Arguments(Vec::new())
    }
}

/// Where the server should deliver an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Object spawn/despawn; payload owned by the lifecycle layer
    Lifecycle,
    Unicast(ClientId),
    Broadcast,
}

/// One rpc invocation in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub caller: ClientId,
    /// `ClientId::none()` means every client
    pub callee: ClientId,
    pub rpc: RpcId,
    pub target: NetworkId,
    pub payload: Payload,
}

impl Message {
    pub fn new(
        caller: ClientId,
        callee: ClientId,
        rpc: RpcId,
        target: NetworkId,
        args: Vec<RpcArgument>,
    ) -> Self {
        Self {
            caller,
            callee,
            rpc,
            target,
            payload: Payload::Arguments(args),
        }
    }

    /// Message addressed to every connected client.
    pub fn broadcast(caller: ClientId, rpc: RpcId, target: NetworkId, args: Vec<RpcArgument>) -> Self {
        Self::new(caller, ClientId::none(), rpc, target, args)
    }

    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.callee.is_none()
    }

    /// Routing slot, in priority order: lifecycle, unicast, broadcast.
    pub fn route(&self) -> Route {
        if self.rpc.is_object_event() {
            Route::Lifecycle
        } else if !self.callee.is_none() {
            Route::Unicast(self.callee)
        } else {
            Route::Broadcast
        }
    }

    /// Frame payload size
    pub fn encoded_len(&self) -> usize {
        ENVELOPE_HEADER + self.payload.encoded_len()
    }

    /// Stage this message as one frame. On error nothing is staged.
    pub fn encode_into(&self, buffer: &mut FrameBuffer) -> Result<()> {
        let mark = buffer.len();
        let result = self.write_frame(buffer);
        if result.is_err() {
            buffer.truncate(mark);
        }
        result
    }

    fn write_frame(&self, buffer: &mut FrameBuffer) -> Result<()> {
        let mut span = buffer.get_span(self.encoded_len())?;
        span.try_encode(self.rpc.get(), 0);
        span.try_encode(self.target.get(), RpcId::SIZE);
        self.payload.encode_into(&mut span, ENVELOPE_HEADER)
    }

    /// Parse an inbound frame sent by `caller`.
    ///
    /// The rpc and target ids are recorded with `ids` so locally minted ids
    /// never collide with them.
    pub fn decode(
        caller: ClientId,
        frame: ByteSpan<'_>,
        ids: &Identities,
    ) -> std::result::Result<Message, ProtocolError> {
        if frame.len() < ENVELOPE_HEADER {
            return Err(ProtocolError::TruncatedEnvelope { len: frame.len() });
        }
        let rpc = ids.rpcs.observe(frame.decode_u16(0));
        let target = ids.networks.observe(frame.decode_u32(RpcId::SIZE));
        let args = frame.as_bytes()[ENVELOPE_HEADER..].to_vec();

        Ok(Message {
            caller,
            callee: ClientId::none(),
            rpc,
            target,
            payload: Payload::Encoded(args),
        })
    }
}

/// Roster notices the server pushes to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// Another client joined
    ClientConnected(ClientId),
    /// Identity assigned to the receiving client
    LocalClientConnected(ClientId),
    ClientDisconnected(ClientId),
}

impl Notice {
    pub fn rpc(self) -> RpcId {
        match self {
            Notice::ClientConnected(_) => RpcId::CLIENT_CONNECTED,
            Notice::LocalClientConnected(_) => RpcId::LOCAL_CLIENT_CONNECTED,
            Notice::ClientDisconnected(_) => RpcId::CLIENT_DISCONNECTED,
        }
    }

    pub fn client(self) -> ClientId {
        match self {
            Notice::ClientConnected(id)
            | Notice::LocalClientConnected(id)
            | Notice::ClientDisconnected(id) => id,
        }
    }

    /// Stage this notice as one frame.
    pub fn encode_into(self, buffer: &mut FrameBuffer) -> Result<()> {
        let mut span = buffer.get_span(NOTICE_LEN)?;
        span.try_encode(self.rpc().get(), 0);
        span.try_encode(self.client().get(), RpcId::SIZE);
        Ok(())
    }

    /// Recognise a notice frame; `None` for anything else.
    pub fn decode(frame: ByteSpan<'_>) -> Option<Notice> {
        if frame.len() != NOTICE_LEN {
            return None;
        }
        let rpc = RpcId::from_raw(frame.decode_u16(0));
        let client = ClientId::from_raw(frame.decode_u32(RpcId::SIZE));
        match rpc {
            RpcId::CLIENT_CONNECTED => Some(Notice::ClientConnected(client)),
            RpcId::LOCAL_CLIENT_CONNECTED => Some(Notice::LocalClientConnected(client)),
            RpcId::CLIENT_DISCONNECTED => Some(Notice::ClientDisconnected(client)),
            _ => None,
        }
    }
}
