//! Protocol layer: byte spans, frames and envelopes
//!
//! Design principles:
//! - Little-endian, fixed-width primitives with no tags on the wire
//! - Length-prefixed frames staged straight into a preallocated buffer
//! - Parsing borrows from the received bytes; nothing is copied until a
//!   frame becomes a `Message`

mod encodable;
mod frame_buffer;
mod message;
mod rpc_arg;
mod span;

pub use encodable::Encodable;
pub use frame_buffer::{parse_frame, FrameBuffer, FrameStep, Frames, LENGTH_PREFIX, MAX_FRAME_LEN};
pub use message::{Message, Notice, Payload, Route, ENVELOPE_HEADER, NOTICE_LEN};
pub use rpc_arg::{
    decode_arguments, encode_arguments, encoded_len, ArgKind, Param, RpcArgument, Signature,
};
pub use span::{ByteSpan, ByteSpanMut, Primitive};
