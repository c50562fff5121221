//! Length-prefixed frame staging and parsing
//!
//! Layout of a stream:
//! ┌──────────────┬──────────────────┬──────────────┬─────────────
//! │ u16 len (LE) │ len payload bytes │ u16 len (LE) │ ...
//! └──────────────┴──────────────────┴──────────────┴─────────────
//!
//! Outgoing frames are staged into one pre-allocated buffer per peer and
//! sent in a single write. Incoming chunks are split back into frames by
//! a stateless cursor walk. Neither side allocates after construction.

use super::span::{ByteSpan, ByteSpanMut, Primitive};
use crate::error::{Error, ProtocolError, Result};

/// Bytes taken by the length prefix
pub const LENGTH_PREFIX: usize = <u16 as Primitive>::WIDTH;

/// Largest payload the prefix can describe
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Fixed-capacity staging buffer for outgoing frames.
///
/// The space check is strict (`tail + needed < capacity`), so at least one
/// byte of the buffer always stays unused.
pub struct FrameBuffer {
    buffer: Box<[u8]>,
    tail: usize,
}

impl FrameBuffer {
    /// Allocate a buffer of `capacity` bytes. This is the only allocation.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            tail: 0,
        }
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes written so far
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.tail
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.tail == 0
    }

    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.tail == self.buffer.len()
    }

    /// Whether `bytes` more bytes fit, keeping the one-byte margin.
    #[inline(always)]
    pub fn has_space_for(&self, bytes: usize) -> bool {
        self.tail
            .checked_add(bytes)
            .map_or(false, |end| end < self.buffer.len())
    }

    /// Largest payload that still fits
    pub fn available(&self) -> usize {
        self.buffer
            .len()
            .saturating_sub(self.tail + LENGTH_PREFIX + 1)
    }

    /// Reserve a zero-filled frame of `byte_count` payload bytes.
    ///
    /// Writes the length prefix, then hands out a writable view over the
    /// payload. On error the buffer is left untouched.
    pub fn get_span(&mut self, byte_count: usize) -> Result<ByteSpanMut<'_>> {
        if byte_count > MAX_FRAME_LEN {
            return Err(Error::FrameTooLong { len: byte_count });
        }
        if byte_count == 0 {
            return Err(Error::ZeroLength);
        }

        let needed = LENGTH_PREFIX + byte_count;
        if !self.has_space_for(needed) {
            return Err(Error::Capacity {
                requested: needed,
                remaining: self.buffer.len() - self.tail,
            });
        }

        let start = self.tail;
        let payload = start + LENGTH_PREFIX;
        let end = payload + byte_count;

        (byte_count as u16).write_le(&mut self.buffer[start..payload]);
        self.buffer[payload..end].fill(0);
        self.tail = end;

        ByteSpanMut::new(&mut self.buffer[..], payload, byte_count)
    }

    /// Stage a frame holding a copy of `payload`.
    pub fn push_frame(&mut self, payload: &[u8]) -> Result<()> {
        self.get_span(payload.len())?
            .as_bytes_mut()
            .copy_from_slice(payload);
        Ok(())
    }

    /// Everything staged since the last reset
    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.tail]
    }

    /// Rewind for reuse. Old bytes are not wiped; `get_span` zero-fills on acquire.
    #[inline(always)]
    pub fn reset(&mut self) {
        self.tail = 0;
    }

    /// Drop everything staged after `len` bytes.
    pub fn truncate(&mut self, len: usize) {
        self.tail = self.tail.min(len);
    }

    /// Iterate over the frames staged so far.
    pub fn frames(&self) -> Frames<'_> {
        Frames::new(self.as_bytes())
    }

    /// Stateless iterator step over a received chunk.
    ///
    /// Yields the payload at `cursor` and advances past it. Returns `None`
    /// at the end of the stream, on a zero-length frame, or when the
    /// declared length runs past `stream`.
    pub fn get_next_message<'a>(stream: &'a [u8], cursor: &mut usize) -> Option<ByteSpan<'a>> {
        match parse_frame(stream, cursor) {
            FrameStep::Frame(span) => Some(span),
            _ => None,
        }
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("capacity", &self.buffer.len())
            .field("tail", &self.tail)
            .finish()
    }
}

/// Outcome of one parse step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameStep<'a> {
    Frame(ByteSpan<'a>),
    /// Cursor is at the end of the stream
    End,
    /// A frame starts at the cursor but has not fully arrived
    Incomplete,
    Malformed(ProtocolError),
}

/// Parse the frame at `cursor`, advancing it only on success.
pub fn parse_frame<'a>(stream: &'a [u8], cursor: &mut usize) -> FrameStep<'a> {
    let start = *cursor;
    if start >= stream.len() {
        return FrameStep::End;
    }
    if start + LENGTH_PREFIX > stream.len() {
        return FrameStep::Incomplete;
    }

    let declared = u16::read_le(&stream[start..start + LENGTH_PREFIX]) as usize;
    if declared == 0 {
        return FrameStep::Malformed(ProtocolError::ZeroLengthFrame { offset: start });
    }

    let payload = start + LENGTH_PREFIX;
    if payload + declared > stream.len() {
        return FrameStep::Incomplete;
    }

    let Ok(span) = ByteSpan::new(stream, payload, declared) else {
        return FrameStep::Incomplete;
    };
    *cursor = payload + declared;
    FrameStep::Frame(span)
}

/// Forward-only iterator over the frames of one received chunk.
///
/// Stops at the end of the chunk, at a trailing partial frame, or after
/// yielding one protocol error.
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    stream: &'a [u8],
    cursor: usize,
    done: bool,
}

impl<'a> Frames<'a> {
    pub fn new(stream: &'a [u8]) -> Self {
        Self {
            stream,
            cursor: 0,
            done: false,
        }
    }

    /// Bytes fully consumed by yielded frames
    #[inline(always)]
    pub fn consumed(&self) -> usize {
        self.cursor
    }

    /// Unconsumed tail (a partial frame, or the bytes after an error)
    #[inline(always)]
    pub fn remainder(&self) -> &'a [u8] {
        &self.stream[self.cursor..]
    }

    /// Total size of the partial frame at the cursor, once its prefix is known.
    pub fn pending_frame_len(&self) -> Option<usize> {
        let rest = self.remainder();
        if rest.len() < LENGTH_PREFIX {
            return None;
        }
        Some(LENGTH_PREFIX + u16::read_le(&rest[..LENGTH_PREFIX]) as usize)
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = std::result::Result<ByteSpan<'a>, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match parse_frame(self.stream, &mut self.cursor) {
            FrameStep::Frame(span) => Some(Ok(span)),
            FrameStep::End | FrameStep::Incomplete => {
                self.done = true;
                None
            }
            FrameStep::Malformed(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
