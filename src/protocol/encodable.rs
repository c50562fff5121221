//! Capability for custom RPC argument types.

use std::fmt;

use super::span::{ByteSpan, ByteSpanMut};
use crate::error::Result;

/// A type that knows its own wire encoding.
///
/// Values carried inside an [`RpcArgument`](super::RpcArgument) are deep
/// copies made with [`Encodable::clone_box`], never aliases of the caller's
/// object.
pub trait Encodable: fmt::Debug + Send + 'static {
    /// Write this value at the start of `bytes`. Returns `false` if it does not fit.
    fn insert_bytes(&self, bytes: &mut ByteSpanMut<'_>) -> bool;

    /// Number of bytes `insert_bytes` will write.
    fn expected_length(&self) -> usize;

    /// Overwrite this value from the start of `bytes`.
    fn fill_from_bytes(&mut self, bytes: ByteSpan<'_>) -> Result<()>;

    fn clone_box(&self) -> Box<dyn Encodable>;
}

impl Clone for Box<dyn Encodable> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
