//! Tagged RPC argument values
//!
//! Wire encoding of an argument list (no tags on the wire; the receiver
//! knows the rpc's signature):
//! - primitives: fixed little-endian width
//! - strings: `[u16 byte length][utf-8 bytes]`
//! - encodables: whatever their `insert_bytes` writes

use super::encodable::Encodable;
use super::span::{ByteSpan, ByteSpanMut, Primitive};
use crate::error::{Error, ProtocolError, Result};

/// Which payload an [`RpcArgument`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    None,
    Byte,
    U16,
    U32,
    U64,
    I16,
    I32,
    I64,
    F32,
    F64,
    Str,
    Encodable,
}

impl ArgKind {
    /// Fixed wire width, if the kind has one.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            ArgKind::None => Some(0),
            ArgKind::Byte => Some(1),
            ArgKind::U16 | ArgKind::I16 => Some(2),
            ArgKind::U32 | ArgKind::I32 | ArgKind::F32 => Some(4),
            ArgKind::U64 | ArgKind::I64 | ArgKind::F64 => Some(8),
            ArgKind::Str | ArgKind::Encodable => None,
        }
    }
}

/// One typed RPC argument. Owns its payload exclusively.
#[derive(Debug, Clone, Default)]
pub enum RpcArgument {
    #[default]
    None,
    Byte(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Encodable(Box<dyn Encodable>),
}

macro_rules! argument_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for RpcArgument {
                fn from(value: $ty) -> Self {
                    RpcArgument::$variant(value)
                }
            }
        )*
    };
}

argument_from! {
    u8 => Byte,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    String => Str,
}

impl From<&str> for RpcArgument {
    fn from(value: &str) -> Self {
        RpcArgument::Str(value.to_owned())
    }
}

macro_rules! accessor {
    ($($name:ident => $variant:ident: $ty:ty),* $(,)?) => {
        $(
            #[doc = concat!("The stored `", stringify!($ty), "`, or a type mismatch.")]
            pub fn $name(&self) -> Result<$ty> {
                match self {
                    RpcArgument::$variant(v) => Ok(*v),
                    other => Err(Error::TypeMismatch {
                        expected: ArgKind::$variant,
                        found: other.kind(),
                    }),
                }
            }
        )*
    };
}

impl RpcArgument {
    /// Deep-copy `value` into a new argument.
    pub fn encodable(value: &dyn Encodable) -> Self {
        RpcArgument::Encodable(value.clone_box())
    }

    pub fn kind(&self) -> ArgKind {
        match self {
            RpcArgument::None => ArgKind::None,
            RpcArgument::Byte(_) => ArgKind::Byte,
            RpcArgument::U16(_) => ArgKind::U16,
            RpcArgument::U32(_) => ArgKind::U32,
            RpcArgument::U64(_) => ArgKind::U64,
            RpcArgument::I16(_) => ArgKind::I16,
            RpcArgument::I32(_) => ArgKind::I32,
            RpcArgument::I64(_) => ArgKind::I64,
            RpcArgument::F32(_) => ArgKind::F32,
            RpcArgument::F64(_) => ArgKind::F64,
            RpcArgument::Str(_) => ArgKind::Str,
            RpcArgument::Encodable(_) => ArgKind::Encodable,
        }
    }

    accessor! {
        get_byte => Byte: u8,
        get_u16 => U16: u16,
        get_u32 => U32: u32,
        get_u64 => U64: u64,
        get_i16 => I16: i16,
        get_i32 => I32: i32,
        get_i64 => I64: i64,
        get_f32 => F32: f32,
        get_f64 => F64: f64,
    }

    pub fn get_str(&self) -> Result<&str> {
        match self {
            RpcArgument::Str(s) => Ok(s),
            other => Err(Error::TypeMismatch {
                expected: ArgKind::Str,
                found: other.kind(),
            }),
        }
    }

    pub fn get_encodable(&self) -> Result<&dyn Encodable> {
        match self {
            RpcArgument::Encodable(e) => Ok(e.as_ref()),
            other => Err(Error::TypeMismatch {
                expected: ArgKind::Encodable,
                found: other.kind(),
            }),
        }
    }

    /// Bytes this argument occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        match self {
            RpcArgument::Str(s) => 2 + s.len(),
            RpcArgument::Encodable(e) => e.expected_length(),
            other => other.kind().fixed_width().unwrap_or(0),
        }
    }

    /// Write this argument at `offset`; returns the bytes written.
    pub fn encode_into(&self, span: &mut ByteSpanMut<'_>, offset: usize) -> Result<usize> {
        let len = self.encoded_len();
        let out_of_bounds = Error::Bounds {
            offset,
            len,
            span_len: span.len(),
        };
        if offset.checked_add(len).map_or(true, |end| end > span.len()) {
            return Err(out_of_bounds);
        }

        let fits = match self {
            RpcArgument::None => true,
            RpcArgument::Byte(v) => span.try_encode(*v, offset),
            RpcArgument::U16(v) => span.try_encode(*v, offset),
            RpcArgument::U32(v) => span.try_encode(*v, offset),
            RpcArgument::U64(v) => span.try_encode(*v, offset),
            RpcArgument::I16(v) => span.try_encode(*v, offset),
            RpcArgument::I32(v) => span.try_encode(*v, offset),
            RpcArgument::I64(v) => span.try_encode(*v, offset),
            RpcArgument::F32(v) => span.try_encode(*v, offset),
            RpcArgument::F64(v) => span.try_encode(*v, offset),
            RpcArgument::Str(s) => {
                let text_len =
                    u16::try_from(s.len()).map_err(|_| Error::FrameTooLong { len: s.len() })?;
                span.try_encode(text_len, offset) && span.try_write_bytes(s.as_bytes(), offset + 2)
            }
            RpcArgument::Encodable(_) if len == 0 => true,
            RpcArgument::Encodable(e) => {
                let mut region = span.slice_mut(offset, len)?;
                e.insert_bytes(&mut region)
            }
        };
        if !fits {
            return Err(out_of_bounds);
        }
        Ok(len)
    }
}

impl PartialEq for RpcArgument {
    fn eq(&self, other: &Self) -> bool {
        use RpcArgument::*;
        match (self, other) {
            (None, None) => true,
            (Byte(a), Byte(b)) => a == b,
            (U16(a), U16(b)) => a == b,
            (U32(a), U32(b)) => a == b,
            (U64(a), U64(b)) => a == b,
            (I16(a), I16(b)) => a == b,
            (I32(a), I32(b)) => a == b,
            (I64(a), I64(b)) => a == b,
            (F32(a), F32(b)) => a.to_bits() == b.to_bits(),
            (F64(a), F64(b)) => a.to_bits() == b.to_bits(),
            (Str(a), Str(b)) => a == b,
            // Compare encodables by their wire form
            (Encodable(a), Encodable(b)) => encoded_bytes(a.as_ref()) == encoded_bytes(b.as_ref()),
            _ => false,
        }
    }
}

fn encoded_bytes(value: &dyn Encodable) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; value.expected_length()];
    if buf.is_empty() {
        return Some(buf);
    }
    let mut span = ByteSpanMut::from_slice(&mut buf).ok()?;
    value.insert_bytes(&mut span).then_some(())?;
    Some(buf)
}

/// Expected shape of one rpc parameter.
#[derive(Debug, Clone, Copy)]
pub enum Param {
    Kind(ArgKind),
    /// Builds an empty instance to fill from the wire
    Encodable(fn() -> Box<dyn Encodable>),
}

impl From<ArgKind> for Param {
    fn from(kind: ArgKind) -> Self {
        Param::Kind(kind)
    }
}

/// Ordered parameter list of an rpc.
pub type Signature = Vec<Param>;

/// Total wire length of an argument list.
pub fn encoded_len(args: &[RpcArgument]) -> usize {
    args.iter().map(RpcArgument::encoded_len).sum()
}

/// Write `args` back to back starting at `offset`; returns the end offset.
pub fn encode_arguments(
    args: &[RpcArgument],
    span: &mut ByteSpanMut<'_>,
    mut offset: usize,
) -> Result<usize> {
    for arg in args {
        offset += arg.encode_into(span, offset)?;
    }
    Ok(offset)
}

/// Decode an argument list against `signature`.
pub fn decode_arguments(bytes: &[u8], signature: &[Param]) -> Result<Vec<RpcArgument>> {
    let mut offset = 0;
    let mut args = Vec::with_capacity(signature.len());

    for (index, param) in signature.iter().enumerate() {
        let (arg, used) = decode_one(&bytes[offset..], *param, index)?;
        offset += used;
        args.push(arg);
    }

    if offset < bytes.len() {
        return Err(Error::Protocol(ProtocolError::TrailingBytes {
            extra: bytes.len() - offset,
        }));
    }
    Ok(args)
}

fn decode_one(bytes: &[u8], param: Param, index: usize) -> Result<(RpcArgument, usize)> {
    let kind = match param {
        Param::Kind(kind) => kind,
        Param::Encodable(_) => ArgKind::Encodable,
    };
    let truncated = || Error::Protocol(ProtocolError::TruncatedArgument { index, kind });

    fn read<T: Primitive>(bytes: &[u8]) -> Option<(T, usize)> {
        bytes.get(..T::WIDTH).map(|b| (T::read_le(b), T::WIDTH))
    }

    let decoded = match kind {
        ArgKind::None => Some((RpcArgument::None, 0)),
        ArgKind::Byte => read::<u8>(bytes).map(|(v, n)| (RpcArgument::Byte(v), n)),
        ArgKind::U16 => read::<u16>(bytes).map(|(v, n)| (RpcArgument::U16(v), n)),
        ArgKind::U32 => read::<u32>(bytes).map(|(v, n)| (RpcArgument::U32(v), n)),
        ArgKind::U64 => read::<u64>(bytes).map(|(v, n)| (RpcArgument::U64(v), n)),
        ArgKind::I16 => read::<i16>(bytes).map(|(v, n)| (RpcArgument::I16(v), n)),
        ArgKind::I32 => read::<i32>(bytes).map(|(v, n)| (RpcArgument::I32(v), n)),
        ArgKind::I64 => read::<i64>(bytes).map(|(v, n)| (RpcArgument::I64(v), n)),
        ArgKind::F32 => read::<f32>(bytes).map(|(v, n)| (RpcArgument::F32(v), n)),
        ArgKind::F64 => read::<f64>(bytes).map(|(v, n)| (RpcArgument::F64(v), n)),
        ArgKind::Str => {
            let (len, _) = read::<u16>(bytes).ok_or_else(truncated)?;
            let text = bytes.get(2..2 + len as usize).ok_or_else(truncated)?;
            let text = std::str::from_utf8(text)
                .map_err(|_| Error::Protocol(ProtocolError::InvalidUtf8 { index }))?;
            Some((RpcArgument::Str(text.to_owned()), 2 + len as usize))
        }
        ArgKind::Encodable => {
            let Param::Encodable(make) = param else {
                return Err(truncated());
            };
            let mut value = make();
            let span = ByteSpan::from_slice(bytes).map_err(|_| truncated())?;
            value.fill_from_bytes(span).map_err(|_| truncated())?;
            let used = value.expected_length();
            if used > bytes.len() {
                return Err(truncated());
            }
            Some((RpcArgument::Encodable(value), used))
        }
    };
    decoded.ok_or_else(truncated)
}
