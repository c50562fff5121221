//! Typed byte views
//!
//! A span wraps part of an existing byte region, so encode procedures can
//! be handed an exact section of a frame buffer without copying it.
//! Indexing is relative to the start of the span.
//!
//! Layout rules:
//! - Little-endian, fixed width per primitive
//! - Floats travel as their IEEE-754 bit pattern (`to_bits`/`from_bits`)
//! - Spans never own storage; they borrow it

use std::ops::{Index, IndexMut};

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

mod sealed {
    pub trait Sealed {}
}

/// Fixed-width numeric type that can be written into a span.
pub trait Primitive: Copy + sealed::Sealed {
    /// Encoded width in bytes
    const WIDTH: usize;

    fn write_le(self, dst: &mut [u8]);

    fn read_le(src: &[u8]) -> Self;
}

impl sealed::Sealed for u8 {}

impl Primitive for u8 {
    const WIDTH: usize = 1;

    #[inline(always)]
    fn write_le(self, dst: &mut [u8]) {
        dst[0] = self;
    }

    #[inline(always)]
    fn read_le(src: &[u8]) -> Self {
        src[0]
    }
}

macro_rules! impl_primitive {
    ($($ty:ty => $width:expr, $write:ident, $read:ident;)*) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Primitive for $ty {
                const WIDTH: usize = $width;

                #[inline(always)]
                fn write_le(self, dst: &mut [u8]) {
                    LittleEndian::$write(dst, self);
                }

                #[inline(always)]
                fn read_le(src: &[u8]) -> Self {
                    LittleEndian::$read(src)
                }
            }
        )*
    };
}

impl_primitive! {
    u16 => 2, write_u16, read_u16;
    u32 => 4, write_u32, read_u32;
    u64 => 8, write_u64, read_u64;
    i16 => 2, write_i16, read_i16;
    i32 => 4, write_i32, read_i32;
    i64 => 8, write_i64, read_i64;
}

impl sealed::Sealed for f32 {}

impl Primitive for f32 {
    const WIDTH: usize = 4;

    #[inline(always)]
    fn write_le(self, dst: &mut [u8]) {
        LittleEndian::write_u32(dst, self.to_bits());
    }

    #[inline(always)]
    fn read_le(src: &[u8]) -> Self {
        f32::from_bits(LittleEndian::read_u32(src))
    }
}

impl sealed::Sealed for f64 {}

impl Primitive for f64 {
    const WIDTH: usize = 8;

    #[inline(always)]
    fn write_le(self, dst: &mut [u8]) {
        LittleEndian::write_u64(dst, self.to_bits());
    }

    #[inline(always)]
    fn read_le(src: &[u8]) -> Self {
        f64::from_bits(LittleEndian::read_u64(src))
    }
}

fn check_range(offset: usize, len: usize, span_len: usize) -> Result<()> {
    if len == 0 {
        return Err(Error::ZeroLength);
    }
    match offset.checked_add(len) {
        Some(end) if end <= span_len => Ok(()),
        _ => Err(Error::Bounds {
            offset,
            len,
            span_len,
        }),
    }
}

/// Generates the `decode_*` family on a span type.
macro_rules! decoders {
    ($($name:ident => $ty:ty),* $(,)?) => {
        $(
            #[doc = concat!("Decode a `", stringify!($ty), "` at `offset`.")]
            ///
            /// # Panics
            /// The caller must have validated bounds; out-of-range reads panic.
            #[inline(always)]
            pub fn $name(&self, offset: usize) -> $ty {
                self.decode::<$ty>(offset)
            }
        )*
    };
}

/// Read-only view over a byte region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSpan<'a> {
    bytes: &'a [u8],
}

impl<'a> ByteSpan<'a> {
    /// View `len` bytes of `buffer` starting at `start`.
    pub fn new(buffer: &'a [u8], start: usize, len: usize) -> Result<Self> {
        check_range(start, len, buffer.len())?;
        Ok(Self {
            bytes: &buffer[start..start + len],
        })
    }

    /// View the whole of `buffer`.
    pub fn from_slice(buffer: &'a [u8]) -> Result<Self> {
        Self::new(buffer, 0, buffer.len())
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false for a constructed span; present for API symmetry.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Sub-view relative to this span's start.
    pub fn slice(&self, start: usize, len: usize) -> Result<ByteSpan<'a>> {
        Self::new(self.bytes, start, len)
    }

    /// Sub-view from `start` to the end of this span.
    pub fn slice_from(&self, start: usize) -> Result<ByteSpan<'a>> {
        Self::new(self.bytes, start, self.len().saturating_sub(start))
    }

    /// Unchecked-contract decode. Panics on out-of-range access.
    #[inline(always)]
    pub fn decode<T: Primitive>(&self, offset: usize) -> T {
        T::read_le(&self.bytes[offset..offset + T::WIDTH])
    }

    /// Bounds-checked decode for untrusted input.
    #[inline]
    pub fn try_decode<T: Primitive>(&self, offset: usize) -> Option<T> {
        let end = offset.checked_add(T::WIDTH)?;
        self.bytes.get(offset..end).map(T::read_le)
    }

    decoders! {
        decode_u8 => u8,
        decode_u16 => u16,
        decode_u32 => u32,
        decode_u64 => u64,
        decode_i16 => i16,
        decode_i32 => i32,
        decode_i64 => i64,
        decode_f32 => f32,
        decode_f64 => f64,
    }
}

impl Index<usize> for ByteSpan<'_> {
    type Output = u8;

    fn index(&self, index: usize) -> &u8 {
        &self.bytes[index]
    }
}

/// Writable view over a byte region.
#[derive(Debug, PartialEq, Eq)]
pub struct ByteSpanMut<'a> {
    bytes: &'a mut [u8],
}

impl<'a> ByteSpanMut<'a> {
    pub fn new(buffer: &'a mut [u8], start: usize, len: usize) -> Result<Self> {
        check_range(start, len, buffer.len())?;
        Ok(Self {
            bytes: &mut buffer[start..start + len],
        })
    }

    pub fn from_slice(buffer: &'a mut [u8]) -> Result<Self> {
        let len = buffer.len();
        Self::new(buffer, 0, len)
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..]
    }

    #[inline(always)]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[..]
    }

    /// Read-only view of the same bytes.
    pub fn as_span(&self) -> ByteSpan<'_> {
        ByteSpan {
            bytes: &self.bytes[..],
        }
    }

    /// Writable sub-view relative to this span's start.
    pub fn slice_mut(&mut self, start: usize, len: usize) -> Result<ByteSpanMut<'_>> {
        ByteSpanMut::new(&mut self.bytes[..], start, len)
    }

    pub fn slice_from_mut(&mut self, start: usize) -> Result<ByteSpanMut<'_>> {
        let len = self.len().saturating_sub(start);
        ByteSpanMut::new(&mut self.bytes[..], start, len)
    }

    /// Write `value` at `offset`.
    ///
    /// Returns `false` without touching the span if the value does not fit.
    #[inline]
    pub fn try_encode<T: Primitive>(&mut self, value: T, offset: usize) -> bool {
        match offset.checked_add(T::WIDTH) {
            Some(end) if end <= self.bytes.len() => {
                value.write_le(&mut self.bytes[offset..end]);
                true
            }
            _ => false,
        }
    }

    /// Copy raw bytes in at `offset`, all or nothing.
    pub fn try_write_bytes(&mut self, src: &[u8], offset: usize) -> bool {
        match offset.checked_add(src.len()) {
            Some(end) if end <= self.bytes.len() => {
                self.bytes[offset..end].copy_from_slice(src);
                true
            }
            _ => false,
        }
    }

    #[inline(always)]
    pub fn decode<T: Primitive>(&self, offset: usize) -> T {
        T::read_le(&self.bytes[offset..offset + T::WIDTH])
    }

    decoders! {
        decode_u8 => u8,
        decode_u16 => u16,
        decode_u32 => u32,
        decode_u64 => u64,
        decode_i16 => i16,
        decode_i32 => i32,
        decode_i64 => i64,
        decode_f32 => f32,
        decode_f64 => f64,
    }
}

impl Index<usize> for ByteSpanMut<'_> {
    type Output = u8;

    fn index(&self, index: usize) -> &u8 {
        &self.bytes[index]
    }
}

impl IndexMut<usize> for ByteSpanMut<'_> {
    fn index_mut(&mut self, index: usize) -> &mut u8 {
        &mut self.bytes[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_length_rejected() {
        let buf = [0u8; 4];
        assert!(matches!(ByteSpan::new(&buf, 0, 0), Err(Error::ZeroLength)));
        assert!(matches!(
            ByteSpan::new(&buf, 2, 3),
            Err(Error::Bounds { .. })
        ));
    }

    #[test]
    fn test_little_endian_layout() {
        let mut buf = [0u8; 8];
        let mut span = ByteSpanMut::from_slice(&mut buf).unwrap();
        assert!(span.try_encode(0x0102u16, 0));
        assert!(span.try_encode(0x0304_0506u32, 2));
        assert_eq!(buf, [0x02, 0x01, 0x06, 0x05, 0x04, 0x03, 0, 0]);
    }

    #[test]
    fn test_encode_overflow_writes_nothing() {
        let mut buf = [0xAAu8; 6];
        let mut span = ByteSpanMut::new(&mut buf, 1, 4).unwrap();
        assert!(!span.try_encode(7u64, 0));
        assert!(!span.try_encode(7u32, 1));
        assert!(!span.try_encode(7u8, 4));
        assert!(!span.try_encode(7u16, usize::MAX));
        assert_eq!(buf, [0xAA; 6]);
    }

    #[test]
    fn test_slice_is_relative_to_parent() {
        let mut buf = [0u8; 16];
        {
            let mut outer = ByteSpanMut::new(&mut buf, 4, 8).unwrap();
            let mut inner = outer.slice_mut(2, 4).unwrap();
            assert!(inner.try_encode(0xDEAD_BEEFu32, 0));
            assert!(outer.slice_mut(6, 4).is_err());
        }
        assert_eq!(&buf[6..10], &0xDEAD_BEEFu32.to_le_bytes());

        let view = ByteSpan::new(&buf, 4, 8).unwrap();
        let tail = view.slice_from(2).unwrap();
        assert_eq!(tail.len(), 6);
        assert_eq!(tail.decode_u32(0), 0xDEAD_BEEF);
    }

    #[test]
    #[should_panic]
    fn test_index_outside_span_panics() {
        let buf = [1u8, 2, 3, 4];
        let span = ByteSpan::new(&buf, 1, 2).unwrap();
        let _ = span[2];
    }

    #[test]
    fn test_try_decode_bounds() {
        let buf = [1u8, 0, 0];
        let span = ByteSpan::from_slice(&buf).unwrap();
        assert_eq!(span.try_decode::<u16>(0), Some(1));
        assert_eq!(span.try_decode::<u16>(2), None);
        assert_eq!(span.try_decode::<u32>(0), None);
    }

    #[test]
    fn test_float_bit_patterns_preserved() {
        let mut buf = [0u8; 8];
        let mut span = ByteSpanMut::from_slice(&mut buf).unwrap();
        let nan = f32::from_bits(0x7FC0_1234);
        assert!(span.try_encode(nan, 0));
        assert_eq!(span.decode_f32(0).to_bits(), 0x7FC0_1234);

        let denormal = f64::from_bits(1);
        assert!(span.try_encode(denormal, 0));
        assert_eq!(span.decode_f64(0).to_bits(), 1);
    }

    fn round_trip<T: Primitive>(value: T) -> T {
        let mut buf = [0u8; 8];
        let mut span = ByteSpanMut::from_slice(&mut buf).unwrap();
        assert!(span.try_encode(value, 0));
        span.decode::<T>(0)
    }

    proptest! {
        #[test]
        fn prop_integers_round_trip(a: u8, b: u16, c: u32, d: u64, e: i16, f: i32, g: i64) {
            prop_assert_eq!(round_trip(a), a);
            prop_assert_eq!(round_trip(b), b);
            prop_assert_eq!(round_trip(c), c);
            prop_assert_eq!(round_trip(d), d);
            prop_assert_eq!(round_trip(e), e);
            prop_assert_eq!(round_trip(f), f);
            prop_assert_eq!(round_trip(g), g);
        }

        #[test]
        fn prop_floats_round_trip_bitwise(bits32: u32, bits64: u64) {
            let x = f32::from_bits(bits32);
            let y = f64::from_bits(bits64);
            prop_assert_eq!(round_trip(x).to_bits(), bits32);
            prop_assert_eq!(round_trip(y).to_bits(), bits64);
        }

        #[test]
        fn prop_offset_encode_never_spills(value: u32, offset in 0usize..12) {
            let mut buf = [0u8; 12];
            let fits = offset + 4 <= 8;
            {
                let mut span = ByteSpanMut::new(&mut buf, 2, 8).unwrap();
                prop_assert_eq!(span.try_encode(value, offset), fits);
            }
            prop_assert_eq!(&buf[..2], &[0u8, 0][..]);
            prop_assert_eq!(&buf[10..], &[0u8, 0][..]);
        }
    }
}
