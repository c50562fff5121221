//! Client, network-object and rpc identities
//!
//! Each kind is a small unsigned integer with 0 reserved as "none".
//! Fresh values come from an [`IdAllocator`], a monotonic counter that
//! never reissues a value, even after the owner disconnects. Observing a
//! value received over the wire pushes the counter past it, so local
//! identities never collide with remote ones.
//!
//! Allocators are plain values. Components that mint identities share one
//! [`Identities`] bundle instead of reaching for process globals.

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::protocol::{ByteSpan, ByteSpanMut, Encodable, Primitive};

/// Common surface of the three identity kinds.
pub trait Identity: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Wire type of the identity
    type Raw: Primitive + Into<u64>;

    /// Human-readable kind, used in errors and `Display`
    const KIND: &'static str;

    /// Largest raw value the kind can hold
    const MAX: u64;

    /// Wraps a raw value that is already known to fit.
    fn from_u64(raw: u64) -> Self;

    fn as_u64(self) -> u64;
}

macro_rules! identity {
    ($(#[$meta:meta])* $name:ident, $raw:ty, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name($raw);

        impl $name {
            /// Encoded width in bytes
            pub const SIZE: usize = <$raw as Primitive>::WIDTH;

            /// The reserved "none" value.
            #[inline(always)]
            pub const fn none() -> Self {
                Self(0)
            }

            /// Wrap a raw value without touching any allocator.
            #[inline(always)]
            pub const fn from_raw(raw: $raw) -> Self {
                Self(raw)
            }

            #[inline(always)]
            pub const fn get(self) -> $raw {
                self.0
            }

            #[inline(always)]
            pub const fn is_none(self) -> bool {
                self.0 == 0
            }

            /// Read an identity from the start of `bytes`.
            pub fn decode(bytes: ByteSpan<'_>) -> Option<Self> {
                bytes.try_decode::<$raw>(0).map(Self)
            }
        }

        impl Identity for $name {
            type Raw = $raw;

            const KIND: &'static str = $kind;
            const MAX: u64 = <$raw>::MAX as u64;

            #[inline(always)]
            fn from_u64(raw: u64) -> Self {
                Self(raw as $raw)
            }

            #[inline(always)]
            fn as_u64(self) -> u64 {
                self.0 as u64
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_none() {
                    write!(f, "<{}: None>", $kind)
                } else {
                    write!(f, "<{}: {}>", $kind, self.0)
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }

        impl Encodable for $name {
            fn insert_bytes(&self, bytes: &mut ByteSpanMut<'_>) -> bool {
                bytes.try_encode(self.0, 0)
            }

            fn expected_length(&self) -> usize {
                Self::SIZE
            }

            fn fill_from_bytes(&mut self, bytes: ByteSpan<'_>) -> Result<()> {
                self.0 = bytes.try_decode::<$raw>(0).ok_or(Error::Bounds {
                    offset: 0,
                    len: Self::SIZE,
                    span_len: bytes.len(),
                })?;
                Ok(())
            }

            fn clone_box(&self) -> Box<dyn Encodable> {
                Box::new(*self)
            }
        }
    };
}

identity!(
    /// Names a connected client. The server itself is `ClientId::none()`.
    ClientId,
    u32,
    "ClientId"
);

identity!(
    /// Names a network object that rpcs can target.
    NetworkId,
    u32,
    "NetworkId"
);

identity!(
    /// Names an rpc. Values below [`RpcId::FIRST_USER`] are reserved.
    RpcId,
    u16,
    "RpcId"
);

impl RpcId {
    pub const CLIENT_CONNECTED: RpcId = RpcId(1);
    pub const LOCAL_CLIENT_CONNECTED: RpcId = RpcId(2);
    pub const CLIENT_DISCONNECTED: RpcId = RpcId(3);
    pub const OBJECT_SPAWN: RpcId = RpcId(4);
    pub const OBJECT_DESPAWN: RpcId = RpcId(5);

    /// First id available to user rpcs
    pub const FIRST_USER: RpcId = RpcId(10);

    #[inline(always)]
    pub fn is_client_event(self) -> bool {
        matches!(
            self,
            Self::CLIENT_CONNECTED | Self::LOCAL_CLIENT_CONNECTED | Self::CLIENT_DISCONNECTED
        )
    }

    #[inline(always)]
    pub fn is_object_event(self) -> bool {
        matches!(self, Self::OBJECT_SPAWN | Self::OBJECT_DESPAWN)
    }

    #[inline(always)]
    pub fn is_reserved(self) -> bool {
        self.0 < Self::FIRST_USER.0
    }
}

/// Monotonic allocator for one identity kind.
///
/// Starts at 1 so that "none" is never issued.
pub struct IdAllocator<I: Identity> {
    next: AtomicU64,
    _kind: PhantomData<fn() -> I>,
}

impl<I: Identity> IdAllocator<I> {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            _kind: PhantomData,
        }
    }

    /// Issue the next unused identity.
    pub fn allocate(&self) -> Result<I> {
        let mut current = self.next.load(Ordering::Relaxed);
        loop {
            if current > I::MAX {
                return Err(Error::IdentitiesExhausted { kind: I::KIND });
            }
            match self.next.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(I::from_u64(current)),
                Err(actual) => current = actual,
            }
        }
    }

    /// Record an identity minted elsewhere and return it.
    ///
    /// Later calls to [`allocate`](Self::allocate) never return `raw` or anything below it.
    pub fn observe(&self, raw: I::Raw) -> I {
        let raw: u64 = raw.into();
        self.next.fetch_max(raw + 1, Ordering::AcqRel);
        I::from_u64(raw)
    }

    /// Value the next `allocate` would return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }
}

impl<I: Identity> Default for IdAllocator<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Identity> fmt::Debug for IdAllocator<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdAllocator")
            .field("kind", &I::KIND)
            .field("next", &self.peek())
            .finish()
    }
}

/// The three allocators a connection endpoint mints from.
#[derive(Debug)]
pub struct Identities {
    pub clients: IdAllocator<ClientId>,
    pub networks: IdAllocator<NetworkId>,
    pub rpcs: IdAllocator<RpcId>,
}

impl Identities {
    /// Fresh allocators with the reserved rpc range already consumed.
    pub fn new() -> Self {
        let rpcs = IdAllocator::new();
        rpcs.observe(RpcId::FIRST_USER.get() - 1);
        Self {
            clients: IdAllocator::new(),
            networks: IdAllocator::new(),
            rpcs,
        }
    }
}

impl Default for Identities {
    fn default() -> Self {
        Self::new()
    }
}
