//! Instance signatures for lock headers.
//!
//! Every copy of this library that is loaded into a process generates its own
//! syndrome: a coarse, externally sourced value computed once and then fixed
//! for the lifetime of the process. A header signature combines that syndrome
//! with the object type of the lock that owns the header:
//!
//! ```text
//!  31      28 27                                   0
//! +----------+--------------------------------------+
//! | obj type |          syndrome (28 bits)          |
//! +----------+--------------------------------------+
//! ```
//!
//! A lock created by one copy of the library and handed to another copy
//! carries the wrong syndrome bits, so validation catches locks that are
//! aliased between incompatible library instances.

use crate::tracing_compat::trace;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Mask selecting the syndrome portion of a signature.
pub const SYNDROME_MASK: u32 = 0x0FFF_FFFF;

/// Shift applied to the object type tag within a signature.
const TYPE_SHIFT: u32 = 28;

/// Reserved tag that no object type may use.
const NEVER_USE_TAG: u8 = 0;

/// Kinds of lock objects that carry a [`LockHeader`](crate::LockHeader).
///
/// Tag `0` is reserved and cannot be represented; tags are limited to four
/// bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ObjectType {
    /// Reader/writer lock.
    ReadWrite = 1,
    /// Recursive mutex.
    Recursive = 2,
    /// Rank-only lock (ordering bookkeeping without a blocking primitive).
    Rank = 3,
    /// Exclusive (non-recursive) mutex.
    Exclusive = 4,
    /// Counting semaphore.
    Semaphore = 5,
    /// Condition variable.
    Condition = 6,
    /// Barrier.
    Barrier = 7,
    /// Event.
    Event = 8,
}

impl ObjectType {
    /// Every object type, in tag order.
    pub const ALL: [Self; 8] = [
        Self::ReadWrite,
        Self::Recursive,
        Self::Rank,
        Self::Exclusive,
        Self::Semaphore,
        Self::Condition,
        Self::Barrier,
        Self::Event,
    ];

    /// Returns the four-bit tag for this type.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Maps a raw tag back to an object type.
    ///
    /// Returns `None` for the reserved tag, for unassigned tags, and for
    /// anything that does not fit in four bits.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::ReadWrite),
            2 => Some(Self::Recursive),
            3 => Some(Self::Rank),
            4 => Some(Self::Exclusive),
            5 => Some(Self::Semaphore),
            6 => Some(Self::Condition),
            7 => Some(Self::Barrier),
            8 => Some(Self::Event),
            _ => None,
        }
    }
}

/// A 32-bit header signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(u32);

impl Signature {
    /// Wraps a raw signature value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw 32-bit value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns the syndrome bits.
    #[must_use]
    pub const fn syndrome_bits(self) -> u32 {
        self.0 & SYNDROME_MASK
    }

    /// Returns the object type tag bits.
    #[must_use]
    pub const fn type_tag(self) -> u8 {
        (self.0 >> TYPE_SHIFT) as u8
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({:#010X})", self.0)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#X}", self.0)
    }
}

/// Coarse time source used to seed the syndrome: wall-clock seconds.
#[must_use]
pub fn wall_clock_seconds() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs() as u32)
}

/// Owner of this library instance's syndrome.
#[derive(Debug)]
pub struct SignatureAuthority {
    syndrome: AtomicU32,
    clock: fn() -> u32,
}

impl SignatureAuthority {
    /// Creates an authority that seeds its syndrome from `clock` on first use.
    #[must_use]
    pub const fn new(clock: fn() -> u32) -> Self {
        Self {
            syndrome: AtomicU32::new(0),
            clock,
        }
    }

    /// Returns the syndrome, computing and publishing it on first call.
    ///
    /// The result is never zero. Racing callers may each compute a value;
    /// the first one published wins and every caller returns it.
    pub fn syndrome(&self) -> u32 {
        let current = self.syndrome.load(Ordering::Acquire);
        if current != 0 {
            return current;
        }

        let mut candidate = (self.clock)();
        if candidate == 0 {
            // total failure of the time source
            candidate = 1;
        }

        if let Err(published) =
            self.syndrome
                .compare_exchange(0, candidate, Ordering::AcqRel, Ordering::Acquire)
        {
            trace!(
                candidate,
                published,
                "syndrome already published by another thread"
            );
            return published;
        }
        candidate
    }

    /// Returns the signature for objects of type `object_type`.
    pub fn signature_for(&self, object_type: ObjectType) -> Signature {
        debug_assert_ne!(object_type.tag(), NEVER_USE_TAG);
        let raw = (self.syndrome() & SYNDROME_MASK) | (u32::from(object_type.tag()) << TYPE_SHIFT);
        debug_assert_ne!(raw, 0);
        Signature(raw)
    }
}

impl Default for SignatureAuthority {
    fn default() -> Self {
        Self::new(wall_clock_seconds)
    }
}
