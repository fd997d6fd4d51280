//! Lock headers: the part of every lock object this layer inspects.
//!
//! The blocking primitive that embeds a header owns it. The registry only
//! borrows headers (cloning the `Arc` while a lock is held) and reads the
//! name, signature, serial number and rank. The single piece of mutable
//! state is the sticky "bad header" flag.

use crate::error::LockViolation;
use crate::registry::LockRegistry;
use crate::signature::{ObjectType, Signature};
use crate::tracing_compat::warn;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Ordering tag of a lock.
///
/// Locks must be acquired in strictly increasing rank order. [`Rank::UNRANKED`]
/// is the lowest value and opts a lock out of rank checking.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Rank(u32);

impl Rank {
    /// The "no rank" sentinel.
    pub const UNRANKED: Self = Self(0);

    /// Creates a rank from its numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Returns `true` for [`Rank::UNRANKED`].
    #[must_use]
    pub const fn is_unranked(self) -> bool {
        self.0 == Self::UNRANKED.0
    }
}

impl fmt::Debug for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unranked() {
            f.write_str("Rank(UNRANKED)")
        } else {
            write!(f, "Rank({:#x})", self.0)
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Diagnostic dump capability of a header.
pub type DumpFn = Box<dyn Fn(&LockHeader) + Send + Sync>;

/// Identity and ordering metadata shared by every tracked lock.
pub struct LockHeader {
    name: String,
    signature: Signature,
    serial: u64,
    rank: Rank,
    bad_header: AtomicBool,
    dump: DumpFn,
}

impl LockHeader {
    /// Creates a header from its raw parts.
    ///
    /// Most callers want [`LockRegistry::new_header`], which fills in a
    /// valid signature and a fresh serial number.
    #[must_use]
    pub fn new(name: impl Into<String>, signature: Signature, serial: u64, rank: Rank) -> Self {
        Self {
            name: name.into(),
            signature,
            serial,
            rank,
            bad_header: AtomicBool::new(false),
            dump: Box::new(log_header),
        }
    }

    /// Replaces the dump capability.
    #[must_use]
    pub fn with_dump<F>(mut self, dump: F) -> Self
    where
        F: Fn(&Self) + Send + Sync + 'static,
    {
        self.dump = Box::new(dump);
        self
    }

    /// Lock name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signature recorded at construction.
    #[must_use]
    pub const fn signature(&self) -> Signature {
        self.signature
    }

    /// Serial number; zero is never valid.
    #[must_use]
    pub const fn serial(&self) -> u64 {
        self.serial
    }

    /// Rank of the lock.
    #[must_use]
    pub const fn rank(&self) -> Rank {
        self.rank
    }

    /// Returns `true` once validation has failed for this header.
    #[must_use]
    pub fn is_bad(&self) -> bool {
        self.bad_header.load(Ordering::Acquire)
    }

    /// Marks the header bad. Never cleared.
    pub fn mark_bad(&self) {
        self.bad_header.store(true, Ordering::Release);
    }

    /// Runs the dump capability.
    pub fn dump(&self) {
        (self.dump)(self);
    }

    /// Address used to identify this header in diagnostics.
    #[must_use]
    pub fn address(&self) -> usize {
        std::ptr::from_ref(self) as usize
    }
}

impl fmt::Debug for LockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHeader")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("serial", &self.serial)
            .field("rank", &self.rank)
            .field("bad_header", &self.is_bad())
            .finish_non_exhaustive()
    }
}

fn log_header(header: &LockHeader) {
    warn!(
        name = %header.name(),
        address = format_args!("{:#x}", header.address()),
        signature = %header.signature(),
        serial = header.serial(),
        rank = %header.rank(),
        bad_header = header.is_bad(),
        "lock header dump"
    );
}

impl LockRegistry {
    /// Checks that `header` belongs to this library instance and claims to
    /// be an `object_type` lock.
    ///
    /// A header that already failed validation is not checked again. On a
    /// signature mismatch or a zero serial number the header is marked bad
    /// and the process is stopped through the dump-and-panic path.
    pub fn validate_header(&self, header: &LockHeader, object_type: ObjectType) {
        let expected = self.signature_for(object_type);

        if header.is_bad() {
            return;
        }

        if header.signature() != expected {
            header.mark_bad();
            self.dump_and_panic(
                header,
                LockViolation::SignatureMismatch {
                    lock: header.name().to_owned(),
                    expected,
                    observed: header.signature(),
                },
            );
        }

        if header.serial() == 0 {
            header.mark_bad();
            self.dump_and_panic(
                header,
                LockViolation::InvalidSerial {
                    lock: header.name().to_owned(),
                },
            );
        }
    }
}
