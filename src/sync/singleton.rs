//! Race-safe lazy construction of internal bookkeeping locks.
//!
//! The tracker's record allocator needs a lock, and that lock must exist
//! before any tracking happens. [`SingletonSlot`] breaks the cycle with a
//! publish-or-discard protocol that depends on nothing else in this crate:
//!
//! 1. Read the slot; if it is populated, return its value.
//! 2. Build a candidate and initialize it.
//! 3. Try to publish the candidate into the empty slot.
//! 4. If another thread published first, drop the candidate and return the
//!    published value. If initialization failed, re-read the slot since
//!    another thread may have succeeded meanwhile.
//!
//! A caller never observes a partially-initialized value, the winning
//! candidate is never dropped, and each losing candidate is dropped exactly
//! once.

use crate::tracing_compat::trace;
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::fmt;
use std::sync::OnceLock;

/// A single shared storage cell holding at most one value.
pub struct SingletonSlot<T> {
    cell: OnceLock<T>,
}

impl<T> SingletonSlot<T> {
    /// Creates an empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// Returns the published value, if any.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    /// Returns the published value, constructing it with `init` if the slot
    /// is empty.
    ///
    /// Returns `None` only when `init` failed and no other thread has
    /// published a value either.
    pub fn get_or_create<E, F>(&self, init: F) -> Option<&T>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(value) = self.cell.get() {
            return Some(value);
        }

        match init() {
            Ok(candidate) => {
                if let Err(loser) = self.cell.set(candidate) {
                    trace!("singleton published by another thread, discarding candidate");
                    drop(loser);
                }
            }
            Err(_) => {
                trace!("singleton initialization failed, re-reading slot");
            }
        }

        self.cell.get()
    }
}

impl<T> Default for SingletonSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for SingletonSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingletonSlot")
            .field("value", &self.cell.get())
            .finish()
    }
}

/// Recursive lock used only for this crate's own bookkeeping.
///
/// Internal locks are never tracked or rank checked. The same thread may
/// re-enter [`InternalLock::with`], but must not do so from inside the
/// closure, since the protected value is already mutably borrowed there.
pub struct InternalLock<T> {
    inner: ReentrantMutex<RefCell<T>>,
}

impl<T> InternalLock<T> {
    /// Creates an internal lock protecting `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: ReentrantMutex::new(RefCell::new(value)),
        }
    }

    /// Runs `f` with exclusive access to the protected value.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let guard = self.inner.lock();
        let mut value = guard.borrow_mut();
        f(&mut value)
    }
}

impl<T> fmt::Debug for InternalLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalLock").finish_non_exhaustive()
    }
}
