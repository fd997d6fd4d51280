//! Bridge to a coexisting legacy lock module.
//!
//! An older, independently maintained lock implementation may live in the
//! same process. When it initializes it registers a fixed table of nine
//! capabilities with this layer so that rank checks and panic state cover
//! both kinds of lock.
//!
//! Registration happens at most once per registry. Repeating it with the
//! exact same table is harmless; any difference means two incompatible
//! legacy modules are bridging into one process, which is a contract
//! violation and stops the process.
//!
//! Capabilities are plain function pointers and are compared by address.

use crate::error::LockViolation;
use crate::header::Rank;
use crate::registry::LockRegistry;
use crate::tracing_compat::debug;
use std::fmt;

/// Opaque reference to a lock owned by the legacy module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LegacyLockHandle(usize);

impl LegacyLockHandle {
    /// Wraps the legacy module's own identifier for a lock.
    #[must_use]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn raw(self) -> usize {
        self.0
    }
}

/// Names of the nine capability slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookSlot {
    /// Lists the legacy locks held by the calling thread.
    ListLocks,
    /// Returns the highest legacy rank held by the calling thread.
    CheckRank,
    /// Acquires a legacy lock.
    Lock,
    /// Releases a legacy lock.
    Unlock,
    /// Attempts to acquire a legacy lock without blocking.
    TryLock,
    /// Reports whether the calling thread holds a legacy lock.
    IsLockedByCurrentThread,
    /// Returns the name of a legacy lock.
    NameOfLock,
    /// Puts the legacy module into panic state.
    SetInPanic,
    /// Queries the legacy module's panic state.
    InPanic,
}

impl fmt::Display for HookSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ListLocks => "list-locks",
            Self::CheckRank => "check-rank",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::TryLock => "try-lock",
            Self::IsLockedByCurrentThread => "is-locked-by-current-thread",
            Self::NameOfLock => "name-of-lock",
            Self::SetInPanic => "set-in-panic",
            Self::InPanic => "in-panic",
        };
        f.write_str(name)
    }
}

/// Capability table exposed by the legacy lock module.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyHooks {
    /// Lists held legacy locks through the legacy module's own output.
    pub list_locks: Option<fn()>,
    /// Highest rank the calling thread holds through legacy locks.
    pub check_rank: Option<fn() -> Rank>,
    /// Acquires a legacy lock.
    pub lock: Option<fn(LegacyLockHandle)>,
    /// Releases a legacy lock.
    pub unlock: Option<fn(LegacyLockHandle)>,
    /// Tries to acquire a legacy lock.
    pub try_lock: Option<fn(LegacyLockHandle) -> bool>,
    /// Whether the calling thread holds a legacy lock.
    pub is_locked_by_current_thread: Option<fn(LegacyLockHandle) -> bool>,
    /// Name of a legacy lock.
    pub name_of_lock: Option<fn(LegacyLockHandle) -> String>,
    /// Enters legacy panic state.
    pub set_in_panic: Option<fn()>,
    /// Whether the legacy module is in panic state.
    pub in_panic: Option<fn() -> bool>,
}

macro_rules! slot_addr {
    ($slot:expr) => {
        $slot.map(|f| f as usize)
    };
}

impl LegacyHooks {
    /// Slot addresses in [`HookSlot`] order.
    fn addresses(&self) -> [(HookSlot, Option<usize>); 9] {
        [
            (HookSlot::ListLocks, slot_addr!(self.list_locks)),
            (HookSlot::CheckRank, slot_addr!(self.check_rank)),
            (HookSlot::Lock, slot_addr!(self.lock)),
            (HookSlot::Unlock, slot_addr!(self.unlock)),
            (HookSlot::TryLock, slot_addr!(self.try_lock)),
            (
                HookSlot::IsLockedByCurrentThread,
                slot_addr!(self.is_locked_by_current_thread),
            ),
            (HookSlot::NameOfLock, slot_addr!(self.name_of_lock)),
            (HookSlot::SetInPanic, slot_addr!(self.set_in_panic)),
            (HookSlot::InPanic, slot_addr!(self.in_panic)),
        ]
    }

    /// Returns `true` if no slot is populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses().iter().all(|(_, addr)| addr.is_none())
    }

    /// Returns the first slot whose value differs from `other`'s.
    #[must_use]
    pub fn first_mismatch(&self, other: &Self) -> Option<HookSlot> {
        self.addresses()
            .into_iter()
            .zip(other.addresses())
            .find(|((_, mine), (_, theirs))| mine != theirs)
            .map(|((slot, _), _)| slot)
    }
}

impl LockRegistry {
    /// Registers the legacy module's capability table.
    ///
    /// The first registration with at least one populated slot installs the
    /// table. Every later registration must match it slot for slot; a
    /// mismatch is a [`LockViolation::HookContractViolation`].
    pub fn install_hooks(&self, hooks: LegacyHooks) {
        if let Some(installed) = self.hooks.get() {
            self.check_hook_contract(installed, &hooks);
            return;
        }

        if hooks.is_empty() {
            // Nothing populated yet and nothing offered.
            return;
        }

        match self.hooks.set(hooks) {
            Ok(()) => debug!("legacy lock hooks installed"),
            Err(rejected) => {
                if let Some(installed) = self.hooks.get() {
                    self.check_hook_contract(installed, &rejected);
                }
            }
        }
    }

    /// Returns a copy of the installed capability table.
    ///
    /// Every slot is empty when no legacy module has registered.
    #[must_use]
    pub fn legacy_hooks(&self) -> LegacyHooks {
        self.hooks.get().copied().unwrap_or_default()
    }

    fn check_hook_contract(&self, installed: &LegacyHooks, offered: &LegacyHooks) {
        if let Some(slot) = installed.first_mismatch(offered) {
            self.fatal(LockViolation::HookContractViolation { slot });
        }
    }
}
