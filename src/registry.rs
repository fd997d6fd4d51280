//! The process-wide state container.
//!
//! Every piece of state the instrumentation layer keeps lives in one
//! [`LockRegistry`]: the syndrome, the serial allocator, panic state, the
//! legacy hook table, the tracker store and free list, the lock-tree lock
//! and toggle, and the try-acquire failure slot.
//!
//! Lock implementations normally talk to the process-wide instance from
//! [`global()`]. It is created on first use and never torn down. A separate
//! [`LockRegistry::new`] instance behaves like an independent copy of the
//! library loaded into the same process: it has its own syndrome, so headers
//! created by one are rejected by the other.

use crate::config::LockTrackConfig;
use crate::header::{LockHeader, Rank};
use crate::hooks::LegacyHooks;
use crate::panic::PanicState;
use crate::signature::{ObjectType, Signature, SignatureAuthority};
use crate::sync::{InternalLock, SingletonSlot};
use crate::tracker::{new_thread_store, FreeList, ThreadStore};
use crate::tracing_compat::{debug, warn};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Predicate over a lock name that forces try-acquire attempts to fail.
pub type TryAcquireFailure = fn(&str) -> bool;

/// Holder of all lock-instrumentation state.
pub struct LockRegistry {
    pub(crate) config: LockTrackConfig,
    pub(crate) authority: SignatureAuthority,
    pub(crate) serials: AtomicU64,
    pub(crate) panic: PanicState,
    pub(crate) hooks: OnceLock<LegacyHooks>,
    pub(crate) threads: ThreadStore,
    pub(crate) free_list: SingletonSlot<FreeList>,
    pub(crate) tree_lock: SingletonSlot<InternalLock<()>>,
    pub(crate) collect_tree: AtomicBool,
    try_acquire_failure: RwLock<Option<TryAcquireFailure>>,
}

impl LockRegistry {
    /// Creates an independent registry.
    #[must_use]
    pub fn new(config: LockTrackConfig) -> Self {
        let registry = Self {
            authority: SignatureAuthority::new(config.syndrome_clock),
            serials: AtomicU64::new(1),
            panic: PanicState::default(),
            hooks: OnceLock::new(),
            threads: new_thread_store(),
            free_list: SingletonSlot::new(),
            tree_lock: SingletonSlot::new(),
            collect_tree: AtomicBool::new(false),
            try_acquire_failure: RwLock::new(None),
            config,
        };
        registry.set_lock_tree_collection(registry.config.collect_lock_tree);
        registry
    }

    /// The configuration this registry was built with.
    #[must_use]
    pub fn config(&self) -> &LockTrackConfig {
        &self.config
    }

    /// This instance's syndrome. Never zero.
    pub fn syndrome(&self) -> u32 {
        self.authority.syndrome()
    }

    /// Signature stamped on headers of type `object_type` by this instance.
    pub fn signature_for(&self, object_type: ObjectType) -> Signature {
        self.authority.signature_for(object_type)
    }

    /// Returns a fresh serial number. Never zero.
    pub fn next_serial(&self) -> u64 {
        loop {
            let serial = self.serials.fetch_add(1, Ordering::Relaxed);
            if serial != 0 {
                return serial;
            }
        }
    }

    /// Builds a header for a new lock of type `object_type`.
    pub fn new_header(
        &self,
        name: impl Into<String>,
        object_type: ObjectType,
        rank: Rank,
    ) -> Arc<LockHeader> {
        Arc::new(LockHeader::new(
            name,
            self.signature_for(object_type),
            self.next_serial(),
            rank,
        ))
    }

    /// Installs (or clears, with `None`) the try-acquire failure predicate.
    pub fn set_try_acquire_failure_control(&self, control: Option<TryAcquireFailure>) {
        debug!(installed = control.is_some(), "try-acquire failure control set");
        *self.try_acquire_failure.write() = control;
    }

    /// Asks the installed predicate whether a try-acquire of `name` should
    /// report failure. `false` when none is installed.
    #[must_use]
    pub fn should_force_try_acquire_failure(&self, name: &str) -> bool {
        let control = *self.try_acquire_failure.read();
        control.is_some_and(|force| force(name))
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new(LockTrackConfig::default())
    }
}

impl fmt::Debug for LockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockRegistry")
            .field("config", &self.config)
            .field("authority", &self.authority)
            .field("in_panic", &self.is_panicking())
            .field("hooks_installed", &self.hooks.get().is_some())
            .field("tracked_threads", &self.tracked_thread_count())
            .field("collect_tree", &self.is_lock_tree_available())
            .finish_non_exhaustive()
    }
}

static GLOBAL: OnceLock<LockRegistry> = OnceLock::new();

/// The process-wide registry.
///
/// Created on first use from [`LockTrackConfig::from_env`]; a malformed
/// environment is reported and the defaults are used instead.
pub fn global() -> &'static LockRegistry {
    GLOBAL.get_or_init(|| {
        let config = LockTrackConfig::from_env().unwrap_or_else(|err| {
            warn!(error = %err, "ignoring malformed locktrack environment");
            LockTrackConfig::default()
        });
        LockRegistry::new(config)
    })
}

/// Installs the process-wide registry with an explicit configuration.
///
/// Fails, handing `config` back, once the global registry exists.
pub fn install_global(config: LockTrackConfig) -> Result<&'static LockRegistry, LockTrackConfig> {
    match GLOBAL.set(LockRegistry::new(config)) {
        Ok(()) => Ok(global()),
        Err(rejected) => Err(rejected.config),
    }
}
