//! Panic state and the fatal stop path.
//!
//! Once the process is known to be going down, rank checking is abandoned
//! so that the dump that follows is not interrupted by a second violation.
//! Panic state is shared with the legacy lock module when it registered
//! the matching hooks.
//!
//! [`LockRegistry::dump_and_panic`] counts how often it is entered. A dump
//! callback that re-enters it (for example by acquiring a lock that fails
//! validation) would otherwise loop without ever reaching the stop; after
//! [`MAX_DUMP_LOOP`] entries the registry forces panic state first.

use crate::config::FatalAction;
use crate::error::LockViolation;
use crate::header::LockHeader;
use crate::registry::LockRegistry;
use crate::tracing_compat::{debug, warn};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Dump-and-panic entries tolerated before panic state is forced.
pub const MAX_DUMP_LOOP: u32 = 5;

/// Process panic flag and dump loop counter.
///
/// Both use relaxed ordering: a stale read costs at most one missed or
/// extra diagnostic.
#[derive(Debug, Default)]
pub(crate) struct PanicState {
    in_panic: AtomicBool,
    dump_loops: AtomicU32,
}

impl LockRegistry {
    /// Puts the registry, and the legacy module if bridged, into panic
    /// state. Irreversible.
    pub fn enter_panic(&self) {
        self.panic.in_panic.store(true, Ordering::Relaxed);

        if let Some(set_in_panic) = self.legacy_hooks().set_in_panic {
            set_in_panic();
        }
    }

    /// Returns `true` if this registry or the legacy module is panicking.
    #[must_use]
    pub fn is_panicking(&self) -> bool {
        self.panic.in_panic.load(Ordering::Relaxed)
            || self.legacy_hooks().in_panic.is_some_and(|in_panic| in_panic())
    }

    /// Dumps `header` and stops the process with `violation`.
    pub fn dump_and_panic(&self, header: &LockHeader, violation: LockViolation) -> ! {
        let loops = self.panic.dump_loops.fetch_add(1, Ordering::Relaxed) + 1;
        if loops > MAX_DUMP_LOOP {
            warn!(loops, "dump-and-panic is looping, forcing panic state");
            self.enter_panic();
        }

        header.dump();
        self.fatal(violation)
    }

    /// Reports `violation` and stops according to the configured
    /// [`FatalAction`].
    ///
    /// The reporter is the only sink for the violation text. Under
    /// [`FatalAction::Panic`] the unwind payload is the [`LockViolation`]
    /// itself.
    pub fn fatal(&self, violation: LockViolation) -> ! {
        debug!(
            kind = ?violation.kind(),
            action = ?self.config.fatal_action,
            "stopping on lock violation"
        );
        self.config.reporter.fatal(&violation.to_string());

        match self.config.fatal_action {
            FatalAction::Panic => std::panic::panic_any(violation),
            FatalAction::Abort => std::process::abort(),
        }
    }

    /// Number of dump-and-panic entries so far.
    #[must_use]
    pub fn dump_loop_count(&self) -> u32 {
        self.panic.dump_loops.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Rank;
    use crate::hooks::LegacyHooks;
    use crate::signature::ObjectType;
    use crate::test_utils::{expect_violation, test_registry};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    static LEGACY_PANIC: AtomicBool = AtomicBool::new(false);

    fn legacy_set_in_panic() {
        LEGACY_PANIC.store(true, Ordering::SeqCst);
    }

    fn legacy_in_panic() -> bool {
        LEGACY_PANIC.load(Ordering::SeqCst)
    }

    fn legacy_always_panicking() -> bool {
        true
    }

    #[test]
    fn panic_state_is_sticky() {
        let (registry, _) = test_registry();
        assert!(!registry.is_panicking());
        registry.enter_panic();
        registry.enter_panic();
        assert!(registry.is_panicking());
    }

    #[test]
    fn enter_panic_reaches_legacy_module() {
        let (registry, _) = test_registry();
        registry.install_hooks(LegacyHooks {
            set_in_panic: Some(legacy_set_in_panic),
            in_panic: Some(legacy_in_panic),
            ..LegacyHooks::default()
        });
        registry.enter_panic();
        assert!(LEGACY_PANIC.load(Ordering::SeqCst));
    }

    #[test]
    fn legacy_panic_state_is_observed() {
        let (registry, _) = test_registry();
        registry.install_hooks(LegacyHooks {
            in_panic: Some(legacy_always_panicking),
            ..LegacyHooks::default()
        });
        assert!(registry.is_panicking());
    }

    #[test]
    fn dump_runs_before_stop() {
        let (registry, reporter) = test_registry();
        let dumps = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&dumps);
        let header = LockHeader::new(
            "dumped",
            registry.signature_for(ObjectType::Exclusive),
            1,
            Rank::UNRANKED,
        )
        .with_dump(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let violation = expect_violation(|| {
            registry.dump_and_panic(&header, LockViolation::InvalidSerial { lock: "dumped".into() })
        });
        assert!(matches!(violation, LockViolation::InvalidSerial { .. }));
        assert_eq!(dumps.load(Ordering::SeqCst), 1);
        assert_eq!(reporter.fatals(), vec!["dumped: invalid serial number"]);
    }

    #[test]
    fn fatal_line_is_reported_once_before_unwinding() {
        let (registry, reporter) = test_registry();
        let violation = expect_violation(|| {
            registry.fatal(LockViolation::MissingTracker {
                lock: "orphan".into(),
                thread: "worker".into(),
            })
        });
        assert_eq!(reporter.fatals(), vec![violation.to_string()]);
        assert_eq!(
            reporter.fatals()[0],
            "orphan: tracker record not found (thread worker)"
        );
        assert!(reporter.warnings().is_empty());
    }

    #[test]
    fn looping_dump_forces_panic_state() {
        let (registry, _) = test_registry();
        let header = registry.new_header("looping", ObjectType::Exclusive, Rank::UNRANKED);

        for round in 1..=MAX_DUMP_LOOP {
            let _ = expect_violation(|| {
                registry.dump_and_panic(&header, LockViolation::InvalidSerial { lock: "looping".into() })
            });
            assert_eq!(registry.dump_loop_count(), round);
            assert!(!registry.is_panicking(), "forced too early at round {round}");
        }

        let _ = expect_violation(|| {
            registry.dump_and_panic(&header, LockViolation::InvalidSerial { lock: "looping".into() })
        });
        assert!(registry.is_panicking());
    }
}
