//! Test utilities for locktrack.
//!
//! This module provides shared helpers for unit tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - Isolated registries wired to a capturing reporter
//! - Capture of fatal violations raised through the panic path

use crate::config::{FatalAction, LockTrackConfig};
use crate::error::LockViolation;
use crate::registry::LockRegistry;
use crate::report::CaptureReporter;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Once};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquire the global environment lock for tests that mutate env vars.
pub(crate) fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Registry with a capturing reporter that unwinds on violations.
pub(crate) fn test_registry() -> (LockRegistry, Arc<CaptureReporter>) {
    test_registry_with(LockTrackConfig::default().fatal_action(FatalAction::Panic))
}

/// Registry built from `config` with its reporter replaced by a capture.
pub(crate) fn test_registry_with(config: LockTrackConfig) -> (LockRegistry, Arc<CaptureReporter>) {
    init_test_logging();
    let reporter = Arc::new(CaptureReporter::new());
    let registry = LockRegistry::new(config.reporter(reporter.clone()));
    (registry, reporter)
}

/// Runs `f`, which must stop with a fatal violation, and returns it.
pub(crate) fn expect_violation<R>(f: impl FnOnce() -> R) -> LockViolation {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(_) => panic!("expected a lock violation, operation returned normally"),
        Err(payload) => match payload.downcast::<LockViolation>() {
            Ok(violation) => *violation,
            Err(other) => panic::resume_unwind(other),
        },
    }
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Rank;
    use crate::signature::ObjectType;

    #[test]
    fn expect_violation_returns_the_payload() {
        let (registry, reporter) = test_registry();
        let violation = expect_violation(|| {
            registry.fatal(LockViolation::BootstrapFailure { what: "test" })
        });
        assert_eq!(violation, LockViolation::BootstrapFailure { what: "test" });
        assert_eq!(reporter.fatals().len(), 1);
    }

    #[test]
    fn foreign_panics_are_propagated() {
        let result = panic::catch_unwind(|| expect_violation(|| panic!("not a violation")));
        assert!(result.is_err());
    }

    #[test]
    fn registries_are_isolated() {
        crate::test_phase!("registries_are_isolated");
        let (first, _) = test_registry();
        let (second, _) = test_registry();
        let h = first.new_header("iso", ObjectType::Exclusive, Rank::UNRANKED);
        first.acquire(&h, true);
        crate::assert_with_log!(
            second.tracked_thread_count() == 0,
            "second registry sees no threads",
            0,
            second.tracked_thread_count()
        );
        first.release(&h);
        crate::test_complete!("registries_are_isolated");
    }
}
