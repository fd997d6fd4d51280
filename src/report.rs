//! Diagnostic reporting sinks.
//!
//! Held-lock listings, rank violation warnings and fatal messages are
//! written through a [`Reporter`]. The format is human-readable and carries
//! no stability guarantee.
//!
//! Reporters are called on the fatal path, so implementations must not
//! acquire tracked locks or call back into the registry.

use parking_lot::Mutex;
use std::fmt;

/// Sink for human-readable lock diagnostics.
pub trait Reporter: fmt::Debug + Send + Sync + 'static {
    /// Emits a warning line.
    fn warning(&self, message: &str);

    /// Emits the message that immediately precedes a fatal stop.
    fn fatal(&self, message: &str);
}

/// Reporter that forwards to `tracing` under the `locktrack` target.
///
/// Without the `tracing-integration` feature, lines go to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    #[cfg(feature = "tracing-integration")]
    fn warning(&self, message: &str) {
        tracing::warn!(target: "locktrack", "{message}");
    }

    #[cfg(not(feature = "tracing-integration"))]
    fn warning(&self, message: &str) {
        eprintln!("locktrack: {message}");
    }

    #[cfg(feature = "tracing-integration")]
    fn fatal(&self, message: &str) {
        tracing::error!(target: "locktrack", "{message}");
    }

    #[cfg(not(feature = "tracing-integration"))]
    fn fatal(&self, message: &str) {
        eprintln!("locktrack: FATAL: {message}");
    }
}

/// Severity of a captured line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportLevel {
    /// Emitted through [`Reporter::warning`].
    Warning,
    /// Emitted through [`Reporter::fatal`].
    Fatal,
}

/// Reporter that keeps every line in memory.
///
/// Useful for tests and for embedders that want to attach the diagnostic
/// trail to their own crash report.
#[derive(Debug, Default)]
pub struct CaptureReporter {
    lines: Mutex<Vec<(ReportLevel, String)>>,
}

impl CaptureReporter {
    /// Creates an empty capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every captured line with its level.
    #[must_use]
    pub fn entries(&self) -> Vec<(ReportLevel, String)> {
        self.lines.lock().clone()
    }

    /// Returns the captured warning lines.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.lines_at(ReportLevel::Warning)
    }

    /// Returns the captured fatal lines.
    #[must_use]
    pub fn fatals(&self) -> Vec<String> {
        self.lines_at(ReportLevel::Fatal)
    }

    /// Returns `true` if any captured line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|(_, line)| line.contains(needle))
    }

    /// Discards everything captured so far.
    pub fn clear(&self) {
        self.lines.lock().clear();
    }

    fn lines_at(&self, level: ReportLevel) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line.clone())
            .collect()
    }
}

impl Reporter for CaptureReporter {
    fn warning(&self, message: &str) {
        self.lines
            .lock()
            .push((ReportLevel::Warning, message.to_owned()));
    }

    fn fatal(&self, message: &str) {
        self.lines.lock().push((ReportLevel::Fatal, message.to_owned()));
    }
}
