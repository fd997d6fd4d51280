//! Locktrack: rank checking and held-lock tracking for lock implementations.
//!
//! # Overview
//!
//! Locktrack is the instrumentation layer that sits underneath a family of
//! lock primitives (exclusive, recursive, read-write, semaphore, condition,
//! barrier and event locks). It does not lock anything itself. Lock
//! implementations report every acquisition and release to it, and it
//! enforces a global acquisition order, tracks which locks each thread
//! holds, and detects corrupted or foreign lock headers.
//!
//! # Core Guarantees
//!
//! - **Rank order**: a thread only enters a ranked lock for the first time
//!   if it outranks every lock the thread already holds
//! - **Header identity**: every header carries a signature bound to the
//!   library instance that created it; a header from another instance or a
//!   corrupted one is caught on validation and reported once
//! - **Bounded tracking**: a thread can hold at most
//!   [`MAX_LOCKS_PER_THREAD`] tracked locks; exceeding that is fatal
//! - **Fail stop**: every violation is reported with the held locks of the
//!   offending thread and then stops the process (see [`FatalAction`])
//!
//! # Module Structure
//!
//! - [`registry`]: The process-wide state container and [`global()`]
//! - [`rank`]: Acquire/release tracking and rank checking
//! - [`tracker`]: Per-thread held-lock records
//! - [`signature`]: Instance syndrome and header signatures
//! - [`header`]: Lock headers and header validation
//! - [`panic`]: Panic state and the fatal stop path
//! - [`hooks`]: Bridge to a coexisting legacy lock module
//! - [`tree`]: Lock-ancestry collection for development builds
//! - [`report`]: Diagnostic sinks
//! - [`config`]: Configuration and environment overrides
//! - [`error`]: Violation and configuration error types
//! - [`sync`]: Untracked primitives for the tracker's own bookkeeping
//!
//! # Example
//!
//! ```
//! use locktrack::{LockRegistry, LockTrackConfig, ObjectType, Rank};
//!
//! let registry = LockRegistry::new(LockTrackConfig::default());
//! let outer = registry.new_header("outer", ObjectType::Exclusive, Rank::new(10));
//! let inner = registry.new_header("inner", ObjectType::Exclusive, Rank::new(20));
//!
//! registry.acquire(&outer, true);
//! registry.acquire(&inner, true);
//! assert_eq!(registry.current_rank(), Rank::new(20));
//!
//! registry.release(&inner);
//! registry.release(&outer);
//! assert!(!registry.is_current_thread_holding_locks());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod error;
pub mod header;
pub mod hooks;
pub mod panic;
pub mod rank;
pub mod registry;
pub mod report;
pub mod signature;
pub mod sync;
pub mod tracker;
pub mod tree;

pub(crate) mod tracing_compat;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenient access to core types
pub use config::{FatalAction, LockTrackConfig};
pub use error::{ConfigError, LockViolation, ViolationKind};
pub use header::{DumpFn, LockHeader, Rank};
pub use hooks::{HookSlot, LegacyHooks, LegacyLockHandle};
pub use panic::MAX_DUMP_LOOP;
pub use registry::{global, install_global, LockRegistry, TryAcquireFailure};
pub use report::{CaptureReporter, ReportLevel, Reporter, TracingReporter};
pub use signature::{ObjectType, Signature, SignatureAuthority};
pub use tracker::{HeldLock, ThreadRecord, MAX_LOCKS_PER_THREAD, MAX_RECURSION_DEPTH};
pub use tree::{LockTreeCollector, LockTreeNode, MemoryLockTree};
