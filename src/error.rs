//! Violation types and configuration errors.
//!
//! Every integrity problem this layer detects is fatal: it is reported,
//! the offending header is dumped where one exists, and control never
//! returns to the caller. [`LockViolation`] is the value that describes
//! such a stop. It is also the panic payload when the registry is
//! configured with [`FatalAction::Panic`](crate::FatalAction::Panic), so
//! tests and supervisors can recover it with
//! `std::panic::catch_unwind` and `downcast`.
//!
//! # Violation Kinds
//!
//! - **RankViolation**: first acquisition of a lock whose rank does not
//!   exceed every rank the thread already holds
//! - **ResourceExhaustion**: a thread would hold more locks than its
//!   tracker record can store
//! - **HeaderCorruption**: signature or serial number check failed
//!   (signature mismatches also cover cross-instance aliasing)
//! - **HookContractViolation**: conflicting legacy hook registration
//! - **InternalConsistency**: release of an untracked lock, missing tracker
//!   record, or failed bootstrap of an internal lock
//!
//! Configuration problems are ordinary recoverable errors
//! ([`ConfigError`]).

use crate::header::Rank;
use crate::hooks::HookSlot;
use crate::signature::Signature;

/// The class of a [`LockViolation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    /// Lock acquired out of rank order.
    RankViolation,
    /// Per-thread lock capacity exceeded.
    ResourceExhaustion,
    /// Header signature or serial number invalid.
    HeaderCorruption,
    /// Legacy hook registration conflicts with an existing one.
    HookContractViolation,
    /// Tracking state disagrees with the operation being performed.
    InternalConsistency,
}

impl ViolationKind {
    /// Returns `true` if a stop of this kind dumps the offending header
    /// before terminating.
    #[must_use]
    pub const fn dumps_header(&self) -> bool {
        matches!(
            self,
            Self::RankViolation | Self::HeaderCorruption | Self::InternalConsistency
        )
    }
}

/// A fatal lock-integrity violation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockViolation {
    /// A lock was acquired for the first time while the thread already held
    /// a lock of equal or higher rank.
    #[error("rank violation by thread {thread}: {lock} rank={rank} maxRank={max_rank}")]
    RankViolation {
        /// Name of the lock being acquired.
        lock: String,
        /// Rank of the lock being acquired.
        rank: Rank,
        /// Highest rank already held (including legacy locks).
        max_rank: Rank,
        /// Name of the acquiring thread.
        thread: String,
    },

    /// The thread's tracker record is full.
    #[error("thread {thread} holds too many locks (capacity {capacity})")]
    ResourceExhaustion {
        /// Name of the acquiring thread.
        thread: String,
        /// Tracker record capacity.
        capacity: usize,
    },

    /// The header signature is not the one this instance issues for the
    /// claimed object type.
    #[error("{lock}: signature failure! expected {expected} observed {observed}")]
    SignatureMismatch {
        /// Lock name.
        lock: String,
        /// Signature this instance expected.
        expected: Signature,
        /// Signature found in the header.
        observed: Signature,
    },

    /// The header carries serial number zero.
    #[error("{lock}: invalid serial number")]
    InvalidSerial {
        /// Lock name.
        lock: String,
    },

    /// A second legacy hook registration supplied a different capability.
    #[error("legacy hook registration conflicts with installed {slot} hook")]
    HookContractViolation {
        /// First slot found to differ.
        slot: HookSlot,
    },

    /// A lock was released that the thread is not tracked as holding.
    #[error("{lock}: lock not found (thread {thread}; count {held})")]
    UntrackedRelease {
        /// Lock name.
        lock: String,
        /// Releasing thread.
        thread: String,
        /// Number of locks the thread is tracked as holding.
        held: usize,
    },

    /// A lock was released by a thread that never acquired a tracked lock.
    #[error("{lock}: tracker record not found (thread {thread})")]
    MissingTracker {
        /// Lock name.
        lock: String,
        /// Releasing thread.
        thread: String,
    },

    /// An internal bookkeeping lock could not be constructed.
    #[error("internal {what} lock could not be initialized")]
    BootstrapFailure {
        /// Which internal lock.
        what: &'static str,
    },
}

impl LockViolation {
    /// Returns the violation class.
    #[must_use]
    pub const fn kind(&self) -> ViolationKind {
        match self {
            Self::RankViolation { .. } => ViolationKind::RankViolation,
            Self::ResourceExhaustion { .. } => ViolationKind::ResourceExhaustion,
            Self::SignatureMismatch { .. } | Self::InvalidSerial { .. } => {
                ViolationKind::HeaderCorruption
            }
            Self::HookContractViolation { .. } => ViolationKind::HookContractViolation,
            Self::UntrackedRelease { .. }
            | Self::MissingTracker { .. }
            | Self::BootstrapFailure { .. } => ViolationKind::InternalConsistency,
        }
    }

    /// Returns `true` for a signature mismatch that carries the right object
    /// type but another library instance's syndrome.
    #[must_use]
    pub fn is_cross_instance(&self) -> bool {
        match self {
            Self::SignatureMismatch {
                expected, observed, ..
            } => {
                expected.type_tag() == observed.type_tag()
                    && expected.syndrome_bits() != observed.syndrome_bits()
            }
            _ => false,
        }
    }
}

/// Error returned when configuration cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable or config key holds an unparseable value.
    #[error("invalid value for {key}: expected {expected}, got {value:?}")]
    InvalidValue {
        /// Variable or key name.
        key: String,
        /// Description of the accepted values.
        expected: &'static str,
        /// The rejected value.
        value: String,
    },

    /// The config file could not be read.
    #[error("failed to read config file {path}: {message}")]
    Io {
        /// Path of the file.
        path: String,
        /// Underlying I/O error message.
        message: String,
    },

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(String),
}
