//! Synchronization building blocks for the tracker's own bookkeeping.
//!
//! - [`SingletonSlot`]: publish-or-discard lazy construction
//! - [`InternalLock`]: untracked recursive lock

mod singleton;

pub use singleton::{InternalLock, SingletonSlot};
