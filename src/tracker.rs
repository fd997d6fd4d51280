//! Per-thread held-lock tracking.
//!
//! Each OS thread that acquires a tracked lock gets a [`ThreadRecord`]: a
//! fixed-capacity, insertion-ordered set of the headers it currently holds.
//! Records live in a store keyed by [`ThreadId`] and are handed out by a
//! small allocator that recycles records through a free list.
//!
//! # Record Lifecycle
//!
//! ```text
//!  free list ──alloc──▶ candidate ──insert wins──▶ attached (forever)
//!      ▲                    │
//!      └────insert loses────┘
//! ```
//!
//! Attached records are never detached. A thread that took a lock once is
//! likely to take one again, so the record is kept for the remaining
//! process lifetime.
//!
//! # Access Rules
//!
//! A record's contents are only mutated by its owning thread. Other threads
//! read them for diagnostics with a non-blocking attempt, so a listing
//! requested while the owner is mid-update is skipped rather than waited
//! for.
//!
//! # Header Lifetime
//!
//! A record stores a clone of each held header's `Arc`, so a tracked header
//! stays alive until its release removes the entry, even if the lock object
//! that embeds it is dropped first.

use crate::error::LockViolation;
use crate::header::{LockHeader, Rank};
use crate::registry::LockRegistry;
use crate::sync::InternalLock;
use crate::tracing_compat::{debug, trace};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, Thread, ThreadId};

/// Deepest supported recursive acquisition of a single lock.
pub const MAX_RECURSION_DEPTH: usize = 16;

/// Capacity of a thread's held-lock set.
pub const MAX_LOCKS_PER_THREAD: usize = 2 * MAX_RECURSION_DEPTH;

/// Initial capacity of the thread store.
const STORE_CAPACITY: usize = 1024;

/// Thread-identity-keyed record store.
pub(crate) type ThreadStore = RwLock<HashMap<ThreadId, Arc<ThreadRecord>>>;

/// Free list of unattached records, guarded by an internal lock.
pub(crate) type FreeList = InternalLock<Vec<Arc<ThreadRecord>>>;

pub(crate) fn new_thread_store() -> ThreadStore {
    RwLock::new(HashMap::with_capacity(STORE_CAPACITY))
}

/// Human-readable thread label for diagnostics.
pub(crate) fn thread_label(thread: &Thread) -> String {
    match thread.name() {
        Some(name) => format!("{name} ({:?})", thread.id()),
        None => format!("{:?}", thread.id()),
    }
}

/// Snapshot of one held lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldLock {
    /// Lock name.
    pub name: String,
    /// Header address.
    pub address: usize,
    /// Serial number.
    pub serial: u64,
    /// Rank.
    pub rank: Rank,
}

impl HeldLock {
    fn of(header: &LockHeader) -> Self {
        Self {
            name: header.name().to_owned(),
            address: header.address(),
            serial: header.serial(),
            rank: header.rank(),
        }
    }
}

impl fmt::Display for HeldLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\tlock {} (@{:#x}) rank {}",
            self.name, self.address, self.rank
        )
    }
}

struct HeldSet {
    count: usize,
    locks: [Option<Arc<LockHeader>>; MAX_LOCKS_PER_THREAD],
}

impl HeldSet {
    fn empty() -> Self {
        Self {
            count: 0,
            locks: std::array::from_fn(|_| None),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<LockHeader>> {
        self.locks[..self.count].iter().flatten()
    }
}

/// Per-thread record of held locks.
pub struct ThreadRecord {
    held: Mutex<HeldSet>,
}

impl ThreadRecord {
    fn new() -> Self {
        Self {
            held: Mutex::new(HeldSet::empty()),
        }
    }

    fn reset(&self) {
        *self.held.lock() = HeldSet::empty();
    }

    /// Number of locks currently held.
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.held.lock().count
    }

    /// Returns `true` if the record cannot take another lock.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.held_count() >= MAX_LOCKS_PER_THREAD
    }

    /// Appends `header`; fails with the capacity when full.
    pub(crate) fn push(&self, header: &Arc<LockHeader>) -> Result<(), usize> {
        let mut held = self.held.lock();
        if held.count >= MAX_LOCKS_PER_THREAD {
            return Err(MAX_LOCKS_PER_THREAD);
        }
        let slot = held.count;
        held.locks[slot] = Some(Arc::clone(header));
        held.count += 1;
        Ok(())
    }

    /// Removes the first entry for `header`, compacting the entries after
    /// it. Fails with the current count when `header` is not held.
    pub(crate) fn remove(&self, header: &LockHeader) -> Result<(), usize> {
        let mut held = self.held.lock();
        let count = held.count;
        let Some(index) = held.locks[..count]
            .iter()
            .position(|entry| entry.as_deref().is_some_and(|h| std::ptr::eq(h, header)))
        else {
            return Err(count);
        };

        held.locks[index..count].rotate_left(1);
        held.locks[count - 1] = None;
        held.count -= 1;
        Ok(())
    }

    /// Highest rank held, and whether `header` is not held yet.
    pub(crate) fn rank_scan(&self, header: &LockHeader) -> (Rank, bool) {
        let held = self.held.lock();
        let mut max_rank = Rank::UNRANKED;
        let mut first_instance = true;
        for entry in held.iter() {
            max_rank = max_rank.max(entry.rank());
            if std::ptr::eq(Arc::as_ptr(entry), header) {
                first_instance = false;
            }
        }
        (max_rank, first_instance)
    }

    /// Highest rank held.
    #[must_use]
    pub fn max_rank(&self) -> Rank {
        self.held
            .lock()
            .iter()
            .map(|entry| entry.rank())
            .max()
            .unwrap_or(Rank::UNRANKED)
    }

    /// Held headers in acquisition order.
    pub(crate) fn headers(&self) -> Vec<Arc<LockHeader>> {
        self.held.lock().iter().cloned().collect()
    }

    /// Best-effort snapshot that never waits on the owner.
    fn try_snapshot(&self) -> Option<Vec<HeldLock>> {
        let held = self.held.try_lock()?;
        Some(held.iter().map(|h| HeldLock::of(h)).collect())
    }
}

impl fmt::Debug for ThreadRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.held.try_lock().map(|held| held.count);
        f.debug_struct("ThreadRecord")
            .field("held", &count)
            .finish()
    }
}

impl LockRegistry {
    /// Returns the record attached to `thread`.
    ///
    /// When the thread has none and `may_allocate` is set, a zeroed record
    /// is taken from the free list (or freshly allocated) and inserted. If
    /// another insertion for the same thread wins the race, the candidate
    /// goes back to the free list and the winner is returned.
    pub fn thread_record(&self, thread: ThreadId, may_allocate: bool) -> Option<Arc<ThreadRecord>> {
        if let Some(record) = self.threads.read().get(&thread) {
            return Some(Arc::clone(record));
        }
        if !may_allocate {
            return None;
        }

        let candidate = self.alloc_record();
        let mut store = self.threads.write();
        let winner = Arc::clone(
            store
                .entry(thread)
                .or_insert_with(|| Arc::clone(&candidate)),
        );
        drop(store);

        if !Arc::ptr_eq(&winner, &candidate) {
            trace!(?thread, "tracker record inserted concurrently, recycling candidate");
            self.free_record(candidate);
        }
        Some(winner)
    }

    /// Record of the calling thread, allocating it if needed.
    pub(crate) fn current_record(&self) -> Arc<ThreadRecord> {
        let thread = thread::current();
        match self.thread_record(thread.id(), true) {
            Some(record) => record,
            None => self.fatal(LockViolation::BootstrapFailure {
                what: "tracker record",
            }),
        }
    }

    fn free_list(&self) -> &FreeList {
        match self
            .free_list
            .get_or_create(|| Ok::<_, Infallible>(InternalLock::new(Vec::new())))
        {
            Some(list) => list,
            None => self.fatal(LockViolation::BootstrapFailure {
                what: "tracker free list",
            }),
        }
    }

    fn alloc_record(&self) -> Arc<ThreadRecord> {
        let recycled = self.free_list().with(Vec::pop);
        match recycled {
            Some(record) => {
                record.reset();
                record
            }
            None => {
                debug!("allocating tracker record");
                Arc::new(ThreadRecord::new())
            }
        }
    }

    fn free_record(&self, record: Arc<ThreadRecord>) {
        self.free_list().with(|list| list.push(record));
    }

    /// Appends `header` to `record`, stopping the process when the record is
    /// already full.
    pub fn push_held(&self, record: &ThreadRecord, header: &Arc<LockHeader>) {
        if let Err(capacity) = record.push(header) {
            self.fatal(LockViolation::ResourceExhaustion {
                thread: thread_label(&thread::current()),
                capacity,
            });
        }
    }

    /// Removes `header` from `record`.
    ///
    /// A release must match a tracked acquisition; anything else is an
    /// internal consistency violation.
    pub fn remove_held(&self, record: &ThreadRecord, header: &LockHeader) {
        if let Err(held) = record.remove(header) {
            self.dump_and_panic(
                header,
                LockViolation::UntrackedRelease {
                    lock: header.name().to_owned(),
                    thread: thread_label(&thread::current()),
                    held,
                },
            );
        }
    }

    /// Returns `true` if `thread` holds any tracked lock. Never allocates.
    #[must_use]
    pub fn is_holding_any(&self, thread: ThreadId) -> bool {
        self.thread_record(thread, false)
            .is_some_and(|record| record.held_count() != 0)
    }

    /// Returns `true` if the calling thread holds any tracked lock.
    #[must_use]
    pub fn is_current_thread_holding_locks(&self) -> bool {
        self.is_holding_any(thread::current().id())
    }

    /// Snapshot of the locks `thread` holds, in acquisition order.
    ///
    /// Empty when the thread has no record or its record is being updated.
    #[must_use]
    pub fn held_locks(&self, thread: ThreadId) -> Vec<HeldLock> {
        self.thread_record(thread, false)
            .and_then(|record| record.try_snapshot())
            .unwrap_or_default()
    }

    /// Writes one warning line per lock `thread` holds.
    pub fn list_held(&self, thread: ThreadId) {
        let Some(record) = self.thread_record(thread, false) else {
            return;
        };
        match record.try_snapshot() {
            Some(held) => {
                for lock in held {
                    self.config.reporter.warning(&lock.to_string());
                }
            }
            None => self
                .config
                .reporter
                .warning(&format!("\theld locks of {thread:?} unavailable (record busy)")),
        }
    }

    /// Writes the calling thread's held locks.
    pub fn list_locks(&self) {
        self.list_held(thread::current().id());
    }

    /// Number of threads with an attached record.
    #[must_use]
    pub fn tracked_thread_count(&self) -> usize {
        self.threads.read().len()
    }

    /// Number of unattached records waiting on the free list.
    #[must_use]
    pub fn free_record_count(&self) -> usize {
        self.free_list
            .get()
            .map_or(0, |list| list.with(|records| records.len()))
    }
}
