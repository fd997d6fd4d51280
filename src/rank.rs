//! Acquisition and release tracking with rank checking.
//!
//! Lock implementations call [`LockRegistry::acquire`] after they obtain a
//! lock and [`LockRegistry::release`] before they give it up.
//!
//! # Rank Rule
//!
//! A thread may only enter a ranked lock for the first time if its rank is
//! strictly greater than every rank it already holds, including ranks held
//! through the legacy lock module. Re-entering a lock the thread already
//! holds is not checked: recursive locks are checked on their outermost
//! acquisition only. An exclusive lock that is wrongly re-entered gets a
//! second tracking entry and is caught by its own implementation.
//!
//! Rank checking stops once the process is panicking, to give the dump that
//! is already under way the best chance of completing.

use crate::error::LockViolation;
use crate::header::{LockHeader, Rank};
use crate::registry::LockRegistry;
use crate::tracker::{thread_label, MAX_LOCKS_PER_THREAD};
use std::sync::Arc;
use std::thread;

impl LockRegistry {
    /// Tracks the calling thread's acquisition of `header`.
    ///
    /// With `check_rank`, a ranked lock entered for the first time must
    /// outrank everything the thread holds; otherwise the held locks are
    /// listed and the process stops with a [`LockViolation::RankViolation`].
    pub fn acquire(&self, header: &Arc<LockHeader>, check_rank: bool) {
        let record = self.current_record();

        if record.is_full() {
            self.fatal(LockViolation::ResourceExhaustion {
                thread: thread_label(&thread::current()),
                capacity: MAX_LOCKS_PER_THREAD,
            });
        }

        if check_rank && !header.rank().is_unranked() && !self.is_panicking() {
            let (mut max_rank, first_instance) = record.rank_scan(header);

            let legacy = self.legacy_hooks();
            if let Some(legacy_rank) = legacy.check_rank {
                max_rank = max_rank.max(legacy_rank());
            }

            if first_instance && header.rank() <= max_rank {
                let thread = thread_label(&thread::current());
                let reporter = &self.config.reporter;
                reporter.warning(&format!("lock rank violation by thread {thread}"));
                reporter.warning("locks held:");
                if let Some(list_locks) = legacy.list_locks {
                    list_locks();
                }
                self.list_locks();

                self.dump_and_panic(
                    header,
                    LockViolation::RankViolation {
                        lock: header.name().to_owned(),
                        rank: header.rank(),
                        max_rank,
                        thread,
                    },
                );
            }
        }

        self.push_held(&record, header);

        if self.is_lock_tree_available() {
            self.feed_lock_tree(&record.headers());
        }
    }

    /// Tracks the calling thread's release of `header`.
    ///
    /// The thread must have a record and `header` must be in it.
    pub fn release(&self, header: &LockHeader) {
        let thread = thread::current();
        let Some(record) = self.thread_record(thread.id(), false) else {
            self.dump_and_panic(
                header,
                LockViolation::MissingTracker {
                    lock: header.name().to_owned(),
                    thread: thread_label(&thread),
                },
            );
        };

        self.remove_held(&record, header);
    }

    /// Highest rank the calling thread holds through this registry.
    #[must_use]
    pub fn current_rank(&self) -> Rank {
        self.thread_record(thread::current().id(), false)
            .map_or(Rank::UNRANKED, |record| record.max_rank())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FatalAction, LockTrackConfig};
    use crate::error::ViolationKind;
    use crate::hooks::LegacyHooks;
    use crate::report::Reporter;
    use crate::signature::ObjectType;
    use crate::test_utils::{expect_violation, init_test_logging, test_registry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn ranked(registry: &LockRegistry, name: &str, rank: u32) -> Arc<LockHeader> {
        registry.new_header(name, ObjectType::Exclusive, Rank::new(rank))
    }

    fn legacy_rank_50() -> Rank {
        Rank::new(50)
    }

    static VIOLATION_EVENTS: Mutex<Vec<String>> = Mutex::new(Vec::new());

    fn record_event(event: impl Into<String>) {
        VIOLATION_EVENTS.lock().unwrap().push(event.into());
    }

    fn legacy_list_for_events() {
        record_event("legacy-list");
    }

    fn single_event(events: &[String], pred: impl Fn(&str) -> bool) -> usize {
        let hits: Vec<_> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| pred(e.as_str()))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(hits.len(), 1, "expected one matching event in {events:?}");
        hits[0]
    }

    #[derive(Debug)]
    struct EventReporter;

    impl Reporter for EventReporter {
        fn warning(&self, message: &str) {
            record_event(format!("warning:{message}"));
        }

        fn fatal(&self, message: &str) {
            record_event(format!("fatal:{message}"));
        }
    }

    #[test]
    fn increasing_ranks_are_accepted() {
        let (registry, _) = test_registry();
        let locks: Vec<_> = [10, 20, 30]
            .iter()
            .map(|&r| ranked(&registry, &format!("r{r}"), r))
            .collect();
        for h in &locks {
            registry.acquire(h, true);
        }
        assert_eq!(registry.current_rank(), Rank::new(30));
        for h in locks.iter().rev() {
            registry.release(h);
        }
        assert!(!registry.is_current_thread_holding_locks());
        assert_eq!(registry.current_rank(), Rank::UNRANKED);
    }

    #[test]
    fn lower_rank_after_higher_violates() {
        let (registry, reporter) = test_registry();
        let high = ranked(&registry, "high", 30);
        let low = ranked(&registry, "low", 20);
        registry.acquire(&high, true);

        let violation = expect_violation(|| registry.acquire(&low, true));
        assert_eq!(
            violation,
            LockViolation::RankViolation {
                lock: "low".into(),
                rank: Rank::new(20),
                max_rank: Rank::new(30),
                thread: thread_label(&thread::current()),
            }
        );
        assert!(reporter.contains("lock rank violation by thread"));
        assert!(reporter.contains("\tlock high"));
        assert_eq!(registry.held_locks(thread::current().id()).len(), 1);
    }

    #[test]
    fn equal_rank_violates() {
        let (registry, _) = test_registry();
        let first = ranked(&registry, "first", 30);
        let second = ranked(&registry, "second", 30);
        registry.acquire(&first, true);

        let violation = expect_violation(|| registry.acquire(&second, true));
        assert_eq!(violation.kind(), ViolationKind::RankViolation);
    }

    #[test]
    fn recursive_acquisition_is_not_rechecked() {
        let (registry, _) = test_registry();
        let outer = ranked(&registry, "outer", 10);
        let inner = ranked(&registry, "inner", 20);
        registry.acquire(&outer, true);
        registry.acquire(&inner, true);
        // outer again: rank 10 <= 20 but already held
        registry.acquire(&outer, true);
        assert_eq!(registry.held_locks(thread::current().id()).len(), 3);

        registry.release(&outer);
        registry.release(&inner);
        registry.release(&outer);
        assert!(!registry.is_current_thread_holding_locks());
    }

    #[test]
    fn unchecked_and_unranked_locks_skip_the_check() {
        let (registry, _) = test_registry();
        let high = ranked(&registry, "high", 30);
        let low = ranked(&registry, "low", 20);
        let unranked = registry.new_header("plain", ObjectType::Exclusive, Rank::UNRANKED);
        registry.acquire(&high, true);
        registry.acquire(&low, false);
        registry.acquire(&unranked, true);
        assert_eq!(registry.held_locks(thread::current().id()).len(), 3);
    }

    #[test]
    fn panicking_disables_rank_checks() {
        let (registry, _) = test_registry();
        let high = ranked(&registry, "high", 30);
        let low = ranked(&registry, "low", 20);
        registry.acquire(&high, true);
        registry.enter_panic();
        registry.acquire(&low, true);
        assert_eq!(registry.held_locks(thread::current().id()).len(), 2);
    }

    #[test]
    fn legacy_rank_is_merged() {
        let (registry, _) = test_registry();
        registry.install_hooks(LegacyHooks {
            check_rank: Some(legacy_rank_50),
            ..LegacyHooks::default()
        });
        let ok = ranked(&registry, "above-legacy", 60);
        let bad = ranked(&registry, "below-legacy", 40);
        registry.acquire(&ok, true);
        registry.release(&ok);

        let violation = expect_violation(|| registry.acquire(&bad, true));
        assert!(matches!(
            violation,
            LockViolation::RankViolation { max_rank, .. } if max_rank == Rank::new(50)
        ));
    }

    #[test]
    fn violation_lists_legacy_then_local_locks_then_dumps() {
        init_test_logging();
        let registry = LockRegistry::new(
            LockTrackConfig::default()
                .fatal_action(FatalAction::Panic)
                .reporter(Arc::new(EventReporter)),
        );
        registry.install_hooks(LegacyHooks {
            list_locks: Some(legacy_list_for_events),
            ..LegacyHooks::default()
        });

        let high = ranked(&registry, "high", 30);
        let dumps = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&dumps);
        let low = Arc::new(
            LockHeader::new(
                "low",
                registry.signature_for(ObjectType::Exclusive),
                registry.next_serial(),
                Rank::new(20),
            )
            .with_dump(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                record_event("dump");
            }),
        );

        registry.acquire(&high, true);
        let violation = expect_violation(|| registry.acquire(&low, true));
        assert_eq!(violation.kind(), ViolationKind::RankViolation);
        assert_eq!(dumps.load(Ordering::SeqCst), 1);

        let events = VIOLATION_EVENTS.lock().unwrap().clone();
        let header_line = single_event(&events, |e| e == "warning:locks held:");
        let legacy = single_event(&events, |e| e == "legacy-list");
        let local = single_event(&events, |e| e.starts_with("warning:\tlock high"));
        let dump = single_event(&events, |e| e == "dump");
        let fatal = single_event(&events, |e| e.starts_with("fatal:"));
        assert!(header_line < legacy, "{events:?}");
        assert!(legacy < local, "{events:?}");
        assert!(local < dump, "{events:?}");
        assert!(dump < fatal, "{events:?}");
    }

    #[test]
    fn release_without_record_is_fatal() {
        let (registry, _) = test_registry();
        let h = ranked(&registry, "never-acquired", 1);
        let violation = expect_violation(|| registry.release(&h));
        assert!(matches!(violation, LockViolation::MissingTracker { .. }));
    }
}
