// Copyright (c) The ordtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic ordering for events produced by parallel tests.
//!
//! When tests are dispatched to a distributor, their events arrive in
//! completion order. The [`TestSortingReporter`] buffers events per test
//! and releases each test's batch to the wrapped reporter only once every
//! earlier-declared test has been released, so normal runs read exactly
//! like sequential ones.
//!
//! The hold-back is bounded: if the head test keeps its successors waiting
//! longer than the configured timeout, whatever it has buffered is
//! force-flushed out of order and the queue moves on. A single slow or
//! stuck test can therefore never starve reporting of already-finished
//! tests indefinitely.

use crate::{
    config::FlushMode,
    events::Event,
    reporter::Reporter,
};
use crossbeam_channel::{RecvTimeoutError, Sender};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

/// Buffers and reorders test events back into declaration order.
///
/// Constructed with the declaration-ordered list of test names that will
/// emit events. Events for tests outside that list, and suite- or run-level
/// events, pass straight through.
pub struct TestSortingReporter {
    shared: Arc<Shared>,
    wake: Sender<()>,
}

struct Shared {
    base: Arc<dyn Reporter>,
    timeout: Duration,
    mode: FlushMode,
    state: Mutex<SortState>,
}

struct SortState {
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
    // Slots before next_slot have been released; their late events pass
    // straight through.
    next_slot: usize,
    head_since: Instant,
    disposed: bool,
}

struct Slot {
    test_name: String,
    buffered: Vec<Event>,
    completed: bool,
}

impl TestSortingReporter {
    /// Creates a sorting reporter over the given declaration-ordered test
    /// names, wrapping `base`.
    pub fn new(
        test_names: Vec<String>,
        timeout: Duration,
        mode: FlushMode,
        base: Arc<dyn Reporter>,
    ) -> Self {
        let index = test_names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();
        let slots = test_names
            .into_iter()
            .map(|test_name| Slot {
                test_name,
                buffered: Vec::new(),
                completed: false,
            })
            .collect();

        let shared = Arc::new(Shared {
            base,
            timeout,
            mode,
            state: Mutex::new(SortState {
                slots,
                index,
                next_slot: 0,
                head_since: Instant::now(),
                disposed: false,
            }),
        });

        let (wake, wake_rx) = crossbeam_channel::bounded(1);
        let timer_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("ordtest-sort-flush".to_owned())
            .spawn(move || loop {
                let wait = {
                    let state = timer_shared.lock_state();
                    if state.disposed {
                        break;
                    }
                    if state.next_slot < state.slots.len() {
                        timer_shared.timeout.saturating_sub(state.head_since.elapsed())
                    } else {
                        // Idle; nothing can be due before another event
                        // arrives and wakes us.
                        timer_shared.timeout.max(Duration::from_millis(100))
                    }
                };
                match wake_rx.recv_timeout(wait) {
                    Ok(()) => {}
                    Err(RecvTimeoutError::Timeout) => timer_shared.force_flush_due(),
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .expect("flush timer thread spawned");

        Self { shared, wake }
    }

    /// Marks a test that will never emit events (for example one abandoned
    /// after a stop request) as done, so it doesn't hold up its successors.
    pub(crate) fn complete_silently(&self, test_name: &str) {
        {
            let mut state = self.shared.lock_state();
            if state.disposed {
                return;
            }
            if let Some(&idx) = state.index.get(test_name) {
                if idx >= state.next_slot {
                    state.slots[idx].completed = true;
                    self.shared.advance(&mut state);
                }
            }
        }
        let _ = self.wake.try_send(());
    }

    /// Flushes everything still buffered, in declaration order, and stops
    /// reordering. Called automatically on drop.
    pub fn dispose(&self) {
        {
            let mut state = self.shared.lock_state();
            if state.disposed {
                return;
            }
            state.disposed = true;
            let next_slot = state.next_slot;
            let mut remaining: Vec<Event> = Vec::new();
            for slot in &mut state.slots[next_slot..] {
                remaining.append(&mut slot.buffered);
            }
            state.next_slot = state.slots.len();
            for event in remaining {
                self.shared.base.report(event);
            }
        }
        let _ = self.wake.try_send(());
    }
}

impl Reporter for TestSortingReporter {
    fn report(&self, event: Event) {
        {
            let mut state = self.shared.lock_state();
            if state.disposed {
                self.shared.base.report(event);
                return;
            }
            let slot_idx = event.test_name().and_then(|name| state.index.get(name).copied());
            match slot_idx {
                // Not a tracked test event: pass through.
                None => self.shared.base.report(event),
                // Already released: arrives late, out of order.
                Some(idx) if idx < state.next_slot => {
                    debug!(
                        test_name = %state.slots[idx].test_name,
                        "late event for an already-flushed test"
                    );
                    self.shared.base.report(event);
                }
                Some(idx) => {
                    let terminal = event.is_test_terminal();
                    state.slots[idx].buffered.push(event);
                    if terminal {
                        state.slots[idx].completed = true;
                    }
                    self.shared.advance(&mut state);
                }
            }
        }
        let _ = self.wake.try_send(());
    }
}

impl Drop for TestSortingReporter {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for TestSortingReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock_state();
        f.debug_struct("TestSortingReporter")
            .field("tests", &state.slots.len())
            .field("next_slot", &state.next_slot)
            .field("disposed", &state.disposed)
            .finish()
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, SortState> {
        self.state.lock().expect("sort state lock poisoned")
    }

    // Releases every leading completed slot. Events are forwarded while
    // the state lock is held, so the release order seen by the base
    // reporter matches the buffer order. The base reporter must not call
    // back into the sorter.
    fn advance(&self, state: &mut SortState) {
        while state.next_slot < state.slots.len() {
            let idx = state.next_slot;
            if state.slots[idx].completed {
                let batch = std::mem::take(&mut state.slots[idx].buffered);
                for event in batch {
                    self.base.report(event);
                }
                state.next_slot += 1;
                state.head_since = Instant::now();
            } else {
                if self.mode == FlushMode::Streaming {
                    let partial = std::mem::take(&mut state.slots[idx].buffered);
                    for event in partial {
                        self.base.report(event);
                    }
                }
                break;
            }
        }
    }

    // Called from the timer thread when the head slot may have been
    // waiting longer than the timeout allows.
    fn force_flush_due(&self) {
        let mut state = self.lock_state();
        if state.disposed
            || state.next_slot >= state.slots.len()
            || state.head_since.elapsed() < self.timeout
        {
            return;
        }
        // Nothing is being starved if no pending slot holds any events;
        // keep waiting rather than releasing an idle head.
        if state.slots[state.next_slot..]
            .iter()
            .all(|slot| slot.buffered.is_empty())
        {
            return;
        }
        let idx = state.next_slot;
        warn!(
            test_name = %state.slots[idx].test_name,
            timeout = ?self.timeout,
            "sorting timeout reached, flushing buffered events out of order"
        );
        let partial = std::mem::take(&mut state.slots[idx].buffered);
        for event in partial {
            self.base.report(event);
        }
        state.next_slot += 1;
        state.head_since = Instant::now();
        self.advance(&mut state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::EventKind,
        ordinal::Tracker,
        reporter::CollectingReporter,
    };

    fn starting(tracker: &mut Tracker, name: &str) -> Event {
        Event::new(
            EventKind::TestStarting {
                suite_name: "suite".to_owned(),
                test_name: name.to_owned(),
            },
            tracker.next_ordinal(),
        )
    }

    fn succeeded(tracker: &mut Tracker, name: &str) -> Event {
        Event::new(
            EventKind::TestSucceeded {
                suite_name: "suite".to_owned(),
                test_name: name.to_owned(),
                duration: Duration::from_millis(1),
                recorded: Vec::new(),
            },
            tracker.next_ordinal(),
        )
    }

    fn names(events: &[Event]) -> Vec<String> {
        events
            .iter()
            .map(|event| event.test_name().expect("test event").to_owned())
            .collect()
    }

    fn sorter(timeout: Duration, mode: FlushMode) -> (TestSortingReporter, Arc<CollectingReporter>) {
        let base = Arc::new(CollectingReporter::new());
        let sorter = TestSortingReporter::new(
            vec!["t1".to_owned(), "t2".to_owned(), "t3".to_owned()],
            timeout,
            mode,
            base.clone() as Arc<dyn Reporter>,
        );
        (sorter, base)
    }

    #[test]
    fn releases_in_declaration_order() {
        let (sorter, base) = sorter(Duration::from_secs(60), FlushMode::Batched);
        let mut tracker = Tracker::new(0);

        // t3 finishes first, then t1, then t2.
        sorter.report(starting(&mut tracker, "t3"));
        sorter.report(succeeded(&mut tracker, "t3"));
        assert!(base.take_events().is_empty(), "t3 is held back");

        sorter.report(starting(&mut tracker, "t1"));
        sorter.report(succeeded(&mut tracker, "t1"));
        assert_eq!(names(&base.take_events()), ["t1", "t1"]);

        sorter.report(starting(&mut tracker, "t2"));
        sorter.report(succeeded(&mut tracker, "t2"));
        assert_eq!(names(&base.take_events()), ["t2", "t2", "t3", "t3"]);
    }

    #[test]
    fn streaming_mode_forwards_head_events_eagerly() {
        let (sorter, base) = sorter(Duration::from_secs(60), FlushMode::Streaming);
        let mut tracker = Tracker::new(0);

        sorter.report(starting(&mut tracker, "t1"));
        assert_eq!(names(&base.take_events()), ["t1"], "head streams through");

        sorter.report(starting(&mut tracker, "t2"));
        assert!(base.take_events().is_empty(), "non-head is buffered");

        sorter.report(succeeded(&mut tracker, "t1"));
        // t1 terminal releases t1 and promotes t2 to head, streaming its
        // buffered start.
        assert_eq!(names(&base.take_events()), ["t1", "t2"]);
    }

    #[test]
    fn timeout_force_flushes_stuck_head() {
        let (sorter, base) = sorter(Duration::from_millis(50), FlushMode::Batched);
        let mut tracker = Tracker::new(0);

        let t1_start = starting(&mut tracker, "t1");
        sorter.report(t1_start);
        sorter.report(starting(&mut tracker, "t2"));
        sorter.report(succeeded(&mut tracker, "t2"));
        sorter.report(starting(&mut tracker, "t3"));
        sorter.report(succeeded(&mut tracker, "t3"));

        // t1 never finishes; after the timeout the flush timer releases
        // its partial buffer and everything queued behind it.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let events = base.take_events();
            if !events.is_empty() {
                assert_eq!(names(&events), ["t1", "t2", "t2", "t3", "t3"]);
                break;
            }
            assert!(Instant::now() < deadline, "timed out waiting for force flush");
            thread::sleep(Duration::from_millis(10));
        }

        // t1's terminal event arrives late and passes straight through.
        sorter.report(succeeded(&mut tracker, "t1"));
        assert_eq!(names(&base.take_events()), ["t1"]);
    }

    #[test]
    fn silent_completion_unblocks_successors() {
        let (sorter, base) = sorter(Duration::from_secs(60), FlushMode::Batched);
        let mut tracker = Tracker::new(0);

        sorter.report(starting(&mut tracker, "t2"));
        sorter.report(succeeded(&mut tracker, "t2"));
        sorter.complete_silently("t1");
        assert_eq!(names(&base.take_events()), ["t2", "t2"]);
    }

    #[test]
    fn untracked_events_pass_through() {
        let (sorter, base) = sorter(Duration::from_secs(60), FlushMode::Batched);
        let mut tracker = Tracker::new(0);

        sorter.report(Event::new(
            EventKind::SuiteStarting {
                suite_name: "suite".to_owned(),
            },
            tracker.next_ordinal(),
        ));
        assert_eq!(base.take_events().len(), 1);
    }

    #[test]
    fn dispose_flushes_remaining_in_declaration_order() {
        let (sorter, base) = sorter(Duration::from_secs(60), FlushMode::Batched);
        let mut tracker = Tracker::new(0);

        sorter.report(starting(&mut tracker, "t2"));
        sorter.report(starting(&mut tracker, "t1"));
        sorter.dispose();
        assert_eq!(names(&base.take_events()), ["t1", "t2"]);

        // After dispose, everything passes straight through.
        sorter.report(succeeded(&mut tracker, "t1"));
        assert_eq!(names(&base.take_events()), ["t1"]);
    }
}
