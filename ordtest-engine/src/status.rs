// Copyright (c) The ordtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Completion signaling for units of work.
//!
//! A [`Status`] is the engine's join handle: it tells a caller whether a
//! test, a suite, or a whole tree of work has finished yet, and whether it
//! succeeded. Statuses are created per unit of work, mutated only by the
//! thread executing that unit, and read (blocked on) by any thread. They
//! are the only state that is permitted to cross thread boundaries.
//!
//! [`CompositeStatus`] aggregates a fixed list of children, so callers can
//! block on an entire run through a single handle.

use crate::errors::RunAbortError;
use std::{
    fmt,
    sync::{Arc, Condvar, Mutex},
};

/// The read side of a completion signal.
pub trait Status: Send + Sync + fmt::Debug {
    /// Blocks until the unit of work completes, then returns its frozen
    /// success flag. Repeated calls after completion return the same value.
    fn succeeds(&self) -> bool;

    /// Non-blocking poll: has the unit of work completed?
    fn is_completed(&self) -> bool;

    /// Blocks until the unit of work completes.
    fn wait_until_completed(&self);

    /// The abort-worthy error recorded against this unit of work, if any.
    ///
    /// An abort raised on a worker thread cannot unwind into the thread
    /// that dispatched it; it is recorded here instead so the top-level
    /// harness can surface it as a run abort.
    fn abort_cause(&self) -> Option<RunAbortError> {
        None
    }
}

#[derive(Debug)]
struct State {
    completed: bool,
    failed: bool,
    abort: Option<RunAbortError>,
}

/// A single-assignment completion cell.
///
/// Two independent bits: *completed* is terminal and monotonic; *succeeded*
/// (the inverse of the failed flag) is mutable only until completion, then
/// frozen. Cloning yields another handle to the same cell.
#[derive(Clone, Debug)]
pub struct StatefulStatus {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    completed: Condvar,
}

impl StatefulStatus {
    /// Creates a new, incomplete status with the success flag set.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    completed: false,
                    failed: false,
                    abort: None,
                }),
                completed: Condvar::new(),
            }),
        }
    }

    /// Flips the success flag to failed.
    ///
    /// Idempotent, never panics, and never triggers completion. Has no
    /// effect once the status has completed: the flag is frozen then.
    pub fn mark_failed(&self) {
        let mut state = self.lock_state();
        if !state.completed {
            state.failed = true;
        }
    }

    /// Marks the unit of work as completed, releasing all blocked waiters.
    ///
    /// The first call is the one-shot transition; later calls have no
    /// effect, so scoped cleanup can always signal completion without
    /// tracking whether the happy path already did.
    pub fn mark_completed(&self) {
        let mut state = self.lock_state();
        if !state.completed {
            state.completed = true;
            self.inner.completed.notify_all();
        }
    }

    /// Records the abort-worthy error that brought this unit of work down.
    /// Only the first recorded cause is kept.
    pub(crate) fn record_abort(&self, cause: RunAbortError) {
        let mut state = self.lock_state();
        if state.abort.is_none() {
            state.abort = Some(cause);
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .expect("status state lock poisoned")
    }
}

impl Default for StatefulStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl Status for StatefulStatus {
    fn succeeds(&self) -> bool {
        let mut state = self.lock_state();
        while !state.completed {
            state = self
                .inner
                .completed
                .wait(state)
                .expect("status state lock poisoned");
        }
        !state.failed
    }

    fn is_completed(&self) -> bool {
        self.lock_state().completed
    }

    fn wait_until_completed(&self) {
        let mut state = self.lock_state();
        while !state.completed {
            state = self
                .inner
                .completed
                .wait(state)
                .expect("status state lock poisoned");
        }
    }

    fn abort_cause(&self) -> Option<RunAbortError> {
        self.lock_state().abort.clone()
    }
}

/// Pre-built status for work that already completed successfully. Never
/// blocks.
#[derive(Copy, Clone, Debug, Default)]
pub struct SucceededStatus;

impl Status for SucceededStatus {
    fn succeeds(&self) -> bool {
        true
    }

    fn is_completed(&self) -> bool {
        true
    }

    fn wait_until_completed(&self) {}
}

/// Pre-built status for work that already completed as failed. Never
/// blocks.
#[derive(Copy, Clone, Debug, Default)]
pub struct FailedStatus;

impl Status for FailedStatus {
    fn succeeds(&self) -> bool {
        false
    }

    fn is_completed(&self) -> bool {
        true
    }

    fn wait_until_completed(&self) {}
}

/// Aggregates a fixed list of child statuses into one.
///
/// `succeeds` blocks on each child in turn and ANDs the results; this is
/// safe because each child makes independent forward progress.
/// `is_completed` ANDs each child's poll without blocking.
#[derive(Clone, Debug)]
pub struct CompositeStatus {
    children: Vec<Arc<dyn Status>>,
}

impl CompositeStatus {
    /// Creates a composite over the given children. An empty composite is
    /// complete and successful.
    pub fn new(children: Vec<Arc<dyn Status>>) -> Self {
        Self { children }
    }
}

impl Status for CompositeStatus {
    fn succeeds(&self) -> bool {
        // Deliberately not short-circuited: succeeds() must not return
        // before every child has completed.
        let mut result = true;
        for child in &self.children {
            result &= child.succeeds();
        }
        result
    }

    fn is_completed(&self) -> bool {
        self.children.iter().all(|child| child.is_completed())
    }

    fn wait_until_completed(&self) {
        for child in &self.children {
            child.wait_until_completed();
        }
    }

    fn abort_cause(&self) -> Option<RunAbortError> {
        self.children.iter().find_map(|child| child.abort_cause())
    }
}

/// Completes a status when dropped.
///
/// Units of work hold one of these across the fallible part of their
/// execution, so completion is signaled even if the work panics. If the
/// guard fires while unwinding, the status is also marked failed.
pub(crate) struct CompletionGuard {
    status: StatefulStatus,
}

impl CompletionGuard {
    pub(crate) fn new(status: StatefulStatus) -> Self {
        Self { status }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.status.is_completed() {
            if std::thread::panicking() {
                self.status.mark_failed();
            }
            self.status.mark_completed();
        }
    }
}
