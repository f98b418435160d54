// Copyright (c) The ordtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ordinals impose a total order on events from possibly concurrent producers.
//!
//! An [`Ordinal`] is a Dewey-decimal style path: a run stamp followed by a
//! non-empty vector of stamps, one per nesting depth. Comparing two ordinals
//! compares the run stamp, then the stamp vectors lexicographically, with a
//! shorter vector that is a prefix of a longer one sorting first. Sorting a
//! set of events by ordinal therefore reconstructs the intended reading
//! order, no matter which thread produced each event or when it arrived.
//!
//! Ordinals are minted by a [`Tracker`]. A tracker is owned by exactly one
//! thread at a time; concurrency is achieved only by [`Tracker::fork`]ing a
//! disjoint child tracker for each unit of work dispatched elsewhere, never
//! by sharing one tracker across threads.

use serde::Serialize;
use std::fmt;

/// An immutable, totally ordered position in the event order of a run.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Ordinal {
    run_stamp: u32,
    stamps: Vec<u32>,
}

impl Ordinal {
    pub(crate) fn new(run_stamp: u32) -> Self {
        Self {
            run_stamp,
            stamps: vec![0],
        }
    }

    /// The stamp identifying the run this ordinal belongs to.
    pub fn run_stamp(&self) -> u32 {
        self.run_stamp
    }

    /// The path of stamps, outermost depth first. Never empty.
    pub fn stamps(&self) -> &[u32] {
        &self.stamps
    }

    /// The ordinal that follows this one at the current depth.
    fn next(&self) -> Self {
        let mut stamps = self.stamps.clone();
        *stamps.last_mut().expect("stamps is never empty") += 1;
        Self {
            run_stamp: self.run_stamp,
            stamps,
        }
    }

    /// Returns `(child, next)`: the first ordinal of a new nesting depth
    /// below this position, and the successor at the current depth. Every
    /// ordinal derived from `child` sorts strictly between `self` and
    /// `next`.
    fn next_new_old_pair(&self) -> (Self, Self) {
        let mut child_stamps = self.stamps.clone();
        child_stamps.push(0);
        let child = Self {
            run_stamp: self.run_stamp,
            stamps: child_stamps,
        };
        (child, self.next())
    }
}

impl fmt::Debug for Ordinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ordinal({self})")
    }
}

impl fmt::Display for Ordinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.run_stamp)?;
        for stamp in &self.stamps {
            write!(f, ".{stamp}")?;
        }
        Ok(())
    }
}

/// Mints [`Ordinal`]s for one thread of execution.
///
/// A tracker holds a cursor: the next ordinal to hand out. [`next_ordinal`]
/// returns the cursor and advances it at the current depth; [`fork`] carves
/// out a disjoint child sequence for work dispatched to another thread.
///
/// [`next_ordinal`]: Tracker::next_ordinal
/// [`fork`]: Tracker::fork
#[derive(Debug)]
pub struct Tracker {
    current: Ordinal,
}

impl Tracker {
    /// Creates a tracker for a run identified by `run_stamp`.
    pub fn new(run_stamp: u32) -> Self {
        Self {
            current: Ordinal::new(run_stamp),
        }
    }

    /// Returns the current ordinal and advances the cursor by one at the
    /// current nesting depth.
    pub fn next_ordinal(&mut self) -> Ordinal {
        let next = self.current.next();
        std::mem::replace(&mut self.current, next)
    }

    /// Returns a tracker for a dispatched unit of work.
    ///
    /// Every ordinal the forked tracker produces sorts strictly between the
    /// fork point and the parent's next subsequent [`next_ordinal`], so a
    /// later global sort slots the dispatched work back in where it was
    /// declared.
    ///
    /// [`next_ordinal`]: Tracker::next_ordinal
    pub fn fork(&mut self) -> Tracker {
        let (child, next) = self.current.next_new_old_pair();
        self.current = next;
        Tracker { current: child }
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(0)
    }
}
