// Copyright (c) The ordtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event sinks.
//!
//! The engine's only obligation towards a reporter is to hand it a sortable
//! stream of fully-populated events with the documented bracket/nesting
//! discipline. What the reporter does with them (rendering, persistence) is
//! out of scope here.

use crate::events::Event;
use std::sync::Mutex;

/// An opaque event sink.
///
/// Reporters are shared across the threads of a parallel run, so
/// implementations must be internally synchronized.
pub trait Reporter: Send + Sync {
    /// Accepts one event.
    fn report(&self, event: Event);
}

/// Discards every event.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&self, _event: Event) {}
}

/// Collects every event in memory.
///
/// Used by tests and by callers that want to post-process a finished run.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<Event>>,
}

impl CollectingReporter {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the collected events in arrival order.
    pub fn take_events(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().expect("events lock poisoned"))
    }

    /// Removes and returns the collected events in ordinal order.
    pub fn take_sorted_events(&self) -> Vec<Event> {
        let mut events = self.take_events();
        events.sort();
        events
    }
}

impl Reporter for CollectingReporter {
    fn report(&self, event: Event) {
        self.events.lock().expect("events lock poisoned").push(event);
    }
}
