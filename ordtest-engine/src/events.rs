// Copyright (c) The ordtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The event stream emitted by the engine.
//!
//! Events are produced by the engine and consumed by a
//! [`Reporter`](crate::reporter::Reporter). Every event carries the
//! [`Ordinal`] that fixes its place in the run's total order: consumers
//! sort by ordinal, never by arrival time.

use crate::{ordinal::Ordinal, test_filter::ExcludeReason};
use chrono::{DateTime, FixedOffset, Local};
use serde::Serialize;
use std::{cmp::Ordering, time::Duration};

/// A single event in a run.
///
/// Optional fields are always present as explicit `None` values and
/// serialize as explicit nulls, never as omitted keys.
#[derive(Clone, Debug, Serialize)]
pub struct Event {
    /// The position of this event in the run's total order.
    pub ordinal: Ordinal,

    /// The wall-clock time at which the event was generated, including the
    /// offset from UTC.
    pub timestamp: DateTime<FixedOffset>,

    /// The name of the thread that produced the event.
    pub thread_name: String,

    /// A hint for how a renderer should present this event.
    pub formatter: Option<Formatter>,

    /// Where in the source the subject of this event was declared.
    pub location: Option<Location>,

    /// An opaque payload attached by the producer.
    pub payload: Option<serde_json::Value>,

    /// The kind of event this is.
    pub kind: EventKind,
}

impl Event {
    /// Creates an event of the given kind at the given ordinal, stamped
    /// with the current time and thread.
    pub fn new(kind: EventKind, ordinal: Ordinal) -> Self {
        Self {
            ordinal,
            timestamp: Local::now().fixed_offset(),
            thread_name: std::thread::current()
                .name()
                .unwrap_or("unnamed")
                .to_owned(),
            formatter: None,
            location: None,
            payload: None,
            kind,
        }
    }

    /// Sets the formatting hint.
    pub fn with_formatter(mut self, formatter: Formatter) -> Self {
        self.formatter = Some(formatter);
        self
    }

    /// Sets the source location hint.
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Sets the opaque payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// The test this event concerns, if it is a test-level event.
    pub fn test_name(&self) -> Option<&str> {
        match &self.kind {
            EventKind::TestStarting { test_name, .. }
            | EventKind::TestSucceeded { test_name, .. }
            | EventKind::TestFailed { test_name, .. }
            | EventKind::TestIgnored { test_name, .. }
            | EventKind::TestPending { test_name, .. }
            | EventKind::TestCanceled { test_name, .. } => Some(test_name),
            _ => None,
        }
    }

    /// True if this is the last event a test emits.
    pub fn is_test_terminal(&self) -> bool {
        matches!(
            self.kind,
            EventKind::TestSucceeded { .. }
                | EventKind::TestFailed { .. }
                | EventKind::TestIgnored { .. }
                | EventKind::TestPending { .. }
                | EventKind::TestCanceled { .. }
        )
    }
}

// Ordinals are unique within a run, so ordering (and equality) by ordinal
// alone is total.
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.ordinal == other.ordinal
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ordinal.cmp(&other.ordinal)
    }
}

/// The kind of event. Forms part of [`Event`].
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "kebab-case", tag = "type")]
pub enum EventKind {
    /// The run is about to start.
    RunStarting {
        /// The number of tests expected to run, after filtering.
        expected_test_count: usize,
    },

    /// The run finished normally.
    RunCompleted {
        /// How long the run took.
        #[serde(with = "humantime_serde")]
        duration: Duration,
    },

    /// The run was stopped cooperatively before all work was attempted.
    RunStopped {
        /// How long the run took before stopping.
        #[serde(with = "humantime_serde")]
        duration: Duration,
    },

    /// The run was brought down by an abort-worthy error.
    RunAborted {
        /// The abort message.
        message: String,

        /// How long the run took before aborting.
        #[serde(with = "humantime_serde")]
        duration: Duration,
    },

    /// A suite is about to run.
    SuiteStarting {
        /// The name of the suite.
        suite_name: String,
    },

    /// A suite finished, successfully or not.
    SuiteCompleted {
        /// The name of the suite.
        suite_name: String,

        /// How long the suite took.
        #[serde(with = "humantime_serde")]
        duration: Duration,
    },

    /// A suite was abandoned part-way through.
    SuiteAborted {
        /// The name of the suite.
        suite_name: String,

        /// What brought the suite down.
        message: String,
    },

    /// A test is about to run.
    TestStarting {
        /// The name of the enclosing suite.
        suite_name: String,

        /// The full name of the test.
        test_name: String,
    },

    /// A test body completed normally.
    TestSucceeded {
        /// The name of the enclosing suite.
        suite_name: String,

        /// The full name of the test.
        test_name: String,

        /// How long the test took.
        #[serde(with = "humantime_serde")]
        duration: Duration,

        /// Info and markup events recorded while the body ran.
        recorded: Vec<Event>,
    },

    /// A test body failed.
    TestFailed {
        /// The name of the enclosing suite.
        suite_name: String,

        /// The full name of the test.
        test_name: String,

        /// The failure message.
        message: String,

        /// How long the test took.
        #[serde(with = "humantime_serde")]
        duration: Duration,

        /// Info and markup events recorded while the body ran.
        recorded: Vec<Event>,
    },

    /// A test was skipped with a visible reason.
    TestIgnored {
        /// The name of the enclosing suite.
        suite_name: String,

        /// The full name of the test.
        test_name: String,

        /// Why the test was skipped.
        reason: ExcludeReason,
    },

    /// A test declared itself intentionally unimplemented.
    TestPending {
        /// The name of the enclosing suite.
        suite_name: String,

        /// The full name of the test.
        test_name: String,

        /// How long the body ran before declaring itself pending.
        #[serde(with = "humantime_serde")]
        duration: Duration,

        /// Info and markup events recorded while the body ran.
        recorded: Vec<Event>,
    },

    /// A test gave up because a precondition was unmet.
    TestCanceled {
        /// The name of the enclosing suite.
        suite_name: String,

        /// The full name of the test.
        test_name: String,

        /// Why the test canceled itself.
        message: Option<String>,

        /// How long the body ran before canceling.
        #[serde(with = "humantime_serde")]
        duration: Duration,

        /// Info and markup events recorded while the body ran.
        recorded: Vec<Event>,
    },

    /// A named scope of tests was entered.
    ScopeOpened {
        /// The name of the enclosing suite.
        suite_name: String,

        /// The scope component being opened.
        name: String,
    },

    /// A named scope of tests was left.
    ScopeClosed {
        /// The name of the enclosing suite.
        suite_name: String,

        /// The scope component being closed.
        name: String,
    },

    /// Free-form information from a test body or the harness.
    InfoProvided {
        /// The message.
        message: String,
    },

    /// Formatted text (for example snippets of documentation) from a test
    /// body.
    MarkupProvided {
        /// The markup text.
        text: String,
    },
}

/// A hint for how a renderer should present an event.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "hint")]
pub enum Formatter {
    /// The event is bookkeeping; a console renderer would usually not show
    /// it at all.
    Suppress,

    /// Present the given text at the given indentation level.
    Indented {
        /// The text to present.
        text: String,

        /// The indentation level, 0 being flush left.
        level: usize,
    },
}

/// A source location hint.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Location {
    /// The source file.
    pub file: String,

    /// The 1-based line number.
    pub line: u32,

    /// The 1-based column number.
    pub column: u32,
}

impl From<&std::panic::Location<'_>> for Location {
    fn from(location: &std::panic::Location<'_>) -> Self {
        Self {
            file: location.file().to_owned(),
            line: location.line(),
            column: location.column(),
        }
    }
}
