// Copyright (c) The ordtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The result of running exactly one test body, and how abrupt completions
//! are classified into it.
//!
//! A test body returns an [`Outcome`] on normal completion. Abrupt
//! completions are panics: an ordinary panic (assertion failures included)
//! classifies as [`Outcome::Failed`], while a panic carrying a
//! [`RunAbortError`] payload is abort-worthy and is never caught at the
//! test level: it resumes unwinding and takes the enclosing suite or run
//! down with it.

use crate::{
    config::ConfigMap,
    errors::RunAbortError,
    events::{Event, EventKind},
    ordinal::Tracker,
};
use std::{
    any::Any,
    panic,
    sync::Mutex,
};

/// The classified result of one test body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The body completed normally.
    Succeeded,

    /// The body failed, by panicking or by saying so.
    Failed(String),

    /// A precondition was unmet and the body gave up. Non-failing for
    /// run-abort purposes, failing for status purposes.
    Canceled(Option<String>),

    /// The test is intentionally unimplemented. Non-failing.
    Pending(Option<String>),

    /// The test asked to be left out of reporting entirely: no terminal
    /// event is emitted for it. Non-failing.
    Omitted(Option<String>),
}

impl Outcome {
    /// Convenience constructor for [`Outcome::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Outcome::Failed(message.into())
    }

    /// Convenience constructor for [`Outcome::Canceled`].
    pub fn canceled(message: impl Into<String>) -> Self {
        Outcome::Canceled(Some(message.into()))
    }

    /// Convenience constructor for [`Outcome::Pending`].
    pub fn pending() -> Self {
        Outcome::Pending(None)
    }

    /// True if this outcome fails the unit's status. Only `Failed` and
    /// `Canceled` do.
    pub fn is_failing(&self) -> bool {
        matches!(self, Outcome::Failed(_) | Outcome::Canceled(_))
    }
}

/// Aborts the run with an abort-worthy error.
///
/// The unwind carries a [`RunAbortError`] payload, which the engine never
/// classifies as a mere test failure.
pub fn abort_run(message: impl Into<String>) -> ! {
    panic::panic_any(RunAbortError::new(message))
}

/// Classifies the result of invoking a test body under `catch_unwind`.
///
/// Abort-worthy payloads resume unwinding; everything else becomes an
/// [`Outcome`].
pub(crate) fn classify(result: Result<Outcome, Box<dyn Any + Send>>) -> Outcome {
    match result {
        Ok(outcome) => outcome,
        Err(payload) => {
            if payload.is::<RunAbortError>() {
                panic::resume_unwind(payload);
            }
            Outcome::Failed(panic_message(payload.as_ref()))
        }
    }
}

/// Extracts a human-readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(abort) = payload.downcast_ref::<RunAbortError>() {
        abort.message().to_owned()
    } else {
        "test body panicked".to_owned()
    }
}

/// What a test body sees while it runs.
///
/// Carries the configuration map and lets the body record
/// [`InfoProvided`](EventKind::InfoProvided) and
/// [`MarkupProvided`](EventKind::MarkupProvided) notes. Recorded notes are
/// buffered and travel inside the test's terminal event rather than being
/// reported independently.
#[derive(Debug)]
pub struct TestContext {
    test_name: String,
    config: ConfigMap,
    recorder: Mutex<Recorder>,
}

#[derive(Debug)]
struct Recorder {
    tracker: Tracker,
    notes: Vec<Event>,
}

impl TestContext {
    pub(crate) fn new(test_name: impl Into<String>, config: ConfigMap, tracker: Tracker) -> Self {
        Self {
            test_name: test_name.into(),
            config,
            recorder: Mutex::new(Recorder {
                tracker,
                notes: Vec::new(),
            }),
        }
    }

    /// The full name of the running test.
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// The configuration map forwarded from the run.
    pub fn config(&self) -> &ConfigMap {
        &self.config
    }

    /// Records an informational note against the running test.
    pub fn info(&self, message: impl Into<String>) {
        self.record(|message| EventKind::InfoProvided { message }, message.into());
    }

    /// Records a markup note against the running test.
    pub fn markup(&self, text: impl Into<String>) {
        self.record(|text| EventKind::MarkupProvided { text }, text.into());
    }

    fn record(&self, kind: impl FnOnce(String) -> EventKind, text: String) {
        let mut recorder = self.recorder.lock().expect("recorder lock poisoned");
        let ordinal = recorder.tracker.next_ordinal();
        recorder.notes.push(Event::new(kind(text), ordinal));
    }

    pub(crate) fn take_recorded(&self) -> Vec<Event> {
        let mut recorder = self.recorder.lock().expect("recorder lock poisoned");
        std::mem::take(&mut recorder.notes)
    }
}
