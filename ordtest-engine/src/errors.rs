// Copyright (c) The ordtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by the ordtest engine.

use thiserror::Error;

/// An error that occurred while registering a test, fixture or nested suite.
///
/// Registration errors are immediate and non-retryable: they are reported at
/// registration time and never deferred to run time.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[non_exhaustive]
pub enum RegistrationError {
    /// A test with this name has already been registered in the suite.
    #[error("test `{name}` is already registered in suite `{suite}`")]
    DuplicateTestName {
        /// The name of the suite.
        suite: String,

        /// The duplicated test name.
        name: String,
    },

    /// The suite has entered the ready phase and no longer accepts
    /// registrations.
    #[error("suite `{suite}` has already started running, registration is closed")]
    SuiteAlreadyRunning {
        /// The name of the suite.
        suite: String,
    },
}

/// A single test was requested by name but the suite doesn't declare it.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("test `{name}` not found in suite `{suite}`")]
pub struct UnknownTest {
    pub(crate) suite: String,
    pub(crate) name: String,
}

impl UnknownTest {
    /// The name of the suite the lookup was performed in.
    pub fn suite(&self) -> &str {
        &self.suite
    }

    /// The requested test name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An abort-worthy error.
///
/// This is the panic payload that marks a non-recoverable condition. Unlike
/// ordinary assertion panics, which are classified as test failures, an
/// unwind carrying a `RunAbortError` is never caught at the test level: it
/// propagates out of `run_test` and aborts the enclosing suite or run.
#[derive(Clone, Debug, Error)]
#[error("run aborted: {message}")]
pub struct RunAbortError {
    message: String,
}

impl RunAbortError {
    /// Creates a new abort-worthy error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The abort message.
    pub fn message(&self) -> &str {
        &self.message
    }
}
