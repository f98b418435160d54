// Copyright (c) The ordtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Suites: ordered tables of tests, built through an explicit builder API.
//!
//! A suite moves through a two-phase lifecycle. In the **registration**
//! phase, tests, fixtures, hooks and nested suites are appended to ordered
//! tables. The first `run` invocation irrevocably flips the suite to the
//! **ready** phase; from then on every registration attempt fails
//! immediately with a [`RegistrationError`].

use crate::{
    config::ConfigMap,
    errors::{RegistrationError, UnknownTest},
    events::Location,
    ordinal::Tracker,
    outcome::{Outcome, TestContext},
    runner::{self, RunArgs},
    status::Status,
    test_filter::{FilterVerdict, TestFilter},
};
use debug_ignore::DebugIgnore;
use indexmap::IndexMap;
use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// A test body. Returns the outcome of the test; panics classify per the
/// failure taxonomy.
pub type TestBodyFn = Arc<dyn Fn(&TestContext) -> Outcome + Send + Sync>;

/// One layer of the fixture middleware stack wrapped around every test
/// body. The layer must invoke `next` exactly once, perform its own
/// cleanup after the inner call returns or unwinds, and re-raise panics.
pub type FixtureFn =
    Arc<dyn Fn(&TestContext, &(dyn Fn(&TestContext) -> Outcome)) -> Outcome + Send + Sync>;

/// A suite-level hook (`before_all` / `after_all`). A panic here aborts
/// the suite.
pub type SuiteHookFn = Arc<dyn Fn(&ConfigMap) + Send + Sync>;

#[derive(Clone, Debug)]
pub(crate) struct TestCase {
    /// The full, scope-qualified name.
    pub(crate) name: String,
    pub(crate) scope: Vec<String>,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) location: Location,
    pub(crate) body: DebugIgnore<TestBodyFn>,
}

/// An ordered collection of tests and nested suites.
#[derive(Debug)]
pub struct Suite {
    name: String,
    pub(crate) tests: IndexMap<String, TestCase>,
    pub(crate) nested: Vec<Suite>,
    pub(crate) fixtures: DebugIgnore<Vec<FixtureFn>>,
    pub(crate) before_all: DebugIgnore<Option<SuiteHookFn>>,
    pub(crate) after_all: DebugIgnore<Option<SuiteHookFn>>,
    parallel: bool,
    ready: AtomicBool,
}

impl Suite {
    /// Creates an empty suite in the registration phase.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tests: IndexMap::new(),
            nested: Vec::new(),
            fixtures: DebugIgnore(Vec::new()),
            before_all: DebugIgnore(None),
            after_all: DebugIgnore(None),
            parallel: false,
            ready: AtomicBool::new(false),
        }
    }

    /// The name of the suite.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a test at the suite's top level.
    #[track_caller]
    pub fn register_test<S, I, F>(
        &mut self,
        name: impl Into<String>,
        tags: I,
        body: F,
    ) -> Result<(), RegistrationError>
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
        F: Fn(&TestContext) -> Outcome + Send + Sync + 'static,
    {
        self.register_test_in(&[], name, tags, body)
    }

    /// Registers a test under a scope path. Scope components become part
    /// of the test's full name, `::`-separated, and the sequential engine
    /// brackets contiguous scope groups with scope events.
    #[track_caller]
    pub fn register_test_in<S, I, F>(
        &mut self,
        scope: &[&str],
        name: impl Into<String>,
        tags: I,
        body: F,
    ) -> Result<(), RegistrationError>
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
        F: Fn(&TestContext) -> Outcome + Send + Sync + 'static,
    {
        let location = Location::from(std::panic::Location::caller());
        self.ensure_open()?;

        let name = name.into();
        let full_name = if scope.is_empty() {
            name
        } else {
            let mut full = scope.join("::");
            full.push_str("::");
            full.push_str(&name);
            full
        };

        if self.tests.contains_key(&full_name) {
            return Err(RegistrationError::DuplicateTestName {
                suite: self.name.clone(),
                name: full_name,
            });
        }

        let case = TestCase {
            name: full_name.clone(),
            scope: scope.iter().map(|component| component.to_string()).collect(),
            tags: tags.into_iter().map(Into::into).collect(),
            location,
            body: DebugIgnore(Arc::new(body)),
        };
        self.tests.insert(full_name, case);
        Ok(())
    }

    /// Registers a nested suite, run (in declared order) before this
    /// suite's own tests.
    pub fn register_nested_suite(&mut self, suite: Suite) -> Result<(), RegistrationError> {
        self.ensure_open()?;
        self.nested.push(suite);
        Ok(())
    }

    /// Appends a layer to the fixture middleware stack. Layers wrap the
    /// test body outside-in, in registration order.
    pub fn add_fixture<F>(&mut self, fixture: F) -> Result<(), RegistrationError>
    where
        F: Fn(&TestContext, &(dyn Fn(&TestContext) -> Outcome)) -> Outcome + Send + Sync + 'static,
    {
        self.ensure_open()?;
        self.fixtures.0.push(Arc::new(fixture));
        Ok(())
    }

    /// Sets the hook run once before any of this suite's work.
    pub fn set_before_all<F>(&mut self, hook: F) -> Result<(), RegistrationError>
    where
        F: Fn(&ConfigMap) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        self.before_all.0 = Some(Arc::new(hook));
        Ok(())
    }

    /// Sets the hook run once after all of this suite's work.
    pub fn set_after_all<F>(&mut self, hook: F) -> Result<(), RegistrationError>
    where
        F: Fn(&ConfigMap) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        self.after_all.0 = Some(Arc::new(hook));
        Ok(())
    }

    /// Opts this suite into one-instance-per-test parallel execution: when
    /// a distributor is supplied, each test runs against a fresh clone of
    /// the suite on whatever thread the distributor picks.
    pub fn enable_parallel_execution(&mut self) -> Result<(), RegistrationError> {
        self.ensure_open()?;
        self.parallel = true;
        Ok(())
    }

    /// True if this suite opted into parallel execution.
    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// The full names of the declared tests, in registration order.
    pub fn test_names(&self) -> impl Iterator<Item = &str> {
        self.tests.keys().map(String::as_str)
    }

    /// The number of declared tests, nested suites included.
    pub fn total_test_count(&self) -> usize {
        self.tests.len()
            + self
                .nested
                .iter()
                .map(Suite::total_test_count)
                .sum::<usize>()
    }

    /// The number of tests, nested suites included, the given filter would
    /// actually run.
    pub fn expected_test_count(&self, filter: &TestFilter) -> usize {
        let own = self
            .tests
            .values()
            .filter(|case| {
                matches!(
                    filter.verdict(&self.name, &case.name, &case.tags),
                    FilterVerdict::Runs
                )
            })
            .count();
        own + self
            .nested
            .iter()
            .map(|nested| nested.expected_test_count(filter))
            .sum::<usize>()
    }

    /// True once the suite has entered the ready phase.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Flips the suite into the ready phase. Returns true on the first
    /// transition.
    pub(crate) fn mark_ready(&self) -> bool {
        !self.ready.swap(true, Ordering::AcqRel)
    }

    fn ensure_open(&self) -> Result<(), RegistrationError> {
        if self.is_ready() {
            return Err(RegistrationError::SuiteAlreadyRunning {
                suite: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Runs this suite.
    ///
    /// With `test_name` absent, nested suites run first, then this suite's
    /// own tests. With `test_name` present, only that test runs; nested
    /// suites are not consulted.
    ///
    /// The returned status completes once every unit of work belonging to
    /// this suite has completed, including units still in flight on a
    /// distributor.
    pub fn run(
        &self,
        test_name: Option<&str>,
        args: &RunArgs,
        tracker: &mut Tracker,
    ) -> Result<Arc<dyn Status>, UnknownTest> {
        if let Some(name) = test_name {
            if !self.tests.contains_key(name) {
                return Err(UnknownTest {
                    suite: self.name.clone(),
                    name: name.to_owned(),
                });
            }
        }
        Ok(runner::run_suite(self, test_name, args, tracker))
    }
}

impl Clone for Suite {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tests: self.tests.clone(),
            nested: self.nested.clone(),
            fixtures: self.fixtures.clone(),
            before_all: self.before_all.clone(),
            after_all: self.after_all.clone(),
            parallel: self.parallel,
            ready: AtomicBool::new(self.ready.load(Ordering::Acquire)),
        }
    }
}
