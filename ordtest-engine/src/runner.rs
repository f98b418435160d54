// Copyright (c) The ordtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The execution engine.
//!
//! The engine is driven entirely by the caller's thread plus whatever
//! distributor the caller supplies; it spawns no threads of its own. With
//! no distributor everything runs sequentially, and events are emitted in
//! logical-step order: a `TestStarting` precedes its terminal event, and
//! suite events bracket the events of their nested suites and tests.
//!
//! [`SuiteRunner`] is the top of the tree: it brackets a list of suites
//! with run-level events, aggregates [`RunStats`], and surfaces stops and
//! abort-worthy errors.

use crate::{
    config::{ConfigMap, RunnerConfig},
    distributor::{Distributor, WorkUnit},
    errors::RunAbortError,
    events::{Event, EventKind, Formatter},
    ordinal::Tracker,
    outcome::{self, Outcome, TestContext},
    reporter::Reporter,
    sorting::TestSortingReporter,
    status::{CompletionGuard, CompositeStatus, FailedStatus, StatefulStatus, Status},
    stopper::{NeverStop, Stopper},
    stopwatch::StopwatchStart,
    suite::{Suite, TestCase},
    test_filter::{FilterVerdict, TestFilter},
};
use serde::Serialize;
use std::{
    fmt,
    panic::{catch_unwind, resume_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex},
};
use tracing::{debug, warn};

/// Everything a suite needs to run, bundled for passing down the tree.
///
/// Cloning is cheap: the collaborators are shared handles. The tracker is
/// deliberately not part of this bundle: it is owned by one thread at a
/// time and passed separately.
#[derive(Clone)]
pub struct RunArgs {
    /// The event sink.
    pub reporter: Arc<dyn Reporter>,

    /// The cooperative-cancellation predicate.
    pub stopper: Arc<dyn Stopper>,

    /// Decides which tests run.
    pub filter: TestFilter,

    /// Forwarded unchanged to fixtures and tests.
    pub config: ConfigMap,

    /// If present, nested suites and (for suites that opted in) individual
    /// tests are dispatched here instead of running inline.
    pub distributor: Option<Arc<dyn Distributor>>,

    /// Engine tunables.
    pub runner_config: RunnerConfig,
}

impl RunArgs {
    /// Creates args with the given reporter and defaults for everything
    /// else: never-firing stopper, pass-everything filter, empty config,
    /// no distributor.
    pub fn new(reporter: Arc<dyn Reporter>) -> Self {
        Self {
            reporter,
            stopper: Arc::new(NeverStop),
            filter: TestFilter::default(),
            config: ConfigMap::new(),
            distributor: None,
            runner_config: RunnerConfig::default(),
        }
    }

    /// Replaces the filter.
    pub fn with_filter(mut self, filter: TestFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Replaces the stopper.
    pub fn with_stopper(mut self, stopper: Arc<dyn Stopper>) -> Self {
        self.stopper = stopper;
        self
    }

    /// Replaces the configuration map.
    pub fn with_config(mut self, config: ConfigMap) -> Self {
        self.config = config;
        self
    }

    /// Supplies a distributor.
    pub fn with_distributor(mut self, distributor: Arc<dyn Distributor>) -> Self {
        self.distributor = Some(distributor);
        self
    }

    /// Replaces the engine tunables.
    pub fn with_runner_config(mut self, runner_config: RunnerConfig) -> Self {
        self.runner_config = runner_config;
        self
    }
}

impl fmt::Debug for RunArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunArgs")
            .field("reporter", &"Reporter { .. }")
            .field("stopper", &"Stopper { .. }")
            .field("filter", &self.filter)
            .field("config", &self.config)
            .field("distributor", &self.distributor.as_ref().map(|_| "Distributor { .. }"))
            .field("runner_config", &self.runner_config)
            .finish()
    }
}

/// Runs one suite: `before_all`, nested suites (unless a single test is
/// targeted), own tests, `after_all`.
///
/// Panics from hooks, and abort-worthy errors from anywhere below, unwind
/// out of this function; the caller decides whether that means a suite
/// abort or a run abort.
pub(crate) fn run_suite(
    suite: &Suite,
    test_name: Option<&str>,
    args: &RunArgs,
    tracker: &mut Tracker,
) -> Arc<dyn Status> {
    if suite.mark_ready() {
        debug!(suite_name = suite.name(), "suite entered ready phase");
    }

    if let Some(hook) = suite.before_all.0.as_ref() {
        // A panic here unwinds before any test has started; the caller
        // reports the suite as aborted.
        hook(&args.config);
    }

    let body = catch_unwind(AssertUnwindSafe(|| {
        let mut children: Vec<Arc<dyn Status>> = Vec::new();
        if test_name.is_none() {
            children.push(run_nested_suites(suite, args, tracker));
        }
        children.push(run_tests(suite, test_name, args, tracker));
        children
    }));

    // after_all runs whether or not the suite body unwound.
    let hook_panic = suite
        .after_all
        .0
        .as_ref()
        .and_then(|hook| catch_unwind(AssertUnwindSafe(|| hook(&args.config))).err());

    match (body, hook_panic) {
        (Err(payload), hook_panic) => {
            if hook_panic.is_some() {
                warn!(
                    suite_name = suite.name(),
                    "after_all hook panicked while the suite was already unwinding"
                );
            }
            resume_unwind(payload)
        }
        (Ok(_), Some(payload)) => resume_unwind(payload),
        (Ok(children), None) => {
            let status: Arc<dyn Status> = Arc::new(CompositeStatus::new(children));
            status
        }
    }
}

/// Runs the nested suites in declared order, or dispatches each into the
/// distributor with a forked tracker. One nested suite's abort never
/// prevents its siblings from running.
pub(crate) fn run_nested_suites(
    suite: &Suite,
    args: &RunArgs,
    tracker: &mut Tracker,
) -> Arc<dyn Status> {
    let mut statuses: Vec<Arc<dyn Status>> = Vec::new();
    for nested in &suite.nested {
        if args.stopper.stop_requested() {
            debug!(
                suite_name = suite.name(),
                "stop requested, abandoning remaining nested suites"
            );
            break;
        }
        match &args.distributor {
            Some(distributor) => {
                let status = StatefulStatus::new();
                statuses.push(Arc::new(status.clone()));
                let unit = nested_suite_unit(nested.clone(), args.clone(), tracker.fork(), status);
                debug!(unit = unit.label(), "dispatching nested suite");
                distributor.submit(unit);
            }
            None => statuses.push(run_nested_suite_inline(nested, args, tracker)),
        }
    }
    Arc::new(CompositeStatus::new(statuses))
}

fn run_nested_suite_inline(
    nested: &Suite,
    args: &RunArgs,
    tracker: &mut Tracker,
) -> Arc<dyn Status> {
    args.reporter.report(Event::new(
        EventKind::SuiteStarting {
            suite_name: nested.name().to_owned(),
        },
        tracker.next_ordinal(),
    ));
    let stopwatch = StopwatchStart::now();

    let result = catch_unwind(AssertUnwindSafe(|| run_suite(nested, None, args, tracker)));
    match result {
        Ok(status) => {
            args.reporter.report(Event::new(
                EventKind::SuiteCompleted {
                    suite_name: nested.name().to_owned(),
                    duration: stopwatch.elapsed(),
                },
                tracker.next_ordinal(),
            ));
            status
        }
        Err(payload) => {
            // Abort-worthy errors are never caught here.
            if payload.is::<RunAbortError>() {
                resume_unwind(payload);
            }
            let message = outcome::panic_message(payload.as_ref());
            warn!(suite_name = nested.name(), %message, "nested suite aborted");
            args.reporter.report(Event::new(
                EventKind::SuiteAborted {
                    suite_name: nested.name().to_owned(),
                    message,
                },
                tracker.next_ordinal(),
            ));
            Arc::new(FailedStatus)
        }
    }
}

fn nested_suite_unit(
    nested: Suite,
    args: RunArgs,
    mut tracker: Tracker,
    status: StatefulStatus,
) -> WorkUnit {
    let label = format!("suite {}", nested.name());
    WorkUnit::new(label, move || {
        let _guard = CompletionGuard::new(status.clone());
        if args.stopper.stop_requested() {
            // Abandoned after dispatch: no events for it.
            return;
        }

        args.reporter.report(Event::new(
            EventKind::SuiteStarting {
                suite_name: nested.name().to_owned(),
            },
            tracker.next_ordinal(),
        ));
        let stopwatch = StopwatchStart::now();

        // A dispatched unit runs its work inline rather than distributing
        // further: a unit that queues sub-units behind itself and then
        // blocks on them can starve a bounded pool.
        let inline_args = RunArgs {
            distributor: None,
            ..args.clone()
        };

        let result = catch_unwind(AssertUnwindSafe(|| {
            run_suite(&nested, None, &inline_args, &mut tracker)
        }));
        match result {
            Ok(inner) => {
                // The nested run was fully synchronous, so this cannot
                // block on in-flight work.
                if !inner.succeeds() {
                    status.mark_failed();
                }
                args.reporter.report(Event::new(
                    EventKind::SuiteCompleted {
                        suite_name: nested.name().to_owned(),
                        duration: stopwatch.elapsed(),
                    },
                    tracker.next_ordinal(),
                ));
            }
            Err(payload) => {
                status.mark_failed();
                match payload.downcast::<RunAbortError>() {
                    Ok(abort) => {
                        // Can't unwind across the distributor; the cause
                        // rides the status up to the harness instead.
                        debug!(
                            suite_name = nested.name(),
                            "abort-worthy error on a dispatched suite, recording on status"
                        );
                        status.record_abort(*abort);
                    }
                    Err(payload) => {
                        let message = outcome::panic_message(payload.as_ref());
                        warn!(suite_name = nested.name(), %message, "dispatched suite aborted");
                        args.reporter.report(Event::new(
                            EventKind::SuiteAborted {
                                suite_name: nested.name().to_owned(),
                                message,
                            },
                            tracker.next_ordinal(),
                        ));
                    }
                }
            }
        }
    })
}

/// Runs this suite's own tests: the single requested one, or all of them
/// in registration order.
pub(crate) fn run_tests(
    suite: &Suite,
    test_name: Option<&str>,
    args: &RunArgs,
    tracker: &mut Tracker,
) -> Arc<dyn Status> {
    let candidates: Vec<&TestCase> = match test_name {
        Some(name) => suite.tests.get(name).into_iter().collect(),
        None => suite.tests.values().collect(),
    };

    match &args.distributor {
        Some(distributor) if suite.is_parallel() => {
            run_tests_distributed(suite, &candidates, distributor.clone(), args, tracker)
        }
        _ => run_tests_sequential(suite, &candidates, args, tracker),
    }
}

fn run_tests_sequential(
    suite: &Suite,
    candidates: &[&TestCase],
    args: &RunArgs,
    tracker: &mut Tracker,
) -> Arc<dyn Status> {
    let mut statuses: Vec<Arc<dyn Status>> = Vec::new();
    let mut scope_stack: Vec<String> = Vec::new();

    for case in candidates {
        if args.stopper.stop_requested() {
            debug!(
                suite_name = suite.name(),
                "stop requested, abandoning remaining tests"
            );
            break;
        }
        match args.filter.verdict(suite.name(), &case.name, &case.tags) {
            FilterVerdict::Excluded { reason } => {
                debug!(test_name = %case.name, %reason, "test filtered out");
            }
            FilterVerdict::Ignored { reason } => {
                transition_scopes(suite, &mut scope_stack, &case.scope, args, tracker);
                args.reporter.report(
                    Event::new(
                        EventKind::TestIgnored {
                            suite_name: suite.name().to_owned(),
                            test_name: case.name.clone(),
                            reason,
                        },
                        tracker.next_ordinal(),
                    )
                    .with_location(case.location.clone()),
                );
            }
            FilterVerdict::Runs => {
                transition_scopes(suite, &mut scope_stack, &case.scope, args, tracker);
                let status = StatefulStatus::new();
                run_test(suite, case, args, tracker, &status);
                statuses.push(Arc::new(status));
            }
        }
    }

    transition_scopes(suite, &mut scope_stack, &[], args, tracker);
    Arc::new(CompositeStatus::new(statuses))
}

fn run_tests_distributed(
    suite: &Suite,
    candidates: &[&TestCase],
    distributor: Arc<dyn Distributor>,
    args: &RunArgs,
    tracker: &mut Tracker,
) -> Arc<dyn Status> {
    // Verdicts are computed up front so the sorting reporter knows, in
    // declaration order, exactly which tests will emit events.
    let verdicts: Vec<(&TestCase, FilterVerdict)> = candidates
        .iter()
        .map(|case| {
            (
                *case,
                args.filter.verdict(suite.name(), &case.name, &case.tags),
            )
        })
        .collect();
    let tracked: Vec<String> = verdicts
        .iter()
        .filter(|(_, verdict)| !matches!(verdict, FilterVerdict::Excluded { .. }))
        .map(|(case, _)| case.name.clone())
        .collect();

    let sorting = Arc::new(TestSortingReporter::new(
        tracked,
        args.runner_config.sort_timeout,
        args.runner_config.flush_mode,
        args.reporter.clone(),
    ));

    // For the duration of the dispatch, units report through the sorter.
    let unit_args = RunArgs {
        reporter: sorting.clone() as Arc<dyn Reporter>,
        distributor: None,
        ..args.clone()
    };

    let mut statuses: Vec<Arc<dyn Status>> = Vec::new();
    for (case, verdict) in verdicts {
        match verdict {
            FilterVerdict::Excluded { reason } => {
                debug!(test_name = %case.name, %reason, "test filtered out");
            }
            FilterVerdict::Ignored { reason } => {
                sorting.report(
                    Event::new(
                        EventKind::TestIgnored {
                            suite_name: suite.name().to_owned(),
                            test_name: case.name.clone(),
                            reason,
                        },
                        tracker.next_ordinal(),
                    )
                    .with_location(case.location.clone()),
                );
            }
            FilterVerdict::Runs => {
                if args.stopper.stop_requested() {
                    // Abandoned before dispatch: no events, and the slot
                    // must not hold up whatever was dispatched earlier.
                    sorting.complete_silently(&case.name);
                    continue;
                }
                let status = StatefulStatus::new();
                statuses.push(Arc::new(status.clone()));
                // Each unit gets a fresh instance of the suite.
                let unit = test_unit(
                    suite.clone(),
                    case.name.clone(),
                    unit_args.clone(),
                    tracker.fork(),
                    status,
                    sorting.clone(),
                );
                debug!(unit = unit.label(), "dispatching test");
                distributor.submit(unit);
            }
        }
    }

    Arc::new(CompositeStatus::new(statuses))
}

fn test_unit(
    suite: Suite,
    test_name: String,
    args: RunArgs,
    mut tracker: Tracker,
    status: StatefulStatus,
    sorting: Arc<TestSortingReporter>,
) -> WorkUnit {
    let label = format!("test {}::{}", suite.name(), test_name);
    WorkUnit::new(label, move || {
        let _guard = CompletionGuard::new(status.clone());
        if args.stopper.stop_requested() {
            sorting.complete_silently(&test_name);
            return;
        }

        let case = suite
            .tests
            .get(&test_name)
            .expect("test exists in the fresh suite instance")
            .clone();

        let result = catch_unwind(AssertUnwindSafe(|| {
            run_test(&suite, &case, &args, &mut tracker, &status)
        }));
        if let Err(payload) = result {
            // run_test already completed the status as failed on its way
            // out; what's left is routing the cause.
            match payload.downcast::<RunAbortError>() {
                Ok(abort) => {
                    debug!(
                        test_name = %test_name,
                        "abort-worthy error on a dispatched test, recording on status"
                    );
                    status.record_abort(*abort);
                }
                Err(payload) => {
                    warn!(
                        message = %outcome::panic_message(payload.as_ref()),
                        "panic escaped run_test"
                    );
                }
            }
        }
    })
}

/// Runs one test body and emits its `TestStarting`/terminal event pair.
///
/// The body is invoked through the suite's fixture middleware stack; its
/// completion is classified per the failure taxonomy. The provided status
/// is always completed before this function returns or unwinds.
pub(crate) fn run_test(
    suite: &Suite,
    case: &TestCase,
    args: &RunArgs,
    tracker: &mut Tracker,
    status: &StatefulStatus,
) {
    let _guard = CompletionGuard::new(status.clone());

    args.reporter.report(
        Event::new(
            EventKind::TestStarting {
                suite_name: suite.name().to_owned(),
                test_name: case.name.clone(),
            },
            tracker.next_ordinal(),
        )
        .with_location(case.location.clone()),
    );

    let stopwatch = StopwatchStart::now();
    let ctx = TestContext::new(&case.name, args.config.clone(), tracker.fork());

    let result = catch_unwind(AssertUnwindSafe(|| {
        invoke_with_fixtures(&suite.fixtures.0, &ctx, case.body.0.as_ref())
    }));

    let outcome = match result {
        Err(payload) if payload.is::<RunAbortError>() => {
            // Never caught at the test level: no terminal event, the
            // guard completes the status as failed, and the unwind
            // continues into the enclosing suite or run.
            debug!(test_name = %case.name, "abort-worthy error, propagating");
            resume_unwind(payload);
        }
        other => outcome::classify(other),
    };

    let duration = stopwatch.elapsed();
    let recorded = ctx.take_recorded();
    let suite_name = suite.name().to_owned();
    let test_name = case.name.clone();

    let terminal = match &outcome {
        Outcome::Succeeded => Some(EventKind::TestSucceeded {
            suite_name,
            test_name,
            duration,
            recorded,
        }),
        Outcome::Failed(message) => Some(EventKind::TestFailed {
            suite_name,
            test_name,
            message: message.clone(),
            duration,
            recorded,
        }),
        Outcome::Canceled(message) => Some(EventKind::TestCanceled {
            suite_name,
            test_name,
            message: message.clone(),
            duration,
            recorded,
        }),
        Outcome::Pending(_) => Some(EventKind::TestPending {
            suite_name,
            test_name,
            duration,
            recorded,
        }),
        Outcome::Omitted(_) => {
            debug!(test_name = %case.name, "omitted outcome, no terminal event");
            None
        }
    };
    if let Some(kind) = terminal {
        args.reporter
            .report(Event::new(kind, tracker.next_ordinal()).with_location(case.location.clone()));
    }

    if outcome.is_failing() {
        status.mark_failed();
    }
    status.mark_completed();
}

/// Threads the body through the fixture stack, outermost layer first.
fn invoke_with_fixtures(
    fixtures: &[crate::suite::FixtureFn],
    ctx: &TestContext,
    body: &(dyn Fn(&TestContext) -> Outcome + Send + Sync),
) -> Outcome {
    match fixtures.split_first() {
        None => body(ctx),
        Some((outer, rest)) => outer(ctx, &|next_ctx: &TestContext| {
            invoke_with_fixtures(rest, next_ctx, body)
        }),
    }
}

/// Emits the scope events needed to move from the currently open scope
/// path to `target`.
fn transition_scopes(
    suite: &Suite,
    stack: &mut Vec<String>,
    target: &[String],
    args: &RunArgs,
    tracker: &mut Tracker,
) {
    let common = stack
        .iter()
        .zip(target)
        .take_while(|(open, wanted)| open == wanted)
        .count();

    while stack.len() > common {
        let name = stack.pop().expect("stack is non-empty");
        let level = stack.len();
        args.reporter.report(
            Event::new(
                EventKind::ScopeClosed {
                    suite_name: suite.name().to_owned(),
                    name: name.clone(),
                },
                tracker.next_ordinal(),
            )
            .with_formatter(Formatter::Indented { text: name, level }),
        );
    }

    for component in &target[common..] {
        let level = stack.len();
        args.reporter.report(
            Event::new(
                EventKind::ScopeOpened {
                    suite_name: suite.name().to_owned(),
                    name: component.clone(),
                },
                tracker.next_ordinal(),
            )
            .with_formatter(Formatter::Indented {
                text: component.clone(),
                level,
            }),
        );
        stack.push(component.clone());
    }
}

/// Statistics for a run.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct RunStats {
    /// The number of tests that started.
    pub started: usize,

    /// The number of tests that succeeded.
    pub succeeded: usize,

    /// The number of tests that failed.
    pub failed: usize,

    /// The number of tests that canceled themselves.
    pub canceled: usize,

    /// The number of tests that declared themselves pending.
    pub pending: usize,

    /// The number of tests skipped with a `TestIgnored` event.
    pub ignored: usize,

    /// The number of suites that aborted.
    pub suites_aborted: usize,

    /// True if the run was stopped before all work was attempted.
    pub stopped: bool,

    /// True if the run was brought down by an abort-worthy error.
    pub aborted: bool,
}

impl RunStats {
    /// True if the run is considered a success: nothing failed, nothing
    /// canceled, no suite aborted, and the run neither stopped early nor
    /// aborted.
    pub fn is_success(&self) -> bool {
        self.failed == 0
            && self.canceled == 0
            && self.suites_aborted == 0
            && !self.stopped
            && !self.aborted
    }

    fn on_event(&mut self, kind: &EventKind) {
        match kind {
            EventKind::TestStarting { .. } => self.started += 1,
            EventKind::TestSucceeded { .. } => self.succeeded += 1,
            EventKind::TestFailed { .. } => self.failed += 1,
            EventKind::TestCanceled { .. } => self.canceled += 1,
            EventKind::TestPending { .. } => self.pending += 1,
            EventKind::TestIgnored { .. } => self.ignored += 1,
            EventKind::SuiteAborted { .. } => self.suites_aborted += 1,
            EventKind::RunStopped { .. } => self.stopped = true,
            EventKind::RunAborted { .. } => self.aborted = true,
            _ => {}
        }
    }
}

/// Counts terminal events on their way to the real reporter.
struct StatsReporter {
    base: Arc<dyn Reporter>,
    stats: Mutex<RunStats>,
}

impl StatsReporter {
    fn snapshot(&self) -> RunStats {
        *self.stats.lock().expect("stats lock poisoned")
    }
}

impl Reporter for StatsReporter {
    fn report(&self, event: Event) {
        self.stats
            .lock()
            .expect("stats lock poisoned")
            .on_event(&event.kind);
        self.base.report(event);
    }
}

/// Drives a whole run over a list of top-level suites.
#[derive(Clone, Debug)]
pub struct SuiteRunner {
    args: RunArgs,
    run_stamp: u32,
}

impl SuiteRunner {
    /// Creates a runner with run stamp 0.
    pub fn new(args: RunArgs) -> Self {
        Self { args, run_stamp: 0 }
    }

    /// Sets the run stamp carried by every ordinal of this run.
    pub fn with_run_stamp(mut self, run_stamp: u32) -> Self {
        self.run_stamp = run_stamp;
        self
    }

    /// Runs the suites in order and returns aggregate statistics.
    ///
    /// Emits `RunStarting` first and exactly one of `RunCompleted`,
    /// `RunStopped` or `RunAborted` last. Each suite is bracketed with
    /// `SuiteStarting` and either `SuiteCompleted` or `SuiteAborted`; one
    /// suite aborting does not stop its siblings, but an abort-worthy
    /// error stops the run.
    pub fn run_suites(&self, suites: &[Suite]) -> RunStats {
        let stats_reporter = Arc::new(StatsReporter {
            base: self.args.reporter.clone(),
            stats: Mutex::new(RunStats::default()),
        });
        let args = RunArgs {
            reporter: stats_reporter.clone() as Arc<dyn Reporter>,
            ..self.args.clone()
        };
        let mut tracker = Tracker::new(self.run_stamp);
        let stopwatch = StopwatchStart::now();

        let expected_test_count = suites
            .iter()
            .map(|suite| suite.expected_test_count(&args.filter))
            .sum();
        args.reporter.report(Event::new(
            EventKind::RunStarting {
                expected_test_count,
            },
            tracker.next_ordinal(),
        ));

        let mut abort: Option<RunAbortError> = None;
        for suite in suites {
            if args.stopper.stop_requested() {
                debug!("stop requested, abandoning remaining suites");
                break;
            }

            args.reporter.report(Event::new(
                EventKind::SuiteStarting {
                    suite_name: suite.name().to_owned(),
                },
                tracker.next_ordinal(),
            ));
            let suite_watch = StopwatchStart::now();

            let result =
                catch_unwind(AssertUnwindSafe(|| run_suite(suite, None, &args, &mut tracker)));
            match result {
                Ok(status) => {
                    // Join any work still in flight on the distributor.
                    status.wait_until_completed();
                    args.reporter.report(Event::new(
                        EventKind::SuiteCompleted {
                            suite_name: suite.name().to_owned(),
                            duration: suite_watch.elapsed(),
                        },
                        tracker.next_ordinal(),
                    ));
                    if let Some(cause) = status.abort_cause() {
                        abort = Some(cause);
                        break;
                    }
                }
                Err(payload) => match payload.downcast::<RunAbortError>() {
                    Ok(cause) => {
                        abort = Some(*cause);
                        break;
                    }
                    Err(payload) => {
                        let message = outcome::panic_message(payload.as_ref());
                        warn!(suite_name = suite.name(), %message, "suite aborted");
                        args.reporter.report(Event::new(
                            EventKind::SuiteAborted {
                                suite_name: suite.name().to_owned(),
                                message,
                            },
                            tracker.next_ordinal(),
                        ));
                    }
                },
            }
        }

        let duration = stopwatch.elapsed();
        let final_kind = if let Some(cause) = abort {
            EventKind::RunAborted {
                message: cause.message().to_owned(),
                duration,
            }
        } else if args.stopper.stop_requested() {
            EventKind::RunStopped { duration }
        } else {
            EventKind::RunCompleted { duration }
        };
        args.reporter
            .report(Event::new(final_kind, tracker.next_ordinal()));

        stats_reporter.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        outcome::abort_run,
        reporter::CollectingReporter,
        stopper::StopFlag,
        test_filter::ExcludeReason,
    };
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn label(event: &Event) -> &'static str {
        match &event.kind {
            EventKind::RunStarting { .. } => "run-starting",
            EventKind::RunCompleted { .. } => "run-completed",
            EventKind::RunStopped { .. } => "run-stopped",
            EventKind::RunAborted { .. } => "run-aborted",
            EventKind::SuiteStarting { .. } => "suite-starting",
            EventKind::SuiteCompleted { .. } => "suite-completed",
            EventKind::SuiteAborted { .. } => "suite-aborted",
            EventKind::TestStarting { .. } => "test-starting",
            EventKind::TestSucceeded { .. } => "test-succeeded",
            EventKind::TestFailed { .. } => "test-failed",
            EventKind::TestIgnored { .. } => "test-ignored",
            EventKind::TestPending { .. } => "test-pending",
            EventKind::TestCanceled { .. } => "test-canceled",
            EventKind::ScopeOpened { .. } => "scope-opened",
            EventKind::ScopeClosed { .. } => "scope-closed",
            EventKind::InfoProvided { .. } => "info",
            EventKind::MarkupProvided { .. } => "markup",
        }
    }

    fn labels(events: &[Event]) -> Vec<&'static str> {
        events.iter().map(label).collect()
    }

    fn collecting_args() -> (RunArgs, Arc<CollectingReporter>) {
        let reporter = Arc::new(CollectingReporter::new());
        (RunArgs::new(reporter.clone()), reporter)
    }

    #[test]
    fn run_stats_is_success() {
        assert!(RunStats::default().is_success(), "empty run is a success");
        assert!(
            RunStats {
                started: 3,
                succeeded: 1,
                pending: 1,
                ignored: 1,
                ..RunStats::default()
            }
            .is_success(),
            "pending and ignored tests don't fail a run"
        );
        assert!(
            !RunStats {
                failed: 1,
                ..RunStats::default()
            }
            .is_success(),
            "failed tests fail the run"
        );
        assert!(
            !RunStats {
                canceled: 1,
                ..RunStats::default()
            }
            .is_success(),
            "canceled tests fail the run"
        );
        assert!(
            !RunStats {
                suites_aborted: 1,
                ..RunStats::default()
            }
            .is_success(),
            "aborted suites fail the run"
        );
        assert!(
            !RunStats {
                stopped: true,
                ..RunStats::default()
            }
            .is_success(),
            "a stopped run is not a success"
        );
        assert!(
            !RunStats {
                aborted: true,
                ..RunStats::default()
            }
            .is_success(),
            "an aborted run is not a success"
        );
    }

    #[test]
    fn sequential_run_emits_pairs_in_registration_order() {
        let mut suite = Suite::new("suite");
        for name in ["t1", "t2", "t3"] {
            suite
                .register_test(name, Vec::<String>::new(), |_| Outcome::Succeeded)
                .unwrap();
        }

        let (args, reporter) = collecting_args();
        let mut tracker = Tracker::new(0);
        let status = suite.run(None, &args, &mut tracker).unwrap();
        assert!(status.is_completed());
        assert!(status.succeeds());

        let events = reporter.take_events();
        assert_eq!(
            labels(&events),
            [
                "test-starting",
                "test-succeeded",
                "test-starting",
                "test-succeeded",
                "test-starting",
                "test-succeeded",
            ]
        );
        let names: Vec<_> = events
            .iter()
            .map(|event| event.test_name().unwrap().to_owned())
            .collect();
        assert_eq!(names, ["t1", "t1", "t2", "t2", "t3", "t3"]);
    }

    #[test]
    fn targeted_run_executes_only_the_requested_test() {
        let mut suite = Suite::new("suite");
        suite
            .register_test("t1", Vec::<String>::new(), |_| Outcome::Succeeded)
            .unwrap();
        suite
            .register_test("t2", Vec::<String>::new(), |_| Outcome::Succeeded)
            .unwrap();

        let (args, reporter) = collecting_args();
        let mut tracker = Tracker::new(0);
        suite.run(Some("t2"), &args, &mut tracker).unwrap();

        let events = reporter.take_events();
        assert_eq!(labels(&events), ["test-starting", "test-succeeded"]);
        assert_eq!(events[0].test_name(), Some("t2"));

        let err = suite.run(Some("nope"), &args, &mut tracker).unwrap_err();
        assert_eq!(err.suite(), "suite");
        assert_eq!(err.name(), "nope");
    }

    #[test]
    fn failing_test_does_not_stop_siblings() {
        let mut suite = Suite::new("suite");
        suite
            .register_test("t1", Vec::<String>::new(), |_| panic!("boom"))
            .unwrap();
        suite
            .register_test("t2", Vec::<String>::new(), |_| Outcome::Succeeded)
            .unwrap();

        let (args, reporter) = collecting_args();
        let mut tracker = Tracker::new(0);
        let status = suite.run(None, &args, &mut tracker).unwrap();
        assert!(!status.succeeds());

        let events = reporter.take_events();
        assert_eq!(
            labels(&events),
            ["test-starting", "test-failed", "test-starting", "test-succeeded"]
        );
        match &events[1].kind {
            EventKind::TestFailed { message, .. } => assert_eq!(message, "boom"),
            kind => panic!("expected TestFailed, got {kind:?}"),
        }
    }

    #[test]
    fn canceled_and_pending_outcomes_classify_separately() {
        let mut suite = Suite::new("suite");
        suite
            .register_test("canceled", Vec::<String>::new(), |_| {
                Outcome::canceled("no database")
            })
            .unwrap();
        suite
            .register_test("pending", Vec::<String>::new(), |_| Outcome::pending())
            .unwrap();

        let (args, reporter) = collecting_args();
        let mut tracker = Tracker::new(0);
        let status = suite.run(None, &args, &mut tracker).unwrap();
        // Canceled is failing for status purposes.
        assert!(!status.succeeds());

        let events = reporter.take_events();
        assert_eq!(
            labels(&events),
            ["test-starting", "test-canceled", "test-starting", "test-pending"]
        );
        // No suite-level escalation happened.
        assert!(!events.iter().any(|e| matches!(e.kind, EventKind::SuiteAborted { .. })));

        // A pending-only suite succeeds.
        let mut pending_only = Suite::new("pending-only");
        pending_only
            .register_test("pending", Vec::<String>::new(), |_| Outcome::pending())
            .unwrap();
        let (args, _reporter) = collecting_args();
        let status = pending_only.run(None, &args, &mut tracker).unwrap();
        assert!(status.succeeds());
    }

    #[test]
    fn abort_worthy_error_propagates_without_a_terminal_event() {
        let mut suite = Suite::new("suite");
        suite
            .register_test("t1", Vec::<String>::new(), |_| abort_run("vm error"))
            .unwrap();
        suite
            .register_test("t2", Vec::<String>::new(), |_| Outcome::Succeeded)
            .unwrap();

        let (args, reporter) = collecting_args();
        let mut tracker = Tracker::new(0);
        let payload = catch_unwind(AssertUnwindSafe(|| {
            suite.run(None, &args, &mut tracker)
        }))
        .expect_err("abort propagates out of the run");
        let abort = payload
            .downcast_ref::<RunAbortError>()
            .expect("payload is a RunAbortError");
        assert_eq!(abort.message(), "vm error");

        // t1 got its starting event but no terminal one, and t2 never ran.
        let events = reporter.take_events();
        assert_eq!(labels(&events), ["test-starting"]);
    }

    #[test]
    fn fixtures_wrap_outside_in_and_clean_up_on_panic() {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let mut suite = Suite::new("suite");
        let outer_log = log.clone();
        suite
            .add_fixture(move |ctx, next| {
                outer_log.lock().unwrap().push("outer-before");
                let result = catch_unwind(AssertUnwindSafe(|| next(ctx)));
                outer_log.lock().unwrap().push("outer-after");
                match result {
                    Ok(outcome) => outcome,
                    Err(payload) => resume_unwind(payload),
                }
            })
            .unwrap();
        let inner_log = log.clone();
        suite
            .add_fixture(move |ctx, next| {
                inner_log.lock().unwrap().push("inner-before");
                let result = catch_unwind(AssertUnwindSafe(|| next(ctx)));
                inner_log.lock().unwrap().push("inner-after");
                match result {
                    Ok(outcome) => outcome,
                    Err(payload) => resume_unwind(payload),
                }
            })
            .unwrap();
        let body_log = log.clone();
        suite
            .register_test("t", Vec::<String>::new(), move |_| {
                body_log.lock().unwrap().push("body");
                panic!("boom");
            })
            .unwrap();

        let (args, reporter) = collecting_args();
        let mut tracker = Tracker::new(0);
        let status = suite.run(None, &args, &mut tracker).unwrap();
        assert!(!status.succeeds());

        assert_eq!(
            *log.lock().unwrap(),
            ["outer-before", "inner-before", "body", "inner-after", "outer-after"]
        );
        // The panic still classified as a plain test failure.
        assert_eq!(labels(&reporter.take_events()), ["test-starting", "test-failed"]);
    }

    #[test]
    fn stopper_abandons_remaining_tests_silently() {
        let stop = StopFlag::new();
        let mut suite = Suite::new("suite");
        let trip = stop.clone();
        suite
            .register_test("t1", Vec::<String>::new(), move |_| {
                trip.request_stop();
                Outcome::Succeeded
            })
            .unwrap();
        suite
            .register_test("t2", Vec::<String>::new(), |_| Outcome::Succeeded)
            .unwrap();

        let (args, reporter) = collecting_args();
        let args = args.with_stopper(Arc::new(stop));
        let mut tracker = Tracker::new(0);
        let status = suite.run(None, &args, &mut tracker).unwrap();
        // A stopped run completes; already-started work ran to completion.
        assert!(status.succeeds());

        let events = reporter.take_events();
        assert_eq!(labels(&events), ["test-starting", "test-succeeded"]);
        assert_eq!(events[0].test_name(), Some("t1"));
    }

    #[test]
    fn filter_ignores_and_excludes_per_verdict() {
        let mut suite = Suite::new("suite");
        suite
            .register_test("fast", ["Fast"], |_| Outcome::Succeeded)
            .unwrap();
        suite
            .register_test("slow", ["Slow"], |_| Outcome::Succeeded)
            .unwrap();
        suite
            .register_test("ignored", [crate::test_filter::IGNORE_TAG], |_| {
                Outcome::Succeeded
            })
            .unwrap();

        // Exclude: tag-excluded tests are reported as ignored.
        let (args, reporter) = collecting_args();
        let args = args.with_filter(TestFilter::new(
            None,
            ["Slow".to_owned()].into_iter().collect::<BTreeSet<_>>(),
        ));
        let mut tracker = Tracker::new(0);
        suite.run(None, &args, &mut tracker).unwrap();
        let events = reporter.take_events();
        assert_eq!(
            labels(&events),
            ["test-starting", "test-succeeded", "test-ignored", "test-ignored"]
        );
        match &events[2].kind {
            EventKind::TestIgnored { reason, .. } => {
                assert_eq!(
                    reason,
                    &ExcludeReason::ExcludedTag {
                        tag: "Slow".to_owned()
                    }
                );
            }
            kind => panic!("expected TestIgnored, got {kind:?}"),
        }

        // Include: mismatches are skipped silently.
        let (args, reporter) = collecting_args();
        let args = args.with_filter(TestFilter::new(
            Some(["Fast".to_owned()].into_iter().collect()),
            BTreeSet::new(),
        ));
        suite.run(None, &args, &mut tracker).unwrap();
        let events = reporter.take_events();
        assert_eq!(labels(&events), ["test-starting", "test-succeeded"]);
        assert_eq!(events[0].test_name(), Some("fast"));
    }

    #[test]
    fn recorded_notes_travel_inside_the_terminal_event() {
        let mut suite = Suite::new("suite");
        suite
            .register_test("t", Vec::<String>::new(), |ctx| {
                ctx.info("checking the cache");
                ctx.markup("*stale*");
                Outcome::Succeeded
            })
            .unwrap();

        let (args, reporter) = collecting_args();
        let mut tracker = Tracker::new(0);
        suite.run(None, &args, &mut tracker).unwrap();

        let events = reporter.take_events();
        assert_eq!(labels(&events), ["test-starting", "test-succeeded"]);
        match &events[1].kind {
            EventKind::TestSucceeded { recorded, .. } => {
                assert_eq!(labels(recorded), ["info", "markup"]);
                // Recorded ordinals slot between the bracketing events.
                assert!(events[0].ordinal < recorded[0].ordinal);
                assert!(recorded[1].ordinal < events[1].ordinal);
            }
            kind => panic!("expected TestSucceeded, got {kind:?}"),
        }
    }

    #[test]
    fn scope_groups_are_bracketed_with_scope_events() {
        let mut suite = Suite::new("suite");
        suite
            .register_test_in(&["reads"], "hit", Vec::<String>::new(), |_| {
                Outcome::Succeeded
            })
            .unwrap();
        suite
            .register_test_in(&["reads"], "miss", Vec::<String>::new(), |_| {
                Outcome::Succeeded
            })
            .unwrap();
        suite
            .register_test_in(&["writes"], "append", Vec::<String>::new(), |_| {
                Outcome::Succeeded
            })
            .unwrap();

        let (args, reporter) = collecting_args();
        let mut tracker = Tracker::new(0);
        suite.run(None, &args, &mut tracker).unwrap();

        assert_eq!(
            labels(&reporter.take_events()),
            [
                "scope-opened",
                "test-starting",
                "test-succeeded",
                "test-starting",
                "test-succeeded",
                "scope-closed",
                "scope-opened",
                "test-starting",
                "test-succeeded",
                "scope-closed",
            ]
        );
    }

    #[test]
    fn nested_suite_abort_does_not_stop_siblings() {
        let mut broken = Suite::new("broken");
        broken
            .set_before_all(|_| panic!("database unreachable"))
            .unwrap();
        broken
            .register_test("t", Vec::<String>::new(), |_| Outcome::Succeeded)
            .unwrap();

        let mut healthy = Suite::new("healthy");
        healthy
            .register_test("t", Vec::<String>::new(), |_| Outcome::Succeeded)
            .unwrap();

        let mut parent = Suite::new("parent");
        parent.register_nested_suite(broken).unwrap();
        parent.register_nested_suite(healthy).unwrap();

        let (args, reporter) = collecting_args();
        let mut tracker = Tracker::new(0);
        let status = parent.run(None, &args, &mut tracker).unwrap();
        assert!(!status.succeeds());

        let events = reporter.take_events();
        assert_eq!(
            labels(&events),
            [
                "suite-starting",
                "suite-aborted",
                "suite-starting",
                "test-starting",
                "test-succeeded",
                "suite-completed",
            ]
        );
        match &events[1].kind {
            EventKind::SuiteAborted { message, suite_name } => {
                assert_eq!(suite_name, "broken");
                assert_eq!(message, "database unreachable");
            }
            kind => panic!("expected SuiteAborted, got {kind:?}"),
        }
    }
}
