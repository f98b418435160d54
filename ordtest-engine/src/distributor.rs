// Copyright (c) The ordtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Work distribution for parallel execution.
//!
//! The engine itself spawns no threads. When a [`Distributor`] is supplied,
//! independent units of work (a test against a fresh suite instance, or a
//! whole nested suite) are wrapped as [`WorkUnit`]s, each carrying its own
//! forked tracker inside the closure, and submitted instead of being run
//! inline. The distributor's scheduling policy is its own business.

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::warn;

use crate::config::RunnerConfig;

/// An independent, self-contained unit of work.
///
/// The closure owns everything it needs: a fresh suite instance, the run
/// arguments, a forked tracker, and the status it must complete. Completion
/// of that status is how the initiating thread observes the unit finishing.
pub struct WorkUnit {
    label: String,
    job: Box<dyn FnOnce() + Send>,
}

impl WorkUnit {
    pub(crate) fn new(label: impl Into<String>, job: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            job: Box::new(job),
        }
    }

    /// A human-readable label for the unit, for diagnostics.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Runs the unit to completion on the calling thread.
    pub fn run(self) {
        (self.job)()
    }
}

impl std::fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkUnit")
            .field("label", &self.label)
            .field("job", &"FnOnce { .. }")
            .finish()
    }
}

/// A black-box work queue accepting independent runnable units.
pub trait Distributor: Send + Sync {
    /// Queues a unit. The distributor decides where and when it runs.
    fn submit(&self, unit: WorkUnit);
}

/// Runs every unit immediately on the submitting thread.
///
/// Makes "parallel" execution deterministic; useful in tests and as a
/// degenerate distributor.
#[derive(Copy, Clone, Debug, Default)]
pub struct ImmediateDistributor;

impl Distributor for ImmediateDistributor {
    fn submit(&self, unit: WorkUnit) {
        unit.run();
    }
}

/// A distributor backed by a dedicated rayon thread pool.
pub struct ThreadPoolDistributor {
    pool: ThreadPool,
}

impl ThreadPoolDistributor {
    /// Creates a pool with the given number of worker threads.
    pub fn new(test_threads: usize) -> Self {
        let pool = ThreadPoolBuilder::new()
            .num_threads(test_threads)
            .thread_name(|idx| format!("ordtest-run-{idx}"))
            // Units complete their own status even when they panic; a
            // panic reaching the pool is a bug worth hearing about, not
            // worth aborting the process over.
            .panic_handler(|payload| {
                warn!(
                    message = %crate::outcome::panic_message(payload.as_ref()),
                    "panic escaped a work unit"
                );
            })
            .build()
            .expect("worker pool built");
        Self { pool }
    }

    /// Creates a pool sized from the configuration, defaulting to the
    /// logical CPU count.
    pub fn from_config(config: &RunnerConfig) -> Self {
        let threads = config
            .test_threads
            .unwrap_or_else(rayon::current_num_threads);
        Self::new(threads)
    }
}

impl Distributor for ThreadPoolDistributor {
    fn submit(&self, unit: WorkUnit) {
        self.pool.spawn(move || unit.run());
    }
}

impl std::fmt::Debug for ThreadPoolDistributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolDistributor")
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}
