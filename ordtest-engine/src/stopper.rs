// Copyright (c) The ordtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cooperative cancellation.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A zero-argument predicate polled between tests and between nested
/// suites.
///
/// Once it reports true, not-yet-started units are abandoned silently;
/// already-started units run to completion. There is no forced interruption
/// mid-test.
pub trait Stopper: Send + Sync {
    /// True if the run should stop starting new work.
    fn stop_requested(&self) -> bool;
}

/// A stopper that never fires.
#[derive(Copy, Clone, Debug, Default)]
pub struct NeverStop;

impl Stopper for NeverStop {
    fn stop_requested(&self) -> bool {
        false
    }
}

/// A shared flag, typically set from a signal handler or another thread.
#[derive(Clone, Debug, Default)]
pub struct StopFlag {
    flag: Arc<AtomicBool>,
}

impl StopFlag {
    /// Creates an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop. Irrevocable.
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::Release);
    }
}

impl Stopper for StopFlag {
    fn stop_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
