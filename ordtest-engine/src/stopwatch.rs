// Copyright (c) The ordtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stopwatch for timing tests and runs.
//!
//! Durations are measured on the monotonic clock; the wall-clock start time
//! is kept alongside for reporting. The two reads happen imperceptibly close
//! to each other, which is good enough for our purposes.

use std::time::{Duration, Instant, SystemTime};

#[derive(Clone, Debug)]
pub(crate) struct StopwatchStart {
    start_time: SystemTime,
    instant: Instant,
}

impl StopwatchStart {
    pub(crate) fn now() -> Self {
        Self {
            start_time: SystemTime::now(),
            instant: Instant::now(),
        }
    }

    #[inline]
    pub(crate) fn elapsed(&self) -> Duration {
        self.instant.elapsed()
    }

    pub(crate) fn end(&self) -> StopwatchEnd {
        StopwatchEnd {
            start_time: self.start_time,
            duration: self.instant.elapsed(),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct StopwatchEnd {
    #[allow(dead_code)]
    pub(crate) start_time: SystemTime,
    pub(crate) duration: Duration,
}
