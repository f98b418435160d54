// Copyright (c) The ordtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run-level configuration.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc, time::Duration};

/// Tunables for the engine.
///
/// How this struct is populated (config file, command line) is up to the
/// caller; the engine only reads it.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RunnerConfig {
    /// How long the sorting reporter holds back events for a test whose
    /// earlier-declared siblings haven't finished, before force-flushing
    /// out of order.
    #[serde(with = "humantime_serde")]
    pub sort_timeout: Duration,

    /// The flush granularity of the sorting reporter.
    pub flush_mode: FlushMode,

    /// Number of worker threads for the bundled thread-pool distributor
    /// [default: logical CPU count].
    pub test_threads: Option<usize>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            sort_timeout: Duration::from_secs(15),
            flush_mode: FlushMode::default(),
            test_threads: None,
        }
    }
}

/// When the sorting reporter releases a buffered test's events.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlushMode {
    /// A test's events are released as one batch, once its terminal event
    /// has arrived and all earlier-declared tests have been released.
    #[default]
    Batched,

    /// The head test's events are forwarded as they arrive, before its
    /// terminal event.
    Streaming,
}

/// An opaque key/value bag forwarded unchanged to fixtures and tests.
///
/// Cloning is cheap; the map is shared and immutable once built.
#[derive(Clone, Debug, Default)]
pub struct ConfigMap {
    entries: Arc<BTreeMap<String, serde_json::Value>>,
}

impl ConfigMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    pub fn with_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        Arc::make_mut(&mut self.entries).insert(key.into(), value);
        self
    }

    /// Looks up a value by key.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
