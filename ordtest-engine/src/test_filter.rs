// Copyright (c) The ordtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tag-based selection of which tests run.
//!
//! A [`TestFilter`] is constructed once from run configuration (for example
//! command-line flags) and treated as immutable for the run's duration. The
//! engine consults it once per candidate test.

use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

/// The reserved tag that marks a test as ignored.
///
/// Ignored tests are reported with a `TestIgnored` event rather than being
/// silently dropped.
pub const IGNORE_TAG: &str = "ignored";

/// A filter for tests: an optional include-tag set, an exclude-tag set, and
/// a dynamic tag override table.
///
/// If the include set is present, a test runs only if it carries at least
/// one included tag and no excluded tag; if absent, a test runs unless it
/// carries an excluded tag.
#[derive(Clone, Debug, Default)]
pub struct TestFilter {
    include: Option<BTreeSet<String>>,
    exclude: BTreeSet<String>,
    dynamic: DynamicTags,
}

impl TestFilter {
    /// Creates a new filter from include and exclude tag sets.
    pub fn new(include: Option<BTreeSet<String>>, exclude: BTreeSet<String>) -> Self {
        Self {
            include,
            exclude,
            dynamic: DynamicTags::default(),
        }
    }

    /// Attaches a dynamic tag table to this filter.
    pub fn with_dynamic_tags(mut self, dynamic: DynamicTags) -> Self {
        self.dynamic = dynamic;
        self
    }

    /// Decides what to do with one test, given the tags it was declared
    /// with. Dynamic tags for `(suite_name, test_name)` are unioned in
    /// before the decision.
    pub fn verdict(
        &self,
        suite_name: &str,
        test_name: &str,
        declared_tags: &BTreeSet<String>,
    ) -> FilterVerdict {
        let dynamic = self.dynamic.tags_for(suite_name, test_name);
        let effective = || declared_tags.iter().chain(dynamic.iter().flat_map(|t| t.iter()));

        if let Some(include) = &self.include {
            if !effective().any(|tag| include.contains(tag)) {
                return FilterVerdict::Excluded {
                    reason: ExcludeReason::NotIncluded,
                };
            }
        }

        if let Some(tag) = effective().find(|tag| self.exclude.contains(*tag)) {
            return FilterVerdict::Ignored {
                reason: ExcludeReason::ExcludedTag { tag: tag.clone() },
            };
        }

        if effective().any(|tag| tag.as_str() == IGNORE_TAG) {
            return FilterVerdict::Ignored {
                reason: ExcludeReason::IgnoreTag,
            };
        }

        FilterVerdict::Runs
    }
}

/// Ad hoc re-tagging applied on top of declared tags, keyed by suite name
/// and then test name.
///
/// This is how "run only previously-failed tests" style workflows are
/// built: re-tag the interesting tests dynamically, then filter on that
/// tag, without touching the declarations.
#[derive(Clone, Debug, Default)]
pub struct DynamicTags {
    tests: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
}

impl DynamicTags {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `tag` to `test_name` within `suite_name`.
    pub fn tag_test(
        &mut self,
        suite_name: impl Into<String>,
        test_name: impl Into<String>,
        tag: impl Into<String>,
    ) {
        self.tests
            .entry(suite_name.into())
            .or_default()
            .entry(test_name.into())
            .or_default()
            .insert(tag.into());
    }

    fn tags_for(&self, suite_name: &str, test_name: &str) -> Option<&BTreeSet<String>> {
        self.tests.get(suite_name)?.get(test_name)
    }
}

/// The filter's decision for one test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FilterVerdict {
    /// The test runs.
    Runs,

    /// The test is skipped with a `TestIgnored` event.
    Ignored {
        /// Why the test was skipped.
        reason: ExcludeReason,
    },

    /// The test is skipped silently, with no event.
    Excluded {
        /// Why the test was skipped.
        reason: ExcludeReason,
    },
}

/// The reason a test was skipped.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExcludeReason {
    /// The test carries the reserved [`IGNORE_TAG`].
    IgnoreTag,

    /// The test carries a tag in the exclude set.
    ExcludedTag {
        /// The matching excluded tag.
        tag: String,
    },

    /// An include set is present and the test carries none of its tags.
    NotIncluded,
}

impl fmt::Display for ExcludeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExcludeReason::IgnoreTag => write!(f, "marked as ignored"),
            ExcludeReason::ExcludedTag { tag } => {
                write!(f, "carries excluded tag `{tag}`")
            }
            ExcludeReason::NotIncluded => {
                write!(f, "does not carry any included tag")
            }
        }
    }
}
