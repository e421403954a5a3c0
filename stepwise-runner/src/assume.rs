// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Soft assertions.
//!
//! A soft assertion ("assumption") records a failure without aborting the test. Failures are kept
//! per scope and drained exactly once, when that scope exits.
//!
//! Each running test owns its own [`AssumptionRegistry`] through its
//! [`TestContext`](crate::context::TestContext), so tests running concurrently in the same
//! process never see each other's failures.

use std::{collections::BTreeMap, fmt, panic::Location};

/// Identifies an open scope within one test.
///
/// Scope IDs are assigned in entry order and never reused within a test. The test body itself is
/// [`ScopeId::ROOT`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ScopeId(u32);

impl ScopeId {
    /// The scope of the test body, outside any step.
    pub const ROOT: Self = Self(0);

    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A soft-assertion failure captured without aborting the test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssumptionFailure {
    /// The scope that was innermost when the check failed.
    pub scope_id: ScopeId,

    /// The message passed to the check.
    pub message: String,

    /// Where the check was made.
    pub location: &'static Location<'static>,
}

impl fmt::Display for AssumptionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Collects soft-assertion failures for one test, segmented by scope.
#[derive(Debug, Default)]
pub struct AssumptionRegistry {
    failures: BTreeMap<ScopeId, Vec<AssumptionFailure>>,
}

impl AssumptionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the result of a soft assertion made in `scope_id`.
    ///
    /// If `condition` is false, a failure is recorded. This never panics and never aborts; it
    /// returns `condition` so that callers can branch on it.
    pub fn record(
        &mut self,
        scope_id: ScopeId,
        condition: bool,
        message: impl Into<String>,
        location: &'static Location<'static>,
    ) -> bool {
        if !condition {
            self.failures
                .entry(scope_id)
                .or_default()
                .push(AssumptionFailure {
                    scope_id,
                    message: message.into(),
                    location,
                });
        }
        condition
    }

    /// Returns and removes all failures recorded for `scope_id`, in the order they were made.
    pub fn drain(&mut self, scope_id: ScopeId) -> Vec<AssumptionFailure> {
        self.failures.remove(&scope_id).unwrap_or_default()
    }

    /// Returns the number of failures currently held for `scope_id`.
    pub fn pending(&self, scope_id: ScopeId) -> usize {
        self.failures.get(&scope_id).map_or(0, Vec::len)
    }

    /// Returns true if no failures are held for any scope.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Drops all held failures.
    pub fn clear(&mut self) {
        self.failures.clear();
    }
}
