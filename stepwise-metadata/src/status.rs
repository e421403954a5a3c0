// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::StatusParseError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The outcome of a step or a test.
///
/// Statuses form a total order by severity, declared from lowest to highest:
///
/// `NotExecuted < Skipped < Pass < Fail < Blocked`
///
/// Combining two statuses always keeps the more severe one, so the status of a parent scope is the
/// maximum of everything contributed to it.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    /// Nothing has been contributed yet.
    #[default]
    NotExecuted,

    /// The step was skipped.
    Skipped,

    /// The step passed.
    Pass,

    /// At least one check failed, or the step hit an error.
    Fail,

    /// Execution was intentionally aborted.
    ///
    /// This dominates every other status, including failures.
    Blocked,
}

impl StepStatus {
    /// All statuses, in increasing order of severity.
    pub const ALL: [Self; 5] = [
        Self::NotExecuted,
        Self::Skipped,
        Self::Pass,
        Self::Fail,
        Self::Blocked,
    ];

    /// The status of a scope before anything has been contributed to it.
    #[inline]
    pub const fn initial() -> Self {
        Self::NotExecuted
    }

    /// Returns the more severe of `self` and `other`.
    ///
    /// This is commutative, associative and idempotent, so folding over children in any order
    /// yields the same result.
    #[inline]
    pub fn combine(self, other: Self) -> Self {
        self.max(other)
    }

    /// Folds an iterator of statuses with [`combine`](Self::combine), starting from
    /// [`initial`](Self::initial).
    pub fn fold(statuses: impl IntoIterator<Item = Self>) -> Self {
        statuses
            .into_iter()
            .fold(Self::initial(), Self::combine)
    }

    /// Resolves a folded status into a final one.
    ///
    /// A scope nothing was contributed to has passed.
    #[inline]
    pub fn resolve(self) -> Self {
        match self {
            Self::NotExecuted => Self::Pass,
            other => other,
        }
    }

    /// Returns true if this status is a failure kind (`Fail` or `Blocked`).
    #[inline]
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Fail | Self::Blocked)
    }

    /// Returns the kebab-case name of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotExecuted => "not-executed",
            Self::Skipped => "skipped",
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Blocked => "blocked",
        }
    }

    /// Returns the names of all statuses.
    pub fn variants() -> [&'static str; 5] {
        Self::ALL.map(Self::as_str)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StatusParseError::new(s))
    }
}

#[cfg(feature = "proptest1")]
mod proptest_impls {
    use super::StepStatus;
    use proptest::prelude::*;

    impl Arbitrary for StepStatus {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_: ()) -> Self::Strategy {
            proptest::sample::select(StepStatus::ALL.to_vec()).boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;
    use test_strategy::proptest;

    fn arb_status() -> impl Strategy<Value = StepStatus> {
        proptest::sample::select(StepStatus::ALL.to_vec())
    }

    #[test_case(StepStatus::Pass, StepStatus::Fail, StepStatus::Fail; "fail beats pass")]
    #[test_case(StepStatus::Fail, StepStatus::Blocked, StepStatus::Blocked; "blocked beats fail")]
    #[test_case(StepStatus::Blocked, StepStatus::Pass, StepStatus::Blocked; "blocked beats pass")]
    #[test_case(StepStatus::Skipped, StepStatus::Pass, StepStatus::Pass; "pass beats skipped")]
    #[test_case(StepStatus::NotExecuted, StepStatus::Skipped, StepStatus::Skipped; "anything beats initial")]
    fn combine_table(a: StepStatus, b: StepStatus, expected: StepStatus) {
        assert_eq!(a.combine(b), expected);
        assert_eq!(b.combine(a), expected);
    }

    #[test]
    fn resolve_empty_is_pass() {
        assert_eq!(StepStatus::fold([]), StepStatus::NotExecuted);
        assert_eq!(StepStatus::fold([]).resolve(), StepStatus::Pass);
        assert_eq!(StepStatus::Skipped.resolve(), StepStatus::Skipped);
        assert_eq!(StepStatus::Blocked.resolve(), StepStatus::Blocked);
    }

    #[test]
    fn parse_and_display() {
        for status in StepStatus::ALL {
            assert_eq!(status.to_string().parse::<StepStatus>().unwrap(), status);
        }
        let err = "passed".parse::<StepStatus>().unwrap_err();
        assert!(
            err.to_string().contains("not-executed, skipped, pass, fail, blocked"),
            "error lists known values: {err}"
        );
    }

    #[test]
    fn serde_names_are_kebab_case() {
        let json = serde_json::to_string(&StepStatus::NotExecuted).unwrap();
        assert_eq!(json, "\"not-executed\"");
        let status: StepStatus = serde_json::from_str("\"blocked\"").unwrap();
        assert_eq!(status, StepStatus::Blocked);
    }

    #[proptest(cases = 256)]
    fn combine_is_commutative(
        #[strategy(arb_status())] a: StepStatus,
        #[strategy(arb_status())] b: StepStatus,
    ) {
        prop_assert_eq!(a.combine(b), b.combine(a));
    }

    #[proptest(cases = 256)]
    fn combine_is_associative(
        #[strategy(arb_status())] a: StepStatus,
        #[strategy(arb_status())] b: StepStatus,
        #[strategy(arb_status())] c: StepStatus,
    ) {
        prop_assert_eq!(a.combine(b).combine(c), a.combine(b.combine(c)));
    }

    #[proptest(cases = 256)]
    fn fold_is_order_independent(
        #[strategy(proptest::collection::vec(arb_status(), 0..16))] statuses: Vec<StepStatus>,
        seed: u64,
    ) {
        let forward = StepStatus::fold(statuses.iter().copied());

        // Rotate by a seed-derived amount and reverse to get a different order.
        let mut permuted = statuses.clone();
        if !permuted.is_empty() {
            let mid = (seed as usize) % permuted.len();
            permuted.rotate_left(mid);
        }
        permuted.reverse();

        prop_assert_eq!(forward, StepStatus::fold(permuted));
        prop_assert!(statuses.iter().all(|s| *s <= forward));
    }
}
