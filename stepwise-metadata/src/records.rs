// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::StepStatus;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{fmt, time::Duration};

/// The identity of a test, typically its fully qualified name.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct TestId(SmolStr);

impl TestId {
    /// Creates a new test ID.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id))
    }

    /// Returns the ID as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TestId {
    fn from(id: String) -> Self {
        Self(id.into())
    }
}

/// The identity of a step within a test.
///
/// Steps are either numbered, or labeled by the caller. Serialized as a bare number or string.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(untagged)]
pub enum StepId {
    /// A numbered step.
    Ordinal(u32),

    /// A step with a caller-supplied label.
    Label(SmolStr),
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ordinal(n) => write!(f, "{n}"),
            Self::Label(label) => f.write_str(label),
        }
    }
}

/// A free-form piece of text attached to a step.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Attachment {
    /// The attachment's name.
    pub name: SmolStr,

    /// The attachment's content.
    pub content: String,
}

impl Attachment {
    /// Creates a new attachment.
    pub fn new(name: impl AsRef<str>, content: impl Into<String>) -> Self {
        Self {
            name: SmolStr::new(name),
            content: content.into(),
        }
    }
}

/// The finished record of one step.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StepRecord {
    /// The test this step belongs to.
    pub test_id: TestId,

    /// The step's ID, unique within one attempt of its test.
    pub step_id: StepId,

    /// The enclosing step, if this step was nested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<StepId>,

    /// The nesting depth. Top-level steps have depth 0.
    #[serde(default)]
    pub depth: usize,

    /// The resolved status of the step.
    pub status: StepStatus,

    /// When the step was entered.
    pub started_at: DateTime<FixedOffset>,

    /// How long the step was open.
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,

    /// Attachments added while the step was open.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,

    /// Human-readable detail: failed checks, the block reason, the error that ended the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// The finished record of one test.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestRecord {
    /// The test's ID.
    pub test_id: TestId,

    /// The attempt this record describes, starting at 1. Retries increase this number.
    pub attempt: u32,

    /// The resolved status of the test.
    pub status: StepStatus,

    /// The reason for a non-passing status, if one is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// When the test started.
    pub start_time: DateTime<FixedOffset>,

    /// When the test finished.
    pub end_time: DateTime<FixedOffset>,

    /// Finished steps, in the order they exited.
    #[serde(default)]
    pub steps: Vec<StepRecord>,
}

impl TestRecord {
    /// Returns the time between start and end.
    ///
    /// Returns zero if the clock went backwards.
    pub fn duration(&self) -> Duration {
        (self.end_time - self.start_time)
            .to_std()
            .unwrap_or_default()
    }

    /// Returns the step with the given ID, if any.
    pub fn step(&self, step_id: &StepId) -> Option<&StepRecord> {
        self.steps.iter().find(|step| &step.step_id == step_id)
    }

    /// Returns true if this record should replace `other` for the same test.
    ///
    /// The later run wins. On identical end times the higher attempt wins; otherwise `other` is
    /// kept.
    pub fn supersedes(&self, other: &TestRecord) -> bool {
        (self.end_time, self.attempt) > (other.end_time, other.attempt)
    }
}
