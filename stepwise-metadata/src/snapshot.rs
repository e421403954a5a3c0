// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{SnapshotDecodeError, StepStatus, TestId, TestRecord};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{fmt, io};

/// The format version of a [`ReportSnapshot`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ReportFormatVersion(pub u32);

impl ReportFormatVersion {
    /// The version written by this crate.
    pub const CURRENT: Self = Self(1);
}

impl fmt::Display for ReportFormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source-control and CI metadata for a run.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BuildMetadata {
    /// The user running the tests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// The CI job URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_url: Option<String>,

    /// The repository URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_base: Option<String>,

    /// The branch under test.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// The commit under test.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

/// The finished records of one result store, in insertion order.
///
/// Workers write one snapshot each; a coordinating process merges them into a single report.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReportSnapshot {
    /// The format version.
    pub format_version: ReportFormatVersion,

    /// The worker that produced this snapshot, if named.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<SmolStr>,

    /// Build metadata, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildMetadata>,

    /// Finished test records.
    #[serde(default)]
    pub tests: Vec<TestRecord>,
}

impl Default for ReportSnapshot {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ReportSnapshot {
    /// Creates a snapshot at the current format version.
    pub fn new(tests: Vec<TestRecord>) -> Self {
        Self {
            format_version: ReportFormatVersion::CURRENT,
            worker: None,
            build: None,
            tests,
        }
    }

    /// Decodes a snapshot from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, SnapshotDecodeError> {
        let snapshot: Self = serde_json::from_str(json)?;
        snapshot.check_version()
    }

    /// Decodes a snapshot from a reader.
    pub fn from_reader(reader: impl io::Read) -> Result<Self, SnapshotDecodeError> {
        let snapshot: Self = serde_json::from_reader(reader)?;
        snapshot.check_version()
    }

    /// Encodes this snapshot as pretty-printed JSON.
    pub fn to_writer_pretty(&self, writer: impl io::Write) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(writer, self)
    }

    /// Returns the record for the given test, if present.
    pub fn test(&self, test_id: &TestId) -> Option<&TestRecord> {
        self.tests.iter().find(|record| &record.test_id == test_id)
    }

    /// Counts tests by resolved status.
    pub fn summary(&self) -> SnapshotSummary {
        let mut summary = SnapshotSummary::default();
        for record in &self.tests {
            match record.status {
                StepStatus::Pass => summary.passed += 1,
                StepStatus::Fail => summary.failed += 1,
                StepStatus::Blocked => summary.blocked += 1,
                StepStatus::Skipped | StepStatus::NotExecuted => summary.skipped += 1,
            }
        }
        summary
    }

    fn check_version(self) -> Result<Self, SnapshotDecodeError> {
        if self.format_version == ReportFormatVersion::CURRENT {
            Ok(self)
        } else {
            Err(SnapshotDecodeError::UnsupportedVersion {
                found: self.format_version,
            })
        }
    }
}

/// Test counts by status for a [`ReportSnapshot`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SnapshotSummary {
    /// Tests that passed.
    pub passed: usize,

    /// Tests that failed.
    pub failed: usize,

    /// Tests that were blocked.
    pub blocked: usize,

    /// Tests that were skipped or never executed.
    pub skipped: usize,
}

impl SnapshotSummary {
    /// The total number of tests.
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.blocked + self.skipped
    }

    /// Returns true if any test failed or was blocked.
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.blocked > 0
    }
}
