// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{ReportFormatVersion, StepStatus};
use thiserror::Error;

/// Error returned while parsing a [`StepStatus`] from a string.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized step status: {input}\n(known values: {})",
    StepStatus::variants().join(", "),
)]
pub struct StatusParseError {
    input: String,
}

impl StatusParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }

    /// Returns the input that failed to parse.
    pub fn input(&self) -> &str {
        &self.input
    }
}

/// An error that occurs while decoding a [`ReportSnapshot`](crate::ReportSnapshot).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SnapshotDecodeError {
    /// The snapshot is not valid JSON, or does not match the expected shape.
    #[error("snapshot is not valid JSON")]
    Json(#[from] serde_json::Error),

    /// The snapshot was written by an incompatible version.
    #[error(
        "snapshot format version {found} is not supported (this version reads {})",
        ReportFormatVersion::CURRENT
    )]
    UnsupportedVersion {
        /// The version found in the snapshot.
        found: ReportFormatVersion,
    },
}
