// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use std::{error::Error, io};
use stepwise_metadata::{SnapshotSummary, StepwiseExitCode};
use stepwise_runner::errors::{ConfigParseError, SnapshotReadError, SnapshotWriteError};
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

/// An error with a documented exit code.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    /// The workspace root is not a directory.
    #[error("workspace root is invalid")]
    WorkspaceRootInvalid { workspace_root: Utf8PathBuf },

    /// The config file could not be parsed.
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },

    /// A snapshot could not be read.
    #[error("snapshot read error")]
    SnapshotReadError {
        #[from]
        err: SnapshotReadError,
    },

    /// A snapshot could not be written.
    #[error("snapshot write error")]
    SnapshotWriteError {
        #[from]
        err: SnapshotWriteError,
    },

    /// The snapshot contains failed or blocked tests.
    #[error("test run failed")]
    TestRunFailed { summary: SnapshotSummary },

    /// Writing to stdout failed.
    #[error("error writing to output")]
    WriteOutputError {
        #[source]
        err: io::Error,
    },
}

impl ExpectedError {
    pub(crate) fn write_output_error(err: io::Error) -> Self {
        Self::WriteOutputError { err }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::WorkspaceRootInvalid { .. } => StepwiseExitCode::SETUP_ERROR,
            Self::ConfigParseError { .. } => StepwiseExitCode::CONFIG_PARSE_FAILED,
            Self::SnapshotReadError { .. } => StepwiseExitCode::SNAPSHOT_READ_FAILED,
            Self::SnapshotWriteError { .. } => StepwiseExitCode::SNAPSHOT_WRITE_FAILED,
            Self::TestRunFailed { .. } => StepwiseExitCode::TEST_RUN_FAILED,
            Self::WriteOutputError { .. } => StepwiseExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::WorkspaceRootInvalid { workspace_root } => {
                error!(
                    "workspace root `{}` is not a directory",
                    workspace_root.style(styles.bold)
                );
                None
            }
            Self::ConfigParseError { err } => {
                error!("{err}");
                err.source()
            }
            Self::SnapshotReadError { err } => {
                error!("{err}");
                err.source()
            }
            Self::SnapshotWriteError { err } => {
                error!("{err}");
                err.source()
            }
            Self::TestRunFailed { summary } => {
                error!(
                    "{} of {} tests failed or were blocked",
                    (summary.failed + summary.blocked).style(styles.bold),
                    summary.total(),
                );
                None
            }
            Self::WriteOutputError { err } => {
                error!("failed to write output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
