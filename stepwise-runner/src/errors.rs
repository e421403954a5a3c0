// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by stepwise.

use camino::Utf8PathBuf;
use std::{error, fmt, io};
use stepwise_metadata::{SnapshotDecodeError, StepId, TestId};
use thiserror::Error;

/// A usage error in how step scopes were entered or exited.
///
/// These are programming errors in the test code, not test outcomes: they are reported
/// immediately and never turned into a passing status.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScopeError {
    /// A step was entered from a scope that is no longer the innermost open scope.
    #[error("in test `{test_id}`, cannot enter a step from `{parent}`: it is not the innermost open scope")]
    ParentNotOpen {
        /// The test.
        test_id: TestId,

        /// The scope the step was entered from.
        parent: String,
    },

    /// A step was exited while a nested step was still open.
    #[error("in test `{test_id}`, step `{step_id}` exited while a nested step was still open")]
    NotInnermost {
        /// The test.
        test_id: TestId,

        /// The step that was exited.
        step_id: StepId,
    },

    /// The same step ID was used twice within one test attempt.
    #[error("in test `{test_id}`, step ID `{step_id}` was used more than once")]
    DuplicateStepId {
        /// The test.
        test_id: TestId,

        /// The duplicated step ID.
        step_id: StepId,
    },

    /// The test ended while steps were still open.
    #[error(
        "test `{test_id}` ended with steps still open: {}",
        .open.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
    )]
    StepsStillOpen {
        /// The test.
        test_id: TestId,

        /// The steps that are still open, outermost first.
        open: Vec<StepId>,
    },

    /// Recording a finished step in the result store failed.
    #[error("failed to record step in the result store")]
    Store(#[from] StoreError),
}

/// An error that occurs while updating a [`ResultStore`](crate::store::ResultStore).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    /// The test was never started.
    #[error("test `{test_id}` is not known to the result store")]
    UnknownTest {
        /// The test.
        test_id: TestId,
    },

    /// The test was started twice without finishing in between.
    #[error("test `{test_id}` is already running")]
    TestAlreadyRunning {
        /// The test.
        test_id: TestId,
    },

    /// A step was appended to, or a finalize was requested for, a test that was already finalized.
    #[error("test `{test_id}` is already finalized")]
    TestAlreadyFinalized {
        /// The test.
        test_id: TestId,
    },

    /// The same step ID was recorded twice within one test attempt.
    #[error("test `{test_id}` already has a record for step `{step_id}`")]
    DuplicateStepId {
        /// The test.
        test_id: TestId,

        /// The duplicated step ID.
        step_id: StepId,
    },

    /// A store was merged while one of its tests was still running.
    #[error("cannot merge: test `{test_id}` is still running")]
    MergeRunningTest {
        /// The test.
        test_id: TestId,
    },

    /// The lock around a shared store was poisoned by a panic.
    #[error("result store lock was poisoned")]
    Poisoned,
}

/// An error that occurs while reading a snapshot from disk.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SnapshotReadError {
    /// The file could not be opened.
    #[error("failed to open snapshot `{path}`")]
    Open {
        /// The path to the snapshot.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The file could not be decoded.
    #[error("failed to decode snapshot `{path}`")]
    Decode {
        /// The path to the snapshot.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: SnapshotDecodeError,
    },
}

/// An error that occurs while writing a snapshot to disk.
#[derive(Debug, Error)]
#[error("failed to write snapshot to `{path}`")]
pub struct SnapshotWriteError {
    path: Utf8PathBuf,
    #[source]
    error: atomicwrites::Error<io::Error>,
}

impl SnapshotWriteError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, error: atomicwrites::Error<io::Error>) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }

    /// Returns the path that could not be written.
    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }
}

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse stepwise config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file that failed to parse.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error that occurred.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of [`ConfigParseError`] that occurred.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// The file exists but could not be read.
    #[error("error reading config file")]
    Read(#[source] io::Error),

    /// The file is not valid TOML, or does not match the expected schema.
    #[error("error deserializing config")]
    Deserialize(#[source] toml::de::Error),
}

/// An error reported by a [`ReportBackend`](crate::backend::ReportBackend).
///
/// Delivery errors are logged and counted, but never retried and never change a test's status.
#[derive(Debug)]
pub struct BackendError {
    operation: &'static str,
    test_id: TestId,
    message: String,
    source: Option<Box<dyn error::Error + Send + Sync>>,
}

impl BackendError {
    /// Creates a new backend error for an operation on a test.
    pub fn new(operation: &'static str, test_id: TestId, message: impl Into<String>) -> Self {
        Self {
            operation,
            test_id,
            message: message.into(),
            source: None,
        }
    }

    /// Attaches an underlying error.
    pub fn with_source(mut self, source: impl Into<Box<dyn error::Error + Send + Sync>>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// The backend operation that failed.
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// The test the operation was for.
    pub fn test_id(&self) -> &TestId {
        &self.test_id
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "backend operation `{}` failed for test `{}`: {}",
            self.operation, self.test_id, self.message
        )
    }
}

impl error::Error for BackendError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn error::Error + 'static))
    }
}

/// An error that occurs while starting or ending a test.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LifecycleError {
    /// The result store rejected the operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Step scopes were misused while the test ran.
    ///
    /// The test is still finalized (as failed) before this is returned, so its record is not lost.
    #[error("test `{test_id}` misused step scopes ({count} usage errors)", count = .errors.len())]
    ScopeMisuse {
        /// The test.
        test_id: TestId,

        /// The usage errors, in the order they happened.
        errors: Vec<ScopeError>,
    },
}
