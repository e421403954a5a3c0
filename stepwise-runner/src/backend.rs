// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Report backends.
//!
//! A [`ReportBackend`] receives finished test records and forwards them to an external test
//! management system. Backends are only ever handed finalized records, so what they report always
//! matches the local result store.

use crate::errors::BackendError;
use smol_str::SmolStr;
use std::{
    collections::HashMap,
    fmt,
    sync::{Mutex, MutexGuard},
};
use stepwise_metadata::{Attachment, StepId, StepRecord, StepStatus, TestId};

/// The name of the [`ReportBackend::create_result`] operation.
pub const CREATE_RESULT: &str = "create-result";

/// The name of the [`ReportBackend::update_step`] operation.
pub const UPDATE_STEP: &str = "update-step";

/// The name of the [`ReportBackend::update_result`] operation.
pub const UPDATE_RESULT: &str = "update-result";

/// The backend's identifier for a test result.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ResultId(SmolStr);

impl ResultId {
    /// Creates a new result ID.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().into())
    }

    /// Returns the ID as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An external system that test results are reported to.
///
/// For each finished test, the lifecycle calls [`create_result`](Self::create_result), then
/// [`update_step`](Self::update_step) once per step in stored order, then
/// [`update_result`](Self::update_result) with the final status.
pub trait ReportBackend: Send + Sync {
    /// Creates a result for a test, returning the backend's ID for it.
    fn create_result(
        &self,
        test_id: &TestId,
        status: StepStatus,
        attachments: &[Attachment],
    ) -> Result<ResultId, BackendError>;

    /// Reports one finished step.
    fn update_step(&self, result_id: &ResultId, step: &StepRecord) -> Result<(), BackendError>;

    /// Sets the final status of a result.
    fn update_result(
        &self,
        result_id: &ResultId,
        status: StepStatus,
        comment: Option<&str>,
    ) -> Result<(), BackendError>;
}

/// A call made to a [`MemoryBackend`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BackendCall {
    /// [`ReportBackend::create_result`] was called.
    CreateResult {
        /// The test.
        test_id: TestId,

        /// The initial status.
        status: StepStatus,

        /// The attachments.
        attachments: Vec<Attachment>,
    },

    /// [`ReportBackend::update_step`] was called.
    UpdateStep {
        /// The result.
        result_id: ResultId,

        /// The step.
        step_id: StepId,

        /// The step's status.
        status: StepStatus,
    },

    /// [`ReportBackend::update_result`] was called.
    UpdateResult {
        /// The result.
        result_id: ResultId,

        /// The final status.
        status: StepStatus,

        /// The comment.
        comment: Option<String>,
    },
}

/// A backend that records calls in memory.
///
/// Used for dry runs and tests. It can be told to fail one kind of operation.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    fail_operation: Option<&'static str>,
}

#[derive(Debug, Default)]
struct MemoryState {
    calls: Vec<BackendCall>,
    results: HashMap<ResultId, TestId>,
}

impl MemoryBackend {
    /// Creates a new, empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend on which every call to `operation` fails.
    ///
    /// `operation` is one of [`CREATE_RESULT`], [`UPDATE_STEP`] or [`UPDATE_RESULT`].
    pub fn failing_on(operation: &'static str) -> Self {
        Self {
            state: Mutex::default(),
            fail_operation: Some(operation),
        }
    }

    /// Returns the calls made so far, including failed ones.
    pub fn calls(&self) -> Vec<BackendCall> {
        match self.state.lock() {
            Ok(state) => state.calls.clone(),
            Err(poisoned) => poisoned.into_inner().calls.clone(),
        }
    }

    fn lock(
        &self,
        operation: &'static str,
        test_id: &TestId,
    ) -> Result<MutexGuard<'_, MemoryState>, BackendError> {
        self.state.lock().map_err(|_| {
            BackendError::new(operation, test_id.clone(), "backend state was poisoned")
        })
    }

    fn check(&self, operation: &'static str, test_id: &TestId) -> Result<(), BackendError> {
        if self.fail_operation == Some(operation) {
            Err(BackendError::new(
                operation,
                test_id.clone(),
                "configured to fail",
            ))
        } else {
            Ok(())
        }
    }
}

impl ReportBackend for MemoryBackend {
    fn create_result(
        &self,
        test_id: &TestId,
        status: StepStatus,
        attachments: &[Attachment],
    ) -> Result<ResultId, BackendError> {
        let mut state = self.lock(CREATE_RESULT, test_id)?;
        state.calls.push(BackendCall::CreateResult {
            test_id: test_id.clone(),
            status,
            attachments: attachments.to_vec(),
        });
        self.check(CREATE_RESULT, test_id)?;

        let result_id = ResultId::new(format!("mem-{}", state.results.len() + 1));
        state.results.insert(result_id.clone(), test_id.clone());
        Ok(result_id)
    }

    fn update_step(&self, result_id: &ResultId, step: &StepRecord) -> Result<(), BackendError> {
        let mut state = self.lock(UPDATE_STEP, &step.test_id)?;
        state.calls.push(BackendCall::UpdateStep {
            result_id: result_id.clone(),
            step_id: step.step_id.clone(),
            status: step.status,
        });
        if !state.results.contains_key(result_id) {
            return Err(BackendError::new(
                UPDATE_STEP,
                step.test_id.clone(),
                format!("unknown result `{result_id}`"),
            ));
        }
        self.check(UPDATE_STEP, &step.test_id)
    }

    fn update_result(
        &self,
        result_id: &ResultId,
        status: StepStatus,
        comment: Option<&str>,
    ) -> Result<(), BackendError> {
        let unknown = TestId::new(result_id.as_str());
        let mut state = self.lock(UPDATE_RESULT, &unknown)?;
        state.calls.push(BackendCall::UpdateResult {
            result_id: result_id.clone(),
            status,
            comment: comment.map(str::to_owned),
        });
        let Some(test_id) = state.results.get(result_id).cloned() else {
            return Err(BackendError::new(
                UPDATE_RESULT,
                unknown,
                format!("unknown result `{result_id}`"),
            ));
        };
        self.check(UPDATE_RESULT, &test_id)
    }
}
