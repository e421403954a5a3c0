// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test lifecycle hooks.
//!
//! A [`TestLifecycle`] is created once per worker. Test harnesses call
//! [`start_test`](TestLifecycle::start_test) and [`end_test`](TestLifecycle::end_test) around
//! each test body, or use [`run_test`](TestLifecycle::run_test) to do both.

use crate::{
    backend::{ReportBackend, ResultId},
    config::ReportSettings,
    context::TestContext,
    errors::{BackendError, LifecycleError, ScopeError},
    scope::{ScopeExit, StepAbort},
    store::{ResultStore, SharedResultStore},
    time::stopwatch,
};
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use stepwise_metadata::{Attachment, StepStatus, TestId, TestRecord};
use tracing::{debug, info, warn};

/// How a test body concluded.
#[derive(Debug)]
pub enum BodyOutcome {
    /// The body returned normally.
    Completed,

    /// The body returned an error.
    Failed(String),

    /// The body was blocked.
    Blocked(String),

    /// The body panicked with this message.
    Panicked(String),

    /// The body stopped because step scopes were misused.
    ///
    /// This is an error in the test code rather than a test outcome: ending the test returns
    /// [`LifecycleError::ScopeMisuse`] and nothing is reported.
    Misuse(ScopeError),
}

impl BodyOutcome {
    fn into_exit(self) -> (ScopeExit, Option<ScopeError>) {
        match self {
            Self::Completed => (ScopeExit::Completed, None),
            Self::Failed(message) => (ScopeExit::Failed(message), None),
            Self::Blocked(reason) => (ScopeExit::Blocked(reason), None),
            Self::Panicked(message) => (ScopeExit::Failed(format!("panicked: {message}")), None),
            Self::Misuse(error) => (ScopeExit::Completed, Some(error)),
        }
    }
}

impl From<Result<(), StepAbort>> for BodyOutcome {
    fn from(result: Result<(), StepAbort>) -> Self {
        match result {
            Ok(()) => Self::Completed,
            Err(StepAbort::Blocked(blocked)) => Self::Blocked(blocked.reason().to_owned()),
            Err(StepAbort::Usage(error)) => Self::Misuse(error),
            Err(abort @ StepAbort::Failed(_)) => Self::Failed(abort.to_string()),
        }
    }
}

/// The verdict reported to the test harness for a finished test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TestVerdict {
    /// The test passed.
    Passed,

    /// The test failed.
    Failed {
        /// Why the test failed.
        message: String,
    },

    /// The test was blocked or skipped. A blocked test is never reported as passing.
    Skipped {
        /// Why the test was skipped.
        reason: String,
    },
}

impl TestVerdict {
    /// Derives the verdict from a finished record.
    pub fn from_record(record: &TestRecord) -> Self {
        let reason = || {
            record
                .reason
                .clone()
                .unwrap_or_else(|| format!("test status is {}", record.status))
        };
        match record.status {
            StepStatus::NotExecuted | StepStatus::Pass => Self::Passed,
            StepStatus::Fail => Self::Failed { message: reason() },
            StepStatus::Blocked | StepStatus::Skipped => Self::Skipped { reason: reason() },
        }
    }
}

/// What happened when a finished test was handed to the backend.
#[derive(Debug)]
pub enum Delivery {
    /// Reporting is disabled; the backend was not called.
    Disabled,

    /// Every backend call succeeded.
    Delivered(ResultId),

    /// Some backend calls failed. The local record is unaffected.
    Incomplete {
        /// The backend's ID for the result, if it was created.
        result_id: Option<ResultId>,

        /// The errors, in call order.
        errors: Vec<BackendError>,
    },
}

/// A test that has been finalized.
#[derive(Debug)]
pub struct FinishedTest {
    /// The immutable record stored for the test.
    pub record: TestRecord,

    /// The verdict for the test harness.
    pub verdict: TestVerdict,

    /// What happened when reporting the test.
    pub delivery: Delivery,
}

/// Connects a test harness to step scopes, the result store and the report backend.
pub struct TestLifecycle {
    settings: ReportSettings,
    store: SharedResultStore,
    backend: Arc<dyn ReportBackend>,
}

impl TestLifecycle {
    /// Creates a lifecycle with a fresh result store.
    pub fn new(settings: ReportSettings, backend: Arc<dyn ReportBackend>) -> Self {
        let mut store = ResultStore::new().with_build(settings.build().clone());
        if let Some(worker) = settings.worker() {
            store = store.with_worker(worker.clone());
        }
        Self::with_store(settings, SharedResultStore::new(store), backend)
    }

    /// Creates a lifecycle that records into an existing store.
    pub fn with_store(
        settings: ReportSettings,
        store: SharedResultStore,
        backend: Arc<dyn ReportBackend>,
    ) -> Self {
        Self {
            settings,
            store,
            backend,
        }
    }

    /// Returns the settings.
    pub fn settings(&self) -> &ReportSettings {
        &self.settings
    }

    /// Returns the shared result store.
    pub fn store(&self) -> &SharedResultStore {
        &self.store
    }

    /// Starts a test, returning the context to run its body with.
    pub fn start_test(&self, test_id: impl Into<TestId>) -> Result<TestContext, LifecycleError> {
        let test_id = test_id.into();
        let start = stopwatch();
        let attempt = self.store.lock()?.begin_test(&test_id, start.start_time())?;
        debug!(%test_id, attempt, "starting test");
        Ok(TestContext::new(
            test_id,
            attempt,
            self.store.clone(),
            self.settings.default_step_timeout(),
            start,
        ))
    }

    /// Ends a test: finalizes its record and reports it if reporting is enabled.
    ///
    /// If step scopes were misused, the test is finalized as failed, nothing is reported, and
    /// [`LifecycleError::ScopeMisuse`] is returned.
    pub fn end_test(
        &self,
        ctx: TestContext,
        outcome: BodyOutcome,
    ) -> Result<FinishedTest, LifecycleError> {
        let (exit, misuse) = outcome.into_exit();
        let concluded = ctx.conclude(exit, misuse);
        let test_id = concluded.test_id;
        let record = self
            .store
            .lock()?
            .finalize(&test_id, concluded.conclusion)?;
        debug!(%test_id, status = %record.status, "finalized test");

        if !concluded.usage_errors.is_empty() {
            for error in &concluded.usage_errors {
                warn!("{error}");
            }
            return Err(LifecycleError::ScopeMisuse {
                test_id,
                errors: concluded.usage_errors,
            });
        }

        let delivery = self.deliver(&record, &concluded.attachments);
        let verdict = TestVerdict::from_record(&record);
        Ok(FinishedTest {
            record,
            verdict,
            delivery,
        })
    }

    /// Runs a test body between [`start_test`](Self::start_test) and
    /// [`end_test`](Self::end_test).
    ///
    /// If the body panics, the test is finalized as failed and the panic is then resumed.
    pub fn run_test<F>(
        &self,
        test_id: impl Into<TestId>,
        body: F,
    ) -> Result<FinishedTest, LifecycleError>
    where
        F: FnOnce(&mut TestContext) -> Result<(), StepAbort>,
    {
        let mut ctx = self.start_test(test_id)?;
        match panic::catch_unwind(AssertUnwindSafe(|| body(&mut ctx))) {
            Ok(result) => self.end_test(ctx, result.into()),
            Err(payload) => {
                let test_id = ctx.test_id().clone();
                let message = panic_message(payload.as_ref());
                if let Err(error) = self.end_test(ctx, BodyOutcome::Panicked(message)) {
                    warn!("failed to end test `{test_id}` after a panic: {error}");
                }
                panic::resume_unwind(payload)
            }
        }
    }

    fn deliver(&self, record: &TestRecord, attachments: &[Attachment]) -> Delivery {
        if !self.settings.reporting_enabled() {
            return Delivery::Disabled;
        }

        let test_id = &record.test_id;
        let created = self
            .backend
            .create_result(test_id, StepStatus::initial(), attachments);
        let result_id = match created {
            Ok(result_id) => result_id,
            Err(error) => {
                warn!("{error}");
                return Delivery::Incomplete {
                    result_id: None,
                    errors: vec![error],
                };
            }
        };

        let mut errors = Vec::new();
        for step in &record.steps {
            if let Err(error) = self.backend.update_step(&result_id, step) {
                warn!("{error}");
                errors.push(error);
            }
        }
        let updated = self
            .backend
            .update_result(&result_id, record.status, record.reason.as_deref());
        if let Err(error) = updated {
            warn!("{error}");
            errors.push(error);
        }

        if errors.is_empty() {
            info!(%test_id, %result_id, status = %record.status, "reported test result");
            Delivery::Delivered(result_id)
        } else {
            warn!(
                "test `{test_id}` was only partially reported ({} backend errors)",
                errors.len()
            );
            Delivery::Incomplete {
                result_id: Some(result_id),
                errors,
            }
        }
    }
}

impl std::fmt::Debug for TestLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestLifecycle")
            .field("settings", &self.settings)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
