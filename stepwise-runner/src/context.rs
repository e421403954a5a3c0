// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-test context.
//!
//! A [`TestContext`] is handed to the body of every test. It owns the test's soft-assertion
//! registry and the stack of open step scopes, so that tests running concurrently never share
//! scope state.

use crate::{
    assume::{AssumptionRegistry, ScopeId},
    errors::ScopeError,
    scope::{ScopeExit, StepAbort, StepLabel, StepScope, run_step_in},
    store::{SharedResultStore, TestConclusion},
    time::StopwatchStart,
};
use std::{collections::HashSet, panic::Location, time::Duration};
use stepwise_metadata::{Attachment, StepId, StepRecord, StepStatus, TestId};
use tracing::{debug, warn};

/// The context of one running test.
///
/// Obtained from [`TestLifecycle::start_test`](crate::lifecycle::TestLifecycle::start_test) and
/// passed back to [`TestLifecycle::end_test`](crate::lifecycle::TestLifecycle::end_test).
#[derive(Debug)]
pub struct TestContext {
    state: TestState,
}

impl TestContext {
    pub(crate) fn new(
        test_id: TestId,
        attempt: u32,
        store: SharedResultStore,
        default_timeout: Duration,
        stopwatch: StopwatchStart,
    ) -> Self {
        Self {
            state: TestState {
                test_id,
                attempt,
                store,
                registry: AssumptionRegistry::new(),
                frames: Vec::new(),
                root_status: StepStatus::initial(),
                root_attachments: Vec::new(),
                used_ids: HashSet::new(),
                next_ordinal: 1,
                next_scope_id: ScopeId::ROOT.next(),
                default_timeout,
                stopwatch,
                reason: None,
                finished_steps: Vec::new(),
                usage_errors: Vec::new(),
            },
        }
    }

    /// Returns the ID of the test.
    pub fn test_id(&self) -> &TestId {
        &self.state.test_id
    }

    /// Returns the attempt number, starting at 1. Retries of a test increment it.
    pub fn attempt(&self) -> u32 {
        self.state.attempt
    }

    /// Returns the status the test has accumulated so far, before resolution.
    pub fn status(&self) -> StepStatus {
        self.state.root_status
    }

    /// Returns the number of steps currently open.
    pub fn open_steps(&self) -> usize {
        self.state.frames.len()
    }

    /// Returns the records of the steps this test has finished so far, in exit order.
    ///
    /// These are the same records the result store holds, available whether or not results are
    /// reported.
    pub fn finished_steps(&self) -> &[StepRecord] {
        self.state.finished_steps()
    }

    /// Enters a top-level step.
    ///
    /// A `None` timeout uses the configured default step timeout.
    pub fn step(
        &mut self,
        label: impl Into<StepLabel>,
        timeout: Option<Duration>,
    ) -> Result<StepScope<'_>, ScopeError> {
        StepScope::enter(&mut self.state, ScopeId::ROOT, label.into(), timeout)
    }

    /// Runs `f` inside a top-level step, exiting the step according to its result.
    pub fn run_step<T, F>(
        &mut self,
        label: impl Into<StepLabel>,
        timeout: Option<Duration>,
        f: F,
    ) -> Result<T, StepAbort>
    where
        F: FnOnce(&mut StepScope<'_>) -> Result<T, StepAbort>,
    {
        run_step_in(&mut self.state, ScopeId::ROOT, label.into(), timeout, f)
    }

    /// Makes a soft assertion outside of any step. Returns `condition`.
    #[track_caller]
    pub fn check(&mut self, condition: bool, message: impl Into<String>) -> bool {
        self.state
            .check(ScopeId::ROOT, condition, message, Location::caller())
    }

    /// Attaches content to the test result.
    pub fn attach(&mut self, name: impl AsRef<str>, content: impl Into<String>) {
        self.state
            .root_attachments
            .push(Attachment::new(name, content));
    }

    /// Concludes the test body, folding in the way it exited.
    pub(crate) fn conclude(self, exit: ScopeExit, misuse: Option<ScopeError>) -> ConcludedTest {
        let mut state = self.state;
        let mut usage_errors = std::mem::take(&mut state.usage_errors);
        usage_errors.extend(misuse);
        if !state.frames.is_empty() {
            usage_errors.push(ScopeError::StepsStillOpen {
                test_id: state.test_id.clone(),
                open: state
                    .frames
                    .iter()
                    .map(|frame| frame.step_id.clone())
                    .collect(),
            });
        }

        let mut status = state.root_status;
        for failure in state.registry.drain(ScopeId::ROOT) {
            status = status.combine(StepStatus::Fail);
            state.note_reason(StepStatus::Fail, failure.to_string());
        }
        if let Some((exit_status, message)) = exit.contribution() {
            status = status.combine(exit_status);
            state.note_reason(exit_status, message);
        }
        if let Some(error) = usage_errors.first() {
            status = status.combine(StepStatus::Fail);
            state.note_reason(StepStatus::Fail, error.to_string());
        }
        state.registry.clear();

        ConcludedTest {
            test_id: state.test_id,
            conclusion: TestConclusion {
                end_time: state.stopwatch.snapshot().end_time(),
                contribution: status,
                reason: state.reason.map(|(_, reason)| reason),
            },
            attachments: state.root_attachments,
            usage_errors,
        }
    }
}

/// A test body that has finished, ready to be finalized in the store.
#[derive(Debug)]
pub(crate) struct ConcludedTest {
    pub(crate) test_id: TestId,
    pub(crate) conclusion: TestConclusion,
    pub(crate) attachments: Vec<Attachment>,
    pub(crate) usage_errors: Vec<ScopeError>,
}

/// Scope state for one test. Step scopes borrow it mutably while they are open.
#[derive(Debug)]
pub(crate) struct TestState {
    pub(crate) test_id: TestId,
    attempt: u32,
    store: SharedResultStore,
    registry: AssumptionRegistry,
    // Open steps, outermost first. The test body itself is not a frame.
    frames: Vec<OpenFrame>,
    root_status: StepStatus,
    root_attachments: Vec<Attachment>,
    used_ids: HashSet<StepId>,
    next_ordinal: u32,
    next_scope_id: ScopeId,
    default_timeout: Duration,
    stopwatch: StopwatchStart,
    // The most severe reason seen so far, first one wins on ties.
    reason: Option<(StepStatus, String)>,
    finished_steps: Vec<StepRecord>,
    pub(crate) usage_errors: Vec<ScopeError>,
}

#[derive(Debug)]
struct OpenFrame {
    scope_id: ScopeId,
    step_id: StepId,
    status: StepStatus,
    attachments: Vec<Attachment>,
    comments: Vec<String>,
    stopwatch: StopwatchStart,
    timeout: Duration,
    timed_out: bool,
}

impl TestState {
    fn innermost(&self) -> ScopeId {
        self.frames
            .last()
            .map_or(ScopeId::ROOT, |frame| frame.scope_id)
    }

    fn frame_mut(&mut self, scope_id: ScopeId) -> Option<&mut OpenFrame> {
        self.frames
            .iter_mut()
            .rev()
            .find(|frame| frame.scope_id == scope_id)
    }

    fn describe(&self, scope_id: ScopeId) -> String {
        if scope_id == ScopeId::ROOT {
            return "test body".to_owned();
        }
        match self.frames.iter().find(|frame| frame.scope_id == scope_id) {
            Some(frame) => format!("step {}", frame.step_id),
            None => format!("closed scope {scope_id}"),
        }
    }

    /// Opens a step under `parent`, which must be the innermost open scope.
    pub(crate) fn enter(
        &mut self,
        parent: ScopeId,
        label: StepLabel,
        timeout: Option<Duration>,
    ) -> Result<(ScopeId, StepId), ScopeError> {
        if self.innermost() != parent {
            return Err(ScopeError::ParentNotOpen {
                test_id: self.test_id.clone(),
                parent: self.describe(parent),
            });
        }

        let step_id = match label {
            StepLabel::Auto => {
                while self
                    .used_ids
                    .contains(&StepId::Ordinal(self.next_ordinal))
                {
                    self.next_ordinal += 1;
                }
                StepId::Ordinal(self.next_ordinal)
            }
            StepLabel::Ordinal(n) => StepId::Ordinal(n),
            StepLabel::Label(label) => StepId::Label(label),
        };
        if !self.used_ids.insert(step_id.clone()) {
            return Err(ScopeError::DuplicateStepId {
                test_id: self.test_id.clone(),
                step_id,
            });
        }

        let scope_id = self.next_scope_id;
        self.next_scope_id = scope_id.next();
        let timeout = timeout.unwrap_or(self.default_timeout);
        debug!(
            test_id = %self.test_id,
            step_id = %step_id,
            depth = self.frames.len(),
            "entering step"
        );
        self.frames.push(OpenFrame {
            scope_id,
            step_id: step_id.clone(),
            status: StepStatus::initial(),
            attachments: Vec::new(),
            comments: Vec::new(),
            stopwatch: crate::time::stopwatch(),
            timeout,
            timed_out: false,
        });
        Ok((scope_id, step_id))
    }

    /// Records a soft assertion in `scope_id`. Also a deadline checkpoint for that scope.
    pub(crate) fn check(
        &mut self,
        scope_id: ScopeId,
        condition: bool,
        message: impl Into<String>,
        location: &'static Location<'static>,
    ) -> bool {
        let condition = self.registry.record(scope_id, condition, message, location);
        if !condition {
            debug!(test_id = %self.test_id, scope = %scope_id, %location, "soft assertion failed");
        }
        self.poll_deadline(scope_id);
        condition
    }

    /// Returns true if the step's deadline has passed, marking it as timed out.
    pub(crate) fn poll_deadline(&mut self, scope_id: ScopeId) -> bool {
        let test_id = self.test_id.clone();
        let Some(frame) = self.frame_mut(scope_id) else {
            return false;
        };
        if !frame.timed_out && frame.stopwatch.exceeded(Some(frame.timeout)) {
            frame.timed_out = true;
            warn!(
                "in test `{test_id}`, step `{}` exceeded its timeout of {}",
                frame.step_id,
                humantime::format_duration(frame.timeout),
            );
        }
        frame.timed_out
    }

    pub(crate) fn attach(&mut self, scope_id: ScopeId, attachment: Attachment) {
        if let Some(frame) = self.frame_mut(scope_id) {
            frame.attachments.push(attachment);
        }
    }

    pub(crate) fn comment(&mut self, scope_id: ScopeId, text: String) {
        if let Some(frame) = self.frame_mut(scope_id) {
            frame.comments.push(text);
        }
    }

    pub(crate) fn finished_steps(&self) -> &[StepRecord] {
        &self.finished_steps
    }

    pub(crate) fn status(&self, scope_id: ScopeId) -> StepStatus {
        self.frames
            .iter()
            .find(|frame| frame.scope_id == scope_id)
            .map_or(StepStatus::initial(), |frame| frame.status)
    }

    /// Closes the innermost step, which must be `scope_id`, and records it in the store.
    pub(crate) fn exit(
        &mut self,
        scope_id: ScopeId,
        step_id: &StepId,
        exit: ScopeExit,
    ) -> Result<StepStatus, ScopeError> {
        if self.innermost() != scope_id {
            return Err(ScopeError::NotInnermost {
                test_id: self.test_id.clone(),
                step_id: step_id.clone(),
            });
        }
        // innermost() matched a step scope, so the stack is not empty.
        let Some(mut frame) = self.frames.pop() else {
            return Err(ScopeError::NotInnermost {
                test_id: self.test_id.clone(),
                step_id: step_id.clone(),
            });
        };

        let mut contributions = Vec::new();
        for failure in self.registry.drain(scope_id) {
            contributions.push((StepStatus::Fail, failure.to_string()));
        }
        contributions.extend(exit.contribution());
        if frame.timed_out || frame.stopwatch.exceeded(Some(frame.timeout)) {
            // Report whole milliseconds, the rest is noise.
            let elapsed = frame.stopwatch.elapsed();
            let elapsed = Duration::from_millis(
                u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            );
            contributions.push((
                StepStatus::Blocked,
                format!(
                    "timed out after {} (limit {})",
                    humantime::format_duration(elapsed),
                    humantime::format_duration(frame.timeout),
                ),
            ));
        }
        for (status, message) in contributions {
            frame.status = frame.status.combine(status);
            self.note_reason(status, message.clone());
            frame.comments.push(message);
        }

        let status = frame.status.resolve();
        let elapsed = frame.stopwatch.snapshot();
        let parent = self.frames.last().map(|parent| parent.step_id.clone());
        let record = StepRecord {
            test_id: self.test_id.clone(),
            step_id: frame.step_id,
            parent,
            depth: self.frames.len(),
            status,
            started_at: elapsed.start_time,
            elapsed: elapsed.duration,
            attachments: frame.attachments,
            comment: (!frame.comments.is_empty()).then(|| frame.comments.join("\n")),
        };

        match self.frames.last_mut() {
            Some(parent) => parent.status = parent.status.combine(status),
            None => self.root_status = self.root_status.combine(status),
        }

        debug!(
            test_id = %self.test_id,
            step_id = %record.step_id,
            %status,
            elapsed = ?record.elapsed,
            "exited step"
        );
        self.finished_steps.push(record.clone());
        self.store.lock()?.append(&self.test_id, record)?;
        Ok(status)
    }

    fn note_reason(&mut self, status: StepStatus, message: String) {
        let replace = match &self.reason {
            None => true,
            Some((existing, _)) => status > *existing,
        };
        if replace {
            self.reason = Some((status, message));
        }
    }
}
