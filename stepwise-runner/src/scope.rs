// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Step scopes.
//!
//! A [`StepScope`] is a guard for one step of a test. While it is alive, soft assertions made
//! through it are attributed to the step. When it exits, whether through [`StepScope::finish`],
//! an explicit failure or block, or by being dropped, the step's status is resolved and the
//! finished record is stored.
//!
//! A child scope mutably borrows its parent, so scopes always exit innermost first.
//!
//! There are two ways to use scopes:
//!
//! * As guards, through [`TestContext::step`](crate::context::TestContext::step) and
//!   [`StepScope::step`]. Exit them with [`finish`](StepScope::finish), or stop the test with
//!   `return Err(step.fail(..))` or `return Err(step.block(..))`. A guard dropped without an
//!   explicit exit is recorded as failed.
//! * With closures, through [`run_step`](StepScope::run_step). The closure's result decides how
//!   the step exits: `Ok` completes it, an error fails it, and [`Blocked`] blocks it. The result is
//!   returned unchanged, so `?` carries a block up through every enclosing step.

use crate::{assume::ScopeId, context::TestState, errors::ScopeError};
use smol_str::SmolStr;
use std::{error, fmt, panic::Location, time::Duration};
use stepwise_metadata::{Attachment, StepId, StepRecord, StepStatus};
use tracing::warn;

/// How a step is labeled when it is entered.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StepLabel {
    /// Assign the next unused ordinal in the test.
    Auto,

    /// Use this ordinal.
    Ordinal(u32),

    /// Use this label.
    Label(SmolStr),
}

impl From<&str> for StepLabel {
    fn from(label: &str) -> Self {
        if label.is_empty() {
            Self::Auto
        } else {
            Self::Label(label.into())
        }
    }
}

impl From<String> for StepLabel {
    fn from(label: String) -> Self {
        label.as_str().into()
    }
}

impl From<u32> for StepLabel {
    fn from(ordinal: u32) -> Self {
        Self::Ordinal(ordinal)
    }
}

impl From<StepId> for StepLabel {
    fn from(step_id: StepId) -> Self {
        match step_id {
            StepId::Ordinal(n) => Self::Ordinal(n),
            StepId::Label(label) => Self::Label(label),
        }
    }
}

impl<T: Into<StepLabel>> From<Option<T>> for StepLabel {
    fn from(label: Option<T>) -> Self {
        label.map_or(Self::Auto, Into::into)
    }
}

/// How a step scope exits.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScopeExit {
    /// The step ran to completion. Its status comes from its soft assertions and children.
    Completed,

    /// The step failed with an error.
    Failed(String),

    /// The step was blocked: it could not meaningfully run.
    Blocked(String),
}

impl ScopeExit {
    pub(crate) fn contribution(self) -> Option<(StepStatus, String)> {
        match self {
            Self::Completed => None,
            Self::Failed(message) => Some((StepStatus::Fail, message)),
            Self::Blocked(reason) => Some((StepStatus::Blocked, reason)),
        }
    }
}

/// A signal that a step, and everything enclosing it, is blocked.
///
/// Returned as an error from a step closure, usually through [`StepAbort::blocked`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Blocked {
    reason: String,
}

impl Blocked {
    /// Creates a new block signal.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Returns the reason the step was blocked.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for Blocked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blocked: {}", self.reason)
    }
}

impl error::Error for Blocked {}

/// Why a step closure or test body stopped early.
///
/// Any error type converts into this with `?`. [`Blocked`] and [`ScopeError`] values keep their
/// meaning through the conversion; everything else is a failure.
#[derive(Debug)]
pub enum StepAbort {
    /// The step was blocked.
    Blocked(Blocked),

    /// The step failed with an error.
    Failed(Box<dyn error::Error + Send + Sync>),

    /// Step scopes were misused.
    Usage(ScopeError),
}

impl StepAbort {
    /// Creates a block signal.
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self::Blocked(Blocked::new(reason))
    }

    /// Creates a failure from a message.
    pub fn failed(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::Failed(message.into())
    }

    /// Returns true if this is a block signal.
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }

    pub(crate) fn to_exit(&self) -> ScopeExit {
        match self {
            Self::Blocked(blocked) => ScopeExit::Blocked(blocked.reason.clone()),
            Self::Failed(error) => ScopeExit::Failed(error.to_string()),
            Self::Usage(error) => ScopeExit::Failed(error.to_string()),
        }
    }
}

impl fmt::Display for StepAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocked(blocked) => fmt::Display::fmt(blocked, f),
            Self::Failed(error) => fmt::Display::fmt(error, f),
            Self::Usage(error) => fmt::Display::fmt(error, f),
        }
    }
}

// StepAbort must not implement Error: this impl would overlap with the reflexive From impl.
impl<E> From<E> for StepAbort
where
    E: error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        let error: Box<dyn error::Error + Send + Sync> = Box::new(error);
        let error = match error.downcast::<Blocked>() {
            Ok(blocked) => return Self::Blocked(*blocked),
            Err(error) => error,
        };
        match error.downcast::<ScopeError>() {
            Ok(usage) => Self::Usage(*usage),
            Err(error) => Self::Failed(error),
        }
    }
}

/// A guard for an open step.
///
/// See the [module documentation](self) for how scopes are used.
#[must_use = "dropping a step scope without exiting it records the step as failed"]
pub struct StepScope<'ctx> {
    state: &'ctx mut TestState,
    scope_id: ScopeId,
    step_id: StepId,
    finished: bool,
}

impl<'ctx> StepScope<'ctx> {
    pub(crate) fn enter(
        state: &'ctx mut TestState,
        parent: ScopeId,
        label: StepLabel,
        timeout: Option<Duration>,
    ) -> Result<Self, ScopeError> {
        let (scope_id, step_id) = state.enter(parent, label, timeout)?;
        Ok(Self {
            state,
            scope_id,
            step_id,
            finished: false,
        })
    }

    /// Returns the ID of this step.
    pub fn step_id(&self) -> &StepId {
        &self.step_id
    }

    /// Returns the scope ID of this step.
    pub fn scope_id(&self) -> ScopeId {
        self.scope_id
    }

    /// Returns the status accumulated so far from finished children, before resolution.
    ///
    /// Soft assertions made directly in this step are only counted when it exits.
    pub fn status(&self) -> StepStatus {
        self.state.status(self.scope_id)
    }

    /// Returns the records of the steps this test has finished so far, in exit order.
    pub fn finished_steps(&self) -> &[StepRecord] {
        self.state.finished_steps()
    }

    /// Enters a nested step.
    pub fn step(
        &mut self,
        label: impl Into<StepLabel>,
        timeout: Option<Duration>,
    ) -> Result<StepScope<'_>, ScopeError> {
        StepScope::enter(&mut *self.state, self.scope_id, label.into(), timeout)
    }

    /// Runs `f` inside a nested step, exiting the step according to its result.
    pub fn run_step<T, F>(
        &mut self,
        label: impl Into<StepLabel>,
        timeout: Option<Duration>,
        f: F,
    ) -> Result<T, StepAbort>
    where
        F: FnOnce(&mut StepScope<'_>) -> Result<T, StepAbort>,
    {
        run_step_in(&mut *self.state, self.scope_id, label.into(), timeout, f)
    }

    /// Makes a soft assertion in this step. Returns `condition`.
    ///
    /// A false condition fails the step when it exits, but never stops the test. Each check is
    /// also a checkpoint for the step's deadline.
    #[track_caller]
    pub fn check(&mut self, condition: bool, message: impl Into<String>) -> bool {
        self.state
            .check(self.scope_id, condition, message, Location::caller())
    }

    /// Returns true if the step has run past its timeout.
    ///
    /// Timeouts are cooperative: a step that has timed out keeps running until it exits, and is
    /// then recorded as blocked.
    pub fn is_timed_out(&mut self) -> bool {
        self.state.poll_deadline(self.scope_id)
    }

    /// Attaches content to this step.
    pub fn attach(&mut self, name: impl AsRef<str>, content: impl Into<String>) {
        self.state
            .attach(self.scope_id, Attachment::new(name, content));
    }

    /// Adds a line to this step's comment.
    pub fn comment(&mut self, text: impl Into<String>) {
        self.state.comment(self.scope_id, text.into());
    }

    /// Exits the step normally, returning its resolved status.
    pub fn finish(self) -> Result<StepStatus, ScopeError> {
        self.exit(ScopeExit::Completed)
    }

    /// Exits the step as failed, returning the signal that stops the test.
    ///
    /// Return it from the test body or step closure: `return Err(step.fail("..."))`.
    #[must_use = "the returned abort must be propagated to stop the test"]
    pub fn fail(self, message: impl Into<String>) -> StepAbort {
        let message: String = message.into();
        self.exit_noting_errors(ScopeExit::Failed(message.clone()));
        StepAbort::failed(message)
    }

    /// Exits the step as blocked, returning the signal that stops the test.
    ///
    /// Return it from the test body or step closure: `return Err(step.block("..."))`. Every
    /// enclosing step it passes through is blocked too.
    #[must_use = "the returned abort must be propagated to stop the test"]
    pub fn block(self, reason: impl Into<String>) -> StepAbort {
        let reason: String = reason.into();
        self.exit_noting_errors(ScopeExit::Blocked(reason.clone()));
        StepAbort::blocked(reason)
    }

    fn exit(mut self, exit: ScopeExit) -> Result<StepStatus, ScopeError> {
        self.exit_impl(exit)
    }

    // Errors from recording the step are kept as usage errors of the test.
    fn exit_noting_errors(mut self, exit: ScopeExit) {
        if let Err(error) = self.exit_impl(exit) {
            self.state.usage_errors.push(error);
        }
    }

    fn exit_impl(&mut self, exit: ScopeExit) -> Result<StepStatus, ScopeError> {
        self.finished = true;
        self.state.exit(self.scope_id, &self.step_id, exit)
    }
}

impl fmt::Debug for StepScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepScope")
            .field("test_id", &self.state.test_id)
            .field("scope_id", &self.scope_id)
            .field("step_id", &self.step_id)
            .finish_non_exhaustive()
    }
}

impl Drop for StepScope<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let message = if std::thread::panicking() {
            "panicked while step was open"
        } else {
            "step was not finished"
        };
        warn!(
            "in test `{}`, step `{}` was dropped without exiting: {message}",
            self.state.test_id, self.step_id
        );
        if let Err(error) = self.exit_impl(ScopeExit::Failed(message.to_owned())) {
            self.state.usage_errors.push(error);
        }
    }
}

pub(crate) fn run_step_in<T, F>(
    state: &mut TestState,
    parent: ScopeId,
    label: StepLabel,
    timeout: Option<Duration>,
    f: F,
) -> Result<T, StepAbort>
where
    F: FnOnce(&mut StepScope<'_>) -> Result<T, StepAbort>,
{
    let mut scope = StepScope::enter(state, parent, label, timeout)?;
    match f(&mut scope) {
        Ok(value) => {
            scope.exit(ScopeExit::Completed)?;
            Ok(value)
        }
        Err(abort) => {
            // The abort carries on unchanged even if the step can't be recorded.
            scope.exit_noting_errors(abort.to_exit());
            Err(abort)
        }
    }
}
