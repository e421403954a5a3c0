// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for stepwise: step scopes, soft assertions and result aggregation.
//!
//! The basic flow is:
//!
//! 1. A [`TestLifecycle`](lifecycle::TestLifecycle) is created once per worker process.
//! 2. For every test, [`start_test`](lifecycle::TestLifecycle::start_test) returns a
//!    [`TestContext`](context::TestContext). The test body opens nested
//!    [`StepScope`](scope::StepScope)s from it and records soft assertions through them.
//! 3. Each scope resolves its own [`StepStatus`](stepwise_metadata::StepStatus) on exit and stores
//!    the finished record in the worker's [`ResultStore`](store::ResultStore).
//! 4. [`end_test`](lifecycle::TestLifecycle::end_test) resolves the test's status and hands the
//!    finished record to the [`ReportBackend`](backend::ReportBackend) if reporting is enabled.
//! 5. At the end of the run each worker writes a snapshot; snapshots are merged into one report.

pub mod assume;
pub mod backend;
pub mod config;
pub mod context;
pub mod errors;
pub mod lifecycle;
pub mod scope;
pub mod store;
mod time;
