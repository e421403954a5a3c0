// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `stepwise` command: merges worker result snapshots and shows what they contain.
//!
//! Workers running tests in parallel each write a snapshot of their result store. `stepwise
//! merge` combines them into one report, keeping the latest run of every test, and `stepwise
//! show` prints a report for humans.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, OutputWriter, StderrStyles};
