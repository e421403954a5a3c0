// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured access to the records produced by stepwise.
//!
//! This crate holds the serializable data model shared by the stepwise core and its tooling:
//! the [`StepStatus`] lattice, finished [`StepRecord`]s and [`TestRecord`]s, and the
//! [`ReportSnapshot`] a worker writes at the end of its run.
//!
//! Snapshots are plain JSON. Durations use humantime notation and timestamps are RFC 3339 with an
//! offset, so a snapshot round-trips without loss.

mod errors;
mod exit_codes;
mod records;
mod snapshot;
mod status;

pub use errors::*;
pub use exit_codes::*;
pub use records::*;
pub use snapshot::*;
pub use status::*;
