// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for stepwise.
//!
//! Configuration comes from two places:
//!
//! * `.config/stepwise.toml` in the workspace root, represented by [`StepwiseConfig`].
//! * The environment of the CI build, represented by [`BuildEnv`].
//!
//! [`ReportSettings::resolve`] combines both into the settings a
//! [`TestLifecycle`](crate::lifecycle::TestLifecycle) runs with.

mod build_meta;
mod imp;
mod settings;

pub use build_meta::*;
pub use imp::*;
pub use settings::*;
