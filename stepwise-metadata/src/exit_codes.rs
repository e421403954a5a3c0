// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `stepwise` failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum StepwiseExitCode {}

impl StepwiseExitCode {
    /// No errors occurred and stepwise exited normally.
    pub const OK: i32 = 0;

    /// One or more tests in the inspected snapshot failed or were blocked.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// A snapshot could not be read or decoded.
    pub const SNAPSHOT_READ_FAILED: i32 = 101;

    /// A snapshot could not be written.
    pub const SNAPSHOT_WRITE_FAILED: i32 = 102;

    /// The configuration file could not be parsed.
    pub const CONFIG_PARSE_FAILED: i32 = 104;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// The workspace passed to stepwise was invalid.
    pub const SETUP_ERROR: i32 = 96;
}
