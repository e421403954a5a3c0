// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for step scopes, the test lifecycle and snapshot merging.

mod fixtures;
mod lifecycle;
mod merge;
mod scopes;
