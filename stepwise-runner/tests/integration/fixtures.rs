// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::{Arc, Once};
use stepwise_metadata::{StepId, StepRecord, StepStatus, TestRecord};
use stepwise_runner::{backend::MemoryBackend, config::ReportSettings, lifecycle::TestLifecycle};

pub(crate) fn test_init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        // Only fails if a hook is already installed.
        let _ = color_eyre::install();
    });
}

/// A lifecycle with reporting enabled, recording into a memory backend.
pub(crate) fn reporting_lifecycle() -> (TestLifecycle, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let lifecycle = TestLifecycle::new(
        ReportSettings::local().with_reporting(true),
        backend.clone(),
    );
    (lifecycle, backend)
}

/// A lifecycle for local runs, with reporting disabled.
pub(crate) fn local_lifecycle() -> (TestLifecycle, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let lifecycle = TestLifecycle::new(ReportSettings::local(), backend.clone());
    (lifecycle, backend)
}

/// Returns `(step ID, status)` pairs in stored order.
pub(crate) fn step_statuses(record: &TestRecord) -> Vec<(StepId, StepStatus)> {
    record
        .steps
        .iter()
        .map(|step| (step.step_id.clone(), step.status))
        .collect()
}

pub(crate) fn label(label: &str) -> StepId {
    StepId::Label(label.into())
}

pub(crate) fn find_step<'a>(record: &'a TestRecord, step_id: &StepId) -> &'a StepRecord {
    record
        .step(step_id)
        .unwrap_or_else(|| panic!("step {step_id} not found in {record:?}"))
}
