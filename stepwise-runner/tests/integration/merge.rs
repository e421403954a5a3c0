// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Result, ensure};
use pretty_assertions::assert_eq;
use std::{sync::Arc, thread, time::Duration};
use stepwise_metadata::{ReportSnapshot, StepStatus, TestId};
use stepwise_runner::{
    backend::MemoryBackend,
    config::ReportSettings,
    lifecycle::TestLifecycle,
    store::{MergeSummary, ResultStore, merge_snapshots, read_snapshot, write_snapshot},
};

fn worker(name: &str) -> TestLifecycle {
    TestLifecycle::new(
        ReportSettings::local().with_worker(name),
        Arc::new(MemoryBackend::new()),
    )
}

fn run(lifecycle: &TestLifecycle, test_id: &str, pass: bool) -> Result<()> {
    lifecycle.run_test(test_id, |ctx| {
        ctx.run_step("", None, |step| {
            step.check(pass, "check failed");
            Ok(())
        })
    })?;
    Ok(())
}

#[test]
fn merged_report_keeps_latest_runs() -> Result<()> {
    test_init();
    let dir = Utf8TempDir::new()?;

    let w1 = worker("w1");
    run(&w1, "only-w1", true)?;
    run(&w1, "shared", false)?;

    // Make sure the rerun on the second worker ends strictly later.
    thread::sleep(Duration::from_millis(5));
    let w2 = worker("w2");
    run(&w2, "only-w2", false)?;
    run(&w2, "shared", true)?;

    let w1_path = dir.path().join("w1.json");
    let w2_path = dir.path().join("w2.json");
    w1.store().lock()?.write_snapshot(&w1_path)?;
    w2.store().lock()?.write_snapshot(&w2_path)?;

    // The result doesn't depend on the order snapshots are merged in.
    for order in [[&w1_path, &w2_path], [&w2_path, &w1_path]] {
        let snapshots = order
            .into_iter()
            .map(|path| read_snapshot(path))
            .collect::<Result<Vec<_>, _>>()?;
        let (merged, _) = merge_snapshots(snapshots);

        let statuses: Vec<_> = ["only-w1", "only-w2", "shared"]
            .into_iter()
            .map(|id| merged.test(&TestId::new(id)).map(|record| record.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                Some(StepStatus::Pass),
                Some(StepStatus::Fail),
                Some(StepStatus::Pass),
            ]
        );
        assert_eq!(merged.tests.len(), 3);
    }
    Ok(())
}

#[test]
fn merged_snapshot_round_trips_through_a_file() -> Result<()> {
    test_init();
    let dir = Utf8TempDir::new()?;

    let w1 = worker("w1");
    run(&w1, "a", true)?;
    let w2 = worker("w2");
    run(&w2, "b", false)?;

    let (merged, summary) = merge_snapshots([w1.store().snapshot()?, w2.store().snapshot()?]);
    assert_eq!(
        summary,
        MergeSummary {
            added: 2,
            replaced: 0,
            kept: 0,
        }
    );
    // Worker name comes from the first snapshot.
    assert_eq!(merged.worker.as_deref(), Some("w1"));

    let path = dir.path().join("merged.json");
    write_snapshot(&merged, &path)?;
    let read = read_snapshot(&path)?;
    assert_eq!(read, merged);

    let store = ResultStore::from_snapshot(read);
    ensure!(store.running_count() == 0);
    assert_eq!(store.records().count(), 2);
    Ok(())
}

#[test]
fn corrupt_snapshot_is_an_error() -> Result<()> {
    test_init();
    let dir = Utf8TempDir::new()?;
    let path = dir.path().join("corrupt.json");
    std::fs::write(&path, "{ not json")?;

    let err = read_snapshot(&path).unwrap_err();
    ensure!(
        err.to_string().contains("corrupt.json"),
        "error mentions the file: {err}"
    );

    // An empty snapshot is fine.
    let empty = dir.path().join("empty.json");
    write_snapshot(&ReportSnapshot::default(), &empty)?;
    assert_eq!(read_snapshot(&empty)?.tests, Vec::new());
    Ok(())
}
