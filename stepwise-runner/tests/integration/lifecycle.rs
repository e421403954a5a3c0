// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure};
use pretty_assertions::assert_eq;
use std::{
    panic::{self, AssertUnwindSafe},
    thread,
};
use stepwise_metadata::{SnapshotSummary, StepStatus, TestId};
use stepwise_runner::{
    backend::BackendCall,
    lifecycle::{BodyOutcome, Delivery, TestVerdict},
    scope::StepAbort,
};

#[test]
fn panics_are_recorded_then_resumed() -> Result<()> {
    test_init();
    let (lifecycle, _) = local_lifecycle();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        lifecycle.run_test("panics", |ctx| {
            ctx.run_step("boom", None, |_| -> Result<(), StepAbort> {
                panic!("kaboom");
            })
        })
    }));
    ensure!(result.is_err(), "the panic is resumed");

    let store = lifecycle.store().lock()?;
    let record = store
        .get(&TestId::new("panics"))
        .expect("the test was finalized before resuming the panic");
    assert_eq!(record.status, StepStatus::Fail);
    let step = find_step(record, &label("boom"));
    assert_eq!(step.status, StepStatus::Fail);
    assert_eq!(step.comment.as_deref(), Some("panicked while step was open"));
    Ok(())
}

#[test]
fn retries_replace_earlier_attempts() -> Result<()> {
    test_init();
    let (lifecycle, _) = local_lifecycle();

    let first = lifecycle.run_test("flaky", |ctx| {
        ctx.run_step("", None, |step| {
            step.check(false, "first attempt fails");
            Ok(())
        })
    })?;
    assert_eq!(first.record.attempt, 1);
    assert_eq!(first.record.status, StepStatus::Fail);

    let second = lifecycle.run_test("flaky", |ctx| ctx.run_step("", None, |_| Ok(())))?;
    assert_eq!(second.record.attempt, 2);
    assert_eq!(second.record.status, StepStatus::Pass);

    let snapshot = lifecycle.store().snapshot()?;
    assert_eq!(snapshot.tests, vec![second.record]);
    Ok(())
}

#[test]
fn explicit_start_and_end() -> Result<()> {
    test_init();
    let (lifecycle, backend) = reporting_lifecycle();

    let mut ctx = lifecycle.start_test("manual")?;
    assert_eq!(ctx.attempt(), 1);
    ctx.run_step("warm up", None, |_| Ok(()))
        .expect("warm-up step completes");
    let finished = lifecycle.end_test(
        ctx,
        BodyOutcome::Blocked("no device attached".to_owned()),
    )?;

    assert_eq!(finished.record.status, StepStatus::Blocked);
    assert_eq!(
        finished.verdict,
        TestVerdict::Skipped {
            reason: "no device attached".to_owned()
        }
    );

    // The backend sees the same status as the local record.
    let last = backend.calls().pop();
    ensure!(
        matches!(
            last,
            Some(BackendCall::UpdateResult {
                status: StepStatus::Blocked,
                ..
            })
        ),
        "unexpected last call: {last:?}"
    );
    Ok(())
}

#[test]
fn starting_a_running_test_fails() -> Result<()> {
    test_init();
    let (lifecycle, _) = local_lifecycle();
    let ctx = lifecycle.start_test("twice")?;
    let err = lifecycle.start_test("twice").unwrap_err();
    ensure!(
        err.to_string().contains("already running"),
        "unexpected error: {err}"
    );
    lifecycle.end_test(ctx, BodyOutcome::Completed)?;
    Ok(())
}

#[test]
fn reporting_disabled_means_no_backend_calls() -> Result<()> {
    test_init();
    let (lifecycle, backend) = local_lifecycle();

    for name in ["a", "b", "c"] {
        let finished = lifecycle.run_test(name, |ctx| {
            ctx.run_step("", None, |step| {
                step.check(name != "b", "b fails");
                Ok(())
            })
        })?;
        ensure!(matches!(finished.delivery, Delivery::Disabled));
    }

    assert_eq!(backend.calls(), Vec::new());
    // Local records are still produced.
    assert_eq!(
        lifecycle.store().snapshot()?.summary(),
        SnapshotSummary {
            passed: 2,
            failed: 1,
            blocked: 0,
            skipped: 0,
        }
    );
    Ok(())
}

#[test]
fn concurrent_tests_do_not_share_assumptions() -> Result<()> {
    test_init();
    let (lifecycle, backend) = reporting_lifecycle();

    thread::scope(|scope| {
        for n in 0..8 {
            let lifecycle = &lifecycle;
            scope.spawn(move || {
                lifecycle
                    .run_test(format!("test-{n}"), |ctx| {
                        ctx.run_step("work", None, |step| {
                            step.check(n % 2 == 0, format!("odd test {n}"));
                            Ok(())
                        })
                    })
                    .expect("test ran")
            });
        }
    });

    let store = lifecycle.store().lock()?;
    for n in 0..8 {
        let record = store
            .get(&TestId::new(format!("test-{n}")))
            .expect("every test was recorded");
        let expected = if n % 2 == 0 {
            StepStatus::Pass
        } else {
            StepStatus::Fail
        };
        assert_eq!(record.status, expected, "status of test-{n}");
        if let Some(reason) = &record.reason {
            ensure!(
                reason.ends_with(&format!("odd test {n}")),
                "test-{n} only sees its own failures: {reason}"
            );
        }
    }
    // Each test: create, one step, final update.
    assert_eq!(backend.calls().len(), 8 * 3);
    Ok(())
}
