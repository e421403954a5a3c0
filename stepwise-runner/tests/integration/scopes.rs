// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure};
use pretty_assertions::assert_eq;
use std::{io, sync::Arc, thread, time::Duration};
use stepwise_metadata::{StepId, StepRecord, StepStatus, TestId};
use stepwise_runner::{
    backend::{BackendCall, MemoryBackend},
    config::ReportSettings,
    context::TestContext,
    errors::{LifecycleError, ScopeError},
    lifecycle::{TestLifecycle, TestVerdict},
    scope::{Blocked, StepAbort},
};

#[test]
fn steps_are_stored_in_exit_order() -> Result<()> {
    test_init();
    let (lifecycle, _) = local_lifecycle();

    let finished = lifecycle.run_test("ordering", |ctx| {
        ctx.run_step("A", None, |a| {
            a.run_step("B", None, |_| Ok(()))?;
            Ok(())
        })?;
        ctx.run_step("C", None, |_| Ok(()))
    })?;

    assert_eq!(
        step_statuses(&finished.record),
        vec![
            (label("B"), StepStatus::Pass),
            (label("A"), StepStatus::Pass),
            (label("C"), StepStatus::Pass),
        ]
    );

    let b = find_step(&finished.record, &label("B"));
    assert_eq!(b.parent, Some(label("A")));
    assert_eq!(b.depth, 1);
    let c = find_step(&finished.record, &label("C"));
    assert_eq!(c.parent, None);
    assert_eq!(c.depth, 0);
    assert_eq!(finished.verdict, TestVerdict::Passed);
    Ok(())
}

#[test]
fn empty_test_and_empty_step_pass() -> Result<()> {
    test_init();
    let (lifecycle, _) = local_lifecycle();

    let finished = lifecycle.run_test("empty", |_| Ok(()))?;
    assert_eq!(finished.record.status, StepStatus::Pass);
    assert!(finished.record.steps.is_empty());

    let finished = lifecycle.run_test("empty-step", |ctx| {
        let step = ctx.step("", None)?;
        step.finish()?;
        Ok(())
    })?;
    assert_eq!(
        step_statuses(&finished.record),
        vec![(StepId::Ordinal(1), StepStatus::Pass)]
    );
    Ok(())
}

#[test]
fn soft_failures_propagate_and_execution_continues() -> Result<()> {
    test_init();
    let (lifecycle, _) = local_lifecycle();
    let mut reached_end = false;

    let finished = lifecycle.run_test("soft", |ctx| {
        ctx.run_step("outer", None, |outer| {
            outer.run_step("inner", None, |inner| {
                let answer = 41;
                inner.check(answer == 42, "answer is wrong");
                inner.check(true, "this one holds");
                Ok(())
            })?;
            outer.run_step("sibling", None, |_| Ok(()))?;
            Ok(())
        })?;
        reached_end = true;
        Ok(())
    })?;

    ensure!(reached_end, "soft failures never abort the body");
    assert_eq!(
        step_statuses(&finished.record),
        vec![
            (label("inner"), StepStatus::Fail),
            (label("sibling"), StepStatus::Pass),
            (label("outer"), StepStatus::Fail),
        ]
    );
    let inner = find_step(&finished.record, &label("inner"));
    let comment = inner.comment.as_deref().unwrap_or_default();
    ensure!(
        comment.ends_with(": answer is wrong"),
        "comment has the failure: {comment}"
    );

    let TestVerdict::Failed { message } = &finished.verdict else {
        panic!("expected failure, got {:?}", finished.verdict);
    };
    ensure!(message.contains("answer is wrong"), "message: {message}");
    Ok(())
}

#[test]
fn block_propagates_to_every_ancestor() -> Result<()> {
    test_init();
    let (lifecycle, _) = local_lifecycle();
    let mut after_block = false;

    let finished = lifecycle.run_test("blocked", |ctx| {
        ctx.run_step("setup", None, |setup| {
            setup.run_step("connect", None, |_| -> Result<(), StepAbort> {
                Err(Blocked::new("device offline").into())
            })?;
            after_block = true;
            Ok(())
        })
    })?;

    ensure!(!after_block, "a block stops the enclosing steps");
    assert_eq!(
        step_statuses(&finished.record),
        vec![
            (label("connect"), StepStatus::Blocked),
            (label("setup"), StepStatus::Blocked),
        ]
    );
    assert_eq!(finished.record.status, StepStatus::Blocked);
    assert_eq!(
        finished.verdict,
        TestVerdict::Skipped {
            reason: "device offline".to_owned()
        }
    );
    Ok(())
}

#[test]
fn block_outranks_earlier_soft_failures() -> Result<()> {
    test_init();
    let (lifecycle, _) = local_lifecycle();

    let finished = lifecycle.run_test("fail-then-block", |ctx| {
        ctx.check(false, "minor problem");
        let step = ctx.step("guarded", None)?;
        Err(step.block("license server unreachable"))
    })?;

    assert_eq!(finished.record.status, StepStatus::Blocked);
    assert_eq!(
        finished.record.reason.as_deref(),
        Some("license server unreachable")
    );
    Ok(())
}

#[test]
fn errors_fail_the_step_and_propagate() -> Result<()> {
    test_init();
    let (lifecycle, _) = local_lifecycle();

    let finished = lifecycle.run_test("error", |ctx| {
        ctx.run_step("read config", None, |_| {
            let read: Result<String, io::Error> = Err(io::Error::new(
                io::ErrorKind::NotFound,
                "config.json missing",
            ));
            read?;
            Ok(())
        })
    })?;

    let step = find_step(&finished.record, &label("read config"));
    assert_eq!(step.status, StepStatus::Fail);
    assert_eq!(step.comment.as_deref(), Some("config.json missing"));
    assert_eq!(
        finished.verdict,
        TestVerdict::Failed {
            message: "config.json missing".to_owned()
        }
    );
    Ok(())
}

#[test]
fn timeout_blocks_the_step() -> Result<()> {
    test_init();
    let (lifecycle, _) = local_lifecycle();
    let mut saw_timeout = false;

    let finished = lifecycle.run_test("slow", |ctx| {
        ctx.run_step("outer", None, |outer| {
            outer.run_step("slow", Some(Duration::from_millis(10)), |slow| {
                thread::sleep(Duration::from_millis(30));
                saw_timeout = slow.is_timed_out();
                Ok(())
            })?;
            outer.run_step("after", None, |_| Ok(()))
        })
    })?;

    ensure!(saw_timeout, "the step sees its own timeout");
    assert_eq!(
        step_statuses(&finished.record),
        vec![
            (label("slow"), StepStatus::Blocked),
            (label("after"), StepStatus::Pass),
            (label("outer"), StepStatus::Blocked),
        ]
    );
    let slow = find_step(&finished.record, &label("slow"));
    let comment = slow.comment.as_deref().unwrap_or_default();
    ensure!(
        comment.starts_with("timed out after ") && comment.ends_with("(limit 10ms)"),
        "comment describes the timeout: {comment}"
    );
    ensure!(slow.elapsed >= Duration::from_millis(30));
    Ok(())
}

#[test]
fn settings_provide_the_default_timeout() -> Result<()> {
    test_init();
    let lifecycle = TestLifecycle::new(
        ReportSettings::local().with_step_timeout(Duration::from_millis(5)),
        Arc::new(MemoryBackend::new()),
    );

    let finished = lifecycle.run_test("default-timeout", |ctx| {
        let mut step = ctx.step("", None)?;
        thread::sleep(Duration::from_millis(20));
        // A check is a deadline checkpoint.
        step.check(true, "still fine");
        step.finish()?;
        Ok(())
    })?;
    assert_eq!(finished.record.status, StepStatus::Blocked);
    Ok(())
}

#[test]
fn abandoned_guard_is_a_failure() -> Result<()> {
    test_init();
    let (lifecycle, _) = local_lifecycle();

    fn body(ctx: &mut TestContext) -> Result<(), StepAbort> {
        let mut step = ctx.step("early-return", None)?;
        step.check(true, "fine so far");
        // Returning early through `?` drops the guard without finishing it.
        "not a number".parse::<u32>()?;
        step.finish()?;
        Ok(())
    }

    let finished = lifecycle.run_test("abandoned", body)?;
    let step = find_step(&finished.record, &label("early-return"));
    assert_eq!(step.status, StepStatus::Fail);
    assert_eq!(step.comment.as_deref(), Some("step was not finished"));
    assert_eq!(finished.record.status, StepStatus::Fail);
    Ok(())
}

#[test]
fn explicit_ordinals_and_auto_ordinals_mix() -> Result<()> {
    test_init();
    let (lifecycle, _) = local_lifecycle();

    let finished = lifecycle.run_test("ordinals", |ctx| {
        ctx.run_step(1u32, None, |_| Ok(()))?;
        ctx.run_step("", None, |_| Ok(()))?;
        ctx.run_step(None::<&str>, None, |_| Ok(()))
    })?;

    let ids: Vec<_> = finished
        .record
        .steps
        .iter()
        .map(|step| step.step_id.clone())
        .collect();
    assert_eq!(
        ids,
        vec![StepId::Ordinal(1), StepId::Ordinal(2), StepId::Ordinal(3)]
    );
    Ok(())
}

#[test]
fn guard_block_stops_the_test() -> Result<()> {
    test_init();
    let (lifecycle, backend) = reporting_lifecycle();
    let attached_devices = 0;
    let mut ran_after_block = false;

    let finished = lifecycle.run_test("guarded", |ctx| {
        ctx.run_step("setup", None, |setup| {
            let step = setup.step("find device", None)?;
            if attached_devices == 0 {
                return Err(step.block("no device"));
            }
            step.finish()?;
            Ok(())
        })?;
        ran_after_block = true;
        ctx.run_step("after", None, |_| Ok(()))
    })?;

    ensure!(!ran_after_block, "code after a block does not run");
    assert_eq!(
        step_statuses(&finished.record),
        vec![
            (label("find device"), StepStatus::Blocked),
            (label("setup"), StepStatus::Blocked),
        ]
    );
    assert_eq!(
        finished.verdict,
        TestVerdict::Skipped {
            reason: "no device".to_owned()
        }
    );
    let final_status = backend.calls().into_iter().find_map(|call| match call {
        BackendCall::UpdateResult { status, .. } => Some(status),
        _ => None,
    });
    assert_eq!(final_status, Some(StepStatus::Blocked));
    Ok(())
}

#[test]
fn guard_fail_stops_the_test() -> Result<()> {
    test_init();
    let (lifecycle, _) = local_lifecycle();
    let mut ran_after_fail = false;

    let finished = lifecycle.run_test("failing", |ctx| {
        let step = ctx.step("login", None)?;
        let status_code = 500;
        if status_code != 200 {
            return Err(step.fail(format!("login returned {status_code}")));
        }
        step.finish()?;
        ran_after_fail = true;
        Ok(())
    })?;

    ensure!(!ran_after_fail, "code after a failure does not run");
    let step = find_step(&finished.record, &label("login"));
    assert_eq!(step.status, StepStatus::Fail);
    assert_eq!(
        finished.verdict,
        TestVerdict::Failed {
            message: "login returned 500".to_owned()
        }
    );
    Ok(())
}

#[test]
fn finished_steps_are_visible_while_the_test_runs() -> Result<()> {
    test_init();
    let (lifecycle, backend) = local_lifecycle();
    let test_id = TestId::new("inspect");
    let mut seen_in_step = Vec::new();
    let mut seen_in_store = Vec::new();

    lifecycle.run_test(test_id.clone(), |ctx| {
        ctx.run_step("login", None, |step| {
            step.check(false, "slow login");
            Ok(())
        })?;
        assert_only_login_failed(ctx.finished_steps());

        ctx.run_step("search", None, |search| {
            search.run_step("query", None, |_| Ok(()))?;
            seen_in_step = step_ids(search.finished_steps());
            Ok(())
        })?;

        let store = lifecycle.store().lock()?;
        let running = store.running_steps(&test_id).unwrap_or_default();
        seen_in_store = step_ids(running);
        Ok(())
    })?;

    assert_eq!(seen_in_step, vec![label("login"), label("query")]);
    assert_eq!(
        seen_in_store,
        vec![label("login"), label("query"), label("search")]
    );
    ensure!(backend.calls().is_empty(), "reporting is disabled");
    Ok(())
}

fn assert_only_login_failed(steps: &[StepRecord]) {
    assert_eq!(
        steps
            .iter()
            .map(|step| (step.step_id.clone(), step.status))
            .collect::<Vec<_>>(),
        vec![(label("login"), StepStatus::Fail)]
    );
}

fn step_ids(steps: &[StepRecord]) -> Vec<StepId> {
    steps.iter().map(|step| step.step_id.clone()).collect()
}

#[test]
fn duplicate_step_id_is_misuse() -> Result<()> {
    test_init();
    let (lifecycle, backend) = reporting_lifecycle();

    let err = lifecycle
        .run_test("duplicate", |ctx| {
            ctx.run_step("login", None, |_| Ok(()))?;
            ctx.run_step("login", None, |_| Ok(()))
        })
        .unwrap_err();

    let LifecycleError::ScopeMisuse { test_id, errors } = &err else {
        panic!("expected scope misuse, got {err}");
    };
    assert_eq!(test_id, &TestId::new("duplicate"));
    ensure!(
        matches!(errors.as_slice(), [ScopeError::DuplicateStepId { .. }]),
        "unexpected errors: {errors:?}"
    );
    // Misuse is not a test outcome, so nothing is reported.
    ensure!(backend.calls().is_empty(), "calls: {:?}", backend.calls());

    // The record is kept locally, and only the first step was entered.
    let store = lifecycle.store().lock()?;
    let record = store
        .get(&TestId::new("duplicate"))
        .expect("the test was finalized");
    assert_eq!(
        step_statuses(record),
        vec![(label("login"), StepStatus::Pass)]
    );
    assert_eq!(record.status, StepStatus::Fail);
    Ok(())
}
