// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-worker result store.
//!
//! A [`ResultStore`] holds one entry per test, keyed by [`TestId`] in the order tests were first
//! started. An entry is either running (steps are being appended) or finished (an immutable
//! [`TestRecord`]). Finished records can be exported as a [`ReportSnapshot`], and stores from
//! independent workers can be merged into one report.

use crate::errors::{SnapshotReadError, SnapshotWriteError, StoreError};
use camino::Utf8Path;
use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use smol_str::SmolStr;
use std::{
    collections::HashSet,
    fs::File,
    io::{self, BufReader, BufWriter, Write},
    sync::{Arc, Mutex, MutexGuard},
};
use stepwise_metadata::{
    BuildMetadata, ReportSnapshot, StepId, StepRecord, StepStatus, TestId, TestRecord,
};
use tracing::debug;

/// Finished and running test records for one worker.
#[derive(Clone, Debug, Default)]
pub struct ResultStore {
    worker: Option<SmolStr>,
    build: Option<BuildMetadata>,
    entries: IndexMap<TestId, TestEntry>,
}

#[derive(Clone, Debug)]
enum TestEntry {
    Running(RunningTest),
    Finished(TestRecord),
}

#[derive(Clone, Debug)]
struct RunningTest {
    attempt: u32,
    start_time: DateTime<FixedOffset>,
    steps: Vec<StepRecord>,
    step_ids: HashSet<StepId>,
}

impl RunningTest {
    fn new(attempt: u32, start_time: DateTime<FixedOffset>) -> Self {
        Self {
            attempt,
            start_time,
            steps: Vec::new(),
            step_ids: HashSet::new(),
        }
    }
}

/// How a test's own body concluded, contributed to its status alongside its steps.
#[derive(Clone, Debug)]
pub struct TestConclusion {
    /// When the test ended.
    pub end_time: DateTime<FixedOffset>,

    /// The status contributed by the test body outside of any step.
    pub contribution: StepStatus,

    /// The reason for a non-passing status, if known.
    pub reason: Option<String>,
}

impl ResultStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker name written into snapshots.
    pub fn with_worker(mut self, worker: impl Into<SmolStr>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    /// Sets the build metadata written into snapshots.
    pub fn with_build(mut self, build: BuildMetadata) -> Self {
        self.build = Some(build);
        self
    }

    /// Starts a test, returning the attempt number.
    ///
    /// Starting a test that already finished begins a new attempt that replaces the previous one.
    pub fn begin_test(
        &mut self,
        test_id: &TestId,
        start_time: DateTime<FixedOffset>,
    ) -> Result<u32, StoreError> {
        let attempt = match self.entries.get(test_id) {
            None => 1,
            Some(TestEntry::Finished(record)) => record.attempt + 1,
            Some(TestEntry::Running(_)) => {
                return Err(StoreError::TestAlreadyRunning {
                    test_id: test_id.clone(),
                });
            }
        };
        if attempt > 1 {
            debug!(%test_id, attempt, "retrying test, replacing previous attempt");
        }
        // IndexMap::insert keeps the original position of an existing key.
        self.entries.insert(
            test_id.clone(),
            TestEntry::Running(RunningTest::new(attempt, start_time)),
        );
        Ok(attempt)
    }

    /// Appends a finished step to a running test.
    pub fn append(&mut self, test_id: &TestId, step: StepRecord) -> Result<(), StoreError> {
        let running = self.running_mut(test_id)?;
        if !running.step_ids.insert(step.step_id.clone()) {
            return Err(StoreError::DuplicateStepId {
                test_id: test_id.clone(),
                step_id: step.step_id,
            });
        }
        running.steps.push(step);
        Ok(())
    }

    /// Finalizes a running test: folds its step statuses and the body's contribution into the
    /// overall status, and stores the immutable record.
    pub fn finalize(
        &mut self,
        test_id: &TestId,
        conclusion: TestConclusion,
    ) -> Result<TestRecord, StoreError> {
        let running = self.running_mut(test_id)?;
        let steps = std::mem::take(&mut running.steps);
        let status = StepStatus::fold(steps.iter().map(|step| step.status))
            .combine(conclusion.contribution)
            .resolve();
        let record = TestRecord {
            test_id: test_id.clone(),
            attempt: running.attempt,
            status,
            reason: if status == StepStatus::Pass {
                None
            } else {
                conclusion.reason
            },
            start_time: running.start_time,
            end_time: conclusion.end_time,
            steps,
        };
        self.entries
            .insert(test_id.clone(), TestEntry::Finished(record.clone()));
        Ok(record)
    }

    /// Returns the finished record for a test, if it has finished.
    pub fn get(&self, test_id: &TestId) -> Option<&TestRecord> {
        match self.entries.get(test_id)? {
            TestEntry::Finished(record) => Some(record),
            TestEntry::Running(_) => None,
        }
    }

    /// Returns the steps recorded so far for a running test.
    pub fn running_steps(&self, test_id: &TestId) -> Option<&[StepRecord]> {
        match self.entries.get(test_id)? {
            TestEntry::Running(running) => Some(&running.steps),
            TestEntry::Finished(_) => None,
        }
    }

    /// Iterates over finished records in insertion order.
    pub fn records(&self) -> impl Iterator<Item = &TestRecord> {
        self.entries.values().filter_map(|entry| match entry {
            TestEntry::Finished(record) => Some(record),
            TestEntry::Running(_) => None,
        })
    }

    /// Returns the number of tests that are still running.
    pub fn running_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| matches!(entry, TestEntry::Running(_)))
            .count()
    }

    /// Merges the finished records of another worker's store into this one.
    ///
    /// Fails without changing anything if `other` still has running tests.
    pub fn merge(&mut self, other: ResultStore) -> Result<MergeSummary, StoreError> {
        if let Some((test_id, _)) = other
            .entries
            .iter()
            .find(|(_, entry)| matches!(entry, TestEntry::Running(_)))
        {
            return Err(StoreError::MergeRunningTest {
                test_id: test_id.clone(),
            });
        }
        Ok(self.merge_snapshot(other.into_snapshot()))
    }

    /// Merges a snapshot into this store.
    ///
    /// Records for tests this store doesn't know are appended. For a test present on both sides,
    /// the record that ended later wins: a later end time means a later run (a retry, or a rerun
    /// on another worker). Worker name and build metadata are kept from this store if set.
    pub fn merge_snapshot(&mut self, snapshot: ReportSnapshot) -> MergeSummary {
        let mut summary = MergeSummary::default();
        if self.worker.is_none() {
            self.worker = snapshot.worker;
        }
        if self.build.is_none() {
            self.build = snapshot.build;
        }

        for record in snapshot.tests {
            match self.entries.get_mut(&record.test_id) {
                None => {
                    summary.added += 1;
                    self.entries
                        .insert(record.test_id.clone(), TestEntry::Finished(record));
                }
                Some(TestEntry::Finished(existing)) => {
                    if record.supersedes(existing) {
                        summary.replaced += 1;
                        *existing = record;
                    } else {
                        summary.kept += 1;
                    }
                }
                Some(entry @ TestEntry::Running(_)) => {
                    // A finished record from elsewhere supersedes a local run that never ended.
                    summary.replaced += 1;
                    *entry = TestEntry::Finished(record);
                }
            }
        }
        summary
    }

    /// Returns a snapshot of the finished records, in insertion order.
    pub fn snapshot(&self) -> ReportSnapshot {
        let mut snapshot = ReportSnapshot::new(self.records().cloned().collect());
        snapshot.worker = self.worker.clone();
        snapshot.build = self.build.clone();
        snapshot
    }

    /// Converts this store into a snapshot of its finished records.
    pub fn into_snapshot(self) -> ReportSnapshot {
        let tests = self
            .entries
            .into_values()
            .filter_map(|entry| match entry {
                TestEntry::Finished(record) => Some(record),
                TestEntry::Running(_) => None,
            })
            .collect();
        let mut snapshot = ReportSnapshot::new(tests);
        snapshot.worker = self.worker;
        snapshot.build = self.build;
        snapshot
    }

    /// Creates a store from a snapshot.
    pub fn from_snapshot(snapshot: ReportSnapshot) -> Self {
        let mut store = Self::new();
        store.merge_snapshot(snapshot);
        store
    }

    /// Writes a snapshot of the finished records to `path`, atomically.
    pub fn write_snapshot(&self, path: &Utf8Path) -> Result<(), SnapshotWriteError> {
        write_snapshot(&self.snapshot(), path)
    }

    fn running_mut(&mut self, test_id: &TestId) -> Result<&mut RunningTest, StoreError> {
        match self.entries.get_mut(test_id) {
            Some(TestEntry::Running(running)) => Ok(running),
            Some(TestEntry::Finished(_)) => Err(StoreError::TestAlreadyFinalized {
                test_id: test_id.clone(),
            }),
            None => Err(StoreError::UnknownTest {
                test_id: test_id.clone(),
            }),
        }
    }
}

/// Counts of what a merge did.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MergeSummary {
    /// Records for tests that were not present before.
    pub added: usize,

    /// Records that replaced an earlier run of the same test.
    pub replaced: usize,

    /// Incoming records that lost to an existing later run.
    pub kept: usize,
}

impl MergeSummary {
    /// Adds the counts of another merge to this one.
    pub fn accumulate(&mut self, other: MergeSummary) {
        self.added += other.added;
        self.replaced += other.replaced;
        self.kept += other.kept;
    }
}

/// Merges snapshots from independent workers into one, in iteration order.
pub fn merge_snapshots(
    snapshots: impl IntoIterator<Item = ReportSnapshot>,
) -> (ReportSnapshot, MergeSummary) {
    let mut store = ResultStore::new();
    let mut summary = MergeSummary::default();
    for snapshot in snapshots {
        summary.accumulate(store.merge_snapshot(snapshot));
    }
    (store.into_snapshot(), summary)
}

/// Reads a snapshot from `path`.
pub fn read_snapshot(path: &Utf8Path) -> Result<ReportSnapshot, SnapshotReadError> {
    let file = File::open(path).map_err(|error| SnapshotReadError::Open {
        path: path.to_owned(),
        error,
    })?;
    ReportSnapshot::from_reader(BufReader::new(file)).map_err(|error| SnapshotReadError::Decode {
        path: path.to_owned(),
        error,
    })
}

/// Writes a snapshot to `path`, atomically replacing any existing file.
pub fn write_snapshot(snapshot: &ReportSnapshot, path: &Utf8Path) -> Result<(), SnapshotWriteError> {
    atomicwrites::AtomicFile::new(path, atomicwrites::AllowOverwrite)
        .write(|file| {
            let mut writer = BufWriter::new(file);
            snapshot.to_writer_pretty(&mut writer)?;
            writer.write_all(b"\n")?;
            writer.flush()
        })
        .map_err(|error: atomicwrites::Error<io::Error>| SnapshotWriteError::new(path, error))
}

/// A [`ResultStore`] shared between the tests of one worker.
///
/// Each test writes only its own entry, and a test's steps never run concurrently, so a single
/// lock around the store is enough.
#[derive(Clone, Debug, Default)]
pub struct SharedResultStore {
    inner: Arc<Mutex<ResultStore>>,
}

impl SharedResultStore {
    /// Wraps a store for sharing.
    pub fn new(store: ResultStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Locks the store.
    pub fn lock(&self) -> Result<MutexGuard<'_, ResultStore>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Returns a snapshot of the finished records.
    pub fn snapshot(&self) -> Result<ReportSnapshot, StoreError> {
        Ok(self.lock()?.snapshot())
    }
}
