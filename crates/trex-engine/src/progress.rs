//! ---
//! trex_section: "01-core-functionality"
//! trex_subsection: "module"
//! trex_type: "source"
//! trex_scope: "code"
//! trex_description: "Thread-safe run progress bookkeeping."
//! trex_version: "v0.1.0"
//! trex_owner: "tbd"
//! ---
use std::collections::HashSet;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::inventory::{ExecutionStatus, TestCase, TestId};

/// Per-terminal-status tallies for one run session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Tests enrolled in the session.
    pub total: usize,
    /// Tests that reached `Passed`.
    pub passed: usize,
    /// Tests that reached `Failed`.
    pub failed: usize,
    /// Tests that reached `Aborted`.
    pub aborted: usize,
    /// Tests that reached `NotExecuted`.
    pub not_executed: usize,
    /// Tests that reached `Canceled`.
    pub canceled: usize,
}

impl RunCounts {
    /// Sum of all terminal buckets.
    pub fn terminal_total(&self) -> usize {
        self.passed + self.failed + self.aborted + self.not_executed + self.canceled
    }
}

#[derive(Debug, Default)]
struct ProgressInner {
    counts: RunCounts,
    counted: HashSet<TestId>,
}

/// Thread-safe bookkeeping of how many enrolled tests reached each terminal
/// status.
///
/// Safe under concurrent [`ProgressTracker::update`] calls from in-flight
/// execution tasks; a test already counted in a terminal bucket is never
/// double-counted.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    inner: Mutex<ProgressInner>,
}

impl ProgressTracker {
    /// Create a tracker with no enrolled session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all counts and enroll `total` tests for the next session.
    pub fn reset(&self, total: usize) {
        let mut inner = self.inner.lock();
        inner.counts = RunCounts {
            total,
            ..RunCounts::default()
        };
        inner.counted.clear();
    }

    /// Account the case's current terminal status. Non-terminal statuses and
    /// repeat notifications are ignored. Returns whether a bucket was bumped.
    pub fn update(&self, case: &TestCase) -> bool {
        if !case.status.is_terminal() {
            return false;
        }
        let mut inner = self.inner.lock();
        if !inner.counted.insert(case.id.clone()) {
            return false;
        }
        match case.status {
            ExecutionStatus::Passed => inner.counts.passed += 1,
            ExecutionStatus::Failed => inner.counts.failed += 1,
            ExecutionStatus::Aborted => inner.counts.aborted += 1,
            ExecutionStatus::NotExecuted => inner.counts.not_executed += 1,
            ExecutionStatus::Canceled => inner.counts.canceled += 1,
            ExecutionStatus::Active | ExecutionStatus::Waiting | ExecutionStatus::Running => {
                unreachable!("non-terminal status filtered above")
            }
        }
        true
    }

    /// Whether every enrolled test reached a terminal status.
    pub fn done(&self) -> bool {
        let inner = self.inner.lock();
        inner.counts.terminal_total() == inner.counts.total
    }

    /// Snapshot of the current tallies.
    pub fn counts(&self) -> RunCounts {
        self.inner.lock().counts
    }
}
