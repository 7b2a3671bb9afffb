//! ---
//! trex_section: "01-core-functionality"
//! trex_subsection: "module"
//! trex_type: "source"
//! trex_scope: "code"
//! trex_description: "Test case data model and shared inventory registry."
//! trex_version: "v0.1.0"
//! trex_owner: "tbd"
//! ---
use std::fmt;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use trex_adapter::DiscoveredCase;

/// Identity of a test case: class plus method, unique within one assembly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TestId {
    /// Class (fixture) declaring the test method.
    pub class_name: String,
    /// Method name within the class.
    pub method_name: String,
}

impl TestId {
    /// Construct an identity from its two components.
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
        }
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.class_name, self.method_name)
    }
}

/// Lifecycle status of a test case within the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Discovered but not yet selected for a run.
    #[default]
    Active,
    /// Selected and enqueued, not yet admitted.
    Waiting,
    /// Admitted; adapter invocation in flight.
    Running,
    /// Terminal: the test passed.
    Passed,
    /// Terminal: the test failed; the case carries the error message.
    Failed,
    /// Terminal: execution was aborted by the framework.
    Aborted,
    /// Terminal: the framework skipped the test.
    NotExecuted,
    /// Terminal: the test was canceled.
    Canceled,
}

impl ExecutionStatus {
    /// Whether no further transition occurs from this status within one run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Passed
                | ExecutionStatus::Failed
                | ExecutionStatus::Aborted
                | ExecutionStatus::NotExecuted
                | ExecutionStatus::Canceled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExecutionStatus::Active => "active",
            ExecutionStatus::Waiting => "waiting",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Passed => "passed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Aborted => "aborted",
            ExecutionStatus::NotExecuted => "not_executed",
            ExecutionStatus::Canceled => "canceled",
        };
        f.write_str(label)
    }
}

/// One discovered test case and its lifecycle state.
///
/// Mutated only by the orchestration layer; adapters and subscribers see
/// immutable snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Stable identity within the discovered assembly.
    pub id: TestId,
    /// Free-text description from the description attribute.
    pub description: String,
    /// Custom markers attached to the method, in declaration order.
    pub markers: Vec<String>,
    /// Current lifecycle status.
    pub status: ExecutionStatus,
    /// Last error message; empty unless the status is a failure.
    pub error: String,
}

impl From<DiscoveredCase> for TestCase {
    fn from(case: DiscoveredCase) -> Self {
        Self {
            id: TestId::new(case.class_name, case.method_name),
            description: case.description,
            markers: case.markers,
            status: ExecutionStatus::Active,
            error: String::new(),
        }
    }
}

/// Shared registry of discovered test cases.
///
/// Insertion order is the discovery order and is preserved across snapshots;
/// re-discovery replaces the whole registry. Status mutation goes through the
/// `mark_*` methods so every transition produces a consistent snapshot for
/// the event stream.
#[derive(Debug, Default)]
pub struct Inventory {
    cases: RwLock<IndexMap<TestId, TestCase>>,
}

impl Inventory {
    /// Create an empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire registry with a fresh discovery result.
    pub fn replace(&self, cases: Vec<TestCase>) {
        let mut map = IndexMap::with_capacity(cases.len());
        for case in cases {
            map.insert(case.id.clone(), case);
        }
        *self.cases.write() = map;
    }

    /// Number of registered cases.
    pub fn len(&self) -> usize {
        self.cases.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.cases.read().is_empty()
    }

    /// Whether the given identity is registered.
    pub fn contains(&self, id: &TestId) -> bool {
        self.cases.read().contains_key(id)
    }

    /// Snapshot of a single case.
    pub fn get(&self, id: &TestId) -> Option<TestCase> {
        self.cases.read().get(id).cloned()
    }

    /// Snapshot of every case in discovery order.
    pub fn snapshot(&self) -> Vec<TestCase> {
        self.cases.read().values().cloned().collect()
    }

    /// Enroll a case for the upcoming run: status `Waiting`, error cleared.
    pub fn mark_waiting(&self, id: &TestId) -> Option<TestCase> {
        self.update(id, |case| {
            case.status = ExecutionStatus::Waiting;
            case.error.clear();
        })
    }

    /// Admit a case into execution: status `Running`, error cleared.
    pub fn mark_running(&self, id: &TestId) -> Option<TestCase> {
        self.update(id, |case| {
            case.status = ExecutionStatus::Running;
            case.error.clear();
        })
    }

    /// Record a terminal status and its error message, if any.
    pub fn mark_terminal(
        &self,
        id: &TestId,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Option<TestCase> {
        debug_assert!(status.is_terminal());
        self.update(id, |case| {
            case.status = status;
            case.error = error.unwrap_or_default();
        })
    }

    fn update(&self, id: &TestId, mutate: impl FnOnce(&mut TestCase)) -> Option<TestCase> {
        let mut cases = self.cases.write();
        let case = cases.get_mut(id)?;
        mutate(case);
        Some(case.clone())
    }
}
