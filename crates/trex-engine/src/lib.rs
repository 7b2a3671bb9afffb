//! ---
//! trex_section: "01-core-functionality"
//! trex_subsection: "module"
//! trex_type: "source"
//! trex_scope: "code"
//! trex_description: "Orchestration engine coordinating test execution."
//! trex_version: "v0.1.0"
//! trex_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! The TREX orchestration core.
//!
//! The engine discovers test cases through a pluggable [`trex_adapter::TestAdapter`],
//! admits them into execution under a bounded-concurrency dispatcher, tracks
//! per-test lifecycle status, retries framework timeouts exactly once, and
//! fans lifecycle events out to subscribers.

pub mod dispatch;
pub mod extensions;
pub mod inventory;
pub mod orchestrator;
pub mod progress;
mod task;

pub use extensions::{ExtensionHost, NoopExtensionHost};
pub use inventory::{ExecutionStatus, Inventory, TestCase, TestId};
pub use orchestrator::{EngineError, EngineEvent, EngineState, RunSummary, TestOrchestrator};
pub use progress::{ProgressTracker, RunCounts};
