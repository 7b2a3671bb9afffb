//! ---
//! trex_section: "02-adapter-boundary"
//! trex_subsection: "module"
//! trex_type: "source"
//! trex_scope: "code"
//! trex_description: "Execution adapter capability interface."
//! trex_version: "v0.1.0"
//! trex_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! The adapter boundary decouples the orchestration engine from any specific
//! test framework. Each supported framework provides one [`TestAdapter`]
//! implementation; the engine consumes only the pass/fail/error outcome and
//! never inspects framework result files itself.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

pub mod console;

pub use console::ConsoleRunnerAdapter;

/// One test method enumerated from a compiled test assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCase {
    /// Class (fixture) that declares the method.
    pub class_name: String,
    /// Method name, unique within the class.
    pub method_name: String,
    /// Custom markers attached to the method, in declaration order.
    /// Informational only; the engine never branches on them.
    pub markers: Vec<String>,
    /// Free-text description attached via the description attribute.
    pub description: String,
}

impl DiscoveredCase {
    /// Canonical `Class::Method` identity used throughout the engine.
    pub fn case_id(&self) -> String {
        format!("{}::{}", self.class_name, self.method_name)
    }
}

/// Errors raised while enumerating tests from an assembly.
///
/// Any variant is fatal to the discovery call; the caller's inventory is
/// left unchanged.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The assembly path is missing or cannot be handed to the framework.
    #[error("test assembly {path} is not usable: {reason}")]
    AssemblyUnusable {
        /// Path that was rejected.
        path: PathBuf,
        /// Framework-reported reason.
        reason: String,
    },
    /// The discovery invocation itself failed.
    #[error("test discovery failed: {0}")]
    Discovery(String),
    /// Underlying I/O failure while talking to the framework.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outcome classification for a single `run_test` invocation.
///
/// `Timeout` is the only transient kind; the execution task retries it exactly
/// once. Everything else is terminal for the attempt.
#[derive(Debug, Error)]
pub enum RunError {
    /// The framework reported that execution exceeded its time budget.
    #[error("execution timed out: {0}")]
    Timeout(String),
    /// Any other framework or harness failure.
    #[error("{0}")]
    Other(String),
}

impl RunError {
    /// Whether this failure is the transient timeout kind.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RunError::Timeout(_))
    }

    /// The human-readable message carried by the failure.
    pub fn message(&self) -> &str {
        match self {
            RunError::Timeout(msg) | RunError::Other(msg) => msg,
        }
    }
}

/// Capability interface implemented once per underlying test framework.
///
/// `run_test` must not retry internally; retry policy belongs to the
/// engine's execution task. Implementations that cannot tolerate concurrent
/// invocation must advertise a ceiling via [`TestAdapter::max_safe_concurrency`];
/// the engine clamps its dispatch cap accordingly, so for such adapters the
/// ceiling is a correctness requirement rather than a tuning knob.
#[async_trait]
pub trait TestAdapter: Send + Sync {
    /// Human-readable adapter name for logs and the CLI.
    fn display_name(&self) -> &str;

    /// Path of the assembly this adapter currently targets.
    fn assembly_path(&self) -> &Path;

    /// Re-target the adapter at a different assembly.
    fn set_assembly_path(&mut self, path: PathBuf);

    /// Name of the method-level attribute that denotes a test.
    fn test_method_attribute(&self) -> &str;

    /// Name of the attribute carrying a test's description text.
    fn test_method_description_attribute(&self) -> &str;

    /// Whether the underlying framework can export results to a spreadsheet.
    /// Capability flag only; the export itself happens outside the engine.
    fn supports_excel_export(&self) -> bool {
        false
    }

    /// Maximum number of concurrent `run_test` calls this adapter tolerates,
    /// or `None` when it is safely reentrant.
    fn max_safe_concurrency(&self) -> Option<usize> {
        None
    }

    /// Enumerate every test method in the targeted assembly.
    async fn discover(&self) -> Result<Vec<DiscoveredCase>, AdapterError>;

    /// Execute one named test case to completion.
    async fn run_test(&self, case_id: &str) -> Result<(), RunError>;
}
