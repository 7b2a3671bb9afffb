//! ---
//! trex_section: "02-adapter-boundary"
//! trex_subsection: "module"
//! trex_type: "source"
//! trex_scope: "code"
//! trex_description: "Default console-runner adapter implementation."
//! trex_version: "v0.1.0"
//! trex_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};
use trex_common::config::RunnerConfig;

use crate::{AdapterError, DiscoveredCase, RunError, TestAdapter};

const TEST_ATTRIBUTE: &str = "TestMethod";
const DESCRIPTION_ATTRIBUTE: &str = "TestMethodDescription";

/// Adapter that shells out to an external console test runner.
///
/// Discovery runs `<runner> --explore <assembly>` and parses one case per
/// line in the form `Class::Method|description|marker,marker`. Execution runs
/// `<runner> --test <id> --work <results-dir> <assembly>`; the runner writes
/// its result files into the work directory, which the engine never reads.
#[derive(Debug, Clone)]
pub struct ConsoleRunnerAdapter {
    config: RunnerConfig,
}

impl ConsoleRunnerAdapter {
    /// Build an adapter from the runner section of the application config.
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// The work directory handed to the console runner.
    pub fn results_dir(&self) -> &Path {
        &self.config.results_dir
    }

    fn classify_failure(&self, output: &str) -> RunError {
        let message = failure_message(output);
        if output.contains(&self.config.timeout_marker) {
            RunError::Timeout(message)
        } else {
            RunError::Other(message)
        }
    }
}

#[async_trait]
impl TestAdapter for ConsoleRunnerAdapter {
    fn display_name(&self) -> &str {
        "Console Runner"
    }

    fn assembly_path(&self) -> &Path {
        &self.config.assembly
    }

    fn set_assembly_path(&mut self, path: PathBuf) {
        self.config.assembly = path;
    }

    fn test_method_attribute(&self) -> &str {
        TEST_ATTRIBUTE
    }

    fn test_method_description_attribute(&self) -> &str {
        DESCRIPTION_ATTRIBUTE
    }

    fn supports_excel_export(&self) -> bool {
        true
    }

    async fn discover(&self) -> Result<Vec<DiscoveredCase>, AdapterError> {
        if self.config.assembly.as_os_str().is_empty() {
            return Err(AdapterError::AssemblyUnusable {
                path: self.config.assembly.clone(),
                reason: "no assembly configured".to_owned(),
            });
        }
        debug!(assembly = %self.config.assembly.display(), "exploring assembly");
        let output = Command::new(&self.config.runner_command)
            .arg("--explore")
            .arg(&self.config.assembly)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AdapterError::Discovery(failure_message(&stderr)));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_discovery_listing(&stdout)
    }

    async fn run_test(&self, case_id: &str) -> Result<(), RunError> {
        let mut command = Command::new(&self.config.runner_command);
        command
            .arg("--test")
            .arg(case_id)
            .arg("--work")
            .arg(&self.config.results_dir)
            .arg(&self.config.assembly)
            .stdin(Stdio::null())
            // Reap the runner if the engine-side deadline expires first.
            .kill_on_drop(true);

        debug!(test = %case_id, runner = %self.config.runner_command, "invoking console runner");
        let invocation = command.output();
        let output = match tokio::time::timeout(self.config.test_timeout, invocation).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                warn!(test = %case_id, error = %err, "failed to launch console runner");
                return Err(RunError::Other(format!(
                    "failed to launch {}: {}",
                    self.config.runner_command, err
                )));
            }
            Err(_) => {
                return Err(RunError::Timeout(format!(
                    "{} after {}s",
                    self.config.timeout_marker,
                    self.config.test_timeout.as_secs()
                )));
            }
        };

        if output.status.success() {
            return Ok(());
        }
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        Err(self.classify_failure(&combined))
    }
}

/// Parse the `--explore` listing: one case per non-empty line,
/// `Class::Method|description|marker,marker`. Lines starting with `#` are
/// runner chatter and skipped.
fn parse_discovery_listing(listing: &str) -> Result<Vec<DiscoveredCase>, AdapterError> {
    let mut cases = Vec::new();
    for (line_no, line) in listing.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.splitn(3, '|');
        let identity = fields.next().unwrap_or_default();
        let (class_name, method_name) = identity.split_once("::").ok_or_else(|| {
            AdapterError::Discovery(format!(
                "malformed case identity on line {}: {:?}",
                line_no + 1,
                identity
            ))
        })?;
        let description = fields.next().unwrap_or_default().trim().to_owned();
        let markers = fields
            .next()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|marker| !marker.is_empty())
            .map(str::to_owned)
            .collect();
        cases.push(DiscoveredCase {
            class_name: class_name.trim().to_owned(),
            method_name: method_name.trim().to_owned(),
            markers,
            description,
        });
    }
    Ok(cases)
}

/// Condense runner output to its last non-empty line for the error message.
fn failure_message(output: &str) -> String {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("console runner reported failure with no output")
        .to_owned()
}
