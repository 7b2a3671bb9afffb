//! ---
//! trex_section: "01-core-functionality"
//! trex_subsection: "module"
//! trex_type: "source"
//! trex_scope: "code"
//! trex_description: "Shared primitives and utilities for the executive."
//! trex_version: "v0.1.0"
//! trex_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_max_concurrency() -> usize {
    4
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("target/test-results")
}

fn default_test_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_runner_command() -> String {
    "console-runner".to_owned()
}

fn default_timeout_marker() -> String {
    "execution timed out".to_owned()
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for the TREX runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "TREX_CONFIG";

    /// Load configuration from disk, respecting the `TREX_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.runner.validate()
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Execution settings consumed by the dispatcher and the default adapter.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Maximum number of test cases executing at the same time.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Path to the compiled test assembly handed to the adapter.
    #[serde(default)]
    pub assembly: PathBuf,
    /// Directory the external runner writes its result files into.
    /// Consumed only by the adapter; the engine never reads it.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// Wall-clock budget for a single test-case invocation.
    #[serde(default = "default_test_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub test_timeout: Duration,
    /// Console runner executable invoked per test case.
    #[serde(default = "default_runner_command")]
    pub runner_command: String,
    /// Substring in the runner's output that identifies a framework timeout.
    #[serde(default = "default_timeout_marker")]
    pub timeout_marker: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            assembly: PathBuf::new(),
            results_dir: default_results_dir(),
            test_timeout: default_test_timeout(),
            runner_command: default_runner_command(),
            timeout_marker: default_timeout_marker(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(anyhow!("runner.max_concurrency must be at least 1"));
        }
        if self.assembly.as_os_str().is_empty() {
            return Err(anyhow!("runner.assembly must point at a test assembly"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config: AppConfig = r#"
            [runner]
            assembly = "fixtures/suite.dll"
        "#
        .parse()
        .expect("minimal config parses");
        assert_eq!(config.runner.max_concurrency, 4);
        assert_eq!(config.runner.assembly, PathBuf::from("fixtures/suite.dll"));
        assert_eq!(config.runner.test_timeout, Duration::from_secs(120));
        assert_eq!(config.logging.format, LogFormat::StructuredJson);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let err = r#"
            [runner]
            assembly = "fixtures/suite.dll"
            max_concurrency = 0
        "#
        .parse::<AppConfig>()
        .expect_err("zero concurrency must fail validation");
        assert!(err.to_string().contains("max_concurrency"));
    }

    #[test]
    fn rejects_missing_assembly() {
        let err = "[runner]\n".parse::<AppConfig>().expect_err("empty assembly");
        assert!(err.to_string().contains("assembly"));
    }

    #[test]
    fn duration_fields_parse_from_seconds() {
        let config: AppConfig = r#"
            [runner]
            assembly = "fixtures/suite.dll"
            test_timeout = 5
        "#
        .parse()
        .expect("config parses");
        assert_eq!(config.runner.test_timeout, Duration::from_secs(5));
    }
}
