//! ---
//! trex_section: "01-core-functionality"
//! trex_subsection: "binary"
//! trex_type: "source"
//! trex_scope: "code"
//! trex_description: "Binary entrypoint for the TREX operator CLI."
//! trex_version: "v0.1.0"
//! trex_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use trex_adapter::ConsoleRunnerAdapter;
use trex_common::config::AppConfig;
use trex_common::logging::init_tracing;
use trex_engine::{EngineEvent, NoopExtensionHost, RunSummary, TestCase, TestOrchestrator};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "TREX test run executive",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Discover test cases in the configured assembly")]
    Discover,
    #[command(about = "Run discovered test cases to completion")]
    Run {
        #[arg(long, help = "Override the configured concurrency cap")]
        max_concurrency: Option<usize>,

        #[arg(long, help = "Only run tests whose id contains this substring")]
        filter: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/trex.toml"));
    candidates.push(PathBuf::from("configs/example.dev.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    init_tracing("trexctl", &config.logging)?;
    info!(config_path = %loaded.source.display(), "configuration loaded");

    match cli.command {
        Commands::Discover => discover(config).await,
        Commands::Run {
            max_concurrency,
            filter,
        } => {
            if let Some(cap) = max_concurrency {
                config.runner.max_concurrency = cap;
                config.validate()?;
            }
            run(config, filter).await
        }
    }
}

fn build_engine(config: &AppConfig) -> TestOrchestrator {
    let adapter = Arc::new(ConsoleRunnerAdapter::new(config.runner.clone()));
    TestOrchestrator::from_config(&config.runner, adapter, Arc::new(NoopExtensionHost))
}

async fn discover(config: AppConfig) -> Result<()> {
    let engine = build_engine(&config);
    let inventory = engine.discover().await?;
    println!(
        "{} test cases in {}",
        inventory.len(),
        config.runner.assembly.display()
    );
    for case in inventory {
        render_case(&case);
    }
    Ok(())
}

async fn run(config: AppConfig, filter: Option<String>) -> Result<()> {
    let engine = build_engine(&config);
    let inventory = engine.discover().await?;

    let selection: Vec<_> = inventory
        .into_iter()
        .map(|case| case.id)
        .filter(|id| match &filter {
            Some(fragment) => id.to_string().contains(fragment),
            None => true,
        })
        .collect();
    if selection.is_empty() {
        bail!("no test cases match the requested selection");
    }

    let mut events = engine.subscribe();
    let session = engine.run(selection).await?;
    info!(session = %session, "run session started; ctrl-c cancels admission");

    let summary = stream_events(&engine, &mut events).await?;
    engine.join_session().await?;

    println!(
        "session {}: {} passed, {} failed, {} of {} finished{}",
        summary.session_id,
        summary.counts.passed,
        summary.counts.failed,
        summary.counts.terminal_total(),
        summary.counts.total,
        if summary.canceled { " (canceled)" } else { "" }
    );
    if summary.counts.failed > 0 {
        bail!(
            "{} of {} tests failed",
            summary.counts.failed,
            summary.counts.total
        );
    }
    Ok(())
}

/// Stream status lines until the completion event arrives. A ctrl-c requests
/// cooperative cancellation; in-flight tests still run to completion.
async fn stream_events(
    engine: &TestOrchestrator,
    events: &mut tokio::sync::broadcast::Receiver<EngineEvent>,
) -> Result<RunSummary> {
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                warn!("ctrl-c received; canceling admission");
                engine.cancel();
            }
            event = events.recv() => match event {
                Ok(EngineEvent::StatusChanged(case)) => {
                    if case.status.is_terminal() {
                        render_terminal(&case);
                    }
                }
                Ok(EngineEvent::RunFinished(summary)) => return Ok(summary),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream lagged; some status lines were dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    bail!("event stream closed before the run finished");
                }
            },
        }
    }
}

fn render_case(case: &TestCase) {
    let markers = if case.markers.is_empty() {
        String::new()
    } else {
        format!("  [{}]", case.markers.join(","))
    };
    println!("{}{}  {}", case.id, markers, case.description);
}

fn render_terminal(case: &TestCase) {
    if case.error.is_empty() {
        println!("{}  {}", case.status, case.id);
    } else {
        println!("{}  {}  {}", case.status, case.id, case.error);
    }
}
